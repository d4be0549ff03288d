//! CSM Operator
//!
//! A Kubernetes operator that installs Dell Container Storage Modules: CSI
//! drivers (PowerScale, PowerFlex, PowerMax, PowerStore, Unity, COSI) and
//! the add-on modules that run alongside them.
//!
//! A `ContainerStorageModule` custom resource selects a driver and version.
//! The operator renders the versioned templates shipped in its config
//! directory, applies the resulting objects and reports workload health
//! back into the resource status.
//!
//! # Modules
//!
//! - [`controller`]: reconcile loop, finalizer and controller wiring
//! - [`drivers`]: per-driver prechecks, template tokens and workload patching
//! - [`modules`]: add-on module version defaults and prechecks
//! - [`manifest`]: YAML decoding and object apply/delete
//! - [`status`]: workload health and CR status transitions
//! - [`versions`]: image matrix per driver version
//! - [`config`]: operator config tree and sidecar images
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: cluster access port
//! - [`client`]: cluster access adapters
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod client;
pub mod config;
pub mod controller;
pub mod crd;
pub mod domain;
pub mod drivers;
pub mod error;
pub mod manifest;
pub mod metrics;
pub mod modules;
pub mod status;
pub mod versions;

// Re-export commonly used types
pub use client::{FakeClusterClient, KubeClusterClient};
pub use config::{OperatorConfig, DEFAULT_CONFIG_DIR};
pub use controller::{Context, FINALIZER};
pub use crd::{
    ContainerStorageModule, ContainerStorageModuleSpec, ContainerStorageModuleStatus, CsmState,
    DriverType, ModuleType,
};
pub use domain::ports::{ClusterClient, ClusterClientRef};
pub use error::{Error, ErrorAction, Result};
pub use manifest::KubeObject;
pub use metrics::Metrics;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
