//! Custom Resource Definitions for the CSM Operator
//!
//! - ContainerStorageModule: a CSI driver installation plus its modules

pub mod container_storage_module;

pub use container_storage_module::*;
