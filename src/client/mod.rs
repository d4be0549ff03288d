//! Cluster client adapters
//!
//! Implementations of the [`ClusterClient`](crate::domain::ports::ClusterClient) port:
//! - `KubeClusterClient`: live API server via kube-rs
//! - `FakeClusterClient`: in-memory store for tests

pub mod fake;
pub mod kube_client;

pub use fake::*;
pub use kube_client::*;
