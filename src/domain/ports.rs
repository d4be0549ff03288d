//! Domain Ports - Core trait definitions for the CSM operator
//!
//! The reconcile pipeline talks to the cluster only through
//! [`ClusterClient`]. The kube-backed adapter lives in `client::kube_client`, and
//! `client::fake` provides an in-memory implementation for tests.

use crate::crd::ContainerStorageModuleStatus;
use crate::error::Result;
use crate::manifest::KubeObject;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Cluster Client Port
// =============================================================================

/// Port for all Kubernetes API access.
///
/// Lookups of missing objects return `Error::ResourceNotFound`.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch a Secret
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    /// Fetch a ConfigMap
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap>;

    /// Fetch a Deployment
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;

    /// Fetch a DaemonSet
    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet>;

    /// List Pods matching every label in `labels`
    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>>;

    /// Fetch the live copy of `obj` (looked up by kind, namespace, name)
    async fn get_object(&self, obj: &KubeObject) -> Result<KubeObject>;

    /// Create `obj`
    async fn create_object(&self, obj: &KubeObject) -> Result<()>;

    /// Replace `obj`
    async fn update_object(&self, obj: &KubeObject) -> Result<()>;

    /// Delete `obj`
    async fn delete_object(&self, obj: &KubeObject) -> Result<()>;

    /// Write the status subresource of a ContainerStorageModule
    async fn update_csm_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ContainerStorageModuleStatus,
    ) -> Result<()>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ClusterClientRef = Arc<dyn ClusterClient>;
