//! kube-rs backed cluster client
//!
//! Typed lookups go through `Api<K>`; generic object operations go through
//! `Api<DynamicObject>` built from the object's `ApiResource`, so one code
//! path serves every kind in `KubeObject`.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use crate::crd::{ContainerStorageModule, ContainerStorageModuleStatus};
use crate::domain::ports::ClusterClient;
use crate::error::{Error, Result};
use crate::manifest::KubeObject;

/// Field manager recorded on status patches
const FIELD_MANAGER: &str = "csm-operator";

/// `ClusterClient` over a live API server
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Underlying kube client
    pub fn inner(&self) -> Client {
        self.client.clone()
    }

    fn dynamic_api(&self, obj: &KubeObject) -> Result<Api<DynamicObject>> {
        let ar = obj.api_resource();
        if obj.is_namespaced() {
            let ns = obj.namespace().ok_or_else(|| {
                Error::Manifest(format!("{} has no namespace", obj.display_name()))
            })?;
            Ok(Api::namespaced_with(self.client.clone(), ns, &ar))
        } else {
            Ok(Api::all_with(self.client.clone(), &ar))
        }
    }

    fn to_dynamic(obj: &KubeObject) -> Result<DynamicObject> {
        Ok(serde_json::from_value(obj.to_value()?)?)
    }
}

fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from_api(e, "Secret", name))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from_api(e, "ConfigMap", name))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from_api(e, "Deployment", name))
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from_api(e, "DaemonSet", name))
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&label_selector(labels));
        let list = api.list(&lp).await?;
        Ok(list.items)
    }

    async fn get_object(&self, obj: &KubeObject) -> Result<KubeObject> {
        let api = self.dynamic_api(obj)?;
        let live = api
            .get(obj.name())
            .await
            .map_err(|e| Error::from_api(e, obj.kind(), obj.name()))?;

        KubeObject::from_value(obj.kind(), serde_json::to_value(&live)?)?.ok_or_else(|| {
            Error::Internal(format!("unsupported kind {}", obj.kind()))
        })
    }

    async fn create_object(&self, obj: &KubeObject) -> Result<()> {
        let api = self.dynamic_api(obj)?;
        api.create(&PostParams::default(), &Self::to_dynamic(obj)?)
            .await
            .map_err(|e| Error::from_api(e, obj.kind(), obj.name()))?;
        debug!(object = %obj.display_name(), "Created");
        Ok(())
    }

    async fn update_object(&self, obj: &KubeObject) -> Result<()> {
        let api = self.dynamic_api(obj)?;
        api.replace(obj.name(), &PostParams::default(), &Self::to_dynamic(obj)?)
            .await
            .map_err(|e| Error::from_api(e, obj.kind(), obj.name()))?;
        debug!(object = %obj.display_name(), "Updated");
        Ok(())
    }

    async fn delete_object(&self, obj: &KubeObject) -> Result<()> {
        let api = self.dynamic_api(obj)?;
        api.delete(obj.name(), &DeleteParams::background())
            .await
            .map_err(|e| Error::from_api(e, obj.kind(), obj.name()))?;
        Ok(())
    }

    async fn update_csm_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ContainerStorageModuleStatus,
    ) -> Result<()> {
        let api: Api<ContainerStorageModule> = Api::namespaced(self.client.clone(), namespace);
        let patch = Patch::Merge(json!({ "status": status }));
        api.patch_status(name, &PatchParams::apply(FIELD_MANAGER), &patch)
            .await
            .map_err(|e| Error::from_api(e, "ContainerStorageModule", name))?;
        Ok(())
    }
}
