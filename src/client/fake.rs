//! In-memory cluster client for testing
//!
//! Stores objects as JSON keyed by kind/namespace/name, counts every call,
//! and can be told to fail gets, creates or updates.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::crd::ContainerStorageModuleStatus;
use crate::domain::ports::ClusterClient;
use crate::error::{Error, Result};
use crate::manifest::KubeObject;

type ObjectKey = (String, String, String);
type ErrorFactory = Arc<dyn Fn(&str, &str) -> Error + Send + Sync>;

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub lists: usize,
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
    pub status_updates: usize,
}

#[derive(Default)]
struct Failures {
    get: Option<ErrorFactory>,
    create: Option<ErrorFactory>,
    update: Option<ErrorFactory>,
    delete: Option<ErrorFactory>,
}

/// In-memory `ClusterClient`
#[derive(Clone, Default)]
pub struct FakeClusterClient {
    objects: Arc<Mutex<BTreeMap<ObjectKey, Value>>>,
    pods: Arc<Mutex<Vec<Pod>>>,
    statuses: Arc<Mutex<BTreeMap<(String, String), ContainerStorageModuleStatus>>>,
    operations: Arc<Mutex<OperationCounts>>,
    failures: Arc<Mutex<Failures>>,
    resource_version: Arc<Mutex<u64>>,
}

impl FakeClusterClient {
    /// Create a new empty client
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as-is
    pub fn insert(&self, obj: KubeObject) {
        if let Ok(value) = obj.to_value() {
            self.objects.lock().insert(obj.key(), value);
        }
    }

    /// Store an empty Secret
    pub fn insert_secret(&self, namespace: &str, name: &str) {
        self.insert(KubeObject::Secret(Secret {
            metadata: meta(namespace, name),
            ..Default::default()
        }));
    }

    /// Store a ConfigMap with the given data
    pub fn insert_config_map(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
        self.insert(KubeObject::ConfigMap(ConfigMap {
            metadata: meta(namespace, name),
            data: Some(data),
            ..Default::default()
        }));
    }

    /// Store a Pod
    pub fn insert_pod(&self, pod: Pod) {
        self.pods.lock().push(pod);
    }

    /// Whether an object with this identity exists
    pub fn contains(&self, kind: &str, namespace: &str, name: &str) -> bool {
        self.objects
            .lock()
            .contains_key(&(kind.to_string(), namespace.to_string(), name.to_string()))
    }

    /// Last status written for a ContainerStorageModule
    pub fn csm_status(&self, namespace: &str, name: &str) -> Option<ContainerStorageModuleStatus> {
        self.statuses
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.lock().clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        *self.operations.lock() = OperationCounts::default();
    }

    /// Make every get fail with the produced error
    pub fn fail_gets_with(&self, f: impl Fn(&str, &str) -> Error + Send + Sync + 'static) {
        self.failures.lock().get = Some(Arc::new(f));
    }

    /// Make every create fail with the produced error
    pub fn fail_creates_with(&self, f: impl Fn(&str, &str) -> Error + Send + Sync + 'static) {
        self.failures.lock().create = Some(Arc::new(f));
    }

    /// Make every update fail with the produced error
    pub fn fail_updates_with(&self, f: impl Fn(&str, &str) -> Error + Send + Sync + 'static) {
        self.failures.lock().update = Some(Arc::new(f));
    }

    /// Make every delete fail with the produced error
    pub fn fail_deletes_with(&self, f: impl Fn(&str, &str) -> Error + Send + Sync + 'static) {
        self.failures.lock().delete = Some(Arc::new(f));
    }

    fn injected(&self, pick: fn(&Failures) -> Option<ErrorFactory>, kind: &str, name: &str) -> Result<()> {
        match pick(&self.failures.lock()) {
            Some(factory) => Err(factory(kind, name)),
            None => Ok(()),
        }
    }

    fn get_typed<T: DeserializeOwned>(&self, kind: &str, namespace: &str, name: &str) -> Result<T> {
        self.operations.lock().gets += 1;
        self.injected(|f| f.get.clone(), kind, name)?;

        let key = (kind.to_string(), namespace.to_string(), name.to_string());
        let value = self
            .objects
            .lock()
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: kind.to_string(),
                name: name.to_string(),
            })?;
        Ok(serde_json::from_value(value)?)
    }

    fn next_resource_version(&self) -> String {
        let mut rv = self.resource_version.lock();
        *rv += 1;
        rv.to_string()
    }
}

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.get_typed("Secret", namespace, name)
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap> {
        self.get_typed("ConfigMap", namespace, name)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        self.get_typed("Deployment", namespace, name)
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<DaemonSet> {
        self.get_typed("DaemonSet", namespace, name)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>> {
        self.operations.lock().lists += 1;
        let pods = self.pods.lock();
        Ok(pods
            .iter()
            .filter(|p| p.metadata.namespace.as_deref() == Some(namespace))
            .filter(|p| {
                let pod_labels = p.metadata.labels.clone().unwrap_or_default();
                labels.iter().all(|(k, v)| pod_labels.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }

    async fn get_object(&self, obj: &KubeObject) -> Result<KubeObject> {
        self.operations.lock().gets += 1;
        self.injected(|f| f.get.clone(), obj.kind(), obj.name())?;

        let value = self
            .objects
            .lock()
            .get(&obj.key())
            .cloned()
            .ok_or_else(|| Error::ResourceNotFound {
                kind: obj.kind().to_string(),
                name: obj.name().to_string(),
            })?;
        KubeObject::from_value(obj.kind(), value)?
            .ok_or_else(|| Error::Internal(format!("unsupported kind {}", obj.kind())))
    }

    async fn create_object(&self, obj: &KubeObject) -> Result<()> {
        self.operations.lock().creates += 1;
        self.injected(|f| f.create.clone(), obj.kind(), obj.name())?;

        let mut stored = obj.clone();
        stored.metadata_mut().resource_version = Some(self.next_resource_version());
        let value = stored.to_value()?;

        let mut objects = self.objects.lock();
        if objects.contains_key(&obj.key()) {
            return Err(Error::ResourceExists {
                kind: obj.kind().to_string(),
                name: obj.name().to_string(),
            });
        }
        objects.insert(obj.key(), value);
        Ok(())
    }

    async fn update_object(&self, obj: &KubeObject) -> Result<()> {
        self.operations.lock().updates += 1;
        self.injected(|f| f.update.clone(), obj.kind(), obj.name())?;

        let mut stored = obj.clone();
        stored.metadata_mut().resource_version = Some(self.next_resource_version());
        let value = stored.to_value()?;

        let mut objects = self.objects.lock();
        match objects.get_mut(&obj.key()) {
            Some(existing) => {
                *existing = value;
                Ok(())
            }
            None => Err(Error::ResourceNotFound {
                kind: obj.kind().to_string(),
                name: obj.name().to_string(),
            }),
        }
    }

    async fn delete_object(&self, obj: &KubeObject) -> Result<()> {
        self.operations.lock().deletes += 1;
        self.injected(|f| f.delete.clone(), obj.kind(), obj.name())?;
        match self.objects.lock().remove(&obj.key()) {
            Some(_) => Ok(()),
            None => Err(Error::ResourceNotFound {
                kind: obj.kind().to_string(),
                name: obj.name().to_string(),
            }),
        }
    }

    async fn update_csm_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ContainerStorageModuleStatus,
    ) -> Result<()> {
        self.operations.lock().status_updates += 1;
        self.statuses
            .lock()
            .insert((namespace.to_string(), name.to_string()), status.clone());
        Ok(())
    }
}
