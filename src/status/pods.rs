//! Pod classification for driver workloads
//!
//! Each pod behind the controller Deployment or node DaemonSet lands in one
//! bucket: available, ready, starting or stopped.

use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use tracing::debug;

use crate::crd::{ContainerStorageModule, PodStatus};
use crate::domain::ports::ClusterClient;
use crate::error::Result;

/// Bucket a pod falls into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodCondition {
    /// Running with every container running
    Available,
    /// Running but some containers are not
    Ready,
    /// Pending, unknown, or running without container statuses yet
    Starting,
    /// Failed or completed
    Stopped,
}

/// Classify one pod by phase and container states
pub fn classify_pod(pod: &Pod) -> PodCondition {
    let status = pod.status.as_ref();
    let phase = status.and_then(|s| s.phase.as_deref()).unwrap_or("Unknown");

    match phase {
        "Running" => {
            let containers = status
                .and_then(|s| s.container_statuses.as_ref())
                .filter(|c| !c.is_empty());
            match containers {
                None => PodCondition::Starting,
                Some(containers) => {
                    let all_running = containers
                        .iter()
                        .all(|c| c.state.as_ref().and_then(|s| s.running.as_ref()).is_some());
                    if all_running {
                        PodCondition::Available
                    } else {
                        PodCondition::Ready
                    }
                }
            }
        }
        "Failed" | "Succeeded" => PodCondition::Stopped,
        _ => PodCondition::Starting,
    }
}

/// Pods behind one workload, by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadPods {
    pub desired: i32,
    pub available: Vec<String>,
    pub ready: Vec<String>,
    pub starting: Vec<String>,
    pub stopped: Vec<String>,
    failed: i32,
}

impl WorkloadPods {
    /// Workload with nothing ready; every desired pod counts as failed
    fn stopped(desired: i32) -> Self {
        Self {
            desired,
            failed: desired,
            ..Default::default()
        }
    }

    fn from_pods(desired: i32, pods: &[Pod]) -> Self {
        let mut out = Self {
            desired,
            ..Default::default()
        };
        for pod in pods {
            let name = pod.metadata.name.clone().unwrap_or_default();
            match classify_pod(pod) {
                PodCondition::Available => out.available.push(name),
                PodCondition::Ready => out.ready.push(name),
                PodCondition::Starting => out.starting.push(name),
                PodCondition::Stopped => out.stopped.push(name),
            }
        }
        out.failed = out.stopped.len() as i32;
        out
    }

    pub fn available_count(&self) -> i32 {
        self.available.len() as i32
    }

    /// Counts as stored in the CR status
    pub fn pod_status(&self) -> PodStatus {
        PodStatus {
            available: self.available_count().to_string(),
            desired: self.desired.to_string(),
            failed: self.failed.to_string(),
        }
    }
}

fn app_selector(app: String) -> BTreeMap<String, String> {
    [("app".to_string(), app)].into()
}

async fn workload_pods(
    client: &dyn ClusterClient,
    namespace: &str,
    app: String,
    desired: i32,
    ready: i32,
) -> Result<WorkloadPods> {
    if desired == 0 || ready == 0 {
        debug!(app = %app, desired, ready, "Workload has nothing ready");
        return Ok(WorkloadPods::stopped(desired));
    }
    let pods = client.list_pods(namespace, &app_selector(app)).await?;
    Ok(WorkloadPods::from_pods(desired, &pods))
}

/// Pods of the controller Deployment
pub async fn get_deployment_status(
    cr: &ContainerStorageModule,
    client: &dyn ClusterClient,
) -> Result<WorkloadPods> {
    let namespace = cr.namespace_or_default();
    let deployment = client.get_deployment(&namespace, &cr.controller_name()).await?;

    let desired = deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);

    workload_pods(client, &namespace, cr.controller_name(), desired, ready).await
}

/// Pods of the node DaemonSet
pub async fn get_daemon_set_status(
    cr: &ContainerStorageModule,
    client: &dyn ClusterClient,
) -> Result<WorkloadPods> {
    let namespace = cr.namespace_or_default();
    let daemon_set = client.get_daemon_set(&namespace, &cr.node_name()).await?;

    let (desired, ready) = daemon_set
        .status
        .as_ref()
        .map(|s| (s.desired_number_scheduled, s.number_ready))
        .unwrap_or((0, 0));

    workload_pods(client, &namespace, cr.node_name(), desired, ready).await
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use k8s_openapi::api::apps::v1::{
        DaemonSet, DaemonSetStatus, Deployment, DeploymentSpec, DeploymentStatus,
    };
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateRunning, ContainerStateWaiting, ContainerStatus, PodStatus,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use crate::client::FakeClusterClient;
    use crate::crd::{ContainerStorageModuleSpec, Driver, DriverType};
    use crate::manifest::KubeObject;

    pub fn csm() -> ContainerStorageModule {
        let mut cr = ContainerStorageModule::new(
            "isilon",
            ContainerStorageModuleSpec {
                driver: Driver {
                    csi_driver_type: DriverType::PowerScale,
                    config_version: "v2.12.0".into(),
                    replicas: 1,
                    ..Default::default()
                },
                modules: vec![],
            },
        );
        cr.metadata.namespace = Some("isilon".into());
        cr
    }

    fn meta(name: &str) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("isilon".to_string()),
            ..Default::default()
        }
    }

    pub fn pod(name: &str, app: &str, phase: &str, running: &[bool]) -> Pod {
        let statuses = running
            .iter()
            .enumerate()
            .map(|(i, up)| ContainerStatus {
                name: format!("c{}", i),
                state: Some(if *up {
                    ContainerState {
                        running: Some(ContainerStateRunning::default()),
                        ..Default::default()
                    }
                } else {
                    ContainerState {
                        waiting: Some(ContainerStateWaiting::default()),
                        ..Default::default()
                    }
                }),
                ..Default::default()
            })
            .collect::<Vec<_>>();

        let mut metadata = meta(name);
        metadata.labels = Some([("app".to_string(), app.to_string())].into());
        Pod {
            metadata,
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                container_statuses: (!statuses.is_empty()).then_some(statuses),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    pub fn deployment(client: &FakeClusterClient, replicas: i32, ready: i32) {
        client.insert(KubeObject::Deployment(Deployment {
            metadata: meta("isilon-controller"),
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            status: Some(DeploymentStatus {
                ready_replicas: Some(ready),
                ..Default::default()
            }),
        }));
    }

    pub fn daemon_set(client: &FakeClusterClient, desired: i32, ready: i32) {
        client.insert(KubeObject::DaemonSet(DaemonSet {
            metadata: meta("isilon-node"),
            spec: None,
            status: Some(DaemonSetStatus {
                desired_number_scheduled: desired,
                number_ready: ready,
                ..Default::default()
            }),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::client::FakeClusterClient;

    #[test]
    fn test_classify_pod() {
        let app = "isilon-node";
        assert_eq!(classify_pod(&pod("a", app, "Running", &[true, true])), PodCondition::Available);
        assert_eq!(classify_pod(&pod("a", app, "Running", &[true, false])), PodCondition::Ready);
        assert_eq!(classify_pod(&pod("a", app, "Running", &[])), PodCondition::Starting);
        assert_eq!(classify_pod(&pod("a", app, "Pending", &[false])), PodCondition::Starting);
        assert_eq!(classify_pod(&pod("a", app, "Unknown", &[])), PodCondition::Starting);
        assert_eq!(classify_pod(&pod("a", app, "Failed", &[false])), PodCondition::Stopped);
        assert_eq!(classify_pod(&pod("a", app, "Succeeded", &[])), PodCondition::Stopped);
    }

    #[tokio::test]
    async fn test_deployment_with_running_pod() {
        let client = FakeClusterClient::new();
        deployment(&client, 1, 1);
        client.insert_pod(pod("isilon-controller-abc", "isilon-controller", "Running", &[true, true]));

        let pods = get_deployment_status(&csm(), &client).await.unwrap();
        assert_eq!(pods.available, vec!["isilon-controller-abc".to_string()]);
        assert!(pods.ready.is_empty());
        assert!(pods.starting.is_empty());
        assert!(pods.stopped.is_empty());
        assert_eq!(
            pods.pod_status(),
            PodStatus {
                available: "1".into(),
                desired: "1".into(),
                failed: "0".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_daemon_set_pending_pod_is_starting() {
        let client = FakeClusterClient::new();
        daemon_set(&client, 1, 1);
        client.insert_pod(pod("isilon-node-xyz", "isilon-node", "Pending", &[false]));

        let pods = get_daemon_set_status(&csm(), &client).await.unwrap();
        assert_eq!(pods.starting, vec!["isilon-node-xyz".to_string()]);
        assert!(pods.available.is_empty());
    }

    #[tokio::test]
    async fn test_nothing_ready_skips_pod_listing() {
        let client = FakeClusterClient::new();
        daemon_set(&client, 3, 0);
        client.insert_pod(pod("isilon-node-xyz", "isilon-node", "Running", &[true]));

        let pods = get_daemon_set_status(&csm(), &client).await.unwrap();
        assert!(pods.available.is_empty());
        assert_eq!(pods.pod_status().failed, "3");
        assert_eq!(client.operation_counts().lists, 0);
    }

    #[tokio::test]
    async fn test_missing_deployment_is_an_error() {
        let client = FakeClusterClient::new();
        let err = get_deployment_status(&csm(), &client).await.unwrap_err();
        assert!(err.is_not_found());
    }
}
