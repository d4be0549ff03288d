//! ContainerStorageModule controller
//!
//! Each reconcile runs the same pipeline: normalize the CR, run the driver
//! and module prechecks, render and decode the driver templates, apply the
//! objects, then fold workload health into the CR status. Deletion is
//! handled through a finalizer that removes everything the driver created.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::finalizer::{self, finalizer, Event as Finalizer};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::OperatorConfig;
use crate::crd::{ContainerStorageModule, CsmState};
use crate::domain::ports::{ClusterClient, ClusterClientRef};
use crate::drivers::{self, FileType, ImageSources};
use crate::error::{Error, ErrorAction, Result};
use crate::manifest::{
    apply_objects, decode_objects, decode_workload, delete_objects, ControllerYaml, KubeObject,
    NodeYaml,
};
use crate::metrics::Metrics;
use crate::status::{self, Requeue, DEFAULT_RETRY_INTERVAL, MAX_RETRY_INTERVAL};
use crate::versions::{self, VersionSpec};

/// Finalizer placed on every ContainerStorageModule
pub const FINALIZER: &str = "finalizer.dell.emc.com";

impl From<Requeue> for Action {
    fn from(requeue: Requeue) -> Self {
        match requeue {
            Requeue::After(d) => Action::requeue(d),
            Requeue::Await => Action::await_change(),
        }
    }
}

// =============================================================================
// Context
// =============================================================================

/// Everything a reconcile pass needs
pub struct Context {
    pub client: ClusterClientRef,
    pub config: OperatorConfig,
    pub metrics: Metrics,
    failures: Mutex<BTreeMap<(String, String), u32>>,
}

impl Context {
    pub fn new(client: ClusterClientRef, config: OperatorConfig, metrics: Metrics) -> Self {
        Self {
            client,
            config,
            metrics,
            failures: Mutex::new(BTreeMap::new()),
        }
    }

    fn key(cr: &ContainerStorageModule) -> (String, String) {
        (cr.namespace_or_default(), cr.name().to_string())
    }

    /// Next backoff for a CR: doubles per consecutive failure, capped
    pub fn next_backoff(&self, cr: &ContainerStorageModule) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(Self::key(cr)).or_insert(0);
        let backoff = DEFAULT_RETRY_INTERVAL
            .checked_mul(2u32.saturating_pow(*count))
            .unwrap_or(MAX_RETRY_INTERVAL)
            .min(MAX_RETRY_INTERVAL);
        *count = count.saturating_add(1);
        backoff
    }

    fn reset_backoff(&self, cr: &ContainerStorageModule) {
        self.failures.lock().remove(&Self::key(cr));
    }
}

// =============================================================================
// Manifests
// =============================================================================

/// Every object rendered for one CR
#[derive(Debug, Clone)]
pub struct DriverManifests {
    pub config_params: Vec<KubeObject>,
    pub csi_driver: Vec<KubeObject>,
    pub controller: ControllerYaml,
    pub node: NodeYaml,
}

impl DriverManifests {
    /// Objects in apply order
    pub fn objects(&self) -> Vec<KubeObject> {
        let mut out = self.config_params.clone();
        out.extend(self.csi_driver.iter().cloned());
        out.extend(self.controller.objects());
        out.extend(self.node.objects());
        out
    }
}

fn required(rendered: Option<String>, file_type: FileType) -> Result<String> {
    rendered.ok_or_else(|| Error::Manifest(format!("{} is missing", file_type.file_name())))
}

fn optional_objects(rendered: Option<String>, namespace: &str) -> Result<Vec<KubeObject>> {
    let mut objects = match rendered {
        Some(yaml) => decode_objects(&yaml)?,
        None => Vec::new(),
    };
    for obj in &mut objects {
        obj.default_namespace(namespace);
    }
    Ok(objects)
}

/// Render, decode and patch the driver templates for a CR
pub fn build_manifests(
    cr: &ContainerStorageModule,
    config: &OperatorConfig,
    version_spec: Option<&VersionSpec>,
) -> Result<DriverManifests> {
    let namespace = cr.namespace_or_default();

    let controller_yaml = required(drivers::render_file(cr, config, FileType::Controller)?, FileType::Controller)?;
    let node_yaml = required(drivers::render_file(cr, config, FileType::Node)?, FileType::Node)?;

    let mut controller: ControllerYaml = decode_workload(&controller_yaml)?;
    let mut node: NodeYaml = decode_workload(&node_yaml)?;

    let images = ImageSources {
        config,
        version_spec,
    };
    drivers::patch_controller(&mut controller, cr, &images);
    drivers::patch_node(&mut node, cr, &images);

    let mut manifests = DriverManifests {
        config_params: optional_objects(drivers::render_file(cr, config, FileType::ConfigParams)?, &namespace)?,
        csi_driver: optional_objects(drivers::render_file(cr, config, FileType::CsiDriverSpec)?, &namespace)?,
        controller,
        node,
    };

    manifests.controller.workload.metadata.namespace.get_or_insert_with(|| namespace.clone());
    manifests.node.workload.metadata.namespace.get_or_insert_with(|| namespace.clone());
    Ok(manifests)
}

// =============================================================================
// Reconcile pipeline
// =============================================================================

/// Install or update the driver for a CR and report its state
pub async fn reconcile_csm(
    cr: &ContainerStorageModule,
    ctx: &Context,
    now: DateTime<Utc>,
) -> Result<Action> {
    let client: &dyn ClusterClient = ctx.client.as_ref();
    ctx.metrics.reconcile(cr);
    info!(csm = %cr.name(), namespace = %cr.namespace_or_default(), driver = %cr.driver_type(), "Reconciling");

    let mut normalized = cr.clone();
    let checked = async {
        drivers::normalize(&mut normalized, &ctx.config)?;
        drivers::precheck(&normalized, &ctx.config, client).await?;
        crate::modules::precheck_all(&normalized, &ctx.config, client).await?;
        versions::resolve_version_spec(&normalized, client).await
    }
    .await;

    let version_spec = match checked {
        Ok(spec) => spec,
        Err(e) if e.is_invalid_config() => {
            ctx.metrics.reconcile_failure(cr, &e);
            ctx.metrics.set_state(cr, CsmState::InvalidConfig);
            return Ok(status::handle_validation_error(cr, client, &e, now).await?.into());
        }
        // API trouble during the checks; leave status alone and back off
        Err(e) => {
            warn!(csm = %cr.name(), error = %e, "Precheck could not complete");
            return Err(e);
        }
    };

    let applied = async {
        let manifests = build_manifests(&normalized, &ctx.config, version_spec.as_ref())?;
        apply_objects(&manifests.objects(), client).await
    }
    .await;

    if let Err(e) = applied {
        error!(csm = %cr.name(), error = %e, "Failed to apply driver objects");
        if let Err(status_err) = status::handle_error(cr, client, &e, now).await {
            warn!(csm = %cr.name(), error = %status_err, "Failed to record error status");
        }
        ctx.metrics.set_state(cr, CsmState::Failed);
        return Err(e);
    }

    let calculated = status::calculate_state(cr, client).await;
    let requeue = status::handle_success(cr, client, &calculated, now).await?;
    ctx.metrics.set_state(cr, status::success_state(&calculated));
    ctx.reset_backoff(cr);

    debug!(csm = %cr.name(), ?requeue, "Reconcile complete");
    Ok(requeue.into())
}

/// Remove every object the driver installed
pub async fn cleanup(cr: &ContainerStorageModule, ctx: &Context) -> Result<Action> {
    let client: &dyn ClusterClient = ctx.client.as_ref();
    info!(csm = %cr.name(), namespace = %cr.namespace_or_default(), "Removing driver");

    let mut normalized = cr.clone();
    drivers::normalize(&mut normalized, &ctx.config)?;

    match build_manifests(&normalized, &ctx.config, None) {
        Ok(manifests) => delete_objects(&manifests.objects(), client).await?,
        Err(e) => warn!(csm = %cr.name(), error = %e, "Cannot render driver objects, nothing to remove"),
    }

    ctx.metrics.forget(cr);
    ctx.reset_backoff(cr);
    Ok(Action::await_change())
}

// =============================================================================
// Controller wiring
// =============================================================================

struct Operator {
    kube: Client,
    ctx: Context,
}

async fn reconcile(cr: Arc<ContainerStorageModule>, operator: Arc<Operator>) -> Result<Action> {
    let started = Instant::now();
    let api: Api<ContainerStorageModule> =
        Api::namespaced(operator.kube.clone(), &cr.namespace_or_default());

    let result = finalizer(&api, FINALIZER, cr, |event| async {
        match event {
            Finalizer::Apply(cr) => reconcile_csm(&cr, &operator.ctx, Utc::now()).await,
            Finalizer::Cleanup(cr) => cleanup(&cr, &operator.ctx).await,
        }
    })
    .await
    .map_err(|e| match e {
        finalizer::Error::ApplyFailed(e) | finalizer::Error::CleanupFailed(e) => e,
        other => Error::Finalizer(other.to_string()),
    });

    operator.ctx.metrics.observe_duration(started.elapsed().as_secs_f64());
    result
}

fn error_policy(cr: Arc<ContainerStorageModule>, err: &Error, operator: Arc<Operator>) -> Action {
    warn!(csm = %cr.name(), error = %err, "Reconcile failed");
    operator.ctx.metrics.reconcile_failure(&cr, err);

    match err.action() {
        ErrorAction::RequeueWithBackoff => Action::requeue(operator.ctx.next_backoff(&cr)),
        ErrorAction::RequeueAfter(d) => Action::requeue(d),
        ErrorAction::NoRequeue => Action::await_change(),
    }
}

/// Run the controller until a shutdown signal arrives
pub async fn run(kube: Client, ctx: Context, namespace: Option<String>) {
    let (csms, deployments, daemon_sets) = match namespace.as_deref() {
        Some(ns) => (
            Api::<ContainerStorageModule>::namespaced(kube.clone(), ns),
            Api::<Deployment>::namespaced(kube.clone(), ns),
            Api::<DaemonSet>::namespaced(kube.clone(), ns),
        ),
        None => (
            Api::<ContainerStorageModule>::all(kube.clone()),
            Api::<Deployment>::all(kube.clone()),
            Api::<DaemonSet>::all(kube.clone()),
        ),
    };

    info!(namespace = namespace.as_deref().unwrap_or("<all>"), "Starting ContainerStorageModule controller");

    let operator = Arc::new(Operator { kube, ctx });
    Controller::new(csms, WatcherConfig::default().any_semantic())
        .owns(deployments, WatcherConfig::default())
        .owns(daemon_sets, WatcherConfig::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, operator)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => debug!(object = %obj.name, ?action, "Reconciled"),
                Err(e) => debug!(error = %e, "Controller event failed"),
            }
        })
        .await;

    info!("Controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FakeClusterClient;
    use crate::crd::{ContainerStorageModuleSpec, Driver, DriverType};
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    const CONTROLLER: &str = r#"
apiVersion: v1
kind: ServiceAccount
metadata:
  name: <DriverDefaultReleaseName>-controller
  namespace: <DriverDefaultReleaseNamespace>
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: <DriverDefaultReleaseName>-controller
  namespace: <DriverDefaultReleaseNamespace>
spec:
  replicas: 2
  selector:
    matchLabels:
      app: <DriverDefaultReleaseName>-controller
  template:
    metadata:
      labels:
        app: <DriverDefaultReleaseName>-controller
    spec:
      serviceAccountName: <DriverDefaultReleaseName>-controller
      containers:
        - name: driver
          image: quay.io/dell/container-storage-modules/csi-isilon:nightly
          env:
            - name: X_CSI_DEBUG
              value: "<X_CSI_DEBUG>"
"#;

    const NODE: &str = r#"
apiVersion: apps/v1
kind: DaemonSet
metadata:
  name: <DriverDefaultReleaseName>-node
  namespace: <DriverDefaultReleaseNamespace>
spec:
  selector:
    matchLabels:
      app: <DriverDefaultReleaseName>-node
  template:
    metadata:
      labels:
        app: <DriverDefaultReleaseName>-node
    spec:
      containers:
        - name: driver
          image: quay.io/dell/container-storage-modules/csi-isilon:nightly
"#;

    const CSI_DRIVER: &str = r#"
apiVersion: storage.k8s.io/v1
kind: CSIDriver
metadata:
  name: csi-isilon.dellemc.com
spec:
  attachRequired: true
  storageCapacity: <STORAGE_CAPACITY>
  fsGroupPolicy: <FSGROUP_POLICY>
"#;

    fn config_tree(version: &str) -> (TempDir, OperatorConfig) {
        let dir = TempDir::new().unwrap();
        let config = OperatorConfig::new(dir.path());
        let driver_dir = config.driver_config_dir(DriverType::PowerScale, version);
        std::fs::create_dir_all(&driver_dir).unwrap();
        std::fs::write(driver_dir.join("upgrade-path.yaml"), "minUpgradePath: v2.11.0\n").unwrap();
        std::fs::write(driver_dir.join("controller.yaml"), CONTROLLER).unwrap();
        std::fs::write(driver_dir.join("node.yaml"), NODE).unwrap();
        std::fs::write(driver_dir.join("csidriver.yaml"), CSI_DRIVER).unwrap();
        (dir, config)
    }

    fn csm(version: &str) -> ContainerStorageModule {
        let mut cr = ContainerStorageModule::new(
            "isilon",
            ContainerStorageModuleSpec {
                driver: Driver {
                    csi_driver_type: DriverType::PowerScale,
                    config_version: version.into(),
                    replicas: 1,
                    ..Default::default()
                },
                modules: vec![],
            },
        );
        cr.metadata.namespace = Some("isilon".into());
        cr
    }

    fn context(client: &FakeClusterClient, config: OperatorConfig) -> Context {
        Context::new(Arc::new(client.clone()), config, Metrics::new().unwrap())
    }

    #[tokio::test]
    async fn test_reconcile_installs_driver() {
        let (_dir, config) = config_tree("v2.12.0");
        let client = FakeClusterClient::new();
        client.insert_secret("isilon", "isilon-creds");
        let ctx = context(&client, config);

        let action = reconcile_csm(&csm("v2.12.0"), &ctx, Utc::now()).await.unwrap();
        assert_eq!(action, Action::requeue(DEFAULT_RETRY_INTERVAL));

        assert!(client.contains("ServiceAccount", "isilon", "isilon-controller"));
        assert!(client.contains("Deployment", "isilon", "isilon-controller"));
        assert!(client.contains("DaemonSet", "isilon", "isilon-node"));
        assert!(client.contains("CSIDriver", "", "csi-isilon.dellemc.com"));

        let deployment = client.get_deployment("isilon", "isilon-controller").await.unwrap();
        let annotations = deployment.metadata.annotations.clone().unwrap();
        assert_eq!(annotations[drivers::common::CONFIG_VERSION_ANNOTATION], "v2.12.0");
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));
        let image = spec.template.spec.unwrap().containers[0].image.clone();
        assert_eq!(
            image.as_deref(),
            Some("quay.io/dell/container-storage-modules/csi-isilon:v2.12.0")
        );

        // nothing is ready yet, so the driver is installed but not running
        let status = client.csm_status("isilon", "isilon").unwrap();
        assert_eq!(status.state, CsmState::Succeeded);
        assert_eq!(status.controller_status.desired, "1");
    }

    #[tokio::test]
    async fn test_reconcile_invalid_config_does_not_requeue() {
        let (_dir, config) = config_tree("v2.12.0");
        let client = FakeClusterClient::new();
        let ctx = context(&client, config);

        let action = reconcile_csm(&csm("v0"), &ctx, Utc::now()).await.unwrap();
        assert_eq!(action, Action::await_change());

        let status = client.csm_status("isilon", "isilon").unwrap();
        assert_eq!(status.state, CsmState::InvalidConfig);
        assert_eq!(status.last_update.error_message, "powerscale v0 not supported");
        assert_eq!(client.operation_counts().creates, 0);
    }

    #[tokio::test]
    async fn test_reconcile_blocks_unsupported_upgrade() {
        let (_dir, config) = config_tree("v2.12.0");
        let next = config.driver_config_dir(DriverType::PowerScale, "v2.14.0");
        std::fs::create_dir_all(&next).unwrap();
        std::fs::write(next.join("upgrade-path.yaml"), "minUpgradePath: v2.13.0\n").unwrap();

        let client = FakeClusterClient::new();
        client.insert_secret("isilon", "isilon-creds");
        let ctx = context(&client, config);
        reconcile_csm(&csm("v2.12.0"), &ctx, Utc::now()).await.unwrap();
        client.reset_counts();

        let action = reconcile_csm(&csm("v2.14.0"), &ctx, Utc::now()).await.unwrap();
        assert_eq!(action, Action::await_change());
        let status = client.csm_status("isilon", "isilon").unwrap();
        assert_eq!(status.state, CsmState::InvalidConfig);
        assert!(status.last_update.error_message.contains("minimum upgrade path is v2.13.0"));
        assert_eq!(client.operation_counts().updates, 0);
    }

    #[tokio::test]
    async fn test_reconcile_transient_precheck_error_requeues() {
        let (_dir, config) = config_tree("v2.12.0");
        let client = FakeClusterClient::new();
        client.insert_secret("isilon", "isilon-creds");
        client.fail_gets_with(|_, _| Error::Internal("apiserver 503".into()));
        let ctx = context(&client, config);
        let cr = csm("v2.12.0");

        let err = reconcile_csm(&cr, &ctx, Utc::now()).await.unwrap_err();
        assert_matches!(err, Error::Internal(ref msg) if msg == "apiserver 503");
        assert_eq!(err.action(), ErrorAction::RequeueWithBackoff);
        assert!(client.csm_status("isilon", "isilon").is_none());
        assert_eq!(client.operation_counts().creates, 0);
    }

    #[tokio::test]
    async fn test_reconcile_missing_secret_is_invalid_config() {
        let (_dir, config) = config_tree("v2.12.0");
        let client = FakeClusterClient::new();
        let ctx = context(&client, config);

        let action = reconcile_csm(&csm("v2.12.0"), &ctx, Utc::now()).await.unwrap();
        assert_eq!(action, Action::await_change());

        let status = client.csm_status("isilon", "isilon").unwrap();
        assert_eq!(status.state, CsmState::InvalidConfig);
        assert_eq!(status.last_update.error_message, "failed to find secret isilon-creds");
    }

    #[tokio::test]
    async fn test_reconcile_apply_failure_marks_failed() {
        let (_dir, config) = config_tree("v2.12.0");
        let client = FakeClusterClient::new();
        client.insert_secret("isilon", "isilon-creds");
        client.fail_creates_with(|kind, name| Error::Internal(format!("create {}/{} refused", kind, name)));
        let ctx = context(&client, config);

        let err = reconcile_csm(&csm("v2.12.0"), &ctx, Utc::now()).await.unwrap_err();
        assert!(err.to_string().contains("refused"));
        assert_eq!(client.csm_status("isilon", "isilon").unwrap().state, CsmState::Failed);
    }

    #[tokio::test]
    async fn test_cleanup_removes_driver_objects() {
        let (_dir, config) = config_tree("v2.12.0");
        let client = FakeClusterClient::new();
        client.insert_secret("isilon", "isilon-creds");
        let ctx = context(&client, config);
        let cr = csm("v2.12.0");

        reconcile_csm(&cr, &ctx, Utc::now()).await.unwrap();
        assert_eq!(cleanup(&cr, &ctx).await.unwrap(), Action::await_change());

        assert!(!client.contains("Deployment", "isilon", "isilon-controller"));
        assert!(!client.contains("DaemonSet", "isilon", "isilon-node"));
        assert!(!client.contains("CSIDriver", "", "csi-isilon.dellemc.com"));
        assert!(client.contains("Secret", "isilon", "isilon-creds"));

        // a second cleanup is a no-op
        assert!(cleanup(&cr, &ctx).await.is_ok());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let client = FakeClusterClient::new();
        let ctx = context(&client, OperatorConfig::default());
        let cr = csm("v2.12.0");

        assert_eq!(ctx.next_backoff(&cr), DEFAULT_RETRY_INTERVAL);
        assert_eq!(ctx.next_backoff(&cr), DEFAULT_RETRY_INTERVAL * 2);
        assert_eq!(ctx.next_backoff(&cr), DEFAULT_RETRY_INTERVAL * 4);
        for _ in 0..40 {
            ctx.next_backoff(&cr);
        }
        assert_eq!(ctx.next_backoff(&cr), MAX_RETRY_INTERVAL);

        ctx.reset_backoff(&cr);
        assert_eq!(ctx.next_backoff(&cr), DEFAULT_RETRY_INTERVAL);
    }
}
