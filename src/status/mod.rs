//! Status state machine
//!
//! Every reconcile recomputes the CR state from the live controller and
//! node workloads, persists it when it changed, and decides when to look
//! again.

pub mod pods;

pub use pods::{classify_pod, get_daemon_set_status, get_deployment_status, PodCondition, WorkloadPods};

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::crd::{ContainerStorageModule, ContainerStorageModuleStatus, CsmState, PodStatus};
use crate::domain::ports::ClusterClient;
use crate::error::{Error, Result};

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_RETRY_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const MAX_RETRY_DURATION: Duration = Duration::from_secs(30 * 60);

/// When to reconcile a CR again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    After(Duration),
    /// Wait for the next watch event
    Await,
}

/// Workload health folded into one verdict
#[derive(Debug, Default)]
pub struct CalculatedState {
    pub running: bool,
    pub controller_status: PodStatus,
    pub node_status: PodStatus,
    pub error: Option<Error>,
}

/// Poll both workloads and decide whether the driver is running.
///
/// Lookup errors do not abort; they are combined into `error`.
pub async fn calculate_state(cr: &ContainerStorageModule, client: &dyn ClusterClient) -> CalculatedState {
    let mut errors = Vec::new();

    let controller = get_deployment_status(cr, client)
        .await
        .map_err(|e| errors.push(e.to_string()))
        .unwrap_or_default();
    let node = get_daemon_set_status(cr, client)
        .await
        .map_err(|e| errors.push(e.to_string()))
        .unwrap_or_default();

    let running = controller.desired > 0
        && node.desired > 0
        && controller.available_count() == controller.desired
        && node.available_count() == node.desired;

    debug!(
        csm = %cr.name(),
        running,
        controller_available = controller.available_count(),
        node_available = node.available_count(),
        "Calculated state"
    );

    CalculatedState {
        running,
        controller_status: controller.pod_status(),
        node_status: node.pod_status(),
        error: (!errors.is_empty()).then(|| Error::Status(errors.join(". "))),
    }
}

/// Persist `new` unless it equals `old`. Returns whether a write happened.
pub async fn update_status(
    cr: &ContainerStorageModule,
    client: &dyn ClusterClient,
    old: &ContainerStorageModuleStatus,
    new: &ContainerStorageModuleStatus,
) -> Result<bool> {
    if old == new {
        return Ok(false);
    }
    client
        .update_csm_status(&cr.namespace_or_default(), cr.name(), new)
        .await?;
    info!(csm = %cr.name(), state = %new.state, "Updated status");
    Ok(true)
}

/// How long to wait before looking at a CR again
pub fn requeue_policy(
    old_state: CsmState,
    new_state: CsmState,
    last_change: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Requeue {
    match new_state {
        CsmState::Running if old_state == CsmState::Running => Requeue::Await,
        CsmState::Running => Requeue::After(DEFAULT_RETRY_INTERVAL),
        CsmState::Succeeded if old_state == CsmState::Succeeded => {
            let elapsed = last_change
                .and_then(|t| (now - t).to_std().ok())
                .unwrap_or_default();
            if elapsed >= MAX_RETRY_DURATION {
                Requeue::Await
            } else {
                Requeue::After((elapsed * 2).clamp(DEFAULT_RETRY_INTERVAL, MAX_RETRY_INTERVAL))
            }
        }
        _ => Requeue::After(DEFAULT_RETRY_INTERVAL),
    }
}

fn with_state(
    old: &ContainerStorageModuleStatus,
    state: CsmState,
    message: &str,
    now: DateTime<Utc>,
) -> ContainerStorageModuleStatus {
    let mut new = old.clone();
    new.state = state;
    new.set_last_update(state, message, now);
    new
}

/// State reported after a successful apply pass
pub fn success_state(calculated: &CalculatedState) -> CsmState {
    match (calculated.running, &calculated.error) {
        (true, _) => CsmState::Running,
        (false, Some(_)) => CsmState::Updating,
        (false, None) => CsmState::Succeeded,
    }
}

/// Record the outcome of a successful apply pass
pub async fn handle_success(
    cr: &ContainerStorageModule,
    client: &dyn ClusterClient,
    calculated: &CalculatedState,
    now: DateTime<Utc>,
) -> Result<Requeue> {
    let state = success_state(calculated);
    let message = match (state, &calculated.error) {
        (CsmState::Updating, Some(e)) => e.to_string(),
        _ => String::new(),
    };

    let old = cr.status_or_default();
    let mut new = with_state(&old, state, &message, now);
    new.controller_status = calculated.controller_status.clone();
    new.node_status = calculated.node_status.clone();

    update_status(cr, client, &old, &new).await?;
    Ok(requeue_policy(old.state, new.state, new.last_update.time, now))
}

/// Record a failed precheck; the CR is only retried once it changes
pub async fn handle_validation_error(
    cr: &ContainerStorageModule,
    client: &dyn ClusterClient,
    err: &Error,
    now: DateTime<Utc>,
) -> Result<Requeue> {
    warn!(csm = %cr.name(), error = %err, "Invalid configuration");
    let old = cr.status_or_default();
    let new = with_state(&old, CsmState::InvalidConfig, &err.to_string(), now);
    update_status(cr, client, &old, &new).await?;
    Ok(Requeue::Await)
}

/// Record a failed apply pass; the caller requeues with backoff
pub async fn handle_error(
    cr: &ContainerStorageModule,
    client: &dyn ClusterClient,
    err: &Error,
    now: DateTime<Utc>,
) -> Result<()> {
    let old = cr.status_or_default();
    let new = with_state(&old, CsmState::Failed, &err.to_string(), now);
    update_status(cr, client, &old, &new).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::pods::fixtures::*;
    use super::*;
    use crate::client::FakeClusterClient;
    use chrono::TimeZone;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + chrono::Duration::minutes(minutes)
    }

    #[tokio::test]
    async fn test_calculate_state_running() {
        let client = FakeClusterClient::new();
        deployment(&client, 1, 1);
        daemon_set(&client, 1, 1);
        client.insert_pod(pod("isilon-controller-abc", "isilon-controller", "Running", &[true]));
        client.insert_pod(pod("isilon-node-xyz", "isilon-node", "Running", &[true]));

        let state = calculate_state(&csm(), &client).await;
        assert!(state.running);
        assert!(state.error.is_none());
        assert_eq!(state.node_status.available, "1");
    }

    #[tokio::test]
    async fn test_calculate_state_not_running_when_degraded() {
        let client = FakeClusterClient::new();
        deployment(&client, 1, 1);
        daemon_set(&client, 2, 2);
        client.insert_pod(pod("isilon-controller-abc", "isilon-controller", "Running", &[true]));
        client.insert_pod(pod("isilon-node-a", "isilon-node", "Running", &[true]));
        client.insert_pod(pod("isilon-node-b", "isilon-node", "Running", &[true, false]));

        let state = calculate_state(&csm(), &client).await;
        assert!(!state.running);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_calculate_state_combines_errors() {
        let client = FakeClusterClient::new();
        let state = calculate_state(&csm(), &client).await;
        assert!(!state.running);

        let message = state.error.unwrap().to_string();
        assert!(message.contains("isilon-controller"), "{message}");
        assert!(message.contains("isilon-node"), "{message}");
    }

    #[tokio::test]
    async fn test_update_status_writes_only_on_change() {
        let client = FakeClusterClient::new();
        let cr = csm();
        let old = ContainerStorageModuleStatus::default();

        assert!(!update_status(&cr, &client, &old, &old.clone()).await.unwrap());
        assert_eq!(client.operation_counts().status_updates, 0);

        let new = with_state(&old, CsmState::Running, "", t(0));
        assert!(update_status(&cr, &client, &old, &new).await.unwrap());
        assert_eq!(client.operation_counts().status_updates, 1);
        assert_eq!(client.csm_status("isilon", "isilon"), Some(new));
    }

    #[tokio::test]
    async fn test_handle_success_states() {
        let client = FakeClusterClient::new();
        let cr = csm();

        let running = CalculatedState {
            running: true,
            ..Default::default()
        };
        assert_eq!(
            handle_success(&cr, &client, &running, t(0)).await.unwrap(),
            Requeue::After(DEFAULT_RETRY_INTERVAL)
        );
        assert_eq!(client.csm_status("isilon", "isilon").unwrap().state, CsmState::Running);

        let failing = CalculatedState {
            error: Some(Error::Status("daemonset not found".into())),
            ..Default::default()
        };
        handle_success(&cr, &client, &failing, t(0)).await.unwrap();
        let status = client.csm_status("isilon", "isilon").unwrap();
        assert_eq!(status.state, CsmState::Updating);
        assert_eq!(status.last_update.error_message, "daemonset not found");

        handle_success(&cr, &client, &CalculatedState::default(), t(0)).await.unwrap();
        assert_eq!(client.csm_status("isilon", "isilon").unwrap().state, CsmState::Succeeded);
    }

    #[tokio::test]
    async fn test_stable_running_does_not_requeue_or_write() {
        let client = FakeClusterClient::new();
        let mut cr = csm();
        let running = CalculatedState {
            running: true,
            ..Default::default()
        };
        let mut status = with_state(&ContainerStorageModuleStatus::default(), CsmState::Running, "", t(0));
        status.controller_status = running.controller_status.clone();
        status.node_status = running.node_status.clone();
        cr.status = Some(status);

        assert_eq!(
            handle_success(&cr, &client, &running, t(5)).await.unwrap(),
            Requeue::Await
        );
        assert_eq!(client.operation_counts().status_updates, 0);
    }

    #[test]
    fn test_requeue_policy() {
        use CsmState::*;

        assert_eq!(requeue_policy(Running, Running, Some(t(0)), t(1)), Requeue::Await);
        assert_eq!(
            requeue_policy(Updating, Running, Some(t(0)), t(0)),
            Requeue::After(DEFAULT_RETRY_INTERVAL)
        );
        assert_eq!(
            requeue_policy(Failed, Failed, Some(t(0)), t(20)),
            Requeue::After(DEFAULT_RETRY_INTERVAL)
        );

        // repeated success backs off from the default up to the cap
        assert_eq!(
            requeue_policy(Succeeded, Succeeded, Some(t(0)), t(0)),
            Requeue::After(DEFAULT_RETRY_INTERVAL)
        );
        assert_eq!(
            requeue_policy(Succeeded, Succeeded, Some(t(0)), t(2)),
            Requeue::After(Duration::from_secs(4 * 60))
        );
        assert_eq!(
            requeue_policy(Succeeded, Succeeded, Some(t(0)), t(20)),
            Requeue::After(MAX_RETRY_INTERVAL)
        );
        assert_eq!(requeue_policy(Succeeded, Succeeded, Some(t(0)), t(30)), Requeue::Await);
    }

    #[tokio::test]
    async fn test_handle_validation_error() {
        let client = FakeClusterClient::new();
        let cr = csm();
        let err = Error::UnsupportedVersion {
            driver: "powerscale".into(),
            version: "v0".into(),
        };

        let requeue = handle_validation_error(&cr, &client, &err, t(0)).await.unwrap();
        assert_eq!(requeue, Requeue::Await);

        let status = client.csm_status("isilon", "isilon").unwrap();
        assert_eq!(status.state, CsmState::InvalidConfig);
        assert_eq!(status.last_update.error_message, "powerscale v0 not supported");
        assert_eq!(status.last_update.time, Some(t(0)));
    }

    #[tokio::test]
    async fn test_handle_error_marks_failed() {
        let client = FakeClusterClient::new();
        let cr = csm();
        handle_error(&cr, &client, &Error::Status("apply failed".into()), t(0))
            .await
            .unwrap();
        assert_eq!(client.csm_status("isilon", "isilon").unwrap().state, CsmState::Failed);
    }
}
