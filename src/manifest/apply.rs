//! Get-or-create / get-or-update for typed objects
//!
//! Desired state is merged over the live object (JSON merge, arrays
//! replaced) so server-managed fields such as `resourceVersion`, `uid` and
//! `status` survive the update.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::object::KubeObject;
use crate::domain::ports::ClusterClient;
use crate::error::{Error, Result};

/// What `apply_object` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Object did not exist and was created
    Created,
    /// Object existed and was updated
    Updated,
    /// Update was refused (forbidden / invalid) and skipped
    Skipped,
}

/// Create `obj` if missing, otherwise merge it into the live copy and update.
///
/// Forbidden and invalid update errors are logged and swallowed: the
/// operator does not fully own every object it ships.
pub async fn apply_object(obj: &KubeObject, client: &dyn ClusterClient) -> Result<ApplyOutcome> {
    let live = match client.get_object(obj).await {
        Ok(live) => live,
        Err(e) if e.is_not_found() => {
            info!(object = %obj.display_name(), "Creating object");
            return match client.create_object(obj).await {
                Ok(()) => Ok(ApplyOutcome::Created),
                Err(e) if e.is_already_exists() => {
                    debug!(object = %obj.display_name(), "Object created concurrently");
                    Ok(ApplyOutcome::Created)
                }
                Err(e) => Err(e),
            };
        }
        Err(e) => return Err(e),
    };

    let merged = merge_objects(&live, obj)?;
    debug!(object = %obj.display_name(), "Updating object");

    match client.update_object(&merged).await {
        Ok(()) => Ok(ApplyOutcome::Updated),
        Err(e) if e.is_forbidden_or_invalid() => {
            warn!(object = %obj.display_name(), error = %e, "Update refused, skipping");
            Ok(ApplyOutcome::Skipped)
        }
        Err(e) => Err(e),
    }
}

/// Delete `obj`; a missing object counts as success.
///
/// Returns whether a delete call was actually issued and accepted.
pub async fn delete_object(obj: &KubeObject, client: &dyn ClusterClient) -> Result<bool> {
    match client.get_object(obj).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {
            debug!(object = %obj.display_name(), "Object already gone");
            return Ok(false);
        }
        Err(e) => return Err(e),
    }

    info!(object = %obj.display_name(), "Deleting object");
    match client.delete_object(obj).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Apply objects in order, stopping at the first error
pub async fn apply_objects(objects: &[KubeObject], client: &dyn ClusterClient) -> Result<()> {
    for obj in objects {
        apply_object(obj, client).await?;
    }
    Ok(())
}

/// Delete objects in reverse order, stopping at the first error
pub async fn delete_objects(objects: &[KubeObject], client: &dyn ClusterClient) -> Result<()> {
    for obj in objects.iter().rev() {
        delete_object(obj, client).await?;
    }
    Ok(())
}

/// Overlay `desired` onto `live`, keeping live-only fields
pub fn merge_objects(live: &KubeObject, desired: &KubeObject) -> Result<KubeObject> {
    let mut merged = live.to_value()?;
    merge_json(&mut merged, &desired.to_value()?);

    KubeObject::from_value(desired.kind(), merged)?.ok_or_else(|| {
        Error::Manifest(format!("cannot merge unsupported kind {}", desired.kind()))
    })
}

/// Recursive JSON merge: objects merge key by key, everything else replaces
pub fn merge_json(live: &mut Value, desired: &Value) {
    match (live, desired) {
        (Value::Object(live_map), Value::Object(desired_map)) => {
            for (key, desired_value) in desired_map {
                let nested = desired_value.is_object()
                    && live_map.get(key).map_or(false, Value::is_object);
                if !nested {
                    live_map.insert(key.clone(), desired_value.clone());
                } else if let Some(live_value) = live_map.get_mut(key) {
                    merge_json(live_value, desired_value);
                }
            }
        }
        (live, desired) => *live = desired.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FakeClusterClient;
    use crate::manifest::decode_objects;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn config_map(data: &str) -> KubeObject {
        let manifest = format!(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: params\n  namespace: isilon\ndata:\n  level: {}\n",
            data
        );
        decode_objects(&manifest).unwrap().remove(0)
    }

    #[test]
    fn test_merge_json_keeps_live_fields() {
        let mut live = json!({
            "metadata": {"name": "a", "resourceVersion": "42", "labels": {"x": "1"}},
            "spec": {"replicas": 1, "ports": [1, 2]}
        });
        let desired = json!({
            "metadata": {"name": "a", "labels": {"y": "2"}},
            "spec": {"replicas": 3, "ports": [3]}
        });
        merge_json(&mut live, &desired);
        assert_eq!(live["metadata"]["resourceVersion"], "42");
        assert_eq!(live["metadata"]["labels"], json!({"x": "1", "y": "2"}));
        assert_eq!(live["spec"]["replicas"], 3);
        assert_eq!(live["spec"]["ports"], json!([3]));
    }

    #[tokio::test]
    async fn test_apply_creates_then_updates() {
        let client = FakeClusterClient::new();

        let outcome = apply_object(&config_map("debug"), &client).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Created);
        assert_eq!(client.operation_counts().creates, 1);

        let outcome = apply_object(&config_map("info"), &client).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);
        assert_eq!(client.operation_counts().updates, 1);

        let live = client.get_object(&config_map("info")).await.unwrap();
        assert_eq!(live.to_value().unwrap()["data"]["level"], "info");
        assert!(live.metadata().resource_version.is_some());
    }

    #[tokio::test]
    async fn test_apply_swallows_forbidden_update() {
        let client = FakeClusterClient::new();
        client.insert(config_map("debug"));
        client.fail_updates_with(|kind, name| Error::Forbidden {
            kind: kind.to_string(),
            name: name.to_string(),
            reason: "not allowed".into(),
        });

        let outcome = apply_object(&config_map("info"), &client).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_apply_swallows_invalid_update() {
        let client = FakeClusterClient::new();
        client.insert(config_map("debug"));
        client.fail_updates_with(|kind, name| Error::Invalid {
            kind: kind.to_string(),
            name: name.to_string(),
            reason: "field is immutable".into(),
        });

        let outcome = apply_object(&config_map("info"), &client).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_apply_create_race_is_success() {
        let client = FakeClusterClient::new();
        client.fail_creates_with(|kind, name| Error::ResourceExists {
            kind: kind.to_string(),
            name: name.to_string(),
        });

        let outcome = apply_object(&config_map("debug"), &client).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Created);
        assert_eq!(client.operation_counts().creates, 1);
    }

    #[tokio::test]
    async fn test_apply_propagates_other_update_errors() {
        let client = FakeClusterClient::new();
        client.insert(config_map("debug"));
        client.fail_updates_with(|_, _| Error::Internal("etcd timeout".into()));

        let result = apply_object(&config_map("info"), &client).await;
        assert_matches!(result, Err(Error::Internal(_)));
    }

    #[tokio::test]
    async fn test_apply_propagates_get_errors() {
        let client = FakeClusterClient::new();
        client.fail_gets_with(|_, _| Error::Internal("connection refused".into()));

        let result = apply_object(&config_map("debug"), &client).await;
        assert_matches!(result, Err(Error::Internal(_)));
        assert_eq!(client.operation_counts().creates, 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let client = FakeClusterClient::new();
        client.insert(config_map("debug"));

        assert!(delete_object(&config_map("debug"), &client).await.unwrap());
        assert!(!delete_object(&config_map("debug"), &client).await.unwrap());
        assert_eq!(client.operation_counts().deletes, 1);
    }

    #[tokio::test]
    async fn test_delete_race_is_success() {
        let client = FakeClusterClient::new();
        client.insert(config_map("debug"));
        client.fail_deletes_with(|kind, name| Error::ResourceNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
        });

        assert!(!delete_object(&config_map("debug"), &client).await.unwrap());
        assert_eq!(client.operation_counts().deletes, 1);
    }

    #[tokio::test]
    async fn test_delete_propagates_other_errors() {
        let client = FakeClusterClient::new();
        client.insert(config_map("debug"));
        client.fail_deletes_with(|_, _| Error::Internal("connection reset".into()));

        let result = delete_objects(&[config_map("debug")], &client).await;
        assert_matches!(result, Err(Error::Internal(_)));
        assert!(client.contains("ConfigMap", "isilon", "params"));
    }
}
