//! Multi-document YAML decoding
//!
//! Splits a manifest into documents, peeks at each document's `kind`, and
//! decodes it into the matching typed object. A second mode pulls one
//! primary workload plus its RBAC bundle out of the same stream.

use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use serde_json::Value;
use tracing::debug;

use super::object::KubeObject;
use crate::error::{Error, Result};

/// Split a multi-document YAML string on `---` boundaries.
///
/// Empty, comment-only and `null` documents are dropped.
pub fn split_yaml(manifest: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();

    for line in manifest.lines() {
        if line.trim_end() == "---" || line.starts_with("--- ") {
            push_document(&mut docs, &current);
            current.clear();
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    push_document(&mut docs, &current);

    docs
}

fn push_document(docs: &mut Vec<String>, doc: &str) {
    let meaningful = doc.lines().any(|l| {
        let l = l.trim();
        !l.is_empty() && !l.starts_with('#')
    });
    if !meaningful {
        return;
    }
    let trimmed = doc.trim();
    if trimmed == "null" || trimmed == "~" {
        return;
    }
    docs.push(doc.to_string());
}

/// Decode one document into a typed object, `None` for unknown kinds
pub fn decode_document(doc: &str) -> Result<Option<KubeObject>> {
    let value: Value = serde_yaml::from_str(doc)?;
    if value.is_null() {
        return Ok(None);
    }

    let kind = match value.get("kind").and_then(Value::as_str) {
        Some(kind) => kind.to_string(),
        None => return Ok(None),
    };

    match KubeObject::from_value(&kind, value) {
        Ok(Some(obj)) => Ok(Some(obj)),
        Ok(None) => {
            debug!(kind = %kind, "Skipping unsupported kind");
            Ok(None)
        }
        Err(e) => Err(Error::Manifest(format!("failed to decode {}: {}", kind, e))),
    }
}

/// Decode every supported object in a multi-document manifest.
///
/// Unknown kinds are skipped; the first decode error aborts the whole call.
pub fn decode_objects(manifest: &str) -> Result<Vec<KubeObject>> {
    let mut objects = Vec::new();
    for doc in split_yaml(manifest) {
        if let Some(obj) = decode_document(&doc)? {
            objects.push(obj);
        }
    }
    Ok(objects)
}

/// Serialize objects back into a multi-document manifest
pub fn encode_objects(objects: &[KubeObject]) -> Result<String> {
    let mut docs = Vec::with_capacity(objects.len());
    for obj in objects {
        docs.push(serde_yaml::to_string(&obj.to_value()?)?);
    }
    Ok(docs.join("---\n"))
}

// =============================================================================
// Workload + RBAC decoding
// =============================================================================

/// RBAC objects that accompany a driver workload
#[derive(Debug, Clone, Default)]
pub struct RbacBundle {
    pub service_accounts: Vec<ServiceAccount>,
    pub cluster_roles: Vec<ClusterRole>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
    pub roles: Vec<Role>,
    pub role_bindings: Vec<RoleBinding>,
}

impl RbacBundle {
    /// Absorb an RBAC object, handing anything else back
    fn absorb(&mut self, obj: KubeObject) -> Option<KubeObject> {
        match obj {
            KubeObject::ServiceAccount(o) => self.service_accounts.push(o),
            KubeObject::ClusterRole(o) => self.cluster_roles.push(o),
            KubeObject::ClusterRoleBinding(o) => self.cluster_role_bindings.push(o),
            KubeObject::Role(o) => self.roles.push(o),
            KubeObject::RoleBinding(o) => self.role_bindings.push(o),
            other => return Some(other),
        }
        None
    }

    /// All RBAC objects in apply order
    pub fn objects(&self) -> Vec<KubeObject> {
        let mut out = Vec::new();
        out.extend(self.service_accounts.iter().cloned().map(KubeObject::ServiceAccount));
        out.extend(self.cluster_roles.iter().cloned().map(KubeObject::ClusterRole));
        out.extend(
            self.cluster_role_bindings
                .iter()
                .cloned()
                .map(KubeObject::ClusterRoleBinding),
        );
        out.extend(self.roles.iter().cloned().map(KubeObject::Role));
        out.extend(self.role_bindings.iter().cloned().map(KubeObject::RoleBinding));
        out
    }

    pub fn is_empty(&self) -> bool {
        self.service_accounts.is_empty()
            && self.cluster_roles.is_empty()
            && self.cluster_role_bindings.is_empty()
            && self.roles.is_empty()
            && self.role_bindings.is_empty()
    }
}

/// A workload kind that can be the primary object of a driver manifest
pub trait Workload: Sized + Clone {
    const KIND: &'static str;

    fn from_object(obj: KubeObject) -> std::result::Result<Self, KubeObject>;

    fn into_object(self) -> KubeObject;
}

impl Workload for Deployment {
    const KIND: &'static str = "Deployment";

    fn from_object(obj: KubeObject) -> std::result::Result<Self, KubeObject> {
        match obj {
            KubeObject::Deployment(d) => Ok(d),
            other => Err(other),
        }
    }

    fn into_object(self) -> KubeObject {
        KubeObject::Deployment(self)
    }
}

impl Workload for DaemonSet {
    const KIND: &'static str = "DaemonSet";

    fn from_object(obj: KubeObject) -> std::result::Result<Self, KubeObject> {
        match obj {
            KubeObject::DaemonSet(d) => Ok(d),
            other => Err(other),
        }
    }

    fn into_object(self) -> KubeObject {
        KubeObject::DaemonSet(self)
    }
}

/// A primary workload plus the RBAC it needs
#[derive(Debug, Clone)]
pub struct WorkloadYaml<W> {
    pub workload: W,
    pub rbac: RbacBundle,
}

/// Controller manifest: a Deployment plus RBAC
pub type ControllerYaml = WorkloadYaml<Deployment>;

/// Node manifest: a DaemonSet plus RBAC
pub type NodeYaml = WorkloadYaml<DaemonSet>;

impl<W: Workload> WorkloadYaml<W> {
    /// RBAC first, workload last
    pub fn objects(&self) -> Vec<KubeObject> {
        let mut out = self.rbac.objects();
        out.push(self.workload.clone().into_object());
        out
    }
}

/// Decode the primary `W` and its RBAC bundle from a manifest.
///
/// The last `W` document wins; other kinds are ignored.
pub fn decode_workload<W: Workload>(manifest: &str) -> Result<WorkloadYaml<W>> {
    let mut workload = None;
    let mut rbac = RbacBundle::default();

    for obj in decode_objects(manifest)? {
        if let Some(rest) = rbac.absorb(obj) {
            if let Ok(w) = W::from_object(rest) {
                workload = Some(w);
            }
        }
    }

    let workload = workload
        .ok_or_else(|| Error::Manifest(format!("no {} found in manifest", W::KIND)))?;

    Ok(WorkloadYaml { workload, rbac })
}
