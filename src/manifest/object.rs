//! Typed Kubernetes objects
//!
//! `KubeObject` is a closed sum over every kind the operator knows how to
//! apply. Built-in kinds carry their `k8s-openapi` struct; CRD kinds that
//! have no typed binding (cert-manager, velero) are carried as
//! `DynamicObject` together with their group/version/kind.

use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, PersistentVolume, PersistentVolumeClaim, Secret, Service,
    ServiceAccount,
};
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use k8s_openapi::api::storage::v1::{CSIDriver, StorageClass};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use serde_json::Value;

use crate::error::Result;

/// CRD kinds without a typed binding: (kind, default apiVersion, namespaced)
const CUSTOM_KINDS: &[(&str, &str, bool)] = &[
    ("Issuer", "cert-manager.io/v1", true),
    ("Certificate", "cert-manager.io/v1", true),
    ("BackupStorageLocation", "velero.io/v1", true),
    ("VolumeSnapshotLocation", "velero.io/v1", true),
];

/// An object of a CRD kind with no compiled-in type
#[derive(Debug, Clone)]
pub struct CustomObject {
    pub gvk: GroupVersionKind,
    pub object: DynamicObject,
    pub namespaced: bool,
}

macro_rules! kube_objects {
    ($( $variant:ident => namespaced: $namespaced:expr ),* $(,)?) => {
        /// Any object the operator can decode and apply
        #[derive(Debug, Clone)]
        pub enum KubeObject {
            $( $variant($variant), )*
            Custom(CustomObject),
        }

        impl KubeObject {
            /// The object's `kind`
            pub fn kind(&self) -> &str {
                match self {
                    $( KubeObject::$variant(_) => stringify!($variant), )*
                    KubeObject::Custom(o) => &o.gvk.kind,
                }
            }

            pub fn metadata(&self) -> &ObjectMeta {
                match self {
                    $( KubeObject::$variant(o) => &o.metadata, )*
                    KubeObject::Custom(o) => &o.object.metadata,
                }
            }

            pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
                match self {
                    $( KubeObject::$variant(o) => &mut o.metadata, )*
                    KubeObject::Custom(o) => &mut o.object.metadata,
                }
            }

            /// Whether the kind lives inside a namespace
            pub fn is_namespaced(&self) -> bool {
                match self {
                    $( KubeObject::$variant(_) => $namespaced, )*
                    KubeObject::Custom(o) => o.namespaced,
                }
            }

            /// API resource descriptor used to build a dynamic `Api`
            pub fn api_resource(&self) -> ApiResource {
                match self {
                    $( KubeObject::$variant(_) => ApiResource::erase::<$variant>(&()), )*
                    KubeObject::Custom(o) => ApiResource::from_gvk(&o.gvk),
                }
            }

            /// Serialize to JSON, including apiVersion and kind
            pub fn to_value(&self) -> Result<Value> {
                let value = match self {
                    $( KubeObject::$variant(o) => serde_json::to_value(o)?, )*
                    KubeObject::Custom(o) => serde_json::to_value(&o.object)?,
                };
                Ok(value)
            }

            /// Build a typed object from JSON, dispatching on `kind`.
            ///
            /// Returns `Ok(None)` for kinds outside the table.
            pub fn from_value(kind: &str, value: Value) -> Result<Option<Self>> {
                let object = match kind {
                    $( stringify!($variant) => KubeObject::$variant(serde_json::from_value(value)?), )*
                    other => match CUSTOM_KINDS.iter().find(|(k, _, _)| *k == other) {
                        Some((kind, default_api_version, namespaced)) => {
                            KubeObject::Custom(custom_object(kind, default_api_version, *namespaced, value)?)
                        }
                        None => return Ok(None),
                    },
                };
                Ok(Some(object))
            }
        }

        /// Kinds known to the decoder, in table order
        pub fn known_kinds() -> Vec<&'static str> {
            let mut kinds = vec![$( stringify!($variant), )*];
            kinds.extend(CUSTOM_KINDS.iter().map(|(k, _, _)| *k));
            kinds
        }
    };
}

kube_objects! {
    ServiceAccount => namespaced: true,
    ClusterRole => namespaced: false,
    ClusterRoleBinding => namespaced: false,
    Role => namespaced: true,
    RoleBinding => namespaced: true,
    Service => namespaced: true,
    ConfigMap => namespaced: true,
    Secret => namespaced: true,
    Deployment => namespaced: true,
    DaemonSet => namespaced: true,
    StatefulSet => namespaced: true,
    Job => namespaced: true,
    Ingress => namespaced: true,
    IngressClass => namespaced: false,
    ValidatingWebhookConfiguration => namespaced: false,
    MutatingWebhookConfiguration => namespaced: false,
    CustomResourceDefinition => namespaced: false,
    PersistentVolume => namespaced: false,
    PersistentVolumeClaim => namespaced: true,
    StorageClass => namespaced: false,
    Namespace => namespaced: false,
    CSIDriver => namespaced: false,
}

fn custom_object(
    kind: &str,
    default_api_version: &str,
    namespaced: bool,
    value: Value,
) -> Result<CustomObject> {
    let api_version = value
        .get("apiVersion")
        .and_then(Value::as_str)
        .unwrap_or(default_api_version)
        .to_string();
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.clone()),
    };
    let object: DynamicObject = serde_json::from_value(value)?;
    Ok(CustomObject {
        gvk: GroupVersionKind::gvk(&group, &version, kind),
        object,
        namespaced,
    })
}

impl KubeObject {
    /// Object name, empty when unset
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or("")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata().namespace.as_deref()
    }

    /// `Kind/namespace/name` for logs and errors
    pub fn display_name(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{}/{}/{}", self.kind(), ns, self.name()),
            None => format!("{}/{}", self.kind(), self.name()),
        }
    }

    /// Place a namespaced object into `namespace` when it has none
    pub fn default_namespace(&mut self, namespace: &str) {
        if self.is_namespaced() && self.metadata().namespace.is_none() {
            self.metadata_mut().namespace = Some(namespace.to_string());
        }
    }

    /// Key used for identity comparisons
    pub fn key(&self) -> (String, String, String) {
        (
            self.kind().to_string(),
            self.namespace().unwrap_or("").to_string(),
            self.name().to_string(),
        )
    }
}
