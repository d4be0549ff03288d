//! Shared driver helpers
//!
//! Prechecks every driver runs (supported version, credentials secret,
//! certificate secrets) and the structural token substitution used by
//! `render`.

use serde::Deserialize;
use serde_yaml::Value;
use tracing::{debug, warn};

use super::FileType;
use crate::config::OperatorConfig;
use crate::crd::ContainerStorageModule;
use crate::domain::ports::ClusterClient;
use crate::error::{Error, Result};
use crate::manifest::split_yaml;
use crate::versions::min_version_check;

/// Default kubelet root on the nodes
pub const DEFAULT_KUBELET_CONFIG_DIR: &str = "/var/lib/kubelet";

pub const KUBELET_CONFIG_DIR: &str = "KUBELET_CONFIG_DIR";
pub const CERT_SECRET_COUNT: &str = "CERT_SECRET_COUNT";

// =============================================================================
// Secret lookup policy
// =============================================================================

/// What to do when fetching the credentials secret fails for a reason
/// other than not-found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretLookupPolicy {
    /// Abort the precheck
    Fatal,
    /// Log a warning and carry on
    LogAndContinue,
}

// =============================================================================
// Prechecks
// =============================================================================

/// Annotation on the controller Deployment recording the driver config
/// version it was rendered from
pub const CONFIG_VERSION_ANNOTATION: &str = "storage.dell.com/CSMDriverConfigVersion";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpgradePath {
    min_upgrade_path: String,
}

/// Fail unless the driver config tree has an upgrade path for the version
/// and the installed driver, if any, may be upgraded to it.
pub async fn check_upgrade_path(
    cr: &ContainerStorageModule,
    config: &OperatorConfig,
    client: &dyn ClusterClient,
) -> Result<()> {
    let driver = cr.driver_type();
    let version = &cr.spec.driver.config_version;
    let path = config.upgrade_path_file(driver, version);

    if !path.is_file() {
        debug!(path = %path.display(), "Upgrade path file not found");
        return Err(Error::UnsupportedVersion {
            driver: driver.config_name().to_string(),
            version: version.clone(),
        });
    }

    let installed = match client
        .get_deployment(&cr.namespace_or_default(), &cr.controller_name())
        .await
    {
        Ok(deployment) => deployment
            .metadata
            .annotations
            .and_then(|mut a| a.remove(CONFIG_VERSION_ANNOTATION)),
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };
    let Some(installed) = installed.filter(|v| v != version) else {
        return Ok(());
    };

    let upgrade: UpgradePath = serde_yaml::from_str(&std::fs::read_to_string(&path)?)?;
    if !min_version_check(&upgrade.min_upgrade_path, &installed)? {
        return Err(Error::Configuration(format!(
            "{} upgrade from {} to {} is not supported, minimum upgrade path is {}",
            driver, installed, version, upgrade.min_upgrade_path
        )));
    }
    debug!(driver = %driver, from = %installed, to = %version, "Upgrade path allowed");
    Ok(())
}

/// Require a secret in the CR namespace
pub async fn check_secret(
    cr: &ContainerStorageModule,
    client: &dyn ClusterClient,
    name: &str,
    policy: SecretLookupPolicy,
) -> Result<()> {
    let namespace = cr.namespace_or_default();
    match client.get_secret(&namespace, name).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Err(Error::SecretNotFound {
            name: name.to_string(),
        }),
        Err(e) => match policy {
            SecretLookupPolicy::Fatal => Err(e),
            SecretLookupPolicy::LogAndContinue => {
                warn!(secret = %name, namespace = %namespace, error = %e, "Could not read secret, continuing");
                Ok(())
            }
        },
    }
}

/// Require `<cr>-certs-<i>` secrets unless certificate validation is skipped.
///
/// Both env values are parsed before any lookup so a typo fails fast.
pub async fn check_cert_secrets(
    cr: &ContainerStorageModule,
    client: &dyn ClusterClient,
    skip_validation_env: &str,
) -> Result<()> {
    let common = &cr.spec.driver.common;

    let skip = match common.env(skip_validation_env) {
        Some(raw) => parse_bool(skip_validation_env, raw)?,
        None => true,
    };
    let count = match common.env(CERT_SECRET_COUNT) {
        Some(raw) => parse_count(CERT_SECRET_COUNT, raw)?,
        None => 1,
    };

    if skip {
        return Ok(());
    }

    for i in 0..count {
        let name = format!("{}-certs-{}", cr.name(), i);
        check_secret(cr, client, &name, SecretLookupPolicy::Fatal).await?;
    }
    Ok(())
}

/// Parse a boolean env override the way Kubernetes manifests spell them
pub fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(Error::InvalidEnvValue {
            name: name.to_string(),
            value: other.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

fn parse_count(name: &str, raw: &str) -> Result<u32> {
    raw.trim().parse::<u32>().map_err(|e| Error::InvalidEnvValue {
        name: name.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

// =============================================================================
// Substitution
// =============================================================================

/// One placeholder and the value it is replaced with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub token: &'static str,
    pub value: String,
    /// Re-type the value (bool / number) when it fills a whole scalar
    pub typed: bool,
}

impl Substitution {
    pub fn text(token: &'static str, value: impl Into<String>) -> Self {
        Self {
            token,
            value: value.into(),
            typed: false,
        }
    }

    pub fn typed(token: &'static str, value: impl Into<String>) -> Self {
        Self {
            token,
            value: value.into(),
            typed: true,
        }
    }
}

/// Env override for a file: the file's own scope first, then common
pub fn scoped_env<'a>(
    cr: &'a ContainerStorageModule,
    file_type: FileType,
    name: &str,
) -> Option<&'a str> {
    let driver = &cr.spec.driver;
    let scoped = match file_type {
        FileType::Controller => driver.controller.env(name),
        FileType::Node => driver.node.env(name),
        FileType::CsiDriverSpec | FileType::ConfigParams => None,
    };
    scoped.or_else(|| driver.common.env(name))
}

/// Env-backed substitution with a literal default
pub fn env_substitution(
    cr: &ContainerStorageModule,
    file_type: FileType,
    token: &'static str,
    env: &str,
    default: &str,
) -> Substitution {
    let value = scoped_env(cr, file_type, env).unwrap_or(default);
    Substitution::text(token, value)
}

/// Tokens every driver template understands
pub fn common_substitutions(cr: &ContainerStorageModule) -> Vec<Substitution> {
    let kubelet_dir = cr
        .spec
        .driver
        .common
        .env(KUBELET_CONFIG_DIR)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_KUBELET_CONFIG_DIR);

    vec![
        Substitution::text("<DriverDefaultReleaseName>", cr.name()),
        Substitution::text("<DriverDefaultReleaseNamespace>", cr.namespace_or_default()),
        Substitution::text("<KUBELET_CONFIG_DIR>", kubelet_dir),
    ]
}

/// Replace tokens inside every string scalar of a multi-document template.
///
/// Documents are parsed, rewritten and re-serialized, so replacement values
/// can never change the shape of the document.
pub fn substitute(template: &str, subs: &[Substitution]) -> Result<String> {
    let mut docs = Vec::new();
    for doc in split_yaml(template) {
        let mut value: Value = serde_yaml::from_str(&doc)?;
        substitute_value(&mut value, subs);
        docs.push(serde_yaml::to_string(&value)?);
    }
    Ok(docs.join("---\n"))
}

fn substitute_value(value: &mut Value, subs: &[Substitution]) {
    match value {
        Value::String(s) => {
            if let Some(replaced) = substitute_scalar(s, subs) {
                *value = replaced;
            }
        }
        Value::Sequence(seq) => {
            for item in seq.iter_mut() {
                substitute_value(item, subs);
            }
        }
        Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                substitute_value(v, subs);
            }
        }
        Value::Tagged(tagged) => substitute_value(&mut tagged.value, subs),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn substitute_scalar(s: &str, subs: &[Substitution]) -> Option<Value> {
    if !s.contains('<') {
        return None;
    }

    if let Some(sub) = subs.iter().find(|sub| sub.typed && sub.token == s) {
        if let Ok(v) = serde_yaml::from_str::<Value>(&sub.value) {
            if v.is_bool() || v.is_number() {
                return Some(v);
            }
        }
    }

    let mut out = s.to_string();
    for sub in subs {
        if out.contains(sub.token) {
            out = out.replace(sub.token, &sub.value);
        }
    }
    (out != s).then_some(Value::String(out))
}
