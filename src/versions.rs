//! Version checks and image matrices
//!
//! A `VersionSpec` maps component names to image references for one driver
//! config version. The default matrix ships inside the binary; a
//! `csm-images` ConfigMap in the CR namespace may override it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::crd::ContainerStorageModule;
use crate::domain::ports::ClusterClient;
use crate::error::{Error, Result};

/// Name of the override ConfigMap
pub const CSM_IMAGES_CONFIG_MAP: &str = "csm-images";

/// Key inside the override ConfigMap
pub const VERSIONS_KEY: &str = "versions.yaml";

const DEFAULT_MATRIX: &str = include_str!("../config/csm-images.yaml");

/// Images for one driver config version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSpec {
    pub version: String,
    #[serde(default)]
    pub images: BTreeMap<String, String>,
}

impl VersionSpec {
    /// Image for a component, if the matrix names one
    pub fn image(&self, component: &str) -> Option<&str> {
        self.images
            .get(component)
            .map(String::as_str)
            .filter(|i| !i.is_empty())
    }
}

/// Parse a list of version specs
pub fn parse_version_specs(raw: &str) -> Result<Vec<VersionSpec>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_yaml::from_str(raw)?)
}

/// Entry of the embedded matrix for `version`
pub fn default_version_spec(version: &str) -> Result<Option<VersionSpec>> {
    Ok(parse_version_specs(DEFAULT_MATRIX)?
        .into_iter()
        .find(|s| s.version == version))
}

/// Every image value must be set
pub fn validate_config_map(spec: &VersionSpec) -> Result<()> {
    for (key, value) in &spec.images {
        if value.trim().is_empty() {
            return Err(Error::EmptyImageValue { key: key.clone() });
        }
    }
    Ok(())
}

/// Resolve the image matrix for a CR.
///
/// A matching entry in the `csm-images` ConfigMap wins over the embedded
/// default. A missing ConfigMap is not an error; an invalid entry is.
pub async fn resolve_version_spec(
    cr: &ContainerStorageModule,
    client: &dyn ClusterClient,
) -> Result<Option<VersionSpec>> {
    let version = &cr.spec.driver.config_version;
    let namespace = cr.namespace_or_default();

    match client.get_config_map(&namespace, CSM_IMAGES_CONFIG_MAP).await {
        Ok(cm) => {
            let raw = cm
                .data
                .as_ref()
                .and_then(|d| d.get(VERSIONS_KEY))
                .cloned()
                .unwrap_or_default();
            if let Some(spec) = parse_version_specs(&raw)?
                .into_iter()
                .find(|s| &s.version == version)
            {
                validate_config_map(&spec)?;
                info!(namespace = %namespace, version = %version, "Using image override from {}", CSM_IMAGES_CONFIG_MAP);
                return Ok(Some(spec));
            }
            debug!(version = %version, "No matching override entry, using default matrix");
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e),
    }

    default_version_spec(version)
}

/// Whether `version` is at least `min`, comparing major and minor only
pub fn min_version_check(min: &str, version: &str) -> Result<bool> {
    let min = parse_version(min)?;
    let version = parse_version(version)?;
    Ok((version.major, version.minor) >= (min.major, min.minor))
}

fn parse_version(raw: &str) -> Result<semver::Version> {
    semver::Version::parse(raw.trim().trim_start_matches('v'))
        .map_err(|e| Error::VersionParse(format!("{}: {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::FakeClusterClient;
    use crate::crd::{ContainerStorageModuleSpec, Driver, DriverType};
    use assert_matches::assert_matches;

    fn csm(version: &str) -> ContainerStorageModule {
        let mut cr = ContainerStorageModule::new(
            "isilon",
            ContainerStorageModuleSpec {
                driver: Driver {
                    csi_driver_type: DriverType::PowerScale,
                    config_version: version.into(),
                    ..Default::default()
                },
                modules: vec![],
            },
        );
        cr.metadata.namespace = Some("isilon".into());
        cr
    }

    #[test]
    fn test_min_version_check_boundaries() {
        assert!(min_version_check("v2.12.0", "v2.12.1").unwrap());
        assert!(!min_version_check("v2.12.0", "v2.11.9").unwrap());
        assert!(min_version_check("v2.12.0", "v3.0.0").unwrap());
        assert!(min_version_check("v2.99.0", "v3.0.0").unwrap());
        assert_matches!(min_version_check("v2.12.0", "v0"), Err(Error::VersionParse(_)));
    }

    #[test]
    fn test_validate_config_map() {
        let mut spec = VersionSpec {
            version: "v2.12.0".into(),
            images: [
                ("csi-isilon".to_string(), "quay.io/dell/csi-isilon:v2.12.0".to_string()),
                ("podmon".to_string(), "quay.io/dell/podmon:v1.11.0".to_string()),
            ]
            .into(),
        };
        assert!(validate_config_map(&spec).is_ok());

        spec.images.insert("podmon".into(), String::new());
        let err = validate_config_map(&spec).unwrap_err();
        assert_eq!(err.to_string(), "value for key \"podmon\" is empty");
    }

    #[test]
    fn test_default_matrix_parses() {
        let spec = default_version_spec("v2.12.0").unwrap().unwrap();
        assert!(spec.image("csi-isilon").is_some());
        assert!(validate_config_map(&spec).is_ok());
        assert!(default_version_spec("v0").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_prefers_config_map() {
        let client = FakeClusterClient::new();
        client.insert_config_map(
            "isilon",
            CSM_IMAGES_CONFIG_MAP,
            [(
                VERSIONS_KEY.to_string(),
                "- version: v2.12.0\n  images:\n    csi-isilon: registry.local/csi-isilon:custom\n"
                    .to_string(),
            )]
            .into(),
        );

        let spec = resolve_version_spec(&csm("v2.12.0"), &client)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(spec.image("csi-isilon"), Some("registry.local/csi-isilon:custom"));

        // no matching entry in the override falls back to the default
        let spec = resolve_version_spec(&csm("v2.11.0"), &client)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            spec.image("csi-isilon"),
            Some("quay.io/dell/container-storage-modules/csi-isilon:v2.11.0")
        );
    }

    #[tokio::test]
    async fn test_resolve_rejects_empty_override() {
        let client = FakeClusterClient::new();
        client.insert_config_map(
            "isilon",
            CSM_IMAGES_CONFIG_MAP,
            [(
                VERSIONS_KEY.to_string(),
                "- version: v2.12.0\n  images:\n    csi-isilon: \"\"\n".to_string(),
            )]
            .into(),
        );

        assert_matches!(
            resolve_version_spec(&csm("v2.12.0"), &client).await,
            Err(Error::EmptyImageValue { key }) if key == "csi-isilon"
        );
    }

    #[tokio::test]
    async fn test_resolve_without_config_map() {
        let client = FakeClusterClient::new();
        let spec = resolve_version_spec(&csm("v2.12.0"), &client).await.unwrap();
        assert_eq!(spec.map(|s| s.version), Some("v2.12.0".to_string()));
    }
}
