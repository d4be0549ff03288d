//! Operator configuration
//!
//! `OperatorConfig` is built once at start-up and threaded through every
//! reconcile. It knows where the on-disk config tree lives and which
//! sidecar images match the cluster's Kubernetes version.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::crd::{DriverType, ModuleType};
use crate::error::{Error, Result};

/// Default config tree location inside the operator image
pub const DEFAULT_CONFIG_DIR: &str = "/etc/config/dell-csm-operator";

// =============================================================================
// Sidecar Images
// =============================================================================

/// Sidecar images for one Kubernetes version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct K8sImagesConfig {
    #[serde(default)]
    pub kubeversion: String,

    #[serde(default)]
    pub images: SidecarImages,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SidecarImages {
    #[serde(default)]
    pub attacher: String,
    #[serde(default)]
    pub provisioner: String,
    #[serde(default)]
    pub snapshotter: String,
    #[serde(default)]
    pub registrar: String,
    #[serde(default)]
    pub resizer: String,
    #[serde(default)]
    pub externalhealthmonitorcontroller: String,
    #[serde(default)]
    pub sdc: String,
    #[serde(default)]
    pub sdcmonitor: String,
    #[serde(default)]
    pub podmon: String,
    #[serde(default, rename = "csiReverseProxy")]
    pub csi_reverse_proxy: String,
}

impl SidecarImages {
    /// Image for a sidecar container name, if it is a known sidecar
    pub fn for_container(&self, container: &str) -> Option<&str> {
        let image = match container {
            "attacher" => &self.attacher,
            "provisioner" => &self.provisioner,
            "snapshotter" => &self.snapshotter,
            "registrar" => &self.registrar,
            "resizer" => &self.resizer,
            "external-health-monitor" => &self.externalhealthmonitorcontroller,
            "sdc" => &self.sdc,
            "sdc-monitor" => &self.sdcmonitor,
            "podmon" => &self.podmon,
            "reverseproxy" => &self.csi_reverse_proxy,
            _ => return None,
        };
        if image.is_empty() {
            None
        } else {
            Some(image.as_str())
        }
    }
}

// =============================================================================
// Operator Config
// =============================================================================

/// Read-only configuration shared by all reconciles
#[derive(Debug, Clone, Default)]
pub struct OperatorConfig {
    /// Root of the config tree (`driverconfig/`, `moduleconfig/`)
    pub config_directory: PathBuf,
    /// Kubernetes version key, e.g. "v1.29"
    pub k8s_version: String,
    /// Sidecar images for `k8s_version`
    pub k8s_images: K8sImagesConfig,
}

impl OperatorConfig {
    /// Config without sidecar images
    pub fn new(config_directory: impl Into<PathBuf>) -> Self {
        Self {
            config_directory: config_directory.into(),
            ..Default::default()
        }
    }

    /// Load sidecar images from
    /// `<dir>/driverconfig/common/k8s-<version>-values.yaml`
    pub fn load(config_directory: impl Into<PathBuf>, k8s_version: &str) -> Result<Self> {
        let config_directory = config_directory.into();
        let path = config_directory
            .join("driverconfig")
            .join("common")
            .join(format!("k8s-{}-values.yaml", k8s_version.trim_start_matches('v')));

        let raw = std::fs::read_to_string(&path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        let k8s_images: K8sImagesConfig = serde_yaml::from_str(&raw)?;

        info!(
            config_dir = %config_directory.display(),
            k8s_version,
            "Loaded sidecar image config"
        );

        Ok(Self {
            config_directory,
            k8s_version: k8s_version.to_string(),
            k8s_images,
        })
    }

    /// `<dir>/driverconfig/<driver>/<version>`
    pub fn driver_config_dir(&self, driver: DriverType, version: &str) -> PathBuf {
        self.config_directory
            .join("driverconfig")
            .join(driver.config_name())
            .join(version)
    }

    /// `<dir>/driverconfig/<driver>/<version>/upgrade-path.yaml`
    pub fn upgrade_path_file(&self, driver: DriverType, version: &str) -> PathBuf {
        self.driver_config_dir(driver, version).join("upgrade-path.yaml")
    }

    /// `<dir>/moduleconfig/<module>/<version>`
    pub fn module_config_dir(&self, module: ModuleType, version: &str) -> PathBuf {
        self.config_directory
            .join("moduleconfig")
            .join(module.as_str())
            .join(version)
    }

    /// `<dir>/moduleconfig/common/version-values.yaml`
    pub fn module_version_values_file(&self) -> PathBuf {
        self.config_directory
            .join("moduleconfig")
            .join("common")
            .join("version-values.yaml")
    }

    /// Read a template file from the driver config tree
    pub fn read_driver_file(&self, driver: DriverType, version: &str, file: &str) -> Result<String> {
        read_file(&self.driver_config_dir(driver, version).join(file))
    }
}

fn read_file(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    #[test]
    fn test_load_sidecar_images() {
        let dir = TempDir::new().unwrap();
        let common = dir.path().join("driverconfig").join("common");
        std::fs::create_dir_all(&common).unwrap();
        std::fs::write(
            common.join("k8s-1.29-values.yaml"),
            "kubeversion: v1.29\nimages:\n  attacher: registry.k8s.io/sig-storage/csi-attacher:v4.6.1\n  registrar: registry.k8s.io/sig-storage/csi-node-driver-registrar:v2.11.1\n",
        )
        .unwrap();

        let config = OperatorConfig::load(dir.path(), "v1.29").unwrap();
        assert_eq!(config.k8s_images.kubeversion, "v1.29");
        assert_eq!(
            config.k8s_images.images.for_container("attacher"),
            Some("registry.k8s.io/sig-storage/csi-attacher:v4.6.1")
        );
        assert_eq!(config.k8s_images.images.for_container("resizer"), None);
        assert_eq!(config.k8s_images.images.for_container("driver"), None);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        assert_matches!(
            OperatorConfig::load(dir.path(), "v1.29"),
            Err(Error::Configuration(_))
        );
    }

    #[test]
    fn test_paths() {
        let config = OperatorConfig::new("/cfg");
        assert_eq!(
            config.upgrade_path_file(DriverType::PowerScale, "v2.12.0"),
            PathBuf::from("/cfg/driverconfig/powerscale/v2.12.0/upgrade-path.yaml")
        );
        assert_eq!(
            config.module_config_dir(ModuleType::Authorization, "v1.11.0"),
            PathBuf::from("/cfg/moduleconfig/authorization/v1.11.0")
        );
    }
}
