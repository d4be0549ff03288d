//! Add-on module checks
//!
//! Modules ride along with a driver. Each one must support the driver type
//! and have a config tree for its version; some also need secrets.

pub mod authorization;

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::OperatorConfig;
use crate::crd::{ContainerStorageModule, DriverType, Module, ModuleType};
use crate::domain::ports::ClusterClient;
use crate::drivers::common::{check_secret, SecretLookupPolicy};
use crate::drivers::powermax;
use crate::error::{Error, Result};

/// driver type -> driver version -> module -> module version
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct ModuleVersionValues(BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>);

impl ModuleVersionValues {
    /// Load `moduleconfig/common/version-values.yaml`
    pub fn load(config: &OperatorConfig) -> Result<Self> {
        let path = config.module_version_values_file();
        if !path.is_file() {
            debug!(path = %path.display(), "No module version table");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Default module version for a driver version
    pub fn lookup(&self, driver: DriverType, driver_version: &str, module: ModuleType) -> Option<&str> {
        self.0
            .get(driver.config_name())
            .and_then(|versions| versions.get(driver_version))
            .and_then(|modules| modules.get(module.as_str()))
            .map(String::as_str)
    }
}

/// Drivers a module can be installed with
pub fn supported_drivers(module: ModuleType) -> &'static [DriverType] {
    use DriverType::*;
    match module {
        ModuleType::Authorization => &[PowerScale, PowerFlex, PowerMax],
        ModuleType::Replication | ModuleType::Observability => {
            &[PowerScale, PowerFlex, PowerMax, PowerStore]
        }
        ModuleType::Resiliency => &[PowerScale, PowerFlex, PowerMax, PowerStore, Unity],
        ModuleType::ReverseProxy => &[PowerMax],
    }
}

/// Fill missing module config versions from the version table
pub fn default_module_versions(cr: &mut ContainerStorageModule, config: &OperatorConfig) -> Result<()> {
    if cr.spec.modules.iter().all(|m| !m.config_version.is_empty()) {
        return Ok(());
    }

    let values = ModuleVersionValues::load(config)?;
    let driver = cr.driver_type();
    let driver_version = cr.spec.driver.config_version.clone();

    for module in cr.spec.modules.iter_mut().filter(|m| m.config_version.is_empty()) {
        if let Some(version) = values.lookup(driver, &driver_version, module.name) {
            debug!(module = %module.name, version, "Defaulted module config version");
            module.config_version = version.to_string();
        }
    }
    Ok(())
}

/// Check one enabled module
pub async fn precheck(
    cr: &ContainerStorageModule,
    module: &Module,
    config: &OperatorConfig,
    client: &dyn ClusterClient,
) -> Result<()> {
    let driver = cr.driver_type();
    if !supported_drivers(module.name).contains(&driver) {
        return Err(Error::Configuration(format!(
            "{} is not supported for {}",
            module.name, driver
        )));
    }

    let dir = config.module_config_dir(module.name, &module.config_version);
    if module.config_version.is_empty() || !dir.is_dir() {
        return Err(Error::UnsupportedVersion {
            driver: module.name.as_str().to_string(),
            version: module.config_version.clone(),
        });
    }

    match module.name {
        ModuleType::Authorization => authorization::precheck(cr, client).await,
        ModuleType::ReverseProxy => {
            let tls_secret = powermax::reverse_proxy_tls_secret(cr);
            check_secret(cr, client, &tls_secret, SecretLookupPolicy::Fatal).await
        }
        ModuleType::Replication | ModuleType::Observability | ModuleType::Resiliency => Ok(()),
    }
}

/// Check every enabled module
pub async fn precheck_all(
    cr: &ContainerStorageModule,
    config: &OperatorConfig,
    client: &dyn ClusterClient,
) -> Result<()> {
    for module in cr.enabled_modules() {
        precheck(cr, module, config, client).await?;
    }
    Ok(())
}
