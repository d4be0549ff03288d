//! CSI driver support
//!
//! Per-driver prechecks and template tokens, dispatched on
//! [`DriverType`]. Shared machinery lives in `common`, workload patching in
//! `workload`.

pub mod common;
pub mod cosi;
pub mod powerflex;
pub mod powermax;
pub mod powerscale;
pub mod powerstore;
pub mod unity;
pub mod workload;

pub use common::{SecretLookupPolicy, Substitution};
pub use workload::{patch_controller, patch_node, ImageSources};

use tracing::debug;

use crate::config::OperatorConfig;
use crate::crd::{ContainerStorageModule, DriverType};
use crate::domain::ports::ClusterClient;
use crate::error::Result;

/// Driver template files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Controller,
    Node,
    CsiDriverSpec,
    ConfigParams,
}

impl FileType {
    pub fn file_name(&self) -> &'static str {
        match self {
            FileType::Controller => "controller.yaml",
            FileType::Node => "node.yaml",
            FileType::CsiDriverSpec => "csidriver.yaml",
            FileType::ConfigParams => "driver-config-params.yaml",
        }
    }

    /// Whether a driver version may ship without this file
    pub fn is_optional(&self) -> bool {
        matches!(self, FileType::CsiDriverSpec | FileType::ConfigParams)
    }
}

/// Credentials secret used when the CR does not name one
pub fn default_secret_name(cr: &ContainerStorageModule) -> String {
    match cr.driver_type() {
        DriverType::PowerScale | DriverType::Unity | DriverType::PowerMax => {
            format!("{}-creds", cr.name())
        }
        DriverType::PowerFlex | DriverType::PowerStore | DriverType::Cosi => {
            format!("{}-config", cr.name())
        }
    }
}

/// Credentials secret for a CR
pub fn secret_name(cr: &ContainerStorageModule) -> String {
    if cr.spec.driver.auth_secret.is_empty() {
        default_secret_name(cr)
    } else {
        cr.spec.driver.auth_secret.clone()
    }
}

pub fn secret_lookup_policy(driver: DriverType) -> SecretLookupPolicy {
    match driver {
        DriverType::PowerScale => powerscale::SECRET_POLICY,
        DriverType::PowerFlex => powerflex::SECRET_POLICY,
        DriverType::PowerMax => powermax::SECRET_POLICY,
        DriverType::PowerStore => powerstore::SECRET_POLICY,
        DriverType::Unity => unity::SECRET_POLICY,
        DriverType::Cosi => cosi::SECRET_POLICY,
    }
}

/// Fill defaults into a CR before it is checked or rendered.
///
/// The only step that mutates the CR; `precheck` stays read-only.
pub fn normalize(cr: &mut ContainerStorageModule, config: &OperatorConfig) -> Result<()> {
    let shared = &mut cr.spec.driver.common;
    if shared.env(common::KUBELET_CONFIG_DIR).map_or(true, str::is_empty) {
        shared.set_env(common::KUBELET_CONFIG_DIR, common::DEFAULT_KUBELET_CONFIG_DIR);
    }

    if cr.driver_type() == DriverType::PowerMax {
        powermax::normalize(cr);
    }

    crate::modules::default_module_versions(cr, config)
}

/// Read-only driver validation
pub async fn precheck(
    cr: &ContainerStorageModule,
    config: &OperatorConfig,
    client: &dyn ClusterClient,
) -> Result<()> {
    debug!(csm = %cr.name(), driver = %cr.driver_type(), "Running driver precheck");
    match cr.driver_type() {
        DriverType::PowerScale => powerscale::precheck(cr, config, client).await,
        DriverType::PowerFlex => powerflex::precheck(cr, config, client).await,
        DriverType::PowerMax => powermax::precheck(cr, config, client).await,
        DriverType::PowerStore => powerstore::precheck(cr, config, client).await,
        DriverType::Unity => unity::precheck(cr, config, client).await,
        DriverType::Cosi => cosi::precheck(cr, config, client).await,
    }
}

/// Every substitution for a file, in application order
pub fn substitutions(cr: &ContainerStorageModule, file_type: FileType) -> Vec<Substitution> {
    let mut subs = common::common_substitutions(cr);
    subs.extend(match cr.driver_type() {
        DriverType::PowerScale => powerscale::substitutions(cr, file_type),
        DriverType::PowerFlex => powerflex::substitutions(cr, file_type),
        DriverType::PowerMax => powermax::substitutions(cr, file_type),
        DriverType::PowerStore => powerstore::substitutions(cr, file_type),
        DriverType::Unity => unity::substitutions(cr, file_type),
        DriverType::Cosi => Vec::new(),
    });
    subs
}

/// Fill a driver template with values from the CR
pub fn render(template: &str, cr: &ContainerStorageModule, file_type: FileType) -> Result<String> {
    common::substitute(template, &substitutions(cr, file_type))
}

/// Read and render one template file.
///
/// Optional files that are absent render to `None`.
pub fn render_file(
    cr: &ContainerStorageModule,
    config: &OperatorConfig,
    file_type: FileType,
) -> Result<Option<String>> {
    let driver = cr.driver_type();
    let version = &cr.spec.driver.config_version;
    let path = config.driver_config_dir(driver, version).join(file_type.file_name());

    if file_type.is_optional() && !path.is_file() {
        debug!(path = %path.display(), "Optional template not present");
        return Ok(None);
    }

    let template = config.read_driver_file(driver, version, file_type.file_name())?;
    render(&template, cr, file_type).map(Some)
}
