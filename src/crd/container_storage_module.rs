//! ContainerStorageModule CRD
//!
//! Describes one CSI driver installation plus the add-on modules that ride
//! along with it (authorization, replication, observability, ...).

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// ContainerStorageModule CRD
// =============================================================================

/// ContainerStorageModule installs a CSI driver and its modules into the
/// namespace the resource lives in.
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "storage.dell.com",
    version = "v1",
    kind = "ContainerStorageModule",
    plural = "containerstoragemodules",
    shortname = "csm",
    status = "ContainerStorageModuleStatus",
    printcolumn = r#"{"name": "Driver", "type": "string", "jsonPath": ".spec.driver.csiDriverType"}"#,
    printcolumn = r#"{"name": "ConfigVersion", "type": "string", "jsonPath": ".spec.driver.configVersion"}"#,
    printcolumn = r#"{"name": "State", "type": "string", "jsonPath": ".status.state"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    derive = "PartialEq",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStorageModuleSpec {
    /// CSI driver to install
    pub driver: Driver,

    /// Add-on modules
    #[serde(default)]
    pub modules: Vec<Module>,
}

// =============================================================================
// Driver
// =============================================================================

/// CSI driver configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Driver {
    /// Storage platform the driver talks to
    pub csi_driver_type: DriverType,

    /// Driver config version, e.g. "v2.12.0"
    pub config_version: String,

    /// Number of controller replicas
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Secret holding array credentials (driver default when empty)
    #[serde(default)]
    pub auth_secret: String,

    /// CSIDriver object settings
    #[serde(default)]
    pub csi_driver_spec: CsiDriverSpec,

    /// Settings shared by controller and node
    #[serde(default)]
    pub common: ContainerTemplate,

    /// Controller-only settings
    #[serde(default)]
    pub controller: ContainerTemplate,

    /// Node-only settings
    #[serde(default)]
    pub node: ContainerTemplate,
}

/// Supported CSI drivers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum DriverType {
    #[default]
    #[serde(rename = "isilon", alias = "powerscale")]
    PowerScale,
    #[serde(rename = "vxflexos", alias = "powerflex")]
    PowerFlex,
    #[serde(rename = "powermax")]
    PowerMax,
    #[serde(rename = "powerstore")]
    PowerStore,
    #[serde(rename = "unity")]
    Unity,
    #[serde(rename = "cosi")]
    Cosi,
}

impl DriverType {
    /// Directory name under `driverconfig/`
    pub fn config_name(&self) -> &'static str {
        match self {
            DriverType::PowerScale => "powerscale",
            DriverType::PowerFlex => "powerflex",
            DriverType::PowerMax => "powermax",
            DriverType::PowerStore => "powerstore",
            DriverType::Unity => "unity",
            DriverType::Cosi => "cosi",
        }
    }

    /// Key of the driver image in a `VersionSpec`
    pub fn image_key(&self) -> &'static str {
        match self {
            DriverType::PowerScale => "csi-isilon",
            DriverType::PowerFlex => "csi-vxflexos",
            DriverType::PowerMax => "csi-powermax",
            DriverType::PowerStore => "csi-powerstore",
            DriverType::Unity => "csi-unity",
            DriverType::Cosi => "cosi",
        }
    }
}

impl std::fmt::Display for DriverType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.config_name())
    }
}

/// Settings applied to the cluster-scoped CSIDriver object
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CsiDriverSpec {
    #[serde(default)]
    pub fs_group_policy: String,

    #[serde(default)]
    pub storage_capacity: bool,
}

/// Container level overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerTemplate {
    /// Component name (used for module components)
    #[serde(default)]
    pub name: String,

    /// Whether the component is enabled (module components only)
    #[serde(default)]
    pub enabled: Option<bool>,

    /// Image override
    #[serde(default)]
    pub image: Option<String>,

    /// Environment variable overrides
    #[serde(default)]
    pub envs: Vec<EnvVar>,

    /// Tolerations for the workload
    #[serde(default)]
    pub tolerations: Vec<Toleration>,

    /// Node selector for the workload
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
}

impl ContainerTemplate {
    /// Value of the named env override, last definition wins
    pub fn env(&self, name: &str) -> Option<&str> {
        env_value(&self.envs, name)
    }

    /// Set or replace an env override
    pub fn set_env(&mut self, name: &str, value: &str) {
        match self.envs.iter_mut().find(|e| e.name == name) {
            Some(existing) => existing.value = value.to_string(),
            None => self.envs.push(EnvVar::new(name, value)),
        }
    }
}

/// Name/value environment override
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    pub fn new(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Pod toleration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub effect: Option<String>,
    #[serde(default)]
    pub toleration_seconds: Option<i64>,
}

impl From<&Toleration> for k8s_openapi::api::core::v1::Toleration {
    fn from(t: &Toleration) -> Self {
        Self {
            key: t.key.clone(),
            operator: t.operator.clone(),
            value: t.value.clone(),
            effect: t.effect.clone(),
            toleration_seconds: t.toleration_seconds,
        }
    }
}

/// Look up an env override by name, last definition wins
pub fn env_value<'a>(envs: &'a [EnvVar], name: &str) -> Option<&'a str> {
    envs.iter()
        .rev()
        .find(|e| e.name == name)
        .map(|e| e.value.as_str())
}

// =============================================================================
// Modules
// =============================================================================

/// Add-on module entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Module {
    pub name: ModuleType,

    #[serde(default)]
    pub enabled: bool,

    /// Module config version; defaulted from the driver version when empty
    #[serde(default)]
    pub config_version: String,

    /// Remove the module's objects when it is disabled
    #[serde(default)]
    pub force_remove_module: bool,

    #[serde(default)]
    pub components: Vec<ContainerTemplate>,
}

impl Module {
    /// Find a component by name
    pub fn component(&self, name: &str) -> Option<&ContainerTemplate> {
        self.components.iter().find(|c| c.name == name)
    }
}

/// Known add-on modules
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ModuleType {
    #[default]
    Authorization,
    Replication,
    Observability,
    Resiliency,
    #[serde(rename = "csireverseproxy")]
    ReverseProxy,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Authorization => "authorization",
            ModuleType::Replication => "replication",
            ModuleType::Observability => "observability",
            ModuleType::Resiliency => "resiliency",
            ModuleType::ReverseProxy => "csireverseproxy",
        }
    }
}

impl std::fmt::Display for ModuleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Status
// =============================================================================

/// Observed state of the installation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStorageModuleStatus {
    #[serde(default)]
    pub state: CsmState,

    #[serde(default)]
    pub controller_status: PodStatus,

    #[serde(default)]
    pub node_status: PodStatus,

    #[serde(default)]
    pub last_update: LastUpdate,
}

/// Coarse installation state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum CsmState {
    Succeeded,
    Running,
    Updating,
    Failed,
    InvalidConfig,
    #[default]
    Error,
}

impl std::fmt::Display for CsmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CsmState::Succeeded => write!(f, "Succeeded"),
            CsmState::Running => write!(f, "Running"),
            CsmState::Updating => write!(f, "Updating"),
            CsmState::Failed => write!(f, "Failed"),
            CsmState::InvalidConfig => write!(f, "InvalidConfig"),
            CsmState::Error => write!(f, "Error"),
        }
    }
}

/// Pod counts for one workload, stored as strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub available: String,
    #[serde(default)]
    pub desired: String,
    #[serde(default)]
    pub failed: String,
}

/// Last condition change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LastUpdate {
    #[serde(default)]
    pub condition: CsmState,

    #[serde(default)]
    pub error_message: String,

    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub time: Option<DateTime<Utc>>,
}

impl ContainerStorageModuleStatus {
    /// Record a condition; the timestamp only moves when something changed
    pub fn set_last_update(&mut self, condition: CsmState, error_message: &str, now: DateTime<Utc>) {
        if self.last_update.condition != condition
            || self.last_update.error_message != error_message
            || self.last_update.time.is_none()
        {
            self.last_update.time = Some(now);
        }
        self.last_update.condition = condition;
        self.last_update.error_message = error_message.to_string();
    }
}

// =============================================================================
// Default Value Functions
// =============================================================================

fn default_replicas() -> i32 {
    1
}

// =============================================================================
// Implementations
// =============================================================================

impl ContainerStorageModule {
    /// Get the name of this installation
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("unknown")
    }

    /// Namespace the driver is installed into
    pub fn namespace_or_default(&self) -> String {
        self.namespace().unwrap_or_else(|| "default".to_string())
    }

    pub fn driver_type(&self) -> DriverType {
        self.spec.driver.csi_driver_type
    }

    /// Name of the controller Deployment
    pub fn controller_name(&self) -> String {
        format!("{}-controller", self.name())
    }

    /// Name of the node DaemonSet
    pub fn node_name(&self) -> String {
        format!("{}-node", self.name())
    }

    /// Look up a module entry
    pub fn module(&self, module_type: ModuleType) -> Option<&Module> {
        self.spec.modules.iter().find(|m| m.name == module_type)
    }

    /// Look up a module entry for mutation
    pub fn module_mut(&mut self, module_type: ModuleType) -> Option<&mut Module> {
        self.spec.modules.iter_mut().find(|m| m.name == module_type)
    }

    /// Modules that are switched on
    pub fn enabled_modules(&self) -> impl Iterator<Item = &Module> {
        self.spec.modules.iter().filter(|m| m.enabled)
    }

    /// Current status, or an empty one
    pub fn status_or_default(&self) -> ContainerStorageModuleStatus {
        self.status.clone().unwrap_or_default()
    }

    /// Whether deletion has been requested
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
