//! PowerMax driver
//!
//! PowerMax always talks to the array through the CSI reverse proxy, so
//! `normalize` switches that module on before any check runs.

use tracing::info;

use super::common::{check_secret, check_upgrade_path, env_substitution, SecretLookupPolicy, Substitution};
use super::FileType;
use crate::config::OperatorConfig;
use crate::crd::{ContainerStorageModule, Module, ModuleType};
use crate::domain::ports::ClusterClient;
use crate::error::Result;

pub const SECRET_POLICY: SecretLookupPolicy = SecretLookupPolicy::Fatal;

pub const REVERSE_PROXY_COMPONENT: &str = "csipowermax-reverseproxy";
pub const REVERSE_PROXY_TLS_SECRET_ENV: &str = "X_CSI_REVPROXY_TLS_SECRET";
pub const DEFAULT_REVERSE_PROXY_TLS_SECRET: &str = "csirevproxy-tls-secret";

pub async fn precheck(
    cr: &ContainerStorageModule,
    config: &OperatorConfig,
    client: &dyn ClusterClient,
) -> Result<()> {
    check_upgrade_path(cr, config, client).await?;
    check_secret(cr, client, &super::secret_name(cr), SECRET_POLICY).await
}

/// Enable the reverse proxy module and mark it for removal with the driver
pub fn normalize(cr: &mut ContainerStorageModule) {
    match cr.module_mut(ModuleType::ReverseProxy) {
        Some(module) => {
            module.enabled = true;
            module.force_remove_module = true;
        }
        None => {
            info!(csm = %cr.name(), "Adding reverse proxy module");
            cr.spec.modules.push(Module {
                name: ModuleType::ReverseProxy,
                enabled: true,
                force_remove_module: true,
                ..Default::default()
            });
        }
    }
}

/// TLS secret configured on the reverse proxy component
pub fn reverse_proxy_tls_secret(cr: &ContainerStorageModule) -> String {
    cr.module(ModuleType::ReverseProxy)
        .and_then(|m| m.component(REVERSE_PROXY_COMPONENT))
        .and_then(|c| c.env(REVERSE_PROXY_TLS_SECRET_ENV))
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_REVERSE_PROXY_TLS_SECRET)
        .to_string()
}

pub fn substitutions(cr: &ContainerStorageModule, file_type: FileType) -> Vec<Substitution> {
    vec![
        env_substitution(cr, file_type, "<X_CSI_MANAGED_ARRAYS>", "X_CSI_MANAGED_ARRAYS", ""),
        env_substitution(cr, file_type, "<X_CSI_POWERMAX_ENDPOINT>", "X_CSI_POWERMAX_ENDPOINT", ""),
        env_substitution(cr, file_type, "<X_CSI_K8S_CLUSTER_PREFIX>", "X_CSI_K8S_CLUSTER_PREFIX", "CSM"),
        env_substitution(cr, file_type, "<X_CSI_POWERMAX_DEBUG>", "X_CSI_POWERMAX_DEBUG", "false"),
        env_substitution(cr, file_type, "<X_CSI_POWERMAX_PORTGROUPS>", "X_CSI_POWERMAX_PORTGROUPS", ""),
        env_substitution(cr, file_type, "<X_CSI_TRANSPORT_PROTOCOL>", "X_CSI_TRANSPORT_PROTOCOL", ""),
        env_substitution(cr, file_type, "<X_CSI_IG_NODENAME_TEMPLATE>", "X_CSI_IG_NODENAME_TEMPLATE", ""),
        env_substitution(cr, file_type, "<X_CSI_IG_MODIFY_HOSTNAME>", "X_CSI_IG_MODIFY_HOSTNAME", "false"),
        env_substitution(cr, file_type, "<X_CSI_HEALTH_MONITOR_ENABLED>", "X_CSI_HEALTH_MONITOR_ENABLED", "false"),
        env_substitution(cr, file_type, "<X_CSI_TOPOLOGY_CONTROL_ENABLED>", "X_CSI_TOPOLOGY_CONTROL_ENABLED", "false"),
        env_substitution(cr, file_type, "<X_CSI_VSPHERE_ENABLED>", "X_CSI_VSPHERE_ENABLED", "false"),
        env_substitution(cr, file_type, "<X_CSI_VSPHERE_PORTGROUP>", "X_CSI_VSPHERE_PORTGROUP", ""),
        env_substitution(cr, file_type, "<X_CSI_VSPHERE_HOSTNAME>", "X_CSI_VSPHERE_HOSTNAME", ""),
        env_substitution(cr, file_type, "<X_CSI_VCENTER_HOST>", "X_CSI_VCENTER_HOST", ""),
        env_substitution(cr, file_type, "<X_CSI_POWERMAX_ISCSI_ENABLE_CHAP>", "X_CSI_POWERMAX_ISCSI_ENABLE_CHAP", "false"),
        Substitution::text("<X_CSI_REVPROXY_TLS_SECRET>", reverse_proxy_tls_secret(cr)),
    ]
}
