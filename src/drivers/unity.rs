//! Unity driver

use super::common::{
    check_cert_secrets, check_secret, check_upgrade_path, env_substitution, SecretLookupPolicy,
    Substitution,
};
use super::FileType;
use crate::config::OperatorConfig;
use crate::crd::ContainerStorageModule;
use crate::domain::ports::ClusterClient;
use crate::error::Result;

pub const SKIP_CERTIFICATE_VALIDATION: &str = "X_CSI_UNITY_SKIP_CERTIFICATE_VALIDATION";

pub const SECRET_POLICY: SecretLookupPolicy = SecretLookupPolicy::LogAndContinue;

pub async fn precheck(
    cr: &ContainerStorageModule,
    config: &OperatorConfig,
    client: &dyn ClusterClient,
) -> Result<()> {
    check_upgrade_path(cr, config, client).await?;
    check_secret(cr, client, &super::secret_name(cr), SECRET_POLICY).await?;
    check_cert_secrets(cr, client, SKIP_CERTIFICATE_VALIDATION).await
}

pub fn substitutions(cr: &ContainerStorageModule, file_type: FileType) -> Vec<Substitution> {
    vec![
        env_substitution(cr, file_type, "<X_CSI_UNITY_NODENAME_PREFIX>", "X_CSI_UNITY_NODENAME_PREFIX", ""),
        env_substitution(cr, file_type, "<CSI_LOG_LEVEL>", "CSI_LOG_LEVEL", "INFO"),
        env_substitution(cr, file_type, "<X_CSI_UNITY_ALLOW_MULTI_POD_ACCESS>", "X_CSI_UNITY_ALLOW_MULTI_POD_ACCESS", "false"),
        env_substitution(cr, file_type, "<MAX_UNITY_VOLUMES_PER_NODE>", "MAX_UNITY_VOLUMES_PER_NODE", "0"),
        env_substitution(cr, file_type, "<SYNC_NODE_INFO_TIME_INTERVAL>", "SYNC_NODE_INFO_TIME_INTERVAL", "15"),
        env_substitution(cr, file_type, "<TENANT_NAME>", "TENANT_NAME", ""),
        env_substitution(cr, file_type, "<X_CSI_HEALTH_MONITOR_ENABLED>", "X_CSI_HEALTH_MONITOR_ENABLED", "false"),
    ]
}
