//! PowerFlex (vxflexos) driver

use super::common::{check_secret, check_upgrade_path, env_substitution, SecretLookupPolicy, Substitution};
use super::FileType;
use crate::config::OperatorConfig;
use crate::crd::ContainerStorageModule;
use crate::domain::ports::ClusterClient;
use crate::error::Result;

pub const SECRET_POLICY: SecretLookupPolicy = SecretLookupPolicy::Fatal;

pub async fn precheck(
    cr: &ContainerStorageModule,
    config: &OperatorConfig,
    client: &dyn ClusterClient,
) -> Result<()> {
    check_upgrade_path(cr, config, client).await?;
    check_secret(cr, client, &super::secret_name(cr), SECRET_POLICY).await
}

pub fn substitutions(cr: &ContainerStorageModule, file_type: FileType) -> Vec<Substitution> {
    vec![
        env_substitution(cr, file_type, "<X_CSI_SDC_ENABLED>", "X_CSI_SDC_ENABLED", "true"),
        env_substitution(cr, file_type, "<X_CSI_APPROVE_SDC_ENABLED>", "X_CSI_APPROVE_SDC_ENABLED", "false"),
        env_substitution(cr, file_type, "<X_CSI_RENAME_SDC_ENABLED>", "X_CSI_RENAME_SDC_ENABLED", "false"),
        env_substitution(cr, file_type, "<X_CSI_RENAME_SDC_PREFIX>", "X_CSI_RENAME_SDC_PREFIX", ""),
        env_substitution(cr, file_type, "<X_CSI_MAX_VOLUMES_PER_NODE>", "X_CSI_MAX_VOLUMES_PER_NODE", "0"),
        env_substitution(cr, file_type, "<X_CSI_QUOTA_ENABLED>", "X_CSI_QUOTA_ENABLED", "false"),
        env_substitution(cr, file_type, "<X_CSI_POWERFLEX_EXTERNAL_ACCESS>", "X_CSI_POWERFLEX_EXTERNAL_ACCESS", ""),
        env_substitution(cr, file_type, "<X_CSI_HEALTH_MONITOR_ENABLED>", "X_CSI_HEALTH_MONITOR_ENABLED", "false"),
        env_substitution(cr, file_type, "<X_CSI_DEBUG>", "X_CSI_DEBUG", "true"),
    ]
}
