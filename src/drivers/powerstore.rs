//! PowerStore driver

use super::common::{
    check_cert_secrets, check_secret, check_upgrade_path, env_substitution, SecretLookupPolicy,
    Substitution,
};
use super::FileType;
use crate::config::OperatorConfig;
use crate::crd::ContainerStorageModule;
use crate::domain::ports::ClusterClient;
use crate::error::Result;

pub const SKIP_CERTIFICATE_VALIDATION: &str = "X_CSI_POWERSTORE_SKIP_CERTIFICATE_VALIDATION";

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
        env_substitution(cr, file_type, "<X_CSI_POWERSTORE_NODE_NAME_PREFIX>", "X_CSI_POWERSTORE_NODE_NAME_PREFIX", "csi-node"),
        env_substitution(cr, file_type, "<X_CSI_FC_PORTS_FILTER_FILE_PATH>", "X_CSI_FC_PORTS_FILTER_FILE_PATH", ""),
        env_substitution(cr, file_type, "<X_CSI_NFS_ACLS>", "X_CSI_NFS_ACLS", "0777"),
        env_substitution(cr, file_type, "<X_CSI_HEALTH_MONITOR_ENABLED>", "X_CSI_HEALTH_MONITOR_ENABLED", "false"),
        env_substitution(cr, file_type, "<X_CSI_POWERSTORE_ENABLE_CHAP>", "X_CSI_POWERSTORE_ENABLE_CHAP", "false"),
        env_substitution(cr, file_type, "<X_CSI_POWERSTORE_EXTERNAL_ACCESS>", "X_CSI_POWERSTORE_EXTERNAL_ACCESS", ""),
        Substitution::typed(
            "<STORAGE_CAPACITY>",
            cr.spec.driver.csi_driver_spec.storage_capacity.to_string(),
        ),
        env_substitution(cr, file_type, "<GOPOWERSTORE_DEBUG>", "GOPOWERSTORE_DEBUG", "false"),
    ]
}
