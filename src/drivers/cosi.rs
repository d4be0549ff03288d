//! COSI driver
//!
//! Object storage provisioner; only the common tokens apply.

use super::common::{check_secret, check_upgrade_path, SecretLookupPolicy};
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
