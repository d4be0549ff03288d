//! Authorization module
//!
//! The sidecar needs the proxy config and the tenant tokens in the driver
//! namespace before it can start.

use crate::crd::ContainerStorageModule;
use crate::domain::ports::ClusterClient;
use crate::drivers::common::{check_secret, SecretLookupPolicy};
use crate::error::Result;

pub const CONFIG_SECRET: &str = "karavi-authorization-config";
pub const TOKENS_SECRET: &str = "proxy-authz-tokens";

pub async fn precheck(cr: &ContainerStorageModule, client: &dyn ClusterClient) -> Result<()> {
    for name in [CONFIG_SECRET, TOKENS_SECRET] {
        check_secret(cr, client, name, SecretLookupPolicy::Fatal).await?;
    }
    Ok(())
}
