//! PowerScale (isilon) driver

use super::common::{
    check_cert_secrets, check_secret, check_upgrade_path, env_substitution, SecretLookupPolicy,
    Substitution,
};
use super::FileType;
use crate::config::OperatorConfig;
use crate::crd::ContainerStorageModule;
use crate::domain::ports::ClusterClient;
use crate::error::Result;

pub const SKIP_CERTIFICATE_VALIDATION: &str = "X_CSI_ISI_SKIP_CERTIFICATE_VALIDATION";

pub const SECRET_POLICY: SecretLookupPolicy = SecretLookupPolicy::LogAndContinue;

const DEFAULT_FS_GROUP_POLICY: &str = "ReadWriteOnceWithFSType";

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
    let csi_driver = &cr.spec.driver.csi_driver_spec;
    let fs_group_policy = if csi_driver.fs_group_policy.is_empty() {
        DEFAULT_FS_GROUP_POLICY
    } else {
        csi_driver.fs_group_policy.as_str()
    };

    vec![
        env_substitution(cr, file_type, "<X_CSI_MAX_VOLUMES_PER_NODE>", "X_CSI_MAX_VOLUMES_PER_NODE", "0"),
        env_substitution(cr, file_type, "<X_CSI_HEALTH_MONITOR_ENABLED>", "X_CSI_HEALTH_MONITOR_ENABLED", "false"),
        env_substitution(cr, file_type, "<X_CSI_DEBUG>", "X_CSI_DEBUG", "true"),
        env_substitution(cr, file_type, "<CERT_SECRET_COUNT>", "CERT_SECRET_COUNT", "1"),
        env_substitution(cr, file_type, "<X_CSI_ISI_SKIP_CERTIFICATE_VALIDATION>", SKIP_CERTIFICATE_VALIDATION, "true"),
        Substitution::text("<FSGROUP_POLICY>", fs_group_policy),
        Substitution::typed("<STORAGE_CAPACITY>", csi_driver.storage_capacity.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ContainerStorageModuleSpec, Driver, DriverType, EnvVar};

    fn value_of(subs: &[Substitution], token: &str) -> String {
        subs.iter()
            .find(|s| s.token == token)
            .map(|s| s.value.clone())
            .unwrap_or_default()
    }

    #[test]
    fn test_health_monitor_is_scoped() {
        let mut cr = ContainerStorageModule::new(
            "isilon",
            ContainerStorageModuleSpec {
                driver: Driver {
                    csi_driver_type: DriverType::PowerScale,
                    config_version: "v2.12.0".into(),
                    ..Default::default()
                },
                modules: vec![],
            },
        );
        cr.spec.driver.controller.envs = vec![EnvVar::new("X_CSI_HEALTH_MONITOR_ENABLED", "true")];

        let controller = substitutions(&cr, FileType::Controller);
        let node = substitutions(&cr, FileType::Node);
        assert_eq!(value_of(&controller, "<X_CSI_HEALTH_MONITOR_ENABLED>"), "true");
        assert_eq!(value_of(&node, "<X_CSI_HEALTH_MONITOR_ENABLED>"), "false");
        assert_eq!(value_of(&node, "<FSGROUP_POLICY>"), DEFAULT_FS_GROUP_POLICY);
        assert_eq!(value_of(&node, "<STORAGE_CAPACITY>"), "false");
    }
}
