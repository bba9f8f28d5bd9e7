//! Export set configurations for the lifecycle steps
//!
//! Each fixture is a complete typed configuration: the mount target
//! dependency plus the export set declaration, and for the query step the
//! export sets data source on top.

use file_storage_provider::client::LifecycleState;
use file_storage_provider::config::{
    Config, ConfigBuilder, ExportSetConfig, ExportSetsQueryConfig, FilterConfig, IdRef,
    MountTargetConfig,
};
use file_storage_provider::env::{env_setting_or, required_env_setting};

use crate::harness::HarnessError;

pub const EXPORT_SET: &str = "file_storage_export_set.test_export_set";
pub const EXPORT_SETS_QUERY: &str = "data.file_storage_export_sets.test_export_sets";

pub const MOUNT_TARGET: &str = "test_mount_target";
pub const MOUNT_TARGET_2: &str = "test_mount_target_2";

const DEFAULT_SUBNET_ID: &str = "ocid1.subnet.oc1.phx.acceptance";

/// Values the export set fixtures are parameterized with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSetVariables {
    pub availability_domain: String,
    pub display_name: String,
    pub max_bytes: u64,
    pub max_files: u64,
    pub state: LifecycleState,
}

impl Default for ExportSetVariables {
    fn default() -> Self {
        Self {
            availability_domain: "kIdk:PHX-AD-1".to_string(),
            display_name: "export set display name".to_string(),
            max_bytes: 23843202333,
            max_files: 223442,
            state: LifecycleState::Active,
        }
    }
}

impl ExportSetVariables {
    /// Variables of the step that moves the export set to a second mount target
    pub fn on_mount_target_2() -> Self {
        Self {
            display_name: "export set on mount target 2".to_string(),
            ..Self::default()
        }
    }
}

/// Scope shared by every fixture
#[derive(Debug, Clone)]
pub struct Fixtures {
    pub compartment_id: String,
    pub subnet_id: String,
}

impl Fixtures {
    pub fn new(compartment_id: impl Into<String>) -> Self {
        Self {
            compartment_id: compartment_id.into(),
            subnet_id: DEFAULT_SUBNET_ID.to_string(),
        }
    }

    /// Fixtures scoped by the compartment named in the `compartment_id_for_create` setting
    pub fn from_env() -> Result<Self, HarnessError> {
        Self::from_setting("compartment_id_for_create")
    }

    /// Fixtures scoped by the compartment in setting `name`; absence is a setup error
    pub fn from_setting(name: &str) -> Result<Self, HarnessError> {
        let compartment_id =
            required_env_setting(name).map_err(|e| HarnessError::Setup(e.into()))?;
        Ok(Self {
            compartment_id,
            subnet_id: env_setting_or("subnet_id", DEFAULT_SUBNET_ID),
        })
    }

    fn mount_target(&self, name: &str, vars: &ExportSetVariables) -> MountTargetConfig {
        MountTargetConfig {
            name: name.to_string(),
            compartment_id: self.compartment_id.clone(),
            availability_domain: vars.availability_domain.clone(),
            subnet_id: self.subnet_id.clone(),
            display_name: None,
            hostname_label: None,
            ip_address: None,
        }
    }

    /// The mount target every export set fixture depends on
    pub fn dependencies(&self, vars: &ExportSetVariables) -> ConfigBuilder {
        Config::builder().mount_target(self.mount_target(MOUNT_TARGET, vars))
    }

    /// Export set with only its mount target
    pub fn required_only(&self, vars: &ExportSetVariables) -> Config {
        self.dependencies(vars)
            .export_set(ExportSetConfig {
                name: "test_export_set".to_string(),
                mount_target: MOUNT_TARGET.to_string(),
                display_name: None,
                max_fs_stat_bytes: None,
                max_fs_stat_files: None,
            })
            .build()
    }

    /// Export set with every optional attribute
    pub fn full(&self, vars: &ExportSetVariables) -> Config {
        self.dependencies(vars)
            .export_set(self.export_set(MOUNT_TARGET, vars))
            .build()
    }

    /// A second mount target with the export set pointed at it
    pub fn force_new(&self, vars: &ExportSetVariables) -> Config {
        self.dependencies(vars)
            .mount_target(self.mount_target(MOUNT_TARGET_2, vars))
            .export_set(self.export_set(MOUNT_TARGET_2, vars))
            .build()
    }

    /// Full configuration plus a query narrowed to the mount target's export set
    pub fn query(&self, vars: &ExportSetVariables) -> Config {
        let export_set_id = IdRef::export_set_of(MOUNT_TARGET);
        Config::builder()
            .merge(self.full(vars))
            .export_set_query(ExportSetsQueryConfig {
                name: "test_export_sets".to_string(),
                compartment_id: self.compartment_id.clone(),
                availability_domain: vars.availability_domain.clone(),
                display_name: Some(vars.display_name.clone()),
                id: Some(export_set_id.clone()),
                state: Some(vars.state),
                filters: vec![FilterConfig {
                    name: "id".to_string(),
                    values: vec![export_set_id],
                    regex: false,
                }],
            })
            .build()
    }

    fn export_set(&self, mount_target: &str, vars: &ExportSetVariables) -> ExportSetConfig {
        ExportSetConfig {
            name: "test_export_set".to_string(),
            mount_target: mount_target.to_string(),
            display_name: Some(vars.display_name.clone()),
            max_fs_stat_bytes: Some(vars.max_bytes),
            max_fs_stat_files: Some(vars.max_files),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_validate() {
        let fixtures = Fixtures::new("ocid1.compartment.oc1..fixtures");
        let vars = ExportSetVariables::default();
        for config in [
            fixtures.required_only(&vars),
            fixtures.full(&vars),
            fixtures.force_new(&ExportSetVariables::on_mount_target_2()),
            fixtures.query(&vars),
        ] {
            config.validate().unwrap();
        }
    }

    #[test]
    fn test_force_new_points_at_second_mount_target() {
        let fixtures = Fixtures::new("ocid1.compartment.oc1..fixtures");
        let config = fixtures.force_new(&ExportSetVariables::on_mount_target_2());
        let export_set = config.export_set("test_export_set").unwrap();
        assert_eq!(export_set.mount_target, MOUNT_TARGET_2);
        assert_eq!(
            export_set.display_name.as_deref(),
            Some("export set on mount target 2")
        );
        assert_eq!(config.mount_targets.len(), 2);
    }

    #[test]
    fn test_missing_setting_is_a_setup_error() {
        let err = Fixtures::from_setting("compartment_id_never_configured").unwrap_err();
        assert!(matches!(err, HarnessError::Setup(_)));
    }
}
