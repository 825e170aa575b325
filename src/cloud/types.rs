//! Resource descriptions exchanged with a cloud database provider.
//!
//! `None`, `false` and empty collections mean "leave at the provider's
//! default" on create and "leave unchanged" on modify.

use std::collections::BTreeMap;
use std::fmt;

/// A credential that never appears in `Debug` output
#[derive(Clone, PartialEq, Eq)]
pub struct MasterPassword(String);

impl MasterPassword {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MasterPassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// Settings for creating or modifying a DB instance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbInstanceDetails {
    pub db_instance_class: Option<String>,
    pub engine: Option<String>,
    pub engine_version: Option<String>,
    pub allocated_storage: Option<i64>,
    pub auto_minor_version_upgrade: bool,
    pub availability_zone: Option<String>,
    pub backup_retention_period: Option<i64>,
    pub character_set_name: Option<String>,
    pub copy_tags_to_snapshot: bool,
    pub db_cluster_identifier: Option<String>,
    pub db_name: Option<String>,
    pub db_parameter_group_name: Option<String>,
    pub db_security_groups: Vec<String>,
    pub db_subnet_group_name: Option<String>,
    pub iops: Option<i64>,
    pub kms_key_id: Option<String>,
    pub license_model: Option<String>,
    pub master_username: Option<String>,
    pub master_user_password: Option<MasterPassword>,
    pub multi_az: bool,
    pub option_group_name: Option<String>,
    pub port: Option<i64>,
    pub preferred_backup_window: Option<String>,
    pub preferred_maintenance_window: Option<String>,
    pub publicly_accessible: bool,
    pub storage_encrypted: bool,
    pub storage_type: Option<String>,
    pub vpc_security_group_ids: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

/// Settings for creating or modifying a DB cluster
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbClusterDetails {
    pub engine: Option<String>,
    pub engine_version: Option<String>,
    pub availability_zones: Vec<String>,
    pub backup_retention_period: Option<i64>,
    pub database_name: Option<String>,
    pub db_cluster_parameter_group_name: Option<String>,
    pub db_subnet_group_name: Option<String>,
    pub master_username: Option<String>,
    pub master_user_password: Option<MasterPassword>,
    pub port: Option<i64>,
    pub preferred_backup_window: Option<String>,
    pub preferred_maintenance_window: Option<String>,
    pub vpc_security_group_ids: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

/// Observed state of a DB instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbInstanceDescription {
    pub status: String,
    pub address: String,
    pub port: u16,
    pub db_name: String,
    pub pending_modifications: bool,
}

/// Observed state of a DB cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DbClusterDescription {
    pub status: String,
    pub endpoint: String,
    pub port: u16,
    pub database_name: String,
    pub master_username: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_password_is_redacted() {
        let details = DbInstanceDetails {
            master_user_password: Some(MasterPassword::new("hunter2")),
            ..Default::default()
        };
        let rendered = format!("{:?}", details);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("[REDACTED]"));
        assert_eq!(details.master_user_password.unwrap().expose(), "hunter2");
    }
}
