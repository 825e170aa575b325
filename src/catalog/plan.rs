//! Service plans and the RDS provisioning properties they carry.

use crate::errors::{BrokerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

/// Database engines the broker knows how to provision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    Aurora,
    MariaDb,
    MySql,
    Postgres,
}

impl Engine {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aurora => "aurora",
            Self::MariaDb => "mariadb",
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
        }
    }

    /// Cluster-style engines need a cluster resource with the instance attached
    pub fn is_cluster_style(&self) -> bool {
        matches!(self, Self::Aurora)
    }

    /// Engines a shared (multi-tenant) plan may use
    pub fn supports_shared(&self) -> bool {
        matches!(self, Self::MySql | Self::Postgres)
    }
}

impl FromStr for Engine {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "aurora" => Ok(Self::Aurora),
            "mariadb" => Ok(Self::MariaDb),
            "mysql" => Ok(Self::MySql),
            "postgres" => Ok(Self::Postgres),
            _ => Err(BrokerError::validation_field(
                format!("This broker does not support RDS engine '{}'", s),
                "engine",
            )),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicePlanMetadata {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bullets: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub costs: Vec<Cost>,
    #[serde(default, rename = "displayName", alias = "displayname", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    #[serde(default)]
    pub amount: std::collections::BTreeMap<String, f64>,
    #[serde(default)]
    pub unit: String,
}

/// A catalog plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ServicePlan {
    #[validate(length(min = 1, message = "Must provide a non-empty ID"))]
    pub id: String,

    #[validate(length(min = 1, message = "Must provide a non-empty Name"))]
    pub name: String,

    #[validate(length(min = 1, message = "Must provide a non-empty Description"))]
    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ServicePlanMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub free: Option<bool>,

    #[serde(default)]
    pub rds_properties: RdsProperties,
}

impl ServicePlan {
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(|e| {
            BrokerError::validation(format!("Plan '{}': {}", self.id, BrokerError::from(e)))
        })?;

        self.rds_properties.validate().map_err(|e| {
            BrokerError::validation(format!(
                "Validating RDS Properties configuration of plan '{}': {}",
                self.id, e
            ))
        })
    }

    pub fn is_shared(&self) -> bool {
        self.rds_properties.shared
    }

    /// Parsed engine of this plan
    pub fn engine(&self) -> Result<Engine> {
        self.rds_properties.engine.parse()
    }
}

/// Provisioning properties of a plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RdsProperties {
    pub db_instance_class: String,
    pub engine: String,
    pub engine_version: String,
    pub allocated_storage: i64,
    pub auto_minor_version_upgrade: bool,
    pub availability_zone: String,
    pub backup_retention_period: i64,
    pub character_set_name: String,
    pub db_parameter_group_name: String,
    pub db_cluster_parameter_group_name: String,
    pub db_security_groups: Vec<String>,
    pub db_subnet_group_name: String,
    pub license_model: String,
    pub multi_az: bool,
    pub option_group_name: String,
    pub port: i64,
    pub preferred_backup_window: String,
    pub preferred_maintenance_window: String,
    pub publicly_accessible: bool,
    pub storage_encrypted: bool,
    pub kms_key_id: String,
    pub storage_type: String,
    pub iops: i64,
    pub vpc_security_group_ids: Vec<String>,
    pub copy_tags_to_snapshot: bool,
    pub skip_final_snapshot: bool,
    pub shared: bool,
}

impl RdsProperties {
    pub fn validate(&self) -> Result<()> {
        if !self.shared && self.db_instance_class.is_empty() {
            return Err(BrokerError::validation_field(
                "Must provide a non-empty DBInstanceClass",
                "db_instance_class",
            ));
        }

        if self.engine.is_empty() {
            return Err(BrokerError::validation_field("Must provide a non-empty Engine", "engine"));
        }

        let engine: Engine = self.engine.parse()?;

        if self.shared && !engine.supports_shared() {
            return Err(BrokerError::validation_field(
                format!(
                    "This broker does not support RDS engine '{}' with a shared instance",
                    self.engine
                ),
                "engine",
            ));
        }

        Ok(())
    }

    /// True when the engine name denotes a cluster-style engine
    pub fn is_cluster_style(&self) -> bool {
        self.engine.parse::<Engine>().map(|e| e.is_cluster_style()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dedicated_properties() -> RdsProperties {
        RdsProperties {
            db_instance_class: "db.t2.micro".to_string(),
            engine: "postgres".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_engine_parsing_is_case_insensitive() {
        assert_eq!("Aurora".parse::<Engine>().unwrap(), Engine::Aurora);
        assert_eq!("MARIADB".parse::<Engine>().unwrap(), Engine::MariaDb);
        assert_eq!("postgres".parse::<Engine>().unwrap(), Engine::Postgres);
        assert!("oracle".parse::<Engine>().is_err());
    }

    #[test]
    fn test_valid_dedicated_properties() {
        assert!(dedicated_properties().validate().is_ok());
    }

    #[test]
    fn test_dedicated_requires_instance_class() {
        let props = RdsProperties { db_instance_class: String::new(), ..dedicated_properties() };
        assert!(props.validate().is_err());
    }

    #[test]
    fn test_shared_does_not_require_instance_class() {
        let props = RdsProperties {
            db_instance_class: String::new(),
            shared: true,
            ..dedicated_properties()
        };
        assert!(props.validate().is_ok());
    }

    #[test]
    fn test_shared_engine_allow_list() {
        let props = RdsProperties {
            engine: "aurora".to_string(),
            shared: true,
            ..dedicated_properties()
        };
        assert!(props.validate().is_err());

        let props = RdsProperties {
            engine: "mariadb".to_string(),
            shared: true,
            ..dedicated_properties()
        };
        assert!(props.validate().is_err());
    }

    #[test]
    fn test_unsupported_engine() {
        let props = RdsProperties { engine: "sqlserver".to_string(), ..dedicated_properties() };
        let err = props.validate().unwrap_err();
        assert!(err.to_string().contains("does not support RDS engine 'sqlserver'"));
    }

    #[test]
    fn test_plan_requires_non_empty_fields() {
        let plan = ServicePlan {
            id: "plan-1".to_string(),
            name: String::new(),
            description: "Small".to_string(),
            rds_properties: dedicated_properties(),
            ..Default::default()
        };
        let err = plan.validate().unwrap_err();
        assert!(err.to_string().contains("Must provide a non-empty Name"));
    }

    #[test]
    fn test_cluster_style_detection() {
        let props = RdsProperties { engine: "AURORA".to_string(), ..dedicated_properties() };
        assert!(props.is_cluster_style());
        assert!(!dedicated_properties().is_cluster_style());
    }
}
