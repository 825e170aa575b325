//! # Configuration Settings
//!
//! Defines the configuration structure for the RDS broker.

use crate::catalog::{Catalog, Engine};
use crate::crypto::EncryptionKey;
use crate::errors::{BrokerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct AppConfig {
    #[validate(nested)]
    pub broker: BrokerConfig,

    /// Registry database
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Long-lived engine hosting shared PostgreSQL plans
    pub shared_postgres: Option<SharedDbConfig>,

    /// Long-lived engine hosting shared MySQL plans
    pub shared_mysql: Option<SharedDbConfig>,

    pub encryption: EncryptionConfig,

    #[validate(nested)]
    pub observability: ObservabilityConfig,

    pub catalog: Catalog,

    /// Values injected into every plan after loading
    pub plan_defaults: PlanDefaults,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(BrokerError::from)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        for shared in [&self.shared_postgres, &self.shared_mysql].into_iter().flatten() {
            Validate::validate(shared).map_err(BrokerError::from)?;
        }

        self.encryption_key()?;
        self.catalog.validate()?;

        for service in &self.catalog.services {
            for plan in service.plans.iter().filter(|plan| plan.is_shared()) {
                let engine = plan.engine()?;
                if self.shared_engine(engine).is_none() {
                    return Err(BrokerError::config(format!(
                        "Plan '{}' is shared on engine '{}' but no shared_{} connection is configured",
                        plan.id, engine, engine
                    )));
                }
            }
        }

        Ok(())
    }

    /// Decode the configured encryption key
    pub fn encryption_key(&self) -> Result<EncryptionKey> {
        EncryptionKey::from_hex(&self.encryption.key_hex).map_err(|e| {
            BrokerError::config(format!("encryption.key_hex must be 64 hex characters: {}", e))
        })
    }

    /// Shared engine connection settings for an engine, if configured
    pub fn shared_engine(&self, engine: Engine) -> Option<&SharedDbConfig> {
        match engine {
            Engine::Postgres => self.shared_postgres.as_ref(),
            Engine::MySql => self.shared_mysql.as_ref(),
            Engine::Aurora | Engine::MariaDb => None,
        }
    }

    /// Apply [`PlanDefaults`] to every dedicated plan in the catalog
    pub fn apply_plan_defaults(&mut self) {
        let defaults = &self.plan_defaults;
        for plan in self.catalog.services.iter_mut().flat_map(|service| service.plans.iter_mut()) {
            let props = &mut plan.rds_properties;
            if props.shared {
                continue;
            }
            if let Some(multi_az) = defaults.multi_az {
                props.multi_az = multi_az;
            }
            if let Some(subnet_group) = &defaults.db_subnet_group_name {
                props.db_subnet_group_name = subnet_group.clone();
            }
            let engine = props.engine.to_ascii_lowercase();
            if let Some(group) = defaults.vpc_security_group_ids.get(&engine) {
                if !props.vpc_security_group_ids.contains(group) {
                    props.vpc_security_group_ids.push(group.clone());
                }
            }
        }
    }
}

/// Broker behaviour
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BrokerConfig {
    /// Cloud region resources are created in
    #[validate(length(min = 1, message = "Region cannot be empty"))]
    pub region: String,

    /// Prefix of database names and cloud resource identifiers
    #[validate(length(min = 1, message = "DB prefix cannot be empty"))]
    pub db_prefix: String,

    pub allow_user_provision_parameters: bool,
    pub allow_user_update_parameters: bool,
    pub allow_user_bind_parameters: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            region: "ap-southeast-2".to_string(),
            db_prefix: "cf".to_string(),
            allow_user_provision_parameters: false,
            allow_user_update_parameters: false,
            allow_user_bind_parameters: false,
        }
    }
}

/// Registry database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    #[validate(range(min = 0, max = 50, message = "Min connections must be between 0 and 50"))]
    pub min_connections: u32,

    #[validate(range(min = 1, max = 60, message = "Connect timeout must be between 1 and 60 seconds"))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/rds-broker.db".to_string(),
            max_connections: 5,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Idle timeout, `None` when disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    pub fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite:")
    }
}

/// TLS mode for engine connections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    /// No TLS
    Disable,
    /// TLS without certificate verification
    #[default]
    Require,
    /// TLS with certificate and host verification
    VerifyFull,
}

impl fmt::Display for SslMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self {
            Self::Disable => "disable",
            Self::Require => "require",
            Self::VerifyFull => "verify-full",
        };
        write!(f, "{}", mode)
    }
}

/// Connection to a long-lived shared engine
#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct SharedDbConfig {
    #[validate(length(min = 1, message = "Shared engine host cannot be empty"))]
    pub host: String,

    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Database to connect to for administrative statements
    #[validate(length(min = 1, message = "Shared engine dbname cannot be empty"))]
    pub dbname: String,

    #[validate(length(min = 1, message = "Shared engine username cannot be empty"))]
    pub username: String,

    pub password: String,

    #[serde(default)]
    pub ssl_mode: SslMode,
}

impl fmt::Debug for SharedDbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedDbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Registry encryption key
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    /// 256-bit key as 64 hex characters
    pub key_hex: String,
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig").field("key_hex", &"[REDACTED]").finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logs: false }
    }
}

/// Deployment-wide values injected into every dedicated plan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanDefaults {
    pub multi_az: Option<bool>,
    pub db_subnet_group_name: Option<String>,
    /// VPC security group added to plans of each engine, keyed by engine name
    pub vpc_security_group_ids: BTreeMap<String, String>,
}
