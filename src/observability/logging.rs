//! # Structured Logging
//!
//! Subscriber setup and span macros built on the tracing ecosystem.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the configured
//! log level. JSON output is meant for log shippers; the default is the
//! human readable formatter.

use crate::config::{AppConfig, ObservabilityConfig};
use crate::errors::{BrokerError, Result};
use tracing_subscriber::EnvFilter;

/// Create a tracing span for a broker operation.
///
/// ```rust,ignore
/// let span = broker_span!("provision", "instance-1");
/// let span = broker_span!("bind", "instance-1", binding_id = "binding-1");
/// ```
#[macro_export]
macro_rules! broker_span {
    ($operation:expr, $instance_id:expr) => {
        tracing::info_span!(
            "broker_operation",
            operation = %$operation,
            instance_id = %$instance_id,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $instance_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "broker_operation",
            operation = %$operation,
            instance_id = %$instance_id,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for registry database operations.
///
/// ```rust,ignore
/// let span = db_span!("rotate_key", users = 12);
/// ```
#[macro_export]
macro_rules! db_span {
    ($operation:expr) => {
        tracing::debug_span!(
            "db_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "db_operation",
            operation = %$operation,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Build the level filter for `config`
pub fn env_filter(config: &ObservabilityConfig) -> Result<EnvFilter> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return Ok(EnvFilter::from_default_env());
    }

    EnvFilter::try_new(&config.log_level).map_err(|e| {
        BrokerError::config(format!("Invalid log level '{}': {}", config.log_level, e))
    })
}

/// Install the global subscriber.
///
/// A subscriber that is already installed (integration tests, embedding
/// applications) is left in place.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let installed = if config.json_logs {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };

    if installed.is_err() {
        tracing::debug!("Global subscriber already set; keeping it");
    }
    Ok(())
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        region = %config.broker.region,
        db_prefix = %config.broker.db_prefix,
        registry_sqlite = config.database.is_sqlite(),
        shared_postgres = config.shared_postgres.is_some(),
        shared_mysql = config.shared_mysql.is_some(),
        services = config.catalog.services.len(),
        "RDS broker configuration"
    );
}
