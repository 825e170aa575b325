//! # Configuration Management
//!
//! Loads [`AppConfig`] from an optional YAML file layered under environment
//! variables prefixed with `RDSBROKER` (nested keys separated by `__`, e.g.
//! `RDSBROKER_BROKER__DB_PREFIX`).

pub mod settings;

pub use settings::{
    AppConfig, BrokerConfig, DatabaseConfig, EncryptionConfig, ObservabilityConfig, PlanDefaults,
    SharedDbConfig, SslMode,
};

use crate::errors::Result;
use std::path::Path;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "RDSBROKER";

/// Load, post-process and validate configuration
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).format(config::FileFormat::Yaml));
    }

    let mut app_config: AppConfig = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    app_config.apply_plan_defaults();
    app_config.validate()?;

    tracing::debug!(
        region = %app_config.broker.region,
        db_prefix = %app_config.broker.db_prefix,
        services = app_config.catalog.services.len(),
        "Configuration loaded"
    );

    Ok(app_config)
}
