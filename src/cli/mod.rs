//! # Command Line Interface
//!
//! Operator commands for the registry: key rotation, password inspection,
//! configuration checks and schema migrations.

use crate::config::{load_config, AppConfig};
use crate::crypto::EncryptionKey;
use crate::observability::{init_logging, log_config_info};
use crate::registry::Registry;
use crate::storage::{
    create_pool, get_migration_version, list_applied_migrations, run_db_migrations,
    validate_migrations, DbPool,
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Instrument;

/// Environment variable holding the hex key rotation decrypts with
pub const OLD_KEY_ENV: &str = "RDSBROKER_ENCRYPTION_KEY_OLD";

#[derive(Parser)]
#[command(name = "rds-broker-cli")]
#[command(about = "RDS service broker operator tooling")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the YAML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Re-encrypt every stored password under the configured key
    RotateKey {
        /// Stop at the first user that fails to rotate
        #[arg(long)]
        fail_fast: bool,
    },

    /// Print the decrypted credentials of an instance's users
    DecryptPassword {
        /// Broker instance ID
        #[arg(long)]
        instance: String,
    },

    /// Load and validate configuration and catalog
    CheckConfig,

    /// Registry database management commands
    Database {
        #[command(subcommand)]
        command: DatabaseCommands,
    },
}

#[derive(Subcommand)]
pub enum DatabaseCommands {
    /// Run pending migrations
    Migrate,

    /// Show migration status
    Status,
}

/// Run CLI commands
pub async fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // A missing .env file is normal outside development.
    let _ = dotenvy::dotenv();

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;

    let mut observability = config.observability.clone();
    if cli.verbose {
        observability.log_level = "debug".to_string();
    }
    init_logging(&observability)?;

    match cli.command {
        Commands::RotateKey { fail_fast } => rotate_key(&config, fail_fast).await?,
        Commands::DecryptPassword { instance } => decrypt_password(&config, &instance).await?,
        Commands::CheckConfig => check_config(&config),
        Commands::Database { command } => handle_database_command(command, &config).await?,
    }

    Ok(())
}

async fn connect(config: &AppConfig) -> anyhow::Result<DbPool> {
    create_pool(&config.database)
        .await
        .with_context(|| format!("Failed to open registry database {}", config.database.url))
}

async fn rotate_key(config: &AppConfig, fail_fast: bool) -> anyhow::Result<()> {
    let old_hex = std::env::var(OLD_KEY_ENV)
        .with_context(|| format!("{} must be set to the current encryption key", OLD_KEY_ENV))?;
    let old_key = EncryptionKey::from_hex(old_hex.trim())
        .with_context(|| format!("{} is not a valid key", OLD_KEY_ENV))?;
    let new_key = config.encryption_key()?;

    let registry = Registry::new(connect(config).await?);
    let rotated = registry.rotate_key(&old_key, &new_key, fail_fast).await?;

    println!("Rotated {} passwords", rotated);
    Ok(())
}

async fn decrypt_password(config: &AppConfig, instance_id: &str) -> anyhow::Result<()> {
    let key = config.encryption_key()?;
    let registry = Registry::new(connect(config).await?);

    let span = crate::broker_span!("decrypt_password", instance_id);
    let instance = registry.get_instance(instance_id).instrument(span).await?;

    println!("{:<10} {:<26} PASSWORD", "TYPE", "USERNAME");
    for user in &instance.users {
        let password = user
            .password(&key)
            .with_context(|| format!("Failed to decrypt password of '{}'", user.username))?;
        println!("{:<10} {:<26} {}", user.user_type, user.username, password);
    }
    Ok(())
}

fn check_config(config: &AppConfig) {
    log_config_info(config);

    println!("Configuration is valid");
    println!("  region:    {}", config.broker.region);
    println!("  db_prefix: {}", config.broker.db_prefix);
    for service in &config.catalog.services {
        println!("  service {} ({} plans)", service.id, service.plans.len());
        for plan in &service.plans {
            let kind = if plan.is_shared() { "shared" } else { "dedicated" };
            println!("    plan {} [{} {}]", plan.id, plan.rds_properties.engine, kind);
        }
    }
}

async fn handle_database_command(command: DatabaseCommands, config: &AppConfig) -> anyhow::Result<()> {
    let pool = connect(config).await?;

    match command {
        DatabaseCommands::Migrate => {
            println!("Running registry migrations...");
            run_db_migrations(&pool).await?;
            println!("Migrations completed successfully!");
        }
        DatabaseCommands::Status => {
            let version = get_migration_version(&pool).await?;
            let valid = validate_migrations(&pool).await?;
            println!("Current migration version: {}", version);
            println!("Schema {}", if valid { "is up to date" } else { "has pending or unknown migrations" });

            for migration in list_applied_migrations(&pool).await? {
                println!(
                    "  {} {} ({} ms, {})",
                    migration.version,
                    migration.description,
                    migration.execution_time,
                    migration.installed_on.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    }

    Ok(())
}
