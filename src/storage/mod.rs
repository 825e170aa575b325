//! # Storage and Persistence
//!
//! SQLite-backed persistence for the instance/user/binding registry.

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use crate::config::DatabaseConfig;

pub use migrations::{
    get_migration_version, list_applied_migrations, run_migrations as run_db_migrations,
    validate_migrations, MigrationInfo,
};
pub use pool::{create_pool, DbPool};
pub use repositories::{BindingRepository, InstanceRepository, UserRepository};
