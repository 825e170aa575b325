//! # RDS Broker
//!
//! A service broker that provisions managed relational databases for a
//! platform's tenants. Dedicated plans get their own cloud database instance
//! (or Aurora cluster); shared plans get a database on a long-lived server.
//!
//! ## Architecture
//!
//! ```text
//! Broker API caller → RdsBroker → Cloud provider (instances, clusters)
//!                        ↓    ↘
//!                    Registry   SQL engines (PostgreSQL, MySQL)
//!                  (SQLite, encrypted passwords)
//! ```
//!
//! The broker holds no state of its own between calls. Every instance, user
//! and binding lives in the registry, with passwords sealed by AES-256-GCM.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use rds_broker::{config::load_config, RdsBroker};
//!
//! let config = load_config(Some("broker.yml".as_ref()))?;
//! let broker = RdsBroker::from_config(&config, cloud_providers).await?;
//! let response = broker.provision("instance-1", &details, true).await?;
//! ```

pub mod broker;
pub mod catalog;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod errors;
pub mod observability;
pub mod registry;
pub mod sqlengine;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use broker::{CloudProviders, OperationResponse, RdsBroker};
pub use config::AppConfig;
pub use errors::{BrokerError, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
