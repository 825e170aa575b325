//! # Cloud Database Provider
//!
//! Logical contract of the managed-database service the broker provisions
//! against. Transport and SDK details live behind these traits; the broker
//! only relies on create/modify/delete/describe and on
//! [`ProviderError::DoesNotExist`] to recognise resources that are gone.

pub mod error;
pub mod types;

pub use error::{ProviderError, Result};
pub use types::{
    DbClusterDescription, DbClusterDetails, DbInstanceDescription, DbInstanceDetails,
    MasterPassword,
};

use async_trait::async_trait;

/// DB instance lifecycle operations
#[async_trait]
pub trait DbInstanceProvider: Send + Sync {
    async fn create(&self, identifier: &str, details: &DbInstanceDetails) -> Result<()>;

    async fn modify(
        &self,
        identifier: &str,
        details: &DbInstanceDetails,
        apply_immediately: bool,
    ) -> Result<()>;

    async fn delete(&self, identifier: &str, skip_final_snapshot: bool) -> Result<()>;

    /// Current status and connection endpoint
    ///
    /// # Errors
    ///
    /// [`ProviderError::DoesNotExist`] when the instance is unknown.
    async fn describe(&self, identifier: &str) -> Result<DbInstanceDescription>;
}

/// DB cluster lifecycle operations for cluster-style engines
#[async_trait]
pub trait DbClusterProvider: Send + Sync {
    async fn create(&self, identifier: &str, details: &DbClusterDetails) -> Result<()>;

    async fn modify(
        &self,
        identifier: &str,
        details: &DbClusterDetails,
        apply_immediately: bool,
    ) -> Result<()>;

    async fn delete(&self, identifier: &str, skip_final_snapshot: bool) -> Result<()>;

    async fn describe(&self, identifier: &str) -> Result<DbClusterDescription>;
}
