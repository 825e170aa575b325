//! Errors reported by a cloud database provider.

use crate::errors::BrokerError;
use thiserror::Error;

/// Result type for provider calls.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Failure of a provider call.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The instance or cluster is unknown to the provider.
    #[error("DB resource '{identifier}' does not exist")]
    DoesNotExist { identifier: String },

    /// Any other provider failure, passed through opaquely.
    #[error("{message}")]
    Api {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ProviderError {
    pub fn does_not_exist(identifier: impl Into<String>) -> Self {
        Self::DoesNotExist { identifier: identifier.into() }
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::Api { message: message.into(), source: None }
    }

    pub fn is_does_not_exist(&self) -> bool {
        matches!(self, Self::DoesNotExist { .. })
    }
}

impl From<ProviderError> for BrokerError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::DoesNotExist { .. } => BrokerError::InstanceDoesNotExist,
            ProviderError::Api { message, source } => BrokerError::Provider { message, source },
        }
    }
}
