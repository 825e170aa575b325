//! # Error Handling
//!
//! Error types for the RDS broker. Every fallible operation in the crate
//! returns [`Result`], whose error side is the [`BrokerError`] taxonomy.

pub mod types;

pub use types::{BrokerError, Result};

/// Attach a human readable prefix to the error side of a result.
pub trait ErrorContext<T> {
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T> ErrorContext<T> for Result<T> {
    fn context<S: Into<String>>(self, context: S) -> Result<T> {
        self.map_err(|mut e| {
            e.add_context(context.into());
            e
        })
    }
}
