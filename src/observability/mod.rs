//! # Observability
//!
//! Structured logging for the broker and its command line tools.

pub mod logging;

pub use logging::{init_logging, log_config_info};
