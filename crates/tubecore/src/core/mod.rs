//! Core utilities, configuration, and common functionality

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod validation;

// Re-exports for convenience
pub use config::Config;
pub use error::{MediaError, MediaResult};
pub use logging::{init_logger, log_startup_configuration};
