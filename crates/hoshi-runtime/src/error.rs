//! Runtime error types.

use hoshi_framework::{ServiceError, StoreError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building or running the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The service store could not be opened.
    #[error("Service store error: {0}")]
    Store(#[from] StoreError),

    /// A service failed to register.
    #[error("Service registration failed: {0}")]
    Service(#[from] ServiceError),

    /// Shutdown signal handlers could not be installed.
    #[error("Failed to listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
