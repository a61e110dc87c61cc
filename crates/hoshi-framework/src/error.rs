//! Error types for the hoshi framework.

use std::path::PathBuf;

use thiserror::Error;

/// Returned by a matcher's filter when an event does **not** match.
///
/// The dispatcher recognises this error and silently moves on to the next
/// matcher. All other errors are treated as genuine failures.
#[derive(Debug, Clone, Error)]
#[error("event skipped by filter")]
pub struct EventSkipped;

/// Errors that can occur while extracting handler parameters.
#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    /// The requested state slot was never written for this dispatch.
    #[error("state '{0}' is not available")]
    MissingState(&'static str),

    /// The named argument has not been collected yet.
    #[error("argument '{0}' is not available")]
    MissingArg(String),

    /// The event does not carry the requested data.
    #[error("event has no {0}")]
    MissingField(&'static str),

    /// Custom extraction error.
    #[error("{0}")]
    Custom(String),
}

impl ExtractError {
    /// Creates a custom extraction error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Result type for extraction operations.
pub type ExtractResult<T> = Result<T, ExtractError>;

/// Errors raised by a [`ServiceStore`](crate::store::ServiceStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading or writing a record failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record exists but cannot be decoded.
    #[error("malformed record {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration errors raised while registering a service.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The name is empty, purely numeric, or contains a reserved character.
    #[error(
        "invalid service name '{0}': must be non-empty, not purely numeric and free of \\ / : * ? \" < > | . ! ！"
    )]
    InvalidName(String),

    /// `manage_perm` is not one of ADMIN, OWNER or SUPERUSER.
    #[error("illegal manage permission {perm} for service '{name}'")]
    IllegalPermission { name: String, perm: String },

    /// A service with the same name is already registered.
    #[error("service '{0}' already exists")]
    Duplicate(String),

    /// The persisted group sets could not be loaded.
    #[error("failed to load service '{name}': {source}")]
    Store {
        name: String,
        #[source]
        source: StoreError,
    },
}
