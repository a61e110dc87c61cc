//! Error types shared by transport clients.

use thiserror::Error;

/// Error type for bot API calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The bot is not connected.
    #[error("bot is not connected")]
    NotConnected,
    /// The API call timed out.
    #[error("API call timed out")]
    Timeout,
    /// The API returned an error.
    #[error("API error ({retcode}): {message}")]
    Failed { retcode: i64, message: String },
    /// Failed to serialize/deserialize.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The event does not carry enough information to address a reply.
    #[error("missing session info")]
    MissingSession,
    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;
