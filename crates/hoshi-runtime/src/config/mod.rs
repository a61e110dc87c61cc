//! Layered configuration for the hoshi runtime.
//!
//! Defaults, TOML/YAML files and `HOSHI_` environment variables are merged
//! with figment into a [`HoshiConfig`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BotConfig, HoshiConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    SpanEventConfig, StorageConfig,
};
pub use validation::validate_config;
