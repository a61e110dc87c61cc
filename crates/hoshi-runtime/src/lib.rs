//! # Hoshi Runtime
//!
//! Wires the hoshi host together for an application:
//!
//! - Layered configuration (`hoshi.toml`, profiles, `HOSHI_*` variables)
//! - Logging setup (`LoggingBuilder`, file output with rotation)
//! - [`HoshiRuntime`]: service store, registry, dispatcher and bot lifecycle
//!
//! ```rust,ignore
//! use hoshi_runtime::HoshiRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = HoshiRuntime::builder().build()?;
//!     my_plugin::register(runtime.registry())?;
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{
    BotConfig, ConfigError, ConfigLoader, ConfigResult, HoshiConfig, LoggingConfig, StorageConfig,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{HoshiRuntime, RuntimeBuilder};

// Re-export tracing for use by plugin crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for plugin code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
