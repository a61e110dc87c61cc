//! # Hoshi
//!
//! A chat bot host organised around *services*: named units of plugin
//! functionality that group admins switch on and off per group.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌────────────────────────────┐
//! │   Adapter   │────▶│ EventDispatcher │────▶│ priority 1: Matcher, ...   │──▶ handler chain
//! │   (Bot)     │     │  (sessions)     │────▶│ priority 5: Matcher, ...   │──▶ handler chain
//! └─────────────┘     └─────────────────┘     └────────────────────────────┘
//!                                                   ▲ registered by
//!                                              Service "pcr", Service "echo", ...
//! ```
//!
//! - **Runtime**: configuration, logging, store and bot lifecycle
//! - **Services**: named, persisted per-group enable state and a manage permission
//! - **Matchers**: `on_command`, `on_keyword`, `on_regex`, ... guarded by the
//!   service's group switch
//! - **Handlers**: Axum-style async functions with extractors, chained with
//!   `got` / `receive` and able to suspend for the user's next message
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hoshi::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = HoshiRuntime::builder().build()?;
//!
//!     let sv = runtime.registry().register(ServiceOptions::new("weather"))?;
//!     sv.on_command("weather", ["天气"], MatchOptions::default())
//!         .got("city", Some("Which city?".into()), |ctx: Arc<HandlerContext>| async move {
//!             let city = ctx.arg("city").unwrap_or_default();
//!             ctx.finish(format!("Sunny in {city}")).await
//!         });
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `yaml-config`: accept `hoshi.yaml` besides `hoshi.toml`
//! - `json-log`: JSON log lines

pub use hoshi_core as core;
pub use hoshi_framework as framework;
pub use hoshi_runtime as runtime;

/// Commonly used types for writing services.
///
/// ```rust,ignore
/// use hoshi::prelude::*;
/// ```
pub mod prelude {
    pub use hoshi_framework::prelude::*;

    // Runtime - main entry point
    pub use hoshi_runtime::{HoshiConfig, HoshiRuntime};

    // Matcher registration and chain control
    pub use hoshi_framework::{MatcherWrapper, Rule, RuleExt};

    // Bot and event types used inside handlers
    pub use hoshi_core::{BoxedBot, ChatEvent, Event, Message, Segment};
}
