//! # Hoshi Framework
//!
//! Service registry, rule engine and dispatch pipeline for the hoshi bot
//! host.
//!
//! This layer provides:
//! - Services that can be switched on and off per group, with persisted state
//! - `on_command` / `on_keyword` / `on_regex` / ... matcher registration
//! - Axum-style handlers with [`FromContext`] extractors
//! - Suspendable handler chains (`got`, `receive`, `reject`, `pause`)
//! - A priority-ordered [`EventDispatcher`] built from tower services
//! - Rate-limited broadcast to every group where a service is enabled
//! - Built-in `lssv` / `enable` / `disable` management commands
//!
//! ```rust,ignore
//! use hoshi_framework::prelude::*;
//!
//! let registry = Arc::new(ServiceRegistry::new(store, bots));
//! let sv = registry.register(ServiceOptions::new("echo"))?;
//! sv.on_command("echo", (), MatchOptions::default())
//!     .handle(|CommandArg(arg): CommandArg| async move { arg });
//!
//! let dispatcher = EventDispatcher::new(Arc::clone(registry.matcher_table()), settings);
//! dispatcher.add_hook(Arc::new(ServiceTracer::new(Arc::clone(registry.matcher_table()))));
//! ```

pub mod chain;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod extractor;
pub mod handler;
pub mod manager;
pub mod matcher;
pub mod permission;
pub mod rule;
pub mod service;
pub mod session;
pub mod store;
pub mod tracer;
pub mod wrapper;

#[cfg(test)]
mod testing;

pub use chain::{ArgParser, ChainOutcome, Step};
pub use context::{CommandMatch, EventContext, HandlerContext, State};
pub use dispatcher::{DispatchHook, DispatchSettings, DispatchSummary, EventDispatcher};
pub use error::{EventSkipped, ExtractError, ExtractResult, ServiceError, StoreError};
pub use extractor::{Argv, CommandArg, FromContext, GroupId, Matched, PlainText, RegexMatch, UserId};
pub use handler::{BoxedHandler, Flow, Handler, IntoFlow, into_handler};
pub use manager::{MANAGER_SERVICE, register_service_manager};
pub use matcher::{Matcher, MatcherDescriptor, MatcherId, MatcherKind, MatcherTable};
pub use permission::{Level, Permission, Scope};
pub use rule::{BoxedRule, Rule, RuleExt};
pub use service::{BroadcastReport, IntoMessages, Service, ServiceOptions, ServiceRegistry};
pub use session::{SessionKey, SessionStore};
pub use store::{JsonFileStore, MemoryStore, ServiceConfig, ServiceRecord, ServiceStore};
pub use tracer::ServiceTracer;
pub use wrapper::{IntoStringSet, MatchOptions, MatcherWrapper};

#[cfg(feature = "shell")]
pub use extractor::ShellArgs;

/// Commonly used items.
pub mod prelude {
    pub use std::sync::Arc;

    pub use tower::BoxError;

    pub use crate::{
        Argv, CommandArg, Flow, GroupId, HandlerContext, Level, MatchOptions, Matched, Permission,
        PlainText, RegexMatch, Service, ServiceOptions, ServiceRegistry, UserId,
    };

    #[cfg(feature = "shell")]
    pub use crate::ShellArgs;
}
