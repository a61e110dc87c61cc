//! Event dispatcher.
//!
//! [`EventDispatcher`] receives every inbound event and hands it to the
//! registered matchers:
//!
//! 1. A message from a conversation with a live session resumes that
//!    session's chain and is consumed by it.
//! 2. Otherwise the command (if any) is resolved once, and matchers are
//!    evaluated level by level in ascending priority, in registration order
//!    within a level.
//! 3. Each matcher runs as a tower stack:
//!
//! ```text
//! AsyncFilter<RulePredicate>   event type, permission, rule; EventSkipped on mismatch
//!   └─ HookService             DispatchHook::before / after
//!        └─ ChainService       runs the handler chain, stores suspensions
//! ```
//!
//! 4. Once a level is done, a blocking matcher that ran stops the
//!    remaining levels.
//!
//! Handler errors and panics stay inside their matcher.

use std::collections::HashSet;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use tower::filter::AsyncPredicate;
use tower::{BoxError, Layer, Service, ServiceBuilder, ServiceExt};
use tracing::{Instrument, Level, debug, error, span, warn};

use hoshi_core::{BoxedBot, BoxedEvent, Dispatcher, EventType};

use crate::chain::{self, ChainOutcome};
use crate::context::{EventContext, HandlerContext};
use crate::error::EventSkipped;
use crate::matcher::{MatcherId, MatcherTable};
use crate::rule;
use crate::session::{SessionKey, SessionStore};

/// Default lifetime of a suspended chain.
pub const DEFAULT_SESSION_EXPIRE: Duration = Duration::from_secs(120);

/// Dispatcher configuration.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Users holding the SUPERUSER level.
    pub superusers: HashSet<i64>,
    /// Prefixes a command may start with; `""` allows bare commands.
    pub command_start: Vec<String>,
    pub session_expire: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            superusers: HashSet::new(),
            command_start: vec!["/".to_string(), String::new()],
            session_expire: DEFAULT_SESSION_EXPIRE,
        }
    }
}

// ============================================================================
// Hooks
// ============================================================================

/// Observes every chain run.
///
/// `after` runs however the chain ended, including failures and panics.
#[async_trait]
pub trait DispatchHook: Send + Sync {
    async fn before(&self, _ctx: &HandlerContext) {}

    async fn after(&self, _ctx: &HandlerContext, _outcome: &ChainOutcome) {}
}

type Hooks = Arc<Vec<Arc<dyn DispatchHook>>>;

/// Wraps a chain service with the dispatcher's hooks.
#[derive(Clone)]
pub struct HookLayer {
    hooks: Hooks,
}

impl<S> Layer<S> for HookLayer {
    type Service = HookService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HookService {
            inner,
            hooks: Arc::clone(&self.hooks),
        }
    }
}

#[derive(Clone)]
pub struct HookService<S> {
    inner: S,
    hooks: Hooks,
}

impl<S> Service<Arc<HandlerContext>> for HookService<S>
where
    S: Service<Arc<HandlerContext>, Response = ChainOutcome, Error = BoxError>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = ChainOutcome;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<ChainOutcome, BoxError>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, ctx: Arc<HandlerContext>) -> Self::Future {
        let mut inner = self.inner.clone();
        let hooks = Arc::clone(&self.hooks);
        Box::pin(async move {
            for hook in hooks.iter() {
                hook.before(&ctx).await;
            }
            let outcome = inner.call(Arc::clone(&ctx)).await?;
            for hook in hooks.iter() {
                hook.after(&ctx, &outcome).await;
            }
            Ok(outcome)
        })
    }
}

// ============================================================================
// ChainService / RulePredicate
// ============================================================================

/// Runs a matcher's chain and turns a suspension into a session.
#[derive(Clone)]
pub struct ChainService {
    sessions: Arc<SessionStore>,
}

impl Service<Arc<HandlerContext>> for ChainService {
    type Response = ChainOutcome;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<ChainOutcome, BoxError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, ctx: Arc<HandlerContext>) -> Self::Future {
        let sessions = Arc::clone(&self.sessions);
        Box::pin(async move {
            let outcome = chain::run(Arc::clone(&ctx)).await;
            if let ChainOutcome::Suspended { step } = outcome {
                match SessionKey::from_event(ctx.bot().id(), ctx.event().as_ref()) {
                    Some(key) => sessions.insert(
                        key,
                        Arc::clone(ctx.matcher()),
                        Arc::clone(ctx.state()),
                        step,
                    ),
                    None => warn!(
                        matcher = %ctx.matcher_id(),
                        "Chain suspended on an event without a user, dropping it"
                    ),
                }
            }
            Ok(outcome)
        })
    }
}

/// Lets an event through when the matcher's event type, permission and rule
/// all accept it.
#[derive(Clone, Copy, Debug, Default)]
pub struct RulePredicate;

impl AsyncPredicate<Arc<HandlerContext>> for RulePredicate {
    type Future = BoxFuture<'static, Result<Arc<HandlerContext>, BoxError>>;
    type Request = Arc<HandlerContext>;

    fn check(&mut self, ctx: Arc<HandlerContext>) -> Self::Future {
        async move {
            let matcher = Arc::clone(ctx.matcher());
            if matcher.event_type() != ctx.event().event_type() {
                return Err(EventSkipped.into());
            }
            if !matcher
                .get_permission()
                .allows(ctx.event().as_ref(), ctx.base().superusers())
            {
                return Err(EventSkipped.into());
            }
            if let Some(rule) = matcher.get_rule()
                && !rule::satisfied(rule.as_ref(), &ctx).await
            {
                return Err(EventSkipped.into());
            }
            Ok(ctx)
        }
        .boxed()
    }
}

// ============================================================================
// EventDispatcher
// ============================================================================

/// What happened to one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// The event resumed a suspended session.
    pub resumed: bool,
    /// Matchers whose chain ran, in order.
    pub handled: Vec<MatcherId>,
}

/// Routes events to the matchers of a [`MatcherTable`].
pub struct EventDispatcher {
    table: Arc<MatcherTable>,
    command_start: Vec<String>,
    superusers: Arc<HashSet<i64>>,
    hooks: RwLock<Vec<Arc<dyn DispatchHook>>>,
    sessions: Arc<SessionStore>,
}

impl EventDispatcher {
    pub fn new(table: Arc<MatcherTable>, settings: DispatchSettings) -> Self {
        Self {
            table,
            command_start: settings.command_start,
            superusers: Arc::new(settings.superusers),
            hooks: RwLock::new(Vec::new()),
            sessions: Arc::new(SessionStore::new(settings.session_expire)),
        }
    }

    /// Adds a hook; hooks run in the order they were added.
    pub fn add_hook(&self, hook: Arc<dyn DispatchHook>) {
        self.hooks.write().push(hook);
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn table(&self) -> &Arc<MatcherTable> {
        &self.table
    }

    pub fn superusers(&self) -> &HashSet<i64> {
        &self.superusers
    }

    /// Processes one event to completion.
    pub async fn dispatch_event(&self, event: BoxedEvent, bot: BoxedBot) -> DispatchSummary {
        let span = span!(
            Level::DEBUG,
            "dispatch",
            event = %event.event_name(),
            bot = %bot.id()
        );
        self.dispatch_inner(event, bot).instrument(span).await
    }

    async fn dispatch_inner(&self, event: BoxedEvent, bot: BoxedBot) -> DispatchSummary {
        let is_message = event.event_type() == EventType::Message;
        let key = SessionKey::from_event(bot.id(), event.as_ref());
        let command = if is_message {
            self.table
                .resolve_command(&event.plain_text(), &self.command_start)
        } else {
            None
        };
        let base = Arc::new(EventContext::new(
            event,
            bot,
            command,
            Arc::clone(&self.superusers),
        ));

        let hooks: Hooks = Arc::new(self.hooks.read().clone());
        let chain = ChainService {
            sessions: Arc::clone(&self.sessions),
        };
        let mut summary = DispatchSummary::default();

        if !self.sessions.is_empty() {
            let purged = self.sessions.purge_expired();
            if purged > 0 {
                debug!(purged, "Dropped expired sessions");
            }
        }

        if is_message
            && let Some(key) = &key
            && let Some(session) = self.sessions.take(key)
        {
            debug!(session = %key, matcher = %session.matcher.id(), step = session.step, "Resuming session");
            let matcher_id = session.matcher.id();
            let ctx = Arc::new(HandlerContext::resumed(
                base,
                session.matcher,
                session.state,
                session.step,
            ));
            let svc = ServiceBuilder::new()
                .layer(HookLayer { hooks })
                .service(chain);
            if let Err(e) = svc.oneshot(ctx).await {
                error!(matcher = %matcher_id, error = %e, "Resumed chain errored");
            }
            summary.resumed = true;
            summary.handled.push(matcher_id);
            return summary;
        }

        let matchers = self.table.snapshot();
        for level in matchers.chunk_by(|a, b| a.get_priority() == b.get_priority()) {
            let mut blocked = false;

            for matcher in level {
                let ctx = Arc::new(HandlerContext::new(Arc::clone(&base), Arc::clone(matcher)));
                let svc = ServiceBuilder::new()
                    .filter_async(RulePredicate)
                    .layer(HookLayer {
                        hooks: Arc::clone(&hooks),
                    })
                    .service(chain.clone());

                match svc.oneshot(ctx).await {
                    Ok(_) => {
                        summary.handled.push(matcher.id());
                        blocked |= matcher.is_blocking();
                    }
                    Err(e) if e.is::<EventSkipped>() => {}
                    Err(e) => error!(matcher = %matcher.id(), error = %e, "Matcher stack errored"),
                }
            }

            if blocked {
                debug!(priority = level[0].get_priority(), "Blocking matcher ran, stopping dispatch");
                break;
            }
        }

        summary
    }
}

#[async_trait]
impl Dispatcher for EventDispatcher {
    async fn dispatch(&self, event: BoxedEvent, bot: BoxedBot) {
        self.dispatch_event(event, bot).await;
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("matchers", &self.table.len())
            .field("command_start", &self.command_start)
            .field("hooks", &self.hooks.read().len())
            .field("sessions", &self.sessions)
            .finish()
    }
}
