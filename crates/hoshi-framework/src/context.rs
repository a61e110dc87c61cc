//! Contexts handed to rules and handlers.
//!
//! - [`EventContext`] is the **shared** base of one dispatch cycle: the event,
//!   the bot, the resolved command and the superuser list. One `Arc` of it is
//!   cloned into every matcher's context.
//!
//! - [`State`] is the **per-matcher** storage. Rules write their findings
//!   into it (matched text, captures, command argument) and handlers read and
//!   extend it. It survives a suspension and is handed back on resume.
//!
//! - [`HandlerContext`] combines both with the matcher currently running.

use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use hoshi_core::{ApiResult, BoxedBot, BoxedEvent, Message};

use crate::handler::Flow;
use crate::matcher::{Matcher, MatcherId};
use crate::permission::{Level, sender_level};
use crate::service::Service;

/// A command recognised at the start of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMatch {
    /// The command name as registered (without the command start).
    pub command: String,
    /// The rest of the message, leading whitespace stripped.
    pub arg: String,
}

// =============================================================================
// EventContext
// =============================================================================

/// Shared data for one dispatch cycle.
pub struct EventContext {
    event: BoxedEvent,
    bot: BoxedBot,
    command: Option<CommandMatch>,
    superusers: Arc<HashSet<i64>>,
}

impl EventContext {
    pub fn new(
        event: BoxedEvent,
        bot: BoxedBot,
        command: Option<CommandMatch>,
        superusers: Arc<HashSet<i64>>,
    ) -> Self {
        Self {
            event,
            bot,
            command,
            superusers,
        }
    }

    pub fn event(&self) -> &BoxedEvent {
        &self.event
    }

    pub fn bot(&self) -> &BoxedBot {
        &self.bot
    }

    pub fn command(&self) -> Option<&CommandMatch> {
        self.command.as_ref()
    }

    pub fn superusers(&self) -> &HashSet<i64> {
        &self.superusers
    }
}

impl std::fmt::Debug for EventContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventContext")
            .field("event", &self.event)
            .field("bot", &self.bot.id())
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// State
// =============================================================================

/// Per-matcher mutable storage.
///
/// Typed slots hold one value per Rust type; string-keyed arguments are
/// filled by `got` steps.
#[derive(Default)]
pub struct State {
    slots: Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    args: Mutex<HashMap<String, String>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value; a later value of the same type overwrites it.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.slots.lock().insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Clone + 'static>(&self) -> Option<T> {
        self.slots
            .lock()
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn contains<T: 'static>(&self) -> bool {
        self.slots.lock().contains_key(&TypeId::of::<T>())
    }

    pub fn take<T: 'static>(&self) -> Option<T> {
        self.slots
            .lock()
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }

    pub fn arg(&self, key: &str) -> Option<String> {
        self.args.lock().get(key).cloned()
    }

    pub fn set_arg(&self, key: impl Into<String>, value: impl Into<String>) {
        self.args.lock().insert(key.into(), value.into());
    }

    pub fn remove_arg(&self, key: &str) -> Option<String> {
        self.args.lock().remove(key)
    }

    pub fn has_arg(&self, key: &str) -> bool {
        self.args.lock().contains_key(key)
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("slots", &self.slots.lock().len())
            .field("args", &*self.args.lock())
            .finish()
    }
}

// =============================================================================
// HandlerContext
// =============================================================================

/// Where a chain starts running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Resume {
    pub(crate) step: usize,
    /// The current event is the answer a suspended step was waiting for.
    pub(crate) fresh_input: bool,
}

/// The context passed to rules and handlers of one matcher.
///
/// ```rust,ignore
/// sv.on_command("weather", (), MatchOptions::default())
///     .handle(|ctx: Arc<HandlerContext>, CommandArg(city): CommandArg| async move {
///         if !city.is_empty() {
///             ctx.set_arg("city", city);
///         }
///     })
///     .got("city", Some("Which city?".into()), |ctx: Arc<HandlerContext>| async move {
///         let city = ctx.arg("city").unwrap_or_default();
///         ctx.finish(format!("{city}: sunny")).await
///     });
/// ```
pub struct HandlerContext {
    base: Arc<EventContext>,
    matcher: Arc<Matcher>,
    state: Arc<State>,
    resume: Resume,
}

impl HandlerContext {
    pub(crate) fn new(base: Arc<EventContext>, matcher: Arc<Matcher>) -> Self {
        Self {
            base,
            matcher,
            state: Arc::new(State::new()),
            resume: Resume {
                step: 0,
                fresh_input: false,
            },
        }
    }

    pub(crate) fn resumed(
        base: Arc<EventContext>,
        matcher: Arc<Matcher>,
        state: Arc<State>,
        step: usize,
    ) -> Self {
        Self {
            base,
            matcher,
            state,
            resume: Resume {
                step,
                fresh_input: true,
            },
        }
    }

    pub(crate) fn resume(&self) -> Resume {
        self.resume
    }

    pub fn base(&self) -> &Arc<EventContext> {
        &self.base
    }

    pub fn event(&self) -> &BoxedEvent {
        self.base.event()
    }

    pub fn bot(&self) -> &BoxedBot {
        self.base.bot()
    }

    /// Plain text of the current event's message.
    pub fn plain_text(&self) -> String {
        self.base.event().plain_text()
    }

    pub fn command(&self) -> Option<&CommandMatch> {
        self.base.command()
    }

    pub fn matcher(&self) -> &Arc<Matcher> {
        &self.matcher
    }

    pub fn matcher_id(&self) -> MatcherId {
        self.matcher.id()
    }

    /// The service that registered the running matcher, if any.
    pub fn service(&self) -> Option<Arc<Service>> {
        self.matcher.owner()
    }

    pub fn state(&self) -> &Arc<State> {
        &self.state
    }

    // ─── Typed state ──────────────────────────────────────────────────────────

    pub fn set_state<T: Send + Sync + 'static>(&self, value: T) {
        self.state.insert(value);
    }

    pub fn get_state<T: Clone + 'static>(&self) -> Option<T> {
        self.state.get()
    }

    pub fn has_state<T: 'static>(&self) -> bool {
        self.state.contains::<T>()
    }

    pub fn take_state<T: 'static>(&self) -> Option<T> {
        self.state.take()
    }

    /// Like [`get_state`](Self::get_state), with a descriptive error.
    pub fn require_state<T: Clone + 'static>(&self) -> crate::error::ExtractResult<T> {
        self.get_state()
            .ok_or(crate::error::ExtractError::MissingState(type_name::<T>()))
    }

    // ─── Arguments ────────────────────────────────────────────────────────────

    pub fn arg(&self, key: &str) -> Option<String> {
        self.state.arg(key)
    }

    pub fn set_arg(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.set_arg(key, value);
    }

    pub fn remove_arg(&self, key: &str) -> Option<String> {
        self.state.remove_arg(key)
    }

    // ─── Permissions ──────────────────────────────────────────────────────────

    pub fn sender_level(&self) -> Level {
        sender_level(self.event().as_ref(), self.base.superusers())
    }

    pub fn is_superuser(&self) -> bool {
        self.sender_level() == Level::Superuser
    }

    // ─── Chain control ────────────────────────────────────────────────────────

    /// Replies to the current event without ending the chain.
    pub async fn send(&self, message: impl Into<Message>) -> ApiResult<i64> {
        let message = message.into();
        self.bot().send(self.event().as_ref(), &message).await
    }

    async fn send_logged(&self, message: Message) {
        if let Err(e) = self.bot().send(self.event().as_ref(), &message).await {
            error!(matcher = %self.matcher_id(), error = %e, "Failed to send message");
        }
    }

    /// Sends `message` and ends the chain.
    pub async fn finish(&self, message: impl Into<Message>) -> Flow {
        self.send_logged(message.into()).await;
        Flow::Finish
    }

    /// Sends `prompt` and waits for the next message, then re-runs the
    /// current step with it.
    pub async fn reject(&self, prompt: impl Into<Message>) -> Flow {
        self.send_logged(prompt.into()).await;
        Flow::Reject
    }

    /// Sends `prompt` and waits for the next message before running the
    /// next step.
    pub async fn pause(&self, prompt: impl Into<Message>) -> Flow {
        self.send_logged(prompt.into()).await;
        Flow::Pause
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("base", &self.base)
            .field("matcher", &self.matcher.id())
            .field("state", &self.state)
            .field("resume", &self.resume)
            .finish()
    }
}
