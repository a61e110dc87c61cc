//! Extractor system for the hoshi framework.
//!
//! Any type implementing [`FromContext`] can be used as a handler parameter.
//! Besides the event, the bot and the context itself, the rule engine leaves
//! typed values in the matcher's [`State`](crate::context::State) that are
//! extractable here:
//!
//! | Type | Written by |
//! |------|-----------|
//! | [`Matched`] | prefix, suffix, keyword and regex rules |
//! | [`RegexMatch`] | regex rule |
//! | [`CommandArg`] | command and shell-command rules |
//! | [`Argv`] | shell-command rule |
//! | [`ShellArgs<P>`] | typed shell-command rule |
//!
//! A failing extractor fails the handler; wrap it in `Option<T>` to make it
//! optional.

use std::collections::HashMap;
use std::sync::Arc;

use hoshi_core::{BoxedBot, BoxedEvent};

use crate::context::HandlerContext;
use crate::error::{ExtractError, ExtractResult};
use crate::service::Service;

/// A trait for types that can be extracted from a [`HandlerContext`].
pub trait FromContext: Sized {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self>;
}

impl FromContext for Arc<HandlerContext> {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        Ok(Arc::clone(ctx))
    }
}

impl FromContext for BoxedEvent {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        Ok(ctx.event().clone())
    }
}

impl FromContext for BoxedBot {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        Ok(ctx.bot().clone())
    }
}

/// The owning service of the running matcher.
impl FromContext for Arc<Service> {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        ctx.service().ok_or(ExtractError::MissingField("owning service"))
    }
}

impl<T: FromContext> FromContext for Option<T> {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        Ok(T::from_context(ctx).ok())
    }
}

/// The plain text of the current event's message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainText(pub String);

impl FromContext for PlainText {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        Ok(PlainText(ctx.plain_text()))
    }
}

/// The group the event happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupId(pub i64);

impl FromContext for GroupId {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        ctx.event()
            .group_id()
            .map(GroupId)
            .ok_or(ExtractError::MissingField("group id"))
    }
}

/// The user that triggered the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub i64);

impl FromContext for UserId {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        ctx.event()
            .user_id()
            .map(UserId)
            .ok_or(ExtractError::MissingField("user id"))
    }
}

// ============================================================================
// Rule outputs
// ============================================================================

/// The substring a pattern rule matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched(pub String);

/// Capture groups of a regex match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegexMatch {
    /// Positional groups; index 0 is the whole match.
    pub groups: Vec<Option<String>>,
    /// Named groups that participated in the match.
    pub named: HashMap<String, String>,
}

impl RegexMatch {
    pub fn get(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }
}

/// The text following a recognised command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArg(pub String);

/// The shell-split command argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argv(pub Vec<String>);

macro_rules! impl_from_state {
    ($($ty:ty),*) => {
        $(
            impl FromContext for $ty {
                fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
                    ctx.require_state::<$ty>()
                }
            }
        )*
    };
}

impl_from_state!(Matched, RegexMatch, CommandArg, Argv);

/// The result of parsing [`Argv`] with a `clap::Parser`.
///
/// Holds the parsed value, or the rendered clap error or help text.
#[cfg(feature = "shell")]
pub struct ShellArgs<P>(Arc<Result<P, String>>);

#[cfg(feature = "shell")]
impl<P> ShellArgs<P> {
    pub(crate) fn new(result: Result<P, String>) -> Self {
        Self(Arc::new(result))
    }

    /// Returns the parsed arguments, or the message clap rendered.
    pub fn result(&self) -> Result<&P, &str> {
        match self.0.as_ref() {
            Ok(parsed) => Ok(parsed),
            Err(message) => Err(message.as_str()),
        }
    }
}

#[cfg(feature = "shell")]
impl<P> Clone for ShellArgs<P> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

#[cfg(feature = "shell")]
impl<P: std::fmt::Debug> std::fmt::Debug for ShellArgs<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ShellArgs").field(&self.0).finish()
    }
}

#[cfg(feature = "shell")]
impl<P: Send + Sync + 'static> FromContext for ShellArgs<P> {
    fn from_context(ctx: &Arc<HandlerContext>) -> ExtractResult<Self> {
        ctx.require_state::<ShellArgs<P>>()
    }
}
