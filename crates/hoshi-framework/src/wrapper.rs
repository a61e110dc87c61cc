//! Matcher registration on services.
//!
//! Every `on_*` method builds one matcher whose rule is the kind's pattern
//! rule, then the service scope, then (optionally) addressed-to-bot. The
//! returned [`MatcherWrapper`] is used to build the handler chain.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

use tracing::debug;

use hoshi_core::{ApiResult, EventType, Message};

use crate::chain::ArgParser;
use crate::context::HandlerContext;
use crate::handler::{Flow, Handler};
use crate::matcher::{Matcher, MatcherDescriptor, MatcherKind};
use crate::permission::Permission;
use crate::rule::{self, And, BoxedRule, Command, EndsWith, Keyword, Regex, ServiceScope, ShellCommand, StartsWith, ToMe};
use crate::service::Service;

// ============================================================================
// MatchOptions
// ============================================================================

/// Options shared by every `on_*` registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOptions {
    /// Require the message to be addressed to the bot. Message kinds only.
    pub only_to_me: bool,
    /// Reject events outside groups.
    pub only_group: bool,
    pub permission: Permission,
    /// Lower priorities run first.
    pub priority: NonZeroU32,
    /// Stop lower priorities after a match. `None` blocks for message
    /// kinds and not for notices and requests.
    pub block: Option<bool>,
    /// Normalise text before keyword and regex matching.
    pub normal: bool,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            only_to_me: false,
            only_group: true,
            permission: Permission::NORMAL,
            priority: NonZeroU32::MIN,
            block: None,
            normal: true,
        }
    }
}

impl MatchOptions {
    pub fn only_to_me(mut self, only_to_me: bool) -> Self {
        self.only_to_me = only_to_me;
        self
    }

    pub fn only_group(mut self, only_group: bool) -> Self {
        self.only_group = only_group;
        self
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    pub fn priority(mut self, priority: NonZeroU32) -> Self {
        self.priority = priority;
        self
    }

    pub fn block(mut self, block: bool) -> Self {
        self.block = Some(block);
        self
    }

    pub fn normal(mut self, normal: bool) -> Self {
        self.normal = normal;
        self
    }
}

// ============================================================================
// IntoStringSet
// ============================================================================

/// Alias and keyword arguments: a single string, nothing, or a collection.
pub trait IntoStringSet {
    fn into_string_set(self) -> BTreeSet<String>;
}

impl IntoStringSet for () {
    fn into_string_set(self) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

impl IntoStringSet for &str {
    fn into_string_set(self) -> BTreeSet<String> {
        BTreeSet::from([self.to_string()])
    }
}

impl IntoStringSet for String {
    fn into_string_set(self) -> BTreeSet<String> {
        BTreeSet::from([self])
    }
}

impl<T: IntoStringSet> IntoStringSet for Option<T> {
    fn into_string_set(self) -> BTreeSet<String> {
        self.map(IntoStringSet::into_string_set).unwrap_or_default()
    }
}

impl<T: Into<String>> IntoStringSet for Vec<T> {
    fn into_string_set(self) -> BTreeSet<String> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<String>, const N: usize> IntoStringSet for [T; N] {
    fn into_string_set(self) -> BTreeSet<String> {
        self.into_iter().map(Into::into).collect()
    }
}

impl IntoStringSet for BTreeSet<String> {
    fn into_string_set(self) -> BTreeSet<String> {
        self
    }
}

impl IntoStringSet for HashSet<String> {
    fn into_string_set(self) -> BTreeSet<String> {
        self.into_iter().collect()
    }
}

// ============================================================================
// Registration
// ============================================================================

impl Service {
    fn attach(
        &self,
        kind: MatcherKind,
        pattern: Option<BoxedRule>,
        opts: MatchOptions,
        commands: Vec<String>,
    ) -> MatcherWrapper {
        let event_type = kind.event_type();
        let is_message = event_type == EventType::Message;

        let scope = ServiceScope::new(self.this.clone(), opts.only_group);
        let mut rule: BoxedRule = match pattern {
            Some(pattern) => Arc::new(And::new(pattern, scope)),
            None => Arc::new(scope),
        };
        if opts.only_to_me && is_message {
            rule = Arc::new(And::new(rule, ToMe));
        }

        let matcher = Matcher::new(event_type)
            .boxed_rule(rule)
            .permission(opts.permission)
            .priority(opts.priority)
            .block(opts.block.unwrap_or(is_message))
            .owned_by(self.this.clone());
        let descriptor = MatcherDescriptor {
            id: matcher.id(),
            service: self.name().to_string(),
            kind,
            priority: opts.priority.get(),
            only_group: opts.only_group,
        };

        let (matcher, descriptor) = self.table.add_described(matcher, descriptor, commands);
        self.matchers.write().push(Arc::clone(&descriptor));
        debug!(%descriptor, "Matcher registered");

        MatcherWrapper {
            matcher,
            descriptor,
        }
    }

    /// Matches messages starting with the command `name` or an alias,
    /// after one of the configured command starts.
    pub fn on_command(
        &self,
        name: impl Into<String>,
        aliases: impl IntoStringSet,
        opts: MatchOptions,
    ) -> MatcherWrapper {
        let name = name.into();
        let aliases = aliases.into_string_set();
        let names = command_names(&name, &aliases);
        self.attach(
            MatcherKind::Command { name, aliases },
            Some(Arc::new(Command::new(names.clone()))),
            opts,
            names,
        )
    }

    /// Like [`on_command`](Self::on_command), splitting the argument into
    /// an [`Argv`](crate::extractor::Argv).
    pub fn on_shell_command(
        &self,
        name: impl Into<String>,
        aliases: impl IntoStringSet,
        opts: MatchOptions,
    ) -> MatcherWrapper {
        let name = name.into();
        let aliases = aliases.into_string_set();
        let names = command_names(&name, &aliases);
        self.attach(
            MatcherKind::ShellCommand { name, aliases },
            Some(Arc::new(ShellCommand::new(names.clone()))),
            opts,
            names,
        )
    }

    /// Like [`on_shell_command`](Self::on_shell_command), also parsing the
    /// argv with `P` into a [`ShellArgs<P>`](crate::extractor::ShellArgs).
    #[cfg(feature = "shell")]
    pub fn on_shell_command_with<P>(
        &self,
        name: impl Into<String>,
        aliases: impl IntoStringSet,
        opts: MatchOptions,
    ) -> MatcherWrapper
    where
        P: clap::Parser + Send + Sync + 'static,
    {
        let name = name.into();
        let aliases = aliases.into_string_set();
        let names = command_names(&name, &aliases);
        self.attach(
            MatcherKind::ShellCommand { name, aliases },
            Some(Arc::new(ShellCommand::new(names.clone()).with_parser::<P>())),
            opts,
            names,
        )
    }

    pub fn on_startswith(&self, prefix: impl Into<String>, opts: MatchOptions) -> MatcherWrapper {
        let prefix = prefix.into();
        self.attach(
            MatcherKind::StartsWith(prefix.clone()),
            Some(Arc::new(StartsWith(prefix))),
            opts,
            Vec::new(),
        )
    }

    pub fn on_endswith(&self, suffix: impl Into<String>, opts: MatchOptions) -> MatcherWrapper {
        let suffix = suffix.into();
        self.attach(
            MatcherKind::EndsWith(suffix.clone()),
            Some(Arc::new(EndsWith(suffix))),
            opts,
            Vec::new(),
        )
    }

    /// Matches messages containing any of `keywords`.
    pub fn on_keyword(&self, keywords: impl IntoStringSet, opts: MatchOptions) -> MatcherWrapper {
        let keywords = keywords.into_string_set();
        let rule = Keyword::new(keywords.clone(), opts.normal);
        self.attach(
            MatcherKind::Keyword(keywords),
            Some(Arc::new(rule)),
            opts,
            Vec::new(),
        )
    }

    /// Matches messages in which `pattern` is found.
    pub fn on_regex(&self, pattern: &str, opts: MatchOptions) -> Result<MatcherWrapper, regex::Error> {
        let rule = Regex::new(pattern, opts.normal)?;
        Ok(self.attach(
            MatcherKind::Regex(pattern.to_string()),
            Some(Arc::new(rule)),
            opts,
            Vec::new(),
        ))
    }

    /// Matches every message.
    pub fn on_message(&self, opts: MatchOptions) -> MatcherWrapper {
        self.attach(MatcherKind::Message, None, opts, Vec::new())
    }

    /// Matches notices named in `events` (all notices when empty).
    ///
    /// Names match either the full event name (`notice.group_increase`) or
    /// the part after the type (`group_increase`).
    pub fn on_notice(&self, events: impl IntoStringSet, opts: MatchOptions) -> MatcherWrapper {
        self.attach(MatcherKind::Notice, event_name_rule(events), opts, Vec::new())
    }

    /// Matches requests named in `events` (all requests when empty).
    pub fn on_request(&self, events: impl IntoStringSet, opts: MatchOptions) -> MatcherWrapper {
        self.attach(MatcherKind::Request, event_name_rule(events), opts, Vec::new())
    }
}

fn command_names(name: &str, aliases: &BTreeSet<String>) -> Vec<String> {
    std::iter::once(name.to_string())
        .chain(aliases.iter().cloned())
        .collect()
}

fn event_name_rule(events: impl IntoStringSet) -> Option<BoxedRule> {
    let names = events.into_string_set();
    if names.is_empty() {
        return None;
    }
    Some(Arc::new(rule::from_fn(move |ctx: &HandlerContext| {
        let name = ctx.event().event_name();
        names.contains(name)
            || name
                .split_once('.')
                .is_some_and(|(_, rest)| names.contains(rest))
    })))
}

// ============================================================================
// MatcherWrapper
// ============================================================================

/// A registered matcher, used to build its handler chain.
#[derive(Clone)]
pub struct MatcherWrapper {
    matcher: Arc<Matcher>,
    descriptor: Arc<MatcherDescriptor>,
}

impl MatcherWrapper {
    pub fn matcher(&self) -> &Arc<Matcher> {
        &self.matcher
    }

    pub fn descriptor(&self) -> &Arc<MatcherDescriptor> {
        &self.descriptor
    }

    /// Appends a step run with the triggering event.
    pub fn handle<H, T>(&self, handler: H) -> &Self
    where
        H: Handler<T>,
        T: 'static,
    {
        self.matcher.handle(handler);
        self
    }

    /// Appends a step run with the next message of the conversation.
    pub fn receive<H, T>(&self, handler: H) -> &Self
    where
        H: Handler<T>,
        T: 'static,
    {
        self.matcher.receive(handler);
        self
    }

    /// Appends a step that makes sure argument `key` is set, sending
    /// `prompt` and waiting for the answer if it is not.
    pub fn got<H, T>(&self, key: impl Into<String>, prompt: Option<Message>, handler: H) -> &Self
    where
        H: Handler<T>,
        T: 'static,
    {
        self.matcher.got(key, prompt, handler);
        self
    }

    /// Like [`got`](Self::got), parsing the answer with `parser`.
    pub fn got_with<H, T>(
        &self,
        key: impl Into<String>,
        prompt: Option<Message>,
        parser: ArgParser,
        handler: H,
    ) -> &Self
    where
        H: Handler<T>,
        T: 'static,
    {
        self.matcher.got_with(key, prompt, parser, handler);
        self
    }

    pub async fn send(&self, ctx: &HandlerContext, message: impl Into<Message>) -> ApiResult<i64> {
        ctx.send(message).await
    }

    pub async fn finish(&self, ctx: &HandlerContext, message: impl Into<Message>) -> Flow {
        ctx.finish(message).await
    }

    pub async fn reject(&self, ctx: &HandlerContext, prompt: impl Into<Message>) -> Flow {
        ctx.reject(prompt).await
    }

    pub async fn pause(&self, ctx: &HandlerContext, prompt: impl Into<Message>) -> Flow {
        ctx.pause(prompt).await
    }
}

impl fmt::Display for MatcherWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.descriptor, f)
    }
}

impl fmt::Debug for MatcherWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatcherWrapper")
            .field("matcher", &self.matcher)
            .field("descriptor", &self.descriptor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use hoshi_core::BotManager;

    use super::*;
    use crate::service::{ServiceOptions, ServiceRegistry};
    use crate::store::MemoryStore;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(Arc::new(MemoryStore::new()), Arc::new(BotManager::new()))
    }

    #[test]
    fn test_string_sets() {
        assert!(().into_string_set().is_empty());
        assert!(None::<&str>.into_string_set().is_empty());
        assert_eq!("a".into_string_set(), BTreeSet::from(["a".to_string()]));
        assert_eq!(["b", "a", "b"].into_string_set().len(), 2);
        assert_eq!(vec!["x".to_string()].into_string_set().len(), 1);
    }

    #[test]
    fn test_registration_records_descriptors() {
        let registry = registry();
        let sv = registry.register(ServiceOptions::new("weather")).unwrap();

        let cmd = sv.on_command("天气", ["weather", "tq"], MatchOptions::default());
        let notice = sv.on_notice(
            "group_increase",
            MatchOptions::default().priority(NonZeroU32::new(3).unwrap()),
        );

        assert!(cmd.matcher().is_blocking());
        assert!(!notice.matcher().is_blocking());
        assert_eq!(notice.matcher().event_type(), EventType::Notice);
        assert_eq!(notice.matcher().get_priority(), 3);

        let descriptors = sv.matchers();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(
            descriptors[0].to_string(),
            "<Matcher from Service weather, priority=1, type=Message.command, command=天气, aliases={tq, weather}, only_group=true>"
        );
        assert_eq!(
            registry.matcher_table().descriptor(cmd.matcher().id()).as_deref(),
            Some(cmd.descriptor().as_ref())
        );
        assert_eq!(registry.loaded_matchers().len(), 2);

        let resolved = registry
            .matcher_table()
            .resolve_command("/tq 合肥", &["/".to_string()])
            .unwrap();
        assert_eq!(resolved.command, "tq");
        assert_eq!(resolved.arg, "合肥");
    }

    #[test]
    fn test_default_priority_is_one() {
        assert_eq!(MatchOptions::default().priority.get(), 1);
        assert_eq!(Matcher::new(EventType::Message).get_priority(), 1);

        let registry = registry();
        let sv = registry.register(ServiceOptions::new("plain")).unwrap();
        let wrapper = sv.on_message(MatchOptions::default());
        assert_eq!(wrapper.matcher().get_priority(), 1);
        assert_eq!(wrapper.descriptor().priority, 1);
    }

    #[test]
    fn test_regex_errors_propagate() {
        let registry = registry();
        let sv = registry.register(ServiceOptions::new("rex")).unwrap();
        assert!(sv.on_regex("(unclosed", MatchOptions::default()).is_err());
        assert!(sv.matchers().is_empty());

        let ok = sv
            .on_regex(r"^\d+$", MatchOptions::default().block(false))
            .unwrap();
        assert!(!ok.matcher().is_blocking());
        assert_eq!(
            ok.to_string(),
            r"<Matcher from Service rex, priority=1, type=Message.regex, pattern=^\d+$, only_group=true>"
        );
    }

    #[test]
    fn test_matcher_permission_from_options() {
        let registry = registry();
        let sv = registry.register(ServiceOptions::new("admin-only")).unwrap();
        let wrapper = sv.on_message(MatchOptions::default().permission(Permission::GROUP_ADMIN));
        assert_eq!(wrapper.matcher().get_permission(), Permission::GROUP_ADMIN);
        assert!(Arc::ptr_eq(&wrapper.matcher().owner().unwrap(), &sv));
    }
}
