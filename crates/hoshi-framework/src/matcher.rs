//! Matchers and the registry-wide matcher table.
//!
//! A [`Matcher`] binds an event type, a permission and a rule to a chain of
//! handler steps. Matchers registered through a service also get a
//! [`MatcherDescriptor`] used for introspection and trace logs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use hoshi_core::EventType;

use crate::chain::Step;
use crate::context::CommandMatch;
use crate::permission::Permission;
use crate::rule::BoxedRule;
use crate::service::Service;

// ============================================================================
// MatcherId
// ============================================================================

/// Identity of a matcher's handler chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatcherId(u64);

impl MatcherId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        MatcherId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for MatcherId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ============================================================================
// MatcherKind / MatcherDescriptor
// ============================================================================

/// What a matcher was registered for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatcherKind {
    Command {
        name: String,
        aliases: BTreeSet<String>,
    },
    ShellCommand {
        name: String,
        aliases: BTreeSet<String>,
    },
    StartsWith(String),
    EndsWith(String),
    Keyword(BTreeSet<String>),
    Regex(String),
    Message,
    Notice,
    Request,
}

impl MatcherKind {
    /// The type tag used in descriptors.
    pub fn tag(&self) -> &'static str {
        match self {
            MatcherKind::Command { .. } => "Message.command",
            MatcherKind::ShellCommand { .. } => "Message.shell_command",
            MatcherKind::StartsWith(_) => "Message.startswith",
            MatcherKind::EndsWith(_) => "Message.endswith",
            MatcherKind::Keyword(_) => "Message.keyword",
            MatcherKind::Regex(_) => "Message.regex",
            MatcherKind::Message => "Message.message",
            MatcherKind::Notice => "Notice",
            MatcherKind::Request => "Request",
        }
    }

    pub fn event_type(&self) -> EventType {
        match self {
            MatcherKind::Notice => EventType::Notice,
            MatcherKind::Request => EventType::Request,
            _ => EventType::Message,
        }
    }

    /// Kind-specific `key=value` pairs.
    fn details(&self) -> Vec<String> {
        fn set(items: &BTreeSet<String>) -> String {
            let items: Vec<&str> = items.iter().map(String::as_str).collect();
            format!("{{{}}}", items.join(", "))
        }

        match self {
            MatcherKind::Command { name, aliases }
            | MatcherKind::ShellCommand { name, aliases } => {
                let mut out = vec![format!("command={name}")];
                if !aliases.is_empty() {
                    out.push(format!("aliases={}", set(aliases)));
                }
                out
            }
            MatcherKind::StartsWith(msg) => vec![format!("startswith={msg}")],
            MatcherKind::EndsWith(msg) => vec![format!("endswith={msg}")],
            MatcherKind::Keyword(keywords) => vec![format!("keywords={}", set(keywords))],
            MatcherKind::Regex(pattern) => vec![format!("pattern={pattern}")],
            MatcherKind::Message | MatcherKind::Notice | MatcherKind::Request => Vec::new(),
        }
    }
}

/// Introspection record of a service-registered matcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherDescriptor {
    pub id: MatcherId,
    pub service: String,
    pub kind: MatcherKind,
    pub priority: u32,
    pub only_group: bool,
}

impl fmt::Display for MatcherDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Matcher from Service {}, priority={}, type={}, ",
            self.service,
            self.priority,
            self.kind.tag()
        )?;
        for detail in self.kind.details() {
            write!(f, "{detail}, ")?;
        }
        write!(f, "only_group={}>", self.only_group)
    }
}

// ============================================================================
// Matcher
// ============================================================================

/// A rule-guarded handler chain.
///
/// ```rust,ignore
/// let matcher = Matcher::new(EventType::Notice)
///     .priority(NonZeroU32::new(5).unwrap())
///     .rule(ToMe);
/// let matcher = table.add(matcher);
/// matcher.handle(|| async { /* ... */ });
/// ```
pub struct Matcher {
    id: MatcherId,
    event_type: EventType,
    rule: Option<BoxedRule>,
    permission: Permission,
    priority: u32,
    block: bool,
    owner: Option<Weak<Service>>,
    steps: RwLock<Vec<Arc<Step>>>,
}

impl Matcher {
    /// Creates a matcher for `event_type` with priority 1, NORMAL
    /// permission, no rule and no blocking.
    pub fn new(event_type: EventType) -> Self {
        Self {
            id: MatcherId::next(),
            event_type,
            rule: None,
            permission: Permission::NORMAL,
            priority: 1,
            block: false,
            owner: None,
            steps: RwLock::new(Vec::new()),
        }
    }

    pub fn rule(mut self, rule: impl crate::rule::Rule + 'static) -> Self {
        self.rule = Some(Arc::new(rule));
        self
    }

    pub(crate) fn boxed_rule(mut self, rule: BoxedRule) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    /// Lower priorities run first.
    pub fn priority(mut self, priority: NonZeroU32) -> Self {
        self.priority = priority.get();
        self
    }

    /// A blocking matcher that matched stops lower priority levels.
    pub fn block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }

    pub(crate) fn owner(&self) -> Option<Arc<Service>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn owned_by(mut self, service: Weak<Service>) -> Self {
        self.owner = Some(service);
        self
    }

    pub fn id(&self) -> MatcherId {
        self.id
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn get_rule(&self) -> Option<&BoxedRule> {
        self.rule.as_ref()
    }

    pub fn get_permission(&self) -> Permission {
        self.permission
    }

    pub fn get_priority(&self) -> u32 {
        self.priority
    }

    pub fn is_blocking(&self) -> bool {
        self.block
    }

    pub(crate) fn push_step(&self, step: Step) {
        self.steps.write().push(Arc::new(step));
    }

    pub(crate) fn step(&self, index: usize) -> Option<Arc<Step>> {
        self.steps.read().get(index).cloned()
    }

    pub fn step_count(&self) -> usize {
        self.steps.read().len()
    }

    // ─── Chain building ───────────────────────────────────────────────────────

    /// Appends a step that runs `handler` with the current event.
    pub fn handle<H, T>(&self, handler: H) -> &Self
    where
        H: crate::handler::Handler<T>,
        T: 'static,
    {
        self.push_step(Step::Handle(crate::handler::into_handler(handler)));
        self
    }

    /// Appends a step that waits for the next message, then runs `handler`.
    pub fn receive<H, T>(&self, handler: H) -> &Self
    where
        H: crate::handler::Handler<T>,
        T: 'static,
    {
        self.push_step(Step::Receive(crate::handler::into_handler(handler)));
        self
    }

    /// Appends a step that collects argument `key` before running `handler`.
    ///
    /// If the argument is absent, `prompt` is sent and the chain waits for
    /// the next message, whose plain text becomes the argument.
    pub fn got<H, T>(&self, key: impl Into<String>, prompt: Option<hoshi_core::Message>, handler: H) -> &Self
    where
        H: crate::handler::Handler<T>,
        T: 'static,
    {
        self.push_step(Step::Got {
            key: key.into(),
            prompt,
            parser: None,
            handler: crate::handler::into_handler(handler),
        });
        self
    }

    /// Like [`got`](Self::got), with a custom parser for the answer.
    pub fn got_with<H, T>(
        &self,
        key: impl Into<String>,
        prompt: Option<hoshi_core::Message>,
        parser: crate::chain::ArgParser,
        handler: H,
    ) -> &Self
    where
        H: crate::handler::Handler<T>,
        T: 'static,
    {
        self.push_step(Step::Got {
            key: key.into(),
            prompt,
            parser: Some(parser),
            handler: crate::handler::into_handler(handler),
        });
        self
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matcher")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("permission", &self.permission)
            .field("priority", &self.priority)
            .field("block", &self.block)
            .field("steps", &self.step_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// MatcherTable
// ============================================================================

/// All registered matchers, in dispatch order.
#[derive(Default)]
pub struct MatcherTable {
    matchers: RwLock<Vec<Arc<Matcher>>>,
    descriptors: RwLock<BTreeMap<MatcherId, Arc<MatcherDescriptor>>>,
    commands: RwLock<BTreeSet<String>>,
}

impl MatcherTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a matcher, keeping ascending priority and registration order
    /// among equal priorities.
    pub fn add(&self, matcher: Matcher) -> Arc<Matcher> {
        let matcher = Arc::new(matcher);
        let mut matchers = self.matchers.write();
        let position = matchers.partition_point(|m| m.priority <= matcher.priority);
        matchers.insert(position, Arc::clone(&matcher));
        matcher
    }

    /// Adds a matcher together with its descriptor and the command names it
    /// answers to.
    pub(crate) fn add_described(
        &self,
        matcher: Matcher,
        descriptor: MatcherDescriptor,
        commands: impl IntoIterator<Item = String>,
    ) -> (Arc<Matcher>, Arc<MatcherDescriptor>) {
        debug_assert_eq!(matcher.id(), descriptor.id);
        self.register_commands(commands);
        let descriptor = Arc::new(descriptor);
        self.descriptors
            .write()
            .insert(descriptor.id, Arc::clone(&descriptor));
        (self.add(matcher), descriptor)
    }

    /// Makes command names known to command resolution.
    pub fn register_commands(&self, commands: impl IntoIterator<Item = String>) {
        let mut known = self.commands.write();
        known.extend(commands.into_iter().filter(|c| !c.is_empty()));
    }

    /// Returns the matchers in dispatch order.
    pub fn snapshot(&self) -> Vec<Arc<Matcher>> {
        self.matchers.read().clone()
    }

    pub fn descriptor(&self, id: MatcherId) -> Option<Arc<MatcherDescriptor>> {
        self.descriptors.read().get(&id).cloned()
    }

    /// All descriptors, in registration order.
    pub fn descriptors(&self) -> Vec<Arc<MatcherDescriptor>> {
        self.descriptors.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.matchers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.read().is_empty()
    }

    /// Finds the longest `start + command` prefix of `text`.
    pub fn resolve_command(&self, text: &str, command_start: &[String]) -> Option<CommandMatch> {
        let text = text.trim_start();
        let commands = self.commands.read();
        let mut best: Option<(usize, &String)> = None;

        for start in command_start {
            let Some(rest) = text.strip_prefix(start.as_str()) else {
                continue;
            };
            for name in commands.iter() {
                if rest.starts_with(name.as_str()) {
                    let len = start.len() + name.len();
                    if best.is_none_or(|(best_len, _)| len > best_len) {
                        best = Some((len, name));
                    }
                }
            }
        }

        best.map(|(len, name)| CommandMatch {
            command: name.clone(),
            arg: text[len..].trim_start().to_string(),
        })
    }
}

impl fmt::Debug for MatcherTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatcherTable")
            .field("matchers", &self.len())
            .field("commands", &*self.commands.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prio(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    fn starts() -> Vec<String> {
        vec!["/".to_string(), String::new()]
    }

    #[test]
    fn test_table_orders_by_priority_then_registration() {
        let table = MatcherTable::new();
        let a = table.add(Matcher::new(EventType::Message).priority(prio(5)));
        let b = table.add(Matcher::new(EventType::Message).priority(prio(1)));
        let c = table.add(Matcher::new(EventType::Message).priority(prio(5)));
        let d = table.add(Matcher::new(EventType::Message).priority(prio(1)));

        let order: Vec<_> = table.snapshot().iter().map(|m| m.id()).collect();
        assert_eq!(order, vec![b.id(), d.id(), a.id(), c.id()]);
    }

    #[test]
    fn test_resolve_command_longest_match() {
        let table = MatcherTable::new();
        table.register_commands(["help".to_string(), "help me".to_string(), "天气".to_string()]);

        let m = table.resolve_command("/help me now", &starts()).unwrap();
        assert_eq!(m.command, "help me");
        assert_eq!(m.arg, "now");

        let m = table.resolve_command("天气北京", &starts()).unwrap();
        assert_eq!(m.command, "天气");
        assert_eq!(m.arg, "北京");

        assert!(table.resolve_command("hello", &starts()).is_none());
        assert!(table.resolve_command("/help", &["!".to_string()]).is_none());
    }

    #[test]
    fn test_descriptor_rendering() {
        let descriptor = MatcherDescriptor {
            id: MatcherId::next(),
            service: "weather".into(),
            kind: MatcherKind::Command {
                name: "天气".into(),
                aliases: BTreeSet::from(["weather".to_string()]),
            },
            priority: 1,
            only_group: true,
        };
        assert_eq!(
            descriptor.to_string(),
            "<Matcher from Service weather, priority=1, type=Message.command, command=天气, aliases={weather}, only_group=true>"
        );

        let notice = MatcherDescriptor {
            kind: MatcherKind::Notice,
            ..descriptor
        };
        assert_eq!(
            notice.to_string(),
            "<Matcher from Service weather, priority=1, type=Notice, only_group=true>"
        );
    }
}
