//! Rule engine.
//!
//! A [`Rule`] decides whether a matcher takes an event. Rules run after the
//! event-type and permission checks and may leave their findings in the
//! matcher's state for handlers to extract (see [`crate::extractor`]).
//!
//! Rules compose with [`RuleExt::and`], evaluated left to right with
//! short-circuit. A rule that errors counts as not satisfied.

use std::collections::BTreeSet;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tower::BoxError;
use tracing::warn;

use crate::context::HandlerContext;
use crate::extractor::{Argv, CommandArg, Matched, RegexMatch};
use crate::service::Service;

/// A predicate over the current event.
#[async_trait]
pub trait Rule: Send + Sync {
    /// Returns whether the event satisfies the rule.
    async fn check(&self, ctx: &HandlerContext) -> Result<bool, BoxError>;

    /// A name for log output.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

pub type BoxedRule = Arc<dyn Rule>;

#[async_trait]
impl<R: Rule + ?Sized> Rule for Arc<R> {
    async fn check(&self, ctx: &HandlerContext) -> Result<bool, BoxError> {
        (**self).check(ctx).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Evaluates a rule, logging and swallowing its error.
pub(crate) async fn satisfied(rule: &dyn Rule, ctx: &HandlerContext) -> bool {
    match rule.check(ctx).await {
        Ok(ok) => ok,
        Err(e) => {
            warn!(
                rule = rule.name(),
                matcher = %ctx.matcher_id(),
                error = %e,
                "Rule check failed, treating as not matched"
            );
            false
        }
    }
}

/// Replaces full-width ASCII variants and the ideographic space with their
/// half-width forms, then lower-cases.
pub fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{3000}' => ' ',
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            _ => c,
        })
        .flat_map(char::to_lowercase)
        .collect()
}

// ============================================================================
// Combinators
// ============================================================================

/// Conjunction of two rules.
pub struct And {
    left: BoxedRule,
    right: BoxedRule,
}

impl And {
    pub fn new(left: impl Rule + 'static, right: impl Rule + 'static) -> Self {
        Self {
            left: Arc::new(left),
            right: Arc::new(right),
        }
    }
}

#[async_trait]
impl Rule for And {
    async fn check(&self, ctx: &HandlerContext) -> Result<bool, BoxError> {
        if !satisfied(self.left.as_ref(), ctx).await {
            return Ok(false);
        }
        Ok(satisfied(self.right.as_ref(), ctx).await)
    }

    fn name(&self) -> &str {
        "and"
    }
}

pub trait RuleExt: Rule + Sized + 'static {
    /// `self` and then `other`; `other` is skipped when `self` fails.
    fn and(self, other: impl Rule + 'static) -> And {
        And::new(self, other)
    }
}

impl<R: Rule + Sized + 'static> RuleExt for R {}

/// A synchronous rule from a closure.
pub struct FnRule<F>(F);

pub fn from_fn<F>(f: F) -> FnRule<F>
where
    F: Fn(&HandlerContext) -> bool + Send + Sync + 'static,
{
    FnRule(f)
}

#[async_trait]
impl<F> Rule for FnRule<F>
where
    F: Fn(&HandlerContext) -> bool + Send + Sync + 'static,
{
    async fn check(&self, ctx: &HandlerContext) -> Result<bool, BoxError> {
        Ok((self.0)(ctx))
    }
}

// ============================================================================
// Built-in rules
// ============================================================================

/// Passes when the owning service is enabled in the event's group.
///
/// Events without a group pass only if `only_group` is false.
pub struct ServiceScope {
    service: Weak<Service>,
    only_group: bool,
}

impl ServiceScope {
    pub fn new(service: Weak<Service>, only_group: bool) -> Self {
        Self {
            service,
            only_group,
        }
    }
}

#[async_trait]
impl Rule for ServiceScope {
    async fn check(&self, ctx: &HandlerContext) -> Result<bool, BoxError> {
        match ctx.event().group_id() {
            Some(group_id) => Ok(self
                .service
                .upgrade()
                .is_some_and(|sv| sv.check_enabled(group_id))),
            None => Ok(!self.only_group),
        }
    }

    fn name(&self) -> &str {
        "service_scope"
    }
}

/// Passes when the event is addressed to the bot.
pub struct ToMe;

#[async_trait]
impl Rule for ToMe {
    async fn check(&self, ctx: &HandlerContext) -> Result<bool, BoxError> {
        Ok(ctx.event().is_to_me())
    }

    fn name(&self) -> &str {
        "to_me"
    }
}

pub struct StartsWith(pub String);

#[async_trait]
impl Rule for StartsWith {
    async fn check(&self, ctx: &HandlerContext) -> Result<bool, BoxError> {
        if ctx.plain_text().starts_with(self.0.as_str()) {
            ctx.set_state(Matched(self.0.clone()));
            return Ok(true);
        }
        Ok(false)
    }

    fn name(&self) -> &str {
        "startswith"
    }
}

pub struct EndsWith(pub String);

#[async_trait]
impl Rule for EndsWith {
    async fn check(&self, ctx: &HandlerContext) -> Result<bool, BoxError> {
        if ctx.plain_text().ends_with(self.0.as_str()) {
            ctx.set_state(Matched(self.0.clone()));
            return Ok(true);
        }
        Ok(false)
    }

    fn name(&self) -> &str {
        "endswith"
    }
}

/// Passes when any keyword occurs in the text.
pub struct Keyword {
    keywords: BTreeSet<String>,
    normal: bool,
}

impl Keyword {
    /// With `normal`, both keywords and text are normalised before matching.
    pub fn new(keywords: impl IntoIterator<Item = String>, normal: bool) -> Self {
        let keywords = keywords
            .into_iter()
            .map(|k| if normal { normalize(&k) } else { k })
            .collect();
        Self { keywords, normal }
    }
}

#[async_trait]
impl Rule for Keyword {
    async fn check(&self, ctx: &HandlerContext) -> Result<bool, BoxError> {
        let text = ctx.plain_text();
        let text = if self.normal { normalize(&text) } else { text };
        match self.keywords.iter().find(|k| text.contains(k.as_str())) {
            Some(keyword) => {
                ctx.set_state(Matched(keyword.clone()));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "keyword"
    }
}

/// Passes when the pattern is found anywhere in the text.
pub struct Regex {
    regex: regex::Regex,
    normal: bool,
}

impl Regex {
    pub fn new(pattern: &str, normal: bool) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: regex::Regex::new(pattern)?,
            normal,
        })
    }

    pub fn from_regex(regex: regex::Regex, normal: bool) -> Self {
        Self { regex, normal }
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}

#[async_trait]
impl Rule for Regex {
    async fn check(&self, ctx: &HandlerContext) -> Result<bool, BoxError> {
        let text = ctx.plain_text();
        let text = if self.normal { normalize(&text) } else { text };
        let Some(caps) = self.regex.captures(&text) else {
            return Ok(false);
        };

        let groups = caps
            .iter()
            .map(|g| g.map(|m| m.as_str().to_string()))
            .collect();
        let named = self
            .regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                caps.name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect();

        ctx.set_state(Matched(caps[0].to_string()));
        ctx.set_state(RegexMatch { groups, named });
        Ok(true)
    }

    fn name(&self) -> &str {
        "regex"
    }
}

/// Passes when the resolved command is one of `names`.
pub struct Command {
    names: BTreeSet<String>,
}

impl Command {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            names: names.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Rule for Command {
    async fn check(&self, ctx: &HandlerContext) -> Result<bool, BoxError> {
        match ctx.command() {
            Some(cmd) if self.names.contains(&cmd.command) => {
                ctx.set_state(CommandArg(cmd.arg.clone()));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn name(&self) -> &str {
        "command"
    }
}

type ShellParser = Arc<dyn Fn(&HandlerContext, &str, &[String]) + Send + Sync>;

/// A command whose argument is split like a shell command line.
pub struct ShellCommand {
    names: BTreeSet<String>,
    parser: Option<ShellParser>,
}

impl ShellCommand {
    pub fn new(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            names: names.into_iter().collect(),
            parser: None,
        }
    }

    /// Also parses the argv with `P`, storing a
    /// [`ShellArgs<P>`](crate::extractor::ShellArgs).
    #[cfg(feature = "shell")]
    pub fn with_parser<P>(mut self) -> Self
    where
        P: clap::Parser + Send + Sync + 'static,
    {
        self.parser = Some(Arc::new(|ctx: &HandlerContext, command: &str, argv: &[String]| {
            let args = std::iter::once(command.to_string()).chain(argv.iter().cloned());
            let result = P::try_parse_from(args).map_err(|e| e.to_string());
            ctx.set_state(crate::extractor::ShellArgs::<P>::new(result));
        }));
        self
    }
}

#[async_trait]
impl Rule for ShellCommand {
    async fn check(&self, ctx: &HandlerContext) -> Result<bool, BoxError> {
        let Some(cmd) = ctx.command() else {
            return Ok(false);
        };
        if !self.names.contains(&cmd.command) {
            return Ok(false);
        }

        let argv = shell_split(&cmd.arg);
        if let Some(parser) = &self.parser {
            parser(ctx, cmd.command.as_str(), argv.as_slice());
        }
        ctx.set_state(CommandArg(cmd.arg.clone()));
        ctx.set_state(Argv(argv));
        Ok(true)
    }

    fn name(&self) -> &str {
        "shell_command"
    }
}

/// Splits text into arguments, honouring single and double quotes and
/// backslash escapes inside double quotes.
pub fn shell_split(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_single_quote = false;
    let mut in_double_quote = false;
    let mut escape_next = false;
    let mut quoted = false;

    for ch in input.chars() {
        if escape_next {
            current.push(ch);
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_double_quote => escape_next = true,
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                quoted = true;
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                quoted = true;
            }
            c if c.is_whitespace() && !in_single_quote && !in_double_quote => {
                if !current.is_empty() || quoted {
                    args.push(std::mem::take(&mut current));
                }
                quoted = false;
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() || quoted {
        args.push(current);
    }

    args
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use hoshi_core::{BoxedBot, BoxedEvent, ChatEvent, EventType};

    use super::*;
    use crate::context::{CommandMatch, EventContext};
    use crate::matcher::Matcher;
    use crate::testing::{MockBot, context_for};

    fn ctx(text: &str) -> Arc<HandlerContext> {
        let matcher = Arc::new(Matcher::new(EventType::Message));
        context_for(&matcher, ChatEvent::group_message(1, 2, text), MockBot::new("bot"))
    }

    fn command_ctx(command: &str, arg: &str) -> Arc<HandlerContext> {
        let matcher = Arc::new(Matcher::new(EventType::Message));
        let bot: BoxedBot = MockBot::new("bot");
        let base = EventContext::new(
            BoxedEvent::new(ChatEvent::group_message(1, 2, format!("/{command} {arg}"))),
            bot,
            Some(CommandMatch {
                command: command.into(),
                arg: arg.into(),
            }),
            Arc::new(HashSet::new()),
        );
        Arc::new(HandlerContext::new(Arc::new(base), matcher))
    }

    struct Counting(Arc<AtomicUsize>, Result<bool, &'static str>);

    #[async_trait]
    impl Rule for Counting {
        async fn check(&self, _ctx: &HandlerContext) -> Result<bool, BoxError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            self.1.map_err(Into::into)
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("ＨＥＬＬＯ！"), "hello!");
        assert_eq!(normalize("a\u{3000}Ｂ"), "a b");
        assert_eq!(normalize("色图"), "色图");
    }

    #[test]
    fn test_shell_split() {
        assert_eq!(shell_split("a  b\tc"), vec!["a", "b", "c"]);
        assert_eq!(shell_split(r#"say "hello world" 'x y'"#), vec!["say", "hello world", "x y"]);
        assert_eq!(shell_split(r#""a \"b\"""#), vec![r#"a "b""#]);
        assert_eq!(shell_split(r#"x "" y"#), vec!["x", "", "y"]);
        assert!(shell_split("   ").is_empty());
    }

    #[tokio::test]
    async fn test_and_short_circuits_on_false_and_error() {
        for left in [Ok(false), Err("broken")] {
            let calls = Arc::new(AtomicUsize::new(0));
            let rule = Counting(Arc::new(AtomicUsize::new(0)), left)
                .and(Counting(Arc::clone(&calls), Ok(true)));
            assert!(!rule.check(&ctx("x")).await.unwrap());
            assert_eq!(calls.load(Ordering::SeqCst), 0);
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let rule = Counting(Arc::new(AtomicUsize::new(0)), Ok(true))
            .and(Counting(Arc::clone(&calls), Ok(true)));
        assert!(rule.check(&ctx("x")).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prefix_and_suffix_rules() {
        let c = ctx("来点色图");
        assert!(StartsWith("来点".into()).check(&c).await.unwrap());
        assert_eq!(c.get_state::<Matched>(), Some(Matched("来点".into())));
        assert!(EndsWith("色图".into()).check(&c).await.unwrap());
        assert!(!StartsWith("色图".into()).check(&c).await.unwrap());
    }

    #[tokio::test]
    async fn test_keyword_normalizes() {
        let rule = Keyword::new(["ＰＩＮＧ".to_string()], true);
        let c = ctx("say Ping please");
        assert!(rule.check(&c).await.unwrap());
        assert_eq!(c.get_state::<Matched>(), Some(Matched("ping".into())));

        let strict = Keyword::new(["PING".to_string()], false);
        assert!(!strict.check(&ctx("ping")).await.unwrap());
    }

    #[tokio::test]
    async fn test_regex_writes_captures() {
        let rule = Regex::new(r"roll (?P<n>\d+)d(\d+)", true).unwrap();
        let c = ctx("please ＲＯＬＬ 2d6");
        assert!(rule.check(&c).await.unwrap());

        let m = c.get_state::<RegexMatch>().unwrap();
        assert_eq!(m.get(0), Some("roll 2d6"));
        assert_eq!(m.name("n"), Some("2"));
        assert_eq!(m.get(2), Some("6"));
        assert_eq!(c.get_state::<Matched>(), Some(Matched("roll 2d6".into())));

        assert!(!rule.check(&ctx("no dice")).await.unwrap());
    }

    #[tokio::test]
    async fn test_command_rule() {
        let rule = Command::new(["weather".to_string(), "天气".to_string()]);
        let c = command_ctx("天气", "北京");
        assert!(rule.check(&c).await.unwrap());
        assert_eq!(c.get_state::<CommandArg>(), Some(CommandArg("北京".into())));

        assert!(!rule.check(&command_ctx("help", "")).await.unwrap());
        assert!(!rule.check(&ctx("weather")).await.unwrap());
    }

    #[tokio::test]
    async fn test_to_me() {
        let matcher = Arc::new(Matcher::new(EventType::Message));
        let private = context_for(&matcher, ChatEvent::private_message(2, "hi"), MockBot::new("b"));
        assert!(ToMe.check(&private).await.unwrap());
        assert!(!ToMe.check(&ctx("hi")).await.unwrap());
    }

    #[cfg(feature = "shell")]
    #[tokio::test]
    async fn test_shell_command_parses_with_clap() {
        use crate::extractor::ShellArgs;

        #[derive(clap::Parser, Debug)]
        struct Roll {
            #[arg(short, long, default_value_t = 1)]
            count: u32,
            faces: u32,
        }

        let rule = ShellCommand::new(["roll".to_string()]).with_parser::<Roll>();
        let c = command_ctx("roll", "-c 3 20");
        assert!(rule.check(&c).await.unwrap());
        assert_eq!(
            c.get_state::<Argv>(),
            Some(Argv(vec!["-c".into(), "3".into(), "20".into()]))
        );
        let args = c.get_state::<ShellArgs<Roll>>().unwrap();
        let roll = args.result().unwrap();
        assert_eq!((roll.count, roll.faces), (3, 20));

        let c = command_ctx("roll", "--bogus");
        assert!(rule.check(&c).await.unwrap());
        let args = c.get_state::<ShellArgs<Roll>>().unwrap();
        assert!(args.result().is_err());
    }
}
