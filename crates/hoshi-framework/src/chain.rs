//! Handler-chain engine.
//!
//! A matcher owns an ordered list of [`Step`]s. Running the chain walks the
//! steps from a resume point; a step may end the chain, or suspend it until
//! the next message of the same conversation arrives. Suspension is reported
//! as [`ChainOutcome::Suspended`] and turned into a session by the
//! dispatcher.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tower::BoxError;
use tracing::{debug, error};

use hoshi_core::Message;

use crate::context::HandlerContext;
use crate::handler::{BoxedHandler, Flow};

/// Custom parser for a `got` argument.
///
/// Receives the context of the answering event and its plain text, and is
/// expected to store the argument with [`HandlerContext::set_arg`]. Leaving
/// the argument unset re-prompts.
pub type ArgParser = Arc<dyn Fn(&HandlerContext, &str) -> Result<(), BoxError> + Send + Sync>;

/// One step of a handler chain.
pub enum Step {
    /// Run the handler with the current event.
    Handle(BoxedHandler),
    /// Wait for the next message, then run the handler with it.
    Receive(BoxedHandler),
    /// Make sure argument `key` is present, prompting for it if needed.
    Got {
        key: String,
        prompt: Option<Message>,
        parser: Option<ArgParser>,
        handler: BoxedHandler,
    },
}

impl Step {
    fn kind(&self) -> &'static str {
        match self {
            Step::Handle(_) => "handle",
            Step::Receive(_) => "receive",
            Step::Got { .. } => "got",
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Got { key, prompt, .. } => f
                .debug_struct("Got")
                .field("key", key)
                .field("prompt", prompt)
                .finish_non_exhaustive(),
            other => f.write_str(other.kind()),
        }
    }
}

/// How a chain run ended.
#[derive(Debug)]
pub enum ChainOutcome {
    /// All steps ran, or a step finished the chain.
    Completed,
    /// The chain waits for the next message and resumes at `step`.
    Suspended { step: usize },
    /// A handler returned an error or panicked.
    Failed(BoxError),
}

impl ChainOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ChainOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&BoxError> {
        match self {
            ChainOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> BoxError {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };
    format!("handler panicked: {message}").into()
}

async fn prompt(ctx: &HandlerContext, message: &Message) {
    if let Err(e) = ctx.send(message.clone()).await {
        error!(matcher = %ctx.matcher_id(), error = %e, "Failed to send prompt");
    }
}

/// Runs the matcher's chain from the context's resume point.
///
/// Errors and panics inside handlers are captured as
/// [`ChainOutcome::Failed`]; they never propagate to the caller.
pub(crate) async fn run(ctx: Arc<HandlerContext>) -> ChainOutcome {
    let matcher = Arc::clone(ctx.matcher());
    let resume = ctx.resume();
    let mut index = resume.step;
    let mut fresh_input = resume.fresh_input;

    while let Some(step) = matcher.step(index) {
        let handler = match step.as_ref() {
            Step::Handle(handler) => handler,
            Step::Receive(handler) => {
                if !fresh_input {
                    return ChainOutcome::Suspended { step: index };
                }
                handler
            }
            Step::Got {
                key,
                prompt: question,
                parser,
                handler,
            } => {
                if fresh_input && !ctx.state().has_arg(key) {
                    let text = ctx.plain_text();
                    let parsed = match parser {
                        Some(parser) => parser(ctx.as_ref(), text.as_str()),
                        None => {
                            ctx.set_arg(key.clone(), text);
                            Ok(())
                        }
                    };
                    if let Err(e) = parsed {
                        return ChainOutcome::Failed(e);
                    }
                }
                if !ctx.state().has_arg(key) {
                    if let Some(question) = question {
                        prompt(&ctx, question).await;
                    }
                    return ChainOutcome::Suspended { step: index };
                }
                handler
            }
        };
        fresh_input = false;

        debug!(matcher = %ctx.matcher_id(), step = index, kind = step.kind(), "Running step");
        let flow = match AssertUnwindSafe(handler(Arc::clone(&ctx)))
            .catch_unwind()
            .await
        {
            Ok(Ok(flow)) => flow,
            Ok(Err(e)) => return ChainOutcome::Failed(e),
            Err(payload) => return ChainOutcome::Failed(panic_error(payload)),
        };

        match flow {
            Flow::Continue => index += 1,
            Flow::Finish => return ChainOutcome::Completed,
            Flow::Reject => {
                if let Step::Got { key, .. } = step.as_ref() {
                    ctx.remove_arg(key);
                }
                return ChainOutcome::Suspended { step: index };
            }
            Flow::Pause => {
                index += 1;
                return if matcher.step(index).is_some() {
                    ChainOutcome::Suspended { step: index }
                } else {
                    ChainOutcome::Completed
                };
            }
        }
    }

    ChainOutcome::Completed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::into_handler;
    use crate::testing::{MockBot, context_for};
    use crate::matcher::Matcher;
    use hoshi_core::{ChatEvent, EventType};

    fn matcher() -> Arc<Matcher> {
        Arc::new(Matcher::new(EventType::Message))
    }

    #[tokio::test]
    async fn test_steps_run_in_order_until_finish() {
        let bot = MockBot::new("1");
        let m = matcher();
        m.push_step(Step::Handle(into_handler(|ctx: Arc<HandlerContext>| async move {
            ctx.set_arg("a", "1");
        })));
        m.push_step(Step::Handle(into_handler(|ctx: Arc<HandlerContext>| async move {
            ctx.finish("done").await
        })));
        m.push_step(Step::Handle(into_handler(|| async {
            if true {
                panic!("unreachable step");
            }
        })));

        let ctx = context_for(&m, ChatEvent::group_message(10, 5, "hi"), bot.clone());
        let outcome = run(Arc::clone(&ctx)).await;

        assert!(matches!(outcome, ChainOutcome::Completed));
        assert_eq!(ctx.arg("a").as_deref(), Some("1"));
        assert_eq!(bot.sent(), vec!["group:10:done"]);
    }

    #[tokio::test]
    async fn test_got_prompts_and_suspends() {
        let bot = MockBot::new("1");
        let m = matcher();
        m.push_step(Step::Got {
            key: "city".into(),
            prompt: Some("which city?".into()),
            parser: None,
            handler: into_handler(|| async {}),
        });

        let ctx = context_for(&m, ChatEvent::group_message(10, 5, "/weather"), bot.clone());
        let outcome = run(ctx).await;

        assert!(matches!(outcome, ChainOutcome::Suspended { step: 0 }));
        assert_eq!(bot.sent(), vec!["group:10:which city?"]);
    }

    #[tokio::test]
    async fn test_receive_waits_for_fresh_input() {
        let bot = MockBot::new("1");
        let m = matcher();
        m.push_step(Step::Receive(into_handler(|| async {})));

        let ctx = context_for(&m, ChatEvent::group_message(10, 5, "x"), bot);
        assert!(matches!(run(ctx).await, ChainOutcome::Suspended { step: 0 }));
    }

    #[tokio::test]
    async fn test_errors_and_panics_are_captured() {
        let bot = MockBot::new("1");

        let failing = matcher();
        failing.push_step(Step::Handle(into_handler(|| async {
            Err::<(), BoxError>("boom".into())
        })));
        let ctx = context_for(&failing, ChatEvent::group_message(10, 5, "x"), bot.clone());
        let outcome = run(ctx).await;
        assert_eq!(outcome.error().map(|e| e.to_string()).as_deref(), Some("boom"));

        let panicking = matcher();
        panicking.push_step(Step::Handle(into_handler(|| async {
            if true {
                panic!("kaboom");
            }
        })));
        let ctx = context_for(&panicking, ChatEvent::group_message(10, 5, "x"), bot);
        let outcome = run(ctx).await;
        assert!(outcome.is_failed());
        assert!(outcome.error().unwrap().to_string().contains("kaboom"));
    }

    #[tokio::test]
    async fn test_pause_on_last_step_completes() {
        let bot = MockBot::new("1");
        let m = matcher();
        m.push_step(Step::Handle(into_handler(|ctx: Arc<HandlerContext>| async move {
            ctx.pause("bye").await
        })));

        let ctx = context_for(&m, ChatEvent::group_message(10, 5, "x"), bot);
        assert!(matches!(run(ctx).await, ChainOutcome::Completed));
    }

    #[tokio::test]
    async fn test_missing_extractor_fails_handler() {
        use crate::extractor::CommandArg;

        let bot = MockBot::new("1");
        let m = matcher();
        m.push_step(Step::Handle(into_handler(|_arg: CommandArg| async {})));

        let ctx = context_for(&m, ChatEvent::group_message(10, 5, "x"), bot);
        assert!(run(ctx).await.is_failed());
    }
}
