//! Handler system for the hoshi framework.
//!
//! Handlers are plain async functions or closures whose parameters implement
//! [`FromContext`]. The [`Handler`] trait is implemented for them through
//! blanket implementations for every arity, Axum style.
//!
//! The return value decides what the chain does next, through [`IntoFlow`]:
//!
//! - `()` continues with the next step
//! - `String` / [`Message`] are sent as a reply, then the chain continues
//! - [`Flow`] is obeyed as-is (see [`HandlerContext::finish`] and friends)
//! - `Result<T, E>` fails the chain on `Err`
//! - `Option<T>` continues on `None`
//!
//! # Example
//!
//! ```rust,ignore
//! async fn ping() -> String {
//!     "pong".to_string()
//! }
//!
//! async fn echo(ctx: Arc<HandlerContext>, CommandArg(arg): CommandArg) -> Flow {
//!     ctx.finish(arg).await
//! }
//!
//! async fn lookup(PlainText(text): PlainText) -> Result<String, BoxError> {
//!     Ok(format!("you said {text}"))
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tower::BoxError;
use tracing::error;

use hoshi_core::Message;

use crate::context::HandlerContext;
use crate::extractor::FromContext;

// ============================================================================
// Flow
// ============================================================================

/// What the handler chain does after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Flow {
    /// Run the next step.
    #[default]
    Continue,
    /// End the chain.
    Finish,
    /// Wait for the next message and re-run the current step with it.
    Reject,
    /// Wait for the next message and run the next step with it.
    Pause,
}

// ============================================================================
// IntoFlow - Handle handler return values
// ============================================================================

/// Types a handler may return.
#[async_trait]
pub trait IntoFlow: Send {
    async fn into_flow(self, ctx: &HandlerContext) -> Result<Flow, BoxError>;
}

#[async_trait]
impl IntoFlow for () {
    async fn into_flow(self, _ctx: &HandlerContext) -> Result<Flow, BoxError> {
        Ok(Flow::Continue)
    }
}

#[async_trait]
impl IntoFlow for Flow {
    async fn into_flow(self, _ctx: &HandlerContext) -> Result<Flow, BoxError> {
        Ok(self)
    }
}

/// Sends the string as a reply; send failures are logged.
#[async_trait]
impl IntoFlow for String {
    async fn into_flow(self, ctx: &HandlerContext) -> Result<Flow, BoxError> {
        Message::from(self).into_flow(ctx).await
    }
}

#[async_trait]
impl IntoFlow for Message {
    async fn into_flow(self, ctx: &HandlerContext) -> Result<Flow, BoxError> {
        if let Err(e) = ctx.send(self).await {
            error!(matcher = %ctx.matcher_id(), error = %e, "Failed to send message");
        }
        Ok(Flow::Continue)
    }
}

#[async_trait]
impl<T: IntoFlow> IntoFlow for Option<T> {
    async fn into_flow(self, ctx: &HandlerContext) -> Result<Flow, BoxError> {
        match self {
            Some(t) => t.into_flow(ctx).await,
            None => Ok(Flow::Continue),
        }
    }
}

#[async_trait]
impl<T, E> IntoFlow for Result<T, E>
where
    T: IntoFlow,
    E: Into<BoxError> + Send + 'static,
{
    async fn into_flow(self, ctx: &HandlerContext) -> Result<Flow, BoxError> {
        match self {
            Ok(t) => t.into_flow(ctx).await,
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// The core trait for event handlers.
///
/// Implemented automatically for async functions that take 0-12 parameters
/// implementing [`FromContext`] and return a type implementing [`IntoFlow`].
/// A parameter that cannot be extracted fails the handler.
#[async_trait]
pub trait Handler<T>: Clone + Send + Sync + 'static {
    /// Call the handler with the given context.
    async fn call(self, ctx: Arc<HandlerContext>) -> Result<Flow, BoxError>;
}

/// A type-erased handler stored in a matcher's step list.
pub type BoxedHandler =
    Arc<dyn Fn(Arc<HandlerContext>) -> BoxFuture<'static, Result<Flow, BoxError>> + Send + Sync>;

/// Convert a handler function into a boxed handler.
pub fn into_handler<F, T>(f: F) -> BoxedHandler
where
    F: Handler<T>,
    T: 'static,
{
    Arc::new(move |ctx| f.clone().call(ctx))
}

macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case)]
        #[async_trait]
        impl<F, Fut, Res, $($ty,)*> Handler<($($ty,)*)> for F
        where
            F: FnOnce($($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: IntoFlow + 'static,
            $( $ty: FromContext + Send + 'static, )*
        {
            async fn call(self, ctx: Arc<HandlerContext>) -> Result<Flow, BoxError> {
                $(
                    let $ty = $ty::from_context(&ctx)?;
                )*

                let res = (self)($($ty,)*).await;
                res.into_flow(&ctx).await
            }
        }
    };
}

impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8, T9, T10, T11, T12);
