//! The dispatcher seam between transport and framework.

use async_trait::async_trait;

use crate::bot::BoxedBot;
use crate::event::BoxedEvent;

/// Something that accepts inbound events.
///
/// Adapters hand every parsed event, together with the bot that received
/// it, to a `Dispatcher`. The framework's event dispatcher is the main
/// implementation; tests and bridges may provide their own.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Processes one event to completion.
    async fn dispatch(&self, event: BoxedEvent, bot: BoxedBot);
}
