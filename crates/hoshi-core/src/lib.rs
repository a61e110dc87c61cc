//! # Hoshi Core
//!
//! Protocol-independent building blocks of the hoshi bot host.
//!
//! - **Events**: [`Event`], [`BoxedEvent`] and the concrete [`ChatEvent`]
//! - **Messages**: segment based [`Message`]
//! - **Bots**: the transport-client [`Bot`] trait and the connected [`BotManager`]
//! - **Dispatch seam**: the [`Dispatcher`] trait adapters feed events into
//!
//! ```text
//! ┌─────────────┐     ┌────────────┐     ┌───────────┐
//! │   Adapter   │────▶│ Dispatcher │────▶│  Matcher  │
//! │   (Bot)     │     │            │────▶│  Matcher  │
//! └─────────────┘     └────────────┘     └───────────┘
//! ```

pub mod bot;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod message;

pub use bot::{Bot, BotManager, BoxedBot, downcast_bot};
pub use dispatcher::Dispatcher;
pub use error::{ApiError, ApiResult};
pub use event::{BoxedEvent, ChatEvent, Event, EventType, SenderRole};
pub use message::{Message, Segment};
