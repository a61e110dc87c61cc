//! Event system for the hoshi bot host.
//!
//! This module provides the event model consumed by the dispatch pipeline:
//!
//! - [`Event`] - Base trait for all inbound events
//! - [`EventType`] - High-level classification (message, notice, request, meta)
//! - [`SenderRole`] - The sender's role inside a group chat
//! - [`BoxedEvent`] - Cheaply clonable, type-erased event handle
//! - [`ChatEvent`] - A concrete, serde-friendly event used by simple adapters
//!
//! The dispatcher only relies on a handful of accessors: the optional group
//! id, the plain text of the message and whether the event was addressed to
//! the bot. Everything protocol specific stays behind the trait.

use std::any::Any;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::message::Message;

// ============================================================================
// Event Type Classification
// ============================================================================

/// Classification of event types.
///
/// Matchers are bound to one event type; a matcher registered through
/// `on_notice` never sees message events and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Message events (private messages, group messages, etc.)
    Message,
    /// Notice events (group changes, recalls, friend adds, etc.)
    Notice,
    /// Request events (friend requests, group join requests, etc.)
    Request,
    /// Meta events (lifecycle, heartbeat, etc.)
    #[serde(alias = "meta_event")]
    Meta,
    /// Other/unknown event types
    #[serde(other)]
    Other,
}

impl EventType {
    /// Returns the lowercase name of this event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Notice => "notice",
            Self::Request => "request",
            Self::Meta => "meta",
            Self::Other => "other",
        }
    }
}

impl FromStr for EventType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "message" => EventType::Message,
            "notice" => EventType::Notice,
            "request" => EventType::Request,
            "meta" | "meta_event" => EventType::Meta,
            _ => EventType::Other,
        })
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role of the sender inside a group chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    /// Regular member.
    #[default]
    Member,
    /// Group administrator.
    Admin,
    /// Group owner.
    Owner,
}

// ============================================================================
// Core Event Trait
// ============================================================================

/// The base trait for all events in the hoshi host.
///
/// Events are type-erased behind [`BoxedEvent`] and can be downcast to their
/// concrete type through [`as_any`](Event::as_any).
///
/// # Example
///
/// ```rust,ignore
/// use hoshi_core::{Event, EventType};
///
/// fn describe(event: &dyn Event) -> String {
///     match event.group_id() {
///         Some(group) => format!("{} in group {group}", event.event_name()),
///         None => event.event_name().to_string(),
///     }
/// }
/// ```
pub trait Event: Any + Send + Sync {
    /// Returns the high-level event type classification.
    fn event_type(&self) -> EventType;

    /// Returns a human-readable name for this event (e.g. `message.group`).
    fn event_name(&self) -> &str;

    /// Returns the group this event happened in, if any.
    fn group_id(&self) -> Option<i64> {
        None
    }

    /// Returns the user that triggered this event, if any.
    fn user_id(&self) -> Option<i64> {
        None
    }

    /// Returns the message carried by this event, if any.
    fn message(&self) -> Option<&Message> {
        None
    }

    /// Extracts the plain text of the event's message.
    ///
    /// Non-message events yield an empty string.
    fn plain_text(&self) -> String {
        self.message()
            .map(Message::extract_plain_text)
            .unwrap_or_default()
    }

    /// Returns `true` when the event was explicitly directed at the bot
    /// (a mention, a reply to the bot, or a private message).
    fn is_to_me(&self) -> bool {
        false
    }

    /// Returns the sender's role in the group, for group events.
    fn sender_role(&self) -> Option<SenderRole> {
        None
    }

    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

// ============================================================================
// Boxed Event
// ============================================================================

/// A type-erased container for events that supports runtime downcasting.
///
/// `BoxedEvent` wraps any [`Event`] in an `Arc`, so it can be handed to every
/// matcher of a dispatch cycle without copying.
///
/// `BoxedEvent` implements `Deref<Target = dyn Event>`:
///
/// ```rust,ignore
/// let event: BoxedEvent = /* ... */;
/// let text = event.plain_text();
/// let group = event.group_id();
/// ```
#[derive(Clone)]
pub struct BoxedEvent {
    inner: Arc<dyn Event>,
}

impl BoxedEvent {
    /// Creates a new `BoxedEvent` from any type implementing `Event`.
    pub fn new<E: Event + 'static>(event: E) -> Self {
        Self {
            inner: Arc::new(event),
        }
    }

    /// Returns the inner `Arc<dyn Event>`.
    pub fn inner(&self) -> &Arc<dyn Event> {
        &self.inner
    }

    /// Attempts to downcast to a concrete event type.
    pub fn downcast_ref<E: Event + 'static>(&self) -> Option<&E> {
        self.inner.as_any().downcast_ref()
    }
}

impl std::ops::Deref for BoxedEvent {
    type Target = dyn Event;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl AsRef<dyn Event> for BoxedEvent {
    fn as_ref(&self) -> &(dyn Event + 'static) {
        self.inner.as_ref()
    }
}

impl fmt::Debug for BoxedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedEvent")
            .field("event_name", &self.event_name())
            .field("group_id", &self.group_id())
            .field("user_id", &self.user_id())
            .finish()
    }
}

impl<E: Event + 'static> From<E> for BoxedEvent {
    fn from(event: E) -> Self {
        Self::new(event)
    }
}

// ============================================================================
// ChatEvent
// ============================================================================

/// A concrete event covering the shapes the host cares about.
///
/// Adapters with a richer model implement [`Event`] themselves; `ChatEvent`
/// is enough for protocols that can be flattened into these fields, and it
/// deserializes from a OneBot-like JSON object.
///
/// ```rust,ignore
/// let event = ChatEvent::group_message(10086, 42, "/ping").to_me(true);
/// dispatcher.dispatch(event.into(), bot).await;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEvent {
    /// Event classification.
    #[serde(rename = "post_type")]
    pub event_type: EventType,
    /// Detailed name, e.g. `message.group` or `notice.group_increase`.
    #[serde(default)]
    pub name: String,
    /// Group id for group events.
    #[serde(default)]
    pub group_id: Option<i64>,
    /// Triggering user.
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Message content for message events.
    #[serde(default)]
    pub message: Option<Message>,
    /// Whether the event was addressed to the bot.
    #[serde(default)]
    pub to_me: bool,
    /// Sender role for group events.
    #[serde(default)]
    pub role: Option<SenderRole>,
}

impl ChatEvent {
    /// Creates a group message event.
    pub fn group_message(group_id: i64, user_id: i64, message: impl Into<Message>) -> Self {
        Self {
            event_type: EventType::Message,
            name: "message.group".to_string(),
            group_id: Some(group_id),
            user_id: Some(user_id),
            message: Some(message.into()),
            to_me: false,
            role: Some(SenderRole::Member),
        }
    }

    /// Creates a private message event. Private messages are always to-me.
    pub fn private_message(user_id: i64, message: impl Into<Message>) -> Self {
        Self {
            event_type: EventType::Message,
            name: "message.private".to_string(),
            group_id: None,
            user_id: Some(user_id),
            message: Some(message.into()),
            to_me: true,
            role: None,
        }
    }

    /// Creates a notice event, optionally bound to a group.
    pub fn notice(name: impl Into<String>, group_id: Option<i64>) -> Self {
        Self {
            event_type: EventType::Notice,
            name: name.into(),
            group_id,
            user_id: None,
            message: None,
            to_me: false,
            role: None,
        }
    }

    /// Creates a request event, optionally bound to a group.
    pub fn request(name: impl Into<String>, group_id: Option<i64>, user_id: i64) -> Self {
        Self {
            event_type: EventType::Request,
            name: name.into(),
            group_id,
            user_id: Some(user_id),
            message: None,
            to_me: false,
            role: None,
        }
    }

    /// Sets the to-me flag.
    pub fn to_me(mut self, to_me: bool) -> Self {
        self.to_me = to_me;
        self
    }

    /// Sets the sender's group role.
    pub fn role(mut self, role: SenderRole) -> Self {
        self.role = Some(role);
        self
    }
}

impl Event for ChatEvent {
    fn event_type(&self) -> EventType {
        self.event_type
    }

    fn event_name(&self) -> &str {
        if self.name.is_empty() {
            self.event_type.as_str()
        } else {
            &self.name
        }
    }

    fn group_id(&self) -> Option<i64> {
        self.group_id
    }

    fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    fn is_to_me(&self) -> bool {
        self.to_me
    }

    fn sender_role(&self) -> Option<SenderRole> {
        self.role
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_from_str() {
        assert_eq!("message".parse::<EventType>(), Ok(EventType::Message));
        assert_eq!("META_EVENT".parse::<EventType>(), Ok(EventType::Meta));
        assert_eq!("whatever".parse::<EventType>(), Ok(EventType::Other));
    }

    #[test]
    fn test_group_message_accessors() {
        let event = ChatEvent::group_message(100, 7, "hello world");
        assert_eq!(event.group_id(), Some(100));
        assert_eq!(event.user_id(), Some(7));
        assert_eq!(event.plain_text(), "hello world");
        assert!(!event.is_to_me());
        assert_eq!(event.event_name(), "message.group");
    }

    #[test]
    fn test_private_message_is_to_me() {
        let event = ChatEvent::private_message(7, "hi");
        assert!(event.is_to_me());
        assert_eq!(event.group_id(), None);
    }

    #[test]
    fn test_notice_has_no_text() {
        let event = ChatEvent::notice("notice.group_increase", Some(5));
        assert_eq!(event.plain_text(), "");
        assert_eq!(event.event_type(), EventType::Notice);
    }

    #[test]
    fn test_deserialize_onebot_like_json() {
        let json = r#"{
            "post_type": "message",
            "name": "message.group",
            "group_id": 123,
            "user_id": 456,
            "message": [{"type": "text", "data": {"text": "ping"}}],
            "to_me": true,
            "role": "admin"
        }"#;
        let event: ChatEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, EventType::Message);
        assert_eq!(event.plain_text(), "ping");
        assert_eq!(event.sender_role(), Some(SenderRole::Admin));
    }

    #[test]
    fn test_boxed_event_downcast() {
        let boxed = BoxedEvent::new(ChatEvent::private_message(1, "x"));
        assert!(boxed.downcast_ref::<ChatEvent>().is_some());
        assert_eq!(boxed.user_id(), Some(1));
    }
}
