//! Bot trait and the connected-bot manager.
//!
//! A [`Bot`] is the narrow interface the host needs from a transport client:
//! sending to groups and users and listing joined groups. The protocol itself
//! lives in adapter crates that implement this trait.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::event::Event;
use crate::message::Message;

/// The core Bot trait.
///
/// Concrete implementations (e.g. a OneBot client) provide the raw send
/// operations; [`send`](Bot::send) picks the right one for a reply.
#[async_trait]
pub trait Bot: Send + Sync + 'static {
    /// Returns the bot's unique identifier.
    fn id(&self) -> &str;

    /// Sends a message to a group, returning the message id.
    async fn send_group_msg(&self, group_id: i64, message: &Message) -> ApiResult<i64>;

    /// Sends a private message to a user, returning the message id.
    async fn send_private_msg(&self, user_id: i64, message: &Message) -> ApiResult<i64>;

    /// Lists the ids of the groups this bot has joined.
    async fn get_group_list(&self) -> ApiResult<Vec<i64>>;

    /// Sends a message in response to an event.
    ///
    /// Group events are answered in the group, everything else privately.
    /// Events with neither a group nor a user fail with
    /// [`ApiError::MissingSession`].
    async fn send(&self, event: &dyn Event, message: &Message) -> ApiResult<i64> {
        if let Some(group_id) = event.group_id() {
            self.send_group_msg(group_id, message).await
        } else if let Some(user_id) = event.user_id() {
            self.send_private_msg(user_id, message).await
        } else {
            Err(ApiError::MissingSession)
        }
    }

    /// Returns self as an `Arc<dyn Any>` for safe downcasting.
    ///
    /// ```rust,ignore
    /// fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
    ///     self
    /// }
    /// ```
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A shared Bot trait object.
pub type BoxedBot = Arc<dyn Bot>;

/// Attempts to downcast a [`BoxedBot`] to a concrete bot type.
pub fn downcast_bot<T: Bot>(bot: BoxedBot) -> Option<Arc<T>> {
    Arc::downcast::<T>(bot.as_any()).ok()
}

// ============================================================================
// BotManager
// ============================================================================

/// Registry of the currently connected bots.
#[derive(Default)]
pub struct BotManager {
    bots: RwLock<HashMap<String, BoxedBot>>,
}

impl BotManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a bot, replacing any previous bot with the same id.
    ///
    /// Returns the replaced bot, if any.
    pub fn register(&self, bot: BoxedBot) -> Option<BoxedBot> {
        let id = bot.id().to_string();
        debug!(bot_id = %id, "Registering bot");
        self.bots.write().insert(id, bot)
    }

    /// Removes a bot by id.
    pub fn unregister(&self, id: &str) -> Option<BoxedBot> {
        debug!(bot_id = %id, "Unregistering bot");
        self.bots.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<BoxedBot> {
        self.bots.read().get(id).cloned()
    }

    /// Returns all connected bots, ordered by id.
    pub fn list(&self) -> Vec<BoxedBot> {
        let mut bots: Vec<_> = self.bots.read().values().cloned().collect();
        bots.sort_by(|a, b| a.id().cmp(b.id()));
        bots
    }

    pub fn len(&self) -> usize {
        self.bots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bots.read().is_empty()
    }
}

impl std::fmt::Debug for BotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.bots.read().keys().cloned().collect();
        ids.sort();
        f.debug_struct("BotManager").field("bots", &ids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChatEvent;
    use parking_lot::Mutex;

    struct RecordingBot {
        id: String,
        sent: Mutex<Vec<String>>,
    }

    impl RecordingBot {
        fn new(id: &str) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Bot for RecordingBot {
        fn id(&self) -> &str {
            &self.id
        }

        async fn send_group_msg(&self, group_id: i64, message: &Message) -> ApiResult<i64> {
            self.sent.lock().push(format!("group:{group_id}:{message}"));
            Ok(1)
        }

        async fn send_private_msg(&self, user_id: i64, message: &Message) -> ApiResult<i64> {
            self.sent.lock().push(format!("private:{user_id}:{message}"));
            Ok(2)
        }

        async fn get_group_list(&self) -> ApiResult<Vec<i64>> {
            Ok(vec![])
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    #[tokio::test]
    async fn test_send_routes_by_event_origin() {
        let bot = RecordingBot::new("1");
        let msg = Message::from("pong");

        bot.send(&ChatEvent::group_message(10, 5, "ping"), &msg)
            .await
            .unwrap();
        bot.send(&ChatEvent::private_message(5, "ping"), &msg)
            .await
            .unwrap();
        let err = bot
            .send(&ChatEvent::notice("notice.x", None), &msg)
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::MissingSession));
        assert_eq!(*bot.sent.lock(), vec!["group:10:pong", "private:5:pong"]);
    }

    #[test]
    fn test_manager_lists_sorted_and_downcasts() {
        let manager = BotManager::new();
        manager.register(RecordingBot::new("b"));
        manager.register(RecordingBot::new("a"));

        let ids: Vec<_> = manager.list().iter().map(|b| b.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b"]);

        let bot = manager.get("a").unwrap();
        assert!(downcast_bot::<RecordingBot>(bot).is_some());

        assert!(manager.unregister("a").is_some());
        assert_eq!(manager.len(), 1);
    }
}
