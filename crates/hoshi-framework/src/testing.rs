//! Shared fixtures for unit tests.

use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use hoshi_core::{ApiError, ApiResult, Bot, BoxedBot, BoxedEvent, ChatEvent, Message};

use crate::context::{EventContext, HandlerContext};
use crate::matcher::Matcher;

/// A bot that records every message it sends.
pub(crate) struct MockBot {
    id: String,
    groups: Vec<i64>,
    failing_groups: HashSet<i64>,
    broken_group_list: bool,
    sent: Mutex<Vec<String>>,
}

impl MockBot {
    pub(crate) fn new(id: &str) -> Arc<Self> {
        Self::with_groups(id, &[], &[])
    }

    pub(crate) fn with_groups(id: &str, groups: &[i64], failing: &[i64]) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            groups: groups.to_vec(),
            failing_groups: failing.iter().copied().collect(),
            broken_group_list: false,
            sent: Mutex::new(Vec::new()),
        })
    }

    /// A bot whose group list cannot be fetched.
    pub(crate) fn broken(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            groups: Vec::new(),
            failing_groups: HashSet::new(),
            broken_group_list: true,
            sent: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Bot for MockBot {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send_group_msg(&self, group_id: i64, message: &Message) -> ApiResult<i64> {
        if self.failing_groups.contains(&group_id) {
            return Err(ApiError::Failed {
                retcode: 100,
                message: "group muted".into(),
            });
        }
        let mut sent = self.sent.lock();
        sent.push(format!("group:{group_id}:{message}"));
        Ok(sent.len() as i64)
    }

    async fn send_private_msg(&self, user_id: i64, message: &Message) -> ApiResult<i64> {
        let mut sent = self.sent.lock();
        sent.push(format!("private:{user_id}:{message}"));
        Ok(sent.len() as i64)
    }

    async fn get_group_list(&self) -> ApiResult<Vec<i64>> {
        if self.broken_group_list {
            return Err(ApiError::Timeout);
        }
        Ok(self.groups.clone())
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Builds a fresh handler context for `matcher` without a command match.
pub(crate) fn context_for(
    matcher: &Arc<Matcher>,
    event: ChatEvent,
    bot: Arc<MockBot>,
) -> Arc<HandlerContext> {
    let bot: BoxedBot = bot;
    let base = EventContext::new(BoxedEvent::new(event), bot, None, Arc::new(HashSet::new()));
    Arc::new(HandlerContext::new(Arc::new(base), Arc::clone(matcher)))
}
