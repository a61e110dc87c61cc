//! Suspended handler chains, keyed by conversation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use hoshi_core::Event;

use crate::context::State;
use crate::matcher::Matcher;

/// Identifies a conversation: one user in one group (or in private) as seen
/// by one bot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub bot_id: String,
    pub group_id: Option<i64>,
    pub user_id: i64,
}

impl SessionKey {
    /// Returns `None` for events without a user.
    pub fn from_event(bot_id: &str, event: &dyn Event) -> Option<Self> {
        Some(Self {
            bot_id: bot_id.to_string(),
            group_id: event.group_id(),
            user_id: event.user_id()?,
        })
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.group_id {
            Some(group_id) => write!(f, "{}/{}/{}", self.bot_id, group_id, self.user_id),
            None => write!(f, "{}/private/{}", self.bot_id, self.user_id),
        }
    }
}

/// A chain waiting for the next message of its conversation.
pub struct Session {
    pub(crate) matcher: Arc<Matcher>,
    pub(crate) state: Arc<State>,
    pub(crate) step: usize,
    expires_at: Instant,
}

impl Session {
    pub fn matcher(&self) -> &Arc<Matcher> {
        &self.matcher
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("matcher", &self.matcher.id())
            .field("step", &self.step)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Live sessions with a fixed lifetime.
pub struct SessionStore {
    sessions: Mutex<HashMap<SessionKey, Session>>,
    expire: Duration,
}

impl SessionStore {
    pub fn new(expire: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            expire,
        }
    }

    pub fn expire(&self) -> Duration {
        self.expire
    }

    /// Stores a suspended chain, replacing any session of the same
    /// conversation.
    pub(crate) fn insert(
        &self,
        key: SessionKey,
        matcher: Arc<Matcher>,
        state: Arc<State>,
        step: usize,
    ) {
        debug!(session = %key, matcher = %matcher.id(), step, "Session suspended");
        let session = Session {
            matcher,
            state,
            step,
            expires_at: Instant::now() + self.expire,
        };
        self.sessions.lock().insert(key, session);
    }

    /// Removes and returns the live session of a conversation. An expired
    /// session is dropped and `None` returned.
    pub(crate) fn take(&self, key: &SessionKey) -> Option<Session> {
        let session = self.sessions.lock().remove(key)?;
        if session.is_expired() {
            debug!(session = %key, matcher = %session.matcher.id(), "Session expired");
            return None;
        }
        Some(session)
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        self.sessions
            .lock()
            .get(key)
            .is_some_and(|s| !s.is_expired())
    }

    /// Drops every expired session, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired());
        before - sessions.len()
    }

    /// Drops every session, returning how many were live or expired.
    pub fn clear(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let dropped = sessions.len();
        sessions.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .field("expire", &self.expire)
            .finish()
    }
}
