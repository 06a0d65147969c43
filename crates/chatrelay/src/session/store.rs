//! Session store.
//!
//! Sessions live in a sharded concurrent map, so requests touching different
//! sessions never wait on each other. Every read hands out an owned snapshot;
//! the message list is only ever mutated here.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tracing::debug;

use super::id::generate_session_id;
use crate::llm::{Message, Role};

// ============================================================================
// Types
// ============================================================================

/// A stored conversation turn. Content is always sanitized before it gets here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

impl From<&ChatMessage> for Message {
    fn from(msg: &ChatMessage) -> Self {
        Message {
            role: msg.role,
            content: msg.content.clone(),
        }
    }
}

/// A bounded, time-limited conversation.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Advisory attribution only.
    pub origin_ip: Option<String>,
    messages: VecDeque<ChatMessage>,
}

impl Session {
    fn new(id: String, origin_ip: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_activity: now,
            origin_ip,
            messages: VecDeque::new(),
        }
    }

    /// Messages in insertion order, oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    fn push(&mut self, message: ChatMessage, cap: usize) {
        self.messages.push_back(message);
        while self.messages.len() > cap {
            self.messages.pop_front();
        }
        self.last_activity = Utc::now();
    }

    fn is_expired(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_activity) > max_age
    }
}

// ============================================================================
// SessionStore
// ============================================================================

/// Owner of all session state. Cloning is cheap and clones share state.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<DashMap<String, Session>>,
    max_messages: usize,
}

impl SessionStore {
    pub fn new(max_messages: usize) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            max_messages: max_messages.max(1),
        }
    }

    /// Create a session under a freshly generated id.
    pub fn create(&self, origin_ip: Option<String>) -> Session {
        loop {
            let id = generate_session_id();
            match self.sessions.entry(id.clone()) {
                Entry::Vacant(vacant) => {
                    let session = Session::new(id, origin_ip);
                    vacant.insert(session.clone());
                    debug!(session_id = %session.id, "Session created");
                    return session;
                }
                Entry::Occupied(_) => continue,
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).map(|s| s.clone())
    }

    /// Fetch a session, creating an empty one under `id` if absent.
    ///
    /// Returns the session and whether it was created.
    pub fn get_or_create(&self, id: &str, origin_ip: Option<String>) -> (Session, bool) {
        let mut created = false;
        let session = self
            .sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                created = true;
                Session::new(id.to_string(), origin_ip)
            })
            .clone();
        if created {
            debug!(session_id = %id, "Session recreated for unknown id");
        }
        (session, created)
    }

    /// Append a message, evicting the oldest ones beyond the history cap.
    ///
    /// Returns the new message count, or `None` if the session does not exist.
    pub fn append(&self, id: &str, message: ChatMessage) -> Option<usize> {
        let mut session = self.sessions.get_mut(id)?;
        session.push(message, self.max_messages);
        Some(session.message_count())
    }

    /// All stored messages, oldest first.
    pub fn messages(&self, id: &str) -> Option<Vec<ChatMessage>> {
        self.sessions
            .get(id)
            .map(|s| s.messages().cloned().collect())
    }

    /// The last `n` stored messages, oldest first.
    pub fn recent_messages(&self, id: &str, n: usize) -> Option<Vec<ChatMessage>> {
        self.sessions.get(id).map(|s| {
            let skip = s.message_count().saturating_sub(n);
            s.messages().skip(skip).cloned().collect()
        })
    }

    pub fn delete(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Remove sessions idle for longer than `max_age`. Returns removed ids.
    pub fn sweep(&self, max_age: Duration) -> Vec<String> {
        self.sweep_at(Utc::now(), max_age)
    }

    /// Like [`sweep`](Self::sweep) with an explicit clock.
    ///
    /// Candidates are collected first and then removed one at a time with a
    /// re-check, so no shard lock is held across more than one session.
    pub fn sweep_at(&self, now: DateTime<Utc>, max_age: Duration) -> Vec<String> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);

        let candidates: Vec<String> = self
            .sessions
            .iter()
            .filter(|s| s.is_expired(now, max_age))
            .map(|s| s.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter(|id| {
                self.sessions
                    .remove_if(id, |_, s| s.is_expired(now, max_age))
                    .is_some()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&self, id: &str, at: DateTime<Utc>) {
        if let Some(mut session) = self.sessions.get_mut(id) {
            session.last_activity = at;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
