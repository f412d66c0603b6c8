//! Time-boxed per-conversation context
//!
//! Sessions expire after a period of inactivity. Every read or write slides
//! the deadline; expired sessions behave as absent. They are dropped when
//! touched, by a sweep that `append` runs at most once per timeout period,
//! or by [`SessionStore::evict_expired`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::SessionConfig;

#[derive(Debug, Clone)]
struct Session {
    context: Vec<Value>,
    created_at: DateTime<Utc>,
    last_access: Instant,
}

/// Snapshot of one session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: String,
    pub context: Vec<Value>,
    pub created_at: DateTime<Utc>,
}

pub struct SessionStore {
    sessions: DashMap<String, Session>,
    timeout: Duration,
    last_sweep: Mutex<Instant>,
}

impl SessionStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout,
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(Duration::from_secs(config.timeout_secs))
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn expired(&self, session: &Session, now: Instant) -> bool {
        now.duration_since(session.last_access) >= self.timeout
    }

    /// Append one entry to a session's context, creating the session (or
    /// replacing an expired one). Returns the new context length.
    pub fn append(&self, id: &str, entry: Value) -> usize {
        let now = Instant::now();
        // must run before an entry guard is held; retain locks every shard
        self.sweep_if_due(now);
        let mut session = self.sessions.entry(id.to_string()).or_insert_with(|| Session {
            context: Vec::new(),
            created_at: Utc::now(),
            last_access: now,
        });
        if self.expired(&session, now) {
            debug!(session = %id, "session expired; starting fresh");
            session.context.clear();
            session.created_at = Utc::now();
        }
        session.context.push(entry);
        session.last_access = now;
        session.context.len()
    }

    /// Context of a live session, refreshing its deadline
    pub fn context(&self, id: &str) -> Option<Vec<Value>> {
        self.snapshot(id).map(|snapshot| snapshot.context)
    }

    pub fn snapshot(&self, id: &str) -> Option<SessionSnapshot> {
        let now = Instant::now();
        {
            let mut session = self.sessions.get_mut(id)?;
            if !self.expired(&session, now) {
                session.last_access = now;
                return Some(SessionSnapshot {
                    id: id.to_string(),
                    context: session.context.clone(),
                    created_at: session.created_at,
                });
            }
        }
        // expired; removed once the shard guard is released
        self.sessions.remove(id);
        None
    }

    pub fn remove(&self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Drop every expired session, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !self.expired(session, now));
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            debug!(evicted, "expired sessions evicted");
        }
        evicted
    }

    fn sweep_if_due(&self, now: Instant) {
        {
            let mut last_sweep = self.last_sweep.lock();
            if now.duration_since(*last_sweep) < self.timeout {
                return;
            }
            *last_sweep = now;
        }
        self.evict_expired();
    }

    /// Number of stored sessions, including expired ones not yet evicted
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn activity_slides_the_deadline() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert_eq!(store.append("s1", json!({"role": "user", "text": "hi"})), 1);

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(store.context("s1").map(|c| c.len()), Some(1));

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(store.append("s1", json!("again")), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.context("s1").is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_only_expired_sessions() {
        let store = SessionStore::new(Duration::from_secs(10));
        store.append("old", json!(1));
        tokio::time::advance(Duration::from_secs(8)).await;
        store.append("fresh", json!(2));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(store.evict_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.context("fresh").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_sessions_are_swept_by_later_appends() {
        let store = SessionStore::new(Duration::from_secs(30));
        for id in ["a", "b", "c"] {
            store.append(id, json!(id));
        }
        tokio::time::advance(Duration::from_secs(31)).await;

        store.append("d", json!("d"));
        assert_eq!(store.len(), 1);

        // within the same period no further sweep runs
        tokio::time::advance(Duration::from_secs(10)).await;
        store.append("e", json!("e"));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_restarts_on_append() {
        let store = SessionStore::new(Duration::from_secs(1));
        store.append("s", json!("a"));
        store.append("s", json!("b"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.append("s", json!("c")), 1);
        assert_eq!(store.context("s"), Some(vec![json!("c")]));
    }
}
