//! Session Store - In-Memory Session Lifecycle
//!
//! Capacity-bounded map from [`SessionId`] to [`Session`]. Reads check the
//! TTL and evict lazily; [`SessionStore::spawn_sweeper`] evicts in the
//! background.

use super::{Session, SessionError, SessionId, SessionSummary, SessionUpdate};
use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct StoreInner {
    sessions: DashMap<SessionId, Session>,
    ttl: Duration,
    max_sessions: usize,
    clock: Arc<dyn Clock>,

    /// Serializes the capacity check with the insert in `create`
    create_lock: Mutex<()>,
}

/// Shared handle to the session map. Clones refer to the same sessions.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

/// Point-in-time store counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Entries currently held, expired or not
    pub total: usize,
    pub active: usize,
    /// Expired entries not yet evicted
    pub expired: usize,
    pub max_sessions: usize,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                sessions: DashMap::new(),
                ttl: config.ttl(),
                max_sessions: config.max_sessions,
                clock,
                create_lock: Mutex::new(()),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub fn max_sessions(&self) -> usize {
        self.inner.max_sessions
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Create a session, generating an id when none is given.
    ///
    /// A live session with the same id is returned unchanged.
    pub fn create(&self, id: Option<SessionId>) -> Result<Session, SessionError> {
        let _guard = self
            .inner
            .create_lock
            .lock()
            .unwrap_or_else(|p| p.into_inner());

        let id = id.unwrap_or_default();
        if let Some(existing) = self.get(&id) {
            return Ok(existing);
        }

        if self.inner.sessions.len() >= self.inner.max_sessions {
            let evicted = self.sweep_expired();
            debug!("Store at capacity, evicted {} expired sessions", evicted);
            if self.inner.sessions.len() >= self.inner.max_sessions {
                warn!(
                    "Rejected session {}: limit of {} reached",
                    id, self.inner.max_sessions
                );
                return Err(SessionError::CapacityExceeded {
                    max: self.inner.max_sessions,
                });
            }
        }

        let session = Session::new(id.clone(), self.now());
        self.inner.sessions.insert(id.clone(), session.clone());
        info!("Created session: {}", id);
        Ok(session)
    }

    /// Live session by id; an expired entry is evicted and reported absent
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        let now = self.now();
        match self.inner.sessions.get(id) {
            None => return None,
            Some(entry) if !entry.is_expired(self.inner.ttl, now) => {
                return Some(entry.value().clone())
            }
            Some(_) => {}
        }

        self.evict_if_expired(id, now);
        None
    }

    /// Merge `update` into a live session and return the merged copy
    pub fn update(&self, id: &SessionId, update: SessionUpdate) -> Result<Session, SessionError> {
        let now = self.now();
        let mut entry = self
            .inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;

        if entry.is_expired(self.inner.ttl, now) {
            drop(entry);
            self.evict_if_expired(id, now);
            return Err(SessionError::NotFound(id.clone()));
        }

        entry.apply(update, now);
        debug!(
            "Updated session {} ({} steps completed)",
            id,
            entry.completed_steps.len()
        );
        Ok(entry.value().clone())
    }

    /// Remove a session. Returns whether it existed.
    pub fn delete(&self, id: &SessionId) -> bool {
        let removed = self.inner.sessions.remove(id).is_some();
        if removed {
            info!("Deleted session: {}", id);
        }
        removed
    }

    /// Ids of live sessions, oldest first
    pub fn list(&self) -> Vec<SessionId> {
        self.summaries()
            .into_iter()
            .map(|summary| summary.session_id)
            .collect()
    }

    /// Summaries of live sessions, oldest first
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let now = self.now();
        let ttl = self.inner.ttl;
        let mut summaries: Vec<SessionSummary> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| !entry.is_expired(ttl, now))
            .map(|entry| entry.summary(ttl))
            .collect();
        summaries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        summaries
    }

    /// Remove sessions created more than `older_than` ago, regardless of TTL
    pub fn cleanup(&self, older_than: Duration) -> usize {
        let cutoff = self.now() - older_than;
        self.remove_where(|session| session.created_at < cutoff)
    }

    /// Remove every expired session, oldest first
    pub fn sweep_expired(&self) -> usize {
        let now = self.now();
        let ttl = self.inner.ttl;
        self.remove_where(|session| session.is_expired(ttl, now))
    }

    pub fn stats(&self) -> SessionStats {
        let now = self.now();
        let ttl = self.inner.ttl;
        let total = self.inner.sessions.len();
        let expired = self
            .inner
            .sessions
            .iter()
            .filter(|entry| entry.is_expired(ttl, now))
            .count();
        SessionStats {
            total,
            active: total.saturating_sub(expired),
            expired,
            max_sessions: self.inner.max_sessions,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    /// Start a background task that sweeps expired sessions every `interval`.
    ///
    /// Dropping the returned handle stops the task.
    pub fn spawn_sweeper(&self, interval: std::time::Duration) -> SweeperHandle {
        let store = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match catch_unwind(AssertUnwindSafe(|| store.sweep_expired())) {
                    Ok(0) => {}
                    Ok(removed) => info!(
                        removed = removed,
                        remaining = store.len(),
                        "Swept expired sessions"
                    ),
                    Err(_) => error!("Session sweep panicked; will retry next interval"),
                }
            }
        });
        debug!("Started session sweeper (every {:?})", interval);
        SweeperHandle { task }
    }

    /// Evict `id` only if it is still expired at `now`
    fn evict_if_expired(&self, id: &SessionId, now: DateTime<Utc>) {
        let ttl = self.inner.ttl;
        if self
            .inner
            .sessions
            .remove_if(id, |_, session| session.is_expired(ttl, now))
            .is_some()
        {
            info!("Evicted expired session: {}", id);
        }
    }

    fn remove_where<F>(&self, stale_if: F) -> usize
    where
        F: Fn(&Session) -> bool,
    {
        let mut stale: Vec<(DateTime<Utc>, SessionId)> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| stale_if(entry.value()))
            .map(|entry| (entry.created_at, entry.key().clone()))
            .collect();
        stale.sort();

        let mut removed = 0;
        for (_, id) in stale {
            if self
                .inner
                .sessions
                .remove_if(&id, |_, session| stale_if(session))
                .is_some()
            {
                debug!("Removed session: {}", id);
                removed += 1;
            }
        }
        removed
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.inner.sessions.len())
            .field("ttl", &self.inner.ttl)
            .field("max_sessions", &self.inner.max_sessions)
            .finish()
    }
}

/// Handle to the background sweeper; the task stops when this is dropped
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Abort the sweeper; expired sessions are then only evicted on access
    pub fn stop(self) {
        self.task.abort();
        debug!("Stopped session sweeper");
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
