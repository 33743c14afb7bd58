//! Keyed Mutex - Per-Resource Exclusive Locks
//!
//! Operations on the same key run one at a time, in arrival order; different
//! keys never block each other. Every acquisition carries a timeout.
//!
//! # Example
//!
//! ```ignore
//! let locks = KeyedMutex::new();
//! let key = ResourceKey::for_push("registry/app", "v1");
//! let pushed = locks
//!     .with_lock(key.as_str(), Duration::from_secs(600), || async { push().await })
//!     .await?;
//! ```
//!
//! Entries exist only while a key is held or awaited and are dropped on the
//! last release.

mod key;

pub use key::ResourceKey;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Lock acquisition errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("Timed out after {waited:?} waiting for lock on '{key}'")]
    Timeout { key: String, waited: Duration },
}

impl LockError {
    /// Lock timeouts are transient; the caller may try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Snapshot of one lock entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockStatus {
    /// When the current holder acquired the lock, `None` between holders
    pub held_since: Option<DateTime<Utc>>,
    pub waiters: usize,
}

struct Slot {
    mutex: Arc<Mutex<()>>,
    held_since: StdMutex<Option<DateTime<Utc>>>,
    waiters: AtomicUsize,
}

impl Slot {
    fn new() -> Self {
        Self {
            mutex: Arc::new(Mutex::new(())),
            held_since: StdMutex::new(None),
            waiters: AtomicUsize::new(0),
        }
    }

    fn set_held_since(&self, at: Option<DateTime<Utc>>) {
        *self.held_since.lock().unwrap_or_else(|p| p.into_inner()) = at;
    }

    fn status(&self) -> LockStatus {
        LockStatus {
            held_since: *self.held_since.lock().unwrap_or_else(|p| p.into_inner()),
            waiters: self.waiters.load(Ordering::SeqCst),
        }
    }
}

/// Named exclusive locks with FIFO waiters
#[derive(Clone, Default)]
pub struct KeyedMutex {
    slots: Arc<DashMap<String, Arc<Slot>>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// Returns [`LockError::Timeout`] without running `f` when the lock is not
    /// acquired within `timeout`.
    pub async fn with_lock<F, Fut, T>(&self, key: &str, timeout: Duration, f: F) -> Result<T, LockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire(key, timeout).await?;
        Ok(f().await)
    }

    /// Wait up to `timeout` for `key` and return a guard that holds it.
    ///
    /// The guard is owned, so it can be moved into a spawned task; the key is
    /// released when the guard is dropped, wherever that happens.
    pub async fn acquire(&self, key: &str, timeout: Duration) -> Result<LockGuard, LockError> {
        let slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone();
        slot.waiters.fetch_add(1, Ordering::SeqCst);

        let mut guard = LockGuard {
            locks: self.clone(),
            key: key.to_string(),
            slot,
            waiting: true,
            held: None,
        };

        let started = Instant::now();
        match tokio::time::timeout(timeout, guard.slot.mutex.clone().lock_owned()).await {
            Ok(held) => {
                guard.acquired(held);
                debug!("Acquired lock {} after {:?}", key, started.elapsed());
                Ok(guard)
            }
            Err(_) => {
                let waited = started.elapsed();
                warn!("Timed out after {:?} waiting for lock {}", waited, key);
                Err(LockError::Timeout {
                    key: key.to_string(),
                    waited,
                })
            }
        }
    }

    /// Snapshot of every held or awaited key
    pub fn status(&self) -> BTreeMap<String, LockStatus> {
        self.slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status()))
            .collect()
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.slots
            .get(key)
            .map(|slot| slot.mutex.try_lock().is_err())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop the entry for `key` when nobody else references it
    fn release(&self, key: &str, slot: &Arc<Slot>) {
        // One reference in the map, one held by the caller
        self.slots
            .remove_if(key, |_, current| {
                Arc::ptr_eq(current, slot) && Arc::strong_count(current) == 2
            });
    }
}

impl std::fmt::Debug for KeyedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedMutex")
            .field("keys", &self.slots.len())
            .finish()
    }
}

/// One caller's place on a key: waiting, then holding.
///
/// Dropping it (normally, on timeout, or on cancellation) releases whatever
/// it still owns.
pub struct LockGuard {
    locks: KeyedMutex,
    key: String,
    slot: Arc<Slot>,
    waiting: bool,
    held: Option<OwnedMutexGuard<()>>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    fn acquired(&mut self, held: OwnedMutexGuard<()>) {
        self.slot.waiters.fetch_sub(1, Ordering::SeqCst);
        self.waiting = false;
        self.slot.set_held_since(Some(Utc::now()));
        self.held = Some(held);
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("held", &self.held.is_some())
            .finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.waiting {
            self.slot.waiters.fetch_sub(1, Ordering::SeqCst);
        }
        if let Some(held) = self.held.take() {
            self.slot.set_held_since(None);
            drop(held);
        }
        self.locks.release(&self.key, &self.slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_closure_and_cleans_up() {
        let locks = KeyedMutex::new();
        let value = locks
            .with_lock("k", Duration::from_secs(1), || async { 42 })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_status_reports_holder_and_waiters() {
        let locks = KeyedMutex::new();
        let (held_tx, held_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .with_lock("k", Duration::from_secs(5), || async move {
                        held_tx.send(()).unwrap();
                        release_rx.await.unwrap();
                    })
                    .await
                    .unwrap();
            })
        };
        held_rx.await.unwrap();

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .with_lock("k", Duration::from_secs(5), || async {})
                    .await
                    .unwrap();
            })
        };
        while locks.status().get("k").map(|s| s.waiters) != Some(1) {
            tokio::task::yield_now().await;
        }

        let status = locks.status();
        assert!(status["k"].held_since.is_some());
        assert!(locks.is_locked("k"));

        release_tx.send(()).unwrap();
        holder.await.unwrap();
        waiter.await.unwrap();
        assert!(locks.status().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_does_not_run_closure() {
        let locks = KeyedMutex::new();
        let (held_tx, held_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let holder = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks
                    .with_lock("k", Duration::from_secs(5), || async move {
                        held_tx.send(()).unwrap();
                        release_rx.await.unwrap();
                    })
                    .await
                    .unwrap();
            })
        };
        held_rx.await.unwrap();

        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = ran.clone();
        let err = locks
            .with_lock("k", Duration::from_millis(20), || async move {
                flag.store(true, Ordering::SeqCst);
            })
            .await
            .unwrap_err();

        assert!(!ran.load(Ordering::SeqCst));
        assert!(err.is_retryable());
        assert!(matches!(err, LockError::Timeout { ref key, .. } if key == "k"));
        assert_eq!(locks.status()["k"].waiters, 0);

        release_tx.send(()).unwrap();
        holder.await.unwrap();
        assert!(locks.is_empty());
    }
}
