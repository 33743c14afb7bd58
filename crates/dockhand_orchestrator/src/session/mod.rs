//! Session Subsystem
//!
//! Tracks accumulated pipeline state per caller conversation:
//! - Completed steps (the set the dependency graph checks against)
//! - Per-tool results
//! - Free-form metadata and labels
//!
//! # Design
//!
//! The store owns every [`Session`]. Callers get clones and submit changes as
//! a [`SessionUpdate`], which the store merges into the stored value under
//! the entry lock for that id.
//!
//! # Expiry
//!
//! Sessions live for a fixed TTL measured from creation. Expired sessions are
//! dropped lazily on read and eagerly by the background sweeper.

mod store;

pub use store::{SessionStats, SessionStore, SweeperHandle};

use crate::graph::Step;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique session identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from a caller-supplied string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self::from_string(value)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// =============================================================================
// Session
// =============================================================================

/// Accumulated state for one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: SessionId,

    /// Steps satisfied so far; only ever grows
    pub completed_steps: BTreeSet<Step>,

    /// Latest result per tool name
    pub results: BTreeMap<String, Value>,

    /// Tool currently being driven, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(session_id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            completed_steps: BTreeSet::new(),
            results: BTreeMap::new(),
            current_step: None,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_completed(&self, step: &str) -> bool {
        self.completed_steps.contains(step)
    }

    /// Result recorded for `tool`
    pub fn result(&self, tool: &str) -> Option<&Value> {
        self.results.get(tool)
    }

    pub fn expires_at(&self, ttl: Duration) -> DateTime<Utc> {
        self.created_at + ttl
    }

    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        now >= self.expires_at(ttl)
    }

    /// Merge an update into this session
    pub(crate) fn apply(&mut self, update: SessionUpdate, now: DateTime<Utc>) {
        self.completed_steps.extend(update.completed_steps);
        self.results.extend(update.results);
        if let Some(step) = update.current_step {
            self.current_step = Some(step);
        }
        self.metadata.extend(update.metadata);
        self.updated_at = now;
    }

    /// Listing view of this session
    pub fn summary(&self, ttl: Duration) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            completed_steps: self.completed_steps.iter().cloned().collect(),
            tools_run: self.results.keys().cloned().collect(),
            current_step: self.current_step.clone(),
            labels: self.labels(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            expires_at: self.expires_at(ttl),
        }
    }

    /// String-valued entries under the `labels` metadata key
    fn labels(&self) -> BTreeMap<String, String> {
        self.metadata
            .get("labels")
            .and_then(Value::as_object)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Changes to merge into a stored session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionUpdate {
    pub completed_steps: BTreeSet<Step>,
    pub results: BTreeMap<String, Value>,
    pub current_step: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl SessionUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn complete(mut self, step: impl Into<Step>) -> Self {
        self.completed_steps.insert(step.into());
        self
    }

    pub fn complete_all<I>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = Step>,
    {
        self.completed_steps.extend(steps);
        self
    }

    pub fn result(mut self, tool: impl Into<String>, value: Value) -> Self {
        self.results.insert(tool.into(), value);
        self
    }

    pub fn current_step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.completed_steps.is_empty()
            && self.results.is_empty()
            && self.current_step.is_none()
            && self.metadata.is_empty()
    }
}

/// Summary row for session listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub completed_steps: Vec<Step>,
    pub tools_run: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// =============================================================================
// Errors
// =============================================================================

/// Session store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("Session limit reached ({max} live sessions)")]
    CapacityExceeded { max: usize },

    #[error("Session not found: {0}")]
    NotFound(SessionId),
}
