//! Orchestrator configuration
//!
//! All sections are optional when deserialized; missing values fall back to
//! the defaults below.
//!
//! ```toml
//! [sessions]
//! ttl_secs = 86400
//! max_sessions = 100
//! sweep_interval_secs = 3600
//!
//! [locks]
//! timeout_secs = 600
//!
//! [router]
//! default_path = "."
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session retention (24 hours)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 24 * 60 * 60;

/// Default max live sessions
pub const DEFAULT_MAX_SESSIONS: usize = 100;

/// Background expiry sweep interval (1 hour)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60 * 60;

/// Default wait for a resource lock (10 minutes)
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 10 * 60;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub sessions: SessionConfig,
    pub locks: LockConfig,
    pub router: RouterConfig,
}

/// Session store limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a session, measured from creation
    pub ttl_secs: u64,

    /// Maximum number of live sessions
    pub max_sessions: usize,

    /// Interval between background expiry sweeps
    pub sweep_interval_secs: u64,
}

impl SessionConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.ttl_secs).unwrap_or(i64::MAX))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_SESSION_TTL_SECS,
            max_sessions: DEFAULT_MAX_SESSIONS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

/// Resource lock settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How long a keyed operation waits for its lock
    pub timeout_secs: u64,
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

/// Parameter normalization settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Value stamped into `path` when the caller leaves it out
    pub default_path: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_path: ".".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.sessions.ttl(), chrono::Duration::hours(24));
        assert_eq!(config.sessions.max_sessions, 100);
        assert_eq!(config.locks.timeout(), Duration::from_secs(600));
        assert_eq!(config.router.default_path, ".");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: OrchestratorConfig =
            serde_json::from_str(r#"{"sessions": {"max_sessions": 5}}"#).unwrap();
        assert_eq!(config.sessions.max_sessions, 5);
        assert_eq!(config.sessions.ttl_secs, DEFAULT_SESSION_TTL_SECS);
        assert_eq!(config.locks, LockConfig::default());
    }

    #[test]
    fn test_sweep_interval_never_zero() {
        let config = SessionConfig {
            sweep_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }
}
