//! Configuration loading for the CLI
//!
//! Resolution order:
//! 1. `--config <file>` (must exist)
//! 2. `$DOCKHAND_HOME/config.toml` (optional)
//! 3. Built-in defaults
//!
//! Environment/flag overrides are applied last.

use anyhow::{Context, Result};
use dockhand_orchestrator::OrchestratorConfig;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub session_ttl_secs: Option<u64>,
    pub max_sessions: Option<usize>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut OrchestratorConfig) {
        if let Some(ttl) = self.session_ttl_secs {
            config.sessions.ttl_secs = ttl;
        }
        if let Some(max) = self.max_sessions {
            config.sessions.max_sessions = max;
        }
    }
}

/// Get the default config path: `$DOCKHAND_HOME/config.toml`
pub fn default_config_path() -> Result<PathBuf> {
    Ok(dockhand_logging::dockhand_home()?.join(CONFIG_FILE_NAME))
}

/// Load configuration from `explicit`, or the default path when present
pub fn load(explicit: Option<&Path>, overrides: &ConfigOverrides) -> Result<OrchestratorConfig> {
    let mut config = match explicit {
        Some(path) => read_config(path)?,
        None => {
            let path = default_config_path()?;
            if path.exists() {
                read_config(&path)?
            } else {
                OrchestratorConfig::default()
            }
        }
    };
    overrides.apply(&mut config);
    Ok(config)
}

fn read_config(path: &Path) -> Result<OrchestratorConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("Invalid config file: {}", path.display()))
}
