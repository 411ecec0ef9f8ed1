//! Configuration types
//!
//! [`ArbiterConfig`] tunes the engine itself. [`WalletConfig`] is the
//! application configuration persisted next to the wallet snapshot inside a
//! version 3 envelope.

use crate::error::{ArbiterError, ArbiterResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::env;
use std::path::Path;
use std::time::Duration;
use tokio::fs;

/// Grace window applied when a grouped request gets no answer.
pub const DEFAULT_GRACE_WINDOW_MS: u64 = 20_000;
pub const ENV_GRACE_WINDOW_MS: &str = "ARBITER_GRACE_WINDOW_MS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// How long a grouped request may hold individual requests back.
    pub grace_window_ms: u64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            grace_window_ms: DEFAULT_GRACE_WINDOW_MS,
        }
    }
}

impl ArbiterConfig {
    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }

    pub fn from_toml_str(content: &str) -> ArbiterResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Loads from a TOML file. A missing or blank file yields the defaults.
    pub async fn load(path: &Path) -> ArbiterResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).await?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Self::from_toml_str(&content).map_err(|e| {
            ArbiterError::Config(format!(
                "Failed to parse arbiter config at {}: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn with_env_overrides(mut self) -> ArbiterResult<Self> {
        if let Ok(raw) = env::var(ENV_GRACE_WINDOW_MS) {
            self.grace_window_ms = raw.trim().parse().map_err(|e| {
                ArbiterError::Config(format!("{} must be milliseconds: {}", ENV_GRACE_WINDOW_MS, e))
            })?;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Main,
    Test,
}

/// Application configuration stored in version 3 snapshots.
///
/// Unknown keys are kept in `extra` so a load/save cycle does not lose
/// settings written by newer versions of the app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wab_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<Network>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_box_url: Option<String>,
    #[serde(default)]
    pub use_remote_storage: bool,
    #[serde(default)]
    pub use_message_box: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}
