//! Manager configuration

use crate::error::PullmanError;
use pullman_types::{BackgroundSession, DEFAULT_BACKGROUND_IDENTIFIER};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings shared by a manager and the transports it creates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Manager name, used in log lines
    pub name: String,
    /// Identifier of the background session kind
    pub background_identifier: String,
    /// Background transfers may be deferred
    pub background_is_discretionary: bool,
    /// Directory for in-flight and unplaced files
    pub scratch_dir: PathBuf,
    /// User agent sent by the HTTP transport
    pub user_agent: String,
    /// Connect timeout for sessions that do not wait for connectivity
    pub connect_timeout_secs: u64,
    /// Per-request timeout for foreground sessions (0 = none)
    pub request_timeout_secs: u64,
    /// Per-request timeout for background sessions (0 = none)
    pub background_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            background_identifier: DEFAULT_BACKGROUND_IDENTIFIER.to_string(),
            background_is_discretionary: false,
            scratch_dir: default_scratch_dir(),
            user_agent: format!("Pullman/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout_secs: 30,
            request_timeout_secs: 0,
            background_timeout_secs: 0,
        }
    }
}

fn default_scratch_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|p| p.join("pullman"))
        .unwrap_or_else(|| std::env::temp_dir().join("pullman"))
}

impl ManagerConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document, missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, PullmanError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, PullmanError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    /// Descriptor used for requests that keep alive
    pub fn background_session(&self) -> BackgroundSession {
        BackgroundSession {
            is_discretionary: self.background_is_discretionary,
            ..BackgroundSession::new(self.background_identifier.clone())
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self, background: bool) -> Option<Duration> {
        let secs = if background {
            self.background_timeout_secs
        } else {
            self.request_timeout_secs
        };

        (secs > 0).then(|| Duration::from_secs(secs))
    }
}
