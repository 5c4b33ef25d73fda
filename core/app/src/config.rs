//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use wayfarer_common::{Error, Result};

/// Default time fetched data stays fresh (30 minutes).
const DEFAULT_TTL_SECS: u64 = 30 * 60;

/// Slow-changing lookups (cities, saved places) stay fresh for three days.
const DEFAULT_LOOKUP_TTL_SECS: u64 = 3 * 24 * 60 * 60;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Configuration for [`crate::Engine`], loadable from JSON.
///
/// Every field is optional in the file; missing ones take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Backend origin, e.g. `https://wayfarer.example.com`.
    pub base_url: String,
    /// SQLite database file.
    pub database_path: PathBuf,
    pub default_ttl_secs: u64,
    pub lookup_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            database_path: default_database_path(),
            default_ttl_secs: DEFAULT_TTL_SECS,
            lookup_ttl_secs: DEFAULT_LOOKUP_TTL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            user_agent: format!("wayfarer/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file.
    ///
    /// # Errors
    /// - File cannot be read
    /// - Invalid JSON
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        let config: Self = serde_json::from_slice(data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::InvalidInput("base_url must not be empty".to_string()));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::InvalidInput(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn lookup_ttl(&self) -> Duration {
        Duration::from_secs(self.lookup_ttl_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// `<data dir>/wayfarer/wayfarer.db`, or the working directory when the
/// platform has no data dir.
pub fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("wayfarer"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wayfarer.db")
}
