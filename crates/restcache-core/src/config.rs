//! Application configuration management.
//!
//! Configuration is stored at `<config_dir>/restcache/config.json`. Every
//! field has a default, so a missing or partial file is fine. A few fields
//! can be overridden from the environment (see [`Config::apply_env_overrides`]).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::client::DEFAULT_TIMEOUT_SECS;
use crate::auth::{FileSessionStore, KeyringSessionStore, MemorySessionStore, SessionStore};
use crate::cache::{QueryConfig, QuerySettings};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "restcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_URL: &str = "http://localhost:3001/api";
const DEFAULT_PROFILE: &str = "default";

pub const ENV_API_URL: &str = "RESTCACHE_API_URL";
pub const ENV_TIMEOUT_SECS: &str = "RESTCACHE_TIMEOUT_SECS";
pub const ENV_SESSION: &str = "RESTCACHE_SESSION";

/// Where the session token lives between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl std::str::FromStr for SessionBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            "memory" => Ok(Self::Memory),
            other => anyhow::bail!("Unknown session backend: {}", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_url: String,
    pub timeout_secs: u64,
    pub session: SessionBackend,
    /// Separates keychain entries and session files per endpoint.
    pub profile: String,
    /// Write daily log files here in addition to stderr.
    pub log_dir: Option<PathBuf>,
    pub last_email: Option<String>,
    pub cache: QuerySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            session: SessionBackend::default(),
            profile: DEFAULT_PROFILE.to_string(),
            log_dir: None,
            last_email: None,
            cache: QuerySettings::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(&self.profile))
    }

    /// Apply overrides from `lookup`, normally `std::env::var`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_API_URL).filter(|u| !u.trim().is_empty()) {
            self.api_url = url;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            match raw.trim().parse() {
                Ok(secs) => self.timeout_secs = secs,
                Err(_) => warn!(value = %raw, "Ignoring invalid {}", ENV_TIMEOUT_SECS),
            }
        }
        if let Some(raw) = lookup(ENV_SESSION) {
            match raw.parse() {
                Ok(backend) => self.session = backend,
                Err(e) => warn!(error = %e, "Ignoring invalid {}", ENV_SESSION),
            }
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn query_config(&self) -> QueryConfig {
        QueryConfig::from(&self.cache)
    }

    /// Open the configured session backend.
    pub fn session_store(&self) -> Result<Arc<dyn SessionStore>> {
        let store: Arc<dyn SessionStore> = match self.session {
            SessionBackend::File => Arc::new(
                FileSessionStore::open(self.cache_dir()?).context("Failed to open session file")?,
            ),
            SessionBackend::Keyring => Arc::new(KeyringSessionStore::open(self.profile.clone())),
            SessionBackend::Memory => Arc::new(MemorySessionStore::new()),
        };
        Ok(store)
    }
}
