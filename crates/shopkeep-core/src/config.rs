//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, request timeout, where the session is
//! stored, and the last used username.
//!
//! Configuration is stored at `~/.config/shopkeep/config.json`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::Gateway;
use crate::auth::SessionStore;
use crate::storage::{self, StorageKind};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "shopkeep";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Backend address used when nothing is configured
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// HTTP request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Environment variable overriding `api_url`
pub const API_URL_ENV: &str = "SHOPKEEP_API_URL";

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub storage: StorageKind,
    /// Whether `login` asks for a long-lived session unless told otherwise
    #[serde(default)]
    pub remember_me_default: bool,
    #[serde(default)]
    pub last_username: Option<String>,
    #[serde(default)]
    pub log_to_file: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            storage: StorageKind::default(),
            remember_me_default: false,
            last_username: None,
            log_to_file: false,
        }
    }
}

impl Config {
    /// Load the config file (defaults if missing), then apply environment
    /// overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            Self::from_json(&contents)?
        } else {
            Self::default()
        };
        Ok(config.with_api_url_override(std::env::var(API_URL_ENV).ok()))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        serde_json::from_str(contents).context("Failed to parse config file")
    }

    pub fn with_api_url_override(mut self, api_url: Option<String>) -> Self {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_url = url.trim().to_string();
        }
        self
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

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Open the configured storage backend and restore the saved session.
    pub fn open_session(&self) -> Result<Arc<SessionStore>> {
        let cache_dir = self.cache_dir()?;
        let backend = storage::open(self.storage, &cache_dir)
            .with_context(|| format!("Failed to open {:?} session storage", self.storage))?;
        Ok(Arc::new(SessionStore::open(backend)))
    }

    pub fn gateway(&self, store: Arc<SessionStore>) -> Result<Gateway> {
        Gateway::new(&self.api_url, self.request_timeout(), store)
            .context("Failed to build HTTP client")
    }
}
