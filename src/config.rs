//! Configuration loading and persistence.
//!
//! Settings live in `<config_dir>/tongues/config.json`. Environment
//! variables override the file; command-line flags (applied by the binary)
//! override both.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::constants::{DEFAULT_SERVER_URL, DEFAULT_SESSION_PATH, HEALTH_POLL_INTERVAL};
use crate::identity::{FileIdentityStore, IdentityStore, MemoryIdentityStore};
use crate::language::Language;
use crate::session::{ReconnectMode, ReconnectPolicy, SessionConfig};

const CONFIG_FILE: &str = "config.json";

/// Configuration for the tongues client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Relay endpoint (`ws://`, `wss://`, `http://` or `https://`).
    pub server_url: String,
    /// Path segment of the session route.
    pub session_path: String,
    /// Initial language preference.
    pub language: Language,
    /// Health sampling cadence in milliseconds.
    pub poll_interval_ms: u64,
    /// What to do when the connection drops.
    pub reconnect: ReconnectMode,
    /// Persist the session identity here. Unset keeps it for this process
    /// only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            session_path: DEFAULT_SESSION_PATH.to_string(),
            language: Language::default(),
            poll_interval_ms: u64::try_from(HEALTH_POLL_INTERVAL.as_millis()).unwrap_or(1000),
            reconnect: ReconnectMode::Manual,
            identity_file: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path.
    ///
    /// `TONGUES_CONFIG_DIR` wins; otherwise the platform config dir
    /// (e.g. `~/.config/tongues`).
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("TONGUES_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("tongues"))
    }

    /// Loads configuration from the default location, with environment
    /// variable overrides. A missing file means defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join(CONFIG_FILE);
        let mut config = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            log::debug!("[Config] No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Reads a config file. Missing keys take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Applies `TONGUES_*` overrides looked up through `lookup`.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = lookup("TONGUES_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Some(session_path) = lookup("TONGUES_SESSION_PATH") {
            self.session_path = session_path;
        }

        if let Some(lang) = lookup("TONGUES_LANG") {
            match lang.parse() {
                Ok(language) => self.language = language,
                Err(e) => log::warn!("[Config] Ignoring TONGUES_LANG: {}", e),
            }
        }

        if let Some(interval) = lookup("TONGUES_POLL_INTERVAL_MS") {
            match interval.parse::<u64>() {
                Ok(ms) if ms > 0 => self.poll_interval_ms = ms,
                _ => log::warn!("[Config] Ignoring TONGUES_POLL_INTERVAL_MS={:?}", interval),
            }
        }

        if let Some(mode) = lookup("TONGUES_RECONNECT") {
            match mode.parse() {
                Ok(mode) => self.reconnect = mode,
                Err(e) => log::warn!("[Config] Ignoring TONGUES_RECONNECT: {}", e),
            }
        }

        if let Some(path) = lookup("TONGUES_IDENTITY_FILE") {
            self.identity_file = Some(PathBuf::from(path));
        }
    }

    /// Persists the configuration to the default location.
    pub fn save(&self) -> Result<PathBuf> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let path = dir.join(CONFIG_FILE);
        self.save_to_file(&path)?;
        Ok(path)
    }

    /// Writes the configuration as pretty JSON to `path`.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Session parameters derived from this configuration.
    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        let reconnect = match self.reconnect {
            ReconnectMode::Manual => ReconnectPolicy::Manual,
            ReconnectMode::Backoff => ReconnectPolicy::backoff(),
        };
        SessionConfig {
            endpoint: self.server_url.clone(),
            session_path: self.session_path.clone(),
            health_poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            reconnect,
        }
    }

    /// Where the session identity is kept.
    #[must_use]
    pub fn identity_store(&self) -> Box<dyn IdentityStore> {
        match &self.identity_file {
            Some(path) => Box::new(FileIdentityStore::new(path.clone())),
            None => Box::new(MemoryIdentityStore::new()),
        }
    }
}
