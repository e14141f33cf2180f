//! Configuration service implementation.
//!
//! Loads [`DraftPaneConfig`] from `~/.config/draftpane/config.toml`, then
//! applies environment overrides (`DRAFTPANE_ENDPOINT`, `DRAFTPANE_API_KEY`).

use crate::paths::DraftPanePaths;
use draftpane_core::config::DraftPaneConfig;
use draftpane_core::error::Result;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub const ENV_ENDPOINT: &str = "DRAFTPANE_ENDPOINT";
pub const ENV_API_KEY: &str = "DRAFTPANE_API_KEY";

/// Configuration service that loads and caches the root configuration.
#[derive(Debug, Clone)]
pub struct ConfigService {
    path: Option<PathBuf>,
    /// Cached configuration, loaded lazily.
    config: Arc<RwLock<Option<DraftPaneConfig>>>,
}

impl ConfigService {
    /// Uses the platform config file.
    pub fn new() -> Self {
        Self {
            path: DraftPanePaths::config_file().ok(),
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Uses an explicit config file (tests, `--config`).
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            config: Arc::new(RwLock::new(None)),
        }
    }

    /// Gets the configuration, loading from file if not cached.
    ///
    /// An unreadable or invalid file is logged and replaced by defaults.
    pub fn get_config(&self) -> DraftPaneConfig {
        {
            let read_lock = self.config.read().unwrap_or_else(|e| e.into_inner());
            if let Some(ref cached) = *read_lock {
                return cached.clone();
            }
        }

        let mut loaded = match self.path.as_deref().map(Self::load_file) {
            Some(Ok(config)) => config,
            Some(Err(e)) => {
                tracing::warn!("[ConfigService] Falling back to defaults: {}", e);
                DraftPaneConfig::default()
            }
            None => {
                tracing::warn!("[ConfigService] No config location available, using defaults");
                DraftPaneConfig::default()
            }
        };
        apply_env_overrides(&mut loaded, |name| env::var(name).ok());

        {
            let mut write_lock = self.config.write().unwrap_or_else(|e| e.into_inner());
            *write_lock = Some(loaded.clone());
        }

        loaded
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        let mut write_lock = self.config.write().unwrap_or_else(|e| e.into_inner());
        *write_lock = None;
    }

    /// Reads a config file. A missing file is not an error.
    fn load_file(path: &Path) -> Result<DraftPaneConfig> {
        match std::fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => Ok(DraftPaneConfig::default()),
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("[ConfigService] {} not found, using defaults", path.display());
                Ok(DraftPaneConfig::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self::new()
    }
}

fn apply_env_overrides(config: &mut DraftPaneConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|v| !v.trim().is_empty()) {
        config.service.endpoint = endpoint;
    }
    if let Some(api_key) = lookup(ENV_API_KEY).filter(|v| !v.trim().is_empty()) {
        config.service.api_key = Some(api_key);
    }
}
