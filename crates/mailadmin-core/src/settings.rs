//! Persisted application settings.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::cache::CacheConfig;
use crate::{Error, Result};

/// Application settings that persist across sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppSettings {
    /// Whether email pages and details are served from the local cache.
    pub cache_enabled: bool,
    /// Root URL of the backend API.
    pub api_base_url: String,
    /// Default listing page size.
    pub page_size: u32,
    /// Lifetime of a cached page, in seconds.
    pub list_ttl_secs: u64,
    /// Lifetime of a cached email, in seconds.
    pub detail_ttl_secs: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            api_base_url: "http://localhost:8000/api".to_string(),
            page_size: 20,
            list_ttl_secs: 30 * 60,
            detail_ttl_secs: 2 * 60 * 60,
        }
    }
}

impl AppSettings {
    /// Default settings file location under the user's config directory.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mailadmin")
            .join("settings.json")
    }

    /// Load settings from `path`, falling back to defaults when the file is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(path: &Path) -> Result<Self> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(Self::default());
        }

        let contents = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Save settings to `path`, creating the parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, contents).await?;

        tracing::info!("Settings saved to {:?}", path);
        Ok(())
    }

    /// Cache expiry thresholds derived from these settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a lifetime is zero or too large.
    pub fn cache_config(&self) -> Result<CacheConfig> {
        Ok(CacheConfig {
            list_ttl: ttl("listTtlSecs", self.list_ttl_secs)?,
            detail_ttl: ttl("detailTtlSecs", self.detail_ttl_secs)?,
        })
    }
}

fn ttl(name: &str, secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .filter(|secs| *secs > 0)
        .and_then(Duration::try_seconds)
        .ok_or_else(|| Error::Config(format!("{name} must be a positive number of seconds")))
}

/// Shared, mutable view of the settings.
///
/// The service reads through this handle on every cache-eligible call, so a
/// toggle takes effect immediately.
#[derive(Debug, Clone, Default)]
pub struct SettingsHandle {
    inner: Arc<RwLock<AppSettings>>,
}

impl SettingsHandle {
    /// Wrap settings in a shared handle.
    #[must_use]
    pub fn new(settings: AppSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Whether the cache is enabled.
    pub async fn cache_enabled(&self) -> bool {
        self.inner.read().await.cache_enabled
    }

    /// Toggle the cache.
    pub async fn set_cache_enabled(&self, enabled: bool) {
        self.inner.write().await.cache_enabled = enabled;
    }
}
