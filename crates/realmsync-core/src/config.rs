//! Sync layer configuration.
//!
//! Defaults are tuned for an interactive client; every knob can be
//! overridden by the config file at `~/.config/realmsync/config.json` or
//! by `REALMSYNC_*` environment variables (a `.env` file is honored).

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "realmsync";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Dehydrated cache snapshot file name
const SNAPSHOT_FILE: &str = "snapshot.json";

/// Consider query results stale after 5 minutes.
/// Balances freshness with reducing unnecessary API calls for
/// slowly-changing data; call sites override per query where it matters.
const DEFAULT_STALE_MINUTES: i64 = 5;

/// Sweep entries with no subscribers after 30 minutes of inactivity.
const DEFAULT_SWEEP_IDLE_MINUTES: i64 = 30;

/// Batch debounce window in milliseconds.
/// 10ms captures a rendering burst without adding visible latency.
const DEFAULT_BATCH_WINDOW_MS: u64 = 10;

/// Flush a batch window early once it holds this many IDs.
const DEFAULT_MAX_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub stale_minutes: i64,
    pub sweep_idle_minutes: i64,
    pub batch_window_ms: u64,
    pub max_batch_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: crate::api::client::DEFAULT_API_BASE_URL.to_string(),
            stale_minutes: DEFAULT_STALE_MINUTES,
            sweep_idle_minutes: DEFAULT_SWEEP_IDLE_MINUTES,
            batch_window_ms: DEFAULT_BATCH_WINDOW_MS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        }
    }
}

impl SyncConfig {
    /// Load from the default config path, then apply environment
    /// overrides. Missing file means defaults.
    pub fn load() -> Result<Self> {
        // Load .env file if present (silently ignore if not found)
        let _ = dotenvy::dotenv();

        let path = Self::config_path()?;
        let mut config = Self::load_from(&path)?;
        if let Ok(url) = std::env::var("REALMSYNC_API_URL") {
            config.api_base_url = url;
        }
        if let Ok(minutes) = std::env::var("REALMSYNC_STALE_MINUTES") {
            if let Ok(minutes) = minutes.parse() {
                config.stale_minutes = minutes;
            }
        }
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
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

    /// Where the dehydrated cache snapshot is written between runs.
    pub fn snapshot_path(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME).join(SNAPSHOT_FILE))
    }

    pub fn stale_time(&self) -> Duration {
        Duration::minutes(self.stale_minutes)
    }

    pub fn sweep_idle(&self) -> Duration {
        Duration::minutes(self.sweep_idle_minutes)
    }

    pub fn batch_window(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.batch_window_ms)
    }
}

// ============================================================================
// Tests
// ============================================================================
