//! CLI configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use prefsync_storage::{KvBackend, RemoteConfig};
use prefsync_sync::SyncConfig;

const LOCAL_STORE_FILE: &str = "local_store.json";
const OFFLINE_DB_FILE: &str = "offline.db";

fn default_local_store_capacity() -> usize {
    KvBackend::DEFAULT_CAPACITY
}

/// Contents of the optional `--config` JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sync: SyncConfig,
    /// Remote API; without it preferences stay on this device.
    #[serde(default)]
    pub remote: Option<RemoteConfig>,
    /// Quota of the key-value store in bytes.
    #[serde(default = "default_local_store_capacity")]
    pub local_store_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sync: SyncConfig::default(),
            remote: None,
            local_store_capacity: default_local_store_capacity(),
        }
    }
}

impl AppConfig {
    /// Read the config file, or use defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Apply `--remote-url` and `--token`.
    ///
    /// A token without any remote URL is ignored.
    pub fn with_remote_overrides(mut self, url: Option<String>, token: Option<String>) -> Self {
        if let Some(url) = url {
            let remote = self.remote.take();
            self.remote = Some(match remote {
                Some(mut remote) => {
                    remote.base_url = url;
                    remote
                }
                None => RemoteConfig::new(url),
            });
        }
        if let (Some(token), Some(remote)) = (token, self.remote.as_mut()) {
            remote.auth_token = Some(token);
        }
        self
    }
}

/// File locations inside the data directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub root: PathBuf,
}

impl DataPaths {
    /// Use `dir`, or `<data dir>/prefsync` when not given.
    pub fn resolve(dir: Option<PathBuf>) -> Result<Self> {
        let root = match dir {
            Some(dir) => dir,
            None => dirs::data_dir()
                .context("No data directory on this platform, pass --data-dir")?
                .join("prefsync"),
        };
        Ok(Self { root })
    }

    pub fn local_store(&self) -> PathBuf {
        self.root.join(LOCAL_STORE_FILE)
    }

    pub fn offline_db(&self) -> PathBuf {
        self.root.join(OFFLINE_DB_FILE)
    }
}
