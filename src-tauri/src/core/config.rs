//! Application configuration.
//!
//! Replaces ambient global settings with an explicit, immutable-once-loaded
//! `Config` value threaded through `AppState`. Loaded from `HAIO_*`
//! environment variables first, then `config.json` in the config directory,
//! with tolerant defaults so a partial or missing file still produces a
//! usable configuration (same spirit as the teacher's `AppSettings::normalize`).
//!
//! Storage location: `{config_dir}/config.json`

use std::fs;
use std::fs::OpenOptions;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::fs::atomic_write_json_pretty;

pub const CONFIG_FILE: &str = "config.json";
const CONFIG_LOCK_FILE: &str = "config.json.lock";

fn default_base_url() -> String {
    "https://api.haio.ir".to_string()
}

fn default_request_timeout_s() -> u64 {
    30
}

fn default_reconcile_interval_s() -> u64 {
    30
}

fn default_health_check_interval_s() -> u64 {
    30
}

/// Explicit application configuration, loaded once at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the account/container API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout applied to every outgoing API request, in seconds.
    #[serde(default = "default_request_timeout_s")]
    pub request_timeout_s: u64,

    /// Interval between reconciliation ticks, in seconds.
    #[serde(default = "default_reconcile_interval_s")]
    pub reconcile_interval_s: u64,

    /// Interval between per-mount health checks, in seconds.
    #[serde(default = "default_health_check_interval_s")]
    pub health_check_interval_s: u64,

    /// Overrides the mount agent binary resolution order when set.
    #[serde(default)]
    pub mount_agent_path_override: Option<PathBuf>,

    /// Directory holding `config.json`, `accounts.json`, and log files.
    /// Not persisted: always recomputed from the environment at load time.
    #[serde(skip)]
    pub config_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_s: default_request_timeout_s(),
            reconcile_interval_s: default_reconcile_interval_s(),
            health_check_interval_s: default_health_check_interval_s(),
            mount_agent_path_override: None,
            config_dir: default_config_dir(),
        }
    }
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("haio-client")
}

impl Config {
    /// Clamp values so a corrupted or hand-edited config.json can't produce
    /// a non-functional client; corrects rather than fails.
    pub fn normalize(&mut self) {
        self.request_timeout_s = self.request_timeout_s.clamp(5, 300);
        self.reconcile_interval_s = self.reconcile_interval_s.clamp(5, 3600);
        self.health_check_interval_s = self.health_check_interval_s.clamp(5, 3600);
        if self.base_url.trim().is_empty() {
            self.base_url = default_base_url();
        }
    }

    /// Overlay `HAIO_*` environment variables onto an already-loaded config.
    /// Environment variables take precedence over `config.json`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("HAIO_BASE_URL") {
            if !v.trim().is_empty() {
                self.base_url = v;
            }
        }
        if let Ok(v) = std::env::var("HAIO_REQUEST_TIMEOUT_S") {
            if let Ok(n) = v.parse() {
                self.request_timeout_s = n;
            }
        }
        if let Ok(v) = std::env::var("HAIO_RECONCILE_INTERVAL_S") {
            if let Ok(n) = v.parse() {
                self.reconcile_interval_s = n;
            }
        }
        if let Ok(v) = std::env::var("HAIO_HEALTH_CHECK_INTERVAL_S") {
            if let Ok(n) = v.parse() {
                self.health_check_interval_s = n;
            }
        }
        if let Ok(v) = std::env::var("HAIO_MOUNT_AGENT") {
            if !v.trim().is_empty() {
                self.mount_agent_path_override = Some(PathBuf::from(v));
            }
        }
        if let Ok(v) = std::env::var("HAIO_CONFIG_DIR") {
            if !v.trim().is_empty() {
                self.config_dir = PathBuf::from(v);
            }
        }
    }
}

/// Loads, saves, and resets `Config` on disk, guarded by an advisory lock
/// file so concurrent GUI/CLI processes don't interleave writes.
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    fn lock_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_LOCK_FILE)
    }

    fn with_lock<T>(&self, exclusive: bool, op: impl FnOnce() -> Result<T, String>) -> Result<T, String> {
        fs::create_dir_all(&self.config_dir)
            .map_err(|e| format!("failed to create config directory: {e}"))?;

        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(|e| format!("failed to open config lock file: {e}"))?;

        if exclusive {
            fs2::FileExt::lock_exclusive(&lock_file)
                .map_err(|e| format!("failed to lock config file (exclusive): {e}"))?;
        } else {
            fs2::FileExt::lock_shared(&lock_file)
                .map_err(|e| format!("failed to lock config file (shared): {e}"))?;
        }

        let result = op();

        if let Err(e) = fs2::FileExt::unlock(&lock_file) {
            warn!("failed to unlock config lock file: {e}");
        }

        result
    }

    /// Loads `config.json`, falling back to defaults if absent or unreadable,
    /// then overlays `HAIO_*` environment variables.
    pub fn load(&self) -> Config {
        let result = self.with_lock(false, || {
            let path = self.config_path();
            if !path.exists() {
                info!("config file not found at {path:?}, using defaults");
                return Ok(Config {
                    config_dir: self.config_dir.clone(),
                    ..Config::default()
                });
            }

            let content = fs::read_to_string(&path).map_err(|e| e.to_string())?;
            let mut config: Config = serde_json::from_str(&content).map_err(|e| e.to_string())?;
            config.config_dir = self.config_dir.clone();
            config.normalize();
            Ok(config)
        });

        let mut config = match result {
            Ok(config) => config,
            Err(e) => {
                warn!("failed to load config, using defaults: {e}");
                Config {
                    config_dir: self.config_dir.clone(),
                    ..Config::default()
                }
            }
        };

        config.apply_env_overrides();
        config
    }

    /// Persists `config` to disk atomically, excluding environment-derived fields.
    pub fn save(&self, config: &Config) -> Result<(), String> {
        self.with_lock(true, || {
            let mut normalized = config.clone();
            normalized.normalize();
            atomic_write_json_pretty(&self.config_path(), &normalized).map_err(|e| e.to_string())?;
            info!("config saved to {:?}", self.config_path());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_file_returns_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(dir.path().to_path_buf());
        let config = manager.load();
        assert_eq!(config.base_url, default_base_url());
        assert_eq!(config.reconcile_interval_s, default_reconcile_interval_s());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigManager::new(dir.path().to_path_buf());
        let mut config = Config {
            base_url: "https://example.test".into(),
            request_timeout_s: 45,
            ..Config::default()
        };
        manager.save(&config).unwrap();

        let loaded = manager.load();
        assert_eq!(loaded.base_url, "https://example.test");
        assert_eq!(loaded.request_timeout_s, 45);

        config.config_dir = dir.path().to_path_buf();
    }

    #[test]
    fn normalize_clamps_out_of_range_intervals() {
        let mut config = Config {
            reconcile_interval_s: 1,
            health_check_interval_s: 99_999,
            ..Config::default()
        };
        config.normalize();
        assert!(config.reconcile_interval_s >= 5);
        assert!(config.health_check_interval_s <= 3600);
    }

    #[test]
    fn normalize_restores_empty_base_url() {
        let mut config = Config {
            base_url: "   ".into(),
            ..Config::default()
        };
        config.normalize();
        assert_eq!(config.base_url, default_base_url());
    }
}
