use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default TTL for cached documents: 14 days.
const DEFAULT_TTL_MS: u64 = 14 * 24 * 60 * 60 * 1000;

/// Default interval between periodic cleanup sweeps: 24 hours.
const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Default time before a cached query result is considered stale: 5 minutes.
const DEFAULT_STALE_TIME_MS: u64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL of the registry backend (PostgREST-style query API)
  pub url: String,
  /// Path prefix for table endpoints (defaults to "rest/v1")
  #[serde(default = "default_rest_prefix")]
  pub rest_prefix: String,
  /// Page size for remote fetches
  #[serde(default = "default_page_size")]
  pub page_size: u32,
}

fn default_rest_prefix() -> String {
  "rest/v1".to_string()
}

fn default_page_size() -> u32 {
  100
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Maximum age of a cached document before eviction, in milliseconds
  #[serde(default = "default_ttl_ms")]
  pub ttl_ms: u64,
  /// Interval between periodic cleanup sweeps, in milliseconds
  #[serde(default = "default_cleanup_interval_ms")]
  pub cleanup_interval_ms: u64,
  /// Age after which a cached query result is refetched, in milliseconds
  #[serde(default = "default_stale_time_ms")]
  pub stale_time_ms: u64,
  /// Path to the local cache database (defaults to the platform data dir)
  pub db_path: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_ms: DEFAULT_TTL_MS,
      cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
      stale_time_ms: DEFAULT_STALE_TIME_MS,
      db_path: None,
    }
  }
}

fn default_ttl_ms() -> u64 {
  DEFAULT_TTL_MS
}

fn default_cleanup_interval_ms() -> u64 {
  DEFAULT_CLEANUP_INTERVAL_MS
}

fn default_stale_time_ms() -> u64 {
  DEFAULT_STALE_TIME_MS
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_millis(self.ttl_ms)
  }

  pub fn cleanup_interval(&self) -> Duration {
    Duration::from_millis(self.cleanup_interval_ms)
  }

  pub fn stale_time(&self) -> Duration {
    Duration::from_millis(self.stale_time_ms)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./kennelsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/kennelsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/kennelsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("kennelsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("kennelsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the remote API key from environment variables.
  ///
  /// Checks KENNELSYNC_API_KEY first, then REGISTRY_API_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("KENNELSYNC_API_KEY")
      .or_else(|_| std::env::var("REGISTRY_API_KEY"))
      .map_err(|_| {
        eyre!("Remote API key not found. Set KENNELSYNC_API_KEY or REGISTRY_API_KEY environment variable.")
      })
  }

  /// Default location of the cache database.
  pub fn default_db_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("kennelsync").join("cache.db"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn cache_defaults() {
    let cache = CacheConfig::default();
    assert_eq!(cache.ttl(), Duration::from_secs(14 * 24 * 60 * 60));
    assert_eq!(cache.cleanup_interval(), Duration::from_secs(24 * 60 * 60));
    assert_eq!(cache.stale_time(), Duration::from_secs(5 * 60));
  }

  #[test]
  fn parse_minimal_config() {
    let yaml = "remote:\n  url: https://registry.example.com\n";
    let config: Config = serde_yaml::from_str(yaml).unwrap();
    assert_eq!(config.remote.url, "https://registry.example.com");
    assert_eq!(config.remote.rest_prefix, "rest/v1");
    assert_eq!(config.remote.page_size, 100);
    assert_eq!(config.cache.ttl_ms, DEFAULT_TTL_MS);
  }
}
