//! Top-level configuration.
//!
//! `Config` is the value struct the rest of the crate loads once at startup;
//! individual subsystems (the cache, the gateway) own a section of it. Only
//! the sections needed to host and exercise the cache are fleshed out here —
//! everything else in the original application (channels, tools, hardware,
//! ...) is out of scope.

pub mod watcher;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ZeptoError};

/// Minimal stand-in for the gateway section other config consumers read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { port: 8787 }
    }
}

/// Response cache configuration. Field names and defaults match the
/// persisted config schema exactly; see `cache::factory` for how this is
/// turned into a decorator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_size: usize,
    pub ttl_secs: u64,
    pub cache_path: Option<PathBuf>,
    pub auto_save_interval_secs: Option<u64>,
    pub max_disk_bytes: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_size: 1000,
            ttl_secs: 7 * 86_400,
            cache_path: None,
            auto_save_interval_secs: Some(30),
            max_disk_bytes: None,
        }
    }
}

impl CacheConfig {
    /// Validate the config, surfacing diagnostics the way other sections do
    /// (e.g. a zero TTL would make every entry expire immediately).
    pub fn validate(&self) -> Result<()> {
        if self.enabled && self.max_size == 0 {
            return Err(ZeptoError::Config(
                "cache.max_size must be greater than zero when caching is enabled".into(),
            ));
        }
        if self.enabled && self.ttl_secs == 0 {
            return Err(ZeptoError::Config(
                "cache.ttl_secs must be greater than zero when caching is enabled".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the on-disk cache file path, falling back to the default
    /// location under `Config::dir()` the same way `memory::factory`
    /// resolves `memory/embeddings.json`.
    pub fn resolved_path(&self) -> PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| Config::dir().join("cache").join("llm_cache.json"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// `~/.zeptoclaw` — the convention already used by
    /// `providers::quota` and the original `response_cache`.
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".zeptoclaw")
    }

    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    pub fn load_from_path(path: &std::path::Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&data)?;
        Ok(config)
    }
}
