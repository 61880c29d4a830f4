use crate::error::{GatehouseError, Result};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default lifetime of a cached permission snapshot (5 minutes).
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Top-level Gatehouse configuration stored as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatehouseConfig {
    pub gatehouse: GatehouseSettings,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatehouseSettings {
    /// Where groups and permissions are read from.
    #[serde(default)]
    pub backend: BackendType,
    /// Path to the SQLite database (for backend = "sqlite").
    pub db_path: String,
    /// Connection string (for backend = "postgres").
    #[serde(default)]
    pub database_url: Option<String>,
    /// Render fetch errors through the caller's error renderer instead of the fallback.
    #[serde(default)]
    pub debug_errors: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    #[default]
    Sqlite,
    Postgres,
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendType::Sqlite => f.write_str("sqlite"),
            BackendType::Postgres => f.write_str("postgres"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Snapshot lifetime in seconds. One value for the whole process.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Keep a persisted tier that survives restarts.
    #[serde(default = "default_persist")]
    pub persist: bool,
    /// Path to the SQLite file backing the persisted tier.
    #[serde(default = "default_cache_path")]
    pub path: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            persist: default_persist(),
            path: default_cache_path(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> TimeDelta {
        TimeDelta::seconds(self.ttl_secs.min(i64::MAX as u64) as i64)
    }
}

fn default_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_persist() -> bool {
    true
}

fn default_cache_path() -> String {
    "permission-cache.db".to_string()
}

impl GatehouseConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GatehouseError::ConfigNotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| GatehouseError::TomlDe(e.to_string()))?;
        config.validate()?;
        tracing::debug!(path = %path.display(), backend = %config.gatehouse.backend, "loaded config");
        Ok(config)
    }

    /// Save config to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| GatehouseError::TomlSer(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache.ttl_secs == 0 {
            return Err(GatehouseError::Config(
                "cache.ttl_secs must be greater than zero".to_string(),
            ));
        }
        if self.gatehouse.backend == BackendType::Postgres
            && self.gatehouse.database_url.as_deref().is_none_or(str::is_empty)
        {
            return Err(GatehouseError::Config(
                "database_url is required for the postgres backend".to_string(),
            ));
        }
        Ok(())
    }

    /// Default config for `gatehouse init`.
    pub fn default_config(base_dir: &Path) -> Self {
        Self {
            gatehouse: GatehouseSettings {
                backend: BackendType::Sqlite,
                db_path: base_dir.join("gatehouse.db").display().to_string(),
                database_url: None,
                debug_errors: false,
            },
            cache: CacheConfig {
                ttl_secs: DEFAULT_CACHE_TTL_SECS,
                persist: true,
                path: base_dir.join("permission-cache.db").display().to_string(),
            },
        }
    }

    /// Resolve the config file path: `<base_dir>/gatehouse.toml`
    pub fn default_path(base_dir: &Path) -> PathBuf {
        base_dir.join("gatehouse.toml")
    }

    /// Resolve the default gatehouse home directory: `~/.gatehouse`
    pub fn default_base_dir() -> Result<PathBuf> {
        dirs::home_dir()
            .map(|h| h.join(".gatehouse"))
            .ok_or_else(|| GatehouseError::Config("Cannot determine home directory".to_string()))
    }
}
