//! Engine and application configuration.
//!
//! Configuration is loaded from environment variables with fallback to
//! defaults, then passed down at construction. Nothing reads the
//! environment after startup.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::pool::DbConfig;

/// Behaviour switches for [`crate::LedgerEngine`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Accept documents dated after today. Default: false
    pub allow_future_dates: bool,

    /// Extra attempts `retry_stale` makes after a `StaleVersion`. Default: 3
    pub max_stale_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            allow_future_dates: false,
            max_stale_retries: 3,
        }
    }
}

impl EngineConfig {
    pub fn allow_future_dates(mut self, allow: bool) -> Self {
        self.allow_future_dates = allow;
        self
    }

    pub fn max_stale_retries(mut self, retries: u32) -> Self {
        self.max_stale_retries = retries;
        self
    }
}

/// Everything a binary needs to open the ledger.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db: DbConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable                      | Default          |
    /// |-------------------------------|------------------|
    /// | `CYLINDER_DB_PATH`            | `./cylinder.db`  |
    /// | `CYLINDER_DB_MAX_CONNECTIONS` | `5`              |
    /// | `CYLINDER_BUSY_TIMEOUT_MS`    | `5000`           |
    /// | `CYLINDER_ALLOW_FUTURE_DATES` | `false`          |
    /// | `CYLINDER_MAX_STALE_RETRIES`  | `3`              |
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`AppConfig::load`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let path = lookup("CYLINDER_DB_PATH").unwrap_or_else(|| "./cylinder.db".to_string());
        if path.trim().is_empty() {
            return Err(ConfigError::MissingRequired("CYLINDER_DB_PATH".to_string()));
        }

        let max_connections: u32 = parse_var(&lookup, "CYLINDER_DB_MAX_CONNECTIONS", "5")?;
        if max_connections == 0 {
            return Err(ConfigError::InvalidValue("CYLINDER_DB_MAX_CONNECTIONS".to_string()));
        }

        let busy_timeout_ms: u64 = parse_var(&lookup, "CYLINDER_BUSY_TIMEOUT_MS", "5000")?;

        let db = DbConfig::new(PathBuf::from(path))
            .max_connections(max_connections)
            .busy_timeout(Duration::from_millis(busy_timeout_ms));

        let engine = EngineConfig {
            allow_future_dates: parse_var(&lookup, "CYLINDER_ALLOW_FUTURE_DATES", "false")?,
            max_stale_retries: parse_var(&lookup, "CYLINDER_MAX_STALE_RETRIES", "3")?,
        };

        Ok(AppConfig { db, engine })
    }
}

fn parse_var<F, T>(lookup: &F, key: &str, default: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Missing required configuration: {0}")]
    MissingRequired(String),
}
