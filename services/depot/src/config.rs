//! Service configuration, read from a TOML file.
//!
//! ```toml
//! listen = "127.0.0.1:5000"
//!
//! [database]
//! path = "/var/lib/depot/depot.db"
//!
//! [storage.local]
//! path = "/var/lib/depot/blobs"
//!
//! [gc]
//! sweep-interval-secs = 3600
//! grace-period-secs = 14400
//! ```

use std::time::Duration;

use camino::Utf8PathBuf;
use chrono::TimeDelta;
use serde::Deserialize;
use storage::StorageConfig;

use crate::error::{DepotError, DepotResult};
use crate::pagination::DEFAULT_MAX_PAGE_SIZE;

/// Top level configuration for `depot-server`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DepotConfig {
    /// Address the HTTP API binds to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Relational store.
    pub database: DatabaseConfig,

    /// Blob backend.
    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    /// Garbage collection timing.
    #[serde(default)]
    pub gc: GcConfig,

    /// Blob backend call limits.
    #[serde(default)]
    pub backend: BackendConfig,

    /// HTTP API limits.
    #[serde(default)]
    pub api: ApiConfig,
}

fn default_listen() -> String {
    "127.0.0.1:5000".to_string()
}

fn default_storage() -> StorageConfig {
    StorageConfig::Memory
}

impl DepotConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(document: &str) -> DepotResult<Self> {
        let config: DepotConfig =
            toml_edit::de::from_str(document).map_err(|err| DepotError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> DepotResult<()> {
        if self.gc.sweep_interval_secs == 0 {
            return Err(DepotError::Config(
                "gc.sweep-interval-secs must be positive".into(),
            ));
        }
        if self.api.max_page_size == 0 {
            return Err(DepotError::Config("api.max-page-size must be positive".into()));
        }
        if self.database.max_connections == 0 {
            return Err(DepotError::Config(
                "database.max-connections must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseConfig {
    /// Path of the database file; created if missing.
    pub path: Utf8PathBuf,

    /// Connection pool size. Reads run concurrently; writes still take turns.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    4
}

/// Timing of the blob sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct GcConfig {
    /// Minimum time between two sweeps of the same account.
    pub sweep_interval_secs: u64,

    /// How long a blob stays marked before it may be deleted.
    pub grace_period_secs: u64,

    /// How often the janitor wakes up to look for due accounts.
    pub poll_interval_secs: u64,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60 * 60,
            grace_period_secs: 4 * 60 * 60,
            poll_interval_secs: 60,
        }
    }
}

impl GcConfig {
    /// Minimum time between two sweeps of the same account.
    pub fn sweep_interval(&self) -> TimeDelta {
        seconds(self.sweep_interval_secs)
    }

    /// How long a blob stays marked before it may be deleted.
    pub fn grace_period(&self) -> TimeDelta {
        seconds(self.grace_period_secs)
    }

    /// Janitor wake-up period.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

fn seconds(secs: u64) -> TimeDelta {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// Blob backend call limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BackendConfig {
    /// Deadline for a single backend call.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

impl BackendConfig {
    /// Deadline for a single backend call.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// HTTP API limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ApiConfig {
    /// Upper bound and default for the `limit` parameter of listings.
    pub max_page_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
        }
    }
}
