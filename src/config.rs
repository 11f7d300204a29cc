//! Layered configuration for the tracking engine
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults
//! 2. An optional TOML file
//! 3. `TRACKING_*` environment variables (`TRACKING_DATABASE__PATH`,
//!    `TRACKING_QUERY__MAX_RANGE_DAYS`, ...)

use crate::error::Result;
use crate::resolver::DEFAULT_MAX_RANGE_DAYS;
use crate::storage::libsql::ConnectionMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Database settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// File path, `:memory:`, or a `libsql://` URL. Defaults to the user data dir.
    #[serde(default)]
    pub path: Option<String>,
    /// Environment variable holding the auth token for remote databases
    pub auth_token_env: String,
    pub busy_timeout_ms: u64,
}

/// Read-side settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Widest window, in days, a single read may cover
    pub max_range_days: u32,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub database: DatabaseConfig,
    pub query: QueryConfig,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                path: None,
                auth_token_env: "TURSO_AUTH_TOKEN".to_string(),
                busy_timeout_ms: 5000,
            },
            query: QueryConfig {
                max_range_days: DEFAULT_MAX_RANGE_DAYS,
            },
        }
    }
}

impl TrackingConfig {
    /// Load defaults, then `file` if given, then the environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let defaults = Self::default();
        let mut builder = config::Config::builder()
            .set_default("database.auth_token_env", defaults.database.auth_token_env)?
            .set_default(
                "database.busy_timeout_ms",
                defaults.database.busy_timeout_ms as i64,
            )?
            .set_default("query.max_range_days", defaults.query.max_range_days as i64)?;

        if let Some(path) = file {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(config::File::from(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("TRACKING")
                .prefix_separator("_")
                .separator("__"),
        );

        let loaded: TrackingConfig = builder.build()?.try_deserialize()?;
        debug!("Loaded configuration: {:?}", loaded);
        Ok(loaded)
    }

    /// Configured database location, or the per-user default
    pub fn database_path(&self) -> String {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| default_db_path().to_string_lossy().into_owned())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.database.busy_timeout_ms)
    }

    pub fn connection_mode(&self) -> Result<ConnectionMode> {
        ConnectionMode::from_location(&self.database_path(), &self.database.auth_token_env)
    }
}

/// Default database path using the XDG data directory
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tracking")
        .join("tracking.db")
}
