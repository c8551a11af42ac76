//! Configuration management
//!
//! Loads configuration from:
//! 1. Default values
//! 2. Configuration files (config/default.toml, config/local.toml)
//! 3. Environment variables (override)

use serde::Deserialize;
use std::path::PathBuf;

use crate::service::{DEFAULT_SHARED_FORM_GROUPS, RegistrationGroups};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub database: DatabaseConfig,
    pub catalog: CatalogConfig,
    pub sync: SyncConfig,
    #[serde(default)]
    pub registration: RegistrationConfig,
    pub logging: LoggingConfig,
}

/// Session configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// User whose collection this process manages
    pub username: String,
}

/// Database configuration (SQLite only)
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    pub path: PathBuf,
}

/// Variant catalog configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// JSON array of variants
    pub path: PathBuf,
}

/// Snapshot refresh configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// JSON server snapshot; no refresh loop runs without one
    pub snapshot_path: Option<PathBuf>,
    /// Refresh interval in seconds (default: 300)
    pub refresh_interval_seconds: u64,
    /// Age after which the last snapshot counts as stale (default: 3600)
    pub staleness_seconds: u64,
}

impl SyncConfig {
    /// Refresh interval, never below one second
    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_interval_seconds.max(1))
    }

    pub fn staleness(&self) -> chrono::Duration {
        let seconds = i64::try_from(self.staleness_seconds).unwrap_or(i64::MAX);
        chrono::Duration::seconds(seconds.min(i64::MAX / 1000))
    }
}

/// Shared-form registration groups
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationConfig {
    /// Species-id groups sharing one registration state
    pub shared_form_groups: Vec<Vec<u32>>,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            shared_form_groups: DEFAULT_SHARED_FORM_GROUPS
                .iter()
                .map(|group| group.to_vec())
                .collect(),
        }
    }
}

impl RegistrationConfig {
    pub fn groups(&self) -> RegistrationGroups {
        RegistrationGroups::new(self.shared_form_groups.clone())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
    /// Log format: "pretty" or "json"
    pub format: String,
}

impl AppConfig {
    /// Load configuration from file and environment
    ///
    /// # Loading Order
    /// 1. Default values
    /// 2. config/default.toml (if exists)
    /// 3. config/local.toml (if exists)
    /// 4. Environment variables (POKESYNC__*)
    ///
    /// # Errors
    /// Returns error if configuration is invalid
    pub fn load() -> Result<Self, crate::error::AppError> {
        use config::{Config, Environment, File};

        let config = Config::builder()
            // Start with default values
            .set_default("database.path", "data/pokesync.db")?
            .set_default("catalog.path", "data/variants.json")?
            .set_default("sync.refresh_interval_seconds", 300)?
            .set_default("sync.staleness_seconds", 3600)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            // Load from config/default.toml if it exists
            .add_source(File::with_name("config/default").required(false))
            // Load from config/local.toml if it exists (overrides default)
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables (POKESYNC__*)
            .add_source(
                Environment::with_prefix("POKESYNC")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;

        let app_config: Self = config
            .try_deserialize()
            .map_err(|e| crate::error::AppError::Config(e.to_string()))?;
        app_config.validate()?;
        Ok(app_config)
    }

    fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.session.username.trim().is_empty() {
            return Err(crate::error::AppError::Config(
                "session.username must not be empty".to_string(),
            ));
        }

        if self.sync.refresh_interval_seconds == 0 {
            tracing::warn!("sync.refresh_interval_seconds=0 is invalid; clamped to 1 second");
        }

        if !matches!(
            self.logging.level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(crate::error::AppError::Config(format!(
                "logging.level must be one of trace, debug, info, warn, error, got {:?}",
                self.logging.level
            )));
        }

        if !matches!(self.logging.format.as_str(), "pretty" | "json") {
            return Err(crate::error::AppError::Config(format!(
                "logging.format must be \"pretty\" or \"json\", got {:?}",
                self.logging.format
            )));
        }

        if self
            .registration
            .shared_form_groups
            .iter()
            .any(|group| group.is_empty())
        {
            tracing::warn!("registration.shared_form_groups contains empty groups; ignoring them");
        }

        Ok(())
    }
}
