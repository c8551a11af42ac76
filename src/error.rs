//! Error types for PokeSync
//!
//! All fallible operations return `AppError`. Business-rule outcomes that
//! are not failures (a blocked status transition) are modelled as typed
//! results in the service layer instead.

use thiserror::Error;

/// Application-wide error type
#[derive(Debug, Error)]
pub enum AppError {
    /// The catalog has no entry for the requested variant
    #[error("Variant not found: {0}")]
    VariantNotFound(String),

    /// No instance with this id exists in the user's set
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// No trade with this id exists in the trade book
    #[error("Trade not found: {0}")]
    TradeNotFound(String),

    /// Actor is not a party to the trade
    #[error("User {actor} is not a party to trade {trade_id}")]
    UnauthorizedActor { trade_id: String, actor: String },

    /// Durable store write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// SQLite mirror error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// JSON encoding/decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error (catalog, snapshots)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

impl AppError {
    /// Whether this error is a recoverable business-rule no-op
    /// (missing trade, wrong actor) rather than a real failure.
    pub fn is_noop(&self) -> bool {
        matches!(
            self,
            AppError::TradeNotFound(_) | AppError::UnauthorizedActor { .. }
        )
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;
