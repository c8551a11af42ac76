//! SQLite database operations
//!
//! Durable mirror of the collection. Rows are stored as JSON payloads
//! with their lookup columns alongside; queued patches live in
//! `pending_updates` until drained for remote delivery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;

use super::models::*;
use super::store::{CollectionStore, PendingUpdate, UpdateKind};
use crate::error::AppError;

/// Database connection pool wrapper
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    // =========================================================================
    // Connection
    // =========================================================================

    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        let connection_string = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&connection_string).await?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!(path = %path.display(), "Database connected and migrated successfully");

        Ok(Self { pool })
    }

    // =========================================================================
    // Instances
    // =========================================================================

    async fn upsert_instance_rows(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        rows: &[PokemonInstance],
    ) -> Result<(), AppError> {
        for row in rows {
            let payload = serde_json::to_string(row)?;
            sqlx::query(
                r#"
                INSERT INTO instances (instance_id, variant_id, payload, last_update)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(instance_id) DO UPDATE SET
                    variant_id = excluded.variant_id,
                    payload = excluded.payload,
                    last_update = excluded.last_update
                "#,
            )
            .bind(&row.instance_id)
            .bind(&row.variant_id)
            .bind(payload)
            .bind(row.last_update.as_millis())
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Count stored instance rows
    pub async fn count_instances(&self) -> Result<i64, AppError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM instances")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Get one instance row by id
    pub async fn get_instance(&self, instance_id: &str) -> Result<Option<PokemonInstance>, AppError> {
        let payload: Option<(String,)> =
            sqlx::query_as("SELECT payload FROM instances WHERE instance_id = ?")
                .bind(instance_id)
                .fetch_optional(&self.pool)
                .await?;

        payload
            .map(|(payload,)| serde_json::from_str(&payload).map_err(AppError::from))
            .transpose()
    }

    // =========================================================================
    // Trades
    // =========================================================================

    /// Get trades in a given status
    pub async fn get_trades_by_status(&self, status: TradeStatus) -> Result<Vec<TradeRow>, AppError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT payload FROM trades WHERE trade_status = ? ORDER BY trade_id")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(payload,)| serde_json::from_str(&payload).map_err(AppError::from))
            .collect()
    }
}

#[async_trait]
impl CollectionStore for Database {
    async fn put_instances(&self, rows: &[PokemonInstance]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        Self::upsert_instance_rows(&mut tx, rows).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn replace_instances(&self, rows: &[PokemonInstance]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM instances").execute(&mut *tx).await?;
        Self::upsert_instance_rows(&mut tx, rows).await?;
        tx.commit().await?;

        tracing::debug!(rows = rows.len(), "Instance snapshot replaced");
        Ok(())
    }

    async fn queue_instance_update(
        &self,
        instance_id: &str,
        patch: &serde_json::Value,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO pending_updates (kind, key, payload, queued_at) VALUES (?, ?, ?, ?)",
        )
        .bind(UpdateKind::Instance.as_str())
        .bind(instance_id)
        .bind(patch.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn put_trades(&self, rows: &[TradeRow]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;
        for row in rows {
            let payload = serde_json::to_string(row)?;
            sqlx::query(
                r#"
                INSERT INTO trades (trade_id, trade_status, payload, last_update)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(trade_id) DO UPDATE SET
                    trade_status = excluded.trade_status,
                    payload = excluded.payload,
                    last_update = excluded.last_update
                "#,
            )
            .bind(&row.trade_id)
            .bind(row.trade_status.as_str())
            .bind(payload)
            .bind(row.last_update.as_millis())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn queue_trade_update(
        &self,
        trade_id: &str,
        update: &serde_json::Value,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO pending_updates (kind, key, payload, queued_at) VALUES (?, ?, ?, ?)",
        )
        .bind(UpdateKind::Trade.as_str())
        .bind(trade_id)
        .bind(update.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_instances(&self) -> Result<InstanceSet, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT payload FROM instances")
            .fetch_all(&self.pool)
            .await?;

        let mut instances = InstanceSet::new();
        for (payload,) in rows {
            let instance: PokemonInstance = serde_json::from_str(&payload)?;
            instances.insert(instance.instance_id.clone(), instance);
        }
        Ok(instances)
    }

    async fn load_trades(&self) -> Result<TradeBook, AppError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT payload FROM trades")
            .fetch_all(&self.pool)
            .await?;

        let mut trades = TradeBook::new();
        for (payload,) in rows {
            let trade: TradeRow = serde_json::from_str(&payload)?;
            trades.insert(trade.trade_id.clone(), trade);
        }
        Ok(trades)
    }

    async fn drain_pending_updates(&self) -> Result<Vec<PendingUpdate>, AppError> {
        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query(
            "SELECT id, kind, key, payload, queued_at FROM pending_updates ORDER BY id ASC",
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut drained = Vec::with_capacity(rows.len());
        let mut last_id: Option<i64> = None;
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let kind: String = row.try_get("kind")?;
            let payload: String = row.try_get("payload")?;
            let queued_at: DateTime<Utc> = row.try_get("queued_at")?;
            last_id = Some(id);

            let Some(kind) = UpdateKind::parse(&kind) else {
                tracing::warn!(id, kind = %kind, "Skipping pending update with unknown kind");
                continue;
            };
            drained.push(PendingUpdate {
                kind,
                key: row.try_get("key")?,
                payload: serde_json::from_str(&payload)?,
                queued_at,
            });
        }

        if let Some(last_id) = last_id {
            sqlx::query("DELETE FROM pending_updates WHERE id <= ?")
                .bind(last_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(drained)
    }
}
