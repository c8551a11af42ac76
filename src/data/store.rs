//! Store collaborator contract
//!
//! The durable store is a downstream mirror of the in-memory collection:
//! rows are bulk-upserted locally and partial patches are queued for
//! delivery to the remote service. `MemoryStore` is the in-process
//! implementation; `Database` is the SQLite one.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::models::{InstanceSet, PokemonInstance, TradeBook, TradeRow};
use crate::error::AppError;

/// What a queued update refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Instance,
    Trade,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Trade => "trade",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "instance" => Some(Self::Instance),
            "trade" => Some(Self::Trade),
            _ => None,
        }
    }
}

/// Patch waiting for remote delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingUpdate {
    pub kind: UpdateKind,
    pub key: String,
    pub payload: serde_json::Value,
    pub queued_at: DateTime<Utc>,
}

/// Read/write contract of the durable store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CollectionStore: Send + Sync {
    /// Bulk upsert instance rows
    async fn put_instances(&self, rows: &[PokemonInstance]) -> Result<(), AppError>;

    /// Replace the whole instance snapshot (after a merge)
    async fn replace_instances(&self, rows: &[PokemonInstance]) -> Result<(), AppError>;

    /// Enqueue a partial-field patch for one instance
    async fn queue_instance_update(
        &self,
        instance_id: &str,
        patch: &serde_json::Value,
    ) -> Result<(), AppError>;

    /// Bulk upsert trade rows
    async fn put_trades(&self, rows: &[TradeRow]) -> Result<(), AppError>;

    /// Enqueue a trade operation for remote delivery
    async fn queue_trade_update(
        &self,
        trade_id: &str,
        update: &serde_json::Value,
    ) -> Result<(), AppError>;

    async fn load_instances(&self) -> Result<InstanceSet, AppError>;

    async fn load_trades(&self) -> Result<TradeBook, AppError>;

    /// Take every queued patch, oldest first
    async fn drain_pending_updates(&self) -> Result<Vec<PendingUpdate>, AppError>;
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Default)]
struct MemoryInner {
    instances: InstanceSet,
    trades: TradeBook,
    pending: VecDeque<PendingUpdate>,
}

/// In-process store (tests and dry runs)
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued patches
    pub async fn pending_len(&self) -> usize {
        self.inner.read().await.pending.len()
    }
}

#[async_trait]
impl CollectionStore for MemoryStore {
    async fn put_instances(&self, rows: &[PokemonInstance]) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        for row in rows {
            inner.instances.insert(row.instance_id.clone(), row.clone());
        }
        Ok(())
    }

    async fn replace_instances(&self, rows: &[PokemonInstance]) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        inner.instances = rows
            .iter()
            .map(|row| (row.instance_id.clone(), row.clone()))
            .collect();
        Ok(())
    }

    async fn queue_instance_update(
        &self,
        instance_id: &str,
        patch: &serde_json::Value,
    ) -> Result<(), AppError> {
        self.inner.write().await.pending.push_back(PendingUpdate {
            kind: UpdateKind::Instance,
            key: instance_id.to_string(),
            payload: patch.clone(),
            queued_at: Utc::now(),
        });
        Ok(())
    }

    async fn put_trades(&self, rows: &[TradeRow]) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        for row in rows {
            inner.trades.insert(row.trade_id.clone(), row.clone());
        }
        Ok(())
    }

    async fn queue_trade_update(
        &self,
        trade_id: &str,
        update: &serde_json::Value,
    ) -> Result<(), AppError> {
        self.inner.write().await.pending.push_back(PendingUpdate {
            kind: UpdateKind::Trade,
            key: trade_id.to_string(),
            payload: update.clone(),
            queued_at: Utc::now(),
        });
        Ok(())
    }

    async fn load_instances(&self) -> Result<InstanceSet, AppError> {
        Ok(self.inner.read().await.instances.clone())
    }

    async fn load_trades(&self) -> Result<TradeBook, AppError> {
        Ok(self.inner.read().await.trades.clone())
    }

    async fn drain_pending_updates(&self) -> Result<Vec<PendingUpdate>, AppError> {
        Ok(self.inner.write().await.pending.drain(..).collect())
    }
}
