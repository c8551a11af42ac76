//! Fire-and-forget persistence
//!
//! Engines hand their deltas to a `PersistenceHandle`; a background
//! `PersistenceWorker` drains the queue into the `CollectionStore`.
//! Failures are logged and swallowed: the in-memory state stays
//! authoritative until the next reconciliation.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::models::{PokemonInstance, TradeRow};
use super::store::CollectionStore;
use crate::error::AppError;

/// One durable write
#[derive(Debug, Clone)]
pub enum PersistCommand {
    PutInstances(Vec<PokemonInstance>),
    ReplaceInstances(Vec<PokemonInstance>),
    QueueInstanceUpdate {
        instance_id: String,
        patch: serde_json::Value,
    },
    PutTrades(Vec<TradeRow>),
    QueueTradeUpdate {
        trade_id: String,
        update: serde_json::Value,
    },
}

impl PersistCommand {
    /// Operation name used in logs
    pub fn operation(&self) -> &'static str {
        match self {
            Self::PutInstances(_) => "put_instances",
            Self::ReplaceInstances(_) => "replace_instances",
            Self::QueueInstanceUpdate { .. } => "queue_instance_update",
            Self::PutTrades(_) => "put_trades",
            Self::QueueTradeUpdate { .. } => "queue_trade_update",
        }
    }
}

/// Sending side of the persistence queue
#[derive(Debug, Clone, Default)]
pub struct PersistenceHandle {
    sender: Option<mpsc::UnboundedSender<PersistCommand>>,
}

impl PersistenceHandle {
    /// Create a handle and the receiver a worker should drain
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PersistCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Handle that drops every write (no durable mirror)
    pub fn disconnected() -> Self {
        Self { sender: None }
    }

    pub fn send(&self, command: PersistCommand) {
        let Some(sender) = &self.sender else {
            return;
        };
        let operation = command.operation();
        if sender.send(command).is_err() {
            tracing::warn!(operation, "Persistence worker stopped; dropping write");
        }
    }

    /// Upsert rows and queue each as a full-row patch for remote delivery.
    pub fn write_instances(&self, rows: Vec<PokemonInstance>) {
        if rows.is_empty() {
            return;
        }
        for row in &rows {
            match serde_json::to_value(row) {
                Ok(patch) => self.send(PersistCommand::QueueInstanceUpdate {
                    instance_id: row.instance_id.clone(),
                    patch,
                }),
                Err(error) => tracing::warn!(
                    instance_id = %row.instance_id,
                    %error,
                    "Failed to encode instance patch"
                ),
            }
        }
        self.send(PersistCommand::PutInstances(rows));
    }

    /// Upsert trades and queue one `updateTrade` operation per row.
    pub fn write_trades(&self, rows: Vec<TradeRow>) {
        if rows.is_empty() {
            return;
        }
        for row in &rows {
            match serde_json::to_value(TradeOperation::update(row)) {
                Ok(update) => self.send(PersistCommand::QueueTradeUpdate {
                    trade_id: row.trade_id.clone(),
                    update,
                }),
                Err(error) => tracing::warn!(
                    trade_id = %row.trade_id,
                    %error,
                    "Failed to encode trade update"
                ),
            }
        }
        self.send(PersistCommand::PutTrades(rows));
    }

    pub fn replace_instances(&self, rows: Vec<PokemonInstance>) {
        self.send(PersistCommand::ReplaceInstances(rows));
    }
}

/// Queued trade operation as delivered to the remote service
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TradeOperation<'a> {
    operation: &'static str,
    trade_data: &'a TradeRow,
}

impl<'a> TradeOperation<'a> {
    fn update(trade: &'a TradeRow) -> Self {
        Self {
            operation: "updateTrade",
            trade_data: trade,
        }
    }
}

/// Drains persistence commands into a store
pub struct PersistenceWorker;

impl PersistenceWorker {
    /// Spawn the worker on the current runtime
    pub fn spawn(
        store: Arc<dyn CollectionStore>,
        receiver: mpsc::UnboundedReceiver<PersistCommand>,
    ) -> JoinHandle<()> {
        let task = tokio::spawn(Self::run(store, receiver));
        tracing::info!("Persistence worker spawned");
        task
    }

    /// Run until every handle is dropped
    pub async fn run(
        store: Arc<dyn CollectionStore>,
        mut receiver: mpsc::UnboundedReceiver<PersistCommand>,
    ) {
        while let Some(command) = receiver.recv().await {
            let operation = command.operation();
            match Self::execute(store.as_ref(), command).await {
                Ok(()) => tracing::debug!(operation, "Persistence write completed"),
                Err(error) => tracing::warn!(
                    operation,
                    %error,
                    "Persistence write failed (no retry; in-memory state stays authoritative)"
                ),
            }
        }
        tracing::debug!("Persistence worker stopped");
    }

    /// Apply one command to the store
    pub async fn execute(
        store: &dyn CollectionStore,
        command: PersistCommand,
    ) -> Result<(), AppError> {
        match command {
            PersistCommand::PutInstances(rows) => store.put_instances(&rows).await,
            PersistCommand::ReplaceInstances(rows) => store.replace_instances(&rows).await,
            PersistCommand::QueueInstanceUpdate { instance_id, patch } => {
                store.queue_instance_update(&instance_id, &patch).await
            }
            PersistCommand::PutTrades(rows) => store.put_trades(&rows).await,
            PersistCommand::QueueTradeUpdate { trade_id, update } => {
                store.queue_trade_update(&trade_id, &update).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::store::{MemoryStore, MockCollectionStore};
    use crate::data::{Timestamp, TradeStatus};

    fn caught(id: &str) -> PokemonInstance {
        PokemonInstance {
            instance_id: id.to_string(),
            variant_id: "0025-default".to_string(),
            is_caught: true,
            registered: true,
            last_update: Timestamp(10),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_worker_drains_into_store() {
        let store = Arc::new(MemoryStore::new());
        let (handle, receiver) = PersistenceHandle::channel();

        handle.write_instances(vec![caught("a")]);
        handle.write_trades(vec![TradeRow {
            trade_id: "t1".to_string(),
            trade_status: TradeStatus::Pending,
            ..Default::default()
        }]);
        drop(handle);

        PersistenceWorker::run(store.clone(), receiver).await;

        assert!(store.load_instances().await.unwrap().contains_key("a"));
        assert!(store.load_trades().await.unwrap().contains_key("t1"));
        let pending = store.drain_pending_updates().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].payload["operation"], "updateTrade");
        assert_eq!(pending[1].payload["tradeData"]["trade_status"], "pending");
    }

    #[tokio::test]
    async fn test_worker_survives_store_failures() {
        let mut store = MockCollectionStore::new();
        store
            .expect_queue_instance_update()
            .times(2)
            .returning(|_, _| Err(AppError::Persistence("disk full".to_string())));
        store
            .expect_put_instances()
            .times(1)
            .returning(|_| Err(AppError::Persistence("disk full".to_string())));

        let (handle, receiver) = PersistenceHandle::channel();
        handle.write_instances(vec![caught("a"), caught("b")]);
        drop(handle);

        // Must drain every command even though each write fails
        PersistenceWorker::run(Arc::new(store), receiver).await;
    }

    #[test]
    fn test_disconnected_handle_drops_writes() {
        let handle = PersistenceHandle::disconnected();
        handle.write_instances(vec![caught("a")]);
    }
}
