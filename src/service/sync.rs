//! Server snapshot refresh
//!
//! A `SnapshotSource` fetches the server-authoritative state; the
//! `SnapshotRefresher` pulls it and hands it to the collection service.
//! Only one refresh runs at a time per session.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::collection::{CollectionService, SnapshotOutcome};
use crate::data::{InstanceSet, TradeRow};
use crate::error::AppError;

/// Server state for one user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub instances: InstanceSet,
    pub trades: Vec<TradeRow>,
    /// Both parties' instances referenced by `trades`
    pub related_instances: InstanceSet,
}

/// Where snapshots come from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self) -> Result<Snapshot, AppError>;
}

/// Snapshot read from a JSON file
pub struct FileSnapshotSource {
    path: PathBuf,
}

impl FileSnapshotSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SnapshotSource for FileSnapshotSource {
    async fn fetch(&self) -> Result<Snapshot, AppError> {
        let raw = tokio::fs::read(&self.path).await?;
        let snapshot: Snapshot = serde_json::from_slice(&raw)?;
        tracing::debug!(
            path = %self.path.display(),
            instances = snapshot.instances.len(),
            trades = snapshot.trades.len(),
            "Snapshot read"
        );
        Ok(snapshot)
    }
}

// =============================================================================
// Refresh guard
// =============================================================================

/// "Already refreshing" flag
#[derive(Debug, Default)]
pub struct RefreshGate {
    refreshing: AtomicBool,
}

impl RefreshGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate; `None` while another refresh holds it.
    pub fn try_begin(&self) -> Option<RefreshTicket<'_>> {
        self.refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RefreshTicket { gate: self })
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }
}

/// Releases the gate on drop
#[derive(Debug)]
pub struct RefreshTicket<'a> {
    gate: &'a RefreshGate,
}

impl Drop for RefreshTicket<'_> {
    fn drop(&mut self) {
        self.gate.refreshing.store(false, Ordering::Release);
    }
}

/// What a refresh attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Another refresh was in flight
    Skipped,
    Applied(SnapshotOutcome),
}

// =============================================================================
// Refresher
// =============================================================================

/// Pulls snapshots into a shared collection service
pub struct SnapshotRefresher {
    service: Arc<Mutex<CollectionService>>,
    source: Arc<dyn SnapshotSource>,
    gate: RefreshGate,
}

impl SnapshotRefresher {
    pub fn new(service: Arc<Mutex<CollectionService>>, source: Arc<dyn SnapshotSource>) -> Self {
        Self {
            service,
            source,
            gate: RefreshGate::new(),
        }
    }

    /// Fetch and apply one snapshot.
    ///
    /// The service lock is only held while applying, not while fetching.
    ///
    /// # Errors
    /// Returns the source's error; the collection is left untouched.
    pub async fn refresh(&self) -> Result<RefreshOutcome, AppError> {
        let Some(_ticket) = self.gate.try_begin() else {
            tracing::debug!("Refresh already in progress; skipping");
            return Ok(RefreshOutcome::Skipped);
        };

        let snapshot = self.source.fetch().await?;
        let outcome = self.service.lock().await.apply_snapshot(snapshot);
        Ok(RefreshOutcome::Applied(outcome))
    }

    pub fn is_refreshing(&self) -> bool {
        self.gate.is_refreshing()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PersistenceHandle, PokemonInstance, Timestamp, VariantCatalog};
    use crate::service::{RegistrationGroups, SessionContext};
    use tempfile::TempDir;

    fn service() -> Arc<Mutex<CollectionService>> {
        Arc::new(Mutex::new(CollectionService::new(
            SessionContext::new("ash"),
            Arc::new(VariantCatalog::default()),
            RegistrationGroups::default(),
            PersistenceHandle::disconnected(),
        )))
    }

    fn caught(id: &str) -> PokemonInstance {
        PokemonInstance {
            instance_id: id.to_string(),
            variant_id: "0025-default".to_string(),
            is_caught: true,
            registered: true,
            last_update: Timestamp(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_gate_allows_one_holder() {
        let gate = RefreshGate::new();
        let ticket = gate.try_begin();
        assert!(ticket.is_some());
        assert!(gate.is_refreshing());
        assert!(gate.try_begin().is_none());

        drop(ticket);
        assert!(!gate.is_refreshing());
        assert!(gate.try_begin().is_some());
    }

    #[tokio::test]
    async fn test_refresh_applies_snapshot() {
        let mut source = MockSnapshotSource::new();
        source.expect_fetch().times(1).returning(|| {
            Ok(Snapshot {
                instances: [("a".to_string(), caught("a"))].into_iter().collect(),
                ..Default::default()
            })
        });
        let service = service();
        let refresher = SnapshotRefresher::new(service.clone(), Arc::new(source));

        let outcome = refresher.refresh().await.unwrap();

        assert!(matches!(outcome, RefreshOutcome::Applied(SnapshotOutcome { changed: true, .. })));
        assert!(service.lock().await.instances().contains_key("a"));
        assert!(!refresher.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_skips_while_in_flight() {
        let refresher = SnapshotRefresher::new(service(), Arc::new(MockSnapshotSource::new()));
        let _held = refresher.gate.try_begin();

        let outcome = refresher.refresh().await.unwrap();

        assert_eq!(outcome, RefreshOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_failed_fetch_releases_gate() {
        let mut source = MockSnapshotSource::new();
        source
            .expect_fetch()
            .returning(|| Err(AppError::Persistence("offline".to_string())));
        let refresher = SnapshotRefresher::new(service(), Arc::new(source));

        assert!(refresher.refresh().await.is_err());
        assert!(!refresher.is_refreshing());
    }

    #[tokio::test]
    async fn test_file_source_reads_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snapshot.json");
        tokio::fs::write(
            &path,
            r#"{"instances":{"a":{"instance_id":"a","variant_id":"0025-default","is_caught":true,"last_update":"2024-01-01T00:00:00Z"}},"trades":[{"trade_id":"t1","trade_status":"pending"}]}"#,
        )
        .await
        .unwrap();

        let snapshot = FileSnapshotSource::new(&path).fetch().await.unwrap();

        assert!(snapshot.instances["a"].is_caught);
        assert_eq!(snapshot.trades[0].trade_id, "t1");
        assert!(snapshot.related_instances.is_empty());
    }

    #[tokio::test]
    async fn test_file_source_missing_file_is_io_error() {
        let result = FileSnapshotSource::new("/nonexistent/snapshot.json").fetch().await;
        assert!(matches!(result, Err(AppError::Io(_))));
    }
}
