//! Collection service
//!
//! Stateful facade over the engines for one user session. Owns the
//! in-memory instance set and trade ledger, recomputes derived views
//! after every change, and hands deltas to the persistence queue.
//! The in-memory state is authoritative for the session; the durable
//! store is a mirror written after the fact.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::reconcile::merge_instances;
use super::registration::RegistrationGroups;
use super::status::{BatchStatusChange, StatusEngine, StatusOutcome};
use super::sync::Snapshot;
use super::tags::{DerivedViews, derive_views};
use super::trade::{TradeLedger, swap_ownership};
use crate::data::{
    CollectionStore, InstancePatch, InstanceRef, InstanceSet, InstanceStatus, PersistCommand,
    PersistenceHandle, PokemonInstance, Timestamp, TradeBook, TradeRow, TradeStatus,
    VariantCatalog,
};
use crate::error::AppError;

/// Who the engine acts for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub username: String,
}

impl SessionContext {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// What applying a snapshot did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotOutcome {
    /// Whether the instance set was re-merged
    pub changed: bool,
    pub instances: usize,
    pub trades_adopted: usize,
    pub trades_invalidated: usize,
}

/// Collection service
pub struct CollectionService {
    session: SessionContext,
    catalog: Arc<VariantCatalog>,
    groups: RegistrationGroups,
    instances: InstanceSet,
    ledger: TradeLedger,
    views: DerivedViews,
    persistence: PersistenceHandle,
    last_local_write: Option<DateTime<Utc>>,
    last_refresh: Option<DateTime<Utc>>,
}

impl CollectionService {
    /// Create an empty service for a session
    pub fn new(
        session: SessionContext,
        catalog: Arc<VariantCatalog>,
        groups: RegistrationGroups,
        persistence: PersistenceHandle,
    ) -> Self {
        Self {
            session,
            catalog,
            groups,
            instances: InstanceSet::new(),
            ledger: TradeLedger::default(),
            views: DerivedViews::default(),
            persistence,
            last_local_write: None,
            last_refresh: None,
        }
    }

    /// Load cached rows from the durable store.
    ///
    /// Rows tagged with another user's name are skipped.
    ///
    /// # Errors
    /// Returns error if the store cannot be read
    pub async fn hydrate(&mut self, store: &dyn CollectionStore) -> Result<(), AppError> {
        let username = self.session.username.clone();
        self.instances = store
            .load_instances()
            .await?
            .into_iter()
            .filter(|(_, row)| row.belongs_to(&username))
            .collect();
        let trades = store.load_trades().await?;
        self.ledger = TradeLedger::new(trades, self.ledger.related_instances().clone());
        self.refresh_views();

        tracing::info!(
            %username,
            instances = self.instances.len(),
            trades = self.ledger.trades().len(),
            "Collection hydrated from store"
        );
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn instances(&self) -> &InstanceSet {
        &self.instances
    }

    pub fn get_instance(&self, instance_id: &str) -> Option<&PokemonInstance> {
        self.instances.get(instance_id)
    }

    pub fn trades(&self) -> &TradeBook {
        self.ledger.trades()
    }

    pub fn related_instances(&self) -> &InstanceSet {
        self.ledger.related_instances()
    }

    pub fn views(&self) -> &DerivedViews {
        &self.views
    }

    pub fn last_local_write(&self) -> Option<DateTime<Utc>> {
        self.last_local_write
    }

    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.last_refresh
    }

    /// Whether the last server snapshot is older than `staleness`
    pub fn is_stale(&self, now: DateTime<Utc>, staleness: Duration) -> bool {
        self.last_refresh
            .is_none_or(|refreshed| now - refreshed > staleness)
    }

    // =========================================================================
    // Instance status
    // =========================================================================

    /// Move one instance (or a variant's baseline row) to `status`.
    ///
    /// # Returns
    /// The engine outcome; a blocked transition is not an error.
    ///
    /// # Errors
    /// - `VariantNotFound` (logged) if the catalog lacks the variant
    /// - `InstanceNotFound` if the instance id is unknown
    pub fn set_status(
        &mut self,
        target: &InstanceRef,
        status: InstanceStatus,
    ) -> Result<StatusOutcome, AppError> {
        let now = Utc::now();
        let engine = StatusEngine::new(&self.catalog, &self.groups);
        let change = match engine.set_status(
            &mut self.instances,
            target,
            status,
            Timestamp::from_datetime(now),
        ) {
            Ok(change) => change,
            Err(error) => {
                tracing::error!(reference = %target, %status, %error, "Status change aborted");
                return Err(error);
            }
        };

        if let StatusOutcome::Blocked(blocked) = &change.outcome {
            tracing::warn!(message = %blocked, "Status change blocked");
            return Ok(change.outcome);
        }

        self.persist_instances(change.touched.iter(), Vec::new(), now);
        self.refresh_views();
        Ok(change.outcome)
    }

    /// Apply one status to many targets; failing targets are logged and skipped.
    pub fn set_status_many(
        &mut self,
        targets: &[InstanceRef],
        status: InstanceStatus,
    ) -> BatchStatusChange {
        let now = Utc::now();
        let engine = StatusEngine::new(&self.catalog, &self.groups);
        let batch = engine.set_status_many(
            &mut self.instances,
            targets,
            status,
            Timestamp::from_datetime(now),
        );

        for (target, error) in &batch.failures {
            tracing::error!(reference = %target, %status, %error, "Status change aborted");
        }
        let blocked = batch.outcomes.iter().filter(|o| o.is_blocked()).count();
        tracing::info!(
            %status,
            requested = targets.len(),
            touched = batch.touched.len(),
            pruned = batch.pruned.len(),
            blocked,
            failed = batch.failures.len(),
            "Batch status change applied"
        );

        self.persist_instances(batch.touched.iter(), batch.pruned.clone(), now);
        self.refresh_views();
        batch
    }

    /// Edit an instance's details.
    ///
    /// # Returns
    /// Whether anything changed
    ///
    /// # Errors
    /// `InstanceNotFound` if the id is unknown
    pub fn update_details(
        &mut self,
        instance_id: &str,
        patch: &InstancePatch,
    ) -> Result<bool, AppError> {
        let row = self
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| AppError::InstanceNotFound(instance_id.to_string()))?;
        if patch.is_empty() || !row.apply_patch(patch) {
            return Ok(false);
        }

        let now = Utc::now();
        row.last_update = Timestamp::from_datetime(now);
        let ids = [instance_id.to_string()];
        self.persist_instances(ids.iter(), Vec::new(), now);
        self.refresh_views();
        tracing::debug!(instance_id, "Instance details updated");
        Ok(true)
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Reconcile with a server snapshot.
    ///
    /// An instance set equal to the current one skips the merge. Trades are
    /// overlaid, with clash resolution for pending ones.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot) -> SnapshotOutcome {
        let now = Utc::now();
        let mut outcome = SnapshotOutcome::default();

        if snapshot.instances != self.instances {
            let merged =
                merge_instances(&self.instances, &snapshot.instances, &self.session.username);
            self.instances = merged;
            self.persistence
                .replace_instances(self.instances.values().cloned().collect());
            outcome.changed = true;
        } else {
            tracing::debug!("Snapshot instances unchanged; skipping merge");
        }

        if !snapshot.related_instances.is_empty() {
            self.ledger.set_related_instances(snapshot.related_instances);
        }
        if !snapshot.trades.is_empty() {
            let ingest = self.ledger.ingest(snapshot.trades, now);
            outcome.trades_adopted = ingest.adopted.len();
            outcome.trades_invalidated = ingest.invalidated.len();
            if !ingest.adopted.is_empty() {
                self.persistence.send(PersistCommand::PutTrades(ingest.adopted));
            }
            self.persistence.write_trades(ingest.invalidated);
        }

        self.refresh_views();
        self.last_refresh = Some(now);
        outcome.instances = self.instances.len();

        tracing::info!(
            changed = outcome.changed,
            instances = outcome.instances,
            trades_adopted = outcome.trades_adopted,
            trades_invalidated = outcome.trades_invalidated,
            favorites = self.views.favorites.len(),
            trade_listed = self.views.trade_listed.len(),
            most_wanted = self.views.most_wanted.len(),
            "Snapshot applied"
        );
        outcome
    }

    // =========================================================================
    // Trades
    // =========================================================================

    pub fn accept_trade(&mut self, trade_id: &str) -> Result<Vec<TradeRow>, AppError> {
        self.run_trade_op("accept", trade_id, |ledger, _, now| {
            ledger.accept(trade_id, now)
        })
    }

    pub fn deny_trade(&mut self, trade_id: &str) -> Result<Vec<TradeRow>, AppError> {
        self.run_trade_op("deny", trade_id, |ledger, _, now| ledger.deny(trade_id, now))
    }

    pub fn cancel_trade(&mut self, trade_id: &str) -> Result<Vec<TradeRow>, AppError> {
        self.run_trade_op("cancel", trade_id, |ledger, actor, now| {
            ledger.cancel(trade_id, actor, now)
        })
    }

    pub fn repropose_trade(&mut self, trade_id: &str) -> Result<Vec<TradeRow>, AppError> {
        self.run_trade_op("repropose", trade_id, |ledger, actor, now| {
            ledger.repropose(trade_id, actor, now)
        })
    }

    pub fn delete_trade(&mut self, trade_id: &str) -> Result<Vec<TradeRow>, AppError> {
        self.run_trade_op("delete", trade_id, |ledger, _, now| {
            ledger.delete(trade_id, now)
        })
    }

    /// Confirm completion as the session user.
    ///
    /// Once both sides confirmed, the two traded instances change owner:
    /// the one handed over leaves the user's set and the one received
    /// joins it. Both must be known (in the user's set or the related
    /// instances), otherwise ownership stays as it is.
    pub fn complete_trade(&mut self, trade_id: &str) -> Result<Vec<TradeRow>, AppError> {
        let changed = self.run_trade_op("complete", trade_id, |ledger, actor, now| {
            ledger.complete(trade_id, actor, now)
        })?;

        let completed = changed
            .iter()
            .find(|row| row.trade_id == trade_id && row.trade_status == TradeStatus::Completed);
        if let Some(trade) = completed {
            self.transfer_traded_instances(trade);
        }
        Ok(changed)
    }

    pub fn toggle_trade_satisfaction(&mut self, trade_id: &str) -> Result<Vec<TradeRow>, AppError> {
        self.run_trade_op("set_satisfaction", trade_id, |ledger, actor, now| {
            ledger.set_satisfaction(trade_id, actor, now)
        })
    }

    /// Overlay server-pushed trades outside a full snapshot
    pub fn ingest_trades(&mut self, incoming: Vec<TradeRow>) -> Vec<TradeRow> {
        let ingest = self.ledger.ingest(incoming, Utc::now());
        if !ingest.adopted.is_empty() {
            self.persistence
                .send(PersistCommand::PutTrades(ingest.adopted.clone()));
        }
        self.persistence.write_trades(ingest.invalidated.clone());

        let mut changed = ingest.adopted;
        changed.extend(ingest.invalidated);
        changed
    }

    /// Run a lifecycle operation as the session user.
    ///
    /// Missing trades and non-party actors are no-ops with an empty delta.
    fn run_trade_op<F>(
        &mut self,
        operation: &'static str,
        trade_id: &str,
        op: F,
    ) -> Result<Vec<TradeRow>, AppError>
    where
        F: FnOnce(&mut TradeLedger, &str, DateTime<Utc>) -> Result<Vec<TradeRow>, AppError>,
    {
        let now = Utc::now();
        match op(&mut self.ledger, &self.session.username, now) {
            Ok(changed) => {
                self.persistence.write_trades(changed.clone());
                self.last_local_write = Some(now);
                Ok(changed)
            }
            Err(error) if error.is_noop() => {
                tracing::warn!(operation, trade_id, %error, "Trade operation ignored");
                Ok(Vec::new())
            }
            Err(error) => Err(error),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn transfer_traded_instances(&mut self, trade: &TradeRow) {
        let mut pair: InstanceSet = [
            &trade.pokemon_instance_id_user_proposed,
            &trade.pokemon_instance_id_user_accepting,
        ]
        .into_iter()
        .filter_map(|id| {
            self.instances
                .get(id)
                .or_else(|| self.ledger.related_instances().get(id))
                .map(|row| (id.clone(), row.clone()))
        })
        .collect();
        swap_ownership(trade, &mut pair);
        if pair.len() < 2 {
            return;
        }

        let username = self.session.username.clone();
        let mut kept = Vec::new();
        let mut handed_over = Vec::new();
        for (id, row) in pair {
            if row.belongs_to(&username) {
                self.instances.insert(id.clone(), row);
                kept.push(id);
            } else if self.instances.remove(&id).is_some() {
                handed_over.push(row);
            }
        }

        tracing::info!(
            trade_id = %trade.trade_id,
            received = kept.len(),
            handed_over = handed_over.len(),
            "Traded instances transferred"
        );
        self.persist_instances(kept.iter(), handed_over, Utc::now());
        self.refresh_views();
    }

    fn refresh_views(&mut self) {
        self.views = derive_views(&self.instances);
    }

    /// Mirror current rows for `ids` (plus rows already gone from memory).
    fn persist_instances<'i>(
        &mut self,
        ids: impl Iterator<Item = &'i String>,
        removed: Vec<PokemonInstance>,
        now: DateTime<Utc>,
    ) {
        let mut rows: Vec<PokemonInstance> = ids
            .filter_map(|id| self.instances.get(id))
            .cloned()
            .collect();
        rows.extend(removed);
        if rows.is_empty() {
            return;
        }
        self.persistence.write_instances(rows);
        self.last_local_write = Some(now);
    }
}
