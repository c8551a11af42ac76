//! Trade lifecycle engine
//!
//! State machine over `TradeRow.trade_status`:
//! proposed -> pending (accept) | denied | deleted | cancelled,
//! pending -> completed (both confirmations) | cancelled | deleted,
//! any -> proposed (repropose).
//!
//! Every operation returns the rows it changed so callers persist only
//! the delta. Accepting (or ingesting a pending trade) deletes competing
//! proposals that offer the same instances.

use chrono::{DateTime, Utc};

use crate::data::{InstanceSet, Party, Timestamp, TradeBook, TradeRow, TradeStatus};
use crate::error::AppError;

/// Result of overlaying server-pushed trades
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TradeIngest {
    /// Incoming rows as stored
    pub adopted: Vec<TradeRow>,
    /// Other proposals deleted because an incoming trade is pending
    pub invalidated: Vec<TradeRow>,
}

/// The trade book plus the partner-side instances its trades refer to
#[derive(Debug, Default, Clone)]
pub struct TradeLedger {
    trades: TradeBook,
    related_instances: InstanceSet,
}

impl TradeLedger {
    pub fn new(trades: TradeBook, related_instances: InstanceSet) -> Self {
        Self {
            trades,
            related_instances,
        }
    }

    pub fn trades(&self) -> &TradeBook {
        &self.trades
    }

    pub fn get(&self, trade_id: &str) -> Option<&TradeRow> {
        self.trades.get(trade_id)
    }

    pub fn related_instances(&self) -> &InstanceSet {
        &self.related_instances
    }

    /// Replace the instances referenced by trades (both parties)
    pub fn set_related_instances(&mut self, related_instances: InstanceSet) {
        self.related_instances = related_instances;
    }

    fn row_mut(&mut self, trade_id: &str) -> Result<&mut TradeRow, AppError> {
        self.trades
            .get_mut(trade_id)
            .ok_or_else(|| AppError::TradeNotFound(trade_id.to_string()))
    }

    // =========================================================================
    // Lifecycle operations
    // =========================================================================

    /// Accept a proposal; competing proposals over the same instances are deleted.
    pub fn accept(&mut self, trade_id: &str, now: DateTime<Utc>) -> Result<Vec<TradeRow>, AppError> {
        let row = self.row_mut(trade_id)?;
        row.trade_status = TradeStatus::Pending;
        row.trade_accepted_date = Some(now);
        row.last_update = Timestamp::from_datetime(now);
        let accepted = row.clone();

        let mut changed = vec![accepted];
        changed.extend(self.resolve_clashes(trade_id, now));
        tracing::info!(trade_id, invalidated = changed.len() - 1, "Trade accepted");
        Ok(changed)
    }

    pub fn deny(&mut self, trade_id: &str, now: DateTime<Utc>) -> Result<Vec<TradeRow>, AppError> {
        let row = self.row_mut(trade_id)?;
        row.trade_status = TradeStatus::Denied;
        row.trade_deleted_date = Some(now);
        row.last_update = Timestamp::from_datetime(now);
        tracing::info!(trade_id, "Trade denied");
        Ok(vec![row.clone()])
    }

    pub fn cancel(
        &mut self,
        trade_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TradeRow>, AppError> {
        let row = self.row_mut(trade_id)?;
        row.trade_status = TradeStatus::Cancelled;
        row.trade_cancelled_date = Some(now);
        row.trade_cancelled_by = Some(actor.to_string());
        row.last_update = Timestamp::from_datetime(now);
        tracing::info!(trade_id, actor, "Trade cancelled");
        Ok(vec![row.clone()])
    }

    /// Put a trade back to `proposed` with `actor` as the proposer.
    ///
    /// When the accepting party resubmits, usernames and offered instance
    /// ids swap together so each instance stays with its owner. All dates,
    /// confirmations and satisfaction flags reset.
    ///
    /// # Errors
    /// `UnauthorizedActor` if `actor` is neither party
    pub fn repropose(
        &mut self,
        trade_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TradeRow>, AppError> {
        let row = self.row_mut(trade_id)?;
        let party = row.party_of(actor).ok_or_else(|| AppError::UnauthorizedActor {
            trade_id: trade_id.to_string(),
            actor: actor.to_string(),
        })?;

        if party == Party::Accepter {
            std::mem::swap(&mut row.username_proposed, &mut row.username_accepting);
            std::mem::swap(
                &mut row.pokemon_instance_id_user_proposed,
                &mut row.pokemon_instance_id_user_accepting,
            );
        }

        row.trade_status = TradeStatus::Proposed;
        row.trade_proposal_date = Some(now);
        row.trade_accepted_date = None;
        row.trade_completed_date = None;
        row.trade_cancelled_date = None;
        row.trade_deleted_date = None;
        row.trade_cancelled_by = None;
        row.user_proposed_completion_confirmed = false;
        row.user_accepting_completion_confirmed = false;
        row.user_1_trade_satisfaction = None;
        row.user_2_trade_satisfaction = None;
        row.last_update = Timestamp::from_datetime(now);

        tracing::info!(trade_id, actor, swapped = party == Party::Accepter, "Trade re-proposed");
        Ok(vec![row.clone()])
    }

    pub fn delete(&mut self, trade_id: &str, now: DateTime<Utc>) -> Result<Vec<TradeRow>, AppError> {
        let row = self.row_mut(trade_id)?;
        row.trade_status = TradeStatus::Deleted;
        row.trade_deleted_date = Some(now);
        row.last_update = Timestamp::from_datetime(now);
        tracing::info!(trade_id, "Trade deleted");
        Ok(vec![row.clone()])
    }

    /// Record `actor`'s completion confirmation.
    ///
    /// The trade becomes `completed` once both sides confirmed; the two
    /// related instances then change hands.
    ///
    /// # Errors
    /// `UnauthorizedActor` if `actor` is neither party
    pub fn complete(
        &mut self,
        trade_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TradeRow>, AppError> {
        let row = self.row_mut(trade_id)?;
        let party = row.party_of(actor).ok_or_else(|| AppError::UnauthorizedActor {
            trade_id: trade_id.to_string(),
            actor: actor.to_string(),
        })?;

        match party {
            Party::Proposer => row.user_proposed_completion_confirmed = true,
            Party::Accepter => row.user_accepting_completion_confirmed = true,
        }
        row.last_update = Timestamp::from_datetime(now);

        let completed_now = row.both_confirmed() && row.trade_status != TradeStatus::Completed;
        if completed_now {
            row.trade_status = TradeStatus::Completed;
            row.trade_completed_date = Some(now);
        }
        let updated = row.clone();

        if completed_now {
            let swapped = swap_ownership(&updated, &mut self.related_instances);
            tracing::info!(trade_id, swapped = swapped.len(), "Trade completed");
        } else {
            tracing::info!(trade_id, actor, "Trade completion confirmed; awaiting other party");
        }
        Ok(vec![updated])
    }

    /// Toggle `actor`'s satisfaction flag.
    ///
    /// # Errors
    /// `UnauthorizedActor` if `actor` is neither party
    pub fn set_satisfaction(
        &mut self,
        trade_id: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TradeRow>, AppError> {
        let row = self.row_mut(trade_id)?;
        let party = row.party_of(actor).ok_or_else(|| AppError::UnauthorizedActor {
            trade_id: trade_id.to_string(),
            actor: actor.to_string(),
        })?;

        let flag = match party {
            Party::Proposer => &mut row.user_1_trade_satisfaction,
            Party::Accepter => &mut row.user_2_trade_satisfaction,
        };
        *flag = Some(!flag.unwrap_or(false));
        row.last_update = Timestamp::from_datetime(now);

        tracing::debug!(trade_id, actor, satisfied = ?flag_value(row, party), "Trade satisfaction toggled");
        Ok(vec![row.clone()])
    }

    // =========================================================================
    // Server pushes
    // =========================================================================

    /// Overlay server-pushed trades, then resolve clashes for pending ones.
    pub fn ingest(&mut self, incoming: Vec<TradeRow>, now: DateTime<Utc>) -> TradeIngest {
        let mut pending = Vec::new();
        let mut ids = Vec::with_capacity(incoming.len());
        for row in incoming {
            if row.trade_status == TradeStatus::Pending {
                pending.push(row.trade_id.clone());
            }
            ids.push(row.trade_id.clone());
            self.trades.insert(row.trade_id.clone(), row);
        }

        let mut invalidated: Vec<TradeRow> = Vec::new();
        for trade_id in &pending {
            for row in self.resolve_clashes(trade_id, now) {
                invalidated.retain(|seen| seen.trade_id != row.trade_id);
                invalidated.push(row);
            }
        }

        let adopted = ids
            .iter()
            .filter(|id| !invalidated.iter().any(|row| &row.trade_id == *id))
            .filter_map(|id| self.trades.get(id).cloned())
            .collect::<Vec<_>>();

        tracing::debug!(
            adopted = adopted.len(),
            invalidated = invalidated.len(),
            "Trades ingested"
        );
        TradeIngest {
            adopted,
            invalidated,
        }
    }

    /// Delete every other proposed trade offering one of `anchor_id`'s instances.
    fn resolve_clashes(&mut self, anchor_id: &str, now: DateTime<Utc>) -> Vec<TradeRow> {
        let Some(anchor) = self.trades.get(anchor_id).cloned() else {
            return Vec::new();
        };

        let mut changed = Vec::new();
        for (trade_id, trade) in self.trades.iter_mut() {
            if trade_id == anchor_id
                || trade.trade_status != TradeStatus::Proposed
                || !trade.shares_instance_with(&anchor)
            {
                continue;
            }
            trade.trade_status = TradeStatus::Deleted;
            trade.trade_deleted_date = Some(now);
            trade.last_update = Timestamp::from_datetime(now);
            tracing::debug!(trade_id, anchor_id, "Competing proposal deleted");
            changed.push(trade.clone());
        }
        changed
    }
}

fn flag_value(row: &TradeRow, party: Party) -> Option<bool> {
    match party {
        Party::Proposer => row.user_1_trade_satisfaction,
        Party::Accepter => row.user_2_trade_satisfaction,
    }
}

/// Hand the two instances of a completed trade to their new owners.
///
/// The proposer's instance now belongs to the accepting user and vice
/// versa. Nothing moves unless both instances are in `instances`. Returns
/// the ids of rows whose `username` changed.
pub fn swap_ownership(trade: &TradeRow, instances: &mut InstanceSet) -> Vec<String> {
    let moves = [
        (
            &trade.pokemon_instance_id_user_proposed,
            &trade.username_accepting,
        ),
        (
            &trade.pokemon_instance_id_user_accepting,
            &trade.username_proposed,
        ),
    ];

    if !moves
        .iter()
        .all(|(instance_id, _)| instances.contains_key(instance_id.as_str()))
    {
        tracing::warn!(
            trade_id = %trade.trade_id,
            "Completed trade references an unknown instance; ownership unchanged"
        );
        return Vec::new();
    }

    let mut touched = Vec::new();
    for (instance_id, new_owner) in moves {
        let Some(instance) = instances.get_mut(instance_id.as_str()) else {
            continue;
        };
        if instance.username.as_deref() != Some(new_owner.as_str()) {
            instance.username = Some(new_owner.clone());
            instance.last_update = trade.last_update;
            touched.push(instance_id.clone());
        }
    }
    touched
}
