//! Instance status engine
//!
//! Applies Caught / Trade / Wanted / Missing transitions to a user's
//! instance set. Rows are created on demand (first status change for a
//! variant, or a wanted clone of a caught instance) and `registered` is
//! kept consistent across shared-form groups afterwards.

use std::collections::BTreeSet;
use std::fmt;

use super::registration::RegistrationGroups;
use crate::data::{
    InstanceRef, InstanceSet, InstanceStatus, PokemonInstance, Timestamp, VariantCatalog,
    descriptor, strip_instance_suffix,
};
use crate::error::AppError;

/// Fusion-only species that can be neither listed for trade nor wanted
pub const TRADE_BLOCKED_SPECIES: [u32; 2] = [2270, 2271];

/// Shadow-lineage species whose `default` rendering is the purified form
pub const PURIFIABLE_SPECIES: [u32; 2] = [2301, 2302];

/// Fresh instance identifier
pub(crate) fn new_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Whether any row of this variant is caught or listed for trade
pub fn variant_is_owned(instances: &InstanceSet, variant_id: &str) -> bool {
    let base = strip_instance_suffix(variant_id);
    instances
        .values()
        .any(|row| strip_instance_suffix(&row.variant_id) == base && row.is_owned())
}

// =============================================================================
// Outcomes
// =============================================================================

/// Attribute that forbids a Trade/Wanted transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Lucky,
    Shadow,
    Mega,
    FusionSpecies,
}

impl BlockReason {
    /// First blocking attribute of an instance, if any
    pub fn of(instance: &PokemonInstance) -> Option<Self> {
        if instance.lucky {
            Some(Self::Lucky)
        } else if instance.shadow {
            Some(Self::Shadow)
        } else if instance.mega || instance.is_mega {
            Some(Self::Mega)
        } else if TRADE_BLOCKED_SPECIES.contains(&instance.pokemon_id) {
            Some(Self::FusionSpecies)
        } else {
            None
        }
    }

    pub fn attribute(&self) -> &'static str {
        match self {
            Self::Lucky => "lucky",
            Self::Shadow => "shadow",
            Self::Mega => "mega",
            Self::FusionSpecies => "a fusion-only form",
        }
    }
}

/// A refused transition; nothing was mutated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedTransition {
    pub target: InstanceRef,
    pub status: InstanceStatus,
    pub reason: BlockReason,
}

impl fmt::Display for BlockedTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cannot move {} to {} as it is {}.",
            self.target,
            self.status,
            self.reason.attribute()
        )
    }
}

/// Result of one status request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    /// `instance_id` carries the new status; `created` when the row is new
    Applied { instance_id: String, created: bool },
    Blocked(BlockedTransition),
}

impl StatusOutcome {
    pub fn instance_id(&self) -> Option<&str> {
        match self {
            Self::Applied { instance_id, .. } => Some(instance_id),
            Self::Blocked(_) => None,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

/// Outcome plus every row the engine wrote
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub outcome: StatusOutcome,
    pub touched: BTreeSet<String>,
}

/// Outcome of a batched status request
#[derive(Debug, Default)]
pub struct BatchStatusChange {
    pub outcomes: Vec<StatusOutcome>,
    /// Targets that could not be resolved; the rest of the batch still applies
    pub failures: Vec<(InstanceRef, AppError)>,
    /// Rows still present that must be written
    pub touched: BTreeSet<String>,
    /// Redundant placeholders removed from the set, reset for the store
    pub pruned: Vec<PokemonInstance>,
}

// =============================================================================
// Engine
// =============================================================================

/// Status transitions over an instance set
pub struct StatusEngine<'a> {
    catalog: &'a VariantCatalog,
    groups: &'a RegistrationGroups,
}

impl<'a> StatusEngine<'a> {
    pub fn new(catalog: &'a VariantCatalog, groups: &'a RegistrationGroups) -> Self {
        Self { catalog, groups }
    }

    /// Move one instance (or a variant's baseline row) to `status`
    ///
    /// # Returns
    /// `Applied` with the id carrying the new status (a new id for a
    /// wanted clone), or `Blocked` when the instance is lucky, shadow,
    /// mega or a fusion-only species and the target is Trade/Wanted.
    ///
    /// # Errors
    /// - `InstanceNotFound` if an instance id is not in the set
    /// - `VariantNotFound` if the catalog has no entry for the variant
    pub fn set_status(
        &self,
        instances: &mut InstanceSet,
        target: &InstanceRef,
        status: InstanceStatus,
        now: Timestamp,
    ) -> Result<StatusChange, AppError> {
        let (existing, variant_key) = match target {
            InstanceRef::Instance(id) => {
                let row = instances
                    .get(id)
                    .ok_or_else(|| AppError::InstanceNotFound(id.clone()))?;
                (Some(row), strip_instance_suffix(&row.variant_id).to_string())
            }
            InstanceRef::Variant(variant_id) => {
                let key = strip_instance_suffix(variant_id).to_string();
                (baseline_for(instances, &key), key)
            }
        };

        let variant = self
            .catalog
            .get(&variant_key)
            .ok_or_else(|| AppError::VariantNotFound(variant_key.clone()))?;

        let mut row = match existing {
            Some(row) => row.clone(),
            None => variant.new_instance(new_instance_id(), now),
        };

        if matches!(status, InstanceStatus::Trade | InstanceStatus::Wanted) {
            if let Some(reason) = BlockReason::of(&row) {
                let blocked = BlockedTransition {
                    target: target.clone(),
                    status,
                    reason,
                };
                tracing::info!(reference = %target, %status, reason = reason.attribute(), "Status transition blocked");
                return Ok(StatusChange {
                    outcome: StatusOutcome::Blocked(blocked),
                    touched: BTreeSet::new(),
                });
            }
        }

        derive_form_flags(&mut row, &variant_key);

        let mut carrier = match status {
            InstanceStatus::Caught => {
                row.is_caught = true;
                row.is_for_trade = false;
                row.is_wanted = false;
                row
            }
            InstanceStatus::Trade => {
                row.is_caught = true;
                row.is_for_trade = true;
                row.is_wanted = false;
                row
            }
            InstanceStatus::Wanted if row.is_caught => {
                let clone = row.wanted_clone(new_instance_id(), now);
                tracing::debug!(
                    source = %row.instance_id,
                    clone = %clone.instance_id,
                    "Caught instance marked wanted; created wanted clone"
                );
                clone
            }
            InstanceStatus::Wanted => {
                row.is_wanted = true;
                row
            }
            InstanceStatus::Missing => {
                row.reset_ownership();
                row
            }
        };
        carrier.registered |= carrier.is_significant();
        carrier.last_update = now;

        let instance_id = carrier.instance_id.clone();
        let created = !instances.contains_key(&instance_id);
        instances.insert(instance_id.clone(), carrier);

        let mut touched = BTreeSet::from([instance_id.clone()]);
        for id in self.groups.propagate(&instance_id, instances) {
            if let Some(sibling) = instances.get_mut(&id) {
                sibling.last_update = now;
            }
            touched.insert(id);
        }

        tracing::debug!(reference = %target, %status, instance_id, created, touched = touched.len(), "Status applied");
        Ok(StatusChange {
            outcome: StatusOutcome::Applied {
                instance_id,
                created,
            },
            touched,
        })
    }

    /// Apply one status to many targets, then prune redundant placeholders
    /// of the affected variants.
    ///
    /// A failing target is recorded and skipped; it never aborts the batch.
    pub fn set_status_many(
        &self,
        instances: &mut InstanceSet,
        targets: &[InstanceRef],
        status: InstanceStatus,
        now: Timestamp,
    ) -> BatchStatusChange {
        let mut batch = BatchStatusChange::default();

        for target in targets {
            match self.set_status(instances, target, status, now) {
                Ok(change) => {
                    batch.touched.extend(change.touched);
                    batch.outcomes.push(change.outcome);
                }
                Err(error) => batch.failures.push((target.clone(), error)),
            }
        }

        let variants: BTreeSet<String> = batch
            .touched
            .iter()
            .filter_map(|id| instances.get(id))
            .map(|row| strip_instance_suffix(&row.variant_id).to_string())
            .collect();
        batch.pruned = prune_placeholders(instances, &variants, now);
        for row in &batch.pruned {
            batch.touched.remove(&row.instance_id);
        }

        batch
    }
}

/// Baseline row for a variant: an unregistered placeholder first, then
/// any registered baseline
fn baseline_for<'s>(instances: &'s InstanceSet, variant_key: &str) -> Option<&'s PokemonInstance> {
    let mut baselines = instances
        .values()
        .filter(|row| strip_instance_suffix(&row.variant_id) == variant_key)
        .filter(|row| row.is_baseline());
    let first = baselines.next()?;
    if first.is_placeholder() {
        return Some(first);
    }
    Some(baselines.find(|row| row.is_placeholder()).unwrap_or(first))
}

fn derive_form_flags(row: &mut PokemonInstance, variant_key: &str) {
    let descriptor = descriptor(variant_key).to_ascii_lowercase();
    if PURIFIABLE_SPECIES.contains(&row.pokemon_id) {
        row.purified = descriptor.contains("default");
        if row.purified {
            row.shadow = false;
            row.lucky = false;
        }
    }
    row.dynamax = descriptor.contains("dynamax");
    row.gigantamax = descriptor.contains("gigantamax");
}

/// Remove placeholders that another row of the same variant makes redundant.
///
/// `variant_ids` are suffix-free; rows carrying a per-instance suffix count
/// toward their variant. With a non-placeholder sibling every placeholder
/// goes; otherwise the first placeholder (by id) stays. Removed rows come back reset and
/// stamped with `now`.
pub fn prune_placeholders(
    instances: &mut InstanceSet,
    variant_ids: &BTreeSet<String>,
    now: Timestamp,
) -> Vec<PokemonInstance> {
    let mut doomed = Vec::new();
    for variant_id in variant_ids {
        let rows: Vec<&PokemonInstance> = instances
            .values()
            .filter(|row| strip_instance_suffix(&row.variant_id) == variant_id)
            .collect();
        let anchored = rows.iter().any(|row| !row.is_placeholder());
        let placeholders = rows
            .iter()
            .filter(|row| row.is_placeholder())
            .skip(usize::from(!anchored));
        doomed.extend(placeholders.map(|row| row.instance_id.clone()));
    }

    let pruned: Vec<PokemonInstance> = doomed
        .iter()
        .filter_map(|id| instances.remove(id))
        .map(|mut row| {
            row.reset_ownership();
            row.last_update = now;
            row
        })
        .collect();

    if !pruned.is_empty() {
        tracing::debug!(pruned = pruned.len(), "Pruned redundant placeholder rows");
    }
    pruned
}
