//! Service layer
//!
//! Pure engines (status, reconciliation, trades, registration, tags)
//! and the stateful `CollectionService` that drives them for a session.

mod collection;
mod reconcile;
mod registration;
mod status;
mod sync;
mod tags;
mod trade;

pub use collection::{CollectionService, SessionContext, SnapshotOutcome};
pub use reconcile::merge_instances;
pub use registration::{DEFAULT_SHARED_FORM_GROUPS, RegistrationGroups};
pub use status::{
    BatchStatusChange, BlockReason, BlockedTransition, PURIFIABLE_SPECIES, StatusChange,
    StatusEngine, StatusOutcome, TRADE_BLOCKED_SPECIES, prune_placeholders, variant_is_owned,
};
pub use sync::{
    FileSnapshotSource, RefreshGate, RefreshOutcome, RefreshTicket, Snapshot, SnapshotRefresher,
    SnapshotSource,
};
pub use tags::{DerivedViews, TagBuckets, derive_views};
pub use trade::{TradeIngest, TradeLedger, swap_ownership};
