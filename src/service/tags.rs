//! Tag and view derivation
//!
//! Read-only projections of the instance set, recomputed after every
//! change. Nothing here mutates an instance.

use std::collections::BTreeSet;

use super::status::variant_is_owned;
use crate::data::InstanceSet;

/// Instance ids partitioned by ownership state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagBuckets {
    pub caught: BTreeSet<String>,
    /// Every row listed for trade, caught or not (legacy rows)
    pub trade: BTreeSet<String>,
    pub wanted: BTreeSet<String>,
    /// Baseline rows of variants nobody owns
    pub missing: BTreeSet<String>,
}

impl TagBuckets {
    pub fn from_instances(instances: &InstanceSet) -> Self {
        let mut buckets = Self::default();
        for (id, row) in instances {
            if row.is_caught {
                buckets.caught.insert(id.clone());
            }
            if row.is_for_trade {
                buckets.trade.insert(id.clone());
            }
            if row.is_wanted {
                buckets.wanted.insert(id.clone());
            }
            if row.is_baseline() && !variant_is_owned(instances, &row.variant_id) {
                buckets.missing.insert(id.clone());
            }
        }
        buckets
    }
}

/// Derived views shown alongside the collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedViews {
    pub favorites: BTreeSet<String>,
    pub trade_listed: BTreeSet<String>,
    pub most_wanted: BTreeSet<String>,
}

impl DerivedViews {
    pub fn is_empty(&self) -> bool {
        self.favorites.is_empty() && self.trade_listed.is_empty() && self.most_wanted.is_empty()
    }
}

/// Compute favorites, trade-listed and most-wanted ids.
pub fn derive_views(instances: &InstanceSet) -> DerivedViews {
    let buckets = TagBuckets::from_instances(instances);
    let lookup = |id: &String| instances.get(id);

    let favorites = buckets
        .caught
        .iter()
        .filter(|&id| lookup(id).is_some_and(|row| row.favorite))
        .cloned()
        .collect();

    let mut trade_listed: BTreeSet<String> = buckets
        .caught
        .iter()
        .filter(|&id| lookup(id).is_some_and(|row| row.is_for_trade))
        .cloned()
        .collect();
    trade_listed.extend(buckets.trade.iter().cloned());

    let most_wanted = buckets
        .wanted
        .iter()
        .filter(|&id| lookup(id).is_some_and(|row| row.most_wanted))
        .cloned()
        .collect();

    DerivedViews {
        favorites,
        trade_listed,
        most_wanted,
    }
}
