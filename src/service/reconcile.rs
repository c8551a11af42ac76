//! Reconciliation of a cached instance set with a server snapshot
//!
//! The server wins unless the cached row is locally significant and newer.
//! Significant rows (caught, for trade, wanted) are never dropped; baseline
//! rows collapse to at most one per variant.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use crate::data::{
    InstanceSet, PokemonInstance, descriptor, fusion_id, is_mega_descriptor, species_number,
    strip_instance_suffix,
};

/// Merge `old` (local cache) with `new` (server snapshot) for `username`.
///
/// Rows tagged with another user's name are ignored on both sides. The
/// result does not depend on input iteration order.
pub fn merge_instances(old: &InstanceSet, new: &InstanceSet, username: &str) -> InstanceSet {
    let old = owned_rows(old, username);
    let new = owned_rows(new, username);

    let mut merged = seed_from_cache(&old);
    overlay_snapshot(&mut merged, &new);

    let removed = remove_superseded_placeholders(&mut merged, &new);
    let collapsed = collapse_baselines(merged);

    tracing::debug!(
        username,
        cached = old.len(),
        incoming = new.len(),
        merged = collapsed.len(),
        superseded = removed,
        "Instance sets reconciled"
    );
    collapsed
}

fn owned_rows<'a>(set: &'a InstanceSet, username: &str) -> Vec<&'a PokemonInstance> {
    set.values().filter(|row| row.belongs_to(username)).collect()
}

/// Newest row per variant, plus every other significant cached row.
fn seed_from_cache(old: &[&PokemonInstance]) -> InstanceSet {
    let mut ordered = old.to_vec();
    ordered.sort_by(|a, b| {
        b.last_update
            .cmp(&a.last_update)
            .then_with(|| a.instance_id.cmp(&b.instance_id))
    });

    let mut seen_variants = BTreeSet::new();
    let mut seeded = InstanceSet::new();
    for row in ordered {
        let first_of_variant = seen_variants.insert(strip_instance_suffix(&row.variant_id));
        if first_of_variant || row.is_significant() {
            seeded.insert(row.instance_id.clone(), row.clone());
        }
    }
    seeded
}

fn overlay_snapshot(merged: &mut InstanceSet, new: &[&PokemonInstance]) {
    for incoming in new {
        let keep_cached = merged.get(&incoming.instance_id).is_some_and(|cached| {
            !incoming.is_significant() && cached.last_update > incoming.last_update
        });
        if !keep_cached {
            merged.insert(incoming.instance_id.clone(), (*incoming).clone());
        }
    }
}

/// Drop mega/primal and fusion placeholders once the snapshot shows the
/// real form caught. Returns how many rows went.
fn remove_superseded_placeholders(merged: &mut InstanceSet, new: &[&PokemonInstance]) -> usize {
    let caught: Vec<&PokemonInstance> = new.iter().copied().filter(|row| row.is_caught).collect();
    if caught.is_empty() {
        return 0;
    }

    let superseded: Vec<String> = merged
        .values()
        .filter(|row| row.is_placeholder())
        .filter(|row| {
            caught
                .iter()
                .any(|owned| supersedes_mega(row, owned) || supersedes_fusion(row, owned))
        })
        .map(|row| row.instance_id.clone())
        .collect();

    for id in &superseded {
        merged.remove(id);
    }
    superseded.len()
}

fn same_species(a: &PokemonInstance, b: &PokemonInstance) -> bool {
    match (species_number(&a.variant_id), species_number(&b.variant_id)) {
        (Some(x), Some(y)) => x == y,
        _ => a.pokemon_id != 0 && a.pokemon_id == b.pokemon_id,
    }
}

fn supersedes_mega(placeholder: &PokemonInstance, owned: &PokemonInstance) -> bool {
    let form = descriptor(&placeholder.variant_id).to_ascii_lowercase();
    if !is_mega_descriptor(&form) || !same_species(placeholder, owned) || !owned.mega {
        return false;
    }
    if form.contains("shiny") && !owned.shiny {
        return false;
    }
    match (&placeholder.mega_form, &owned.mega_form) {
        (Some(wanted), Some(have)) => wanted.eq_ignore_ascii_case(have),
        _ => true,
    }
}

fn supersedes_fusion(placeholder: &PokemonInstance, owned: &PokemonInstance) -> bool {
    let form = descriptor(&placeholder.variant_id).to_ascii_lowercase();
    let Some(fusion) = fusion_id(&form) else {
        return false;
    };
    same_species(placeholder, owned)
        && placeholder.shiny == owned.shiny
        && owned.fusion.get(fusion).copied().unwrap_or(false)
}

/// Keep every significant row; for variants without one keep a single
/// baseline (registered first, then newest, then lowest id). Rows group by
/// variant with any per-instance suffix stripped.
fn collapse_baselines(merged: InstanceSet) -> InstanceSet {
    let mut significant_variants = BTreeSet::new();
    let mut baselines: BTreeMap<String, PokemonInstance> = BTreeMap::new();
    let mut result = InstanceSet::new();

    for (id, row) in &merged {
        if row.is_significant() {
            significant_variants.insert(strip_instance_suffix(&row.variant_id).to_string());
            result.insert(id.clone(), row.clone());
        }
    }

    for row in merged.into_values() {
        let variant = strip_instance_suffix(&row.variant_id).to_string();
        if row.is_significant() || significant_variants.contains(&variant) {
            continue;
        }
        let rank = |r: &PokemonInstance| (Reverse(r.registered), Reverse(r.last_update));
        // Rows arrive in id order, so ties keep the lower id
        let better = baselines
            .get(&variant)
            .is_none_or(|best| rank(&row) < rank(best));
        if better {
            baselines.insert(variant, row);
        }
    }

    result.extend(
        baselines
            .into_values()
            .map(|row| (row.instance_id.clone(), row)),
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Timestamp;

    fn row(id: &str, variant_id: &str, ts: i64) -> PokemonInstance {
        PokemonInstance {
            instance_id: id.to_string(),
            variant_id: variant_id.to_string(),
            pokemon_id: species_number(variant_id)
                .and_then(|n| n.parse().ok())
                .unwrap_or(0),
            last_update: Timestamp(ts),
            ..Default::default()
        }
    }

    fn caught(id: &str, variant_id: &str, ts: i64) -> PokemonInstance {
        PokemonInstance {
            is_caught: true,
            registered: true,
            ..row(id, variant_id, ts)
        }
    }

    fn wanted(id: &str, variant_id: &str, ts: i64) -> PokemonInstance {
        PokemonInstance {
            is_wanted: true,
            registered: true,
            ..row(id, variant_id, ts)
        }
    }

    fn set(rows: Vec<PokemonInstance>) -> InstanceSet {
        rows.into_iter()
            .map(|row| (row.instance_id.clone(), row))
            .collect()
    }

    #[test]
    fn test_merge_is_idempotent() {
        let x = set(vec![
            caught("a", "0025-default", 10),
            caught("b", "0025-default", 11),
            wanted("c", "0025-default", 12),
            row("d", "0026-default", 5),
            wanted("e", "0004-shiny", 3),
        ]);

        assert_eq!(merge_instances(&x, &x, "ash"), x);
    }

    #[test]
    fn test_significant_rows_survive() {
        let old = set(vec![caught("a", "0025-default", 20)]);
        let new = set(vec![
            row("a", "0025-default", 10),
            caught("b", "0026-default", 5),
            wanted("c", "0027-default", 5),
        ]);

        let merged = merge_instances(&old, &new, "ash");

        assert!(merged["a"].is_caught);
        assert!(merged["b"].is_caught);
        assert!(merged["c"].is_wanted);
    }

    #[test]
    fn test_significant_server_row_wins_even_if_older() {
        let old = set(vec![caught("a", "0025-default", 50)]);
        let new = set(vec![wanted("a", "0025-default", 10)]);

        let merged = merge_instances(&old, &new, "ash");

        assert!(merged["a"].is_wanted);
        assert!(!merged["a"].is_caught);
    }

    #[test]
    fn test_newer_row_wins_for_baselines() {
        let mut cached = row("a", "0025-default", 5);
        cached.registered = true;
        let old = set(vec![cached]);
        let new = set(vec![row("a", "0025-default", 10)]);

        let merged = merge_instances(&old, &new, "ash");

        assert!(!merged["a"].registered);
        assert_eq!(merged["a"].last_update, Timestamp(10));
    }

    #[test]
    fn test_single_baseline_per_variant() {
        let mut registered = row("b", "0025-default", 1);
        registered.registered = true;
        let old = set(vec![row("a", "0025-default", 9)]);
        let new = set(vec![row("c", "0025-default", 20), registered]);

        let merged = merge_instances(&old, &new, "ash");

        assert_eq!(merged.len(), 1);
        assert!(merged.contains_key("b"));
    }

    #[test]
    fn test_baselines_yield_to_owned_rows() {
        let old = set(vec![row("a", "0025-default", 1)]);
        let new = set(vec![caught("b", "0025-default", 2)]);

        let merged = merge_instances(&old, &new, "ash");

        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn test_baseline_tie_breaks_on_instance_id() {
        let new = set(vec![row("z", "0025-default", 4), row("m", "0025-default", 4)]);

        let merged = merge_instances(&InstanceSet::new(), &new, "ash");

        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["m"]);
    }

    #[test]
    fn test_mega_placeholder_removed_once_caught() {
        let mut placeholder = row("p", "0006-mega_x", 1);
        placeholder.mega_form = Some("X".to_string());
        let mut shiny_placeholder = row("s", "0006-shiny_mega_x", 1);
        shiny_placeholder.shiny = true;
        shiny_placeholder.mega_form = Some("X".to_string());
        let mut wrong_form = row("y", "0006-mega_y", 1);
        wrong_form.mega_form = Some("Y".to_string());

        let mut mega = caught("m", "0006-default", 2);
        mega.mega = true;
        mega.mega_form = Some("X".to_string());

        let old = set(vec![placeholder, shiny_placeholder, wrong_form]);
        let new = set(vec![mega]);

        let merged = merge_instances(&old, &new, "ash");

        assert!(!merged.contains_key("p"));
        assert!(merged.contains_key("s"));
        assert!(merged.contains_key("y"));
        assert!(merged.contains_key("m"));
    }

    #[test]
    fn test_primal_placeholder_removed_once_caught() {
        let old = set(vec![row("p", "0382-primal", 1)]);
        let mut primal = caught("k", "0382-default", 2);
        primal.mega = true;
        let new = set(vec![primal]);

        let merged = merge_instances(&old, &new, "ash");

        assert!(!merged.contains_key("p"));
    }

    #[test]
    fn test_fusion_placeholder_removed_once_caught() {
        let old = set(vec![
            row("f", "0800-fusion_2270", 1),
            row("g", "0800-fusion_2271", 1),
        ]);
        let mut fused = caught("n", "0800-default", 2);
        fused.fusion.insert("2270".to_string(), true);
        fused.fusion.insert("2271".to_string(), false);
        let new = set(vec![fused]);

        let merged = merge_instances(&old, &new, "ash");

        assert!(!merged.contains_key("f"));
        assert!(merged.contains_key("g"));
    }

    #[test]
    fn test_registered_placeholders_are_not_superseded() {
        let mut registered = row("p", "0006-mega_x", 1);
        registered.registered = true;
        let mut mega = caught("m", "0006-default", 2);
        mega.mega = true;

        let merged = merge_instances(&set(vec![registered]), &set(vec![mega]), "ash");

        assert!(merged.contains_key("p"));
    }

    #[test]
    fn test_foreign_rows_are_excluded() {
        let mut foreign = caught("x", "0025-default", 5);
        foreign.username = Some("gary".to_string());
        let mut mine = caught("y", "0026-default", 5);
        mine.username = Some("ash".to_string());

        let merged = merge_instances(&set(vec![foreign]), &set(vec![mine]), "ash");

        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["y"]);
    }

    #[test]
    fn test_iso_and_numeric_timestamps_compare() {
        let old: InstanceSet = serde_json::from_str(
            r#"{"a":{"instance_id":"a","variant_id":"0025-default","registered":true,"last_update":"2024-01-01T00:00:00Z"}}"#,
        )
        .unwrap();
        let new: InstanceSet = serde_json::from_str(
            r#"{"a":{"instance_id":"a","variant_id":"0025-default","registered":false,"last_update":1672531200000}}"#,
        )
        .unwrap();

        let merged = merge_instances(&old, &new, "ash");

        // Cached row (2024) is newer than the server row (2023)
        assert!(merged["a"].registered);
    }

    #[test]
    fn test_cached_duplicate_baselines_are_not_seeded() {
        let old = set(vec![
            row("a", "0025-default", 3),
            row("b", "0025-default", 2),
            caught("c", "0026-default", 1),
            caught("d", "0026-default", 1),
        ]);

        let merged = merge_instances(&old, &InstanceSet::new(), "ash");

        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["a", "c", "d"]);
    }

    #[test]
    fn test_suffixed_rows_group_with_their_variant() {
        let suffixed = |id: &str, uuid: &str| row(id, &format!("0025-default_{uuid}"), 1);
        let new = set(vec![
            PokemonInstance {
                is_caught: true,
                registered: true,
                ..suffixed("c", "5b0e1d3c-8f0a-4a55-9d44-3c2f7c1e9a01")
            },
            suffixed("b1", "a3c5e7f9-1b2d-4e6f-8a0b-c1d2e3f4a5b6"),
            row("b2", "0025-default", 1),
        ]);

        let merged = merge_instances(&InstanceSet::new(), &new, "ash");

        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn test_suffixed_baselines_collapse_to_one() {
        let old = set(vec![
            row("a", "0025-default_5b0e1d3c-8f0a-4a55-9d44-3c2f7c1e9a01", 3),
            row("b", "0025-default", 2),
        ]);
        let new = set(vec![
            row("c", "0025-default_a3c5e7f9-1b2d-4e6f-8a0b-c1d2e3f4a5b6", 1),
        ]);

        let merged = merge_instances(&old, &new, "ash");

        assert_eq!(merged.keys().collect::<Vec<_>>(), vec!["a"]);
    }
}
