//! Registration propagation across shared-form groups
//!
//! Some species present one registered/unregistered state for all of
//! their alternate forms. Within such a group, instances with the same
//! shiny/shadow/costume combination must agree on `registered`.

use std::collections::BTreeSet;

use crate::data::{InstanceSet, PokemonInstance};

/// Built-in shared-form groups (species ids)
pub const DEFAULT_SHARED_FORM_GROUPS: &[&[u32]] = &[
    &[201], // Unown
    &[327], // Spinda
    &[585], // Deerling
    &[586], // Sawsbuck
    &[666], // Vivillon
    &[669], // Flabébé
    &[670], // Floette
    &[671], // Florges
    &[676], // Furfrou
    &[869], // Alcremie
];

/// Predefined shared-form groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationGroups {
    groups: Vec<BTreeSet<u32>>,
}

impl Default for RegistrationGroups {
    fn default() -> Self {
        Self::new(
            DEFAULT_SHARED_FORM_GROUPS
                .iter()
                .map(|group| group.to_vec())
                .collect(),
        )
    }
}

impl RegistrationGroups {
    pub fn new(groups: Vec<Vec<u32>>) -> Self {
        Self {
            groups: groups
                .into_iter()
                .map(|group| group.into_iter().collect::<BTreeSet<_>>())
                .filter(|group| !group.is_empty())
                .collect(),
        }
    }

    /// Group containing this species, if any
    pub fn group_of(&self, pokemon_id: u32) -> Option<&BTreeSet<u32>> {
        self.groups.iter().find(|group| group.contains(&pokemon_id))
    }

    /// Unify `registered` between an instance and its matching siblings.
    ///
    /// Pass one adopts `registered = true` from any matching sibling; pass
    /// two pushes a true flag onto every matching sibling. Groups are flat,
    /// so one pass each reaches the fixpoint.
    ///
    /// # Returns
    /// Ids of rows whose flag changed
    pub fn propagate(&self, instance_id: &str, instances: &mut InstanceSet) -> Vec<String> {
        let Some(current) = instances.get(instance_id) else {
            return Vec::new();
        };
        let Some(group) = self.group_of(current.pokemon_id) else {
            return Vec::new();
        };

        let siblings: Vec<String> = instances
            .values()
            .filter(|other| other.instance_id != instance_id)
            .filter(|other| group.contains(&other.pokemon_id))
            .filter(|other| same_appearance(current, other))
            .map(|other| other.instance_id.clone())
            .collect();

        let mut touched = Vec::new();
        let sibling_registered = siblings
            .iter()
            .any(|id| instances.get(id).is_some_and(|other| other.registered));

        let Some(current) = instances.get_mut(instance_id) else {
            return touched;
        };
        if sibling_registered && !current.registered {
            current.registered = true;
            touched.push(instance_id.to_string());
        }
        if !current.registered {
            return touched;
        }

        for id in siblings {
            if let Some(sibling) = instances.get_mut(&id) {
                if !sibling.registered {
                    sibling.registered = true;
                    touched.push(id);
                }
            }
        }

        if !touched.is_empty() {
            tracing::debug!(
                instance_id,
                touched = touched.len(),
                "Propagated registration across shared-form group"
            );
        }
        touched
    }
}

fn same_appearance(a: &PokemonInstance, b: &PokemonInstance) -> bool {
    a.shiny == b.shiny && a.shadow == b.shadow && a.costume_id == b.costume_id && a.username == b.username
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unown(id: &str, form: &str, registered: bool) -> PokemonInstance {
        PokemonInstance {
            instance_id: id.to_string(),
            variant_id: format!("0201-{form}"),
            pokemon_id: 201,
            registered,
            ..Default::default()
        }
    }

    fn set(rows: Vec<PokemonInstance>) -> InstanceSet {
        rows.into_iter()
            .map(|row| (row.instance_id.clone(), row))
            .collect()
    }

    #[test]
    fn test_adopts_registration_from_sibling() {
        let mut instances = set(vec![unown("a", "a", true), unown("b", "b", false)]);

        let touched = RegistrationGroups::default().propagate("b", &mut instances);

        assert_eq!(touched, vec!["b".to_string()]);
        assert!(instances["b"].registered);
    }

    #[test]
    fn test_pushes_registration_to_siblings() {
        let mut instances = set(vec![
            unown("a", "a", true),
            unown("b", "b", false),
            unown("c", "c", false),
        ]);

        let mut touched = RegistrationGroups::default().propagate("a", &mut instances);
        touched.sort();

        assert_eq!(touched, vec!["b".to_string(), "c".to_string()]);
        assert!(instances.values().all(|row| row.registered));
    }

    #[test]
    fn test_respects_shiny_shadow_costume() {
        let mut shiny = unown("b", "shiny_b", false);
        shiny.shiny = true;
        let mut costumed = unown("c", "c", false);
        costumed.costume_id = Some(3);
        let mut instances = set(vec![unown("a", "a", true), shiny, costumed]);

        let touched = RegistrationGroups::default().propagate("a", &mut instances);

        assert!(touched.is_empty());
        assert!(!instances["b"].registered);
        assert!(!instances["c"].registered);
    }

    #[test]
    fn test_ignores_species_outside_groups() {
        let mut pikachu = unown("p", "default", false);
        pikachu.pokemon_id = 25;
        let mut other = unown("q", "default", true);
        other.pokemon_id = 25;
        let mut instances = set(vec![pikachu, other]);

        assert!(RegistrationGroups::default().propagate("p", &mut instances).is_empty());
        assert!(!instances["p"].registered);
    }

    #[test]
    fn test_custom_groups_span_species() {
        let groups = RegistrationGroups::new(vec![vec![2301, 2302], vec![]]);
        let mut first = unown("a", "default", true);
        first.pokemon_id = 2301;
        let mut second = unown("b", "default", false);
        second.pokemon_id = 2302;
        let mut instances = set(vec![first, second]);

        groups.propagate("a", &mut instances);

        assert!(instances["b"].registered);
        assert!(groups.group_of(201).is_none());
    }
}
