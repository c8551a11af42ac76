//! Variant catalog
//!
//! Read-only reference table of species/form/shiny/shadow/costume
//! combinations, keyed by `variant_id` (e.g. `"0025-shiny_shadow"`).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::models::{PokemonInstance, Timestamp};
use crate::error::AppError;

/// One catalog entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    pub variant_id: String,
    pub pokemon_id: u32,
    #[serde(default)]
    pub name: String,
    /// Rendering descriptor: default, shiny, shadow, shiny_mega, dynamax, ...
    #[serde(default)]
    pub variant_type: String,
    #[serde(default)]
    pub shiny: bool,
    #[serde(default)]
    pub shadow: bool,
    #[serde(default)]
    pub costume_id: Option<u32>,
    #[serde(default)]
    pub mega_form: Option<String>,
}

impl Variant {
    /// Materialise a baseline instance for this variant.
    pub fn new_instance(&self, instance_id: String, now: Timestamp) -> PokemonInstance {
        let descriptor = descriptor(&self.variant_id).to_ascii_lowercase();
        PokemonInstance {
            instance_id,
            variant_id: self.variant_id.clone(),
            pokemon_id: self.pokemon_id,
            shiny: self.shiny,
            shadow: self.shadow,
            costume_id: self.costume_id,
            mega: is_mega_descriptor(&descriptor),
            mega_form: self.mega_form.clone(),
            dynamax: descriptor.contains("dynamax"),
            gigantamax: descriptor.contains("gigantamax"),
            fusion_form: fusion_id(&descriptor).map(str::to_string),
            last_update: now,
            ..PokemonInstance::default()
        }
    }
}

/// Read-only variant lookup table
#[derive(Debug, Clone, Default)]
pub struct VariantCatalog {
    variants: HashMap<String, Variant>,
}

impl VariantCatalog {
    pub fn new(variants: impl IntoIterator<Item = Variant>) -> Self {
        let variants = variants
            .into_iter()
            .map(|variant| (variant.variant_id.clone(), variant))
            .collect();
        Self { variants }
    }

    /// Load the catalog from a JSON array of variants
    ///
    /// # Errors
    /// Returns error if the file cannot be read or parsed
    pub async fn load(path: &Path) -> Result<Self, AppError> {
        let raw = tokio::fs::read(path).await?;
        let variants: Vec<Variant> = serde_json::from_slice(&raw)?;
        let catalog = Self::new(variants);
        tracing::info!(
            path = %path.display(),
            variants = catalog.len(),
            "Variant catalog loaded"
        );
        Ok(catalog)
    }

    /// Look up a variant. Instance-suffixed keys resolve to their base variant.
    pub fn get(&self, variant_id: &str) -> Option<&Variant> {
        self.variants
            .get(variant_id)
            .or_else(|| self.variants.get(strip_instance_suffix(variant_id)))
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }
}

// =============================================================================
// Variant id helpers
// =============================================================================

/// Zero-padded species number at the start of a variant id
pub fn species_number(variant_id: &str) -> Option<&str> {
    let end = variant_id
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(variant_id.len());
    (end > 0).then(|| &variant_id[..end])
}

/// Form/variant descriptor after the species number
pub fn descriptor(variant_id: &str) -> &str {
    variant_id
        .split_once('-')
        .map(|(_, rest)| rest)
        .unwrap_or("")
}

/// Drop an appended `_<uuid>` instance suffix, if any.
pub fn strip_instance_suffix(key: &str) -> &str {
    match key.rsplit_once('_') {
        Some((prefix, tail)) if uuid::Uuid::parse_str(tail).is_ok() => prefix,
        _ => key,
    }
}

/// Mega and primal forms share placeholder handling.
pub fn is_mega_descriptor(descriptor: &str) -> bool {
    let lower = descriptor.to_ascii_lowercase();
    lower.contains("mega") || lower.contains("primal")
}

/// Fusion id in a descriptor such as `shiny_fusion_2270`
pub fn fusion_id(descriptor: &str) -> Option<&str> {
    let start = descriptor.find("fusion_")? + "fusion_".len();
    let digits = &descriptor[start..];
    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    (end > 0).then(|| &digits[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pikachu(variant_id: &str) -> Variant {
        Variant {
            variant_id: variant_id.to_string(),
            pokemon_id: 25,
            name: "Pikachu".to_string(),
            variant_type: descriptor(variant_id).to_string(),
            shiny: variant_id.contains("shiny"),
            shadow: variant_id.contains("shadow"),
            costume_id: None,
            mega_form: None,
        }
    }

    #[test]
    fn test_species_and_descriptor() {
        assert_eq!(species_number("0025-shiny_shadow"), Some("0025"));
        assert_eq!(descriptor("0025-shiny_shadow"), "shiny_shadow");
        assert_eq!(species_number("-default"), None);
        assert_eq!(descriptor("0025"), "");
    }

    #[test]
    fn test_strip_instance_suffix() {
        let id = uuid::Uuid::new_v4();
        let key = format!("0025-default_{id}");
        assert_eq!(strip_instance_suffix(&key), "0025-default");
        assert_eq!(strip_instance_suffix("0025-shiny_shadow"), "0025-shiny_shadow");
    }

    #[test]
    fn test_fusion_id() {
        assert_eq!(fusion_id("shiny_fusion_2270"), Some("2270"));
        assert_eq!(fusion_id("fusion_"), None);
        assert_eq!(fusion_id("default"), None);
    }

    #[test]
    fn test_catalog_resolves_suffixed_keys() {
        let catalog = VariantCatalog::new([pikachu("0025-default")]);
        let key = format!("0025-default_{}", uuid::Uuid::new_v4());
        assert!(catalog.get(&key).is_some());
        assert!(catalog.get("0026-default").is_none());
    }

    #[test]
    fn test_new_instance_derives_form_flags() {
        let instance = pikachu("0025-gigantamax").new_instance("a".to_string(), Timestamp(5));
        assert!(instance.gigantamax);
        assert!(!instance.dynamax);
        assert!(instance.is_baseline());
        assert!(!instance.registered);

        let mega = pikachu("0006-shiny_mega_x").new_instance("b".to_string(), Timestamp(5));
        assert!(mega.mega);
        assert!(mega.shiny);
    }
}
