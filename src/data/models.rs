//! Data models
//!
//! Rust structs representing collection rows and trade records.
//! Instance ids are UUID v4 strings; timestamps on the wire are epoch
//! milliseconds but older rows may carry ISO-8601 strings.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user's instances keyed by `instance_id`
pub type InstanceSet = BTreeMap<String, PokemonInstance>;

/// Trades keyed by `trade_id`
pub type TradeBook = BTreeMap<String, TradeRow>;

// =============================================================================
// Timestamps
// =============================================================================

/// Write timestamp in epoch milliseconds
///
/// Deserializes from a number, a numeric string, or an RFC 3339 string.
/// Anything unparseable (or null) reads as the epoch so it loses every
/// recency comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Fractional(f64),
    Text(String),
}

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.timestamp_millis())
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Option::<RawTimestamp>::deserialize(deserializer)?;
        Ok(match raw {
            None => Self(0),
            Some(RawTimestamp::Millis(ms)) => Self(ms),
            Some(RawTimestamp::Fractional(ms)) => Self(ms as i64),
            Some(RawTimestamp::Text(text)) => parse_timestamp_text(&text),
        })
    }
}

fn parse_timestamp_text(text: &str) -> Timestamp {
    let trimmed = text.trim();
    if let Ok(ms) = trimmed.parse::<i64>() {
        return Timestamp(ms);
    }
    match DateTime::parse_from_rfc3339(trimmed) {
        Ok(at) => Timestamp(at.timestamp_millis()),
        Err(_) => {
            tracing::debug!(value = %trimmed, "Unparseable last_update; treating as epoch");
            Timestamp(0)
        }
    }
}

// =============================================================================
// Statuses
// =============================================================================

/// Target ownership status for an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    #[serde(alias = "Owned")]
    Caught,
    Trade,
    Wanted,
    #[serde(alias = "Unowned")]
    Missing,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Caught => "Caught",
            Self::Trade => "Trade",
            Self::Wanted => "Wanted",
            Self::Missing => "Missing",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trade lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    #[default]
    Proposed,
    Pending,
    Completed,
    Cancelled,
    Denied,
    Deleted,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Denied => "denied",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Instance reference
// =============================================================================

/// Target of a status change
///
/// Either a concrete instance, or a variant meaning "the baseline row
/// for this variant, created on demand".
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstanceRef {
    Instance(String),
    Variant(String),
}

impl InstanceRef {
    /// Classify a raw key: UUIDs are instance ids, anything else a variant id.
    pub fn parse(raw: &str) -> Self {
        if uuid::Uuid::parse_str(raw).is_ok() {
            Self::Instance(raw.to_string())
        } else {
            Self::Variant(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Instance(id) | Self::Variant(id) => id,
        }
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Pokemon instance
// =============================================================================

/// One concrete, individually tracked Pokémon belonging to a user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PokemonInstance {
    pub instance_id: String,
    pub variant_id: String,
    pub pokemon_id: u32,
    /// Present only for foreign/shared rows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub nickname: Option<String>,

    // Stats
    pub cp: Option<u32>,
    pub level: Option<f64>,
    pub attack_iv: Option<u8>,
    pub defense_iv: Option<u8>,
    pub stamina_iv: Option<u8>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub gender: Option<String>,

    // Moves
    pub fast_move_id: Option<u32>,
    pub charged_move1_id: Option<u32>,
    pub charged_move2_id: Option<u32>,

    // Appearance and special states
    pub shiny: bool,
    pub costume_id: Option<u32>,
    pub lucky: bool,
    pub shadow: bool,
    pub purified: bool,
    pub mega: bool,
    pub is_mega: bool,
    pub mega_form: Option<String>,
    pub dynamax: bool,
    pub gigantamax: bool,
    pub is_fused: bool,
    /// Fusion id -> fused flag
    pub fusion: BTreeMap<String, bool>,
    pub fusion_form: Option<String>,
    pub fused_with: Option<String>,

    // Ownership
    pub is_caught: bool,
    pub is_for_trade: bool,
    pub is_wanted: bool,
    pub most_wanted: bool,
    pub registered: bool,
    pub favorite: bool,

    // Tags and per-partner exclusions
    pub caught_tags: Vec<String>,
    pub trade_tags: Vec<String>,
    pub wanted_tags: Vec<String>,
    pub not_trade_list: BTreeMap<String, bool>,
    pub not_wanted_list: BTreeMap<String, bool>,

    // Provenance
    pub location_caught: Option<String>,
    pub date_caught: Option<DateTime<Utc>>,
    pub is_traded: bool,
    pub traded_date: Option<DateTime<Utc>>,
    pub original_trainer_name: Option<String>,

    pub last_update: Timestamp,
}

impl PokemonInstance {
    /// Caught, for trade, or wanted
    pub fn is_significant(&self) -> bool {
        self.is_caught || self.is_for_trade || self.is_wanted
    }

    /// Caught or listed for trade
    pub fn is_owned(&self) -> bool {
        self.is_caught || self.is_for_trade
    }

    /// No ownership flag set
    pub fn is_baseline(&self) -> bool {
        !self.is_significant()
    }

    /// Baseline row that is not registered either
    pub fn is_placeholder(&self) -> bool {
        self.is_baseline() && !self.registered
    }

    /// Rows without a username belong to whoever holds the set.
    pub fn belongs_to(&self, username: &str) -> bool {
        self.username.as_deref().is_none_or(|owner| owner == username)
    }

    /// Return to baseline.
    pub fn reset_ownership(&mut self) {
        self.is_caught = false;
        self.is_for_trade = false;
        self.is_wanted = false;
        self.most_wanted = false;
        self.registered = false;
    }

    /// Build a wanted row sharing this instance's appearance.
    ///
    /// Per-instance data (stats, moves, tags, provenance) is not carried
    /// over; the clone only describes which variant is wanted.
    pub fn wanted_clone(&self, instance_id: String, now: Timestamp) -> Self {
        Self {
            instance_id,
            variant_id: self.variant_id.clone(),
            pokemon_id: self.pokemon_id,
            username: self.username.clone(),
            gender: self.gender.clone(),
            shiny: self.shiny,
            costume_id: self.costume_id,
            shadow: self.shadow,
            purified: self.purified,
            mega: self.mega,
            is_mega: self.is_mega,
            mega_form: self.mega_form.clone(),
            dynamax: self.dynamax,
            gigantamax: self.gigantamax,
            fusion_form: self.fusion_form.clone(),
            is_wanted: true,
            registered: true,
            last_update: now,
            ..Self::default()
        }
    }

    /// Apply a detail patch. Returns whether anything changed.
    ///
    /// Special states stay mutually exclusive: turning shadow on clears
    /// lucky and purified, turning purified on clears lucky and shadow,
    /// and lucky never survives alongside shadow or purified.
    pub fn apply_patch(&mut self, patch: &InstancePatch) -> bool {
        let before = self.clone();

        macro_rules! set {
            ($target:ident, $source:ident; $($field:ident),* $(,)?) => {
                $(if let Some(value) = &$source.$field {
                    $target.$field = value.clone();
                })*
            };
        }

        let target = &mut *self;
        set!(
            target,
            patch;
            nickname,
            cp,
            level,
            attack_iv,
            defense_iv,
            stamina_iv,
            weight,
            height,
            gender,
            fast_move_id,
            charged_move1_id,
            charged_move2_id,
            favorite,
            most_wanted,
            lucky,
            caught_tags,
            trade_tags,
            wanted_tags,
            not_trade_list,
            not_wanted_list,
            location_caught,
            date_caught,
        );

        if let Some(shadow) = patch.shadow {
            self.shadow = shadow;
            if shadow {
                self.lucky = false;
                self.purified = false;
            }
        }
        if let Some(purified) = patch.purified {
            self.purified = purified;
            if purified {
                self.lucky = false;
                self.shadow = false;
            }
        }
        if self.lucky && (self.shadow || self.purified) {
            self.lucky = false;
        }

        *self != before
    }
}

/// Partial edit of an instance's details
///
/// `None` leaves a field untouched. Nullable fields use a nested option
/// so a patch can clear them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstancePatch {
    pub nickname: Option<Option<String>>,
    pub cp: Option<Option<u32>>,
    pub level: Option<Option<f64>>,
    pub attack_iv: Option<Option<u8>>,
    pub defense_iv: Option<Option<u8>>,
    pub stamina_iv: Option<Option<u8>>,
    pub weight: Option<Option<f64>>,
    pub height: Option<Option<f64>>,
    pub gender: Option<Option<String>>,
    pub fast_move_id: Option<Option<u32>>,
    pub charged_move1_id: Option<Option<u32>>,
    pub charged_move2_id: Option<Option<u32>>,
    pub favorite: Option<bool>,
    pub most_wanted: Option<bool>,
    pub lucky: Option<bool>,
    pub shadow: Option<bool>,
    pub purified: Option<bool>,
    pub caught_tags: Option<Vec<String>>,
    pub trade_tags: Option<Vec<String>>,
    pub wanted_tags: Option<Vec<String>>,
    pub not_trade_list: Option<BTreeMap<String, bool>>,
    pub not_wanted_list: Option<BTreeMap<String, bool>>,
    pub location_caught: Option<Option<String>>,
    pub date_caught: Option<Option<DateTime<Utc>>>,
}

impl InstancePatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// =============================================================================
// Trade
// =============================================================================

/// Side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Proposer,
    Accepter,
}

/// A proposed or executing exchange between two users' instances
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TradeRow {
    pub trade_id: String,
    pub username_proposed: String,
    pub username_accepting: String,
    pub pokemon_instance_id_user_proposed: String,
    pub pokemon_instance_id_user_accepting: String,
    pub trade_status: TradeStatus,

    pub user_proposed_completion_confirmed: bool,
    pub user_accepting_completion_confirmed: bool,
    /// Proposer's satisfaction
    pub user_1_trade_satisfaction: Option<bool>,
    /// Accepter's satisfaction
    pub user_2_trade_satisfaction: Option<bool>,

    pub trade_proposal_date: Option<DateTime<Utc>>,
    #[serde(alias = "trade_acceptance_date")]
    pub trade_accepted_date: Option<DateTime<Utc>>,
    pub trade_completed_date: Option<DateTime<Utc>>,
    pub trade_cancelled_date: Option<DateTime<Utc>>,
    pub trade_deleted_date: Option<DateTime<Utc>>,
    pub trade_cancelled_by: Option<String>,

    pub is_special_trade: bool,
    pub is_registered_trade: bool,
    pub is_lucky_trade: bool,
    pub trade_dust_cost: Option<u32>,
    pub trade_friendship_level: Option<u8>,

    pub last_update: Timestamp,
}

impl TradeRow {
    /// Which side `actor` is on, if any
    pub fn party_of(&self, actor: &str) -> Option<Party> {
        if actor == self.username_proposed {
            Some(Party::Proposer)
        } else if actor == self.username_accepting {
            Some(Party::Accepter)
        } else {
            None
        }
    }

    /// Both offered instance ids (proposer's first)
    pub fn instance_ids(&self) -> [&str; 2] {
        [
            &self.pokemon_instance_id_user_proposed,
            &self.pokemon_instance_id_user_accepting,
        ]
    }

    /// Whether this trade offers any instance offered by `other`
    pub fn shares_instance_with(&self, other: &TradeRow) -> bool {
        let theirs = other.instance_ids();
        self.instance_ids()
            .iter()
            .any(|id| !id.is_empty() && theirs.contains(id))
    }

    pub fn both_confirmed(&self) -> bool {
        self.user_proposed_completion_confirmed && self.user_accepting_completion_confirmed
    }
}
