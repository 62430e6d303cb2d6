use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Constants ──────────────────────────────────────────────────────────

pub const DEFAULT_RANKING_SIZE: usize = 10;
pub const DEFAULT_BRACKET_SIZE: usize = 8;
pub const MAX_RANKING_SIZE: usize = 1000;
pub const SNAPSHOT_VERSION: u32 = 1;

// ── Items ──────────────────────────────────────────────────────────────

/// Canonical item shape used by every representation downstream of the
/// normalizer. Only `id` is required to be stable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferableItem {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl TransferableItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        TransferableItem {
            id: id.into(),
            title: title.into(),
            description: None,
            image_url: None,
            tags: None,
            category: None,
            subcategory: None,
            metadata: None,
        }
    }
}

// ── Modes ──────────────────────────────────────────────────────────────

/// Which interaction mode produced a slot's occupant, and which mode is active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    #[default]
    Direct,
    Bracket,
    Tierlist,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectViewMode {
    #[default]
    Grid,
    List,
    Podium,
}

// ── Ranking ────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedSlot {
    pub id: String,
    pub position: usize,
    pub item_id: Option<String>,
    pub item: Option<TransferableItem>,
    pub source_mode: SourceMode,
    pub assigned_at: Option<DateTime<Utc>>,
}

impl RankedSlot {
    pub fn empty(position: usize) -> Self {
        RankedSlot {
            id: format!("slot-{position}"),
            position,
            item_id: None,
            item: None,
            source_mode: SourceMode::Direct,
            assigned_at: None,
        }
    }

    pub fn occupied(position: usize, item: TransferableItem, mode: SourceMode, at: DateTime<Utc>) -> Self {
        RankedSlot {
            id: format!("slot-{position}"),
            position,
            item_id: Some(item.id.clone()),
            item: Some(item),
            source_mode: mode,
            assigned_at: Some(at),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.item_id.is_none()
    }

    /// Re-home this slot at `position`, keeping its occupant.
    pub(crate) fn relocated(mut self, position: usize) -> Self {
        self.set_position(position);
        self
    }

    pub(crate) fn set_position(&mut self, position: usize) {
        self.id = format!("slot-{position}");
        self.position = position;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingStats {
    pub filled_count: usize,
    pub total_slots: usize,
    pub completion_percentage: f64,
    pub is_complete: bool,
}

impl RankingStats {
    pub fn from_slots(slots: &[RankedSlot]) -> Self {
        let total_slots = slots.len();
        let filled_count = slots.iter().filter(|slot| !slot.is_empty()).count();
        let completion_percentage = if total_slots == 0 {
            0.0
        } else {
            (filled_count as f64 / total_slots as f64) * 100.0
        };
        RankingStats {
            filled_count,
            total_slots,
            completion_percentage,
            is_complete: total_slots > 0 && filled_count == total_slots,
        }
    }
}

// ── Tiers ──────────────────────────────────────────────────────────────

fn default_weight() -> f64 {
    1.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierDefinition {
    pub id: String,
    pub label: String,
    pub order: u32,
    pub style: String,
    /// Share of the ranking this tier claims during derivation.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl TierDefinition {
    pub fn new(id: impl Into<String>, label: impl Into<String>, order: u32) -> Self {
        let id = id.into();
        TierDefinition {
            style: format!("tier-{}", id.to_ascii_lowercase()),
            id,
            label: label.into(),
            order,
            weight: default_weight(),
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierWithItems {
    #[serde(flatten)]
    pub definition: TierDefinition,
    pub item_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierConfig {
    pub tiers: Vec<TierDefinition>,
}

impl Default for TierConfig {
    fn default() -> Self {
        TierConfig {
            tiers: ["S", "A", "B", "C", "D"]
                .iter()
                .enumerate()
                .map(|(order, label)| TierDefinition::new(*label, *label, order as u32))
                .collect(),
        }
    }
}

impl TierConfig {
    /// Tier definitions sorted by `order`.
    pub fn ordered(&self) -> Vec<TierDefinition> {
        let mut tiers = self.tiers.clone();
        tiers.sort_by_key(|tier| tier.order);
        tiers
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierState {
    pub tiers: Vec<TierWithItems>,
    pub unranked_item_ids: Vec<String>,
    pub is_dirty: bool,
    pub last_synced_from_ranking: Option<Vec<String>>,
}
