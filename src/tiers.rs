use std::collections::HashSet;
use std::ops::Range;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::TierError;
use crate::types::{RankedSlot, SourceMode, TierConfig, TierState, TierWithItems, TransferableItem};

const UNRANKED: &str = "unranked";

/// Fresh tier board with every configured tier empty, in tier order.
pub fn empty_tier_state(config: &TierConfig) -> TierState {
    TierState {
        tiers: config
            .ordered()
            .into_iter()
            .map(|definition| TierWithItems { definition, item_ids: Vec::new() })
            .collect(),
        unranked_item_ids: Vec::new(),
        is_dirty: false,
        last_synced_from_ranking: None,
    }
}

/// Split `[0, n)` into one contiguous range per tier, in tier order,
/// proportional to each tier's weight. The ranges cover the domain exactly.
pub fn tier_boundaries(n: usize, config: &TierConfig) -> Vec<Range<usize>> {
    let tiers = config.ordered();
    if tiers.is_empty() {
        return Vec::new();
    }
    let weights: Vec<f64> = tiers
        .iter()
        .map(|tier| if tier.weight.is_finite() && tier.weight > 0.0 { tier.weight } else { 0.0 })
        .collect();
    let total: f64 = weights.iter().sum();
    let weights = if total > 0.0 { weights } else { vec![1.0; tiers.len()] };
    let total: f64 = weights.iter().sum();

    // floor of each share, then the rounding remainder goes to the earliest
    // tiers so the best-ranked items always land at the top
    let mut counts: Vec<usize> = weights
        .iter()
        .map(|weight| ((n as f64) * weight / total).floor() as usize)
        .collect();
    let mut assigned: usize = counts.iter().sum();
    let mut idx = counts.len();
    while assigned > n {
        idx = if idx == 0 { counts.len() - 1 } else { idx - 1 };
        if counts[idx] > 0 {
            counts[idx] -= 1;
            assigned -= 1;
        }
    }
    let mut idx = 0;
    while assigned < n {
        if weights[idx] > 0.0 {
            counts[idx] += 1;
            assigned += 1;
        }
        idx = (idx + 1) % counts.len();
    }

    let mut ranges = Vec::with_capacity(tiers.len());
    let mut start = 0usize;
    for (idx, count) in counts.iter().enumerate() {
        let end = if idx + 1 == counts.len() { n } else { (start + count).min(n) };
        ranges.push(start..end);
        start = end;
    }
    ranges
}

/// Build tier-board state from the ranking.
///
/// The partition domain is the filled count (or the raw length when nothing
/// is filled). A filled slot lands in the tier whose range contains its rank
/// among the filled slots, so gaps in the ranking do not push items past the
/// last boundary.
pub fn derive_tiers_from_ranking(ranking: &[RankedSlot], config: &TierConfig) -> TierState {
    let mut state = empty_tier_state(config);
    let filled: Vec<&str> = ranking.iter().filter_map(|slot| slot.item_id.as_deref()).collect();
    let n = if filled.is_empty() { ranking.len() } else { filled.len() };
    let bounds = tier_boundaries(n, config);

    let mut seen = HashSet::new();
    for (rank, item_id) in filled.iter().enumerate() {
        if !seen.insert(*item_id) {
            continue;
        }
        match bounds.iter().position(|range| range.contains(&rank)) {
            Some(idx) => state.tiers[idx].item_ids.push(item_id.to_string()),
            None => state.unranked_item_ids.push(item_id.to_string()),
        }
    }
    state.last_synced_from_ranking = Some(filled.iter().map(|id| id.to_string()).collect());
    info!("derived {} tiers from {} ranked items", state.tiers.len(), filled.len());
    state
}

/// Flatten tiers (tier order, then intra-tier order) into ranking slots of
/// length `max_size`. Ids the lookup cannot resolve are skipped.
pub fn sync_ranking_from_tiers<F>(state: &mut TierState, lookup: F, max_size: usize) -> Vec<RankedSlot>
where
    F: Fn(&str) -> Option<TransferableItem>,
{
    let now = Utc::now();
    let mut slots = Vec::with_capacity(max_size);
    let mut produced = Vec::new();
    for item_id in state.flattened() {
        if slots.len() >= max_size {
            break;
        }
        let Some(item) = lookup(&item_id) else {
            warn!("tier item {item_id} could not be resolved; skipped during sync");
            continue;
        };
        produced.push(item.id.clone());
        slots.push(RankedSlot::occupied(slots.len(), item, SourceMode::Tierlist, now));
    }
    while slots.len() < max_size {
        slots.push(RankedSlot::empty(slots.len()));
    }
    info!("synced {} tier items into a ranking of {max_size}", produced.len());
    state.is_dirty = false;
    state.last_synced_from_ranking = Some(produced);
    slots
}

impl TierState {
    pub fn tier(&self, tier_id: &str) -> Option<&TierWithItems> {
        self.tiers.iter().find(|tier| tier.definition.id == tier_id)
    }

    fn tier_index(&self, tier_id: &str) -> Result<usize, TierError> {
        self.tiers
            .iter()
            .position(|tier| tier.definition.id == tier_id)
            .ok_or_else(|| TierError::UnknownTier(tier_id.to_string()))
    }

    /// Tier currently holding `item_id`, if any.
    pub fn tier_of(&self, item_id: &str) -> Option<&str> {
        self.tiers
            .iter()
            .find(|tier| tier.item_ids.iter().any(|id| id == item_id))
            .map(|tier| tier.definition.id.as_str())
    }

    pub fn is_unranked(&self, item_id: &str) -> bool {
        self.unranked_item_ids.iter().any(|id| id == item_id)
    }

    /// Whether the item sits in any container (a tier or the unranked pool).
    pub fn contains(&self, item_id: &str) -> bool {
        self.tier_of(item_id).is_some() || self.is_unranked(item_id)
    }

    pub fn tiered_count(&self) -> usize {
        self.tiers.iter().map(|tier| tier.item_ids.len()).sum()
    }

    /// Every tiered id, tier order first, then intra-tier order.
    pub fn flattened(&self) -> Vec<String> {
        self.tiers.iter().flat_map(|tier| tier.item_ids.iter().cloned()).collect()
    }

    /// Pull `item_id` out of every container.
    fn detach(&mut self, item_id: &str) {
        for tier in &mut self.tiers {
            tier.item_ids.retain(|id| id != item_id);
        }
        self.unranked_item_ids.retain(|id| id != item_id);
    }

    fn len_without(ids: &[String], item_id: &str) -> usize {
        ids.iter().filter(|id| *id != item_id).count()
    }

    fn check_insert_index(index: Option<usize>, len: usize, container: &str) -> Result<(), TierError> {
        match index {
            Some(index) if index > len => Err(TierError::IndexOutOfBounds {
                index,
                len,
                container: container.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Place `item_id` into `tier_id` at `index` (append when `None`).
    pub fn assign_to_tier(&mut self, item_id: &str, tier_id: &str, index: Option<usize>) -> Result<(), TierError> {
        let target = self.tier_index(tier_id)?;
        let len = Self::len_without(&self.tiers[target].item_ids, item_id);
        Self::check_insert_index(index, len, tier_id)?;

        self.detach(item_id);
        let ids = &mut self.tiers[target].item_ids;
        ids.insert(index.unwrap_or(ids.len()), item_id.to_string());
        self.is_dirty = true;
        debug!("item {item_id} assigned to tier {tier_id}");
        Ok(())
    }

    /// Drop `item_id` from `tier_id` without placing it anywhere else.
    pub fn remove_from_tier(&mut self, item_id: &str, tier_id: &str) -> Result<(), TierError> {
        let idx = self.tier_index(tier_id)?;
        let ids = &mut self.tiers[idx].item_ids;
        let before = ids.len();
        ids.retain(|id| id != item_id);
        if ids.len() == before {
            return Err(TierError::NotInContainer {
                item_id: item_id.to_string(),
                container: tier_id.to_string(),
            });
        }
        Ok(())
    }

    /// Reorder within a single tier.
    pub fn move_within_tier(&mut self, tier_id: &str, from_index: usize, to_index: usize) -> Result<(), TierError> {
        let idx = self.tier_index(tier_id)?;
        let ids = &mut self.tiers[idx].item_ids;
        let len = ids.len();
        for index in [from_index, to_index] {
            if index >= len {
                return Err(TierError::IndexOutOfBounds { index, len, container: tier_id.to_string() });
            }
        }
        let item = ids.remove(from_index);
        ids.insert(to_index, item);
        self.is_dirty = true;
        Ok(())
    }

    pub fn move_between_tiers(
        &mut self,
        item_id: &str,
        from_tier: &str,
        to_tier: &str,
        index: Option<usize>,
    ) -> Result<(), TierError> {
        let from = self.tier_index(from_tier)?;
        if !self.tiers[from].item_ids.iter().any(|id| id == item_id) {
            return Err(TierError::NotInContainer {
                item_id: item_id.to_string(),
                container: from_tier.to_string(),
            });
        }
        self.assign_to_tier(item_id, to_tier, index)
    }

    /// Send `item_id` to the unranked pool at `index` (append when `None`).
    pub fn add_to_unranked(&mut self, item_id: &str, index: Option<usize>) -> Result<(), TierError> {
        let len = Self::len_without(&self.unranked_item_ids, item_id);
        Self::check_insert_index(index, len, UNRANKED)?;
        self.detach(item_id);
        let pool = &mut self.unranked_item_ids;
        pool.insert(index.unwrap_or(pool.len()), item_id.to_string());
        self.is_dirty = true;
        Ok(())
    }

    pub fn remove_from_unranked(&mut self, item_id: &str) -> Result<(), TierError> {
        if !self.is_unranked(item_id) {
            return Err(TierError::NotInContainer {
                item_id: item_id.to_string(),
                container: UNRANKED.to_string(),
            });
        }
        self.unranked_item_ids.retain(|id| id != item_id);
        Ok(())
    }

    /// Every id in every container, each exactly once.
    pub fn all_item_ids(&self) -> Vec<String> {
        let mut ids = self.flattened();
        ids.extend(self.unranked_item_ids.iter().cloned());
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TierDefinition;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn ranking(ids: &[Option<&str>]) -> Vec<RankedSlot> {
        ids.iter()
            .enumerate()
            .map(|(position, id)| match id {
                Some(id) => RankedSlot::occupied(position, TransferableItem::new(*id, *id), SourceMode::Direct, Utc::now()),
                None => RankedSlot::empty(position),
            })
            .collect()
    }

    fn three_tiers() -> TierConfig {
        TierConfig {
            tiers: vec![
                TierDefinition::new("S", "S", 0),
                TierDefinition::new("A", "A", 1),
                TierDefinition::new("B", "B", 2),
            ],
        }
    }

    fn lookup(id: &str) -> Option<TransferableItem> {
        Some(TransferableItem::new(id, id))
    }

    fn membership(state: &TierState) -> HashMap<String, String> {
        state
            .tiers
            .iter()
            .flat_map(|tier| tier.item_ids.iter().map(move |id| (id.clone(), tier.definition.id.clone())))
            .collect()
    }

    #[test]
    fn boundaries_cover_domain_exactly() {
        let bounds = tier_boundaries(10, &three_tiers());
        assert_eq!(bounds, vec![0..4, 4..7, 7..10]);

        let weighted = TierConfig {
            tiers: vec![
                TierDefinition::new("S", "S", 0).with_weight(1.0),
                TierDefinition::new("A", "A", 1).with_weight(3.0),
            ],
        };
        assert_eq!(tier_boundaries(8, &weighted), vec![0..2, 2..8]);
    }

    #[test]
    fn sparse_rankings_fill_top_tiers_first() {
        let config = TierConfig::default();
        assert_eq!(tier_boundaries(1, &config), vec![0..1, 1..1, 1..1, 1..1, 1..1]);
        assert_eq!(tier_boundaries(3, &config), vec![0..1, 1..2, 2..3, 3..3, 3..3]);
        assert_eq!(tier_boundaries(7, &config), vec![0..2, 2..4, 4..5, 5..6, 6..7]);

        let one = derive_tiers_from_ranking(&ranking(&[Some("a")]), &config);
        assert_eq!(one.tier_of("a"), Some("S"));

        let three = derive_tiers_from_ranking(&ranking(&[Some("a"), None, Some("b"), Some("c")]), &config);
        assert_eq!(three.tier_of("a"), Some("S"));
        assert_eq!(three.tier_of("b"), Some("A"));
        assert_eq!(three.tier_of("c"), Some("B"));
        assert!(three.tier("C").unwrap().item_ids.is_empty());
    }

    #[test]
    fn zero_weights_fall_back_to_equal_shares() {
        let config = TierConfig {
            tiers: vec![
                TierDefinition::new("S", "S", 0).with_weight(0.0),
                TierDefinition::new("A", "A", 1).with_weight(-2.0),
            ],
        };
        assert_eq!(tier_boundaries(4, &config), vec![0..2, 2..4]);
    }

    #[test]
    fn derivation_follows_ranking_order_and_skips_empty_slots() {
        let slots = ranking(&[Some("a"), None, Some("b"), Some("c"), None, Some("d"), Some("e"), Some("f")]);
        let state = derive_tiers_from_ranking(&slots, &three_tiers());
        assert_eq!(state.tier("S").unwrap().item_ids, vec!["a", "b"]);
        assert_eq!(state.tier("A").unwrap().item_ids, vec!["c", "d"]);
        assert_eq!(state.tier("B").unwrap().item_ids, vec!["e", "f"]);
        assert!(!state.is_dirty);
        assert_eq!(state.last_synced_from_ranking.as_ref().unwrap().len(), 6);
    }

    #[test]
    fn derivation_of_empty_ranking_yields_empty_tiers() {
        let state = derive_tiers_from_ranking(&ranking(&[None, None]), &three_tiers());
        assert_eq!(state.tiers.len(), 3);
        assert_eq!(state.tiered_count(), 0);
    }

    #[test]
    fn sync_flattens_truncates_and_pads() {
        let mut state = empty_tier_state(&three_tiers());
        state.assign_to_tier("b", "A", None).unwrap();
        state.assign_to_tier("a", "S", None).unwrap();
        state.assign_to_tier("c", "B", None).unwrap();
        assert!(state.is_dirty);

        let slots = sync_ranking_from_tiers(&mut state, lookup, 2);
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0].item_id.as_deref(), Some("a"));
        assert_eq!(slots[1].item_id.as_deref(), Some("b"));
        assert!(!state.is_dirty);
        assert_eq!(state.last_synced_from_ranking, Some(vec!["a".to_string(), "b".to_string()]));

        let padded = sync_ranking_from_tiers(&mut state, lookup, 5);
        assert_eq!(padded.len(), 5);
        assert!(padded[3].is_empty() && padded[4].is_empty());
        assert_eq!(padded[2].source_mode, SourceMode::Tierlist);
    }

    #[test]
    fn sync_skips_unresolvable_ids() {
        let mut state = empty_tier_state(&three_tiers());
        state.assign_to_tier("ghost", "S", None).unwrap();
        state.assign_to_tier("real", "S", None).unwrap();
        let slots = sync_ranking_from_tiers(&mut state, |id| (id == "real").then(|| TransferableItem::new(id, id)), 3);
        assert_eq!(slots[0].item_id.as_deref(), Some("real"));
        assert!(slots[1].is_empty());
    }

    #[test]
    fn item_lives_in_one_container_at_a_time() {
        let mut state = empty_tier_state(&three_tiers());
        state.add_to_unranked("x", None).unwrap();
        state.assign_to_tier("x", "S", None).unwrap();
        assert!(!state.is_unranked("x"));
        state.move_between_tiers("x", "S", "B", Some(0)).unwrap();
        assert_eq!(state.tier_of("x"), Some("B"));
        assert_eq!(state.all_item_ids(), vec!["x".to_string()]);
        state.add_to_unranked("x", None).unwrap();
        assert_eq!(state.tier_of("x"), None);
        assert_eq!(state.all_item_ids(), vec!["x".to_string()]);
    }

    #[test]
    fn invalid_tier_ops_leave_state_untouched() {
        let mut state = empty_tier_state(&three_tiers());
        state.assign_to_tier("a", "S", None).unwrap();
        let before = state.clone();

        assert_eq!(state.assign_to_tier("a", "Z", None), Err(TierError::UnknownTier("Z".to_string())));
        assert!(matches!(state.assign_to_tier("b", "A", Some(3)), Err(TierError::IndexOutOfBounds { .. })));
        assert!(matches!(state.move_between_tiers("b", "S", "A", None), Err(TierError::NotInContainer { .. })));
        assert!(state.move_within_tier("S", 0, 4).is_err());
        assert!(state.remove_from_unranked("a").is_err());
        assert_eq!(state, before);
    }

    #[test]
    fn move_within_tier_reorders() {
        let mut state = empty_tier_state(&three_tiers());
        for id in ["a", "b", "c"] {
            state.assign_to_tier(id, "A", None).unwrap();
        }
        state.move_within_tier("A", 0, 2).unwrap();
        assert_eq!(state.tier("A").unwrap().item_ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn removal_only_operations_do_not_dirty() {
        let mut state = derive_tiers_from_ranking(&ranking(&[Some("a"), Some("b"), Some("c")]), &three_tiers());
        state.remove_from_tier("a", "S").unwrap();
        assert!(!state.is_dirty);
        assert!(!state.contains("a"));
    }

    proptest! {
        #[test]
        fn derive_then_sync_preserves_membership(
            layout in proptest::collection::vec(any::<bool>(), 0..40),
            tiers in 1usize..7,
        ) {
            let config = TierConfig {
                tiers: (0..tiers).map(|i| TierDefinition::new(format!("t{i}"), format!("T{i}"), i as u32)).collect(),
            };
            let ids: Vec<String> = (0..layout.len()).map(|i| format!("item-{i}")).collect();
            let slots: Vec<RankedSlot> = layout
                .iter()
                .enumerate()
                .map(|(position, filled)| {
                    if *filled {
                        RankedSlot::occupied(position, TransferableItem::new(ids[position].clone(), "t"), SourceMode::Direct, Utc::now())
                    } else {
                        RankedSlot::empty(position)
                    }
                })
                .collect();

            let mut derived = derive_tiers_from_ranking(&slots, &config);
            let synced = sync_ranking_from_tiers(&mut derived, lookup, slots.len());
            let rederived = derive_tiers_from_ranking(&synced, &config);
            prop_assert_eq!(membership(&derived), membership(&rederived));
        }
    }
}
