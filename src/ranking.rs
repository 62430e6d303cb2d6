use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::normalize::{normalize_item, IntoTransferable};
use crate::types::{DirectViewMode, RankedSlot, RankingStats, SourceMode, TransferableItem, MAX_RANKING_SIZE};

/// What `move_position` ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Target was empty; the occupant relocated and the source is now empty.
    Moved,
    /// Target was occupied; the two occupants exchanged positions.
    Swapped,
}

/// Owns the canonical ordered sequence of slots. Length is fixed by
/// `initialize` and only changes through another `initialize`.
///
/// Every mutator returns a `Result`; an `Err` always means the store was
/// left exactly as it was.
#[derive(Clone, Debug, Default)]
pub struct RankingStore {
    slots: Vec<RankedSlot>,
    active_mode: SourceMode,
    direct_view_mode: DirectViewMode,
    stats: RankingStats,
}

impl RankingStore {
    pub fn new(size: usize) -> Self {
        let mut store = RankingStore::default();
        store.initialize(size);
        store
    }

    pub fn initialize(&mut self, size: usize) {
        let size = if size > MAX_RANKING_SIZE {
            warn!("ranking size {size} capped at {MAX_RANKING_SIZE}");
            MAX_RANKING_SIZE
        } else {
            size
        };
        self.slots = (0..size).map(RankedSlot::empty).collect();
        self.recompute_stats();
        info!("ranking initialized with {size} slots");
    }

    /// Reinitialize at the current length.
    pub fn clear(&mut self) {
        let size = self.slots.len();
        self.initialize(size);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[RankedSlot] {
        &self.slots
    }

    pub fn slot(&self, position: usize) -> Option<&RankedSlot> {
        self.slots.get(position)
    }

    pub fn stats(&self) -> &RankingStats {
        &self.stats
    }

    pub fn active_mode(&self) -> SourceMode {
        self.active_mode
    }

    pub fn direct_view_mode(&self) -> DirectViewMode {
        self.direct_view_mode
    }

    /// Returns the previously active mode.
    pub fn set_active_mode(&mut self, mode: SourceMode) -> SourceMode {
        let previous = self.active_mode;
        self.active_mode = mode;
        previous
    }

    pub fn set_direct_view_mode(&mut self, view: DirectViewMode) {
        self.direct_view_mode = view;
    }

    /// Filled item ids in ranking order.
    pub fn item_ids(&self) -> Vec<String> {
        self.slots.iter().filter_map(|slot| slot.item_id.clone()).collect()
    }

    pub fn filled_slots(&self) -> impl Iterator<Item = &RankedSlot> {
        self.slots.iter().filter(|slot| !slot.is_empty())
    }

    pub fn position_of(&self, item_id: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.item_id.as_deref() == Some(item_id))
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.position_of(item_id).is_some()
    }

    fn check_bounds(&self, position: usize) -> Result<(), StoreError> {
        if position >= self.slots.len() {
            return Err(StoreError::OutOfBounds { position, len: self.slots.len() });
        }
        Ok(())
    }

    /// Occupy an empty slot with the normalized item, tagged with the active mode.
    pub fn assign_to_position(&mut self, item: impl IntoTransferable, position: usize) -> Result<(), StoreError> {
        self.check_bounds(position)?;
        if !self.slots[position].is_empty() {
            return Err(StoreError::Occupied(position));
        }
        let item = normalize_item(item).ok_or(StoreError::InvalidItem)?;
        debug!("assign {} to position {position}", item.id);
        self.slots[position] = RankedSlot::occupied(position, item, self.active_mode, Utc::now());
        self.recompute_stats();
        Ok(())
    }

    /// Clear a slot. Returns the previous occupant, `None` if it was already empty.
    pub fn remove_from_position(&mut self, position: usize) -> Result<Option<TransferableItem>, StoreError> {
        self.check_bounds(position)?;
        let previous = std::mem::replace(&mut self.slots[position], RankedSlot::empty(position));
        self.recompute_stats();
        Ok(previous.item)
    }

    /// Move into an empty target, or swap with an occupied one.
    pub fn move_position(&mut self, from: usize, to: usize) -> Result<MoveOutcome, StoreError> {
        self.check_bounds(from)?;
        self.check_bounds(to)?;
        if from == to {
            return Err(StoreError::SamePosition(from));
        }
        if self.slots[from].is_empty() {
            return Err(StoreError::Empty(from));
        }

        let outcome = if self.slots[to].is_empty() {
            let moving = std::mem::replace(&mut self.slots[from], RankedSlot::empty(from));
            self.slots[to] = moving.relocated(to);
            MoveOutcome::Moved
        } else {
            self.slots.swap(from, to);
            self.slots[from].set_position(from);
            self.slots[to].set_position(to);
            MoveOutcome::Swapped
        };
        debug!("move {from} -> {to}: {outcome:?}");
        self.recompute_stats();
        Ok(outcome)
    }

    pub fn swap_positions(&mut self, a: usize, b: usize) -> Result<MoveOutcome, StoreError> {
        self.move_position(a, b)
    }

    /// Overwrite positions `0..k` with `items` in order and clear the rest.
    /// Items past the ranking length are dropped. Returns the written ids.
    pub fn write_order(&mut self, items: Vec<TransferableItem>, mode: SourceMode) -> Vec<String> {
        let now = Utc::now();
        let len = self.slots.len();
        let mut written = Vec::with_capacity(len.min(items.len()));
        let mut filled = items.into_iter().take(len);
        for position in 0..len {
            self.slots[position] = match filled.next() {
                Some(item) => {
                    written.push(item.id.clone());
                    RankedSlot::occupied(position, item, mode, now)
                }
                None => RankedSlot::empty(position),
            };
        }
        self.recompute_stats();
        written
    }

    /// Replace the slot sequence wholesale, e.g. from a persisted snapshot.
    /// The result is resized to `size` and positions are re-indexed.
    pub fn replace_slots(&mut self, slots: Vec<RankedSlot>, size: usize) {
        let size = size.min(MAX_RANKING_SIZE);
        let mut next: Vec<RankedSlot> = slots
            .into_iter()
            .take(size)
            .enumerate()
            .map(|(position, slot)| {
                if slot.item_id.is_none() {
                    RankedSlot::empty(position)
                } else {
                    slot.relocated(position)
                }
            })
            .collect();
        while next.len() < size {
            next.push(RankedSlot::empty(next.len()));
        }
        self.slots = next;
        self.recompute_stats();
    }

    fn recompute_stats(&mut self) {
        self.stats = RankingStats::from_slots(&self.slots);
    }
}
