use std::collections::{HashMap, HashSet};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::bracket::{initialize_bracket, BracketConfig, BracketState};
use crate::catalog::ItemCatalog;
use crate::config::EngineConfig;
use crate::error::{BracketError, ErrorCode, PersistError, StoreError, TierError};
use crate::normalize::{normalize_item, IntoTransferable};
use crate::persistence::{JsonFileStore, Snapshot, SnapshotStore, SnapshotWriter};
use crate::ranking::{MoveOutcome, RankingStore};
use crate::router::{
    dispatch, route, DragSession, NotificationSink, OperationContext, OperationKind, OperationResult,
    SourceDescriptor, TargetDescriptor, TracingSink,
};
use crate::tiers::{derive_tiers_from_ranking, empty_tier_state, sync_ranking_from_tiers};
use crate::types::{
    DirectViewMode, RankedSlot, RankingStats, SourceMode, TierConfig, TierState, TransferableItem, SNAPSHOT_VERSION,
};
use crate::validator::{validate, Rejection, TransferContext};

/// One independent ranking board: the canonical ranking plus the tier and
/// bracket representations that read from and write back into it.
///
/// Every mutation runs to completion on the caller's thread. When a
/// snapshot writer is attached, each successful mutation queues a snapshot.
pub struct RankingEngine {
    ranking: RankingStore,
    tiers: TierState,
    tier_config: TierConfig,
    bracket: Option<BracketState>,
    bracket_config: Option<BracketConfig>,
    default_bracket_size: usize,
    catalog: Box<dyn ItemCatalog>,
    sink: Box<dyn NotificationSink>,
    writer: Option<SnapshotWriter>,
    known_items: HashMap<String, TransferableItem>,
    drag: DragSession,
}

// ── Construction ───────────────────────────────────────────────────────

impl RankingEngine {
    pub fn new(config: &EngineConfig, catalog: impl ItemCatalog + 'static) -> Self {
        RankingEngine {
            ranking: RankingStore::new(config.max_ranking_size),
            tiers: empty_tier_state(&config.tier_config),
            tier_config: config.tier_config.clone(),
            bracket: None,
            bracket_config: None,
            default_bracket_size: config.bracket_size,
            catalog: Box::new(catalog),
            sink: Box::new(TracingSink),
            writer: None,
            known_items: HashMap::new(),
            drag: DragSession::default(),
        }
    }

    /// Validate `config`, resume from its snapshot file when present and,
    /// if persistence is enabled, attach a background writer to that file.
    pub fn open(config: &EngineConfig, catalog: impl ItemCatalog + 'static) -> Result<Self, String> {
        config.validate()?;
        let mut engine = RankingEngine::new(config, catalog);
        let store = JsonFileStore::new(config.snapshot_path_buf());
        match store.load() {
            Ok(Some(snapshot)) => engine.load_snapshot(snapshot).map_err(|e| e.to_string())?,
            Ok(None) => debug!("no snapshot at {}; starting fresh", store.path().display()),
            Err(e) => return Err(format!("load snapshot: {e}")),
        }
        if config.persist {
            engine.writer = Some(SnapshotWriter::spawn(store));
        }
        Ok(engine)
    }

    pub fn with_sink(mut self, sink: impl NotificationSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_writer(mut self, writer: SnapshotWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Flush pending snapshots and stop the writer thread.
    pub fn shutdown(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown();
        }
    }
}

// ── Queries ────────────────────────────────────────────────────────────

impl RankingEngine {
    pub fn ranking(&self) -> &RankingStore {
        &self.ranking
    }

    pub fn slots(&self) -> &[RankedSlot] {
        self.ranking.slots()
    }

    pub fn stats(&self) -> &RankingStats {
        self.ranking.stats()
    }

    pub fn active_mode(&self) -> SourceMode {
        self.ranking.active_mode()
    }

    pub fn direct_view_mode(&self) -> DirectViewMode {
        self.ranking.direct_view_mode()
    }

    pub fn tier_state(&self) -> &TierState {
        &self.tiers
    }

    pub fn tier_config(&self) -> &TierConfig {
        &self.tier_config
    }

    pub fn bracket(&self) -> Option<&BracketState> {
        self.bracket.as_ref()
    }

    pub fn bracket_config(&self) -> Option<&BracketConfig> {
        self.bracket_config.as_ref()
    }

    pub fn drag_source(&self) -> Option<&SourceDescriptor> {
        self.drag.active()
    }

    /// Best available record for `item_id`: ranking occupant, then the
    /// engine's own cache, then the catalog.
    pub fn resolve_item(&self, item_id: &str) -> Option<TransferableItem> {
        lookup_item(&self.ranking, &self.known_items, self.catalog.as_ref(), item_id)
    }

    /// Cache an item so later tier syncs can rehydrate it by id.
    pub fn remember(&mut self, record: impl IntoTransferable) -> Option<String> {
        let item = normalize_item(record)?;
        let id = item.id.clone();
        self.known_items.insert(id.clone(), item);
        Some(id)
    }

    /// Forget cached items nothing on the board refers to any more.
    fn prune_known_items(&mut self) {
        let mut reachable: HashSet<String> = self.ranking.item_ids().into_iter().collect();
        reachable.extend(self.tiers.all_item_ids());
        if let Some(bracket) = &self.bracket {
            reachable.extend(bracket_items(bracket).map(|item| item.id.clone()));
        }
        let before = self.known_items.len();
        self.known_items.retain(|id, _| reachable.contains(id));
        debug!("item cache pruned from {before} to {}", self.known_items.len());
    }

    fn transfer_context(&self) -> TransferContext<'_> {
        TransferContext {
            ranking: &self.ranking,
            tiers: &self.tiers,
            catalog: self.catalog.as_ref(),
            known_items: &self.known_items,
        }
    }
}

fn bracket_items(bracket: &BracketState) -> impl Iterator<Item = &TransferableItem> {
    bracket
        .rounds
        .iter()
        .flat_map(|round| round.matchups.iter())
        .flat_map(|m| [m.participant1.as_ref(), m.participant2.as_ref()])
        .flatten()
        .filter_map(|participant| participant.item.as_ref())
}

fn lookup_item(
    ranking: &RankingStore,
    known: &HashMap<String, TransferableItem>,
    catalog: &dyn ItemCatalog,
    item_id: &str,
) -> Option<TransferableItem> {
    ranking
        .position_of(item_id)
        .and_then(|position| ranking.slot(position))
        .and_then(|slot| slot.item.clone())
        .or_else(|| known.get(item_id).cloned())
        .or_else(|| catalog.get_item_by_id(item_id))
}

// ── Ranking store ──────────────────────────────────────────────────────

impl RankingEngine {
    /// Fresh ranking of `size` empty slots; the tier board is emptied too.
    pub fn initialize_ranking(&mut self, size: usize) {
        self.ranking.initialize(size);
        self.tiers = empty_tier_state(&self.tier_config);
        self.prune_known_items();
        self.persist();
    }

    /// Reinitialize at the current length.
    pub fn clear_ranking(&mut self) {
        let size = self.ranking.len();
        self.initialize_ranking(size);
    }

    pub fn assign_to_position(&mut self, record: impl IntoTransferable, position: usize) -> Result<(), StoreError> {
        let item = normalize_item(record).ok_or(StoreError::InvalidItem)?;
        self.ranking.assign_to_position(item.clone(), position)?;
        self.known_items.insert(item.id.clone(), item);
        self.persist();
        Ok(())
    }

    pub fn remove_from_position(&mut self, position: usize) -> Result<Option<TransferableItem>, StoreError> {
        let removed = self.ranking.remove_from_position(position)?;
        self.persist();
        Ok(removed)
    }

    pub fn move_position(&mut self, from: usize, to: usize) -> Result<MoveOutcome, StoreError> {
        let outcome = self.ranking.move_position(from, to)?;
        self.persist();
        Ok(outcome)
    }

    pub fn swap_positions(&mut self, a: usize, b: usize) -> Result<MoveOutcome, StoreError> {
        self.move_position(a, b)
    }
}

// ── Modes and tier sync ────────────────────────────────────────────────

impl RankingEngine {
    /// Switch modes. Entering tier mode runs [`RankingEngine::sync_if_stale`].
    /// Returns the previous mode.
    pub fn set_active_mode(&mut self, mode: SourceMode) -> SourceMode {
        let previous = self.ranking.set_active_mode(mode);
        if previous != mode {
            info!("active mode {previous:?} -> {mode:?}");
        }
        if mode == SourceMode::Tierlist && previous != SourceMode::Tierlist {
            self.sync_if_stale();
        }
        self.persist();
        previous
    }

    pub fn set_direct_view_mode(&mut self, view: DirectViewMode) {
        self.ranking.set_direct_view_mode(view);
        self.persist();
    }

    /// Re-derive the tier board when the ranking moved on since the last
    /// derivation and the board holds no unsynced edits of its own.
    /// Returns whether a derivation happened.
    pub fn sync_if_stale(&mut self) -> bool {
        if self.tiers.is_dirty {
            debug!("tier board has unsynced edits; derivation skipped");
            return false;
        }
        let current = self.ranking.item_ids();
        if self.tiers.last_synced_from_ranking.as_ref() == Some(&current) {
            return false;
        }
        let mut next = derive_tiers_from_ranking(self.ranking.slots(), &self.tier_config);
        let carried: Vec<String> = self
            .tiers
            .unranked_item_ids
            .iter()
            .filter(|id| !next.contains(id))
            .cloned()
            .collect();
        next.unranked_item_ids.extend(carried);
        self.tiers = next;
        true
    }

    /// Rebuild the tier board from the ranking, discarding tier edits.
    pub fn derive_tiers_from_ranking(&mut self) -> &TierState {
        self.tiers = derive_tiers_from_ranking(self.ranking.slots(), &self.tier_config);
        self.persist();
        &self.tiers
    }

    /// Fold the tier board back into the ranking. Returns the ids written.
    pub fn sync_ranking_from_tiers(&mut self) -> Vec<String> {
        let size = self.ranking.len();
        let ranking = &self.ranking;
        let known = &self.known_items;
        let catalog = self.catalog.as_ref();
        let slots = sync_ranking_from_tiers(&mut self.tiers, |id| lookup_item(ranking, known, catalog, id), size);
        self.ranking.replace_slots(slots, size);
        self.persist();
        self.ranking.item_ids()
    }

    /// Swap in a new tier layout and re-derive the board from the ranking.
    pub fn set_tier_config(&mut self, config: TierConfig) {
        self.tier_config = config;
        self.tiers = derive_tiers_from_ranking(self.ranking.slots(), &self.tier_config);
        self.persist();
    }

    pub fn assign_to_tier(&mut self, item_id: &str, tier_id: &str, index: Option<usize>) -> Result<(), TierError> {
        self.tiers.assign_to_tier(item_id, tier_id, index)?;
        self.persist();
        Ok(())
    }

    pub fn remove_from_tier(&mut self, item_id: &str, tier_id: &str) -> Result<(), TierError> {
        self.tiers.remove_from_tier(item_id, tier_id)?;
        self.persist();
        Ok(())
    }

    pub fn move_within_tier(&mut self, tier_id: &str, from_index: usize, to_index: usize) -> Result<(), TierError> {
        self.tiers.move_within_tier(tier_id, from_index, to_index)?;
        self.persist();
        Ok(())
    }

    pub fn move_between_tiers(
        &mut self,
        item_id: &str,
        from_tier: &str,
        to_tier: &str,
        index: Option<usize>,
    ) -> Result<(), TierError> {
        self.tiers.move_between_tiers(item_id, from_tier, to_tier, index)?;
        self.persist();
        Ok(())
    }

    pub fn add_to_unranked(&mut self, item_id: &str, index: Option<usize>) -> Result<(), TierError> {
        self.tiers.add_to_unranked(item_id, index)?;
        self.persist();
        Ok(())
    }

    pub fn remove_from_unranked(&mut self, item_id: &str) -> Result<(), TierError> {
        self.tiers.remove_from_unranked(item_id)?;
        self.persist();
        Ok(())
    }
}

// ── Bracket ────────────────────────────────────────────────────────────

impl RankingEngine {
    /// Seed a bracket from explicit candidates. Any previous bracket is replaced.
    pub fn initialize_bracket(
        &mut self,
        candidates: &[TransferableItem],
        config: BracketConfig,
    ) -> Result<&BracketState, BracketError> {
        let state = initialize_bracket(candidates, &config)?;
        for item in candidates {
            self.known_items.entry(item.id.clone()).or_insert_with(|| item.clone());
        }
        self.bracket = Some(state);
        self.bracket_config = Some(config);
        self.persist();
        self.bracket.as_ref().ok_or(BracketError::NoBracket)
    }

    /// Seed a bracket from the ranking's filled slots in rank order.
    /// `None` uses the configured default size and rank-order seeding.
    pub fn initialize_bracket_from_ranking(
        &mut self,
        config: Option<BracketConfig>,
    ) -> Result<&BracketState, BracketError> {
        let config = config.unwrap_or_else(|| BracketConfig { size: self.default_bracket_size, ..BracketConfig::default() });
        let candidates: Vec<TransferableItem> =
            self.ranking.filled_slots().filter_map(|slot| slot.into_transferable()).collect();
        self.initialize_bracket(&candidates, config)
    }

    pub fn record_matchup(&mut self, matchup_id: &str, winner_id: &str) -> Result<(), BracketError> {
        let bracket = self.bracket.as_mut().ok_or(BracketError::NoBracket)?;
        bracket.record_matchup(matchup_id, winner_id)?;
        self.persist();
        Ok(())
    }

    /// Write the finishing order into the ranking and switch to the direct
    /// podium view. Fails closed on an incomplete bracket. Repeat
    /// application overwrites the ranking again.
    pub fn apply_bracket_to_ranking(&mut self) -> Result<Vec<String>, BracketError> {
        let bracket = self.bracket.as_mut().ok_or(BracketError::NoBracket)?;
        if !bracket.is_complete {
            return Err(BracketError::Incomplete);
        }
        if bracket.applied_to_ranking_at.is_some() {
            warn!("bracket already applied; overwriting ranking again");
        }
        let order: Vec<TransferableItem> = bracket
            .finishing_order()
            .into_iter()
            .filter_map(|participant| participant.item)
            .collect();
        let written = self.ranking.write_order(order, SourceMode::Bracket);
        bracket.applied_to_ranking_at = Some(Utc::now());
        bracket.ranking_snapshot = Some(written.clone());
        self.ranking.set_active_mode(SourceMode::Direct);
        self.ranking.set_direct_view_mode(DirectViewMode::Podium);
        info!("bracket applied to ranking ({} positions written)", written.len());
        self.persist();
        Ok(written)
    }

    /// Drop bracket state and configuration. Ranking positions written by a
    /// previous apply stay where they are.
    pub fn reset_bracket(&mut self) {
        if self.bracket.take().is_some() {
            info!("bracket reset");
        }
        self.bracket_config = None;
        self.persist();
    }
}

// ── Routed operations ──────────────────────────────────────────────────

impl RankingEngine {
    pub fn begin_drag(&mut self, source: SourceDescriptor) {
        if let Some(stale) = self.drag.begin(source) {
            debug!("drag from {stale:?} replaced by a new drag");
        }
    }

    /// Read-only preview of what dropping on `target` would do.
    pub fn hover(&self, target: &TargetDescriptor) -> Result<OperationKind, ErrorCode> {
        let source = self.drag.active().ok_or(ErrorCode::NoActiveOperation)?;
        self.preview(source, target)
    }

    /// Finish the active drag on `target`. Without one, the result is a
    /// `NO_ACTIVE_OPERATION` rejection.
    pub fn drop(&mut self, target: TargetDescriptor) -> OperationResult {
        match self.drag.take() {
            Some(source) => self.execute(source, target),
            None => {
                let context = OperationContext {
                    target: Some(target),
                    detail: Some("drop without an active drag".to_string()),
                    ..OperationContext::default()
                };
                let result = OperationResult::rejected(ErrorCode::NoActiveOperation, context);
                self.sink.notify(&result);
                result
            }
        }
    }

    /// Abandon the active drag. Returns whether one was active.
    pub fn cancel_drag(&mut self) -> bool {
        self.drag.cancel()
    }

    pub fn preview(&self, source: &SourceDescriptor, target: &TargetDescriptor) -> Result<OperationKind, ErrorCode> {
        let route = route(source.kind(), target.kind()).ok_or(ErrorCode::UnknownRoute)?;
        validate(route, source, target, &self.transfer_context())
            .map(|transfer| transfer.kind)
            .map_err(|rejection| rejection.code)
    }

    /// Route, validate and apply one transfer. State is untouched unless the
    /// result is `Applied`; the sink sees every outcome.
    pub fn execute(&mut self, source: SourceDescriptor, target: TargetDescriptor) -> OperationResult {
        let outcome = self.try_execute(&source, &target);
        let mut context = OperationContext {
            source: Some(source),
            target: Some(target),
            ..OperationContext::default()
        };
        let result = match outcome {
            Ok((kind, item_id)) => {
                context.item_id = item_id;
                OperationResult::applied(kind, context)
            }
            Err(rejection) => {
                context.detail = Some(rejection.detail);
                OperationResult::rejected(rejection.code, context)
            }
        };
        self.sink.notify(&result);
        result
    }

    fn try_execute(
        &mut self,
        source: &SourceDescriptor,
        target: &TargetDescriptor,
    ) -> Result<(OperationKind, Option<String>), Rejection> {
        let route = route(source.kind(), target.kind()).ok_or_else(|| {
            Rejection::new(
                ErrorCode::UnknownRoute,
                format!("no handler for {:?} -> {:?}", source.kind(), target.kind()),
            )
        })?;
        let transfer = validate(route, source, target, &self.transfer_context())?;

        let checkpoint = (self.ranking.clone(), self.tiers.clone());
        if let Err(rejection) = dispatch(&transfer, source, target, &mut self.ranking, &mut self.tiers) {
            warn!("{:?} failed after validation; state restored", transfer.kind);
            (self.ranking, self.tiers) = checkpoint;
            return Err(rejection);
        }
        if let Some(item) = transfer.item {
            self.known_items.insert(item.id.clone(), item);
        }
        self.persist();
        Ok((transfer.kind, transfer.item_id))
    }
}

// ── Snapshots ──────────────────────────────────────────────────────────

impl RankingEngine {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            ranking: self.ranking.slots().to_vec(),
            max_ranking_size: self.ranking.len(),
            active_mode: self.ranking.active_mode(),
            direct_view_mode: self.ranking.direct_view_mode(),
            bracket_state: self.bracket.clone(),
            bracket_config: self.bracket_config.clone(),
            tier_state: self.tiers.clone(),
            tier_config: self.tier_config.clone(),
            saved_at: Utc::now(),
        }
    }

    /// Replace all state wholesale. Nothing changes when the snapshot is
    /// refused.
    pub fn load_snapshot(&mut self, snapshot: Snapshot) -> Result<(), PersistError> {
        snapshot.check_version()?;
        self.ranking.replace_slots(snapshot.ranking, snapshot.max_ranking_size);
        self.ranking.set_active_mode(snapshot.active_mode);
        self.ranking.set_direct_view_mode(snapshot.direct_view_mode);
        self.tiers = snapshot.tier_state;
        self.tier_config = snapshot.tier_config;
        self.bracket = snapshot.bracket_state;
        self.bracket_config = snapshot.bracket_config;
        self.drag = DragSession::default();

        self.known_items.clear();
        for item in self.ranking.slots().iter().filter_map(|slot| slot.item.clone()) {
            self.known_items.insert(item.id.clone(), item);
        }
        if let Some(bracket) = &self.bracket {
            for item in bracket_items(bracket) {
                self.known_items.entry(item.id.clone()).or_insert_with(|| item.clone());
            }
        }
        info!(
            "snapshot loaded: {} of {} slots filled",
            self.ranking.stats().filled_count,
            self.ranking.len()
        );
        Ok(())
    }

    fn persist(&self) {
        if let Some(writer) = &self.writer {
            writer.persist(self.snapshot());
        }
    }
}
