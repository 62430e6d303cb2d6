use std::collections::HashMap;

use crate::catalog::ItemCatalog;
use crate::error::{ErrorCode, StoreError, TierError};
use crate::ranking::RankingStore;
use crate::router::{OperationKind, Route, SourceDescriptor, TargetDescriptor};
use crate::types::{TierState, TransferableItem};

/// A refused transfer: the code callers branch on plus a human detail.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub code: ErrorCode,
    pub detail: String,
}

impl Rejection {
    pub fn new(code: ErrorCode, detail: impl Into<String>) -> Self {
        Rejection { code, detail: detail.into() }
    }
}

impl From<StoreError> for Rejection {
    fn from(err: StoreError) -> Self {
        Rejection::new(err.code(), err.to_string())
    }
}

impl From<TierError> for Rejection {
    fn from(err: TierError) -> Self {
        Rejection::new(err.code(), err.to_string())
    }
}

/// Outcome of a passed validation: the final operation kind plus the
/// item it moves, resolved once so handlers never consult the catalog.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedTransfer {
    pub kind: OperationKind,
    pub item_id: Option<String>,
    pub item: Option<TransferableItem>,
}

/// Read-only view the validator checks against.
pub struct TransferContext<'a> {
    pub ranking: &'a RankingStore,
    pub tiers: &'a TierState,
    pub catalog: &'a dyn ItemCatalog,
    pub known_items: &'a HashMap<String, TransferableItem>,
}

impl TransferContext<'_> {
    /// Known items first (anything that has passed through the engine),
    /// then the catalog.
    pub fn resolve(&self, item_id: &str) -> Option<TransferableItem> {
        if let Some(slot) = self
            .ranking
            .position_of(item_id)
            .and_then(|position| self.ranking.slot(position))
        {
            if let Some(item) = &slot.item {
                return Some(item.clone());
            }
        }
        self.known_items
            .get(item_id)
            .cloned()
            .or_else(|| self.catalog.get_item_by_id(item_id))
    }
}

/// Check every precondition of `route` without mutating anything.
pub fn validate(
    route: Route,
    source: &SourceDescriptor,
    target: &TargetDescriptor,
    ctx: &TransferContext<'_>,
) -> Result<ValidatedTransfer, Rejection> {
    // source first: it names the item every later check refers to
    let item_id = check_source(source, ctx)?;
    check_target_exists(target, ctx)?;

    let kind = match (route, source, target) {
        (Route::Assign, SourceDescriptor::Collection { .. }, TargetDescriptor::Slot { position }) => {
            check_target_empty(*position, ctx)?;
            if ctx.ranking.contains(&item_id) {
                return Err(Rejection::new(ErrorCode::ItemAlreadyUsed, format!("{item_id} is already ranked")));
            }
            OperationKind::Assign
        }
        (Route::Relocate, SourceDescriptor::Slot { position: from }, TargetDescriptor::Slot { position: to }) => {
            if from == to {
                return Err(Rejection::new(
                    ErrorCode::PositionOccupiedIncompatible,
                    format!("source and target are both position {from}"),
                ));
            }
            if slot_empty(*to, ctx) {
                OperationKind::Move
            } else {
                OperationKind::Swap
            }
        }
        (Route::TierAssign, SourceDescriptor::Collection { .. }, TargetDescriptor::Tier { tier_id, index }) => {
            if ctx.tiers.contains(&item_id) {
                return Err(Rejection::new(
                    ErrorCode::ItemAlreadyUsed,
                    format!("{item_id} is already on the tier board"),
                ));
            }
            check_tier_index(tier_id, *index, &item_id, ctx)?;
            OperationKind::TierAssign
        }
        (
            Route::TierReorder,
            SourceDescriptor::Tier { tier_id: from, .. },
            TargetDescriptor::Tier { tier_id: to, index },
        ) => {
            check_tier_index(to, *index, &item_id, ctx)?;
            if from == to {
                OperationKind::TierMove
            } else {
                OperationKind::TierTransfer
            }
        }
        (Route::Unrank, SourceDescriptor::Tier { .. }, TargetDescriptor::Unranked { index }) => {
            let len = ctx.tiers.unranked_item_ids.len();
            if let Some(index) = index {
                if *index > len {
                    return Err(out_of_bounds(*index, len, "unranked pool"));
                }
            }
            OperationKind::Unrank
        }
        (Route::RankFromPool, SourceDescriptor::Unranked { .. }, TargetDescriptor::Tier { tier_id, index }) => {
            check_tier_index(tier_id, *index, &item_id, ctx)?;
            OperationKind::RankFromPool
        }
        (Route::TierToGrid, SourceDescriptor::Tier { .. }, TargetDescriptor::Slot { position }) => {
            check_target_empty(*position, ctx)?;
            OperationKind::TierToGrid
        }
        (Route::GridToTier, SourceDescriptor::Slot { .. }, TargetDescriptor::Tier { tier_id, index }) => {
            check_tier_index(tier_id, *index, &item_id, ctx)?;
            OperationKind::GridToTier
        }
        (route, _, _) => {
            return Err(Rejection::new(
                ErrorCode::TargetTypeMismatch,
                format!("{route:?} cannot take this source/target pair"),
            ));
        }
    };

    let item = match kind {
        OperationKind::Assign | OperationKind::TierToGrid => Some(
            ctx.resolve(&item_id)
                .ok_or_else(|| Rejection::new(ErrorCode::ItemNotFound, format!("{item_id} cannot be resolved")))?,
        ),
        _ => ctx.resolve(&item_id),
    };

    Ok(ValidatedTransfer { kind, item_id: Some(item_id), item })
}

/// Confirms the source currently holds what it claims and returns its item id.
fn check_source(source: &SourceDescriptor, ctx: &TransferContext<'_>) -> Result<String, Rejection> {
    match source {
        SourceDescriptor::Collection { item_id, .. } => {
            if ctx.catalog.get_item_by_id(item_id).is_none() {
                return Err(Rejection::new(ErrorCode::ItemNotFound, format!("{item_id} is not in the catalog")));
            }
            if ctx.catalog.is_item_used(item_id) {
                return Err(Rejection::new(ErrorCode::ItemAlreadyUsed, format!("{item_id} is marked used")));
            }
            Ok(item_id.clone())
        }
        SourceDescriptor::Slot { position } => {
            let slot = ctx
                .ranking
                .slot(*position)
                .ok_or_else(|| out_of_bounds(*position, ctx.ranking.len(), "ranking"))?;
            slot.item_id
                .clone()
                .ok_or_else(|| Rejection::new(ErrorCode::ItemNotFound, format!("slot {position} is empty")))
        }
        SourceDescriptor::Tier { tier_id, item_id } => {
            let tier = ctx
                .tiers
                .tier(tier_id)
                .ok_or_else(|| Rejection::new(ErrorCode::ItemNotFound, format!("source tier {tier_id} does not exist")))?;
            if !tier.item_ids.iter().any(|id| id == item_id) {
                return Err(Rejection::new(ErrorCode::ItemNotFound, format!("{item_id} is not in tier {tier_id}")));
            }
            Ok(item_id.clone())
        }
        SourceDescriptor::Unranked { item_id } => {
            if !ctx.tiers.is_unranked(item_id) {
                return Err(Rejection::new(ErrorCode::ItemNotFound, format!("{item_id} is not in the unranked pool")));
            }
            Ok(item_id.clone())
        }
    }
}

fn check_target_exists(target: &TargetDescriptor, ctx: &TransferContext<'_>) -> Result<(), Rejection> {
    match target {
        TargetDescriptor::Slot { position } => {
            if *position >= ctx.ranking.len() {
                return Err(out_of_bounds(*position, ctx.ranking.len(), "ranking"));
            }
        }
        TargetDescriptor::Tier { tier_id, .. } => {
            if ctx.tiers.tier(tier_id).is_none() {
                return Err(Rejection::new(
                    ErrorCode::TargetTypeMismatch,
                    format!("target tier {tier_id} does not exist"),
                ));
            }
        }
        TargetDescriptor::Unranked { .. } => {}
    }
    Ok(())
}

fn slot_empty(position: usize, ctx: &TransferContext<'_>) -> bool {
    ctx.ranking.slot(position).map(|slot| slot.is_empty()).unwrap_or(false)
}

fn check_target_empty(position: usize, ctx: &TransferContext<'_>) -> Result<(), Rejection> {
    if slot_empty(position, ctx) {
        Ok(())
    } else {
        Err(Rejection::new(
            ErrorCode::PositionOccupiedIncompatible,
            format!("position {position} is already occupied"),
        ))
    }
}

/// Insertion index bound, measured with the moving item already removed.
fn check_tier_index(
    tier_id: &str,
    index: Option<usize>,
    item_id: &str,
    ctx: &TransferContext<'_>,
) -> Result<(), Rejection> {
    let Some(index) = index else { return Ok(()) };
    let len = ctx
        .tiers
        .tier(tier_id)
        .map(|tier| tier.item_ids.iter().filter(|id| *id != item_id).count())
        .unwrap_or(0);
    if index > len {
        return Err(out_of_bounds(index, len, tier_id));
    }
    Ok(())
}

fn out_of_bounds(index: usize, len: usize, container: &str) -> Rejection {
    Rejection::new(
        ErrorCode::PositionOutOfBounds,
        format!("index {index} is outside {container} of length {len}"),
    )
}
