use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;
use tracing::{debug, info, warn};

use crate::error::ErrorCode;
use crate::ranking::{MoveOutcome, RankingStore};
use crate::types::{TierState, TransferableItem};
use crate::validator::{Rejection, ValidatedTransfer};

// ── Descriptors ────────────────────────────────────────────────────────

/// Where a dragged item came from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SourceDescriptor {
    /// Catalog/collection panel, outside every representation.
    Collection {
        item_id: String,
        #[serde(default)]
        collection_id: Option<String>,
    },
    Slot { position: usize },
    Tier { tier_id: String, item_id: String },
    Unranked { item_id: String },
}

/// Where it was dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TargetDescriptor {
    Slot { position: usize },
    Tier {
        tier_id: String,
        #[serde(default)]
        index: Option<usize>,
    },
    Unranked {
        #[serde(default)]
        index: Option<usize>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Collection,
    Slot,
    Tier,
    Unranked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Slot,
    Tier,
    Unranked,
}

impl SourceDescriptor {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceDescriptor::Collection { .. } => SourceKind::Collection,
            SourceDescriptor::Slot { .. } => SourceKind::Slot,
            SourceDescriptor::Tier { .. } => SourceKind::Tier,
            SourceDescriptor::Unranked { .. } => SourceKind::Unranked,
        }
    }
}

impl TargetDescriptor {
    pub fn kind(&self) -> TargetKind {
        match self {
            TargetDescriptor::Slot { .. } => TargetKind::Slot,
            TargetDescriptor::Tier { .. } => TargetKind::Tier,
            TargetDescriptor::Unranked { .. } => TargetKind::Unranked,
        }
    }
}

// ── Routing ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Assign,
    Move,
    Swap,
    TierAssign,
    TierMove,
    TierTransfer,
    Unrank,
    RankFromPool,
    TierToGrid,
    GridToTier,
}

/// Handler selected by the `(source, target)` pair. `Relocate` and
/// `TierReorder` resolve to their final kind once target state is known.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Assign,
    Relocate,
    TierAssign,
    TierReorder,
    Unrank,
    RankFromPool,
    TierToGrid,
    GridToTier,
}

/// The dispatch table. Every pairing is listed so a new descriptor kind
/// fails to compile until it is routed or explicitly rejected.
pub fn route(source: SourceKind, target: TargetKind) -> Option<Route> {
    match (source, target) {
        (SourceKind::Collection, TargetKind::Slot) => Some(Route::Assign),
        (SourceKind::Collection, TargetKind::Tier) => Some(Route::TierAssign),
        (SourceKind::Collection, TargetKind::Unranked) => None,
        (SourceKind::Slot, TargetKind::Slot) => Some(Route::Relocate),
        (SourceKind::Slot, TargetKind::Tier) => Some(Route::GridToTier),
        (SourceKind::Slot, TargetKind::Unranked) => None,
        (SourceKind::Tier, TargetKind::Slot) => Some(Route::TierToGrid),
        (SourceKind::Tier, TargetKind::Tier) => Some(Route::TierReorder),
        (SourceKind::Tier, TargetKind::Unranked) => Some(Route::Unrank),
        (SourceKind::Unranked, TargetKind::Slot) => None,
        (SourceKind::Unranked, TargetKind::Tier) => Some(Route::RankFromPool),
        (SourceKind::Unranked, TargetKind::Unranked) => None,
    }
}

/// Run a validated transfer against the ranking and tier state.
///
/// Preconditions were checked by the validator; any error surfacing here
/// is still reported as a rejection and the caller rolls state back.
pub(crate) fn dispatch(
    transfer: &ValidatedTransfer,
    source: &SourceDescriptor,
    target: &TargetDescriptor,
    ranking: &mut RankingStore,
    tiers: &mut TierState,
) -> Result<(), Rejection> {
    debug!("dispatch {:?}: {:?} -> {:?}", transfer.kind, source, target);
    match (transfer.kind, source, target) {
        (OperationKind::Assign, SourceDescriptor::Collection { .. }, TargetDescriptor::Slot { position }) => {
            let item = resolved(transfer)?;
            ranking.assign_to_position(item, *position).map_err(Rejection::from)?;
        }
        (
            OperationKind::Move | OperationKind::Swap,
            SourceDescriptor::Slot { position: from },
            TargetDescriptor::Slot { position: to },
        ) => {
            let outcome = ranking.move_position(*from, *to).map_err(Rejection::from)?;
            let expected = if transfer.kind == OperationKind::Move { MoveOutcome::Moved } else { MoveOutcome::Swapped };
            if outcome != expected {
                return Err(Rejection::new(ErrorCode::PositionOccupiedIncompatible, "target occupancy changed"));
            }
        }
        (OperationKind::TierAssign, SourceDescriptor::Collection { item_id, .. }, TargetDescriptor::Tier { tier_id, index })
        | (OperationKind::RankFromPool, SourceDescriptor::Unranked { item_id }, TargetDescriptor::Tier { tier_id, index }) => {
            tiers.assign_to_tier(item_id, tier_id, *index).map_err(Rejection::from)?;
        }
        (
            OperationKind::TierMove,
            SourceDescriptor::Tier { tier_id, item_id },
            TargetDescriptor::Tier { index, .. },
        ) => {
            let ids = &tiers
                .tier(tier_id)
                .ok_or_else(|| Rejection::new(ErrorCode::ItemNotFound, format!("tier {tier_id} vanished")))?
                .item_ids;
            let from = ids
                .iter()
                .position(|id| id == item_id)
                .ok_or_else(|| Rejection::new(ErrorCode::ItemNotFound, format!("{item_id} left tier {tier_id}")))?;
            let last = ids.len().saturating_sub(1);
            let to = index.unwrap_or(last).min(last);
            tiers.move_within_tier(tier_id, from, to).map_err(Rejection::from)?;
        }
        (
            OperationKind::TierTransfer,
            SourceDescriptor::Tier { tier_id: from, item_id },
            TargetDescriptor::Tier { tier_id: to, index },
        ) => {
            tiers.move_between_tiers(item_id, from, to, *index).map_err(Rejection::from)?;
        }
        (OperationKind::Unrank, SourceDescriptor::Tier { item_id, .. }, TargetDescriptor::Unranked { index }) => {
            tiers.add_to_unranked(item_id, *index).map_err(Rejection::from)?;
        }
        (
            OperationKind::TierToGrid,
            SourceDescriptor::Tier { tier_id, item_id },
            TargetDescriptor::Slot { position },
        ) => {
            let item = resolved(transfer)?;
            if let Some(previous) = ranking.position_of(item_id) {
                ranking.remove_from_position(previous).map_err(Rejection::from)?;
            }
            tiers.remove_from_tier(item_id, tier_id).map_err(Rejection::from)?;
            ranking.assign_to_position(item, *position).map_err(Rejection::from)?;
        }
        (OperationKind::GridToTier, SourceDescriptor::Slot { position }, TargetDescriptor::Tier { tier_id, index }) => {
            let item_id = transfer
                .item_id
                .clone()
                .ok_or_else(|| Rejection::new(ErrorCode::ItemNotFound, format!("slot {position} is empty")))?;
            ranking.remove_from_position(*position).map_err(Rejection::from)?;
            tiers.assign_to_tier(&item_id, tier_id, *index).map_err(Rejection::from)?;
        }
        (kind, _, _) => {
            return Err(Rejection::new(
                ErrorCode::TargetTypeMismatch,
                format!("{kind:?} does not apply to this source/target pair"),
            ));
        }
    }
    Ok(())
}

fn resolved(transfer: &ValidatedTransfer) -> Result<TransferableItem, Rejection> {
    transfer
        .item
        .clone()
        .ok_or_else(|| Rejection::new(ErrorCode::ItemNotFound, "item could not be resolved"))
}

// ── Results ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "code", rename_all = "camelCase")]
pub enum ResultCode {
    Applied(OperationKind),
    Rejected(ErrorCode),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationContext {
    pub source: Option<SourceDescriptor>,
    pub target: Option<TargetDescriptor>,
    pub item_id: Option<String>,
    pub detail: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResult {
    pub code: ResultCode,
    pub context: OperationContext,
}

impl OperationResult {
    pub fn applied(kind: OperationKind, context: OperationContext) -> Self {
        OperationResult { code: ResultCode::Applied(kind), context }
    }

    pub fn rejected(code: ErrorCode, context: OperationContext) -> Self {
        OperationResult { code: ResultCode::Rejected(code), context }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.code, ResultCode::Applied(_))
    }

    pub fn kind(&self) -> Option<OperationKind> {
        match self.code {
            ResultCode::Applied(kind) => Some(kind),
            ResultCode::Rejected(_) => None,
        }
    }

    pub fn error(&self) -> Option<ErrorCode> {
        match self.code {
            ResultCode::Rejected(code) => Some(code),
            ResultCode::Applied(_) => None,
        }
    }
}

/// Consumer of every completed or rejected operation. Never feeds back
/// into engine behaviour.
pub trait NotificationSink {
    fn notify(&self, result: &OperationResult);
}

/// Default sink: one log line per operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, result: &OperationResult) {
        match result.code {
            ResultCode::Applied(kind) => {
                info!("operation {kind:?} applied (item {:?})", result.context.item_id)
            }
            ResultCode::Rejected(code) => {
                warn!("operation rejected: {code} {}", result.context.detail.as_deref().unwrap_or(""))
            }
        }
    }
}

impl NotificationSink for Sender<OperationResult> {
    fn notify(&self, result: &OperationResult) {
        // receiver gone means nobody is listening any more
        let _ = self.send(result.clone());
    }
}

// ── Drag session ───────────────────────────────────────────────────────

/// In-flight drag: set on drag start, consumed by drop, discarded by cancel.
#[derive(Clone, Debug, Default)]
pub struct DragSession {
    active: Option<SourceDescriptor>,
}

impl DragSession {
    /// Start a drag, replacing any stale one. Returns the replaced source.
    pub fn begin(&mut self, source: SourceDescriptor) -> Option<SourceDescriptor> {
        self.active.replace(source)
    }

    pub fn active(&self) -> Option<&SourceDescriptor> {
        self.active.as_ref()
    }

    pub fn take(&mut self) -> Option<SourceDescriptor> {
        self.active.take()
    }

    /// True when a drag was actually discarded.
    pub fn cancel(&mut self) -> bool {
        self.active.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn routes_cover_documented_pairs() {
        assert_eq!(route(SourceKind::Collection, TargetKind::Slot), Some(Route::Assign));
        assert_eq!(route(SourceKind::Slot, TargetKind::Slot), Some(Route::Relocate));
        assert_eq!(route(SourceKind::Tier, TargetKind::Tier), Some(Route::TierReorder));
        assert_eq!(route(SourceKind::Tier, TargetKind::Unranked), Some(Route::Unrank));
        assert_eq!(route(SourceKind::Unranked, TargetKind::Tier), Some(Route::RankFromPool));
        assert_eq!(route(SourceKind::Tier, TargetKind::Slot), Some(Route::TierToGrid));
        assert_eq!(route(SourceKind::Slot, TargetKind::Tier), Some(Route::GridToTier));
        assert_eq!(route(SourceKind::Unranked, TargetKind::Slot), None);
        assert_eq!(route(SourceKind::Collection, TargetKind::Unranked), None);
    }

    #[test]
    fn descriptors_deserialize_from_tagged_json() {
        let source: SourceDescriptor =
            serde_json::from_value(json!({ "type": "tier", "tierId": "S", "itemId": "a" })).unwrap();
        assert_eq!(source, SourceDescriptor::Tier { tier_id: "S".to_string(), item_id: "a".to_string() });

        let target: TargetDescriptor = serde_json::from_value(json!({ "type": "unranked" })).unwrap();
        assert_eq!(target, TargetDescriptor::Unranked { index: None });
    }

    #[test]
    fn result_codes_serialize_with_status() {
        let result = OperationResult::rejected(ErrorCode::UnknownRoute, OperationContext::default());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["code"]["status"], "rejected");
        assert_eq!(value["code"]["code"], "UNKNOWN_ROUTE");
        assert!(!result.is_success());
        assert_eq!(result.error(), Some(ErrorCode::UnknownRoute));
    }

    #[test]
    fn drag_session_lifecycle() {
        let mut session = DragSession::default();
        assert!(!session.cancel());
        session.begin(SourceDescriptor::Slot { position: 1 });
        assert!(session.active().is_some());
        assert!(session.cancel());
        assert!(session.take().is_none());
    }

    #[test]
    fn sender_sink_forwards_results() {
        let (tx, rx) = std::sync::mpsc::channel();
        tx.notify(&OperationResult::applied(OperationKind::Assign, OperationContext::default()));
        assert_eq!(rx.recv().unwrap().kind(), Some(OperationKind::Assign));
    }
}
