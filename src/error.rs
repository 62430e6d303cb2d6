use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Codes reported to the notification sink when an operation is rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ItemNotFound,
    ItemAlreadyUsed,
    PositionOutOfBounds,
    PositionOccupiedIncompatible,
    TargetTypeMismatch,
    UnknownRoute,
    NoActiveOperation,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ItemNotFound => "ITEM_NOT_FOUND",
            ErrorCode::ItemAlreadyUsed => "ITEM_ALREADY_USED",
            ErrorCode::PositionOutOfBounds => "POSITION_OUT_OF_BOUNDS",
            ErrorCode::PositionOccupiedIncompatible => "POSITION_OCCUPIED_INCOMPATIBLE",
            ErrorCode::TargetTypeMismatch => "TARGET_TYPE_MISMATCH",
            ErrorCode::UnknownRoute => "UNKNOWN_ROUTE",
            ErrorCode::NoActiveOperation => "NO_ACTIVE_OPERATION",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ranking store failures. The store is untouched whenever one is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("position {position} is out of bounds for a ranking of {len}")]
    OutOfBounds { position: usize, len: usize },
    #[error("position {0} is already occupied")]
    Occupied(usize),
    #[error("position {0} is empty")]
    Empty(usize),
    #[error("source and target are both position {0}")]
    SamePosition(usize),
    #[error("record has no usable item id")]
    InvalidItem,
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::OutOfBounds { .. } => ErrorCode::PositionOutOfBounds,
            StoreError::Occupied(_) => ErrorCode::PositionOccupiedIncompatible,
            StoreError::Empty(_) => ErrorCode::ItemNotFound,
            StoreError::SamePosition(_) => ErrorCode::PositionOccupiedIncompatible,
            StoreError::InvalidItem => ErrorCode::ItemNotFound,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TierError {
    #[error("tier {0} does not exist")]
    UnknownTier(String),
    #[error("item {item_id} is not in {container}")]
    NotInContainer { item_id: String, container: String },
    #[error("index {index} is out of bounds for {container} holding {len} items")]
    IndexOutOfBounds { index: usize, len: usize, container: String },
}

impl TierError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TierError::UnknownTier(_) => ErrorCode::TargetTypeMismatch,
            TierError::NotInContainer { .. } => ErrorCode::ItemNotFound,
            TierError::IndexOutOfBounds { .. } => ErrorCode::PositionOutOfBounds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BracketError {
    #[error("bracket size {0} must be a power of two and at least 2")]
    InvalidSize(usize),
    #[error("bracket needs at least two candidates, got {0}")]
    NotEnoughCandidates(usize),
    #[error("no bracket is active")]
    NoBracket,
    #[error("matchup {0} not found")]
    UnknownMatchup(String),
    #[error("matchup {matchup_id} belongs to round {round_index}, current round is {current_round}")]
    NotCurrentRound { matchup_id: String, round_index: usize, current_round: usize },
    #[error("matchup {0} is already complete")]
    AlreadyComplete(String),
    #[error("matchup {0} is still waiting on a participant")]
    MissingParticipants(String),
    #[error("{winner_id} is not a participant of matchup {matchup_id}")]
    WinnerNotInMatchup { matchup_id: String, winner_id: String },
    #[error("bracket is not complete")]
    Incomplete,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("read snapshot {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("write snapshot {path}: {source}")]
    Write { path: String, source: std::io::Error },
    #[error("parse snapshot {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
    #[error("encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("snapshot version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}
