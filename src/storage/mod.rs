//! Durable match and move records.
//!
//! The in-memory sessions are authoritative while a match is live; the store
//! is what a restarted process rehydrates from, so every accepted move is
//! written through before it is acknowledged.

pub mod memory;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::game::{GameResult, GameStatus, MoveRecord, PlayerRef, SessionId};

pub use memory::MemoryMatchStore;
pub use sqlite::SqliteMatchStore;

/// Persisted match row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchRow {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: GameStatus,
    pub result: GameResult,
    pub white_player_id: PlayerRef,
    pub black_player_id: PlayerRef,
}

/// Persisted move row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveRow {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub game_id: SessionId,
    pub user_id: PlayerRef,
    pub sequence_number: u32,
    pub notation: String,
}

/// A match row with its moves in sequence order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMatch {
    #[serde(flatten)]
    pub row: MatchRow,
    pub moves: Vec<MoveRow>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("match {0} not found")]
    MatchNotFound(SessionId),

    #[error("move {sequence} already recorded for match {session}")]
    DuplicateMove { session: SessionId, sequence: u32 },

    #[error("corrupt {table} row: {reason}")]
    CorruptRow { table: &'static str, reason: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub trait MatchStore: Send + Sync {
    /// Creates an in-progress match row with a fresh id.
    fn create_match(&self, white: PlayerRef, black: PlayerRef) -> Result<MatchRow, StoreError>;

    /// Loads a match and its moves, `None` if the match does not exist.
    fn load_match(&self, id: SessionId) -> Result<Option<StoredMatch>, StoreError>;

    /// Appends a move and, if `finish` is set, finalizes the match in the same
    /// transaction. Either both writes land or neither does.
    fn record_move(
        &self,
        record: &MoveRecord,
        finish: Option<(GameStatus, GameResult)>,
    ) -> Result<(), StoreError>;

    /// Finalizes a match without a move (abandonment).
    fn finish_match(
        &self,
        id: SessionId,
        status: GameStatus,
        result: GameResult,
    ) -> Result<(), StoreError>;

    /// Every match the player took part in, newest first.
    fn matches_for_player(&self, player: PlayerRef) -> Result<Vec<MatchRow>, StoreError>;
}

fn new_match_row(white: PlayerRef, black: PlayerRef) -> MatchRow {
    let now = Utc::now();
    MatchRow {
        id: SessionId::random(),
        created_at: now,
        updated_at: now,
        status: GameStatus::InProgress,
        result: GameResult::Undetermined,
        white_player_id: white,
        black_player_id: black,
    }
}

fn move_row_from(record: &MoveRecord) -> MoveRow {
    MoveRow {
        id: Uuid::new_v4(),
        created_at: record.created_at,
        game_id: record.session_id,
        user_id: record.player,
        sequence_number: record.sequence_number,
        notation: record.notation.clone(),
    }
}
