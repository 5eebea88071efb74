//! Volatile match store, used by tests and `--in-memory-store` runs.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{move_row_from, new_match_row, MatchRow, MatchStore, MoveRow, StoreError, StoredMatch};
use crate::game::{GameResult, GameStatus, MoveRecord, PlayerRef, SessionId};

#[derive(Debug, Default)]
struct MemoryState {
    matches: HashMap<SessionId, MatchRow>,
    moves: HashMap<SessionId, Vec<MoveRow>>,
}

#[derive(Debug, Default)]
pub struct MemoryMatchStore {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

impl MemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every write fails without touching the stored state.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

impl MatchStore for MemoryMatchStore {
    fn create_match(&self, white: PlayerRef, black: PlayerRef) -> Result<MatchRow, StoreError> {
        self.check_writable()?;
        let row = new_match_row(white, black);
        let mut state = self.state();
        state.matches.insert(row.id, row.clone());
        state.moves.insert(row.id, Vec::new());
        Ok(row)
    }

    fn load_match(&self, id: SessionId) -> Result<Option<StoredMatch>, StoreError> {
        let state = self.state();
        Ok(state.matches.get(&id).map(|row| {
            let mut moves = state.moves.get(&id).cloned().unwrap_or_default();
            moves.sort_by_key(|m| m.sequence_number);
            StoredMatch {
                row: row.clone(),
                moves,
            }
        }))
    }

    fn record_move(
        &self,
        record: &MoveRecord,
        finish: Option<(GameStatus, GameResult)>,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.state();
        let state = &mut *state;

        let row = state
            .matches
            .get_mut(&record.session_id)
            .ok_or(StoreError::MatchNotFound(record.session_id))?;
        let moves = state.moves.entry(record.session_id).or_default();
        if moves
            .iter()
            .any(|m| m.sequence_number == record.sequence_number)
        {
            return Err(StoreError::DuplicateMove {
                session: record.session_id,
                sequence: record.sequence_number,
            });
        }

        moves.push(move_row_from(record));
        if let Some((status, result)) = finish {
            row.status = status;
            row.result = result;
        }
        row.updated_at = Utc::now();
        Ok(())
    }

    fn finish_match(
        &self,
        id: SessionId,
        status: GameStatus,
        result: GameResult,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut state = self.state();
        let row = state
            .matches
            .get_mut(&id)
            .ok_or(StoreError::MatchNotFound(id))?;
        row.status = status;
        row.result = result;
        row.updated_at = Utc::now();
        Ok(())
    }

    fn matches_for_player(&self, player: PlayerRef) -> Result<Vec<MatchRow>, StoreError> {
        let state = self.state();
        let mut rows: Vec<MatchRow> = state
            .matches
            .values()
            .filter(|m| m.white_player_id == player || m.black_player_id == player)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}
