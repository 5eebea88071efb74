//! One match's turn state machine.
//!
//! Every mutation of a session goes through its own lock, so moves on one
//! session are totally ordered while different sessions never contend.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::connection::{ConnectionHandle, ConnectionId};
use super::envelope::{GameEnvelope, SessionSnapshot};
use super::error::GameError;
use crate::game::{
    Color, GameResult, GameStatus, MoveOutcome, MoveRecord, PlayerRef, Position, RulesOracle,
    SessionId,
};
use crate::storage::{MatchStore, StoredMatch};

/// A side's seat. `joined` stays set once the player has attached a game
/// connection; `connection` is the latest one and may have gone stale.
#[derive(Debug, Default)]
struct Seat {
    joined: bool,
    connection: Option<ConnectionHandle>,
}

impl Seat {
    fn live_connection(&self) -> Option<&ConnectionHandle> {
        self.connection.as_ref().filter(|c| c.is_open())
    }
}

#[derive(Debug)]
struct SessionState {
    position: Position,
    history: Vec<String>,
    status: GameStatus,
    result: GameResult,
    white: Seat,
    black: Seat,
    halted: bool,
}

impl SessionState {
    fn current_turn(&self) -> Color {
        Color::to_move_after(self.history.len())
    }

    fn seat(&self, color: Color) -> &Seat {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    fn seat_mut(&mut self, color: Color) -> &mut Seat {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            result: self.result,
            history: self.history.clone(),
            current_turn: self.current_turn(),
        }
    }
}

/// Result of an accepted move.
#[derive(Debug, Clone)]
pub struct MoveReceipt {
    pub outcome: MoveOutcome,
    /// Envelope for the mover; the opponent has already been sent its copy.
    pub envelope: GameEnvelope,
}

pub struct GameSession {
    id: SessionId,
    created_at: DateTime<Utc>,
    white: PlayerRef,
    black: PlayerRef,
    oracle: Arc<dyn RulesOracle>,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("id", &self.id)
            .field("white", &self.white)
            .field("black", &self.black)
            .finish_non_exhaustive()
    }
}

impl GameSession {
    /// Fresh session: empty history, white to move, in progress.
    pub fn new(
        id: SessionId,
        created_at: DateTime<Utc>,
        white: PlayerRef,
        black: PlayerRef,
        oracle: Arc<dyn RulesOracle>,
    ) -> Self {
        let position = oracle.initial_position();
        Self {
            id,
            created_at,
            white,
            black,
            oracle,
            state: Mutex::new(SessionState {
                position,
                history: Vec::new(),
                status: GameStatus::InProgress,
                result: GameResult::Undetermined,
                white: Seat::default(),
                black: Seat::default(),
                halted: false,
            }),
        }
    }

    /// Rebuilds a session by replaying its stored moves from the initial position.
    ///
    /// A gap in the sequence numbers, a move that no longer replays, or a row
    /// whose status and result disagree is an integrity error.
    pub fn rehydrate(stored: &StoredMatch, oracle: Arc<dyn RulesOracle>) -> Result<Self, GameError> {
        let row = &stored.row;
        let integrity = |reason: String| GameError::Integrity {
            session: row.id,
            reason,
        };

        if row.status.is_terminal() == (row.result == GameResult::Undetermined) {
            return Err(integrity(format!(
                "stored status {} does not agree with result {}",
                row.status.as_str(),
                row.result.as_str()
            )));
        }

        let mut position = oracle.initial_position();
        let mut history = Vec::with_capacity(stored.moves.len());
        for (index, stored_move) in stored.moves.iter().enumerate() {
            let expected = index as u32 + 1;
            if stored_move.sequence_number != expected {
                return Err(integrity(format!(
                    "expected move {expected}, found {}",
                    stored_move.sequence_number
                )));
            }
            let mover = match Color::to_move_after(index) {
                Color::White => row.white_player_id,
                Color::Black => row.black_player_id,
            };
            if stored_move.user_id != mover {
                return Err(integrity(format!(
                    "move {expected} was recorded for the wrong player"
                )));
            }
            position = oracle
                .apply(&position, &stored_move.notation)
                .map_err(|e| integrity(format!("move {expected} does not replay: {e}")))?;
            history.push(stored_move.notation.clone());
        }

        Ok(Self {
            id: row.id,
            created_at: row.created_at,
            white: row.white_player_id,
            black: row.black_player_id,
            oracle,
            state: Mutex::new(SessionState {
                position,
                history,
                status: row.status,
                result: row.result,
                white: Seat::default(),
                black: Seat::default(),
                halted: false,
            }),
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn white_player(&self) -> PlayerRef {
        self.white
    }

    pub fn black_player(&self) -> PlayerRef {
        self.black
    }

    pub fn color_of(&self, player: PlayerRef) -> Option<Color> {
        if player == self.white {
            Some(Color::White)
        } else if player == self.black {
            Some(Color::Black)
        } else {
            None
        }
    }

    fn player_of(&self, color: Color) -> PlayerRef {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    fn participant(&self, player: PlayerRef) -> Result<Color, GameError> {
        self.color_of(player).ok_or(GameError::NotParticipant {
            session: self.id,
            player,
        })
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn status(&self) -> GameStatus {
        self.state.lock().await.status
    }

    pub async fn current_mover(&self) -> PlayerRef {
        let state = self.state.lock().await;
        self.player_of(state.current_turn())
    }

    pub async fn both_connected(&self) -> bool {
        let state = self.state.lock().await;
        state.white.joined && state.black.joined
    }

    /// The opponent's live connection, if it has one.
    pub async fn opponent(&self, player: PlayerRef) -> Result<Option<ConnectionHandle>, GameError> {
        let color = self.participant(player)?;
        let state = self.state.lock().await;
        Ok(state.seat(color.opposite()).live_connection().cloned())
    }

    /// A session can leave memory once the store already holds its final state.
    pub async fn is_evictable(&self) -> bool {
        let state = self.state.lock().await;
        state.status.is_terminal() || state.halted
    }

    async fn has_live_connection(&self) -> bool {
        let state = self.state.lock().await;
        state.white.live_connection().is_some() || state.black.live_connection().is_some()
    }

    /// Seats `connection` for `player` (replacing any previous one) and sends it
    /// the full state.
    pub async fn set_connection(
        &self,
        player: PlayerRef,
        connection: ConnectionHandle,
    ) -> Result<SessionSnapshot, GameError> {
        let color = self.participant(player)?;
        let mut state = self.state.lock().await;
        let snapshot = state.snapshot();
        if let Err(e) = connection.send_json(&GameEnvelope::state(&snapshot)) {
            log::warn!("game {}: initial state not delivered to {}: {}", self.id, player, e);
        }
        let seat = state.seat_mut(color);
        seat.joined = true;
        seat.connection = Some(connection);
        Ok(snapshot)
    }

    /// Forgets `connection` if it is still the one seated. Returns whether it was.
    pub async fn clear_connection(&self, connection: ConnectionId) -> bool {
        let mut state = self.state.lock().await;
        for color in [Color::White, Color::Black] {
            let seat = state.seat_mut(color);
            if seat.connection.as_ref().map(|c| c.id()) == Some(connection) {
                seat.connection = None;
                return true;
            }
        }
        false
    }

    /// Checks `notation` against the current position. Never mutates.
    pub async fn validate_move(&self, notation: &str) -> Result<(), GameError> {
        let state = self.state.lock().await;
        self.oracle
            .validate(&state.position, notation.trim())
            .map_err(GameError::InvalidMove)
    }

    /// Applies a move for `player` and writes it through to `store`.
    pub async fn apply_move(
        &self,
        player: PlayerRef,
        notation: &str,
        store: &dyn MatchStore,
    ) -> Result<MoveOutcome, GameError> {
        let mut state = self.state.lock().await;
        self.apply_locked(&mut state, player, notation.trim(), store)
    }

    /// Full move submission: both players must have joined; on success the
    /// opponent is sent the new state before the lock is released, so fan-out
    /// follows move order.
    pub async fn submit_move(
        &self,
        player: PlayerRef,
        notation: &str,
        store: &dyn MatchStore,
    ) -> Result<MoveReceipt, GameError> {
        let notation = notation.trim();
        let mut state = self.state.lock().await;

        if !(state.white.joined && state.black.joined) {
            return Err(GameError::PlayersNotConnected);
        }

        let outcome = self.apply_locked(&mut state, player, notation, store)?;
        let envelope = GameEnvelope::moved(&state.snapshot(), notation);

        let color = self.participant(player)?;
        if let Some(opponent) = state.seat(color.opposite()).live_connection() {
            if let Err(e) = opponent.send_json(&envelope) {
                log::warn!("game {}: fan-out to {} failed: {}", self.id, opponent.player(), e);
            }
        }

        Ok(MoveReceipt { outcome, envelope })
    }

    fn apply_locked(
        &self,
        state: &mut SessionState,
        player: PlayerRef,
        notation: &str,
        store: &dyn MatchStore,
    ) -> Result<MoveOutcome, GameError> {
        if state.halted {
            return Err(GameError::SessionHalted(self.id));
        }
        let color = self.participant(player)?;
        if color != state.current_turn() {
            return Err(GameError::NotYourTurn);
        }
        if state.status != GameStatus::InProgress {
            return Err(GameError::GameAlreadyOver);
        }

        self.oracle
            .validate(&state.position, notation)
            .map_err(GameError::InvalidMove)?;
        let next = self
            .oracle
            .apply(&state.position, notation)
            .map_err(GameError::InvalidMove)?;
        let final_result = self.oracle.verdict(&next).final_result();

        let record = MoveRecord {
            session_id: self.id,
            sequence_number: state.history.len() as u32 + 1,
            notation: notation.to_string(),
            player,
            created_at: Utc::now(),
        };
        let finish = final_result.map(|result| (GameStatus::Finished, result));

        let previous = std::mem::replace(&mut state.position, next);
        state.history.push(record.notation.clone());
        if let Some((status, result)) = finish {
            state.status = status;
            state.result = result;
        }

        if let Err(e) = store.record_move(&record, finish) {
            state.position = previous;
            state.history.pop();
            state.status = GameStatus::InProgress;
            state.result = GameResult::Undetermined;
            state.halted = true;
            log::error!(
                "game {}: move {} ({}) not persisted, rolled back and halted: {}",
                self.id,
                record.sequence_number,
                record.notation,
                e
            );
            return Err(GameError::Integrity {
                session: self.id,
                reason: format!("move {} was not persisted: {e}", record.sequence_number),
            });
        }

        log::debug!(
            "game {}: {:?} played {} (move {})",
            self.id,
            color,
            record.notation,
            record.sequence_number
        );

        Ok(match final_result {
            Some(result) => {
                log::info!("game {} finished: {}", self.id, result.as_str());
                MoveOutcome::Finished(result)
            }
            None => MoveOutcome::Continue,
        })
    }

    /// `player` abandons the match: it ends as aborted and the other side wins.
    /// The opponent is sent the final state.
    pub async fn abort(
        &self,
        player: PlayerRef,
        store: &dyn MatchStore,
    ) -> Result<SessionSnapshot, GameError> {
        let color = self.participant(player)?;
        let mut state = self.state.lock().await;
        if state.halted {
            return Err(GameError::SessionHalted(self.id));
        }
        if state.status != GameStatus::InProgress {
            return Err(GameError::GameAlreadyOver);
        }

        let result = GameResult::win_for(color.opposite());
        store.finish_match(self.id, GameStatus::Aborted, result)?;
        state.status = GameStatus::Aborted;
        state.result = result;
        log::info!("game {} aborted by {}", self.id, player);

        let snapshot = state.snapshot();
        if let Some(opponent) = state.seat(color.opposite()).live_connection() {
            if let Err(e) = opponent.send_json(&GameEnvelope::state(&snapshot)) {
                log::warn!("game {}: abort notice to {} failed: {}", self.id, opponent.player(), e);
            }
        }
        Ok(snapshot)
    }

    /// Whether nothing is attached any more and the store holds the final state.
    pub(crate) async fn is_idle_and_done(&self) -> bool {
        self.is_evictable().await && !self.has_live_connection().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::StandardChess;
    use crate::services::connection::Outbound;
    use crate::storage::{MatchStore, MemoryMatchStore};
    use assert_matches::assert_matches;

    struct Fixture {
        store: MemoryMatchStore,
        session: GameSession,
        white: PlayerRef,
        black: PlayerRef,
    }

    fn fixture() -> Fixture {
        let store = MemoryMatchStore::new();
        let white = PlayerRef::random();
        let black = PlayerRef::random();
        let row = store.create_match(white, black).unwrap();
        let session = GameSession::new(row.id, row.created_at, white, black, Arc::new(StandardChess));
        Fixture {
            store,
            session,
            white,
            black,
        }
    }

    #[tokio::test]
    async fn test_new_session_starts_with_white() {
        let f = fixture();
        let snap = f.session.snapshot().await;
        assert_eq!(snap.status, GameStatus::InProgress);
        assert_eq!(snap.result, GameResult::Undetermined);
        assert_eq!(snap.current_turn, Color::White);
        assert!(snap.history.is_empty());
        assert_eq!(f.session.current_mover().await, f.white);
    }

    #[tokio::test]
    async fn test_turns_alternate_with_history_parity() {
        let f = fixture();
        for (i, (player, mv)) in [(f.white, "e2e4"), (f.black, "e7e5"), (f.white, "g1f3")]
            .into_iter()
            .enumerate()
        {
            let outcome = f.session.apply_move(player, mv, &f.store).await.unwrap();
            assert_eq!(outcome, MoveOutcome::Continue);
            let snap = f.session.snapshot().await;
            assert_eq!(snap.history.len(), i + 1);
            assert_eq!(snap.current_turn == Color::White, snap.history.len() % 2 == 0);
        }
        assert_eq!(f.session.current_mover().await, f.black);
    }

    #[tokio::test]
    async fn test_wrong_turn_is_rejected_without_mutation() {
        let f = fixture();
        let before = f.session.snapshot().await;
        assert_matches!(
            f.session.apply_move(f.black, "e7e5", &f.store).await,
            Err(GameError::NotYourTurn)
        );
        assert_eq!(f.session.snapshot().await, before);
        assert!(f.store.load_match(f.session.id()).unwrap().unwrap().moves.is_empty());
    }

    #[tokio::test]
    async fn test_illegal_move_is_rejected_without_mutation() {
        let f = fixture();
        f.session.apply_move(f.white, "e2e4", &f.store).await.unwrap();
        let before = f.session.snapshot().await;

        assert_matches!(
            f.session.apply_move(f.black, "e7e4", &f.store).await,
            Err(GameError::InvalidMove(_))
        );
        assert_matches!(
            f.session.apply_move(f.black, "", &f.store).await,
            Err(GameError::InvalidMove(_))
        );
        assert_eq!(f.session.snapshot().await, before);
        assert_eq!(f.store.load_match(f.session.id()).unwrap().unwrap().moves.len(), 1);
    }

    #[tokio::test]
    async fn test_validate_move_never_mutates() {
        let f = fixture();
        f.session.validate_move("e2e4").await.unwrap();
        assert_matches!(f.session.validate_move("e2e5").await, Err(GameError::InvalidMove(_)));
        assert!(f.session.snapshot().await.history.is_empty());
    }

    #[tokio::test]
    async fn test_outsider_is_not_a_participant() {
        let f = fixture();
        assert_matches!(
            f.session.apply_move(PlayerRef::random(), "e2e4", &f.store).await,
            Err(GameError::NotParticipant { .. })
        );
    }

    #[tokio::test]
    async fn test_checkmate_finishes_game() {
        let f = fixture();
        for (player, mv) in [(f.white, "f2f3"), (f.black, "e7e5"), (f.white, "g2g4")] {
            f.session.apply_move(player, mv, &f.store).await.unwrap();
        }
        let outcome = f.session.apply_move(f.black, "d8h4", &f.store).await.unwrap();
        assert_eq!(outcome, MoveOutcome::Finished(GameResult::BlackWin));

        let snap = f.session.snapshot().await;
        assert_eq!(snap.status, GameStatus::Finished);
        assert_eq!(snap.result, GameResult::BlackWin);

        let stored = f.store.load_match(f.session.id()).unwrap().unwrap();
        assert_eq!(stored.row.status, GameStatus::Finished);
        assert_eq!(stored.row.result, GameResult::BlackWin);
        assert_eq!(stored.moves.len(), 4);

        // White is on move but the game is over.
        assert_matches!(
            f.session.apply_move(f.white, "e2e4", &f.store).await,
            Err(GameError::GameAlreadyOver)
        );
        assert!(f.session.is_evictable().await);
    }

    #[tokio::test]
    async fn test_fivefold_repetition_finishes_as_draw() {
        let f = fixture();
        let shuffle = [
            (f.white, "g1f3"),
            (f.black, "g8f6"),
            (f.white, "f3g1"),
            (f.black, "f6g8"),
        ];
        let mut last = MoveOutcome::Continue;
        for (i, (player, mv)) in shuffle.iter().cycle().take(16).enumerate() {
            assert_eq!(last, MoveOutcome::Continue, "game ended early at ply {i}");
            last = f.session.apply_move(*player, mv, &f.store).await.unwrap();
        }
        assert_eq!(last, MoveOutcome::Finished(GameResult::Draw));

        let snap = f.session.snapshot().await;
        assert_eq!(snap.status, GameStatus::Finished);
        assert_eq!(snap.result, GameResult::Draw);

        let stored = f.store.load_match(f.session.id()).unwrap().unwrap();
        assert_eq!(stored.row.status, GameStatus::Finished);
        assert_eq!(stored.row.result, GameResult::Draw);
        assert_matches!(
            f.session.apply_move(f.white, "g1f3", &f.store).await,
            Err(GameError::GameAlreadyOver)
        );
    }

    #[tokio::test]
    async fn test_persist_failure_rolls_back_and_halts() {
        let f = fixture();
        f.session.apply_move(f.white, "e2e4", &f.store).await.unwrap();
        let before = f.session.snapshot().await;

        f.store.set_fail_writes(true);
        assert_matches!(
            f.session.apply_move(f.black, "e7e5", &f.store).await,
            Err(GameError::Integrity { .. })
        );
        assert_eq!(f.session.snapshot().await, before);
        assert_eq!(f.session.current_mover().await, f.black);

        f.store.set_fail_writes(false);
        assert_matches!(
            f.session.apply_move(f.black, "e7e5", &f.store).await,
            Err(GameError::SessionHalted(_))
        );
        assert!(f.session.is_evictable().await);
    }

    #[tokio::test]
    async fn test_submit_requires_both_players() {
        let f = fixture();
        let (white_conn, _white_rx) = ConnectionHandle::new(f.white);
        f.session.set_connection(f.white, white_conn).await.unwrap();
        assert!(!f.session.both_connected().await);

        assert_matches!(
            f.session.submit_move(f.white, "e2e4", &f.store).await,
            Err(GameError::PlayersNotConnected)
        );
    }

    #[tokio::test]
    async fn test_submit_fans_out_to_opponent() {
        let f = fixture();
        let (white_conn, mut white_rx) = ConnectionHandle::new(f.white);
        let (black_conn, mut black_rx) = ConnectionHandle::new(f.black);
        f.session.set_connection(f.white, white_conn).await.unwrap();
        f.session.set_connection(f.black, black_conn).await.unwrap();

        // Both got the initial state on attach.
        assert_matches!(white_rx.try_recv(), Ok(Outbound::Text(_)));
        assert_matches!(black_rx.try_recv(), Ok(Outbound::Text(_)));

        let receipt = f.session.submit_move(f.white, " e2e4 ", &f.store).await.unwrap();
        assert_eq!(receipt.outcome, MoveOutcome::Continue);
        assert_eq!(receipt.envelope.last_move.as_deref(), Some("e2e4"));
        assert_eq!(receipt.envelope.current_move, Color::Black);

        let Ok(Outbound::Text(text)) = black_rx.try_recv() else {
            panic!("black should receive the move");
        };
        let envelope: GameEnvelope = serde_json::from_str(&text).unwrap();
        assert_eq!(envelope, receipt.envelope);
        // The mover is answered by the caller, not through the session.
        assert!(white_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_opponent_disconnect_does_not_block_moves() {
        let f = fixture();
        let (white_conn, white_rx) = ConnectionHandle::new(f.white);
        let (black_conn, _black_rx) = ConnectionHandle::new(f.black);
        f.session.set_connection(f.white, white_conn).await.unwrap();
        f.session.set_connection(f.black, black_conn).await.unwrap();
        drop(white_rx);

        f.session.submit_move(f.white, "e2e4", &f.store).await.unwrap();
        assert!(f.session.opponent(f.black).await.unwrap().is_none());
        let receipt = f.session.submit_move(f.black, "e7e5", &f.store).await.unwrap();
        assert_eq!(receipt.envelope.history_move, vec!["e2e4", "e7e5"]);
    }

    #[tokio::test]
    async fn test_clear_connection_only_matches_current_handle() {
        let f = fixture();
        let (old, _old_rx) = ConnectionHandle::new(f.white);
        let (new, _new_rx) = ConnectionHandle::new(f.white);
        f.session.set_connection(f.white, old.clone()).await.unwrap();
        f.session.set_connection(f.white, new.clone()).await.unwrap();

        assert!(!f.session.clear_connection(old.id()).await);
        assert!(f.session.clear_connection(new.id()).await);
        assert!(f.session.opponent(f.black).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_abort_awards_the_other_side() {
        let f = fixture();
        let (black_conn, mut black_rx) = ConnectionHandle::new(f.black);
        f.session.set_connection(f.black, black_conn).await.unwrap();
        let _ = black_rx.try_recv();

        let snap = f.session.abort(f.white, &f.store).await.unwrap();
        assert_eq!(snap.status, GameStatus::Aborted);
        assert_eq!(snap.result, GameResult::BlackWin);
        assert_matches!(black_rx.try_recv(), Ok(Outbound::Text(_)));

        let stored = f.store.load_match(f.session.id()).unwrap().unwrap();
        assert_eq!(stored.row.status, GameStatus::Aborted);
        assert_matches!(
            f.session.abort(f.black, &f.store).await,
            Err(GameError::GameAlreadyOver)
        );
    }

    #[tokio::test]
    async fn test_rehydrate_replays_history() {
        let f = fixture();
        for (player, mv) in [(f.white, "e2e4"), (f.black, "e7e5"), (f.white, "g1f3")] {
            f.session.apply_move(player, mv, &f.store).await.unwrap();
        }

        let stored = f.store.load_match(f.session.id()).unwrap().unwrap();
        let restored = GameSession::rehydrate(&stored, Arc::new(StandardChess)).unwrap();
        assert_eq!(restored.snapshot().await, f.session.snapshot().await);
        assert_eq!(restored.current_mover().await, f.black);
        // Nobody is seated after a restart.
        assert!(!restored.both_connected().await);
    }

    #[tokio::test]
    async fn test_rehydrate_rejects_unreplayable_history() {
        let f = fixture();
        f.store
            .record_move(
                &MoveRecord {
                    session_id: f.session.id(),
                    sequence_number: 1,
                    notation: "e2e5".to_string(),
                    player: f.white,
                    created_at: Utc::now(),
                },
                None,
            )
            .unwrap();

        let stored = f.store.load_match(f.session.id()).unwrap().unwrap();
        assert_matches!(
            GameSession::rehydrate(&stored, Arc::new(StandardChess)),
            Err(GameError::Integrity { .. })
        );
    }
}
