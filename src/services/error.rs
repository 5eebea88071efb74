use thiserror::Error;

use crate::game::{PlayerRef, RulesError, SessionId};
use crate::storage::StoreError;

/// Errors surfaced by the match services.
#[derive(Debug, Error)]
pub enum GameError {
    #[error("invalid move: {0}")]
    InvalidMove(#[source] RulesError),

    #[error("not your turn")]
    NotYourTurn,

    #[error("game is over")]
    GameAlreadyOver,

    #[error("game {0} not found")]
    SessionNotFound(SessionId),

    #[error("player {player} is not part of game {session}")]
    NotParticipant { session: SessionId, player: PlayerRef },

    #[error("players not connected")]
    PlayersNotConnected,

    #[error("game {0} already exists")]
    SessionAlreadyExists(SessionId),

    #[error("game {session} is inconsistent: {reason}")]
    Integrity { session: SessionId, reason: String },

    #[error("game {0} is halted after an integrity failure")]
    SessionHalted(SessionId),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Error families, each with its own propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected request; reported to the submitter, no state touched.
    Validation,
    /// Missing or mismatched target; reported to the caller.
    Lookup,
    /// Memory and durable state can no longer be trusted for this session.
    Integrity,
}

impl GameError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GameError::InvalidMove(_) | GameError::NotYourTurn | GameError::GameAlreadyOver => {
                ErrorKind::Validation
            }
            GameError::SessionNotFound(_)
            | GameError::NotParticipant { .. }
            | GameError::PlayersNotConnected
            | GameError::SessionAlreadyExists(_) => ErrorKind::Lookup,
            GameError::Integrity { .. } | GameError::SessionHalted(_) | GameError::Storage(_) => {
                ErrorKind::Integrity
            }
        }
    }
}
