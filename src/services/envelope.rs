//! JSON messages exchanged over the realtime sockets.

use serde::{Deserialize, Serialize};

use crate::game::{Color, GameResult, GameStatus, SessionId};

/// Point-in-time view of a session, taken under the session lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: GameStatus,
    pub result: GameResult,
    pub history: Vec<String>,
    pub current_turn: Color,
}

/// State envelope sent on attach, after every move and on rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEnvelope {
    pub ok: bool,
    pub status: GameStatus,
    pub result: GameResult,
    pub history_move: Vec<String>,
    pub current_move: Color,
    #[serde(rename = "move", default, skip_serializing_if = "Option::is_none")]
    pub last_move: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl GameEnvelope {
    pub fn state(snapshot: &SessionSnapshot) -> Self {
        Self {
            ok: true,
            status: snapshot.status,
            result: snapshot.result,
            history_move: snapshot.history.clone(),
            current_move: snapshot.current_turn,
            last_move: None,
            message: None,
        }
    }

    pub fn moved(snapshot: &SessionSnapshot, notation: &str) -> Self {
        Self {
            last_move: Some(notation.to_string()),
            ..Self::state(snapshot)
        }
    }

    pub fn rejected(snapshot: &SessionSnapshot, reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: Some(reason.into()),
            ..Self::state(snapshot)
        }
    }
}

/// Sent on the matchmaking socket once a pair has been formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFound {
    #[serde(rename = "gameID")]
    pub game_id: SessionId,
}

/// Sent when a request cannot be tied to a session state at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
}
