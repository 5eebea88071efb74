//! Core match data types shared by the services, the store and the transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Stable identifier of an authenticated participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerRef(Uuid);

impl PlayerRef {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for PlayerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PlayerRef {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of a match; the same value keys the durable match row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// Side to move once `plies` moves have been played.
    pub fn to_move_after(plies: usize) -> Self {
        if plies % 2 == 0 {
            Color::White
        } else {
            Color::Black
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

/// Lifecycle of a match. Only `InProgress -> Finished | Aborted` is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    InProgress,
    Finished,
    Aborted,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameStatus::InProgress => "in_progress",
            GameStatus::Finished => "finished",
            GameStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(GameStatus::InProgress),
            "finished" => Some(GameStatus::Finished),
            "aborted" => Some(GameStatus::Aborted),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, GameStatus::InProgress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameResult {
    WhiteWin,
    BlackWin,
    Draw,
    Undetermined,
}

impl GameResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameResult::WhiteWin => "white_win",
            GameResult::BlackWin => "black_win",
            GameResult::Draw => "draw",
            GameResult::Undetermined => "undetermined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "white_win" => Some(GameResult::WhiteWin),
            "black_win" => Some(GameResult::BlackWin),
            "draw" => Some(GameResult::Draw),
            "undetermined" => Some(GameResult::Undetermined),
            _ => None,
        }
    }

    pub fn win_for(color: Color) -> Self {
        match color {
            Color::White => GameResult::WhiteWin,
            Color::Black => GameResult::BlackWin,
        }
    }
}

/// What an accepted move did to the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Continue,
    Finished(GameResult),
}

/// One applied move, written through to the store before the move is acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveRecord {
    pub session_id: SessionId,
    /// 1-based ply number.
    pub sequence_number: u32,
    pub notation: String,
    pub player: PlayerRef,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_follows_ply_parity() {
        assert_eq!(Color::to_move_after(0), Color::White);
        assert_eq!(Color::to_move_after(1), Color::Black);
        assert_eq!(Color::to_move_after(2), Color::White);
        assert_eq!(Color::to_move_after(7), Color::Black);
    }

    #[test]
    fn test_status_and_result_strings_match_storage_format() {
        for status in [GameStatus::InProgress, GameStatus::Finished, GameStatus::Aborted] {
            assert_eq!(GameStatus::parse(status.as_str()), Some(status));
        }
        for result in [
            GameResult::WhiteWin,
            GameResult::BlackWin,
            GameResult::Draw,
            GameResult::Undetermined,
        ] {
            assert_eq!(GameResult::parse(result.as_str()), Some(result));
        }
        assert_eq!(GameStatus::parse("running"), None);
    }

    #[test]
    fn test_enums_serialize_like_the_envelope() {
        assert_eq!(serde_json::to_string(&GameStatus::InProgress).unwrap(), "\"in_progress\"");
        assert_eq!(serde_json::to_string(&GameResult::BlackWin).unwrap(), "\"black_win\"");
        assert_eq!(serde_json::to_string(&Color::White).unwrap(), "\"white\"");
    }

    #[test]
    fn test_ids_parse_from_display() {
        let player = PlayerRef::random();
        assert_eq!(player.to_string().parse::<PlayerRef>().unwrap(), player);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }
}
