//! Move-legality and outcome oracle.
//!
//! The services never look inside a [`Position`]; they hand it back to the
//! oracle that produced it. [`StandardChess`] backs positions with `shakmaty`
//! and encodes them as a FEN line followed by one line per earlier position
//! since the last pawn move or capture, so repetitions stay visible. Moves are
//! UCI notation (`e2e4`, `e7e8q`).

use shakmaty::{
    fen::Fen, uci::UciMove, CastlingMode, Chess, EnPassantMode, Move,
    Position as ShakmatyPosition,
};
use thiserror::Error;

use super::types::GameResult;

/// Opaque game position. Only the oracle that created it can interpret it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position(String);

impl Position {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Oracle's view of whether a position ends the game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Undetermined,
    WhiteWins,
    BlackWins,
    Draw,
}

impl Verdict {
    /// Decisive verdicts map to a final result; `Undetermined` maps to `None`.
    pub fn final_result(self) -> Option<GameResult> {
        match self {
            Verdict::Undetermined => None,
            Verdict::WhiteWins => Some(GameResult::WhiteWin),
            Verdict::BlackWins => Some(GameResult::BlackWin),
            Verdict::Draw => Some(GameResult::Draw),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RulesError {
    #[error("malformed move notation: {0:?}")]
    Malformed(String),

    #[error("illegal move: {0}")]
    Illegal(String),

    #[error("corrupt position: {0}")]
    CorruptPosition(String),
}

pub trait RulesOracle: Send + Sync {
    /// Position every new match starts from.
    fn initial_position(&self) -> Position;

    /// Checks that `notation` decodes against `position` and is legal there.
    fn validate(&self, position: &Position, notation: &str) -> Result<(), RulesError>;

    /// Returns the position after playing `notation`.
    fn apply(&self, position: &Position, notation: &str) -> Result<Position, RulesError>;

    fn verdict(&self, position: &Position) -> Verdict;
}

/// Halfmoves without a pawn move or capture after which the game is drawn.
const SEVENTY_FIVE_MOVE_HALFMOVES: u32 = 150;

/// Occurrences of the same position after which the game is drawn.
const FIVEFOLD_REPETITION: usize = 5;

/// Standard chess rules via `shakmaty`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardChess;

impl StandardChess {
    fn load(position: &Position) -> Result<Chess, RulesError> {
        let fen: Fen = position
            .as_str()
            .lines()
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|e| RulesError::CorruptPosition(format!("{e}")))?;
        fen.into_position(CastlingMode::Standard)
            .map_err(|e| RulesError::CorruptPosition(format!("{e}")))
    }

    /// Keys of the positions reached before the current one.
    fn earlier_keys(position: &Position) -> impl Iterator<Item = &str> {
        position.as_str().lines().skip(1)
    }

    /// Placement, side to move, castling rights and en passant square; the
    /// fields that decide whether two positions repeat.
    fn repetition_key(chess: &Chess) -> String {
        Fen::from_position(chess.clone(), EnPassantMode::Legal)
            .to_string()
            .split_whitespace()
            .take(4)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn encode<'a>(chess: Chess, earlier: impl IntoIterator<Item = &'a str>) -> Position {
        let mut encoded = Fen::from_position(chess, EnPassantMode::Legal).to_string();
        for key in earlier {
            encoded.push('\n');
            encoded.push_str(key);
        }
        Position(encoded)
    }

    fn decode_move(chess: &Chess, notation: &str) -> Result<Move, RulesError> {
        let uci: UciMove = notation
            .parse()
            .map_err(|_| RulesError::Malformed(notation.to_string()))?;
        uci.to_move(chess)
            .map_err(|_| RulesError::Illegal(notation.to_string()))
    }
}

impl RulesOracle for StandardChess {
    fn initial_position(&self) -> Position {
        Self::encode(Chess::default(), [])
    }

    fn validate(&self, position: &Position, notation: &str) -> Result<(), RulesError> {
        let chess = Self::load(position)?;
        Self::decode_move(&chess, notation).map(|_| ())
    }

    fn apply(&self, position: &Position, notation: &str) -> Result<Position, RulesError> {
        let chess = Self::load(position)?;
        let m = Self::decode_move(&chess, notation)?;
        let current = Self::repetition_key(&chess);
        let next = chess
            .play(&m)
            .map_err(|_| RulesError::Illegal(notation.to_string()))?;

        // A pawn move or capture means no earlier position can recur.
        if next.halfmoves() == 0 {
            return Ok(Self::encode(next, []));
        }
        let earlier = Self::earlier_keys(position).chain(std::iter::once(current.as_str()));
        Ok(Self::encode(next, earlier))
    }

    fn verdict(&self, position: &Position) -> Verdict {
        let Ok(chess) = Self::load(position) else {
            return Verdict::Undetermined;
        };
        if chess.is_checkmate() {
            // The side to move is mated.
            match chess.turn() {
                shakmaty::Color::White => Verdict::BlackWins,
                shakmaty::Color::Black => Verdict::WhiteWins,
            }
        } else if chess.is_stalemate()
            || chess.is_insufficient_material()
            || chess.halfmoves() >= SEVENTY_FIVE_MOVE_HALFMOVES
        {
            Verdict::Draw
        } else {
            let key = Self::repetition_key(&chess);
            let seen = 1 + Self::earlier_keys(position).filter(|k| *k == key).count();
            if seen >= FIVEFOLD_REPETITION {
                Verdict::Draw
            } else {
                Verdict::Undetermined
            }
        }
    }
}
