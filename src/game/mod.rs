pub mod rules;
pub mod types;

pub use rules::{Position, RulesError, RulesOracle, StandardChess, Verdict};
pub use types::{Color, GameResult, GameStatus, MoveOutcome, MoveRecord, PlayerRef, SessionId};
