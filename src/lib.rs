//! # Chess Party
//!
//! Matchmaking and live game sessions for two-player chess.
//!
//! ## Features
//!
//! - **Matchmaking**: FIFO queue pairing waiting players, first arrival plays white
//! - **Game Sessions**: per-match turn state machine with write-through persistence
//! - **Realtime Dispatch**: moves fanned out over websockets in the order they were accepted
//! - **Persistence**: SQLite match and move history, rehydrated after a restart
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chess_party::{
//!     game::StandardChess,
//!     services::MatchOrchestrator,
//!     storage::SqliteMatchStore,
//! };
//!
//! # fn main() -> chess_party::Result<()> {
//! let store = Arc::new(SqliteMatchStore::new("data/chess_party.db")?);
//! let orchestrator = MatchOrchestrator::new(store, Arc::new(StandardChess));
//! # let _ = orchestrator;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// PUBLIC API MODULES
// ============================================================================

/// Bearer token verification
pub mod auth;

/// Identifiers, game outcomes and the rules oracle
pub mod game;

/// Logger setup
pub mod logging;

/// HTTP and websocket transport
pub mod servers;

/// Matchmaking, sessions and move dispatch
pub mod services;

/// Durable match history
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use servers::{GameServer, GameServerConfig, HeartbeatConfig};
pub use services::{GameError, MatchOrchestrator};
pub use storage::{MatchStore, StoreError};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Main error type for the Chess Party library
#[derive(Debug, thiserror::Error)]
pub enum ChessPartyError {
    #[error("Game error: {0}")]
    Game(#[from] GameError),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Server error: {0}")]
    Server(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, ChessPartyError>;

// ============================================================================
// LIBRARY VERSION INFO
// ============================================================================

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Library description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
