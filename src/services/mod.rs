//! Match orchestration: matchmaking queue, live sessions and move dispatch.

pub mod connection;
pub mod envelope;
pub mod error;
pub mod game_session;
pub mod match_queue;
pub mod orchestrator;
pub mod session_registry;

pub use connection::{ConnectionHandle, ConnectionId, Outbound, TransportError};
pub use envelope::{ErrorEnvelope, GameEnvelope, MatchFound, SessionSnapshot};
pub use error::{ErrorKind, GameError};
pub use game_session::{GameSession, MoveReceipt};
pub use match_queue::{MatchQueue, PairSignal, QueueEntry};
pub use orchestrator::MatchOrchestrator;
pub use session_registry::GameSessionRegistry;
