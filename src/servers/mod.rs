// Modules for server components
pub mod game_server;

// Re-export public APIs
pub use game_server::{
    create_router, AppState, AuthenticatedPlayer, GameServer, GameServerConfig, HeartbeatConfig,
};
