//! Integration tests for the Chess Party library public API

use chess_party::{
    ChessPartyError, GameError, GameServerConfig, HeartbeatConfig, Result, StoreError,
    DESCRIPTION, NAME, VERSION,
};
use std::time::Duration;

#[test]
fn test_library_metadata() {
    assert!(!VERSION.is_empty());
    assert_eq!(NAME, "chess_party");
    assert!(!DESCRIPTION.is_empty());
}

#[test]
fn test_error_types() {
    let game_error: ChessPartyError = GameError::NotYourTurn.into();
    assert!(matches!(game_error, ChessPartyError::Game(GameError::NotYourTurn)));

    let store_error: ChessPartyError = StoreError::Unavailable("down".to_string()).into();
    assert!(matches!(store_error, ChessPartyError::Storage(_)));

    let server_error = ChessPartyError::Server("test server error".to_string());
    assert_eq!(server_error.to_string(), "Server error: test server error");
}

#[test]
fn test_result_type_alias() {
    let success: Result<i32> = Ok(42);
    assert!(success.is_ok());

    let failure: Result<i32> = Err(GameError::GameAlreadyOver.into());
    assert!(failure.is_err());
}

#[test]
fn test_server_configs() {
    let config = GameServerConfig::default();
    assert_eq!(config.port, 8000);
    assert_eq!(config.host, "0.0.0.0");

    let heartbeat = HeartbeatConfig::default();
    assert!(heartbeat.pong_timeout > heartbeat.ping_interval);
    assert_eq!(heartbeat.ping_interval, Duration::from_secs(15));
}
