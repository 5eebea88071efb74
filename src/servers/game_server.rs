//! HTTP and WebSocket front end for the match services.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        FromRequestParts, Path, Query, State,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use http::{header::AUTHORIZATION, request::Parts, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval_at, Instant};
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{AuthError, JwtManager};
use crate::game::{PlayerRef, SessionId};
use crate::services::{
    ConnectionHandle, ErrorEnvelope, ErrorKind, GameEnvelope, GameError, MatchOrchestrator,
    Outbound,
};
use crate::storage::{MatchRow, StoredMatch};

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            pong_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GameServerConfig {
    pub host: String,
    pub port: u16,
    pub heartbeat: HeartbeatConfig,
}

impl Default for GameServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

pub struct AppState {
    pub orchestrator: Arc<MatchOrchestrator>,
    pub jwt: JwtManager,
    pub heartbeat: HeartbeatConfig,
}

pub struct GameServer {
    config: GameServerConfig,
    state: Arc<AppState>,
}

impl GameServer {
    pub fn new(
        config: GameServerConfig,
        orchestrator: Arc<MatchOrchestrator>,
        jwt: JwtManager,
    ) -> Self {
        let state = Arc::new(AppState {
            orchestrator,
            jwt,
            heartbeat: config.heartbeat,
        });
        Self { config, state }
    }

    pub fn router(&self) -> Router {
        create_router(Arc::clone(&self.state))
    }

    pub async fn start(&self) -> crate::Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| crate::ChessPartyError::Server(format!("invalid listen address: {e}")))?;
        let listener = TcpListener::bind(addr).await?;

        log::info!("game server listening on http://{}", addr);

        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/games", get(list_games))
        .route("/api/games/{game_id}", get(game_details))
        .route("/api/games/{game_id}/abort", post(abort_game))
        .route("/ws/search", get(search_socket))
        .route("/ws/game/{game_id}", get(game_socket))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

// ============================================================================
// ERRORS AND AUTHENTICATION
// ============================================================================

pub enum ApiError {
    Auth(AuthError),
    Game(GameError),
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Auth(e)
    }
}

impl From<GameError> for ApiError {
    fn from(e: GameError) -> Self {
        ApiError::Game(e)
    }
}

fn game_error_status(e: &GameError) -> StatusCode {
    match e {
        GameError::InvalidMove(_) => StatusCode::BAD_REQUEST,
        GameError::NotYourTurn
        | GameError::GameAlreadyOver
        | GameError::PlayersNotConnected
        | GameError::SessionAlreadyExists(_) => StatusCode::CONFLICT,
        GameError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        GameError::NotParticipant { .. } => StatusCode::FORBIDDEN,
        GameError::Integrity { .. } | GameError::SessionHalted(_) | GameError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn log_game_error(context: &str, e: &GameError) {
    match e.kind() {
        ErrorKind::Validation => log::debug!("{}: {}", context, e),
        ErrorKind::Lookup => log::info!("{}: {}", context, e),
        ErrorKind::Integrity => log::error!("{}: {}", context, e),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::Auth(e) => (StatusCode::UNAUTHORIZED, e.to_string()),
            ApiError::Game(e) => (game_error_status(&e), e.to_string()),
        };
        (status, Json(ErrorEnvelope { error })).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// The caller, from `Authorization: Bearer <jwt>` or, for browsers opening a
/// websocket, `?token=Bearer <jwt>`.
pub struct AuthenticatedPlayer(pub PlayerRef);

impl FromRequestParts<Arc<AppState>> for AuthenticatedPlayer {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let from_header = match parts.headers.get(AUTHORIZATION) {
            Some(value) => Some(
                value
                    .to_str()
                    .map_err(|_| AuthError::MalformedHeader)?
                    .to_string(),
            ),
            None => None,
        };
        let value = match from_header {
            Some(value) => value,
            None => Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(q)| q.token)
                .ok_or(AuthError::MissingToken)?,
        };

        Ok(AuthenticatedPlayer(state.jwt.verify_bearer(&value)?))
    }
}

// ============================================================================
// REST HANDLERS
// ============================================================================

#[derive(Serialize, Debug, Clone)]
pub struct ApiResponse {
    pub status: String,
    pub message: String,
}

async fn api_status() -> Json<ApiResponse> {
    Json(ApiResponse {
        status: "ready".to_string(),
        message: format!("{} {} is running", crate::NAME, crate::VERSION),
    })
}

async fn list_games(
    State(state): State<Arc<AppState>>,
    AuthenticatedPlayer(player): AuthenticatedPlayer,
) -> Result<Json<Vec<MatchRow>>, ApiError> {
    let games = state.orchestrator.match_history(player).map_err(|e| {
        log_game_error("match history", &e);
        e
    })?;
    Ok(Json(games))
}

async fn game_details(
    State(state): State<Arc<AppState>>,
    AuthenticatedPlayer(player): AuthenticatedPlayer,
    Path(game_id): Path<SessionId>,
) -> Result<Json<StoredMatch>, ApiError> {
    let stored = state
        .orchestrator
        .match_details(game_id, player)
        .map_err(|e| {
            log_game_error("match details", &e);
            e
        })?;
    Ok(Json(stored))
}

async fn abort_game(
    State(state): State<Arc<AppState>>,
    AuthenticatedPlayer(player): AuthenticatedPlayer,
    Path(game_id): Path<SessionId>,
) -> Result<Json<GameEnvelope>, ApiError> {
    let snapshot = state
        .orchestrator
        .abort(game_id, player)
        .await
        .map_err(|e| {
            log_game_error("abort", &e);
            e
        })?;
    Ok(Json(GameEnvelope::state(&snapshot)))
}

// ============================================================================
// WEBSOCKETS
// ============================================================================

async fn search_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    AuthenticatedPlayer(player): AuthenticatedPlayer,
) -> Response {
    ws.on_upgrade(move |socket| matchmaking_connection(socket, state, player))
}

async fn game_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    AuthenticatedPlayer(player): AuthenticatedPlayer,
    Path(game_id): Path<SessionId>,
) -> Response {
    ws.on_upgrade(move |socket| game_connection(socket, state, player, game_id))
}

async fn matchmaking_connection(socket: WebSocket, state: Arc<AppState>, player: PlayerRef) {
    let (handle, outbound) = ConnectionHandle::new(player);
    let connection_id = handle.id();
    state.orchestrator.join_queue(player, handle);

    // Nothing is expected from the client while it waits.
    run_socket(socket, outbound, state.heartbeat, |_| async {}).await;

    state.orchestrator.disconnect_connection(player, connection_id);
}

async fn game_connection(
    socket: WebSocket,
    state: Arc<AppState>,
    player: PlayerRef,
    game_id: SessionId,
) {
    let (handle, outbound) = ConnectionHandle::new(player);
    let connection_id = handle.id();

    if let Err(e) = state
        .orchestrator
        .attach_connection(game_id, player, handle.clone())
        .await
    {
        log_game_error("attach", &e);
        let _ = handle.send_json(&ErrorEnvelope {
            error: e.to_string(),
        });
        handle.close();
        run_socket(socket, outbound, state.heartbeat, |_| async {}).await;
        return;
    }

    let on_text = {
        let state = Arc::clone(&state);
        move |text: String| {
            let state = Arc::clone(&state);
            let handle = handle.clone();
            async move { handle_move(&state, game_id, &handle, &text).await }
        }
    };
    run_socket(socket, outbound, state.heartbeat, on_text).await;

    state
        .orchestrator
        .detach_game_connection(game_id, connection_id)
        .await;
    log::debug!("player {} left game {}", player, game_id);
}

/// Submits one inbound frame as a move and answers the mover.
async fn handle_move(state: &AppState, game_id: SessionId, handle: &ConnectionHandle, text: &str) {
    let player = handle.player();
    let reply = match state.orchestrator.submit_move(game_id, player, text).await {
        Ok(receipt) => handle.send_json(&receipt.envelope),
        Err(e) => {
            log_game_error(&format!("move from {player} in game {game_id}"), &e);
            match state.orchestrator.snapshot(game_id).await {
                Ok(snapshot) => handle.send_json(&GameEnvelope::rejected(&snapshot, e.to_string())),
                Err(_) => handle.send_json(&ErrorEnvelope {
                    error: e.to_string(),
                }),
            }
        }
    };
    if let Err(e) = reply {
        log::warn!("game {}: reply to {} failed: {}", game_id, player, e);
    }
}

/// Pumps one socket until either side closes it or the peer stops answering.
///
/// Outbound frames come from the connection's channel; inbound text frames
/// are handed to `on_text` one at a time, in arrival order.
async fn run_socket<F, Fut>(
    socket: WebSocket,
    mut outbound: UnboundedReceiver<Outbound>,
    heartbeat: HeartbeatConfig,
    mut on_text: F,
) where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    let (mut sink, mut stream) = socket.split();
    let mut ping = interval_at(
        Instant::now() + heartbeat.ping_interval,
        heartbeat.ping_interval,
    );
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        log::warn!("socket write failed: {}", e);
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = stream.next() => match inbound {
                Some(Ok(message)) => {
                    last_seen = Instant::now();
                    match message {
                        Message::Text(text) => on_text(text.as_str().to_owned()).await,
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                Some(Err(e)) => {
                    log::debug!("socket read failed: {}", e);
                    break;
                }
                None => break,
            },
            _ = ping.tick() => {
                if last_seen.elapsed() > heartbeat.pong_timeout {
                    log::info!("closing socket after {:?} without a pong", heartbeat.pong_timeout);
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                if sink.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
        }
    }
}
