//! The facade the transport talks to: matchmaking, move dispatch and
//! connection lifecycle on top of the queue, the registry and the store.

use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::task::JoinHandle;

use super::connection::{ConnectionHandle, ConnectionId};
use super::envelope::{ErrorEnvelope, MatchFound, SessionSnapshot};
use super::error::GameError;
use super::game_session::MoveReceipt;
use super::match_queue::{MatchQueue, PairSignal, QueueEntry};
use super::session_registry::GameSessionRegistry;
use crate::game::{PlayerRef, RulesOracle, SessionId};
use crate::storage::{MatchRow, MatchStore, StoredMatch};

pub struct MatchOrchestrator {
    queue: MatchQueue,
    registry: GameSessionRegistry,
    store: Arc<dyn MatchStore>,
    pair_signal: Mutex<Option<PairSignal>>,
}

impl MatchOrchestrator {
    pub fn new(store: Arc<dyn MatchStore>, oracle: Arc<dyn RulesOracle>) -> Arc<Self> {
        let (queue, pair_signal) = MatchQueue::new();
        Arc::new(Self {
            queue,
            registry: GameSessionRegistry::new(Arc::clone(&store), oracle),
            store,
            pair_signal: Mutex::new(Some(pair_signal)),
        })
    }

    pub fn queue(&self) -> &MatchQueue {
        &self.queue
    }

    pub fn registry(&self) -> &GameSessionRegistry {
        &self.registry
    }

    /// Starts the background pairing worker. Only the first call spawns one.
    ///
    /// The worker holds a weak reference and ends once the orchestrator is dropped.
    pub fn spawn_pairing_worker(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut signal = self
            .pair_signal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let orchestrator: Weak<Self> = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            log::info!("pairing worker started");
            while signal.wait().await {
                let Some(this) = orchestrator.upgrade() else {
                    break;
                };
                this.pair_waiting_players();
            }
            log::info!("pairing worker stopped");
        }))
    }

    /// Queues a player for matchmaking. A previous matchmaking socket of the
    /// same player is closed, since only the newest one will be notified.
    pub fn join_queue(&self, player: PlayerRef, connection: ConnectionHandle) {
        let connection_id = connection.id();
        if let Some(replaced) = self.queue.enqueue(player, connection) {
            if replaced.connection.id() != connection_id {
                replaced.connection.close();
            }
        }
        log::debug!("player {} joined the queue ({} waiting)", player, self.queue.len());
    }

    /// Pairs waiting players until fewer than two remain. Returns the new sessions.
    pub fn pair_waiting_players(&self) -> Vec<SessionId> {
        let mut created = Vec::new();
        while let Some((white, black)) = self.queue.try_dequeue_pair() {
            if let Some(id) = self.start_match(white, black) {
                created.push(id);
            }
        }
        created
    }

    fn start_match(&self, white: QueueEntry, black: QueueEntry) -> Option<SessionId> {
        let row = match self.store.create_match(white.player, black.player) {
            Ok(row) => row,
            Err(e) => {
                log::error!(
                    "could not create match for {} vs {}: {}",
                    white.player,
                    black.player,
                    e
                );
                let notice = ErrorEnvelope {
                    error: "could not create match".to_string(),
                };
                for entry in [&white, &black] {
                    if let Err(e) = entry.connection.send_json(&notice) {
                        log::warn!("could not notify {} of failed match: {}", entry.player, e);
                    }
                    entry.connection.close();
                }
                return None;
            }
        };

        if let Err(e) = self.registry.create(
            row.id,
            row.created_at,
            row.white_player_id,
            row.black_player_id,
        ) {
            // The row exists; the session will be rehydrated on first attach.
            log::error!("game {}: not registered after creation: {}", row.id, e);
        }
        log::info!(
            "paired {} (white) with {} (black) in game {}",
            white.player,
            black.player,
            row.id
        );

        let found = MatchFound { game_id: row.id };
        for entry in [&white, &black] {
            if let Err(e) = entry.connection.send_json(&found) {
                log::warn!(
                    "game {}: match notice to {} failed: {}",
                    row.id,
                    entry.player,
                    e
                );
            }
            entry.connection.close();
        }
        Some(row.id)
    }

    /// Queue cleanup for a player whose matchmaking socket went away.
    pub fn disconnect(&self, player: PlayerRef) {
        if self.queue.remove(player).is_some() {
            log::debug!("player {} left the queue", player);
        }
    }

    /// Like [`disconnect`](Self::disconnect), but leaves a newer queue entry alone.
    pub fn disconnect_connection(&self, player: PlayerRef, connection: ConnectionId) {
        if self.queue.remove_connection(player, connection) {
            log::debug!("player {} left the queue", player);
        }
    }

    pub async fn attach_connection(
        &self,
        session: SessionId,
        player: PlayerRef,
        connection: ConnectionHandle,
    ) -> Result<SessionSnapshot, GameError> {
        self.registry
            .attach_connection(session, player, connection)
            .await
    }

    /// Game socket closed. The session keeps running for the opponent.
    pub async fn detach_game_connection(&self, session: SessionId, connection: ConnectionId) {
        self.registry.detach_connection(session, connection).await;
    }

    pub async fn submit_move(
        &self,
        session: SessionId,
        player: PlayerRef,
        notation: &str,
    ) -> Result<MoveReceipt, GameError> {
        let game = self.registry.get(session)?;
        game.submit_move(player, notation, self.store.as_ref()).await
    }

    pub async fn abort(
        &self,
        session: SessionId,
        player: PlayerRef,
    ) -> Result<SessionSnapshot, GameError> {
        let game = self.registry.get(session)?;
        game.abort(player, self.store.as_ref()).await
    }

    pub async fn snapshot(&self, session: SessionId) -> Result<SessionSnapshot, GameError> {
        Ok(self.registry.get(session)?.snapshot().await)
    }

    pub fn match_history(&self, player: PlayerRef) -> Result<Vec<MatchRow>, GameError> {
        Ok(self.store.matches_for_player(player)?)
    }

    /// The stored match with its moves. Only participants may read it.
    pub fn match_details(
        &self,
        session: SessionId,
        player: PlayerRef,
    ) -> Result<StoredMatch, GameError> {
        let stored = self
            .store
            .load_match(session)?
            .ok_or(GameError::SessionNotFound(session))?;
        if stored.row.white_player_id != player && stored.row.black_player_id != player {
            return Err(GameError::NotParticipant { session, player });
        }
        Ok(stored)
    }
}
