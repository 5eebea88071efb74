//! Live sessions by id, with lazy rehydration from the store.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::connection::{ConnectionHandle, ConnectionId};
use super::envelope::SessionSnapshot;
use super::error::GameError;
use super::game_session::GameSession;
use crate::game::{PlayerRef, RulesOracle, SessionId};
use crate::storage::MatchStore;

pub struct GameSessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<GameSession>>>,
    store: Arc<dyn MatchStore>,
    oracle: Arc<dyn RulesOracle>,
}

impl GameSessionRegistry {
    pub fn new(store: Arc<dyn MatchStore>, oracle: Arc<dyn RulesOracle>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            store,
            oracle,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<SessionId, Arc<GameSession>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a fresh session for a match row that was just created.
    pub fn create(
        &self,
        id: SessionId,
        created_at: DateTime<Utc>,
        white: PlayerRef,
        black: PlayerRef,
    ) -> Result<Arc<GameSession>, GameError> {
        let mut sessions = self.sessions();
        if sessions.contains_key(&id) {
            return Err(GameError::SessionAlreadyExists(id));
        }
        let session = Arc::new(GameSession::new(
            id,
            created_at,
            white,
            black,
            Arc::clone(&self.oracle),
        ));
        sessions.insert(id, Arc::clone(&session));
        log::debug!("registered game {} ({} vs {})", id, white, black);
        Ok(session)
    }

    /// The live session for `id`, rebuilt from the store if it is not in memory.
    pub fn get(&self, id: SessionId) -> Result<Arc<GameSession>, GameError> {
        if let Some(session) = self.sessions().get(&id) {
            return Ok(Arc::clone(session));
        }

        // The map lock is not held across store I/O; a racing loader may win
        // the insert, in which case its session is the one returned.
        let stored = self
            .store
            .load_match(id)?
            .ok_or(GameError::SessionNotFound(id))?;
        let session = Arc::new(GameSession::rehydrate(&stored, Arc::clone(&self.oracle))?);
        log::info!(
            "rehydrated game {} with {} moves",
            id,
            stored.moves.len()
        );

        let mut sessions = self.sessions();
        Ok(Arc::clone(sessions.entry(id).or_insert(session)))
    }

    /// Binds a game connection for a participant and sends it the current state.
    pub async fn attach_connection(
        &self,
        id: SessionId,
        player: PlayerRef,
        connection: ConnectionHandle,
    ) -> Result<SessionSnapshot, GameError> {
        let session = self.get(id)?;
        let snapshot = session.set_connection(player, connection).await?;
        log::info!("player {} joined game {}", player, id);
        Ok(snapshot)
    }

    /// Unbinds a game connection; a finished session with nobody left is dropped.
    pub async fn detach_connection(&self, id: SessionId, connection: ConnectionId) {
        let Some(session) = self.sessions().get(&id).cloned() else {
            return;
        };
        if session.clear_connection(connection).await && session.is_idle_and_done().await {
            self.evict(id).await;
        }
    }

    /// Drops a finished, aborted or halted session from memory. Sessions still
    /// in progress stay resident and `false` is returned.
    pub async fn evict(&self, id: SessionId) -> bool {
        let Some(session) = self.sessions().get(&id).cloned() else {
            return false;
        };
        if !session.is_evictable().await {
            log::debug!("game {} is still in progress, not evicting", id);
            return false;
        }
        let removed = self.sessions().remove(&id).is_some();
        if removed {
            log::debug!("evicted game {}", id);
        }
        removed
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
