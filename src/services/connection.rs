//! Handles to realtime connections owned by the transport layer.
//!
//! The transport keeps the socket; the services only hold a [`ConnectionHandle`],
//! which can queue a message or ask the socket to close. Once the socket task
//! exits its receiver is dropped and the handle reports itself closed.

use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::game::PlayerRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Frames queued for the socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    player: PlayerRef,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Creates a handle and the receiver the socket writer drains.
    pub fn new(player: PlayerRef) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: ConnectionId::random(),
                player,
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn player(&self) -> PlayerRef {
        self.player
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    pub fn send_json<T: Serialize>(&self, message: &T) -> Result<(), TransportError> {
        let text = serde_json::to_string(message)?;
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| TransportError::Closed(self.id))
    }

    /// Asks the socket to close after flushing what is already queued.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_queued_in_order() {
        let (handle, mut rx) = ConnectionHandle::new(PlayerRef::random());
        handle.send_json(&serde_json::json!({ "a": 1 })).unwrap();
        handle.close();

        assert_eq!(rx.try_recv().unwrap(), Outbound::Text("{\"a\":1}".to_string()));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[test]
    fn test_dropped_receiver_invalidates_handle() {
        let (handle, rx) = ConnectionHandle::new(PlayerRef::random());
        assert!(handle.is_open());
        drop(rx);
        assert!(!handle.is_open());
        assert!(matches!(
            handle.send_json(&"late"),
            Err(TransportError::Closed(id)) if id == handle.id()
        ));
    }
}
