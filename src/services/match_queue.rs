//! FIFO queue of players waiting for an opponent.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use super::connection::{ConnectionHandle, ConnectionId};
use crate::game::PlayerRef;

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub player: PlayerRef,
    pub connection: ConnectionHandle,
}

/// Receiving end of the "pair may be ready" notification.
///
/// Signals coalesce: any number of enqueues between two waits wake the
/// waiter once.
#[derive(Debug)]
pub struct PairSignal {
    rx: mpsc::Receiver<()>,
}

impl PairSignal {
    /// Waits for the next signal. Returns `false` once the queue is gone.
    pub async fn wait(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}

#[derive(Debug)]
pub struct MatchQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    signal: mpsc::Sender<()>,
}

impl MatchQueue {
    pub fn new() -> (Self, PairSignal) {
        let (tx, rx) = mpsc::channel(1);
        (
            Self {
                entries: Mutex::new(VecDeque::new()),
                signal: tx,
            },
            PairSignal { rx },
        )
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<QueueEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues `player`, replacing (in place) any entry it already has.
    ///
    /// The replaced entry is returned so the caller can decide what to do with
    /// its connection; it is not closed here.
    pub fn enqueue(&self, player: PlayerRef, connection: ConnectionHandle) -> Option<QueueEntry> {
        let replaced = {
            let mut entries = self.entries();
            let entry = QueueEntry { player, connection };
            match entries.iter_mut().find(|e| e.player == player) {
                Some(existing) => Some(std::mem::replace(existing, entry)),
                None => {
                    entries.push_back(entry);
                    None
                }
            }
        };
        // Full means a wake-up is already pending.
        let _ = self.signal.try_send(());
        replaced
    }

    /// Removes and returns the two oldest entries, oldest first.
    pub fn try_dequeue_pair(&self) -> Option<(QueueEntry, QueueEntry)> {
        let mut entries = self.entries();
        if entries.len() < 2 {
            return None;
        }
        let first = entries.pop_front()?;
        let second = entries.pop_front()?;
        Some((first, second))
    }

    pub fn remove(&self, player: PlayerRef) -> Option<QueueEntry> {
        let mut entries = self.entries();
        let index = entries.iter().position(|e| e.player == player)?;
        entries.remove(index)
    }

    /// Removes `player` only if it is still queued through `connection`.
    pub fn remove_connection(&self, player: PlayerRef, connection: ConnectionId) -> bool {
        let mut entries = self.entries();
        match entries
            .iter()
            .position(|e| e.player == player && e.connection.id() == connection)
        {
            Some(index) => entries.remove(index).is_some(),
            None => false,
        }
    }

    pub fn contains(&self, player: PlayerRef) -> bool {
        self.entries().iter().any(|e| e.player == player)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_for(player: PlayerRef) -> ConnectionHandle {
        ConnectionHandle::new(player).0
    }

    #[test]
    fn test_dequeue_needs_two_players() {
        let (queue, _signal) = MatchQueue::new();
        assert!(queue.try_dequeue_pair().is_none());

        let alice = PlayerRef::random();
        queue.enqueue(alice, entry_for(alice));
        assert!(queue.try_dequeue_pair().is_none());
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(alice));
    }

    #[test]
    fn test_pairs_are_taken_oldest_first() {
        let (queue, _signal) = MatchQueue::new();
        let players: Vec<_> = (0..3).map(|_| PlayerRef::random()).collect();
        for p in &players {
            queue.enqueue(*p, entry_for(*p));
        }

        let (first, second) = queue.try_dequeue_pair().unwrap();
        assert_eq!(first.player, players[0]);
        assert_eq!(second.player, players[1]);
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(players[2]));
    }

    #[test]
    fn test_reenqueue_replaces_without_duplicating() {
        let (queue, _signal) = MatchQueue::new();
        let alice = PlayerRef::random();
        let bob = PlayerRef::random();
        let first_conn = entry_for(alice);
        let second_conn = entry_for(alice);

        assert!(queue.enqueue(alice, first_conn.clone()).is_none());
        queue.enqueue(bob, entry_for(bob));
        let replaced = queue.enqueue(alice, second_conn.clone()).unwrap();

        assert_eq!(replaced.connection.id(), first_conn.id());
        assert_eq!(queue.len(), 2);

        // Alice keeps the first place in line.
        let (white, black) = queue.try_dequeue_pair().unwrap();
        assert_eq!(white.player, alice);
        assert_eq!(white.connection.id(), second_conn.id());
        assert_eq!(black.player, bob);
    }

    #[test]
    fn test_remove_is_noop_when_absent() {
        let (queue, _signal) = MatchQueue::new();
        assert!(queue.remove(PlayerRef::random()).is_none());

        let alice = PlayerRef::random();
        queue.enqueue(alice, entry_for(alice));
        assert!(queue.remove(alice).is_some());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_stale_connection_does_not_remove_newer_entry() {
        let (queue, _signal) = MatchQueue::new();
        let alice = PlayerRef::random();
        let old = entry_for(alice);
        let new = entry_for(alice);

        queue.enqueue(alice, old.clone());
        queue.enqueue(alice, new.clone());

        assert!(!queue.remove_connection(alice, old.id()));
        assert!(queue.contains(alice));
        assert!(queue.remove_connection(alice, new.id()));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_signals_coalesce() {
        let (queue, mut signal) = MatchQueue::new();
        for _ in 0..5 {
            let p = PlayerRef::random();
            queue.enqueue(p, entry_for(p));
        }

        assert!(signal.wait().await);
        // Only one pending wake-up survives the burst.
        assert!(signal.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_signal_ends_when_queue_dropped() {
        let (queue, mut signal) = MatchQueue::new();
        drop(queue);
        assert!(!signal.wait().await);
    }
}
