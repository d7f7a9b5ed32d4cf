//! Table of open device connections and their outbound queues.

use crate::protocol::ServerMessage;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, mpsc};

/// Outbound queue depth per connection
pub const OUTBOUND_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Default)]
pub struct ConnectionTable {
    next_id: AtomicU64,
    senders: RwLock<HashMap<ConnectionId, mpsc::Sender<ServerMessage>>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection. The receiver yields everything addressed to it.
    pub async fn open(&self) -> (ConnectionId, mpsc::Receiver<ServerMessage>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        self.senders.write().await.insert(id, tx);
        (id, rx)
    }

    /// Drop the outbound sender; the receiver ends once drained.
    pub async fn close(&self, id: ConnectionId) {
        self.senders.write().await.remove(&id);
    }

    /// Queue a message for one connection. Returns false if it is gone.
    pub async fn send_to(&self, id: ConnectionId, msg: ServerMessage) -> bool {
        let tx = self.senders.read().await.get(&id).cloned();
        match tx {
            Some(tx) => tx.send(msg).await.is_ok(),
            None => false,
        }
    }

    /// Queue a message for every open connection without waiting.
    ///
    /// A connection whose queue is full misses the message.
    pub async fn broadcast(&self, msg: ServerMessage) {
        let senders = self.senders.read().await;
        for (id, tx) in senders.iter() {
            match tx.try_send(msg.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Outbound queue of {} is full, dropping broadcast", id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.senders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
