use tokio::sync::broadcast;

use platea_domain::LockEvent;

/// Fan-out channel for lock table mutations. Every connected client
/// (SSE streams, in-process caches, cart watchers) holds a receiver;
/// delivery is eventual and unordered, which is safe because each
/// event carries the full row.
#[derive(Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<LockEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.tx.subscribe()
    }

    /// Publishing with no subscribers is fine; the event is dropped.
    pub fn publish(&self, event: LockEvent) {
        let _ = self.tx.send(event);
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}
