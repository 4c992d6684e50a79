use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lock::SeatLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockEventKind {
    Insert,
    Update,
    Delete,
}

impl LockEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockEventKind::Insert => "insert",
            LockEventKind::Update => "update",
            LockEventKind::Delete => "delete",
        }
    }
}

/// One mutation of the lock table, pushed to every connected client.
/// Always carries the full row, never a diff, so out-of-order delivery
/// self-heals: each event is applied as an upsert or removal of that
/// seat's entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockEvent {
    #[serde(rename = "eventType")]
    pub kind: LockEventKind,
    #[serde(rename = "row")]
    pub lock: SeatLock,
}

impl LockEvent {
    pub fn insert(lock: SeatLock) -> Self {
        Self { kind: LockEventKind::Insert, lock }
    }

    pub fn update(lock: SeatLock) -> Self {
        Self { kind: LockEventKind::Update, lock }
    }

    pub fn delete(lock: SeatLock) -> Self {
        Self { kind: LockEventKind::Delete, lock }
    }

    pub fn function_id(&self) -> Uuid {
        self.lock.function_id
    }

    pub fn seat_id(&self) -> Uuid {
        self.lock.seat_id
    }
}
