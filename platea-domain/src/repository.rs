use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::LockResult;
use crate::lock::{SeatLock, SessionToken};

/// Outcome of a successful acquire. `refreshed` distinguishes a
/// same-owner re-acquire (TTL extended, `locked_at` untouched) from a
/// brand-new lock or a takeover of an expired one.
#[derive(Debug, Clone)]
pub struct Acquired {
    pub lock: SeatLock,
    pub refreshed: bool,
}

#[derive(Debug, Clone)]
pub enum Released {
    /// The owned row was deleted; carries the row as it was.
    Deleted(SeatLock),
    /// Nothing to do: no row, an expired row, or a row owned by someone
    /// else. Never an error.
    NotHeld,
}

/// Storage trait for seat locks. Implementations must guarantee that
/// for a given `(seat_id, function_id)` pair at most one unexpired lock
/// exists at any time, under any number of concurrent acquires: the
/// first committed writer wins, everyone else gets `SeatUnavailable`.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Insert-or-fail. Succeeds idempotently for the current owner
    /// (refresh semantics); takes over rows past their `expires_at`;
    /// never steals an active lock and never touches a sold seat.
    async fn acquire(
        &self,
        seat_id: Uuid,
        function_id: Uuid,
        owner: &SessionToken,
        ttl_seconds: u64,
    ) -> LockResult<Acquired>;

    /// Conditional delete by owner. Releasing a seat that is not held
    /// by `owner` is a no-op, not an error.
    async fn release(
        &self,
        seat_id: Uuid,
        function_id: Uuid,
        owner: &SessionToken,
    ) -> LockResult<Released>;

    /// All unexpired locks for a function. Rows past `expires_at` are
    /// filtered here even when not yet physically deleted.
    async fn list(&self, function_id: Uuid) -> LockResult<Vec<SeatLock>>;

    /// Deletes expired `locked` rows and returns the victims so the
    /// caller can broadcast their disappearance. Sold rows are exempt.
    async fn sweep(&self, now: DateTime<Utc>) -> LockResult<Vec<SeatLock>>;

    /// Checkout handoff: flips the owner's unexpired locks to `sold`,
    /// all-or-nothing. Fails with `SeatUnavailable` if any seat is no
    /// longer held by `owner`.
    async fn mark_sold(
        &self,
        function_id: Uuid,
        seat_ids: &[Uuid],
        owner: &SessionToken,
    ) -> LockResult<Vec<SeatLock>>;
}
