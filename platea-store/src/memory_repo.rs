use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use platea_domain::{
    Acquired, LockBackend, LockError, LockResult, LockStatus, Released, SeatLock, SessionToken,
};

/// In-memory lock store for local development and tests. Same state
/// machine as the Postgres backend, with a single mutex standing in
/// for the uniqueness constraint.
#[derive(Default)]
pub struct MemoryLockBackend {
    locks: Mutex<HashMap<(Uuid, Uuid), SeatLock>>,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().expect("lock table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn acquire(
        &self,
        seat_id: Uuid,
        function_id: Uuid,
        owner: &SessionToken,
        ttl_seconds: u64,
    ) -> LockResult<Acquired> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_seconds as i64);
        let mut locks = self.locks.lock().expect("lock table poisoned");

        match locks.get_mut(&(seat_id, function_id)) {
            Some(existing) if existing.status == LockStatus::Sold => {
                Err(LockError::SeatUnavailable)
            }
            Some(existing) if existing.is_owned_by(owner) && existing.is_active_at(now) => {
                // Refresh: extend the TTL, keep the original locked_at.
                existing.expires_at = expires_at;
                Ok(Acquired { lock: existing.clone(), refreshed: true })
            }
            Some(existing) if existing.is_expired_at(now) => {
                let lock = SeatLock {
                    seat_id,
                    function_id,
                    session_id: owner.clone(),
                    status: LockStatus::Locked,
                    locked_at: now,
                    expires_at,
                };
                *existing = lock.clone();
                Ok(Acquired { lock, refreshed: false })
            }
            Some(_) => Err(LockError::SeatUnavailable),
            None => {
                let lock = SeatLock {
                    seat_id,
                    function_id,
                    session_id: owner.clone(),
                    status: LockStatus::Locked,
                    locked_at: now,
                    expires_at,
                };
                locks.insert((seat_id, function_id), lock.clone());
                Ok(Acquired { lock, refreshed: false })
            }
        }
    }

    async fn release(
        &self,
        seat_id: Uuid,
        function_id: Uuid,
        owner: &SessionToken,
    ) -> LockResult<Released> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        match locks.get(&(seat_id, function_id)) {
            Some(existing)
                if existing.status == LockStatus::Locked && existing.is_owned_by(owner) =>
            {
                let removed = locks
                    .remove(&(seat_id, function_id))
                    .map(Released::Deleted)
                    .unwrap_or(Released::NotHeld);
                Ok(removed)
            }
            Some(existing) if existing.status == LockStatus::Locked => {
                tracing::warn!(%seat_id, %function_id, "release attempted by non-owner, ignoring");
                Ok(Released::NotHeld)
            }
            _ => Ok(Released::NotHeld),
        }
    }

    async fn list(&self, function_id: Uuid) -> LockResult<Vec<SeatLock>> {
        let now = Utc::now();
        let locks = self.locks.lock().expect("lock table poisoned");
        Ok(locks
            .values()
            .filter(|l| l.function_id == function_id && l.is_active_at(now))
            .cloned()
            .collect())
    }

    async fn sweep(&self, now: DateTime<Utc>) -> LockResult<Vec<SeatLock>> {
        let mut locks = self.locks.lock().expect("lock table poisoned");
        let victims: Vec<SeatLock> = locks
            .values()
            .filter(|l| l.is_expired_at(now))
            .cloned()
            .collect();
        for victim in &victims {
            locks.remove(&(victim.seat_id, victim.function_id));
        }
        Ok(victims)
    }

    async fn mark_sold(
        &self,
        function_id: Uuid,
        seat_ids: &[Uuid],
        owner: &SessionToken,
    ) -> LockResult<Vec<SeatLock>> {
        let now = Utc::now();
        let mut locks = self.locks.lock().expect("lock table poisoned");

        // Verify first so the conversion is all-or-nothing.
        for seat_id in seat_ids {
            match locks.get(&(*seat_id, function_id)) {
                Some(l)
                    if l.status == LockStatus::Locked
                        && l.is_owned_by(owner)
                        && l.is_active_at(now) => {}
                _ => return Err(LockError::SeatUnavailable),
            }
        }

        let mut sold = Vec::with_capacity(seat_ids.len());
        for seat_id in seat_ids {
            if let Some(l) = locks.get_mut(&(*seat_id, function_id)) {
                l.status = LockStatus::Sold;
                sold.push(l.clone());
            }
        }
        Ok(sold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ids() -> (Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn concurrent_acquires_elect_exactly_one_owner() {
        let backend = Arc::new(MemoryLockBackend::new());
        let (seat, function) = ids();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let backend = Arc::clone(&backend);
            let owner = SessionToken::generate();
            handles.push(tokio::spawn(async move {
                backend.acquire(seat, function, &owner, 900).await
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.expect("task panicked") {
                Ok(_) => wins += 1,
                Err(LockError::SeatUnavailable) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 31);
        assert_eq!(backend.list(function).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn same_owner_reacquire_refreshes_without_new_lock() {
        let backend = MemoryLockBackend::new();
        let (seat, function) = ids();
        let owner = SessionToken::generate();

        let first = backend.acquire(seat, function, &owner, 900).await.unwrap();
        assert!(!first.refreshed);

        let second = backend.acquire(seat, function, &owner, 900).await.unwrap();
        assert!(second.refreshed);
        assert_eq!(second.lock.locked_at, first.lock.locked_at);
        assert!(second.lock.expires_at >= first.lock.expires_at);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn release_is_idempotent_and_owner_conditional() {
        let backend = MemoryLockBackend::new();
        let (seat, function) = ids();
        let owner = SessionToken::generate();
        let stranger = SessionToken::generate();

        backend.acquire(seat, function, &owner, 900).await.unwrap();

        // A stranger's release is a no-op, not a steal.
        assert!(matches!(
            backend.release(seat, function, &stranger).await.unwrap(),
            Released::NotHeld
        ));
        assert_eq!(backend.list(function).await.unwrap().len(), 1);

        assert!(matches!(
            backend.release(seat, function, &owner).await.unwrap(),
            Released::Deleted(_)
        ));
        // Second release: no error, no state change.
        assert!(matches!(
            backend.release(seat, function, &owner).await.unwrap(),
            Released::NotHeld
        ));
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn acquire_then_release_leaves_no_trace() {
        let backend = MemoryLockBackend::new();
        let (seat, function) = ids();
        let owner = SessionToken::generate();

        backend.acquire(seat, function, &owner, 900).await.unwrap();
        backend.release(seat, function, &owner).await.unwrap();

        assert!(backend.is_empty());
        assert!(backend.list(function).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_locks_are_invisible_and_stealable() {
        let backend = MemoryLockBackend::new();
        let (seat, function) = ids();
        let owner = SessionToken::generate();
        let latecomer = SessionToken::generate();

        backend.acquire(seat, function, &owner, 900).await.unwrap();
        // Backdate the expiry instead of waiting out a real TTL.
        {
            let mut locks = backend.locks.lock().unwrap();
            let lock = locks.get_mut(&(seat, function)).unwrap();
            lock.expires_at = Utc::now() - Duration::seconds(1);
        }

        // Not yet physically deleted, but list must not return it.
        assert_eq!(backend.len(), 1);
        assert!(backend.list(function).await.unwrap().is_empty());

        // And a different session may take it over.
        let taken = backend.acquire(seat, function, &latecomer, 900).await.unwrap();
        assert!(!taken.refreshed);
        assert!(taken.lock.is_owned_by(&latecomer));
    }

    #[tokio::test]
    async fn same_owner_reacquire_after_expiry_is_a_takeover() {
        let backend = MemoryLockBackend::new();
        let (seat, function) = ids();
        let owner = SessionToken::generate();

        backend.acquire(seat, function, &owner, 900).await.unwrap();
        {
            let mut locks = backend.locks.lock().unwrap();
            locks.get_mut(&(seat, function)).unwrap().expires_at =
                Utc::now() - Duration::seconds(1);
        }

        // The old owner gets the seat back, but as a brand-new lock:
        // not a refresh, and locked_at restarts at the takeover.
        let again = backend.acquire(seat, function, &owner, 900).await.unwrap();
        assert!(!again.refreshed);
        assert!(again.lock.expires_at > Utc::now());
    }

    #[tokio::test]
    async fn sweep_deletes_only_expired_locked_rows() {
        let backend = MemoryLockBackend::new();
        let function = Uuid::new_v4();
        let owner = SessionToken::generate();
        let (fresh, stale, sold) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        backend.acquire(fresh, function, &owner, 900).await.unwrap();
        backend.acquire(stale, function, &owner, 900).await.unwrap();
        backend.acquire(sold, function, &owner, 900).await.unwrap();
        backend.mark_sold(function, &[sold], &owner).await.unwrap();
        {
            let mut locks = backend.locks.lock().unwrap();
            locks.get_mut(&(stale, function)).unwrap().expires_at =
                Utc::now() - Duration::seconds(1);
            // Sold rows keep whatever stamp they had; sweep must still
            // skip them.
            locks.get_mut(&(sold, function)).unwrap().expires_at =
                Utc::now() - Duration::seconds(1);
        }

        let victims = backend.sweep(Utc::now()).await.unwrap();
        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].seat_id, stale);
        assert_eq!(backend.len(), 2);
    }

    #[tokio::test]
    async fn sold_seats_are_terminal() {
        let backend = MemoryLockBackend::new();
        let (seat, function) = ids();
        let owner = SessionToken::generate();
        let stranger = SessionToken::generate();

        backend.acquire(seat, function, &owner, 900).await.unwrap();
        let sold = backend.mark_sold(function, &[seat], &owner).await.unwrap();
        assert_eq!(sold[0].status, LockStatus::Sold);

        // Nobody can re-acquire, not even the owner.
        assert!(matches!(
            backend.acquire(seat, function, &stranger, 900).await,
            Err(LockError::SeatUnavailable)
        ));
        assert!(matches!(
            backend.acquire(seat, function, &owner, 900).await,
            Err(LockError::SeatUnavailable)
        ));
        // And release does not unsell.
        backend.release(seat, function, &owner).await.unwrap();
        assert_eq!(backend.list(function).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mark_sold_is_all_or_nothing() {
        let backend = MemoryLockBackend::new();
        let function = Uuid::new_v4();
        let owner = SessionToken::generate();
        let held = Uuid::new_v4();
        let never_held = Uuid::new_v4();

        backend.acquire(held, function, &owner, 900).await.unwrap();

        let result = backend.mark_sold(function, &[held, never_held], &owner).await;
        assert!(matches!(result, Err(LockError::SeatUnavailable)));

        // The held seat must still be a plain lock.
        let locks = backend.list(function).await.unwrap();
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].status, LockStatus::Locked);
    }
}
