use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use platea_domain::{LockEvent, LockEventKind, LockResult, SeatLock, SessionToken};
use platea_store::LockService;

/// Per-function projection of the lock table, kept current by the
/// change feed. One instance per active function: switching functions
/// means dropping this cache and building a new one, which tears down
/// the old subscription before the new one exists.
///
/// Only the feed task writes; callers get synchronous snapshot reads.
pub struct LockCache {
    me: SessionToken,
    inner: Arc<CacheInner>,
    task: JoinHandle<()>,
}

struct CacheInner {
    locks: RwLock<HashMap<Uuid, SeatLock>>,
    stale: AtomicBool,
}

impl LockCache {
    /// Subscribes first, hydrates second: an event racing the snapshot
    /// is re-applied as an upsert, which is harmless.
    pub async fn spawn(
        function_id: Uuid,
        me: SessionToken,
        service: Arc<LockService>,
    ) -> LockResult<Self> {
        let rx = service.feed().subscribe();
        let snapshot = service.list(function_id).await?;

        let inner = Arc::new(CacheInner {
            locks: RwLock::new(
                snapshot.into_iter().map(|l| (l.seat_id, l)).collect(),
            ),
            stale: AtomicBool::new(false),
        });

        let task = tokio::spawn(run_feed(
            function_id,
            Arc::clone(&inner),
            rx,
            service,
        ));

        Ok(Self { me, inner, task })
    }

    /// Whether any session holds this seat right now. Expired entries
    /// not yet swept server-side are treated as free.
    pub fn is_locked(&self, seat_id: Uuid) -> bool {
        let locks = self.inner.locks.read().expect("lock cache poisoned");
        locks
            .get(&seat_id)
            .map(|l| l.is_active_at(Utc::now()))
            .unwrap_or(false)
    }

    pub fn is_locked_by_me(&self, seat_id: Uuid) -> bool {
        let locks = self.inner.locks.read().expect("lock cache poisoned");
        locks
            .get(&seat_id)
            .map(|l| l.is_active_at(Utc::now()) && l.is_owned_by(&self.me))
            .unwrap_or(false)
    }

    /// True while the subscription is recovering; the UI should show a
    /// reconnecting state instead of trusting possibly-outdated data.
    pub fn is_stale(&self) -> bool {
        self.inner.stale.load(Ordering::Acquire)
    }

    pub fn locked_count(&self) -> usize {
        let now = Utc::now();
        let locks = self.inner.locks.read().expect("lock cache poisoned");
        locks.values().filter(|l| l.is_active_at(now)).count()
    }

    pub fn close(self) {
        self.task.abort();
    }
}

impl Drop for LockCache {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn apply(inner: &CacheInner, event: LockEvent) {
    let mut locks = inner.locks.write().expect("lock cache poisoned");
    match event.kind {
        // Full-state upsert, never a diff: out-of-order delivery
        // self-heals.
        LockEventKind::Insert | LockEventKind::Update => {
            locks.insert(event.lock.seat_id, event.lock);
        }
        LockEventKind::Delete => {
            locks.remove(&event.lock.seat_id);
        }
    }
}

async fn run_feed(
    function_id: Uuid,
    inner: Arc<CacheInner>,
    mut rx: broadcast::Receiver<LockEvent>,
    service: Arc<LockService>,
) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if event.function_id() == function_id {
                    apply(&inner, event);
                }
            }
            Err(RecvError::Lagged(missed)) => {
                // Events were dropped under us; resubscribe and rebuild
                // from the authoritative store rather than going stale.
                warn!(%function_id, missed, "lock cache lagged, rehydrating");
                inner.stale.store(true, Ordering::Release);
                rx = service.feed().subscribe();
                rehydrate(function_id, &inner, &service).await;
                inner.stale.store(false, Ordering::Release);
            }
            Err(RecvError::Closed) => {
                debug!(%function_id, "change feed closed, lock cache stopping");
                inner.stale.store(true, Ordering::Release);
                return;
            }
        }
    }
}

async fn rehydrate(function_id: Uuid, inner: &CacheInner, service: &LockService) {
    let mut backoff = Duration::from_millis(100);
    loop {
        match service.list(function_id).await {
            Ok(snapshot) => {
                let mut locks = inner.locks.write().expect("lock cache poisoned");
                locks.clear();
                locks.extend(snapshot.into_iter().map(|l| (l.seat_id, l)));
                return;
            }
            Err(e) => {
                warn!(%function_id, "lock cache rehydrate failed, retrying: {e}");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_secs(5));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use platea_domain::{LockBackend, LockStatus};
    use platea_store::{ChangeFeed, MemoryLockBackend};

    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    fn service_with_backend() -> (Arc<LockService>, Arc<MemoryLockBackend>) {
        let backend = Arc::new(MemoryLockBackend::new());
        let service = Arc::new(LockService::new(
            backend.clone(),
            ChangeFeed::new(8),
            900,
        ));
        (service, backend)
    }

    #[tokio::test]
    async fn hydrates_from_list_and_tracks_events() {
        let (service, _) = service_with_backend();
        let function = Uuid::new_v4();
        let me = SessionToken::generate();
        let other = SessionToken::generate();
        let (mine, theirs) = (Uuid::new_v4(), Uuid::new_v4());

        // Pre-existing lock: must be visible via hydration alone.
        service.acquire(mine, function, &me).await.unwrap();

        let cache = LockCache::spawn(function, me.clone(), service.clone())
            .await
            .unwrap();
        assert!(cache.is_locked(mine));
        assert!(cache.is_locked_by_me(mine));

        // Live insert from another session.
        service.acquire(theirs, function, &other).await.unwrap();
        settle().await;
        assert!(cache.is_locked(theirs));
        assert!(!cache.is_locked_by_me(theirs));

        // Live delete.
        service.release(theirs, function, &other).await.unwrap();
        settle().await;
        assert!(!cache.is_locked(theirs));
        assert_eq!(cache.locked_count(), 1);
    }

    #[tokio::test]
    async fn ignores_other_functions() {
        let (service, _) = service_with_backend();
        let (function, elsewhere) = (Uuid::new_v4(), Uuid::new_v4());
        let me = SessionToken::generate();
        let seat = Uuid::new_v4();

        let cache = LockCache::spawn(function, me.clone(), service.clone())
            .await
            .unwrap();

        service.acquire(seat, elsewhere, &me).await.unwrap();
        settle().await;
        assert!(!cache.is_locked(seat));
        assert_eq!(cache.locked_count(), 0);
    }

    #[tokio::test]
    async fn expired_entries_read_as_free() {
        let (service, _) = service_with_backend();
        let function = Uuid::new_v4();
        let me = SessionToken::generate();
        let seat = Uuid::new_v4();

        let cache = LockCache::spawn(function, me.clone(), service.clone())
            .await
            .unwrap();

        // A lock whose TTL already passed, delivered before any sweep.
        let now = Utc::now();
        service.feed().publish(LockEvent::insert(SeatLock {
            seat_id: seat,
            function_id: function,
            session_id: SessionToken::generate(),
            status: LockStatus::Locked,
            locked_at: now - ChronoDuration::seconds(1000),
            expires_at: now - ChronoDuration::seconds(100),
        }));
        settle().await;
        assert!(!cache.is_locked(seat));
    }

    #[tokio::test]
    async fn lag_triggers_rehydration_from_the_store() {
        let (service, backend) = service_with_backend();
        let function = Uuid::new_v4();
        let me = SessionToken::generate();
        let seat = Uuid::new_v4();

        let cache = LockCache::spawn(function, me.clone(), service.clone())
            .await
            .unwrap();

        // Grow the authoritative state without an event, then flood the
        // feed past its capacity so the receiver lags and must rebuild.
        backend.acquire(seat, function, &me, 900).await.unwrap();
        let elsewhere = Uuid::new_v4();
        for _ in 0..32 {
            service.feed().publish(LockEvent::insert(SeatLock {
                seat_id: Uuid::new_v4(),
                function_id: elsewhere,
                session_id: SessionToken::generate(),
                status: LockStatus::Locked,
                locked_at: Utc::now(),
                expires_at: Utc::now() + ChronoDuration::seconds(900),
            }));
        }

        settle().await;
        assert!(cache.is_locked(seat), "rehydration must pick up missed state");
        assert!(!cache.is_stale(), "staleness must clear once rebuilt");
    }
}
