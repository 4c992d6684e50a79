use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use platea_domain::{
    Acquired, LockBackend, LockEvent, LockResult, Released, SeatLock, SessionToken,
};

use crate::events::EventProducer;
use crate::feed::ChangeFeed;

/// Single entry point for every lock mutation. Wraps the configured
/// backend, broadcasts each successful mutation on the change feed,
/// republishes to Kafka best-effort, and (when enabled) mirrors writes
/// to the alternate backend. The mirror is never authoritative: its
/// failures are logged, not surfaced.
pub struct LockService {
    primary: Arc<dyn LockBackend>,
    mirror: Option<Arc<dyn LockBackend>>,
    feed: ChangeFeed,
    kafka: Option<Arc<EventProducer>>,
    ttl_seconds: u64,
}

impl LockService {
    pub fn new(primary: Arc<dyn LockBackend>, feed: ChangeFeed, ttl_seconds: u64) -> Self {
        Self {
            primary,
            mirror: None,
            feed,
            kafka: None,
            ttl_seconds,
        }
    }

    pub fn with_mirror(mut self, mirror: Arc<dyn LockBackend>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn with_kafka(mut self, kafka: Arc<EventProducer>) -> Self {
        self.kafka = Some(kafka);
        self
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    async fn emit(&self, event: LockEvent) {
        if let Some(kafka) = &self.kafka {
            kafka.publish_lock_event(&event).await;
        }
        self.feed.publish(event);
    }

    pub async fn acquire(
        &self,
        seat_id: Uuid,
        function_id: Uuid,
        owner: &SessionToken,
    ) -> LockResult<Acquired> {
        let acquired = self
            .primary
            .acquire(seat_id, function_id, owner, self.ttl_seconds)
            .await?;

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror
                .acquire(seat_id, function_id, owner, self.ttl_seconds)
                .await
            {
                warn!(%seat_id, %function_id, "mirror acquire failed: {e}");
            }
        }

        let event = if acquired.refreshed {
            LockEvent::update(acquired.lock.clone())
        } else {
            LockEvent::insert(acquired.lock.clone())
        };
        self.emit(event).await;

        Ok(acquired)
    }

    pub async fn release(
        &self,
        seat_id: Uuid,
        function_id: Uuid,
        owner: &SessionToken,
    ) -> LockResult<Released> {
        let released = self.primary.release(seat_id, function_id, owner).await?;

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.release(seat_id, function_id, owner).await {
                warn!(%seat_id, %function_id, "mirror release failed: {e}");
            }
        }

        match &released {
            Released::Deleted(lock) => {
                self.emit(LockEvent::delete(lock.clone())).await;
            }
            Released::NotHeld => {
                debug!(%seat_id, %function_id, "release was a no-op");
            }
        }

        Ok(released)
    }

    pub async fn list(&self, function_id: Uuid) -> LockResult<Vec<SeatLock>> {
        self.primary.list(function_id).await
    }

    /// Deletes expired rows and broadcasts their disappearance so every
    /// client cache drops them. The authoritative backstop for clients
    /// that vanished without releasing.
    pub async fn sweep(&self, now: DateTime<Utc>) -> LockResult<usize> {
        let victims = self.primary.sweep(now).await?;
        let count = victims.len();
        for victim in victims {
            self.emit(LockEvent::delete(victim)).await;
        }
        if count > 0 {
            info!(count, "swept expired seat locks");
        }
        Ok(count)
    }

    /// Checkout handoff: the seats stop being reservable forever.
    pub async fn mark_sold(
        &self,
        function_id: Uuid,
        seat_ids: &[Uuid],
        owner: &SessionToken,
    ) -> LockResult<Vec<SeatLock>> {
        let sold = self.primary.mark_sold(function_id, seat_ids, owner).await?;

        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.mark_sold(function_id, seat_ids, owner).await {
                warn!(%function_id, "mirror mark_sold failed: {e}");
            }
        }

        for lock in &sold {
            self.emit(LockEvent::update(lock.clone())).await;
        }
        Ok(sold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_repo::MemoryLockBackend;
    use platea_domain::LockEventKind;

    fn service() -> LockService {
        LockService::new(
            Arc::new(MemoryLockBackend::new()),
            ChangeFeed::new(64),
            900,
        )
    }

    #[tokio::test]
    async fn acquire_release_emit_feed_events() {
        let service = service();
        let mut rx = service.feed().subscribe();
        let (seat, function) = (Uuid::new_v4(), Uuid::new_v4());
        let owner = SessionToken::generate();

        service.acquire(seat, function, &owner).await.unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, LockEventKind::Insert);
        assert_eq!(ev.seat_id(), seat);

        // Same-owner re-acquire is an update, not a second insert.
        service.acquire(seat, function, &owner).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().kind, LockEventKind::Update);

        service.release(seat, function, &owner).await.unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, LockEventKind::Delete);
        assert_eq!(ev.seat_id(), seat);
    }

    #[tokio::test]
    async fn noop_release_emits_nothing() {
        let service = service();
        let mut rx = service.feed().subscribe();
        let (seat, function) = (Uuid::new_v4(), Uuid::new_v4());

        service
            .release(seat, function, &SessionToken::generate())
            .await
            .unwrap();
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn failed_acquire_emits_nothing() {
        let service = service();
        let (seat, function) = (Uuid::new_v4(), Uuid::new_v4());
        service
            .acquire(seat, function, &SessionToken::generate())
            .await
            .unwrap();

        let mut rx = service.feed().subscribe();
        let result = service
            .acquire(seat, function, &SessionToken::generate())
            .await;
        assert!(result.is_err());
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn sweep_broadcasts_each_victim() {
        let backend = Arc::new(MemoryLockBackend::new());
        let service = LockService::new(backend.clone(), ChangeFeed::new(64), 0);
        let function = Uuid::new_v4();
        let owner = SessionToken::generate();

        // TTL of zero: expired as soon as the clock ticks past.
        service.acquire(Uuid::new_v4(), function, &owner).await.unwrap();
        service.acquire(Uuid::new_v4(), function, &owner).await.unwrap();

        let mut rx = service.feed().subscribe();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let swept = service.sweep(Utc::now()).await.unwrap();
        assert_eq!(swept, 2);
        assert_eq!(rx.recv().await.unwrap().kind, LockEventKind::Delete);
        assert_eq!(rx.recv().await.unwrap().kind, LockEventKind::Delete);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn mark_sold_emits_updates() {
        let service = service();
        let mut rx = service.feed().subscribe();
        let (seat, function) = (Uuid::new_v4(), Uuid::new_v4());
        let owner = SessionToken::generate();

        service.acquire(seat, function, &owner).await.unwrap();
        rx.recv().await.unwrap();

        service.mark_sold(function, &[seat], &owner).await.unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, LockEventKind::Update);
        assert_eq!(ev.lock.status, platea_domain::LockStatus::Sold);
    }

    #[tokio::test]
    async fn mirror_failure_does_not_surface() {
        // A mirror that always conflicts: the primary answer still wins.
        let mirror = Arc::new(MemoryLockBackend::new());
        let (seat, function) = (Uuid::new_v4(), Uuid::new_v4());
        let squatter = SessionToken::generate();
        mirror.acquire(seat, function, &squatter, 900).await.unwrap();

        let service = LockService::new(
            Arc::new(MemoryLockBackend::new()),
            ChangeFeed::new(16),
            900,
        )
        .with_mirror(mirror);

        let owner = SessionToken::generate();
        let acquired = service.acquire(seat, function, &owner).await;
        assert!(acquired.is_ok());
    }
}
