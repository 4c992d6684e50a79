use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use platea_domain::{LockError, LockEvent, LockEventKind, LockResult, SessionToken};
use platea_store::LockService;

/// One entry of the shopper's cart. Pricing and zone data come from
/// the seat map; this engine only tracks the seat identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartSeat {
    pub seat_id: Uuid,
    pub zone_name: String,
    pub price_amount: i32,
}

/// User-facing notices. `Expired` (the shopper ran out the clock) and
/// `SeatTaken` (someone else got the seat) are deliberately distinct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartNotice {
    SeatUnavailable { seat_id: Uuid },
    SeatTaken { seat_id: Uuid },
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    Added,
    Removed,
    /// The acquire lost the race; the cart is unchanged.
    Rejected,
}

struct CartInner {
    seats: Vec<CartSeat>,
    deadline: Option<DateTime<Utc>>,
    /// Bumped whenever the countdown is cancelled, so a stale timer
    /// task that already fired its sleep cannot expire a newer cart.
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

struct CartShared {
    function_id: Uuid,
    me: SessionToken,
    service: Arc<LockService>,
    inner: Mutex<CartInner>,
    notices: mpsc::UnboundedSender<CartNotice>,
}

/// The shopper's reservation: cart contents, the shared countdown, and
/// the conflict watcher. All seats in one cart share one deadline,
/// anchored to the first seat's lock time plus the TTL. Adding seats
/// later never extends it, so a reservation cannot be kept alive by
/// drip-adding one seat at a time.
pub struct CartService {
    shared: Arc<CartShared>,
    watcher: JoinHandle<()>,
}

impl CartService {
    pub fn spawn(
        function_id: Uuid,
        me: SessionToken,
        service: Arc<LockService>,
    ) -> (Self, mpsc::UnboundedReceiver<CartNotice>) {
        let (notices, notices_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(CartShared {
            function_id,
            me,
            service: Arc::clone(&service),
            inner: Mutex::new(CartInner {
                seats: Vec::new(),
                deadline: None,
                epoch: 0,
                timer: None,
            }),
            notices,
        });

        let rx = service.feed().subscribe();
        let watcher = tokio::spawn(watch_feed(Arc::clone(&shared), rx));

        (Self { shared, watcher }, notices_rx)
    }

    /// The only public mutation: adds the seat if absent (acquiring its
    /// lock first), removes it if present (releasing the lock).
    pub async fn toggle(&self, seat: CartSeat) -> LockResult<ToggleOutcome> {
        let shared = &self.shared;
        let held = {
            let inner = shared.inner.lock().expect("cart poisoned");
            inner.seats.iter().any(|s| s.seat_id == seat.seat_id)
        };

        if held {
            // Drop it from the cart before the release round-trip so
            // the watcher cannot misread our own delete event as a
            // steal, and so a failed release never leaves the UI
            // showing a seat we no longer hold.
            shared.remove_seat(seat.seat_id);
            if let Err(e) = shared
                .service
                .release(seat.seat_id, shared.function_id, &shared.me)
                .await
            {
                warn!(seat_id = %seat.seat_id, "release failed, TTL sweep will reclaim: {e}");
            }
            return Ok(ToggleOutcome::Removed);
        }

        match shared
            .service
            .acquire(seat.seat_id, shared.function_id, &shared.me)
            .await
        {
            Ok(acquired) => {
                let mut inner = shared.inner.lock().expect("cart poisoned");
                // Re-check under the lock: a concurrent toggle for the
                // same seat may have pushed it while we were acquiring
                // (our acquire then came back as a refresh). The seat
                // is in the cart either way; never push it twice.
                if inner.seats.iter().any(|s| s.seat_id == seat.seat_id) {
                    return Ok(ToggleOutcome::Added);
                }
                let was_empty = inner.seats.is_empty();
                inner.seats.push(seat);
                if was_empty {
                    // First seat of a fresh cart starts the one shared
                    // countdown; later adds leave it alone.
                    inner.deadline = Some(acquired.lock.expires_at);
                    inner.epoch += 1;
                    let handle = tokio::spawn(expire_after(
                        Arc::clone(shared),
                        inner.epoch,
                        Duration::from_secs(shared.service.ttl_seconds()),
                    ));
                    inner.timer = Some(handle);
                }
                Ok(ToggleOutcome::Added)
            }
            Err(LockError::SeatUnavailable) => {
                let _ = shared
                    .notices
                    .send(CartNotice::SeatUnavailable { seat_id: seat.seat_id });
                Ok(ToggleOutcome::Rejected)
            }
            Err(e) => Err(e),
        }
    }

    /// Hands the cart to the payment flow: every seat is converted to
    /// `sold` in one atomic step, the countdown stops, and the cart
    /// empties. On failure the cart is left untouched.
    pub async fn checkout(&self) -> LockResult<Vec<CartSeat>> {
        let shared = &self.shared;
        let seats = {
            let inner = shared.inner.lock().expect("cart poisoned");
            inner.seats.clone()
        };
        if seats.is_empty() {
            return Ok(Vec::new());
        }

        let seat_ids: Vec<Uuid> = seats.iter().map(|s| s.seat_id).collect();
        shared
            .service
            .mark_sold(shared.function_id, &seat_ids, &shared.me)
            .await?;

        let mut inner = shared.inner.lock().expect("cart poisoned");
        inner.cancel_timer();
        inner.seats.clear();
        Ok(seats)
    }

    /// Explicit abandon: releases every held seat and empties the cart.
    pub async fn clear(&self) {
        let shared = &self.shared;
        let seats = {
            let mut inner = shared.inner.lock().expect("cart poisoned");
            inner.cancel_timer();
            std::mem::take(&mut inner.seats)
        };
        release_batch(shared, seats).await;
    }

    pub fn seats(&self) -> Vec<CartSeat> {
        self.shared.inner.lock().expect("cart poisoned").seats.clone()
    }

    pub fn contains(&self, seat_id: Uuid) -> bool {
        self.shared
            .inner
            .lock()
            .expect("cart poisoned")
            .seats
            .iter()
            .any(|s| s.seat_id == seat_id)
    }

    pub fn is_empty(&self) -> bool {
        self.shared.inner.lock().expect("cart poisoned").seats.is_empty()
    }

    /// When the reservation lapses, shared by every seat in the cart.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.shared.inner.lock().expect("cart poisoned").deadline
    }
}

impl Drop for CartService {
    fn drop(&mut self) {
        self.watcher.abort();
        let mut inner = self.shared.inner.lock().expect("cart poisoned");
        inner.cancel_timer();
    }
}

impl CartInner {
    fn cancel_timer(&mut self) {
        self.epoch += 1;
        self.deadline = None;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl CartShared {
    /// Removes the seat and stops the countdown if the cart emptied.
    /// Returns whether the seat was present.
    fn remove_seat(&self, seat_id: Uuid) -> bool {
        let mut inner = self.inner.lock().expect("cart poisoned");
        let before = inner.seats.len();
        inner.seats.retain(|s| s.seat_id != seat_id);
        let removed = inner.seats.len() != before;
        if removed && inner.seats.is_empty() {
            inner.cancel_timer();
        }
        removed
    }
}

async fn release_batch(shared: &CartShared, seats: Vec<CartSeat>) {
    for seat in seats {
        if let Err(e) = shared
            .service
            .release(seat.seat_id, shared.function_id, &shared.me)
            .await
        {
            warn!(seat_id = %seat.seat_id, "batch release failed, TTL sweep will reclaim: {e}");
        }
    }
}

/// The countdown body. On firing it releases every held seat in one
/// batch, empties the cart and tells the shopper their time ran out.
async fn expire_after(shared: Arc<CartShared>, epoch: u64, ttl: Duration) {
    tokio::time::sleep(ttl).await;

    let seats = {
        let mut inner = shared.inner.lock().expect("cart poisoned");
        if inner.epoch != epoch || inner.seats.is_empty() {
            return;
        }
        inner.deadline = None;
        inner.timer = None;
        std::mem::take(&mut inner.seats)
    };

    debug!(count = seats.len(), "reservation window expired, releasing cart");
    release_batch(&shared, seats).await;
    let _ = shared.notices.send(CartNotice::Expired);
}

/// Conflict notifier: watches the change feed for cart seats that were
/// deleted or re-locked by someone else, removes them immediately and
/// raises a notice distinct from timer expiry.
async fn watch_feed(shared: Arc<CartShared>, mut rx: broadcast::Receiver<LockEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if event.function_id() != shared.function_id {
                    continue;
                }
                let stolen = match event.kind {
                    LockEventKind::Delete => true,
                    LockEventKind::Insert | LockEventKind::Update => {
                        !event.lock.is_owned_by(&shared.me)
                    }
                };
                if stolen && shared.remove_seat(event.seat_id()) {
                    let _ = shared
                        .notices
                        .send(CartNotice::SeatTaken { seat_id: event.seat_id() });
                }
            }
            Err(RecvError::Lagged(missed)) => {
                // Missed events may include a steal; reconcile the cart
                // against the authoritative store.
                warn!(missed, "cart watcher lagged, reconciling against the store");
                reconcile(&shared).await;
            }
            Err(RecvError::Closed) => return,
        }
    }
}

async fn reconcile(shared: &CartShared) {
    let locks = match shared.service.list(shared.function_id).await {
        Ok(locks) => locks,
        Err(e) => {
            warn!("cart reconcile failed: {e}");
            return;
        }
    };
    let lost: Vec<Uuid> = {
        let inner = shared.inner.lock().expect("cart poisoned");
        inner
            .seats
            .iter()
            .map(|s| s.seat_id)
            .filter(|seat_id| {
                !locks
                    .iter()
                    .any(|l| l.seat_id == *seat_id && l.is_owned_by(&shared.me))
            })
            .collect()
    };
    for seat_id in lost {
        if shared.remove_seat(seat_id) {
            let _ = shared.notices.send(CartNotice::SeatTaken { seat_id });
        }
    }
}
