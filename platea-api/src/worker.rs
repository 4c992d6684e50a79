use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use platea_store::LockService;

/// Background sweep: the authoritative backstop for locks whose owning
/// client vanished without releasing. Read-time filtering hides expired
/// rows immediately; this loop is what physically deletes them and
/// broadcasts the deletes.
pub async fn start_sweeper(locks: Arc<LockService>, interval_seconds: u64) {
    let mut ticker = interval(Duration::from_secs(interval_seconds.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_seconds, "Stale-lock sweeper started");

    loop {
        ticker.tick().await;
        match locks.sweep(Utc::now()).await {
            Ok(0) => {}
            Ok(count) => info!(count, "Sweeper released expired locks"),
            Err(e) => error!("Sweep pass failed: {}", e),
        }
    }
}
