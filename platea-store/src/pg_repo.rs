use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use platea_domain::{
    Acquired, LockBackend, LockError, LockResult, LockStatus, Released, SeatLock, SessionToken,
};

/// Relational lock store. Mutual exclusion rests on the primary key
/// over `(seat_id, function_id)` plus insert-or-fail semantics: the
/// upsert only fires for the current owner or an expired row, so a late
/// writer can never silently steal an active lock.
#[derive(Clone)]
pub struct PgLockBackend {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct LockRow {
    seat_id: Uuid,
    function_id: Uuid,
    session_id: String,
    status: String,
    locked_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl LockRow {
    fn into_lock(self) -> LockResult<SeatLock> {
        let status = LockStatus::parse(&self.status)
            .ok_or_else(|| LockError::Transient(format!("unknown lock status {:?}", self.status)))?;
        Ok(SeatLock {
            seat_id: self.seat_id,
            function_id: self.function_id,
            session_id: SessionToken::new(self.session_id),
            status,
            locked_at: self.locked_at,
            expires_at: self.expires_at,
        })
    }
}

fn db_err(e: sqlx::Error) -> LockError {
    LockError::Transient(e.to_string())
}

// TIMESTAMPTZ stores microseconds. Truncate before binding so the
// stamp coming back from RETURNING compares equal to the bound value;
// a nanosecond-bearing Utc::now() would never round-trip.
fn storage_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

impl PgLockBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockBackend for PgLockBackend {
    async fn acquire(
        &self,
        seat_id: Uuid,
        function_id: Uuid,
        owner: &SessionToken,
        ttl_seconds: u64,
    ) -> LockResult<Acquired> {
        let now = storage_now();
        let expires_at = now + Duration::seconds(ttl_seconds as i64);

        // Refresh of an active same-owner row keeps the original
        // locked_at; any takeover of an expired row resets it, even by
        // the old owner. Active rows with another owner and sold rows
        // never match, so zero rows back means "unavailable".
        let row = sqlx::query_as::<_, LockRow>(
            r#"
            INSERT INTO seat_locks (seat_id, function_id, session_id, status, locked_at, expires_at)
            VALUES ($1, $2, $3, 'locked', $4, $5)
            ON CONFLICT (seat_id, function_id) DO UPDATE SET
                session_id = EXCLUDED.session_id,
                locked_at = CASE
                    WHEN seat_locks.session_id = EXCLUDED.session_id
                         AND seat_locks.expires_at > EXCLUDED.locked_at THEN seat_locks.locked_at
                    ELSE EXCLUDED.locked_at
                END,
                expires_at = EXCLUDED.expires_at
            WHERE seat_locks.status = 'locked'
              AND (seat_locks.session_id = EXCLUDED.session_id
                   OR seat_locks.expires_at <= EXCLUDED.locked_at)
            RETURNING seat_id, function_id, session_id, status, locked_at, expires_at
            "#,
        )
        .bind(seat_id)
        .bind(function_id)
        .bind(owner.as_str())
        .bind(now)
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => {
                let lock = row.into_lock()?;
                // A preserved locked_at is the refresh path.
                let refreshed = lock.locked_at != now;
                Ok(Acquired { lock, refreshed })
            }
            None => Err(LockError::SeatUnavailable),
        }
    }

    async fn release(
        &self,
        seat_id: Uuid,
        function_id: Uuid,
        owner: &SessionToken,
    ) -> LockResult<Released> {
        let row = sqlx::query_as::<_, LockRow>(
            r#"
            DELETE FROM seat_locks
            WHERE seat_id = $1 AND function_id = $2 AND session_id = $3 AND status = 'locked'
            RETURNING seat_id, function_id, session_id, status, locked_at, expires_at
            "#,
        )
        .bind(seat_id)
        .bind(function_id)
        .bind(owner.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        if let Some(row) = row {
            return Ok(Released::Deleted(row.into_lock()?));
        }

        // No-op, but a release against someone else's active lock is
        // worth noticing: it means a stale client.
        let holder: Option<String> = sqlx::query_scalar(
            "SELECT session_id FROM seat_locks WHERE seat_id = $1 AND function_id = $2",
        )
        .bind(seat_id)
        .bind(function_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        if let Some(holder) = holder {
            if holder != owner.as_str() {
                warn!(%seat_id, %function_id, "release attempted by non-owner, ignoring");
            }
        }

        Ok(Released::NotHeld)
    }

    async fn list(&self, function_id: Uuid) -> LockResult<Vec<SeatLock>> {
        let rows = sqlx::query_as::<_, LockRow>(
            r#"
            SELECT seat_id, function_id, session_id, status, locked_at, expires_at
            FROM seat_locks
            WHERE function_id = $1 AND (status = 'sold' OR expires_at > $2)
            "#,
        )
        .bind(function_id)
        .bind(Utc::now())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(LockRow::into_lock).collect()
    }

    async fn sweep(&self, now: DateTime<Utc>) -> LockResult<Vec<SeatLock>> {
        let rows = sqlx::query_as::<_, LockRow>(
            r#"
            DELETE FROM seat_locks
            WHERE status = 'locked' AND expires_at <= $1
            RETURNING seat_id, function_id, session_id, status, locked_at, expires_at
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(LockRow::into_lock).collect()
    }

    async fn mark_sold(
        &self,
        function_id: Uuid,
        seat_ids: &[Uuid],
        owner: &SessionToken,
    ) -> LockResult<Vec<SeatLock>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let rows = sqlx::query_as::<_, LockRow>(
            r#"
            UPDATE seat_locks
            SET status = 'sold'
            WHERE function_id = $1 AND seat_id = ANY($2)
              AND session_id = $3 AND status = 'locked' AND expires_at > $4
            RETURNING seat_id, function_id, session_id, status, locked_at, expires_at
            "#,
        )
        .bind(function_id)
        .bind(seat_ids)
        .bind(owner.as_str())
        .bind(Utc::now())
        .fetch_all(&mut *tx)
        .await
        .map_err(db_err)?;

        // All-or-nothing: a cart seat that expired or was taken mid
        // checkout aborts the whole conversion.
        if rows.len() != seat_ids.len() {
            tx.rollback().await.map_err(db_err)?;
            return Err(LockError::SeatUnavailable);
        }

        tx.commit().await.map_err(db_err)?;
        rows.into_iter().map(LockRow::into_lock).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The refresh decision in `acquire` compares the returned
    // locked_at against the bound `now`. TIMESTAMPTZ keeps only
    // microseconds, so the bound value must already be truncated or a
    // fresh insert reads back unequal and is misreported as a refresh.
    #[test]
    fn bound_timestamps_survive_microsecond_storage() {
        let now = storage_now();
        let stored = DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap();
        assert_eq!(stored, now);
    }
}
