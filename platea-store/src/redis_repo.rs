use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use redis::AsyncCommands;
use tracing::warn;
use uuid::Uuid;

use platea_domain::{
    Acquired, LockBackend, LockError, LockResult, LockStatus, Released, SeatLock, SessionToken,
};

// One key per seat, value "owner:locked_at_ms" (":sold" suffix once
// converted). Key expiry is the TTL, so Redis itself is the sweeper.
fn seat_key(function_id: Uuid, seat_id: Uuid) -> String {
    format!("lock:{}:{}", function_id, seat_id)
}

// Compare-and-lock: set if absent, refresh if the caller already owns
// the key, abort otherwise. The script runs atomically, which is what
// makes this strictly stronger than optimistic read-then-write under
// sub-second contention.
const ACQUIRE_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  redis.call('SET', KEYS[1], ARGV[1] .. ':' .. ARGV[2], 'PX', ARGV[3])
  return '0'
end
if string.sub(raw, -5) == ':sold' then
  return '-1'
end
local sep = string.find(raw, ':[^:]*$')
if string.sub(raw, 1, sep - 1) == ARGV[1] then
  redis.call('PEXPIRE', KEYS[1], ARGV[3])
  return string.sub(raw, sep + 1)
end
return '-1'
"#;

// Guarded delete: only the owner's value is removed.
const RELEASE_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return ''
end
if string.sub(raw, -5) == ':sold' then
  return '-1'
end
local sep = string.find(raw, ':[^:]*$')
if string.sub(raw, 1, sep - 1) == ARGV[1] then
  redis.call('DEL', KEYS[1])
  return string.sub(raw, sep + 1)
end
return '-1'
"#;

// All-or-nothing conversion: verify every seat first, then flip them.
// The script is atomic, so no acquire can interleave.
const MARK_SOLD_SCRIPT: &str = r#"
for i, key in ipairs(KEYS) do
  local raw = redis.call('GET', key)
  if not raw then return false end
  if string.sub(raw, -5) == ':sold' then return false end
  local sep = string.find(raw, ':[^:]*$')
  if string.sub(raw, 1, sep - 1) ~= ARGV[1] then return false end
end
local out = {}
for i, key in ipairs(KEYS) do
  local raw = redis.call('GET', key)
  local sep = string.find(raw, ':[^:]*$')
  redis.call('SET', key, raw .. ':sold')
  out[i] = string.sub(raw, sep + 1)
end
return out
"#;

#[derive(Clone)]
pub struct RedisLockBackend {
    client: redis::Client,
    acquire_script: redis::Script,
    release_script: redis::Script,
    mark_sold_script: redis::Script,
}

fn redis_err(e: redis::RedisError) -> LockError {
    LockError::Transient(e.to_string())
}

fn millis_to_utc(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

impl RedisLockBackend {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            acquire_script: redis::Script::new(ACQUIRE_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
            mark_sold_script: redis::Script::new(MARK_SOLD_SCRIPT),
        })
    }

    async fn conn(&self) -> LockResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(redis_err)
    }

    fn lock_from_parts(
        seat_id: Uuid,
        function_id: Uuid,
        value: &str,
        pttl_ms: i64,
    ) -> Option<SeatLock> {
        let (head, status) = match value.strip_suffix(":sold") {
            Some(head) => (head, LockStatus::Sold),
            None => (value, LockStatus::Locked),
        };
        let (owner, locked_ms) = head.rsplit_once(':')?;
        let locked_at = millis_to_utc(locked_ms.parse().ok()?);
        let expires_at = match status {
            // Sold keys are persisted; keep a stable far-out stamp.
            LockStatus::Sold => locked_at + Duration::days(365 * 10),
            LockStatus::Locked => Utc::now() + Duration::milliseconds(pttl_ms.max(0)),
        };
        Some(SeatLock {
            seat_id,
            function_id,
            session_id: SessionToken::new(owner),
            status,
            locked_at,
            expires_at,
        })
    }
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn acquire(
        &self,
        seat_id: Uuid,
        function_id: Uuid,
        owner: &SessionToken,
        ttl_seconds: u64,
    ) -> LockResult<Acquired> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let ttl_ms = ttl_seconds * 1000;

        let outcome: String = self
            .acquire_script
            .key(seat_key(function_id, seat_id))
            .arg(owner.as_str())
            .arg(now.timestamp_millis())
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_err)?;

        let (locked_at, refreshed) = match outcome.as_str() {
            "-1" => return Err(LockError::SeatUnavailable),
            "0" => (now, false),
            ms => (
                millis_to_utc(ms.parse().map_err(|_| {
                    LockError::Transient(format!("bad lock payload from redis: {outcome:?}"))
                })?),
                true,
            ),
        };

        Ok(Acquired {
            lock: SeatLock {
                seat_id,
                function_id,
                session_id: owner.clone(),
                status: LockStatus::Locked,
                locked_at,
                expires_at: now + Duration::seconds(ttl_seconds as i64),
            },
            refreshed,
        })
    }

    async fn release(
        &self,
        seat_id: Uuid,
        function_id: Uuid,
        owner: &SessionToken,
    ) -> LockResult<Released> {
        let mut conn = self.conn().await?;

        let outcome: String = self
            .release_script
            .key(seat_key(function_id, seat_id))
            .arg(owner.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(redis_err)?;

        match outcome.as_str() {
            "" => Ok(Released::NotHeld),
            "-1" => {
                warn!(%seat_id, %function_id, "release attempted by non-owner, ignoring");
                Ok(Released::NotHeld)
            }
            ms => {
                let locked_at = millis_to_utc(ms.parse().map_err(|_| {
                    LockError::Transient(format!("bad lock payload from redis: {outcome:?}"))
                })?);
                Ok(Released::Deleted(SeatLock {
                    seat_id,
                    function_id,
                    session_id: owner.clone(),
                    status: LockStatus::Locked,
                    locked_at,
                    expires_at: Utc::now(),
                }))
            }
        }
    }

    async fn list(&self, function_id: Uuid) -> LockResult<Vec<SeatLock>> {
        let mut conn = self.conn().await?;
        let pattern = format!("lock:{}:*", function_id);

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(redis_err)?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }

        let mut locks = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(seat_str) = key.rsplit(':').next() else {
                continue;
            };
            let Ok(seat_id) = Uuid::parse_str(seat_str) else {
                continue;
            };
            // GET and PTTL race against expiry; a vanished key is
            // simply no longer locked.
            let value: Option<String> = conn.get(&key).await.map_err(redis_err)?;
            let Some(value) = value else { continue };
            let pttl: i64 = conn.pttl(&key).await.map_err(redis_err)?;
            if let Some(lock) = Self::lock_from_parts(seat_id, function_id, &value, pttl) {
                locks.push(lock);
            }
        }
        Ok(locks)
    }

    async fn sweep(&self, _now: DateTime<Utc>) -> LockResult<Vec<SeatLock>> {
        // Key expiry already reclaims stale locks; there is nothing to
        // delete and nothing to report.
        Ok(Vec::new())
    }

    async fn mark_sold(
        &self,
        function_id: Uuid,
        seat_ids: &[Uuid],
        owner: &SessionToken,
    ) -> LockResult<Vec<SeatLock>> {
        if seat_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;

        let mut invocation = self.mark_sold_script.prepare_invoke();
        for seat_id in seat_ids {
            invocation.key(seat_key(function_id, *seat_id));
        }
        invocation.arg(owner.as_str());

        let outcome: Option<Vec<String>> =
            invocation.invoke_async(&mut conn).await.map_err(redis_err)?;

        let Some(locked_stamps) = outcome else {
            return Err(LockError::SeatUnavailable);
        };

        let locks = seat_ids
            .iter()
            .zip(locked_stamps)
            .map(|(seat_id, ms)| {
                let locked_at = millis_to_utc(ms.parse().unwrap_or_default());
                SeatLock {
                    seat_id: *seat_id,
                    function_id,
                    session_id: owner.clone(),
                    status: LockStatus::Sold,
                    locked_at,
                    expires_at: locked_at + Duration::days(365 * 10),
                }
            })
            .collect();
        Ok(locks)
    }
}
