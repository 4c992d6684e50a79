use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque, durable token identifying one shopper. Minted client-side,
/// never resolved to a server-side record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStatus {
    /// Held by a session until `expires_at`.
    Locked,
    /// Converted to a sale by the checkout flow. Terminal: never swept,
    /// never re-acquirable.
    Sold,
}

impl LockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockStatus::Locked => "locked",
            LockStatus::Sold => "sold",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "locked" => Some(LockStatus::Locked),
            "sold" => Some(LockStatus::Sold),
            _ => None,
        }
    }
}

/// The exclusive, time-bounded claim one session holds on one seat for
/// one function. At most one unexpired lock may exist per
/// `(seat_id, function_id)` pair; that uniqueness is enforced by the
/// backing store, not by this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatLock {
    pub seat_id: Uuid,
    pub function_id: Uuid,
    pub session_id: SessionToken,
    pub status: LockStatus,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SeatLock {
    /// Whether this lock has outlived its TTL. Sold locks never expire.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == LockStatus::Locked && now > self.expires_at
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now)
    }

    pub fn is_owned_by(&self, owner: &SessionToken) -> bool {
        &self.session_id == owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lock(expires_in: i64) -> SeatLock {
        let now = Utc::now();
        SeatLock {
            seat_id: Uuid::new_v4(),
            function_id: Uuid::new_v4(),
            session_id: SessionToken::generate(),
            status: LockStatus::Locked,
            locked_at: now,
            expires_at: now + Duration::seconds(expires_in),
        }
    }

    #[test]
    fn expiry_is_relative_to_observation_time() {
        let l = lock(900);
        let now = Utc::now();
        assert!(l.is_active_at(now));
        assert!(l.is_expired_at(now + Duration::seconds(901)));
    }

    #[test]
    fn sold_locks_never_expire() {
        let mut l = lock(-60);
        assert!(l.is_expired_at(Utc::now()));
        l.status = LockStatus::Sold;
        assert!(l.is_active_at(Utc::now() + Duration::days(365)));
    }

    #[test]
    fn status_round_trips_through_text() {
        assert_eq!(LockStatus::parse("locked"), Some(LockStatus::Locked));
        assert_eq!(LockStatus::parse("sold"), Some(LockStatus::Sold));
        assert_eq!(LockStatus::parse("released"), None);
        assert_eq!(LockStatus::Sold.as_str(), "sold");
    }
}
