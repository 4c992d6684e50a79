/// Failure taxonomy for every lock operation. Constraint violations on
/// acquire are expected and frequent; they get their own variant so
/// callers can treat them as a user-facing notice instead of an error.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("seat is unavailable")]
    SeatUnavailable,

    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("lock is owned by another session")]
    OwnershipMismatch,

    #[error("change feed subscription failed: {0}")]
    ChannelFailure(String),
}

pub type LockResult<T> = Result<T, LockError>;

impl LockError {
    /// Transient failures may be retried at the caller's discretion;
    /// everything else is a definitive answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, LockError::Transient(_))
    }
}
