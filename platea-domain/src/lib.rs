pub mod error;
pub mod events;
pub mod lock;
pub mod repository;

pub use error::{LockError, LockResult};
pub use events::{LockEvent, LockEventKind};
pub use lock::{LockStatus, SeatLock, SessionToken};
pub use repository::{Acquired, LockBackend, Released};
