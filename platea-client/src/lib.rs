pub mod cache;
pub mod cart;
pub mod session;

pub use cache::LockCache;
pub use cart::{CartNotice, CartSeat, CartService, ToggleOutcome};
pub use session::SessionStore;
