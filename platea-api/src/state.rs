use std::sync::Arc;

use platea_store::LockService;

#[derive(Clone)]
pub struct AppState {
    pub locks: Arc<LockService>,
}
