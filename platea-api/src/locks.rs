use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use platea_domain::{Released, SeatLock};

use crate::error::AppError;
use crate::session::SessionIdentity;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AcquireLockRequest {
    pub seat_id: Uuid,
    pub function_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct AcquireLockResponse {
    pub lock: SeatLock,
    /// True when the caller already held the seat and only the TTL was
    /// extended.
    pub refreshed: bool,
}

#[derive(Debug, Serialize)]
pub struct ReleaseLockResponse {
    pub released: bool,
}

#[derive(Debug, Serialize)]
pub struct ListLocksResponse {
    pub locks: Vec<SeatLock>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub function_id: Uuid,
    pub seat_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub sold: Vec<SeatLock>,
}

// ============================================================================
// Handlers
// ============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/locks", post(acquire_lock))
        .route("/v1/locks/{function_id}/{seat_id}", delete(release_lock))
        .route("/v1/functions/{function_id}/locks", get(list_locks))
        .route("/v1/checkout", post(checkout))
}

async fn acquire_lock(
    State(state): State<AppState>,
    SessionIdentity(owner): SessionIdentity,
    Json(req): Json<AcquireLockRequest>,
) -> Result<Json<AcquireLockResponse>, AppError> {
    let acquired = state
        .locks
        .acquire(req.seat_id, req.function_id, &owner)
        .await?;

    Ok(Json(AcquireLockResponse {
        lock: acquired.lock,
        refreshed: acquired.refreshed,
    }))
}

async fn release_lock(
    State(state): State<AppState>,
    SessionIdentity(owner): SessionIdentity,
    Path((function_id, seat_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ReleaseLockResponse>, AppError> {
    let released = state.locks.release(seat_id, function_id, &owner).await?;

    Ok(Json(ReleaseLockResponse {
        released: matches!(released, Released::Deleted(_)),
    }))
}

/// Seeds late-joining clients; expired rows are already filtered.
async fn list_locks(
    State(state): State<AppState>,
    Path(function_id): Path<Uuid>,
) -> Result<Json<ListLocksResponse>, AppError> {
    let locks = state.locks.list(function_id).await?;
    Ok(Json(ListLocksResponse { locks }))
}

async fn checkout(
    State(state): State<AppState>,
    SessionIdentity(owner): SessionIdentity,
    Json(req): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>, AppError> {
    if req.seat_ids.is_empty() {
        return Err(AppError::ValidationError("seat_ids must not be empty".into()));
    }

    let sold = state
        .locks
        .mark_sold(req.function_id, &req.seat_ids, &owner)
        .await?;
    Ok(Json(CheckoutResponse { sold }))
}
