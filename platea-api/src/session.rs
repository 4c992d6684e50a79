use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use platea_domain::SessionToken;

use crate::error::AppError;
use crate::state::AppState;

pub const SESSION_HEADER: &str = "x-session-token";

/// The shopper's opaque session token, taken from the
/// `X-Session-Token` header. The server never resolves it to anything;
/// it is only the ownership key for locks.
#[derive(Debug, Clone)]
pub struct SessionIdentity(pub SessionToken);

impl FromRequestParts<AppState> for SessionIdentity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::AuthenticationError("Missing X-Session-Token header".into())
            })?;

        Ok(SessionIdentity(SessionToken::new(token)))
    }
}
