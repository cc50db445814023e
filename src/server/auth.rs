//! Bearer-token gate

use super::AppState;
use crate::utils::error::AppError;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;

/// Reject requests without `Authorization: Bearer <token>` when a token is
/// configured
pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(expected) = state.api_token.as_deref() {
        if !token_matches(request.headers(), expected) {
            tracing::warn!("Rejected unauthenticated {} {}", request.method(), request.uri().path());
            return Err(AppError::Unauthorized);
        }
    }
    Ok(next.run(request).await)
}

fn token_matches(headers: &HeaderMap, expected: &str) -> bool {
    let Some(provided) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };
    provided.trim().as_bytes().ct_eq(expected.as_bytes()).into()
}
