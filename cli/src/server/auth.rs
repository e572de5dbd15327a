//! Bearer token authentication

use super::error::AppError;
use super::state::AppState;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

/// Caller identity attached to authenticated requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: String,
}

/// Authentication middleware that validates the bearer token and adds the
/// user to request extensions
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    let Some(token) = token else {
        return Err(AppError::missing_auth_header());
    };

    let Some(user_id) = state.user_for_token(token).map(str::to_string) else {
        tracing::debug!("Rejected request with unknown token");
        return Err(AppError::invalid_token());
    };

    req.extensions_mut().insert(AuthenticatedUser { user_id });
    Ok(next.run(req).await)
}
