//! Request authentication.
//!
//! Identity issuance lives elsewhere; we only resolve opaque bearer tokens
//! to users via the sessions table and stash the user in request
//! extensions for handlers to pick up.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

use crate::db::{queries, AppState};
use crate::error::{AppError, Result};
use crate::models::User;

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve the bearer token to a user and attach it to the request.
/// Missing, unknown, and expired tokens all read the same to the caller.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let token = bearer_token(&req).ok_or(AppError::Unauthorized)?;

    let user = {
        let conn = state.db.get()?;
        queries::get_user_by_session_token(&conn, token)?
    }
    .ok_or(AppError::Unauthorized)?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Layered after [`require_session`]; rejects non-admin users.
pub async fn require_admin(req: Request, next: Next) -> Result<Response> {
    let user = req
        .extensions()
        .get::<User>()
        .ok_or(AppError::Unauthorized)?;

    if !user.is_admin() {
        return Err(AppError::Forbidden("Admin access required".into()));
    }
    Ok(next.run(req).await)
}
