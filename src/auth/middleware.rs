//! Authentication Middleware
//! Mission: Protect API endpoints with bearer-token validation

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::auth::jwt::JwtHandler;

/// Resolved identity of the caller, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

/// Middleware that validates the `Authorization: Bearer <token>` header and
/// makes the username available to handlers.
pub async fn auth_middleware(
    State(jwt): State<Arc<JwtHandler>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .ok_or(AuthError)?;

    let username = jwt.verify(token).ok_or(AuthError)?;
    req.extensions_mut().insert(AuthUser(username));

    Ok(next.run(req).await)
}

/// Missing, malformed, or expired token.
#[derive(Debug)]
pub struct AuthError;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Invalid or expired token"})),
        )
            .into_response()
    }
}
