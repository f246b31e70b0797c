//! HTTP Handlers
//!
//! Account registration, login, deposits, order submission and balance
//! queries. Domain rejections surface as 400 with a textual `detail`;
//! unknown orders as 404; auth failures as 401 (via the middleware).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;
use tracing::{info, warn};

use crate::api::AppContext;
use crate::auth::{hash_password, verify_password, AuthUser};
use crate::models::{
    BalanceLine, BalanceResponse, DepositRequest, InfoResponse, LoginRequest, OrderRequest,
    OrderResponse, OrderStatusResponse, RegisterRequest, TokenResponse,
};
use crate::paper::OrderError;
use crate::state::UserRecord;

pub async fn register(
    State(ctx): State<AppContext>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    if req.username.len() < 3 {
        return Err(ApiError::bad_request("username must be at least 3 characters"));
    }
    if req.password.len() < 6 {
        return Err(ApiError::bad_request("password must be at least 6 characters"));
    }

    // Hashing is deliberately slow; keep it out of the critical section.
    let password_hash = hash_password(&req.password);

    {
        let mut st = ctx.state.lock();
        if st.users.contains_key(&req.username) {
            return Err(ApiError::bad_request("user already exists"));
        }
        st.users.insert(
            req.username.clone(),
            UserRecord {
                username: req.username.clone(),
                password_hash,
            },
        );
        st.balances.entry(req.username.clone()).or_default();
    }

    if let Err(e) = ctx.storage.persist(&ctx.state).await {
        warn!(error = %e, "state snapshot write failed");
    }

    info!(user = %req.username, "👤 user registered");
    let token = ctx.jwt.issue(&req.username).map_err(|_| ApiError::Internal)?;
    Ok(Json(TokenResponse::bearer(token)))
}

pub async fn login(
    State(ctx): State<AppContext>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let stored_hash = {
        let st = ctx.state.lock();
        st.users.get(&req.username).map(|u| u.password_hash.clone())
    };

    let valid = stored_hash
        .map(|hash| verify_password(&req.password, &hash))
        .unwrap_or(false);
    if !valid {
        warn!(user = %req.username, "failed login attempt");
        return Err(ApiError::Unauthorized("invalid credentials".to_string()));
    }

    let token = ctx.jwt.issue(&req.username).map_err(|_| ApiError::Internal)?;
    Ok(Json(TokenResponse::bearer(token)))
}

pub async fn info(State(ctx): State<AppContext>) -> Json<InfoResponse> {
    Json(InfoResponse {
        assets: ctx.settings.assets(),
        pairs: ctx.settings.symbols.clone(),
    })
}

pub async fn deposit(
    State(ctx): State<AppContext>,
    Extension(AuthUser(username)): Extension<AuthUser>,
    Json(req): Json<DepositRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.amount <= 0.0 {
        return Err(ApiError::bad_request("amount must be positive"));
    }

    ctx.paper.deposit(&username, &req.asset, req.amount).await;
    Ok(Json(json!({"status": "ok"})))
}

pub async fn submit_order(
    State(ctx): State<AppContext>,
    Extension(AuthUser(username)): Extension<AuthUser>,
    Json(req): Json<OrderRequest>,
) -> Result<Json<OrderResponse>, ApiError> {
    if req.token_id.len() < 3 {
        return Err(ApiError::bad_request("token_id must be at least 3 characters"));
    }
    if req.price <= 0.0 {
        return Err(ApiError::bad_request("price must be positive"));
    }
    if req.quantity <= 0.0 {
        return Err(ApiError::bad_request("quantity must be positive"));
    }

    let order = ctx
        .paper
        .place_order(
            &username,
            &req.token_id,
            &req.symbol,
            req.side,
            req.price,
            req.quantity,
        )
        .await?;

    Ok(Json(OrderResponse {
        token_id: order.token_id,
        status: order.status,
    }))
}

pub async fn order_status(
    State(ctx): State<AppContext>,
    Extension(AuthUser(username)): Extension<AuthUser>,
    Path(token_id): Path<String>,
) -> Result<Json<OrderStatusResponse>, ApiError> {
    let order = ctx
        .paper
        .get_order(&username, &token_id)
        .ok_or_else(|| ApiError::NotFound("order not found".to_string()))?;

    Ok(Json(OrderStatusResponse {
        token_id: order.token_id,
        status: order.status,
        symbol: order.symbol,
        side: order.side,
        price: order.price,
        quantity: order.quantity,
        filled_price: order.filled_price,
        reason: order.reason,
    }))
}

pub async fn cancel_order(
    State(ctx): State<AppContext>,
    Extension(AuthUser(username)): Extension<AuthUser>,
    Path(token_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    ctx.paper.cancel_order(&username, &token_id).await?;
    Ok(Json(json!({"status": "cancelled"})))
}

pub async fn balance(
    State(ctx): State<AppContext>,
    Extension(AuthUser(username)): Extension<AuthUser>,
) -> Json<BalanceResponse> {
    let st = ctx.state.lock();
    let balances = ctx
        .settings
        .assets()
        .into_iter()
        .map(|asset| {
            let bal = st.balance(&username, &asset);
            BalanceLine {
                asset,
                total: bal.total,
                available: bal.available,
            }
        })
        .collect();
    Json(BalanceResponse { balances })
}

/// API-boundary error with a JSON `{"detail": ...}` body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Internal,
}

impl ApiError {
    fn bad_request(detail: &str) -> Self {
        Self::BadRequest(detail.to_string())
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::NotFound => Self::NotFound(err.detail()),
            _ => Self::BadRequest(err.detail()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            Self::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail),
            Self::Unauthorized(detail) => (StatusCode::UNAUTHORIZED, detail),
            Self::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
            ),
        };
        (status, Json(json!({"detail": detail}))).into_response()
    }
}
