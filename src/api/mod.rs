//! HTTP & WebSocket Front Door
//!
//! Router assembly: public routes (register/login/info and the websocket
//! endpoint, which authenticates in-band) merged with bearer-protected
//! account routes.

pub mod routes;
pub mod ws;

use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{auth_middleware, JwtHandler};
use crate::config::Settings;
use crate::hub::Hub;
use crate::paper::PaperEngine;
use crate::state::SharedState;
use crate::storage::Storage;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub state: SharedState,
    pub storage: Arc<Storage>,
    pub hub: Arc<Hub>,
    pub jwt: Arc<JwtHandler>,
    pub paper: Arc<PaperEngine>,
}

pub fn router(ctx: AppContext) -> Router {
    let public = Router::new()
        .route("/register", post(routes::register))
        .route("/login", post(routes::login))
        .route("/info", get(routes::info))
        .route("/ws", get(ws::ws_handler))
        .with_state(ctx.clone());

    let protected = Router::new()
        .route("/deposit", post(routes::deposit))
        .route("/orders", post(routes::submit_order))
        .route(
            "/orders/:token_id",
            get(routes::order_status).delete(routes::cancel_order),
        )
        .route("/balance", get(routes::balance))
        .route_layer(axum_mw::from_fn_with_state(
            ctx.jwt.clone(),
            auth_middleware,
        ))
        .with_state(ctx);

    Router::new()
        .merge(public)
        .merge(protected)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
