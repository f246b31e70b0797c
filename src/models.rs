//! API and Stream Payload Types
//!
//! Request/response bodies for the HTTP surface and the JSON frames pushed
//! over client websockets. Wire field names use `exchange` for what the
//! internals call a venue.

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer",
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub asset: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Deserialize)]
pub struct OrderRequest {
    pub token_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub token_id: String,
    pub status: OrderStatus,
}

#[derive(Debug, Serialize)]
pub struct OrderStatusResponse {
    pub token_id: String,
    pub status: OrderStatus,
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filled_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceLine {
    pub asset: String,
    pub total: f64,
    pub available: f64,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub balances: Vec<BalanceLine>,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub assets: Vec<String>,
    pub pairs: Vec<String>,
}

/// Synthetic best bid/ask across venues for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct BestTouchEvent {
    pub symbol: String,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub best_bid_exchange: Option<String>,
    pub best_ask_exchange: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeEvent {
    pub symbol: String,
    pub exchange: String,
    pub price: f64,
    pub quantity: f64,
    pub timestamp: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KlineEvent {
    pub symbol: String,
    pub exchange: String,
    pub interval: String,
    pub start: f64,
    pub end: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EwmaEvent {
    pub symbol: String,
    pub exchange: String,
    pub half_life: f64,
    pub value: f64,
    pub timestamp: f64,
}
