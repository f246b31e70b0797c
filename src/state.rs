//! Core Application State
//!
//! One mutable state struct behind a single mutex: users, balances, orders,
//! the per-symbol open-order index, and the latest per-venue market
//! snapshots. Critical sections are short read-modify sequences; the guard
//! is always dropped before any socket or disk I/O.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::models::{OrderSide, OrderStatus};

/// Per-(user, asset) funds. `total - available` is reserved by open orders.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Balance {
    pub total: f64,
    pub available: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub token_id: String,
    pub username: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub status: OrderStatus,
    #[serde(default)]
    pub filled_price: Option<f64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub reserved_amount: f64,
    #[serde(default)]
    pub created_at: f64,
}

/// Latest top-of-book snapshot from one venue for one symbol.
#[derive(Debug, Clone)]
pub struct VenueQuote {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub timestamp: f64,
}

/// Best touch folded across venues, each side tagged with its winner.
#[derive(Debug, Clone, Default)]
pub struct SyntheticBest {
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub best_bid_venue: Option<String>,
    pub best_ask_venue: Option<String>,
}

#[derive(Debug, Default)]
pub struct CoreState {
    pub users: HashMap<String, UserRecord>,
    pub balances: HashMap<String, HashMap<String, Balance>>,
    pub orders: HashMap<String, Order>,
    /// Open order ids per symbol, insertion order retained.
    pub open_orders_by_symbol: HashMap<String, Vec<String>>,

    /// Latest quote per (symbol, venue). BTreeMap keeps the synthetic-best
    /// tie-break deterministic across processes.
    pub quotes: HashMap<String, BTreeMap<String, VenueQuote>>,
    /// Last trade price per (symbol, venue).
    pub last_trade: HashMap<String, HashMap<String, f64>>,
}

pub type SharedState = Arc<Mutex<CoreState>>;

pub fn new_shared() -> SharedState {
    Arc::new(Mutex::new(CoreState::default()))
}

impl CoreState {
    /// Balance entry for (user, asset), created zeroed on first touch.
    pub fn balance_mut(&mut self, username: &str, asset: &str) -> &mut Balance {
        self.balances
            .entry(username.to_string())
            .or_default()
            .entry(asset.to_string())
            .or_default()
    }

    pub fn balance(&self, username: &str, asset: &str) -> Balance {
        self.balances
            .get(username)
            .and_then(|assets| assets.get(asset))
            .copied()
            .unwrap_or_default()
    }

    /// Overwrite the venue snapshot for a symbol.
    pub fn apply_quote(
        &mut self,
        venue: &str,
        symbol: &str,
        bid: Option<f64>,
        ask: Option<f64>,
        timestamp: f64,
    ) {
        self.quotes.entry(symbol.to_string()).or_default().insert(
            venue.to_string(),
            VenueQuote {
                best_bid: bid,
                best_ask: ask,
                timestamp,
            },
        );
    }

    pub fn record_trade(&mut self, venue: &str, symbol: &str, price: f64) {
        self.last_trade
            .entry(symbol.to_string())
            .or_default()
            .insert(venue.to_string(), price);
    }

    /// Fold the synthetic best across every venue that has quoted the symbol:
    /// highest bid, lowest ask. Ties keep the first venue in map order.
    pub fn synthetic_best(&self, symbol: &str) -> SyntheticBest {
        let mut best = SyntheticBest::default();
        let Some(per_venue) = self.quotes.get(symbol) else {
            return best;
        };

        for (venue, quote) in per_venue {
            if let Some(bid) = quote.best_bid {
                if best.best_bid.map_or(true, |b| bid > b) {
                    best.best_bid = Some(bid);
                    best.best_bid_venue = Some(venue.clone());
                }
            }
            if let Some(ask) = quote.best_ask {
                if best.best_ask.map_or(true, |a| ask < a) {
                    best.best_ask = Some(ask);
                    best.best_ask_venue = Some(venue.clone());
                }
            }
        }

        best
    }
}
