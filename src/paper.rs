//! Paper Trading Engine
//!
//! Owns orders and balances. Funds are reserved when a limit order is
//! placed, released on cancellation, and settled when the synthetic best
//! touch crosses the limit. Fills are whole-quantity at the touch price.
//! Every mutation is followed by a state snapshot, written outside the
//! state lock. The invariant `0 <= available <= total` holds for every
//! (user, asset) at every step.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{split_symbol, Settings};
use crate::models::{OrderSide, OrderStatus};
use crate::state::{CoreState, Order, SharedState};
use crate::storage::Storage;

/// Domain rejection surfaced to the caller as an HTTP 400/404.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderError {
    DuplicateTokenId,
    UnknownSymbol,
    InsufficientBalance(String),
    NotFound,
    NotOwner,
    NotOpen,
}

impl OrderError {
    pub fn detail(&self) -> String {
        match self {
            Self::DuplicateTokenId => "token_id already exists".to_string(),
            Self::UnknownSymbol => "invalid symbol".to_string(),
            Self::InsufficientBalance(asset) => {
                format!("insufficient {asset} balance")
            }
            Self::NotFound => "order not found".to_string(),
            Self::NotOwner => "order not owned by user".to_string(),
            Self::NotOpen => "order is not open".to_string(),
        }
    }
}

pub struct PaperEngine {
    state: SharedState,
    storage: Arc<Storage>,
    settings: Arc<Settings>,
}

impl PaperEngine {
    pub fn new(state: SharedState, storage: Arc<Storage>, settings: Arc<Settings>) -> Self {
        Self {
            state,
            storage,
            settings,
        }
    }

    /// Credit a deposit. The asset string is taken as-is.
    pub async fn deposit(&self, username: &str, asset: &str, amount: f64) {
        {
            let mut st = self.state.lock();
            let bal = st.balance_mut(username, asset);
            bal.total += amount;
            bal.available += amount;
        }
        self.persist().await;
    }

    /// Place a limit order, reserving quote funds for buys and base funds
    /// for sells. Rejections leave no order record behind.
    pub async fn place_order(
        &self,
        username: &str,
        token_id: &str,
        symbol: &str,
        side: OrderSide,
        price: f64,
        quantity: f64,
    ) -> Result<Order, OrderError> {
        if !self.settings.has_symbol(symbol) {
            return Err(OrderError::UnknownSymbol);
        }

        let order = {
            let mut st = self.state.lock();
            if st.orders.contains_key(token_id) {
                return Err(OrderError::DuplicateTokenId);
            }

            let (base, quote) = split_symbol(symbol);
            let reserved = match side {
                OrderSide::Buy => {
                    let cost = price * quantity;
                    let bal = st.balance_mut(username, &quote);
                    if bal.available < cost {
                        return Err(OrderError::InsufficientBalance(quote));
                    }
                    bal.available -= cost;
                    cost
                }
                OrderSide::Sell => {
                    let bal = st.balance_mut(username, &base);
                    if bal.available < quantity {
                        return Err(OrderError::InsufficientBalance(base));
                    }
                    bal.available -= quantity;
                    quantity
                }
            };

            let order = Order {
                token_id: token_id.to_string(),
                username: username.to_string(),
                symbol: symbol.to_string(),
                side,
                price,
                quantity,
                status: OrderStatus::Open,
                filled_price: None,
                reason: None,
                reserved_amount: reserved,
                created_at: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
            };
            st.orders.insert(token_id.to_string(), order.clone());
            st.open_orders_by_symbol
                .entry(symbol.to_string())
                .or_default()
                .push(token_id.to_string());
            order
        };

        info!(
            user = username,
            token_id,
            symbol,
            ?side,
            price,
            quantity,
            "📝 order placed"
        );
        self.persist().await;
        Ok(order)
    }

    /// Cancel an open order owned by the caller, returning the full
    /// reservation to the available balance.
    pub async fn cancel_order(&self, username: &str, token_id: &str) -> Result<(), OrderError> {
        {
            let mut st = self.state.lock();

            let (symbol, side, reserved) = {
                let order = st.orders.get(token_id).ok_or(OrderError::NotFound)?;
                if order.username != username {
                    return Err(OrderError::NotOwner);
                }
                if order.status != OrderStatus::Open {
                    return Err(OrderError::NotOpen);
                }
                (order.symbol.clone(), order.side, order.reserved_amount)
            };

            if let Some(order) = st.orders.get_mut(token_id) {
                order.status = OrderStatus::Cancelled;
            }
            release_reserve(&mut st, username, side, &symbol, reserved);
            if let Some(ids) = st.open_orders_by_symbol.get_mut(&symbol) {
                ids.retain(|id| id != token_id);
            }
        }

        info!(user = username, token_id, "🚫 order cancelled");
        self.persist().await;
        Ok(())
    }

    /// Fetch an order if it belongs to the caller.
    pub fn get_order(&self, username: &str, token_id: &str) -> Option<Order> {
        let st = self.state.lock();
        st.orders
            .get(token_id)
            .filter(|o| o.username == username)
            .cloned()
    }

    /// Cross open orders on a symbol against a fresh synthetic best touch.
    /// The open-id list is snapshotted under the lock; each candidate is
    /// then re-validated under a fresh lock before filling, and the
    /// snapshot write happens with the lock released. Re-running with the
    /// same touch after a fill is a no-op.
    pub async fn execute_on_best_touch(
        &self,
        symbol: &str,
        best_bid: Option<f64>,
        best_ask: Option<f64>,
    ) {
        if best_bid.is_none() && best_ask.is_none() {
            return;
        }

        let order_ids: Vec<String> = {
            let st = self.state.lock();
            st.open_orders_by_symbol
                .get(symbol)
                .cloned()
                .unwrap_or_default()
        };

        for token_id in order_ids {
            let filled = {
                let mut st = self.state.lock();
                try_fill(&mut st, &token_id, best_bid, best_ask)
            };

            if let Some(fill_price) = filled {
                info!(token_id, symbol, fill_price, "✅ order filled");
                self.persist().await;
            }
        }
    }

    async fn persist(&self) {
        if let Err(e) = self.storage.persist(&self.state).await {
            warn!(error = %e, "state snapshot write failed");
        }
    }
}

/// Fill one order if the touch crosses its limit. Returns the fill price.
fn try_fill(
    st: &mut CoreState,
    token_id: &str,
    best_bid: Option<f64>,
    best_ask: Option<f64>,
) -> Option<f64> {
    let order = st.orders.get(token_id)?;
    if order.status != OrderStatus::Open {
        return None;
    }

    let fill_price = match order.side {
        OrderSide::Buy => best_ask.filter(|ask| *ask <= order.price),
        OrderSide::Sell => best_bid.filter(|bid| *bid >= order.price),
    }?;

    let username = order.username.clone();
    let symbol = order.symbol.clone();
    let side = order.side;
    let quantity = order.quantity;
    let reserved = order.reserved_amount;

    if let Some(order) = st.orders.get_mut(token_id) {
        order.status = OrderStatus::Filled;
        order.filled_price = Some(fill_price);
    }
    apply_fill(st, &username, side, &symbol, fill_price, quantity, reserved);
    if let Some(ids) = st.open_orders_by_symbol.get_mut(&symbol) {
        ids.retain(|id| id != token_id);
    }

    Some(fill_price)
}

fn release_reserve(
    st: &mut CoreState,
    username: &str,
    side: OrderSide,
    symbol: &str,
    reserved: f64,
) {
    let (base, quote) = split_symbol(symbol);
    let asset = match side {
        OrderSide::Buy => quote,
        OrderSide::Sell => base,
    };
    st.balance_mut(username, &asset).available += reserved;
}

/// Settle a fill into the balances. Buys filled below the limit return the
/// unused part of the reservation to the available quote balance.
fn apply_fill(
    st: &mut CoreState,
    username: &str,
    side: OrderSide,
    symbol: &str,
    price: f64,
    quantity: f64,
    reserved: f64,
) {
    let (base, quote) = split_symbol(symbol);
    match side {
        OrderSide::Buy => {
            let cost = price * quantity;
            {
                let quote_bal = st.balance_mut(username, &quote);
                quote_bal.total -= cost;
                if reserved > cost {
                    quote_bal.available += reserved - cost;
                }
            }
            let base_bal = st.balance_mut(username, &base);
            base_bal.total += quantity;
            base_bal.available += quantity;
        }
        OrderSide::Sell => {
            let proceeds = price * quantity;
            st.balance_mut(username, &base).total -= quantity;
            let quote_bal = st.balance_mut(username, &quote);
            quote_bal.total += proceeds;
            quote_bal.available += proceeds;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::new_shared;
    use tempfile::TempDir;

    fn engine() -> (PaperEngine, TempDir) {
        let tmp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::new(tmp.path().join("state.json")));
        let settings = Arc::new(Settings::default());
        (PaperEngine::new(new_shared(), storage, settings), tmp)
    }

    fn balance(engine: &PaperEngine, user: &str, asset: &str) -> (f64, f64) {
        let st = engine.state.lock();
        let bal = st.balance(user, asset);
        (bal.total, bal.available)
    }

    fn assert_invariant(engine: &PaperEngine) {
        let st = engine.state.lock();
        for (user, assets) in &st.balances {
            for (asset, bal) in assets {
                assert!(
                    bal.available >= -1e-9 && bal.available <= bal.total + 1e-9,
                    "invariant violated for {user}/{asset}: {bal:?}"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_buy_reserves_quote_funds() {
        let (engine, _tmp) = engine();
        engine.deposit("alice", "USDT", 10_000.0).await;

        engine
            .place_order("alice", "ord-1", "BTCUSDT", OrderSide::Buy, 50_000.0, 0.01)
            .await
            .unwrap();

        assert_eq!(balance(&engine, "alice", "USDT"), (10_000.0, 9_500.0));
        assert_invariant(&engine);
    }

    #[tokio::test]
    async fn test_buy_fills_at_improved_price() {
        let (engine, _tmp) = engine();
        engine.deposit("alice", "USDT", 10_000.0).await;
        engine
            .place_order("alice", "ord-1", "BTCUSDT", OrderSide::Buy, 50_000.0, 0.01)
            .await
            .unwrap();

        engine
            .execute_on_best_touch("BTCUSDT", Some(48_990.0), Some(49_000.0))
            .await;

        let order = engine.get_order("alice", "ord-1").unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_price, Some(49_000.0));

        // Paid 490; the 10 USDT over-reservation is returned.
        let (usdt_total, usdt_avail) = balance(&engine, "alice", "USDT");
        assert!((usdt_total - 9_510.0).abs() < 1e-9);
        assert!((usdt_avail - 9_510.0).abs() < 1e-9);
        assert_eq!(balance(&engine, "alice", "BTC"), (0.01, 0.01));

        // The open index no longer carries the order.
        let st = engine.state.lock();
        assert!(st.open_orders_by_symbol["BTCUSDT"].is_empty());
        drop(st);
        assert_invariant(&engine);
    }

    #[tokio::test]
    async fn test_sell_fill_credits_quote() {
        let (engine, _tmp) = engine();
        engine.deposit("alice", "BTC", 1.0).await;
        engine
            .place_order("alice", "ord-1", "BTCUSDT", OrderSide::Sell, 70_000.0, 0.5)
            .await
            .unwrap();

        engine
            .execute_on_best_touch("BTCUSDT", Some(70_500.0), Some(70_600.0))
            .await;

        let order = engine.get_order("alice", "ord-1").unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.filled_price, Some(70_500.0));

        assert_eq!(balance(&engine, "alice", "BTC"), (0.5, 0.5));
        assert_eq!(balance(&engine, "alice", "USDT"), (35_250.0, 35_250.0));
        assert_invariant(&engine);
    }

    #[tokio::test]
    async fn test_cancel_restores_available() {
        let (engine, _tmp) = engine();
        engine.deposit("alice", "BTC", 1.0).await;
        engine
            .place_order("alice", "ord-1", "BTCUSDT", OrderSide::Sell, 70_000.0, 0.5)
            .await
            .unwrap();
        assert_eq!(balance(&engine, "alice", "BTC"), (1.0, 0.5));

        engine.cancel_order("alice", "ord-1").await.unwrap();

        assert_eq!(balance(&engine, "alice", "BTC"), (1.0, 1.0));
        let order = engine.get_order("alice", "ord-1").unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);

        let st = engine.state.lock();
        assert!(st.open_orders_by_symbol["BTCUSDT"].is_empty());
        drop(st);
        assert_invariant(&engine);
    }

    #[tokio::test]
    async fn test_insufficient_balance_rejected() {
        let (engine, _tmp) = engine();
        engine.deposit("alice", "USDT", 100.0).await;

        let err = engine
            .place_order("alice", "ord-1", "BTCUSDT", OrderSide::Buy, 50_000.0, 0.01)
            .await
            .unwrap_err();
        assert_eq!(err, OrderError::InsufficientBalance("USDT".to_string()));
        assert_eq!(err.detail(), "insufficient USDT balance");

        // No order record, no reservation.
        assert!(engine.get_order("alice", "ord-1").is_none());
        assert_eq!(balance(&engine, "alice", "USDT"), (100.0, 100.0));
    }

    #[tokio::test]
    async fn test_duplicate_token_id_rejected() {
        let (engine, _tmp) = engine();
        engine.deposit("alice", "USDT", 10_000.0).await;
        engine.deposit("bob", "USDT", 10_000.0).await;
        engine
            .place_order("alice", "ord-1", "BTCUSDT", OrderSide::Buy, 100.0, 1.0)
            .await
            .unwrap();

        // token_id uniqueness is global, not per user.
        let err = engine
            .place_order("bob", "ord-1", "BTCUSDT", OrderSide::Buy, 100.0, 1.0)
            .await
            .unwrap_err();
        assert_eq!(err, OrderError::DuplicateTokenId);
        assert_eq!(balance(&engine, "bob", "USDT"), (10_000.0, 10_000.0));
    }

    #[tokio::test]
    async fn test_unknown_symbol_rejected() {
        let (engine, _tmp) = engine();
        let err = engine
            .place_order("alice", "ord-1", "DOGEUSDT", OrderSide::Buy, 1.0, 1.0)
            .await
            .unwrap_err();
        assert_eq!(err, OrderError::UnknownSymbol);
    }

    #[tokio::test]
    async fn test_cancel_guards() {
        let (engine, _tmp) = engine();
        engine.deposit("alice", "USDT", 10_000.0).await;
        engine
            .place_order("alice", "ord-1", "BTCUSDT", OrderSide::Buy, 100.0, 1.0)
            .await
            .unwrap();

        assert_eq!(
            engine.cancel_order("alice", "missing").await.unwrap_err(),
            OrderError::NotFound
        );
        assert_eq!(
            engine.cancel_order("mallory", "ord-1").await.unwrap_err(),
            OrderError::NotOwner
        );

        engine.cancel_order("alice", "ord-1").await.unwrap();
        assert_eq!(
            engine.cancel_order("alice", "ord-1").await.unwrap_err(),
            OrderError::NotOpen
        );
    }

    #[tokio::test]
    async fn test_execution_is_idempotent() {
        let (engine, _tmp) = engine();
        engine.deposit("alice", "USDT", 10_000.0).await;
        engine
            .place_order("alice", "ord-1", "BTCUSDT", OrderSide::Buy, 50_000.0, 0.01)
            .await
            .unwrap();

        engine
            .execute_on_best_touch("BTCUSDT", Some(48_990.0), Some(49_000.0))
            .await;
        let after_first = balance(&engine, "alice", "USDT");

        // Same touch again: terminal order, no balance movement.
        engine
            .execute_on_best_touch("BTCUSDT", Some(48_990.0), Some(49_000.0))
            .await;
        assert_eq!(balance(&engine, "alice", "USDT"), after_first);
        assert_eq!(balance(&engine, "alice", "BTC"), (0.01, 0.01));
    }

    #[tokio::test]
    async fn test_non_crossing_touch_leaves_order_open() {
        let (engine, _tmp) = engine();
        engine.deposit("alice", "USDT", 10_000.0).await;
        engine
            .place_order("alice", "ord-1", "BTCUSDT", OrderSide::Buy, 48_000.0, 0.01)
            .await
            .unwrap();

        engine
            .execute_on_best_touch("BTCUSDT", Some(48_990.0), Some(49_000.0))
            .await;

        let order = engine.get_order("alice", "ord-1").unwrap();
        assert_eq!(order.status, OrderStatus::Open);
    }

    #[tokio::test]
    async fn test_multiple_orders_fill_in_insertion_order() {
        let (engine, _tmp) = engine();
        engine.deposit("alice", "USDT", 10_000.0).await;
        engine
            .place_order("alice", "ord-1", "BTCUSDT", OrderSide::Buy, 50_000.0, 0.01)
            .await
            .unwrap();
        engine
            .place_order("alice", "ord-2", "BTCUSDT", OrderSide::Buy, 50_000.0, 0.02)
            .await
            .unwrap();

        engine
            .execute_on_best_touch("BTCUSDT", Some(48_990.0), Some(49_000.0))
            .await;

        for token_id in ["ord-1", "ord-2"] {
            let order = engine.get_order("alice", token_id).unwrap();
            assert_eq!(order.status, OrderStatus::Filled, "{token_id}");
        }
        assert_eq!(balance(&engine, "alice", "BTC"), (0.03, 0.03));
        assert_invariant(&engine);
    }
}
