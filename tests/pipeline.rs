//! Aggregator → hub → matcher scenarios driven with synthetic venue events.

use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;

use crossfeed::config::Settings;
use crossfeed::hub::{Hub, Subscription};
use crossfeed::market::Aggregator;
use crossfeed::models::{OrderSide, OrderStatus};
use crossfeed::paper::PaperEngine;
use crossfeed::state::{self, SharedState};
use crossfeed::storage::Storage;

struct Rig {
    state: SharedState,
    hub: Arc<Hub>,
    paper: Arc<PaperEngine>,
    aggregator: Arc<Aggregator>,
    _tmp: TempDir,
}

fn rig(intervals: Vec<u32>) -> Rig {
    let tmp = TempDir::new().unwrap();
    let settings = Arc::new(Settings::default());
    let state = state::new_shared();
    let storage = Arc::new(Storage::new(tmp.path().join("state.json")));
    let hub = Arc::new(Hub::new());
    let paper = Arc::new(PaperEngine::new(
        state.clone(),
        storage,
        settings,
    ));
    let aggregator = Aggregator::new(state.clone(), hub.clone(), paper.clone(), intervals);
    Rig {
        state,
        hub,
        paper,
        aggregator,
        _tmp: tmp,
    }
}

fn subscribe(
    hub: &Hub,
    stream: &str,
    symbol: &str,
    exchange: &str,
    interval: Option<&str>,
    half_life: Option<f64>,
) -> mpsc::UnboundedReceiver<String> {
    let (id, _tx, rx) = hub.register("tester".to_string());
    hub.subscribe(
        id,
        Subscription {
            stream: stream.to_string(),
            symbol: symbol.to_string(),
            exchange: exchange.to_string(),
            interval: interval.map(|i| i.to_string()),
            half_life,
        },
    );
    rx
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(text) = rx.try_recv() {
        out.push(serde_json::from_str(&text).unwrap());
    }
    out
}

#[tokio::test]
async fn test_synthetic_best_across_venues() {
    let rig = rig(vec![]);
    let mut rx = subscribe(&rig.hub, "best_touch", "BTCUSDT", "all", None, None);

    rig.aggregator
        .on_quote("binance", "BTCUSDT", Some(100.0), Some(101.0), 1.0)
        .await;
    rig.aggregator
        .on_quote("okx", "BTCUSDT", Some(99.0), Some(100.5), 2.0)
        .await;

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 2);

    // After both venues quoted: bid from binance, ask from okx.
    let data = &frames[1]["data"];
    assert_eq!(data["symbol"], "BTCUSDT");
    assert_eq!(data["best_bid"], 100.0);
    assert_eq!(data["best_bid_exchange"], "binance");
    assert_eq!(data["best_ask"], 100.5);
    assert_eq!(data["best_ask_exchange"], "okx");
}

#[tokio::test]
async fn test_best_touch_fill_settles_balances() {
    let rig = rig(vec![]);
    rig.paper.deposit("alice", "USDT", 10_000.0).await;
    rig.paper
        .place_order("alice", "ord-1", "BTCUSDT", OrderSide::Buy, 50_000.0, 0.01)
        .await
        .unwrap();

    rig.aggregator
        .on_quote("binance", "BTCUSDT", Some(48_990.0), Some(49_000.0), 1.0)
        .await;

    let order = rig.paper.get_order("alice", "ord-1").unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_price, Some(49_000.0));

    let st = rig.state.lock();
    let usdt = st.balance("alice", "USDT");
    let btc = st.balance("alice", "BTC");
    assert!((usdt.total - 9_510.0).abs() < 1e-9);
    assert!((usdt.available - 9_510.0).abs() < 1e-9);
    assert!((btc.total - 0.01).abs() < 1e-12);
    assert!((btc.available - 0.01).abs() < 1e-12);
}

#[tokio::test]
async fn test_matcher_observes_committed_best_touch() {
    let rig = rig(vec![]);
    rig.paper.deposit("alice", "USDT", 10_000.0).await;
    rig.paper
        .place_order("alice", "ord-1", "BTCUSDT", OrderSide::Buy, 49_500.0, 0.01)
        .await
        .unwrap();

    // First quote does not cross; the order stays open.
    rig.aggregator
        .on_quote("binance", "BTCUSDT", Some(49_600.0), Some(49_700.0), 1.0)
        .await;
    assert_eq!(
        rig.paper.get_order("alice", "ord-1").unwrap().status,
        OrderStatus::Open
    );

    // A better ask from a second venue crosses through the fold.
    rig.aggregator
        .on_quote("okx", "BTCUSDT", Some(49_300.0), Some(49_400.0), 2.0)
        .await;
    let order = rig.paper.get_order("alice", "ord-1").unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_price, Some(49_400.0));
}

#[tokio::test]
async fn test_trade_fans_out_with_venue_filter() {
    let rig = rig(vec![]);
    let mut rx_binance = subscribe(&rig.hub, "trades", "BTCUSDT", "binance", None, None);
    let mut rx_all = subscribe(&rig.hub, "trades", "BTCUSDT", "all", None, None);

    rig.aggregator.on_trade("binance", "BTCUSDT", 100.0, 1.0, 1.0);
    rig.aggregator.on_trade("okx", "BTCUSDT", 101.0, 1.0, 2.0);

    let binance_frames = drain(&mut rx_binance);
    assert_eq!(binance_frames.len(), 1);
    assert_eq!(binance_frames[0]["data"]["exchange"], "binance");
    assert_eq!(binance_frames[0]["data"]["price"], 100.0);

    assert_eq!(drain(&mut rx_all).len(), 2);
}

#[tokio::test]
async fn test_trade_builds_venue_and_aggregate_candles() {
    let rig = rig(vec![10]);
    let mut rx_all = subscribe(&rig.hub, "klines", "BTCUSDT", "all", Some("10s"), None);

    rig.aggregator.on_trade("binance", "BTCUSDT", 10.0, 2.0, 1003.0);

    let frames = drain(&mut rx_all);
    assert_eq!(frames.len(), 1);
    let data = &frames[0]["data"];
    assert_eq!(data["exchange"], "all");
    assert_eq!(data["interval"], "10s");
    assert_eq!(data["start"], 1000.0);
    assert_eq!(data["end"], 1010.0);
    assert_eq!(data["open"], 10.0);
    assert_eq!(data["volume"], 2.0);
}

#[tokio::test]
async fn test_idle_candle_republishes_then_rolls() {
    let rig = rig(vec![10]);

    rig.aggregator.on_trade("binance", "BTCUSDT", 10.0, 1.0, 1000.0);

    // Mid-interval ticks republish the same candle for both keys.
    let published = rig.aggregator.tick_once(1005.0);
    assert_eq!(published.len(), 2);
    for (_, candle) in &published {
        assert_eq!(candle.start, 1000.0);
        assert_eq!(candle.close, 10.0);
        assert_eq!(candle.volume, 1.0);
    }

    // Once the interval elapses the candle rolls flat at the close.
    let published = rig.aggregator.tick_once(1010.0);
    for (_, candle) in &published {
        assert_eq!(candle.start, 1010.0);
        assert_eq!(candle.end, 1020.0);
        assert_eq!(candle.open, 10.0);
        assert_eq!(candle.high, 10.0);
        assert_eq!(candle.low, 10.0);
        assert_eq!(candle.close, 10.0);
        assert_eq!(candle.volume, 0.0);
    }

    // And keeps republishing after the roll.
    let published = rig.aggregator.tick_once(1011.0);
    assert_eq!(published.len(), 2);
    for (_, candle) in &published {
        assert_eq!(candle.start, 1010.0);
    }
}

#[tokio::test]
async fn test_ewma_emits_once_per_matching_trade() {
    let rig = rig(vec![]);
    let mut rx = subscribe(&rig.hub, "ewma", "BTCUSDT", "all", None, Some(10.0));

    rig.aggregator.on_trade("binance", "BTCUSDT", 100.0, 1.0, 1000.0);
    rig.aggregator.on_trade("binance", "BTCUSDT", 110.0, 1.0, 1010.0);

    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["data"]["value"], 100.0);
    let value = frames[1]["data"]["value"].as_f64().unwrap();
    assert!((value - 105.0).abs() < 1e-9);
    assert_eq!(frames[1]["data"]["exchange"], "all");
    assert_eq!(frames[1]["data"]["half_life"], 10.0);
}

#[tokio::test]
async fn test_last_trade_is_latest_per_venue() {
    let rig = rig(vec![]);
    rig.aggregator.on_trade("binance", "BTCUSDT", 100.0, 1.0, 1.0);
    rig.aggregator.on_trade("binance", "BTCUSDT", 102.0, 1.0, 2.0);
    rig.aggregator.on_trade("okx", "BTCUSDT", 101.0, 1.0, 3.0);

    let st = rig.state.lock();
    let per_venue = st.last_trade.get("BTCUSDT").unwrap();
    assert_eq!(per_venue["binance"], 102.0);
    assert_eq!(per_venue["okx"], 101.0);
}
