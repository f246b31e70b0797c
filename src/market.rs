//! Market Aggregator
//!
//! One owner task drains the venue event channel, maintains per-symbol
//! per-venue snapshots, folds the synthetic best touch, and accumulates
//! candles across the configured intervals. Every event fans out to the
//! subscription hub; best-touch updates additionally drive the paper
//! matcher, which observes exactly the state committed by the update.
//! The candle table has its own lock so candle publishing never stalls
//! order matching; frames are broadcast only after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::hub::Hub;
use crate::models::{BestTouchEvent, TradeEvent};
use crate::paper::PaperEngine;
use crate::state::SharedState;
use crate::venues::VenueEvent;

/// OHLCV accumulator for one (symbol, venue, interval) key.
#[derive(Debug, Clone, Copy)]
pub struct Candle {
    pub start: f64,
    pub end: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    fn opening(start: f64, end: f64, price: f64, qty: f64) -> Self {
        Self {
            start,
            end,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: qty,
        }
    }

    fn absorb(&mut self, price: f64, qty: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += qty;
    }

    /// Successor candle for an elapsed interval: flat at the previous
    /// close, zero volume.
    fn rolled(&self) -> Self {
        let interval = self.end - self.start;
        Self {
            start: self.end,
            end: self.end + interval,
            open: self.close,
            high: self.close,
            low: self.close,
            close: self.close,
            volume: 0.0,
        }
    }
}

pub type CandleKey = (String, String, u32);

pub struct Aggregator {
    state: SharedState,
    hub: Arc<Hub>,
    paper: Arc<PaperEngine>,
    intervals: Vec<u32>,
    candles: Mutex<HashMap<CandleKey, Candle>>,
}

impl Aggregator {
    pub fn new(
        state: SharedState,
        hub: Arc<Hub>,
        paper: Arc<PaperEngine>,
        intervals: Vec<u32>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state,
            hub,
            paper,
            intervals,
            candles: Mutex::new(HashMap::new()),
        })
    }

    /// Drain normalized venue events until every ingestor is gone.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<VenueEvent>) {
        info!("📈 aggregator started");
        while let Some(event) = events.recv().await {
            match event {
                VenueEvent::Quote {
                    venue,
                    symbol,
                    bid,
                    ask,
                    ts,
                } => self.on_quote(venue, &symbol, bid, ask, ts).await,
                VenueEvent::Trade {
                    venue,
                    symbol,
                    price,
                    qty,
                    ts,
                } => self.on_trade(venue, &symbol, price, qty, ts),
            }
        }
        info!("aggregator channel closed");
    }

    pub async fn on_quote(
        &self,
        venue: &str,
        symbol: &str,
        bid: Option<f64>,
        ask: Option<f64>,
        ts: f64,
    ) {
        let best = {
            let mut st = self.state.lock();
            st.apply_quote(venue, symbol, bid, ask, ts);
            st.synthetic_best(symbol)
        };

        self.hub.broadcast_best_touch(&BestTouchEvent {
            symbol: symbol.to_string(),
            best_bid: best.best_bid,
            best_ask: best.best_ask,
            best_bid_exchange: best.best_bid_venue,
            best_ask_exchange: best.best_ask_venue,
        });

        self.paper
            .execute_on_best_touch(symbol, best.best_bid, best.best_ask)
            .await;
    }

    pub fn on_trade(&self, venue: &str, symbol: &str, price: f64, qty: f64, ts: f64) {
        {
            self.state.lock().record_trade(venue, symbol, price);
        }

        self.hub.broadcast_trade(&TradeEvent {
            symbol: symbol.to_string(),
            exchange: venue.to_string(),
            price,
            quantity: qty,
            timestamp: ts,
        });

        self.update_candles(symbol, venue, price, qty, ts);
        self.update_candles(symbol, "all", price, qty, ts);

        self.hub.update_ewma_on_trade(symbol, venue, price, ts);
    }

    fn update_candles(&self, symbol: &str, venue: &str, price: f64, qty: f64, ts: f64) {
        let published: Vec<(u32, Candle)> = {
            let mut candles = self.candles.lock();
            self.intervals
                .iter()
                .map(|&secs| {
                    let key = (symbol.to_string(), venue.to_string(), secs);
                    (secs, apply_trade(&mut candles, key, secs, price, qty, ts))
                })
                .collect()
        };

        for (secs, candle) in published {
            self.hub.broadcast_kline(symbol, venue, secs, &candle);
        }
    }

    /// Roll expired candles and republish every active one, so idle symbols
    /// still see at most one second of silence.
    pub async fn tick_loop(self: Arc<Self>) {
        let mut ticker = interval(Duration::from_secs(1));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let now = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
            for ((symbol, venue, secs), candle) in self.tick_once(now) {
                self.hub.broadcast_kline(&symbol, &venue, secs, &candle);
            }
        }
    }

    /// One pass of the tick loop: roll, then snapshot everything active.
    pub fn tick_once(&self, now: f64) -> Vec<(CandleKey, Candle)> {
        let mut candles = self.candles.lock();
        for candle in candles.values_mut() {
            if now >= candle.end {
                *candle = candle.rolled();
            }
        }
        candles.iter().map(|(k, c)| (k.clone(), *c)).collect()
    }
}

fn apply_trade(
    candles: &mut HashMap<CandleKey, Candle>,
    key: CandleKey,
    interval_seconds: u32,
    price: f64,
    qty: f64,
    ts: f64,
) -> Candle {
    let start = ts - (ts % interval_seconds as f64);
    let end = start + interval_seconds as f64;

    if let Some(candle) = candles.get_mut(&key) {
        if ts < candle.end {
            candle.absorb(price, qty);
            return *candle;
        }
    }

    let candle = Candle::opening(start, end, price, qty);
    candles.insert(key, candle);
    candle
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> HashMap<CandleKey, Candle> {
        HashMap::new()
    }

    fn key(secs: u32) -> CandleKey {
        ("BTCUSDT".to_string(), "all".to_string(), secs)
    }

    #[test]
    fn test_first_trade_opens_aligned_candle() {
        let mut candles = table();
        let c = apply_trade(&mut candles, key(10), 10, 100.0, 2.0, 1234.0);

        assert_eq!(c.start, 1230.0);
        assert_eq!(c.end, 1240.0);
        assert_eq!((c.open, c.high, c.low, c.close), (100.0, 100.0, 100.0, 100.0));
        assert_eq!(c.volume, 2.0);
        assert_eq!(c.start % 10.0, 0.0);
    }

    #[test]
    fn test_trades_within_interval_accumulate() {
        let mut candles = table();
        apply_trade(&mut candles, key(10), 10, 100.0, 1.0, 1230.0);
        apply_trade(&mut candles, key(10), 10, 105.0, 2.0, 1233.0);
        let c = apply_trade(&mut candles, key(10), 10, 98.0, 0.5, 1239.0);

        assert_eq!(c.open, 100.0);
        assert_eq!(c.high, 105.0);
        assert_eq!(c.low, 98.0);
        assert_eq!(c.close, 98.0);
        assert_eq!(c.volume, 3.5);
        assert!(c.low <= c.open && c.open <= c.high);
        assert!(c.low <= c.close && c.close <= c.high);
    }

    #[test]
    fn test_trade_past_end_opens_fresh_candle() {
        let mut candles = table();
        apply_trade(&mut candles, key(10), 10, 100.0, 1.0, 1230.0);
        let c = apply_trade(&mut candles, key(10), 10, 110.0, 1.0, 1245.0);

        assert_eq!(c.start, 1240.0);
        assert_eq!(c.end, 1250.0);
        assert_eq!(c.open, 110.0);
        assert_eq!(c.volume, 1.0);
    }

    #[test]
    fn test_candle_roll_carries_close() {
        let candle = Candle::opening(0.0, 10.0, 10.0, 5.0);
        let next = candle.rolled();

        assert_eq!(next.start, 10.0);
        assert_eq!(next.end, 20.0);
        assert_eq!(
            (next.open, next.high, next.low, next.close),
            (10.0, 10.0, 10.0, 10.0)
        );
        assert_eq!(next.volume, 0.0);
    }

    #[test]
    fn test_separate_keys_do_not_interfere() {
        let mut candles = table();
        apply_trade(&mut candles, key(10), 10, 100.0, 1.0, 1230.0);
        apply_trade(
            &mut candles,
            ("BTCUSDT".to_string(), "binance".to_string(), 10),
            10,
            200.0,
            1.0,
            1230.0,
        );

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[&key(10)].close, 100.0);
    }
}
