//! Client Subscription Hub
//!
//! Registry of authenticated websocket connections with per-connection
//! subscription lists and EWMA state. Fan-out filters every market event
//! against each subscription and pushes matching frames onto a
//! per-connection unbounded queue; a writer task per socket drains the
//! queue, so a slow or dead client never blocks the pipeline. A connection
//! whose queue is closed is dropped from the registry on the next pass.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::config::interval_label;
use crate::market::Candle;
use crate::models::{BestTouchEvent, EwmaEvent, KlineEvent, TradeEvent};

/// One client subscription. `exchange` is a venue name or `"all"`.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub stream: String,
    pub symbol: String,
    pub exchange: String,
    pub interval: Option<String>,
    pub half_life: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
struct EwmaState {
    value: Option<f64>,
    last_ts: Option<f64>,
}

/// Keyed by (symbol, exchange filter, half-life bits). The bit pattern
/// stands in for the f64 so the half-life can participate in the key.
type EwmaKey = (String, String, u64);

struct HubConn {
    id: Uuid,
    username: String,
    tx: mpsc::UnboundedSender<String>,
    subs: Vec<Subscription>,
    ewma: HashMap<EwmaKey, EwmaState>,
}

#[derive(Default)]
pub struct Hub {
    conns: Mutex<Vec<HubConn>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns its id, a sender for control replies
    /// (ordered with fan-out frames), and the receiver the socket writer
    /// task drains.
    pub fn register(
        &self,
        username: String,
    ) -> (
        Uuid,
        mpsc::UnboundedSender<String>,
        mpsc::UnboundedReceiver<String>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.conns.lock().push(HubConn {
            id,
            username,
            tx: tx.clone(),
            subs: Vec::new(),
            ewma: HashMap::new(),
        });
        (id, tx, rx)
    }

    /// Drop a connection along with its subscriptions and EWMA state.
    pub fn unregister(&self, id: Uuid) {
        self.conns.lock().retain(|c| c.id != id);
    }

    pub fn connection_count(&self) -> usize {
        self.conns.lock().len()
    }

    /// Append a subscription. Duplicates are allowed and produce duplicate
    /// frames; de-duplication is the client's concern.
    pub fn subscribe(&self, id: Uuid, sub: Subscription) -> bool {
        let mut conns = self.conns.lock();
        match conns.iter_mut().find(|c| c.id == id) {
            Some(conn) => {
                debug!(
                    user = %conn.username,
                    stream = %sub.stream,
                    symbol = %sub.symbol,
                    "subscription added"
                );
                conn.subs.push(sub);
                true
            }
            None => false,
        }
    }

    /// Remove every subscription matching (stream, symbol).
    pub fn unsubscribe(&self, id: Uuid, stream: &str, symbol: &str) {
        let mut conns = self.conns.lock();
        if let Some(conn) = conns.iter_mut().find(|c| c.id == id) {
            conn.subs
                .retain(|s| !(s.stream == stream && s.symbol == symbol));
        }
    }

    pub fn broadcast_best_touch(&self, event: &BestTouchEvent) {
        let frame = frame("best_touch", event);
        // Venue is not part of the best-touch filter.
        self.fanout("best_touch", &event.symbol, None, None, &frame);
    }

    pub fn broadcast_trade(&self, event: &TradeEvent) {
        let frame = frame("trades", event);
        self.fanout(
            "trades",
            &event.symbol,
            Some(&event.exchange),
            None,
            &frame,
        );
    }

    pub fn broadcast_kline(
        &self,
        symbol: &str,
        venue: &str,
        interval_seconds: u32,
        candle: &Candle,
    ) {
        let label = interval_label(interval_seconds);
        let event = KlineEvent {
            symbol: symbol.to_string(),
            exchange: venue.to_string(),
            interval: label.clone(),
            start: candle.start,
            end: candle.end,
            open: candle.open,
            high: candle.high,
            low: candle.low,
            close: candle.close,
            volume: candle.volume,
        };
        let frame = frame("klines", &event);
        self.fanout("klines", symbol, Some(venue), Some(&label), &frame);
    }

    /// Advance the EWMA of every subscription matching this trade and push
    /// the updated value. Subscriptions without a positive half-life are
    /// inert.
    pub fn update_ewma_on_trade(&self, symbol: &str, venue: &str, price: f64, ts: f64) {
        let mut conns = self.conns.lock();
        let mut dropped = false;

        for conn in conns.iter_mut() {
            let HubConn {
                subs, ewma, tx, ..
            } = conn;

            for sub in subs.iter() {
                if !matches(sub, "ewma", symbol, Some(venue), None) {
                    continue;
                }
                let Some(half_life) = sub.half_life.filter(|h| *h > 0.0) else {
                    continue;
                };

                let key = (
                    symbol.to_string(),
                    sub.exchange.clone(),
                    half_life.to_bits(),
                );
                let state = ewma.entry(key).or_default();

                let value = match (state.value, state.last_ts) {
                    (Some(prev), last_ts) => {
                        let dt = (ts - last_ts.unwrap_or(ts)).max(0.0);
                        let alpha =
                            1.0 - (-std::f64::consts::LN_2 * dt / half_life).exp();
                        (1.0 - alpha) * prev + alpha * price
                    }
                    _ => price,
                };
                state.value = Some(value);
                state.last_ts = Some(ts);

                let event = EwmaEvent {
                    symbol: symbol.to_string(),
                    exchange: sub.exchange.clone(),
                    half_life,
                    value,
                    timestamp: ts,
                };
                if tx.send(frame("ewma", &event)).is_err() {
                    dropped = true;
                    break;
                }
            }
        }

        if dropped {
            conns.retain(|c| !c.tx.is_closed());
        }
    }

    /// Deliver a frame to every subscription matching the filter matrix.
    /// A failed send marks the connection dead; the rest are unaffected.
    fn fanout(
        &self,
        stream: &str,
        symbol: &str,
        venue: Option<&str>,
        interval: Option<&str>,
        frame: &str,
    ) {
        let mut conns = self.conns.lock();
        let mut dropped = false;

        for conn in conns.iter() {
            for sub in &conn.subs {
                if !matches(sub, stream, symbol, venue, interval) {
                    continue;
                }
                if conn.tx.send(frame.to_string()).is_err() {
                    debug!(user = %conn.username, "dropping dead connection");
                    dropped = true;
                    break;
                }
            }
        }

        if dropped {
            conns.retain(|c| !c.tx.is_closed());
        }
    }
}

fn matches(
    sub: &Subscription,
    stream: &str,
    symbol: &str,
    venue: Option<&str>,
    interval: Option<&str>,
) -> bool {
    if sub.stream != stream || sub.symbol != symbol {
        return false;
    }
    if let Some(venue) = venue {
        if sub.exchange != "all" && sub.exchange != venue {
            return false;
        }
    }
    if let Some(interval) = interval {
        if sub.interval.as_deref() != Some(interval) {
            return false;
        }
    }
    true
}

fn frame<T: serde::Serialize>(kind: &str, data: &T) -> String {
    json!({"type": kind, "data": data}).to_string()
}
