//! Venue Feed Ingestors
//!
//! One streaming client per exchange, each emitting normalized quote and
//! trade events into the aggregator channel. Venues are added by
//! implementing [`VenueFeed`] and listing it in [`registry`]. Ingestors
//! absorb every fault (connect failure, decode error, dropped session),
//! wait a fixed delay, and reconnect; they never terminate the process.

pub mod binance;
pub mod okx;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

/// Normalized event in the exchange-neutral symbol namespace. Quote sides
/// that a venue did not provide (or that failed to decode) are `None`.
#[derive(Debug, Clone)]
pub enum VenueEvent {
    Quote {
        venue: &'static str,
        symbol: String,
        bid: Option<f64>,
        ask: Option<f64>,
        ts: f64,
    },
    Trade {
        venue: &'static str,
        symbol: String,
        price: f64,
        qty: f64,
        ts: f64,
    },
}

/// Capability interface for a venue streaming client.
#[async_trait]
pub trait VenueFeed: Send + Sync {
    fn name(&self) -> &'static str;

    /// Stream events for the configured symbols forever. Returns only when
    /// the downstream channel is closed.
    async fn run(&self, symbols: Vec<String>, events: mpsc::Sender<VenueEvent>);
}

/// Fixed delay between reconnect attempts.
pub(crate) const RECONNECT_DELAY: Duration = Duration::from_secs(2);
/// Outbound ping cadence.
pub(crate) const PING_INTERVAL: Duration = Duration::from_secs(20);
/// A session with no inbound frame for interval + timeout is torn down.
pub(crate) const PING_TIMEOUT: Duration = Duration::from_secs(20);

/// Resolve configured venue names to feed implementations.
pub fn registry(names: &[String]) -> Vec<Arc<dyn VenueFeed>> {
    names
        .iter()
        .filter_map(|name| match name.as_str() {
            "binance" => Some(Arc::new(binance::BinanceFeed) as Arc<dyn VenueFeed>),
            "okx" => Some(Arc::new(okx::OkxFeed) as Arc<dyn VenueFeed>),
            other => {
                warn!(venue = other, "unknown venue in configuration, skipping");
                None
            }
        })
        .collect()
}

/// Decode a JSON field that may be a number or a numeric string (venues
/// quote prices as strings).
pub(crate) fn json_f64(value: Option<&serde_json::Value>) -> Option<f64> {
    match value? {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// Local wall-clock timestamp in seconds, used when a venue message
/// carries no timestamp of its own.
pub(crate) fn local_ts() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
