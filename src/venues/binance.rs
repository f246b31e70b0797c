//! Binance Spot Feed
//!
//! Two combined-stream sessions per process: one for `bookTicker`
//! (top-of-book) and one for `trade`. Binance delivers symbols in the
//! exchange-neutral namespace already, so no rewriting is needed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{json_f64, local_ts, VenueEvent, VenueFeed, PING_INTERVAL, PING_TIMEOUT, RECONNECT_DELAY};

const BINANCE_STREAM_URL: &str = "wss://stream.binance.com:9443/stream";

pub struct BinanceFeed;

#[async_trait]
impl VenueFeed for BinanceFeed {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn run(&self, symbols: Vec<String>, events: mpsc::Sender<VenueEvent>) {
        let book = listen(
            combined_stream_url(&symbols, "bookTicker"),
            "bookTicker",
            events.clone(),
        );
        let trades = listen(combined_stream_url(&symbols, "trade"), "trade", events);
        tokio::join!(book, trades);
    }
}

fn combined_stream_url(symbols: &[String], channel: &str) -> String {
    let streams: Vec<String> = symbols
        .iter()
        .map(|s| format!("{}@{}", s.to_lowercase(), channel))
        .collect();
    format!("{}?streams={}", BINANCE_STREAM_URL, streams.join("/"))
}

async fn listen(url: String, channel: &'static str, events: mpsc::Sender<VenueEvent>) {
    loop {
        match connect_and_stream(&url, channel, &events).await {
            Ok(()) => info!(channel, "binance session closed"),
            Err(e) => warn!(channel, error = %e, "binance session failed, reconnecting"),
        }
        if events.is_closed() {
            return;
        }
        sleep(RECONNECT_DELAY).await;
    }
}

async fn connect_and_stream(
    url: &str,
    channel: &'static str,
    events: &mpsc::Sender<VenueEvent>,
) -> Result<()> {
    info!(channel, "🔌 connecting to binance");
    let (ws_stream, _) = connect_async(url)
        .await
        .context("Failed to connect to binance")?;
    info!(channel, "✅ binance connected");

    let (mut write, mut read) = ws_stream.split();

    let mut ping = interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_rx = Instant::now();

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if last_rx.elapsed() > PING_INTERVAL + PING_TIMEOUT {
                    anyhow::bail!("no frames for {:?}, session stale", last_rx.elapsed());
                }
                write.send(Message::Ping(Vec::new())).await.context("ping send failed")?;
            }
            msg = read.next() => {
                let Some(msg) = msg else {
                    return Ok(());
                };
                last_rx = Instant::now();

                match msg.context("binance stream error")? {
                    Message::Text(text) => {
                        match decode_message(&text, local_ts()) {
                            Some(event) => {
                                if events.send(event).await.is_err() {
                                    return Ok(());
                                }
                            }
                            None => debug!(channel, "skipping undecodable binance frame"),
                        }
                    }
                    Message::Ping(payload) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }
        }
    }
}

/// Decode a combined-stream frame. Trade payloads carry `"e":"trade"`;
/// bookTicker payloads have no event type. Control frames (subscription
/// acks) and payloads with missing fields yield `None`.
fn decode_message(text: &str, fallback_ts: f64) -> Option<VenueEvent> {
    let msg: serde_json::Value = serde_json::from_str(text).ok()?;
    let data = msg.get("data")?;
    let symbol = data.get("s")?.as_str()?.to_string();

    if data.get("e").and_then(|e| e.as_str()) == Some("trade") {
        let price = json_f64(data.get("p"))?;
        let qty = json_f64(data.get("q"))?;
        let ts = data
            .get("T")
            .and_then(|t| t.as_i64())
            .map(|ms| ms as f64 / 1000.0)
            .unwrap_or(fallback_ts);
        return Some(VenueEvent::Trade {
            venue: "binance",
            symbol,
            price,
            qty,
            ts,
        });
    }

    let bid = json_f64(data.get("b"));
    let ask = json_f64(data.get("a"));
    if bid.is_none() && ask.is_none() {
        return None;
    }
    Some(VenueEvent::Quote {
        venue: "binance",
        symbol,
        bid,
        ask,
        ts: fallback_ts,
    })
}
