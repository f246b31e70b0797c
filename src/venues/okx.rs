//! OKX Public Feed
//!
//! One session subscribed to the `tickers` and `trades` channels for every
//! configured symbol. OKX instruments are dashed (`BTC-USDT`); symbols are
//! rewritten back to the exchange-neutral namespace on decode.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{json_f64, local_ts, VenueEvent, VenueFeed, PING_INTERVAL, PING_TIMEOUT, RECONNECT_DELAY};

const OKX_WS_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

pub struct OkxFeed;

#[async_trait]
impl VenueFeed for OkxFeed {
    fn name(&self) -> &'static str {
        "okx"
    }

    async fn run(&self, symbols: Vec<String>, events: mpsc::Sender<VenueEvent>) {
        loop {
            match connect_and_stream(&symbols, &events).await {
                Ok(()) => info!("okx session closed"),
                Err(e) => warn!(error = %e, "okx session failed, reconnecting"),
            }
            if events.is_closed() {
                return;
            }
            sleep(RECONNECT_DELAY).await;
        }
    }
}

/// Rewrite an exchange-neutral symbol to an OKX instrument id.
fn okx_instrument(symbol: &str) -> String {
    for quote in ["USDT", "USDC", "USD"] {
        if let Some(base) = symbol.strip_suffix(quote) {
            return format!("{base}-{quote}");
        }
    }
    symbol.to_string()
}

fn subscribe_frame(symbols: &[String]) -> String {
    let mut args = Vec::with_capacity(symbols.len() * 2);
    for symbol in symbols {
        let inst = okx_instrument(symbol);
        args.push(json!({"channel": "tickers", "instId": inst}));
        args.push(json!({"channel": "trades", "instId": inst}));
    }
    json!({"op": "subscribe", "args": args}).to_string()
}

async fn connect_and_stream(
    symbols: &[String],
    events: &mpsc::Sender<VenueEvent>,
) -> Result<()> {
    info!("🔌 connecting to okx");
    let (ws_stream, _) = connect_async(OKX_WS_URL)
        .await
        .context("Failed to connect to okx")?;
    info!("✅ okx connected");

    let (mut write, mut read) = ws_stream.split();

    write
        .send(Message::Text(subscribe_frame(symbols)))
        .await
        .context("Failed to send okx subscription")?;

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

                match msg.context("okx stream error")? {
                    Message::Text(text) => {
                        for event in decode_message(&text, local_ts()) {
                            if events.send(event).await.is_err() {
                                return Ok(());
                            }
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

/// Decode one OKX push message. Subscription acks and malformed items yield
/// nothing; a decode fault on one item does not drop its siblings.
fn decode_message(text: &str, fallback_ts: f64) -> Vec<VenueEvent> {
    let mut out = Vec::new();
    let Ok(msg) = serde_json::from_str::<serde_json::Value>(text) else {
        return out;
    };
    let channel = msg
        .get("arg")
        .and_then(|arg| arg.get("channel"))
        .and_then(|c| c.as_str())
        .unwrap_or("");
    let Some(items) = msg.get("data").and_then(|d| d.as_array()) else {
        return out;
    };

    for item in items {
        let Some(inst) = item.get("instId").and_then(|v| v.as_str()) else {
            debug!("okx item missing instId");
            continue;
        };
        let symbol = inst.replace('-', "");
        let ts = json_f64(item.get("ts"))
            .map(|ms| ms / 1000.0)
            .unwrap_or(fallback_ts);

        match channel {
            "tickers" => {
                let bid = json_f64(item.get("bidPx"));
                let ask = json_f64(item.get("askPx"));
                if bid.is_none() && ask.is_none() {
                    continue;
                }
                out.push(VenueEvent::Quote {
                    venue: "okx",
                    symbol,
                    bid,
                    ask,
                    ts,
                });
            }
            "trades" => {
                let (Some(price), Some(qty)) =
                    (json_f64(item.get("px")), json_f64(item.get("sz")))
                else {
                    debug!("okx trade item missing px/sz");
                    continue;
                };
                out.push(VenueEvent::Trade {
                    venue: "okx",
                    symbol,
                    price,
                    qty,
                    ts,
                });
            }
            _ => {}
        }
    }

    out
}
