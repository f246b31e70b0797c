//! Client WebSocket Endpoint
//!
//! In-band auth: the first frame must be `{"action":"auth","token":...}`
//! or the socket is closed with 1008. After that the reader loop accepts
//! subscribe/unsubscribe frames while a writer task drains the hub's
//! per-connection queue, so outbound fan-out and control replies share one
//! ordered stream.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::api::AppContext;
use crate::hub::Subscription;

pub async fn ws_handler(State(ctx): State<AppContext>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

async fn handle_socket(socket: WebSocket, ctx: AppContext) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let Some(username) = authenticate(&mut ws_rx, &ctx).await else {
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: close_code::POLICY,
                reason: "authentication failed".into(),
            })))
            .await;
        return;
    };

    let (conn_id, tx, rx) = ctx.hub.register(username.clone());
    let _ = tx.send(json!({"type": "auth", "status": "ok"}).to_string());
    info!(user = %username, "🔗 websocket client connected");

    let mut writer = tokio::spawn(drain_outbound(rx, ws_tx));

    loop {
        tokio::select! {
            _ = &mut writer => break,
            msg = ws_rx.next() => {
                let Some(Ok(msg)) = msg else {
                    break;
                };
                match msg {
                    Message::Text(text) => handle_client_frame(&ctx, conn_id, &tx, &text),
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    ctx.hub.unregister(conn_id);
    writer.abort();
    debug!(user = %username, "websocket client disconnected");
}

/// Read the mandatory auth frame and resolve the username.
async fn authenticate(ws_rx: &mut SplitStream<WebSocket>, ctx: &AppContext) -> Option<String> {
    let msg = ws_rx.next().await?.ok()?;
    let Message::Text(text) = msg else {
        return None;
    };

    let frame: serde_json::Value = serde_json::from_str(&text).ok()?;
    if frame.get("action").and_then(|a| a.as_str()) != Some("auth") {
        return None;
    }
    let token = frame.get("token").and_then(|t| t.as_str())?;
    ctx.jwt.verify(token)
}

async fn drain_outbound(
    mut rx: mpsc::UnboundedReceiver<String>,
    mut ws_tx: SplitSink<WebSocket, Message>,
) {
    while let Some(text) = rx.recv().await {
        if ws_tx.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
}

fn handle_client_frame(
    ctx: &AppContext,
    conn_id: Uuid,
    tx: &mpsc::UnboundedSender<String>,
    text: &str,
) {
    let frame: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            let _ = tx.send(json!({"type": "error", "message": "unknown action"}).to_string());
            return;
        }
    };

    match frame.get("action").and_then(|a| a.as_str()) {
        Some("subscribe") => {
            let (Some(stream), Some(symbol)) = (
                frame.get("stream").and_then(|s| s.as_str()),
                frame.get("symbol").and_then(|s| s.as_str()),
            ) else {
                let _ = tx.send(
                    json!({"type": "error", "message": "missing stream or symbol"}).to_string(),
                );
                return;
            };

            let sub = Subscription {
                stream: stream.to_string(),
                symbol: symbol.to_string(),
                exchange: frame
                    .get("exchange")
                    .and_then(|e| e.as_str())
                    .unwrap_or("all")
                    .to_string(),
                interval: frame
                    .get("interval")
                    .and_then(|i| i.as_str())
                    .map(|i| i.to_string()),
                half_life: frame.get("half_life").and_then(|h| h.as_f64()),
            };
            ctx.hub.subscribe(conn_id, sub);
            let _ = tx.send(
                json!({"type": "subscribed", "stream": stream, "symbol": symbol}).to_string(),
            );
        }
        Some("unsubscribe") => {
            let stream = frame.get("stream").and_then(|s| s.as_str()).unwrap_or("");
            let symbol = frame.get("symbol").and_then(|s| s.as_str()).unwrap_or("");
            ctx.hub.unsubscribe(conn_id, stream, symbol);
            let _ = tx.send(
                json!({"type": "unsubscribed", "stream": stream, "symbol": symbol}).to_string(),
            );
        }
        _ => {
            let _ = tx.send(json!({"type": "error", "message": "unknown action"}).to_string());
        }
    }
}
