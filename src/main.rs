//! Crossfeed — Market-Data Aggregation Router & Paper Trading
//!
//! Composition root: load the persisted snapshot, spawn the aggregator,
//! the candle tick loop and one ingestor per configured venue, then serve
//! the HTTP/WebSocket front door.

use std::sync::Arc;

use anyhow::{Context, Result};
use dotenv::dotenv;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crossfeed::{
    api::{router, AppContext},
    auth::JwtHandler,
    config::Settings,
    hub::Hub,
    market::Aggregator,
    paper::PaperEngine,
    state,
    storage::Storage,
    venues,
};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    init_tracing();

    info!("🚀 Crossfeed router starting");

    let settings = Arc::new(Settings::from_env());
    let state = state::new_shared();
    let storage = Arc::new(Storage::new(settings.storage_path.clone()));
    storage
        .load(&state)
        .await
        .context("Failed to load state snapshot")?;

    let hub = Arc::new(Hub::new());
    let jwt = Arc::new(JwtHandler::new(
        settings.secret_key.clone(),
        settings.jwt_exp_minutes,
    ));
    let paper = Arc::new(PaperEngine::new(
        state.clone(),
        storage.clone(),
        settings.clone(),
    ));
    let aggregator = Aggregator::new(
        state.clone(),
        hub.clone(),
        paper.clone(),
        settings.kline_intervals_seconds.clone(),
    );

    let (event_tx, event_rx) = mpsc::channel(1024);
    tokio::spawn(aggregator.clone().run(event_rx));
    tokio::spawn(aggregator.tick_loop());

    for feed in venues::registry(&settings.venues) {
        let symbols = settings.symbols.clone();
        let tx = event_tx.clone();
        info!(venue = feed.name(), "🛰️ starting venue ingestor");
        tokio::spawn(async move { feed.run(symbols, tx).await });
    }
    drop(event_tx);

    let ctx = AppContext {
        settings: settings.clone(),
        state,
        storage,
        hub,
        jwt,
        paper,
    };
    let app = router(ctx);

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind_addr))?;
    info!("🌐 listening on {}", settings.bind_addr);
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crossfeed=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
