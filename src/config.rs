//! Static Server Configuration
//!
//! Compiled defaults with environment overrides. Symbols use the
//! exchange-neutral namespace (`BTCUSDT`), rewritten per venue at the
//! ingestor boundary.

use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;

/// Runtime settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub secret_key: String,
    pub jwt_exp_minutes: i64,
    pub venues: Vec<String>,
    pub symbols: Vec<String>,
    pub kline_intervals_seconds: Vec<u32>,
    pub storage_path: PathBuf,
    pub bind_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            secret_key: "CHANGE_ME_DEV_SECRET".to_string(),
            jwt_exp_minutes: 60 * 24,
            venues: vec!["binance".to_string(), "okx".to_string()],
            symbols: ["BTCUSDT", "ETHUSDT", "SOLUSDT", "ADAUSDT", "XRPUSDT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            kline_intervals_seconds: vec![1, 10, 60, 300],
            storage_path: PathBuf::from("data/state.json"),
            bind_addr: "0.0.0.0:8000".to_string(),
        }
    }
}

impl Settings {
    /// Resolve settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let secret_key =
            env::var("CROSSFEED_SECRET_KEY").unwrap_or(defaults.secret_key);
        let jwt_exp_minutes = env::var("CROSSFEED_JWT_EXP_MINUTES")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(defaults.jwt_exp_minutes);
        let venues = env::var("CROSSFEED_VENUES")
            .ok()
            .map(|v| parse_csv(&v))
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.venues);
        let symbols = env::var("CROSSFEED_SYMBOLS")
            .ok()
            .map(|v| parse_csv(&v))
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.symbols);
        let storage_path = env::var("CROSSFEED_STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_path);
        let bind_addr =
            env::var("CROSSFEED_BIND_ADDR").unwrap_or(defaults.bind_addr);

        Self {
            secret_key,
            jwt_exp_minutes,
            venues,
            symbols,
            kline_intervals_seconds: defaults.kline_intervals_seconds,
            storage_path,
            bind_addr,
        }
    }

    /// Sorted union of base and quote assets across configured symbols.
    pub fn assets(&self) -> Vec<String> {
        let mut set = BTreeSet::new();
        for symbol in &self.symbols {
            let (base, quote) = split_symbol(symbol);
            set.insert(base);
            set.insert(quote);
        }
        set.into_iter().collect()
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|s| s == symbol)
    }
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split a pair into (base, quote) by quote-suffix matching.
pub fn split_symbol(symbol: &str) -> (String, String) {
    for quote in ["USDT", "USD", "USDC"] {
        if let Some(base) = symbol.strip_suffix(quote) {
            return (base.to_string(), quote.to_string());
        }
    }
    // Fallback: last three characters are the quote.
    let cut = symbol.len().saturating_sub(3);
    (symbol[..cut].to_string(), symbol[cut..].to_string())
}

/// Render an interval in seconds as a stream label (`10s`, `1m`, `5m`).
pub fn interval_label(interval_seconds: u32) -> String {
    if interval_seconds >= 60 {
        format!("{}m", interval_seconds / 60)
    } else {
        format!("{}s", interval_seconds)
    }
}
