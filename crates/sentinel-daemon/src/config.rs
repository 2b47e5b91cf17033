use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_WATCHLIST: &str = "TSLA,AAPL,NVDA,META,GOOGL,AMZN,MSFT";

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub symbols: Vec<String>,
    pub cadence: Duration,
    pub symbols_per_cycle: usize,
    pub confidence_threshold: f64,
    pub finnhub_api_key: Option<String>,
    pub news_api_key: Option<String>,
    pub oracle_api_key: Option<String>,
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        let symbols = parse_watchlist(
            &std::env::var("WATCHLIST").unwrap_or_else(|_| DEFAULT_WATCHLIST.to_string()),
        );
        if symbols.is_empty() {
            bail!("WATCHLIST must contain at least one symbol");
        }

        let cadence_seconds: u64 = env_or("SCAN_INTERVAL_SECONDS", 30);
        if cadence_seconds == 0 {
            bail!("SCAN_INTERVAL_SECONDS must be positive");
        }

        let symbols_per_cycle: usize = env_or("SYMBOLS_PER_CYCLE", 3);
        let confidence_threshold: f64 = env_or("CONFIDENCE_THRESHOLD", 85.0);
        if !(0.0..=100.0).contains(&confidence_threshold) {
            bail!("CONFIDENCE_THRESHOLD must be within 0-100");
        }

        Ok(Self {
            symbols,
            cadence: Duration::from_secs(cadence_seconds),
            symbols_per_cycle,
            confidence_threshold,
            finnhub_api_key: non_empty_env("FINNHUB_API_KEY"),
            news_api_key: non_empty_env("NEWS_API_KEY"),
            oracle_api_key: non_empty_env("ANTHROPIC_API_KEY"),
        })
    }
}

fn parse_watchlist(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
