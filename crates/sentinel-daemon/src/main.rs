use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal::unix::SignalKind;

use detection_orchestrator::{DetectionMonitor, LiveMarketDataProvider, MonitorConfig};
use finnhub_client::{FinnhubClient, FinnhubStream};
use insider_analysis::{InsiderAnalysisEngine, OracleConfig};
use newsapi_client::NewsApiClient;

mod config;
use config::DaemonConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();
    }

    tracing::info!("Starting Market Sentinel");

    let config = DaemonConfig::from_env()?;
    tracing::info!("  Watchlist: {} symbols", config.symbols.len());
    tracing::info!("  Scan interval: {:?}", config.cadence);
    tracing::info!("  Symbols per cycle: {}", config.symbols_per_cycle);
    tracing::info!("  Confidence threshold: {:.0}%", config.confidence_threshold);
    if config.finnhub_api_key.is_none() {
        tracing::info!("  No market-data key configured; quotes will be simulated");
    }
    if config.oracle_api_key.is_none() {
        tracing::info!("  No oracle key configured; scoring uses the deterministic fallback");
    }

    let provider = LiveMarketDataProvider::new(
        FinnhubClient::new(config.finnhub_api_key.clone()),
        NewsApiClient::new(config.news_api_key.clone()),
    );
    let scorer = InsiderAnalysisEngine::new(OracleConfig::new(config.oracle_api_key.clone()));
    let stream = FinnhubStream::new(config.finnhub_api_key.clone());

    let monitor = DetectionMonitor::new(
        MonitorConfig {
            symbols: config.symbols.clone(),
            cadence: config.cadence,
            symbols_per_cycle: config.symbols_per_cycle,
            confidence_threshold: config.confidence_threshold,
        },
        Arc::new(provider),
        Arc::new(scorer),
        Arc::new(stream),
    );
    monitor.start();
    tracing::info!("Monitor is running. Press Ctrl+C to stop.");

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let mut heartbeat = tokio::time::interval(Duration::from_secs(60));
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
                break;
            }
            _ = heartbeat.tick() => {
                let status = monitor.status();
                tracing::info!(
                    "Heartbeat | stream connected: {} | cycles: {} | trades seen: {} | alerts: {}",
                    status.stream_connected,
                    status.cycles_completed,
                    status.trade_events_seen,
                    status.alert_count
                );
            }
        }
    }

    monitor.stop().await;
    tracing::info!("Market Sentinel stopped");
    Ok(())
}
