use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Notify};
use tokio_tungstenite::{connect_async, tungstenite::Message};

use sentinel_core::{TradeEvent, TradeStream};

const FINNHUB_WS_URL: &str = "wss://ws.finnhub.io";

/// Give up after this many consecutive connection failures.
const MAX_CONNECT_FAILURES: u32 = 5;
const BACKOFF_CAP_SECS: u64 = 30;

/// Push subscription for real-time trades.
///
/// Opens at most one websocket connection, sends one subscribe directive per
/// symbol, and fans `"trade"`-tagged messages out on a broadcast channel.
/// Everything else the server sends (pings, status frames) is dropped.
pub struct FinnhubStream {
    api_key: Option<String>,
    tx: broadcast::Sender<TradeEvent>,
    connected: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl FinnhubStream {
    pub fn new(api_key: Option<String>) -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            api_key,
            tx,
            connected: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn sender(&self) -> broadcast::Sender<TradeEvent> {
        self.tx.clone()
    }

    async fn run_inner(&self, symbols: Vec<String>) {
        let Some(api_key) = self.api_key.clone() else {
            tracing::info!("No market-data API key configured, skipping real-time updates");
            return;
        };

        if self.active.swap(true, Ordering::SeqCst) {
            tracing::warn!("Trade stream already running, ignoring duplicate run");
            return;
        }

        let mut failures = 0u32;
        loop {
            let had_connection = match self.connect_and_stream(&api_key, &symbols).await {
                Ok(()) => {
                    tracing::info!("Trade stream disconnected gracefully");
                    break;
                }
                Err(e) => {
                    let was_connected = self.connected.swap(false, Ordering::SeqCst);
                    tracing::warn!("Trade stream error: {}", e);
                    was_connected
                }
            };

            // A stream that made it past subscription starts a fresh failure count
            failures = if had_connection { 1 } else { failures + 1 };
            if failures >= MAX_CONNECT_FAILURES {
                tracing::error!(
                    "Trade stream gave up after {} consecutive failures",
                    failures
                );
                break;
            }

            let backoff =
                std::time::Duration::from_secs((1u64 << (failures - 1)).min(BACKOFF_CAP_SECS));
            tracing::warn!("Reconnecting trade stream in {:?}", backoff);
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.shutdown.notified() => {
                    tracing::info!("Trade stream shutdown requested");
                    break;
                }
            }
        }

        self.connected.store(false, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    async fn connect_and_stream(
        &self,
        api_key: &str,
        symbols: &[String],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let url = format!("{}?token={}", FINNHUB_WS_URL, api_key);
        let (ws_stream, _) = connect_async(&url).await?;
        let (mut write, mut read) = ws_stream.split();
        tracing::info!("Connected to Finnhub trade stream");

        for symbol in symbols {
            let sub = serde_json::json!({"type": "subscribe", "symbol": symbol});
            write.send(Message::Text(sub.to_string())).await?;
        }
        tracing::info!("Subscribed to {} symbols", symbols.len());
        self.connected.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_message(&text);
                        }
                        Some(Ok(Message::Ping(data))) => {
                            let _ = write.send(Message::Pong(data)).await;
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!("Finnhub connection closed by server");
                            self.connected.store(false, Ordering::SeqCst);
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            return Err(Box::new(e));
                        }
                        _ => {}
                    }
                }
                _ = self.shutdown.notified() => {
                    let _ = write.send(Message::Close(None)).await;
                    self.connected.store(false, Ordering::SeqCst);
                    return Ok(());
                }
            }
        }
    }

    fn handle_message(&self, text: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
            return;
        };

        // Only trade-type messages are forwarded
        if value.get("type").and_then(|t| t.as_str()) != Some("trade") {
            return;
        }
        let Some(data) = value.get("data").and_then(|d| d.as_array()) else {
            return;
        };

        for entry in data {
            if let (Some(symbol), Some(price), Some(timestamp)) = (
                entry.get("s").and_then(|v| v.as_str()),
                entry.get("p").and_then(|v| v.as_f64()),
                entry.get("t").and_then(|v| v.as_i64()),
            ) {
                let volume = entry.get("v").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let _ = self.tx.send(TradeEvent {
                    symbol: symbol.to_string(),
                    price,
                    volume,
                    timestamp,
                });
            }
        }
    }
}

#[async_trait]
impl TradeStream for FinnhubStream {
    fn events(&self) -> broadcast::Receiver<TradeEvent> {
        self.tx.subscribe()
    }

    async fn run(&self, symbols: Vec<String>) {
        self.run_inner(symbols).await;
    }

    fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    #[tokio::test]
    async fn test_trade_message_fans_out_per_entry() {
        let stream = FinnhubStream::new(Some("key".to_string()));
        let mut rx = stream.events();

        stream.handle_message(
            r#"{
                "type": "trade",
                "data": [
                    {"s": "AAPL", "p": 187.21, "v": 120, "t": 1714571400000},
                    {"s": "TSLA", "p": 244.05, "v": 50, "t": 1714571400250}
                ]
            }"#,
        );

        let first = rx.try_recv().unwrap();
        assert_eq!(first.symbol, "AAPL");
        assert_eq!(first.price, 187.21);
        assert_eq!(first.volume, 120.0);

        let second = rx.try_recv().unwrap();
        assert_eq!(second.symbol, "TSLA");
        assert_eq!(second.timestamp, 1714571400250);

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_non_trade_messages_are_dropped() {
        let stream = FinnhubStream::new(Some("key".to_string()));
        let mut rx = stream.events();

        stream.handle_message(r#"{"type": "ping"}"#);
        stream.handle_message(r#"{"type": "error", "msg": "Subscribing to unknown symbol"}"#);

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let stream = FinnhubStream::new(Some("key".to_string()));
        let mut rx = stream.events();

        stream.handle_message("not json at all");
        stream.handle_message(r#"{"type": "trade", "data": "wrong shape"}"#);
        stream.handle_message(r#"{"type": "trade", "data": [{"s": "AAPL"}]}"#);

        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_run_without_credential_returns_immediately() {
        let stream = FinnhubStream::new(None);
        stream.run(vec!["AAPL".to_string()]).await;
        assert!(!stream.is_connected());
    }

    #[test]
    fn test_shutdown_before_run_is_noop() {
        let stream = FinnhubStream::new(None);
        TradeStream::shutdown(&stream);
        assert!(!stream.is_connected());
    }
}
