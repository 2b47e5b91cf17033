use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use finnhub_client::FinnhubClient;
use newsapi_client::NewsApiClient;
use sentinel_core::{
    Alert, DetectionError, InsiderTransaction, MarketBundle, MarketDataProvider, NewsArticle,
    PatternScorer, Quote, TradeStream,
};

pub mod alerts;
pub use alerts::AlertFeed;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Tracked watchlist; static for the session.
    pub symbols: Vec<String>,
    pub cadence: Duration,
    /// How many symbols from the head of the watchlist each cycle covers.
    pub symbols_per_cycle: usize,
    /// Exclusive publication threshold.
    pub confidence_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            symbols: ["TSLA", "AAPL", "NVDA", "META", "GOOGL", "AMZN", "MSFT"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cadence: Duration::from_secs(30),
            symbols_per_cycle: 3,
            confidence_threshold: 85.0,
        }
    }
}

/// Live data access: the vendor clients behind the provider seam.
///
/// The underlying fetchers are total, so this implementation never returns
/// `Err`; failures surface as the clients' documented fallback values.
pub struct LiveMarketDataProvider {
    finnhub: FinnhubClient,
    news: NewsApiClient,
}

impl LiveMarketDataProvider {
    pub fn new(finnhub: FinnhubClient, news: NewsApiClient) -> Self {
        Self { finnhub, news }
    }
}

#[async_trait]
impl MarketDataProvider for LiveMarketDataProvider {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, DetectionError> {
        Ok(self.finnhub.get_quote(symbol).await)
    }

    async fn fetch_insider_transactions(
        &self,
        symbol: &str,
    ) -> Result<Vec<InsiderTransaction>, DetectionError> {
        Ok(self.finnhub.get_insider_transactions(symbol).await)
    }

    async fn fetch_news(&self, query: &str) -> Result<Vec<NewsArticle>, DetectionError> {
        Ok(self.news.search_everything(query).await)
    }
}

/// Read-only snapshot of the monitor's state.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub running: bool,
    pub stream_connected: bool,
    pub cycles_completed: u64,
    pub trade_events_seen: u64,
    pub alert_count: usize,
}

/// Periodic multi-source analysis scheduler.
///
/// Two states, Idle and Running. While running, a cadence timer fires one
/// full cadence after start and then per cadence; each tick takes the first
/// N symbols of the watchlist and processes them sequentially through the
/// provider and scorer, publishing qualifying assessments to the alert
/// feed. A per-symbol failure is logged and skipped; neither the remaining
/// symbols of the tick nor the timer are affected.
#[derive(Clone)]
pub struct DetectionMonitor {
    config: MonitorConfig,
    provider: Arc<dyn MarketDataProvider>,
    scorer: Arc<dyn PatternScorer>,
    stream: Arc<dyn TradeStream>,
    alerts: Arc<AlertFeed>,
    running: Arc<AtomicBool>,
    cycles: Arc<AtomicU64>,
    events_seen: Arc<AtomicU64>,
    shutdown_tx: Arc<Mutex<Option<watch::Sender<bool>>>>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl DetectionMonitor {
    pub fn new(
        config: MonitorConfig,
        provider: Arc<dyn MarketDataProvider>,
        scorer: Arc<dyn PatternScorer>,
        stream: Arc<dyn TradeStream>,
    ) -> Self {
        Self {
            config,
            provider,
            scorer,
            stream,
            alerts: Arc::new(AlertFeed::new()),
            running: Arc::new(AtomicBool::new(false)),
            cycles: Arc::new(AtomicU64::new(0)),
            events_seen: Arc::new(AtomicU64::new(0)),
            shutdown_tx: Arc::new(Mutex::new(None)),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Idle -> Running. Spawns the stream driver, the event consumer and
    /// the analysis timer. No-op when already running.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!("Detection monitor already running");
            return;
        }

        let (tx, rx) = watch::channel(false);
        *self.lock_shutdown() = Some(tx);

        let mut tasks = Vec::with_capacity(3);

        let stream = Arc::clone(&self.stream);
        let symbols = self.config.symbols.clone();
        tasks.push(tokio::spawn(async move {
            stream.run(symbols).await;
        }));

        let consumer = self.clone();
        let consumer_rx = rx.clone();
        tasks.push(tokio::spawn(async move {
            consumer.consume_events(consumer_rx).await;
        }));

        let analyzer = self.clone();
        tasks.push(tokio::spawn(async move {
            analyzer.run_analysis_loop(rx).await;
        }));

        self.lock_tasks().extend(tasks);
        tracing::info!(
            "Detection monitor started: {} symbols, cadence {:?}, {} per cycle",
            self.config.symbols.len(),
            self.config.cadence,
            self.config.symbols_per_cycle
        );
    }

    /// Running -> Idle. Cancels the pending timer, closes the stream, and
    /// waits for in-flight work to wind down; nothing publishes after the
    /// running flag clears. Restart-safe. No-op when idle.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(tx) = self.lock_shutdown().take() {
            let _ = tx.send(true);
        }
        self.stream.shutdown();

        let handles: Vec<JoinHandle<()>> = self.lock_tasks().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("Detection monitor stopped");
    }

    /// Current alert window, most recent first. Side-effect-free.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.list()
    }

    pub fn alert_feed(&self) -> Arc<AlertFeed> {
        Arc::clone(&self.alerts)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Side-effect-free state snapshot for the presentation layer.
    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            running: self.is_running(),
            stream_connected: self.stream.is_connected(),
            cycles_completed: self.cycles.load(Ordering::SeqCst),
            trade_events_seen: self.events_seen.load(Ordering::SeqCst),
            alert_count: self.alerts.len(),
        }
    }

    async fn consume_events(&self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut rx = self.stream.events();
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                event = rx.recv() => {
                    match event {
                        Ok(trade) => {
                            self.events_seen.fetch_add(1, Ordering::SeqCst);
                            tracing::debug!(
                                "Live trade: {} @ {} x{}",
                                trade.symbol,
                                trade.price,
                                trade.volume
                            );
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!("Trade consumer lagged, dropped {} events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    }

    async fn run_analysis_loop(&self, mut shutdown_rx: watch::Receiver<bool>) {
        // First tick lands one full cadence after start
        let mut interval = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.cadence,
            self.config.cadence,
        );
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = interval.tick() => {
                    self.run_cycle().await;
                }
            }
        }
    }

    /// One analysis pass over the head of the watchlist, in list order.
    async fn run_cycle(&self) {
        let selected: Vec<String> = self
            .config
            .symbols
            .iter()
            .take(self.config.symbols_per_cycle)
            .cloned()
            .collect();

        for symbol in &selected {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = self.process_symbol(symbol).await {
                tracing::warn!("Analysis failed for {}: {}, continuing cycle", symbol, e);
            }
        }

        self.cycles.fetch_add(1, Ordering::SeqCst);
    }

    async fn process_symbol(&self, symbol: &str) -> Result<(), DetectionError> {
        let quote = self.provider.fetch_quote(symbol).await?;
        let insider = self.provider.fetch_insider_transactions(symbol).await?;
        let news = self.provider.fetch_news(symbol).await?;

        let bundle = MarketBundle { quote, insider };
        let assessment = self.scorer.assess(&bundle, &news).await?;

        if assessment.confidence > self.config.confidence_threshold
            && self.running.load(Ordering::SeqCst)
        {
            let alert = self.alerts.publish(symbol, assessment);
            tracing::info!(
                "Alert #{}: {} at {:.0}% confidence ({})",
                alert.id,
                alert.symbol,
                alert.confidence,
                alert.risk_level
            );
        }

        Ok(())
    }

    fn lock_shutdown(&self) -> std::sync::MutexGuard<'_, Option<watch::Sender<bool>>> {
        self.shutdown_tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use finnhub_client::FinnhubStream;
    use insider_analysis::InsiderAnalysisEngine;
    use sentinel_core::{Assessment, RiskLevel, TradeEvent};
    use std::collections::HashSet;
    use tokio::sync::broadcast;

    struct StubProvider {
        fail: HashSet<String>,
    }

    impl StubProvider {
        fn new() -> Self {
            Self {
                fail: HashSet::new(),
            }
        }

        fn failing_for(symbols: &[&str]) -> Self {
            Self {
                fail: symbols.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl MarketDataProvider for StubProvider {
        async fn fetch_quote(&self, symbol: &str) -> Result<Quote, DetectionError> {
            if self.fail.contains(symbol) {
                return Err(DetectionError::Api("injected failure".to_string()));
            }
            Ok(Quote {
                symbol: symbol.to_string(),
                price: 250.0,
                change: 1.0,
                change_percent: 0.4,
                volume: 1_000_000.0,
                timestamp: Utc::now(),
                simulated: true,
            })
        }

        async fn fetch_insider_transactions(
            &self,
            _symbol: &str,
        ) -> Result<Vec<InsiderTransaction>, DetectionError> {
            Ok(Vec::new())
        }

        async fn fetch_news(&self, _query: &str) -> Result<Vec<NewsArticle>, DetectionError> {
            Ok(Vec::new())
        }
    }

    struct StubScorer {
        confidence: f64,
    }

    #[async_trait]
    impl PatternScorer for StubScorer {
        async fn assess(
            &self,
            _bundle: &MarketBundle,
            _news: &[NewsArticle],
        ) -> Result<Assessment, DetectionError> {
            Ok(Assessment {
                confidence: self.confidence,
                evidence: vec!["stub evidence".to_string()],
                prediction: "stub prediction".to_string(),
                risk_level: RiskLevel::High,
            })
        }
    }

    struct NullStream {
        tx: broadcast::Sender<TradeEvent>,
    }

    impl NullStream {
        fn new() -> Self {
            let (tx, _rx) = broadcast::channel(16);
            Self { tx }
        }
    }

    #[async_trait]
    impl TradeStream for NullStream {
        fn events(&self) -> broadcast::Receiver<TradeEvent> {
            self.tx.subscribe()
        }

        async fn run(&self, _symbols: Vec<String>) {}

        fn shutdown(&self) {}

        fn is_connected(&self) -> bool {
            false
        }
    }

    fn stub_monitor(confidence: f64, provider: StubProvider) -> DetectionMonitor {
        DetectionMonitor::new(
            MonitorConfig::default(),
            Arc::new(provider),
            Arc::new(StubScorer { confidence }),
            Arc::new(NullStream::new()),
        )
    }

    #[tokio::test]
    async fn test_threshold_is_exclusive() {
        let at_threshold = stub_monitor(85.0, StubProvider::new());
        at_threshold.running.store(true, Ordering::SeqCst);
        at_threshold.run_cycle().await;
        assert!(at_threshold.alerts().is_empty());

        let above_threshold = stub_monitor(86.0, StubProvider::new());
        above_threshold.running.store(true, Ordering::SeqCst);
        above_threshold.run_cycle().await;
        assert_eq!(above_threshold.alerts().len(), 3);
    }

    #[tokio::test]
    async fn test_symbol_failure_is_isolated() {
        let monitor = stub_monitor(94.0, StubProvider::failing_for(&["AAPL"]));
        monitor.running.store(true, Ordering::SeqCst);
        monitor.run_cycle().await;

        let alerts = monitor.alerts();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].symbol, "NVDA");
        assert_eq!(alerts[1].symbol, "TSLA");
        // The failed middle symbol did not cancel the cycle
        assert_eq!(monitor.status().cycles_completed, 1);
    }

    #[tokio::test]
    async fn test_below_threshold_publishes_nothing() {
        let monitor = stub_monitor(10.0, StubProvider::new());
        monitor.running.store(true, Ordering::SeqCst);
        monitor.run_cycle().await;
        assert!(monitor.alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_first_tick() {
        let monitor = stub_monitor(94.0, StubProvider::new());
        monitor.start();

        tokio::time::sleep(Duration::from_secs(1)).await;
        monitor.stop().await;
        tokio::time::sleep(Duration::from_secs(120)).await;

        let status = monitor.status();
        assert!(!status.running);
        assert_eq!(status.cycles_completed, 0);
        assert_eq!(status.trade_events_seen, 0);
        assert!(monitor.alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_tick_processes_head_of_watchlist() {
        let monitor = stub_monitor(94.0, StubProvider::new());
        monitor.start();

        tokio::time::sleep(Duration::from_secs(31)).await;
        monitor.stop().await;

        let alerts = monitor.alerts();
        assert_eq!(alerts.len(), 3);
        // Sequential processing in list order, surfaced most recent first
        assert_eq!(alerts[0].symbol, "NVDA");
        assert_eq!(alerts[1].symbol, "AAPL");
        assert_eq!(alerts[2].symbol, "TSLA");
        assert_eq!(monitor.status().cycles_completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resumes_without_duplicate_timers() {
        let monitor = stub_monitor(94.0, StubProvider::new());

        monitor.start();
        tokio::time::sleep(Duration::from_secs(31)).await;
        monitor.stop().await;
        assert_eq!(monitor.status().cycles_completed, 1);

        // Idle: no further ticks
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(monitor.status().cycles_completed, 1);

        monitor.start();
        tokio::time::sleep(Duration::from_secs(31)).await;
        monitor.stop().await;

        assert_eq!(monitor.status().cycles_completed, 2);
        assert_eq!(monitor.alerts().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_spawns_one_timer() {
        let monitor = stub_monitor(94.0, StubProvider::new());
        monitor.start();
        monitor.start();

        tokio::time::sleep(Duration::from_secs(31)).await;
        monitor.stop().await;

        assert_eq!(monitor.status().cycles_completed, 1);
        assert_eq!(monitor.alerts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_fallback_pipeline() {
        // No credentials anywhere: every stage rides its fallback path
        let provider = LiveMarketDataProvider::new(
            FinnhubClient::new(None).with_seed(7),
            NewsApiClient::new(None),
        );
        let monitor = DetectionMonitor::new(
            MonitorConfig::default(),
            Arc::new(provider),
            Arc::new(InsiderAnalysisEngine::default()),
            Arc::new(FinnhubStream::new(None)),
        );

        monitor.start();
        tokio::time::sleep(Duration::from_secs(31)).await;
        monitor.stop().await;

        let alerts = monitor.alerts();
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].symbol, "NVDA");
        assert_eq!(alerts[1].symbol, "AAPL");
        assert_eq!(alerts[2].symbol, "TSLA");
        for alert in &alerts {
            assert_eq!(alert.confidence, 94.0);
            assert_eq!(alert.risk_level, RiskLevel::Critical);
            assert!(!alert.evidence.is_empty());
        }

        let status = monitor.status();
        assert!(!status.running);
        assert!(!status.stream_connected);
        assert_eq!(status.cycles_completed, 1);
        assert_eq!(status.trade_events_seen, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trade_events_are_counted() {
        let stream = Arc::new(NullStream::new());
        let tx = stream.tx.clone();
        let monitor = DetectionMonitor::new(
            MonitorConfig {
                cadence: Duration::from_secs(3600),
                ..Default::default()
            },
            Arc::new(StubProvider::new()),
            Arc::new(StubScorer { confidence: 10.0 }),
            stream,
        );

        monitor.start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        for i in 0..4 {
            let _ = tx.send(TradeEvent {
                symbol: "TSLA".to_string(),
                price: 240.0 + i as f64,
                volume: 10.0,
                timestamp: 1_714_571_400_000 + i,
            });
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        monitor.stop().await;

        assert_eq!(monitor.status().trade_events_seen, 4);
    }
}
