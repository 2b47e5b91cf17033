use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::{
    Assessment, DetectionError, InsiderTransaction, MarketBundle, NewsArticle, Quote, TradeEvent,
};

/// Trait for aggregated market data access (quote, insider filings, news).
///
/// Live implementations are expected to be total: a missing credential or a
/// transport failure resolves to the documented fallback value rather than
/// an `Err`. The `Result` exists so test doubles can inject failures.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, DetectionError>;

    async fn fetch_insider_transactions(
        &self,
        symbol: &str,
    ) -> Result<Vec<InsiderTransaction>, DetectionError>;

    async fn fetch_news(&self, query: &str) -> Result<Vec<NewsArticle>, DetectionError>;
}

/// Trait for scoring engines that turn aggregated data into an assessment
#[async_trait]
pub trait PatternScorer: Send + Sync {
    async fn assess(
        &self,
        bundle: &MarketBundle,
        news: &[NewsArticle],
    ) -> Result<Assessment, DetectionError>;
}

/// Trait for push-based trade event sources
#[async_trait]
pub trait TradeStream: Send + Sync {
    /// Register a consumer of inbound trade events.
    fn events(&self) -> broadcast::Receiver<TradeEvent>;

    /// Drive the subscription until shutdown. Returns when the connection
    /// is closed; connection-level errors are logged, never propagated.
    async fn run(&self, symbols: Vec<String>);

    /// Close the connection and release resources. No-op if never connected.
    fn shutdown(&self);

    fn is_connected(&self) -> bool;
}
