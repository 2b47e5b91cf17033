use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use sentinel_core::{DetectionError, InsiderTransaction, Quote};

pub mod stream;
pub use stream::FinnhubStream;

const BASE_URL: &str = "https://finnhub.io/api/v1";

/// REST client for the Finnhub market-data API.
///
/// Both fetchers are total at the public boundary: a missing API key or any
/// transport/decode failure resolves to a documented fallback value (a
/// synthetic quote, an empty transaction list) and is logged, never raised.
#[derive(Clone)]
pub struct FinnhubClient {
    api_key: Option<String>,
    client: Client,
    fallback_seed: Option<u64>,
}

impl FinnhubClient {
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            client,
            fallback_seed: None,
        }
    }

    /// Seed the synthetic-quote generator so fallback quotes reproduce.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.fallback_seed = Some(seed);
        self
    }

    /// Get the current quote for a symbol.
    ///
    /// Without a credential, or on any fetch failure, returns a synthetic
    /// quote within plausible bounds, flagged `simulated`, so downstream
    /// stages always receive a usable value.
    pub async fn get_quote(&self, symbol: &str) -> Quote {
        let Some(api_key) = self.api_key.clone() else {
            return self.simulated_quote(symbol);
        };

        match self.fetch_quote(symbol, &api_key).await {
            Ok(quote) => quote,
            Err(e) => {
                tracing::warn!("Quote fetch failed for {}: {}, using simulated quote", symbol, e);
                self.simulated_quote(symbol)
            }
        }
    }

    async fn fetch_quote(&self, symbol: &str, api_key: &str) -> Result<Quote, DetectionError> {
        let url = format!("{}/quote", BASE_URL);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("token", api_key)])
            .send()
            .await
            .map_err(|e| DetectionError::Api(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DetectionError::Api(format!("HTTP {}", response.status())));
        }

        let raw: QuoteResponse = response
            .json()
            .await
            .map_err(|e| DetectionError::InvalidResponse(e.to_string()))?;

        Ok(Quote {
            symbol: symbol.to_string(),
            price: raw.current,
            change: raw.change.unwrap_or(0.0),
            change_percent: raw.change_percent.unwrap_or(0.0),
            volume: raw.volume.unwrap_or(0.0),
            timestamp: Utc::now(),
            simulated: false,
        })
    }

    /// Get recent insider transaction filings for a symbol.
    ///
    /// An empty vec is the fallback for a missing credential or any fetch
    /// failure, and is also a valid "no filings" response.
    pub async fn get_insider_transactions(&self, symbol: &str) -> Vec<InsiderTransaction> {
        let Some(api_key) = self.api_key.clone() else {
            return Vec::new();
        };

        match self.fetch_insider_transactions(symbol, &api_key).await {
            Ok(transactions) => transactions,
            Err(e) => {
                tracing::warn!("Insider fetch failed for {}: {}", symbol, e);
                Vec::new()
            }
        }
    }

    async fn fetch_insider_transactions(
        &self,
        symbol: &str,
        api_key: &str,
    ) -> Result<Vec<InsiderTransaction>, DetectionError> {
        let url = format!("{}/stock/insider-transactions", BASE_URL);

        let response = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("token", api_key)])
            .send()
            .await
            .map_err(|e| DetectionError::Api(e.to_string()))?;

        if !response.status().is_success() {
            // Plan-gated endpoint: an unauthorized key reads as "no data"
            if matches!(response.status().as_u16(), 401 | 403) {
                return Ok(Vec::new());
            }
            return Err(DetectionError::Api(format!("HTTP {}", response.status())));
        }

        let raw: InsiderResponse = response
            .json()
            .await
            .map_err(|e| DetectionError::InvalidResponse(e.to_string()))?;

        Ok(raw.data.into_iter().map(Into::into).collect())
    }

    fn simulated_quote(&self, symbol: &str) -> Quote {
        match self.fallback_seed {
            Some(seed) => synthesize_quote(&mut StdRng::seed_from_u64(seed), symbol),
            None => synthesize_quote(&mut rand::thread_rng(), symbol),
        }
    }
}

fn synthesize_quote<R: Rng>(rng: &mut R, symbol: &str) -> Quote {
    Quote {
        symbol: symbol.to_string(),
        price: rng.gen_range(200.0..300.0),
        change: rng.gen_range(-5.0..5.0),
        change_percent: rng.gen_range(-2.5..2.5),
        volume: rng.gen_range(0..1_000_000) as f64,
        timestamp: Utc::now(),
        simulated: true,
    }
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(rename = "c")]
    current: f64,
    #[serde(rename = "d", default)]
    change: Option<f64>,
    #[serde(rename = "dp", default)]
    change_percent: Option<f64>,
    #[serde(rename = "v", default)]
    volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct InsiderResponse {
    #[serde(default)]
    data: Vec<InsiderEntry>,
}

#[derive(Debug, Deserialize)]
struct InsiderEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    share: Option<f64>,
    #[serde(default)]
    change: Option<f64>,
    #[serde(default, rename = "filingDate")]
    filing_date: Option<String>,
    #[serde(default, rename = "transactionDate")]
    transaction_date: Option<String>,
    #[serde(default, rename = "transactionCode")]
    transaction_code: Option<String>,
    #[serde(default, rename = "transactionPrice")]
    transaction_price: Option<f64>,
}

impl From<InsiderEntry> for InsiderTransaction {
    fn from(entry: InsiderEntry) -> Self {
        InsiderTransaction {
            name: entry.name,
            share: entry.share,
            change: entry.change,
            filing_date: entry.filing_date,
            transaction_date: entry.transaction_date,
            transaction_code: entry.transaction_code,
            transaction_price: entry.transaction_price,
        }
    }
}
