use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use sentinel_core::{DetectionError, NewsArticle};

const BASE_URL: &str = "https://newsapi.org/v2";
const PAGE_SIZE: u32 = 50;

/// Client for the NewsAPI document search endpoint.
///
/// Total at the public boundary: a missing API key or any transport/decode
/// failure resolves to an empty corpus, which downstream scoring treats as
/// degraded input, not an error.
#[derive(Clone)]
pub struct NewsApiClient {
    api_key: Option<String>,
    client: Client,
}

impl NewsApiClient {
    pub fn new(api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self { api_key, client }
    }

    /// Search recent articles matching a query, newest first.
    pub async fn search_everything(&self, query: &str) -> Vec<NewsArticle> {
        let Some(api_key) = self.api_key.clone() else {
            return Vec::new();
        };

        match self.fetch_everything(query, &api_key).await {
            Ok(articles) => articles,
            Err(e) => {
                tracing::warn!("News fetch failed for '{}': {}", query, e);
                Vec::new()
            }
        }
    }

    async fn fetch_everything(
        &self,
        query: &str,
        api_key: &str,
    ) -> Result<Vec<NewsArticle>, DetectionError> {
        let url = format!("{}/everything", BASE_URL);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("q", query),
                ("apiKey", api_key),
                ("sortBy", "publishedAt"),
                ("pageSize", &PAGE_SIZE.to_string()),
            ])
            .send()
            .await
            .map_err(|e| DetectionError::Api(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DetectionError::Api(format!("HTTP {}", response.status())));
        }

        let raw: EverythingResponse = response
            .json()
            .await
            .map_err(|e| DetectionError::InvalidResponse(e.to_string()))?;

        Ok(raw.articles.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Deserialize)]
struct EverythingResponse {
    #[serde(default)]
    articles: Vec<ArticleEntry>,
}

#[derive(Debug, Deserialize)]
struct ArticleEntry {
    #[serde(default)]
    source: ArticleSource,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: String,
    #[serde(rename = "publishedAt")]
    published_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
struct ArticleSource {
    #[serde(default)]
    name: Option<String>,
}

impl From<ArticleEntry> for NewsArticle {
    fn from(entry: ArticleEntry) -> Self {
        NewsArticle {
            source: entry.source.name.unwrap_or_default(),
            title: entry.title,
            description: entry.description,
            url: entry.url,
            published_utc: entry.published_at,
        }
    }
}
