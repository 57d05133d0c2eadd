//! Web search used by the research loop.
//!
//! [`SearchProvider`] is the seam; [`TavilySearch`] calls the Tavily HTTP
//! API, [`NoopSearch`] stands in when no API key is configured so analyses
//! still run (the model then answers from what it already knows).

use crate::error::AdvocateError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default)]
    pub score: f64,
}

/// Something that can run a web search.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AdvocateError>;
}

/// Tavily API client.
pub struct TavilySearch {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
enum SearchDepth {
    Basic,
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: SearchDepth,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: f64,
}

impl From<TavilyResult> for SearchHit {
    fn from(r: TavilyResult) -> Self {
        SearchHit {
            title: r.title,
            url: r.url,
            snippet: r.content,
            score: r.score,
        }
    }
}

impl TavilySearch {
    pub fn new(api_key: impl Into<String>) -> Result<Self, AdvocateError> {
        let client = reqwest::Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .map_err(|e| AdvocateError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            client,
        })
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, AdvocateError> {
        let failed = |reason: String| AdvocateError::SearchFailed {
            query: query.to_string(),
            reason,
        };

        let request = TavilyRequest {
            api_key: &self.api_key,
            query,
            search_depth: SearchDepth::Basic,
            max_results,
        };

        let response = self
            .client
            .post(TAVILY_ENDPOINT)
            .json(&request)
            .send()
            .await
            .map_err(|e| failed(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(failed(format!("Tavily API error {status}: {body}")));
        }

        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| failed(format!("unreadable response: {e}")))?;

        debug!("Tavily: {} result(s) for {:?}", parsed.results.len(), query);
        Ok(parsed.results.into_iter().map(SearchHit::from).collect())
    }
}

/// Search provider that finds nothing, for runs without an API key.
pub struct NoopSearch;

#[async_trait]
impl SearchProvider for NoopSearch {
    async fn search(&self, query: &str, _max_results: usize) -> Result<Vec<SearchHit>, AdvocateError> {
        warn!("NoopSearch: search for {query:?} skipped, no search API key configured");
        Ok(vec![])
    }
}
