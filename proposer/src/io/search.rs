//! Web search capability used by the research steps.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::io::config::{SearchBackend, SearchConfig};

/// Abstraction over search backends.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Return aggregated, human-readable results for `query`.
    async fn search(&self, query: &str) -> Result<String>;
}

/// Build the search provider selected by config.
pub fn from_config(cfg: &SearchConfig) -> Result<std::sync::Arc<dyn SearchProvider>> {
    Ok(match cfg.backend {
        SearchBackend::Searxng => std::sync::Arc::new(SearxngSearch::new(cfg)?),
        SearchBackend::Disabled => std::sync::Arc::new(DisabledSearch),
    })
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, rename = "content")]
    pub snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// Search through SearXNG instances, trying each endpoint in order.
#[derive(Debug, Clone)]
pub struct SearxngSearch {
    client: reqwest::Client,
    endpoints: Vec<String>,
    max_results: usize,
}

impl SearxngSearch {
    pub fn new(cfg: &SearchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent("proposer/0.1")
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoints: cfg
                .endpoints
                .iter()
                .map(|endpoint| format!("{}/search", endpoint.trim_end_matches('/')))
                .collect(),
            max_results: cfg.max_results,
        })
    }

    async fn query_endpoint(&self, endpoint: &str, query: &str) -> Result<Vec<SearchHit>> {
        let url = format!("{endpoint}?q={}&format=json", urlencoding::encode(query));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("get {endpoint}"))?
            .error_for_status()
            .with_context(|| format!("search request to {endpoint} failed"))?;
        let body: SearxngResponse = response.json().await.context("parse search response")?;
        Ok(body.results)
    }
}

#[async_trait]
impl SearchProvider for SearxngSearch {
    #[instrument(skip(self))]
    async fn search(&self, query: &str) -> Result<String> {
        let mut last_err = None;
        for endpoint in &self.endpoints {
            match self.query_endpoint(endpoint, query).await {
                Ok(hits) => {
                    debug!(endpoint = %endpoint, hits = hits.len(), "search succeeded");
                    return Ok(format_hits(query, &hits, self.max_results));
                }
                Err(err) => {
                    warn!(endpoint = %endpoint, err = %format!("{err:#}"), "search endpoint failed");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| anyhow!("no search endpoints configured"))
            .context(format!("search '{query}'")))
    }
}

/// Provider used when search is turned off.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledSearch;

#[async_trait]
impl SearchProvider for DisabledSearch {
    async fn search(&self, query: &str) -> Result<String> {
        debug!(query, "search disabled");
        Ok(format!(
            "Search results for \"{query}\": search is disabled; rely on prior knowledge."
        ))
    }
}

/// Render hits as a compact bulleted block.
pub fn format_hits(query: &str, hits: &[SearchHit], max_results: usize) -> String {
    let mut out = format!("Search results for \"{query}\":\n");
    if hits.is_empty() {
        out.push_str("(no results)\n");
        return out;
    }
    for hit in hits.iter().take(max_results) {
        out.push_str(&format!("- {} ({})\n", hit.title.trim(), hit.url.trim()));
        let snippet = hit.snippet.trim();
        if !snippet.is_empty() {
            out.push_str(&format!("  {snippet}\n"));
        }
    }
    out
}
