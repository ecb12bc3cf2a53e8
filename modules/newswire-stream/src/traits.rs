// Trait seams toward the two external collaborators.
//
// ContentSource: article search + source listing, answered as raw {status, body}.
// SentimentEnricher: annotates a raw search payload with sentiment.
//
// Both are object-safe so the actors hold `Arc<dyn …>` and tests swap in
// MockSource / MockEnricher from `testing`.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use newsapi_client::{NewsApiClient, SearchParams, SourcesParams};
use newswire_common::{SearchSpec, SourceFilter};
use sentiment_client::SentimentClient;

pub use newsapi_client::RawResponse as SourceResponse;

// ---------------------------------------------------------------------------
// ContentSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Run one article search. A returned status >= 400 is not an `Err`;
    /// callers decide how to treat it.
    async fn search(&self, spec: &SearchSpec) -> Result<SourceResponse>;

    /// List the sources matching a filter set.
    async fn sources(&self, filter: &SourceFilter) -> Result<SourceResponse>;
}

#[async_trait]
impl ContentSource for NewsApiClient {
    async fn search(&self, spec: &SearchSpec) -> Result<SourceResponse> {
        let params = SearchParams {
            query: spec.query().map(str::to_string),
            sources: spec.sources().to_vec(),
            country: spec.country().map(str::to_string),
            category: spec.category().map(str::to_string),
            language: spec.language().map(str::to_string),
            sort_by: Some(spec.sort_by().as_str().to_string()),
            page_size: Some(spec.page_size()),
        };
        Ok(NewsApiClient::search(self, &params).await?)
    }

    async fn sources(&self, filter: &SourceFilter) -> Result<SourceResponse> {
        let params = SourcesParams {
            country: filter.country.clone(),
            category: filter.category.clone(),
            language: filter.language.clone(),
        };
        Ok(NewsApiClient::sources(self, &params).await?)
    }
}

// ---------------------------------------------------------------------------
// SentimentEnricher
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SentimentEnricher: Send + Sync {
    /// Return the payload annotated with sentiment.
    async fn classify(&self, raw_body: &str) -> Result<String>;
}

#[async_trait]
impl SentimentEnricher for SentimentClient {
    async fn classify(&self, raw_body: &str) -> Result<String> {
        Ok(SentimentClient::classify(self, raw_body).await?)
    }
}

/// Used when no classifier is configured: payloads pass through unchanged.
pub struct PassthroughEnricher;

#[async_trait]
impl SentimentEnricher for PassthroughEnricher {
    async fn classify(&self, raw_body: &str) -> Result<String> {
        Ok(raw_body.to_string())
    }
}

/// Enrich `body`, falling back to the raw payload on error or timeout.
/// Returns the body to parse and whether it is the degraded (raw) one.
pub async fn enrich_or_raw(
    enricher: &dyn SentimentEnricher,
    body: String,
    timeout: Duration,
) -> (String, bool) {
    match tokio::time::timeout(timeout, enricher.classify(&body)).await {
        Ok(Ok(enriched)) => (enriched, false),
        Ok(Err(e)) => {
            warn!(error = %e, "Sentiment enrichment failed, using raw payload");
            (body, true)
        }
        Err(_) => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Sentiment enrichment timed out, using raw payload"
            );
            (body, true)
        }
    }
}
