pub mod error;
pub mod types;

use std::time::Duration;

pub use error::{NewsApiError, Result};
pub use types::{RawResponse, SearchParams, SourceInfo, SourcesParams, SourcesResponse};

const DEFAULT_BASE_URL: &str = "https://newsapi.org/v2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct NewsApiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl NewsApiClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Search articles. Free-text or explicit-source searches go to
    /// `/everything`; filter-only searches go to `/top-headlines`.
    pub async fn search(&self, params: &SearchParams) -> Result<RawResponse> {
        let endpoint = search_endpoint(params);
        let url = format!("{}/{}", self.base_url, endpoint);
        let query = search_query(params, endpoint);

        tracing::debug!(endpoint, params = query.len(), "NewsAPI search");
        self.get(&url, &query).await
    }

    /// List sources matching the given filters.
    pub async fn sources(&self, params: &SourcesParams) -> Result<RawResponse> {
        let url = format!("{}/top-headlines/sources", self.base_url);
        let mut query = Vec::new();
        push_opt(&mut query, "country", params.country.as_deref());
        push_opt(&mut query, "category", params.category.as_deref());
        push_opt(&mut query, "language", params.language.as_deref());

        self.get(&url, &query).await
    }

    async fn get(&self, url: &str, query: &[(&'static str, String)]) -> Result<RawResponse> {
        let resp = self
            .client
            .get(url)
            .header("X-Api-Key", &self.api_key)
            .query(query)
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await?;
        if status >= 400 {
            tracing::warn!(status, url, "NewsAPI returned error status");
        }

        Ok(RawResponse {
            status,
            body: if body.is_empty() { None } else { Some(body) },
        })
    }
}

fn search_endpoint(params: &SearchParams) -> &'static str {
    if params.query.is_none() && params.sources.is_empty() {
        "top-headlines"
    } else {
        "everything"
    }
}

fn search_query(params: &SearchParams, endpoint: &str) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    push_opt(&mut query, "q", params.query.as_deref());

    // NewsAPI rejects sources combined with country/category.
    if params.sources.is_empty() {
        push_opt(&mut query, "country", params.country.as_deref());
        push_opt(&mut query, "category", params.category.as_deref());
    } else {
        query.push(("sources", params.sources.join(",")));
    }

    // top-headlines has no language or sort parameters when filtering by country.
    if endpoint == "everything" {
        push_opt(&mut query, "language", params.language.as_deref());
        push_opt(&mut query, "sortBy", params.sort_by.as_deref());
    }
    if let Some(size) = params.page_size {
        query.push(("pageSize", size.to_string()));
    }
    query
}

fn push_opt(query: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        query.push((key, v.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_suppress_country_and_category() {
        let params = SearchParams {
            sources: vec!["bbc-news".into(), "reuters".into()],
            country: Some("us".into()),
            category: Some("business".into()),
            language: Some("en".into()),
            page_size: Some(20),
            ..Default::default()
        };
        let endpoint = search_endpoint(&params);
        assert_eq!(endpoint, "everything");

        let query = search_query(&params, endpoint);
        assert!(query.contains(&("sources", "bbc-news,reuters".to_string())));
        assert!(!query.iter().any(|(k, _)| *k == "country" || *k == "category"));
        assert!(query.contains(&("language", "en".to_string())));
    }

    #[test]
    fn filter_only_search_uses_top_headlines() {
        let params = SearchParams {
            country: Some("gb".into()),
            sort_by: Some("publishedAt".into()),
            ..Default::default()
        };
        let endpoint = search_endpoint(&params);
        assert_eq!(endpoint, "top-headlines");
        let query = search_query(&params, endpoint);
        assert_eq!(query, vec![("country", "gb".to_string())]);
    }
}
