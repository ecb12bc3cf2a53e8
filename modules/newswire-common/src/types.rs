use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

/// Page size used when the request does not carry one.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
/// Largest page the content source accepts.
pub const MAX_PAGE_SIZE: u32 = 100;
/// Filter-based searches are expanded to at most this many source ids.
pub const MAX_EXPANDED_SOURCES: usize = 20;
/// Prefix of server-generated session ids.
pub const SESSION_ID_PREFIX: &str = "session-";

// ---------------------------------------------------------------------------
// SearchSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortBy {
    #[default]
    PublishedAt,
    Relevancy,
    Popularity,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::PublishedAt => "publishedAt",
            SortBy::Relevancy => "relevancy",
            SortBy::Popularity => "popularity",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "publishedAt" | "published_at" => Some(SortBy::PublishedAt),
            "relevancy" => Some(SortBy::Relevancy),
            "popularity" => Some(SortBy::Popularity),
            _ => None,
        }
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated, immutable search. Built only through [`SearchSpec::new`] or
/// [`SearchSpec::with_sources`], so at least one of query, sources or a
/// filter is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSpec {
    query: Option<String>,
    sources: Vec<String>,
    country: Option<String>,
    category: Option<String>,
    language: Option<String>,
    sort_by: SortBy,
    page_size: u32,
}

impl SearchSpec {
    pub fn new(
        query: Option<String>,
        sources: Vec<String>,
        filter: SourceFilter,
        sort_by: SortBy,
        page_size: u32,
    ) -> Result<Self, SearchError> {
        let query = non_blank(query);
        let sources: Vec<String> = sources
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if query.is_none() && sources.is_empty() && filter.is_empty() {
            return Err(SearchError::Validation(
                "a query, a source list or at least one filter is required".to_string(),
            ));
        }

        Ok(Self {
            query,
            sources,
            country: filter.country,
            category: filter.category,
            language: filter.language,
            sort_by,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }

    /// Same search with an explicit source list (filter expansion).
    pub fn with_sources(&self, sources: Vec<String>) -> Self {
        Self {
            sources,
            ..self.clone()
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn category(&self) -> Option<&str> {
        self.category.as_deref()
    }

    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    pub fn sort_by(&self) -> SortBy {
        self.sort_by
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn filter(&self) -> SourceFilter {
        SourceFilter {
            country: self.country.clone(),
            category: self.category.clone(),
            language: self.language.clone(),
        }
    }

    /// True when the search needs its filters expanded into a source list.
    pub fn needs_source_expansion(&self) -> bool {
        self.query.is_none() && self.sources.is_empty()
    }
}

/// The filter subset of a search, also the argument of a source listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFilter {
    pub country: Option<String>,
    pub category: Option<String>,
    pub language: Option<String>,
}

impl SourceFilter {
    pub fn new(country: Option<String>, category: Option<String>, language: Option<String>) -> Self {
        Self {
            country: non_blank(country),
            category: non_blank(category),
            language: non_blank(language),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.country.is_none() && self.category.is_none() && self.language.is_none()
    }
}

// ---------------------------------------------------------------------------
// SearchRequest: raw client input
// ---------------------------------------------------------------------------

/// Unvalidated search input as it arrives from a client.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    #[serde(alias = "q")]
    pub query: Option<String>,
    /// Comma-separated source ids.
    pub sources: Option<String>,
    pub country: Option<String>,
    pub category: Option<String>,
    pub language: Option<String>,
    pub sort_by: Option<String>,
    pub page_size: Option<u32>,
    pub session_id: Option<String>,
}

impl SearchRequest {
    pub fn source_list(&self) -> Vec<String> {
        self.sources
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Validate into a [`SearchSpec`]. Does not expand filters; that needs a
    /// content-source call and is done by the orchestrator.
    pub fn to_spec(&self) -> Result<SearchSpec, SearchError> {
        let sort_by = match non_blank(self.sort_by.clone()) {
            None => SortBy::default(),
            Some(raw) => SortBy::parse(&raw)
                .ok_or_else(|| SearchError::Validation(format!("unknown sort order: {raw}")))?,
        };

        SearchSpec::new(
            self.query.clone(),
            self.source_list(),
            SourceFilter::new(
                self.country.clone(),
                self.category.clone(),
                self.language.clone(),
            ),
            sort_by,
            self.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        )
    }
}

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Use the client-supplied id, or generate one when absent or blank.
    pub fn resolve(requested: Option<&str>) -> Self {
        match requested.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => Self(id.to_string()),
            None => Self::generate(),
        }
    }

    pub fn generate() -> Self {
        Self(format!(
            "{SESSION_ID_PREFIX}{}",
            Utc::now().timestamp_millis()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// HistoryEntry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub query: Option<String>,
    pub sources: Vec<String>,
    pub country: Option<String>,
    pub category: Option<String>,
    pub language: Option<String>,
    pub sort_by: SortBy,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn from_spec(spec: &SearchSpec, timestamp: DateTime<Utc>) -> Self {
        Self {
            query: spec.query.clone(),
            sources: spec.sources.clone(),
            country: spec.country.clone(),
            category: spec.category.clone(),
            language: spec.language.clone(),
            sort_by: spec.sort_by,
            timestamp,
        }
    }
}

// ---------------------------------------------------------------------------
// SearchBatch: one parsed fetch
// ---------------------------------------------------------------------------

/// Articles returned by one fetch, after (optional) sentiment enrichment.
/// Articles stay as raw JSON so enrichment annotations pass through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchBatch {
    #[serde(default)]
    pub overall_sentiment: Option<serde_json::Value>,
    #[serde(default)]
    pub total_results: Option<u64>,
    pub articles: Vec<serde_json::Value>,
}

impl SearchBatch {
    pub fn parse(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(query: Option<&str>) -> SearchRequest {
        SearchRequest {
            query: query.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn blank_request_is_rejected() {
        let err = request(Some("   ")).to_spec().unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn filter_only_request_needs_expansion() {
        let req = SearchRequest {
            country: Some("us".into()),
            ..Default::default()
        };
        let spec = req.to_spec().unwrap();
        assert!(spec.needs_source_expansion());
        assert_eq!(spec.country(), Some("us"));
    }

    #[test]
    fn sources_are_split_and_trimmed() {
        let req = SearchRequest {
            sources: Some(" bbc-news, ,reuters ".into()),
            ..Default::default()
        };
        let spec = req.to_spec().unwrap();
        assert_eq!(spec.sources(), ["bbc-news", "reuters"]);
        assert!(!spec.needs_source_expansion());
    }

    #[test]
    fn unknown_sort_order_is_a_validation_error() {
        let req = SearchRequest {
            query: Some("rust".into()),
            sort_by: Some("newest".into()),
            ..Default::default()
        };
        assert!(matches!(req.to_spec(), Err(SearchError::Validation(_))));
    }

    #[test]
    fn page_size_is_clamped() {
        let req = SearchRequest {
            query: Some("rust".into()),
            page_size: Some(500),
            ..Default::default()
        };
        assert_eq!(req.to_spec().unwrap().page_size(), MAX_PAGE_SIZE);
    }

    #[test]
    fn session_id_generated_when_blank() {
        let id = SessionId::resolve(Some("  "));
        assert!(id.as_str().starts_with(SESSION_ID_PREFIX));
        assert_eq!(SessionId::resolve(Some("abc")).as_str(), "abc");
    }

    #[test]
    fn history_entry_serializes_camel_case() {
        let spec = request(Some("climate")).to_spec().unwrap();
        let entry = HistoryEntry::from_spec(&spec, Utc::now());
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["query"], "climate");
        assert_eq!(json["sortBy"], "publishedAt");
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn batch_without_articles_does_not_parse() {
        assert!(SearchBatch::parse(r#"{"status":"ok"}"#).is_err());
        let batch = SearchBatch::parse(r#"{"totalResults":3,"articles":[]}"#).unwrap();
        assert_eq!(batch.total_results, Some(3));
    }
}
