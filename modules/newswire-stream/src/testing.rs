// Test doubles for the two collaborator seams.
//
// - MockSource (ContentSource): scripted queue of search replies, fixed
//   reply for source listings, call counter
// - MockEnricher (SentimentEnricher): passthrough / annotate / fail / hang
//
// Plus helpers for building NewsAPI-shaped payloads.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::json;

use newswire_common::{SearchSpec, SourceFilter};

use crate::traits::{ContentSource, SentimentEnricher, SourceResponse};

// ---------------------------------------------------------------------------
// Payload helpers
// ---------------------------------------------------------------------------

pub fn article(url: &str) -> serde_json::Value {
    json!({"url": url, "title": format!("Article {url}")})
}

/// A search payload holding one article per url.
pub fn page(urls: &[&str]) -> String {
    let articles: Vec<serde_json::Value> = urls.iter().map(|u| article(u)).collect();
    json!({
        "status": "ok",
        "totalResults": articles.len(),
        "articles": articles,
    })
    .to_string()
}

/// A source listing payload.
pub fn source_list(ids: &[&str]) -> String {
    let sources: Vec<serde_json::Value> = ids
        .iter()
        .map(|id| json!({"id": id, "name": id.to_uppercase()}))
        .collect();
    json!({"status": "ok", "sources": sources}).to_string()
}

pub fn urls_of(articles: &[serde_json::Value]) -> Vec<String> {
    articles
        .iter()
        .filter_map(|a| a.get("url").and_then(|u| u.as_str()))
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

enum Reply {
    Response(SourceResponse),
    NetworkError(String),
    Panic,
    Hang,
}

/// Scripted content source. Search replies are consumed in order; once the
/// script runs out every search answers with an empty page.
pub struct MockSource {
    replies: Mutex<VecDeque<Reply>>,
    sources_reply: Mutex<Option<Reply>>,
    search_calls: AtomicUsize,
    sources_calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            sources_reply: Mutex::new(None),
            search_calls: AtomicUsize::new(0),
            sources_calls: AtomicUsize::new(0),
        }
    }

    fn push(self, reply: Reply) -> Self {
        self.replies.lock().unwrap().push_back(reply);
        self
    }

    pub fn then_page(self, urls: &[&str]) -> Self {
        self.then_body(200, &page(urls))
    }

    pub fn then_body(self, status: u16, body: &str) -> Self {
        self.push(Reply::Response(SourceResponse {
            status,
            body: Some(body.to_string()),
        }))
    }

    pub fn then_status(self, status: u16) -> Self {
        self.then_body(status, r#"{"status":"error"}"#)
    }

    pub fn then_network_error(self, message: &str) -> Self {
        self.push(Reply::NetworkError(message.to_string()))
    }

    pub fn then_panic(self) -> Self {
        self.push(Reply::Panic)
    }

    pub fn then_hang(self) -> Self {
        self.push(Reply::Hang)
    }

    pub fn on_sources(self, status: u16, body: &str) -> Self {
        *self.sources_reply.lock().unwrap() = Some(Reply::Response(SourceResponse {
            status,
            body: Some(body.to_string()),
        }));
        self
    }

    pub fn on_sources_network_error(self, message: &str) -> Self {
        *self.sources_reply.lock().unwrap() = Some(Reply::NetworkError(message.to_string()));
        self
    }

    pub fn search_calls(&self) -> usize {
        self.search_calls.load(Ordering::SeqCst)
    }

    pub fn sources_calls(&self) -> usize {
        self.sources_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentSource for MockSource {
    async fn search(&self, _spec: &SearchSpec) -> Result<SourceResponse> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            None => Ok(SourceResponse {
                status: 200,
                body: Some(page(&[])),
            }),
            Some(Reply::Response(r)) => Ok(r),
            Some(Reply::NetworkError(msg)) => bail!("{msg}"),
            Some(Reply::Panic) => panic!("MockSource: scripted panic"),
            Some(Reply::Hang) => std::future::pending().await,
        }
    }

    async fn sources(&self, _filter: &SourceFilter) -> Result<SourceResponse> {
        self.sources_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let guard = self.sources_reply.lock().unwrap();
            match guard.as_ref() {
                Some(Reply::Response(r)) => Ok(r.clone()),
                Some(Reply::NetworkError(msg)) => Err(msg.clone()),
                _ => Ok(SourceResponse {
                    status: 200,
                    body: Some(source_list(&[])),
                }),
            }
        };
        outcome.map_err(|msg| anyhow::anyhow!(msg))
    }
}

// ---------------------------------------------------------------------------
// MockEnricher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum EnrichMode {
    Passthrough,
    Annotate(String),
    Fail,
    Hang,
}

pub struct MockEnricher {
    mode: EnrichMode,
    calls: AtomicUsize,
}

impl MockEnricher {
    pub fn passthrough() -> Self {
        Self::with_mode(EnrichMode::Passthrough)
    }

    /// Sets `overallSentiment` to `label` on every payload.
    pub fn annotating(label: &str) -> Self {
        Self::with_mode(EnrichMode::Annotate(label.to_string()))
    }

    pub fn failing() -> Self {
        Self::with_mode(EnrichMode::Fail)
    }

    /// Never answers; callers hit their timeout.
    pub fn hanging() -> Self {
        Self::with_mode(EnrichMode::Hang)
    }

    fn with_mode(mode: EnrichMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SentimentEnricher for MockEnricher {
    async fn classify(&self, raw_body: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.mode {
            EnrichMode::Passthrough => Ok(raw_body.to_string()),
            EnrichMode::Annotate(label) => {
                let mut payload: serde_json::Value = serde_json::from_str(raw_body)?;
                if let Some(obj) = payload.as_object_mut() {
                    obj.insert("overallSentiment".to_string(), json!(label));
                }
                Ok(payload.to_string())
            }
            EnrichMode::Fail => bail!("MockEnricher: classifier unavailable"),
            EnrichMode::Hang => std::future::pending().await,
        }
    }
}
