//! Duplicate detection across polls.
//!
//! Every article gets a [`SeenKey`] derived in priority order:
//! 1. its `url`, trimmed
//! 2. `title|publishedAt`
//! 3. SHA-256 of its canonical JSON form
//!
//! A [`SeenSet`] owns the keys for one stream and only ever grows.

use std::collections::HashSet;
use std::fmt;

use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeenKey(String);

impl SeenKey {
    pub fn for_article(article: &serde_json::Value) -> Self {
        if let Some(url) = str_field(article, "url") {
            return Self(url.to_string());
        }

        let title = str_field(article, "title").unwrap_or_default();
        let published = str_field(article, "publishedAt").unwrap_or_default();
        if !title.is_empty() || !published.is_empty() {
            return Self(format!("{title}|{published}"));
        }

        // serde_json maps are ordered by key, so the serialization is canonical.
        match serde_json::to_string(article) {
            Ok(serialized) => Self(hex::encode(Sha256::digest(serialized.as_bytes()))),
            Err(_) => Self(String::new()),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeenKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn str_field<'a>(article: &'a serde_json::Value, field: &str) -> Option<&'a str> {
    article
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Default)]
pub struct SeenSet {
    keys: HashSet<SeenKey>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-insert in one step. Returns true only for a non-blank key
    /// that was not already present.
    pub fn insert_new(&mut self, key: SeenKey) -> bool {
        if key.is_blank() {
            return false;
        }
        self.keys.insert(key)
    }

    /// Keep only the articles not seen before, recording them as seen.
    pub fn retain_new(&mut self, articles: Vec<serde_json::Value>) -> Vec<serde_json::Value> {
        articles
            .into_iter()
            .filter(|a| self.insert_new(SeenKey::for_article(a)))
            .collect()
    }

    /// Record every article of a batch without filtering.
    pub fn record_all(&mut self, articles: &[serde_json::Value]) {
        for article in articles {
            self.insert_new(SeenKey::for_article(article));
        }
    }

    pub fn contains(&self, key: &SeenKey) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
