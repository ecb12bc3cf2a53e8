use serde::Deserialize;

/// Parameters for an article search.
#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub query: Option<String>,
    pub sources: Vec<String>,
    pub country: Option<String>,
    pub category: Option<String>,
    pub language: Option<String>,
    pub sort_by: Option<String>,
    pub page_size: Option<u32>,
}

/// Filters for the source listing endpoint.
#[derive(Debug, Clone, Default)]
pub struct SourcesParams {
    pub country: Option<String>,
    pub category: Option<String>,
    pub language: Option<String>,
}

/// Status and body of an API call, returned as-is. Callers decide what a
/// non-2xx status means for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourcesResponse {
    #[serde(default)]
    pub sources: Vec<SourceInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceInfo {
    pub id: Option<String>,
    pub name: Option<String>,
    pub category: Option<String>,
    pub language: Option<String>,
    pub country: Option<String>,
}

impl SourcesResponse {
    /// Source ids in listing order, skipping entries without one.
    pub fn ids(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter_map(|s| s.id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_skip_missing_and_blank() {
        let parsed: SourcesResponse = serde_json::from_str(
            r#"{"status":"ok","sources":[{"id":"bbc-news","name":"BBC"},{"id":null,"name":"x"},{"id":" "}]}"#,
        )
        .unwrap();
        assert_eq!(parsed.ids(), vec!["bbc-news".to_string()]);
    }
}
