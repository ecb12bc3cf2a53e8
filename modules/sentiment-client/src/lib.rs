use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SentimentError>;

#[derive(Debug, Error)]
pub enum SentimentError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Classifier error (status {status}): {message}")]
    Api { status: u16, message: String },
}

impl From<reqwest::Error> for SentimentError {
    fn from(err: reqwest::Error) -> Self {
        SentimentError::Network(err.to_string())
    }
}

/// Client for the sentiment classification service. The service takes a raw
/// search payload and returns it annotated with per-article and overall
/// sentiment.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SentimentClient {
    client: reqwest::Client,
    url: String,
}

impl SentimentClient {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            url,
        }
    }

    pub async fn classify(&self, raw_body: &str) -> Result<String> {
        let resp = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(raw_body.to_string())
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SentimentError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let enriched = resp.text().await?;
        tracing::debug!(bytes = enriched.len(), "Sentiment classification complete");
        Ok(enriched)
    }
}
