use thiserror::Error;

/// Failures surfaced to callers of the request/response operations
/// (search resolution, one-shot search, history lookup).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("No sources matched the requested filters")]
    NoSourcesMatched,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upstream error (status {status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SearchError {
    pub fn status_code(&self) -> u16 {
        match self {
            SearchError::Validation(_) => 400,
            SearchError::NoSourcesMatched | SearchError::NotFound(_) => 404,
            SearchError::Upstream { status, .. } => *status,
            SearchError::Internal(_) => 500,
        }
    }

    /// Network or payload failure talking to the content source.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        SearchError::Upstream {
            status: 502,
            message: message.into(),
        }
    }
}

/// Business failures that end a live stream. Each one closes the stream and
/// is reported to the client as a single `stream-error` frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamFailure {
    #[error("content source request failed: {0}")]
    Network(String),

    #[error("content source returned status {0}")]
    Status(u16),

    #[error("content source returned an empty response")]
    EmptyBody,

    #[error("unparseable search payload: {0}")]
    Parse(String),
}

impl StreamFailure {
    pub fn is_upstream(&self) -> bool {
        !matches!(self, StreamFailure::Parse(_))
    }
}
