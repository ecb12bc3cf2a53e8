use serde::Serialize;
use serde_json::json;

use crate::types::{HistoryEntry, SessionId};

/// One outbound event. Each frame is pushed on its own, never batched.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Init {
        overall_sentiment: Option<serde_json::Value>,
        articles: Vec<serde_json::Value>,
    },
    Append {
        overall_sentiment: Option<serde_json::Value>,
        articles: Vec<serde_json::Value>,
    },
    History {
        session_id: SessionId,
        history: Vec<HistoryEntry>,
    },
    StreamError {
        message: String,
        session_id: SessionId,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryPayload<'a> {
    session_id: &'a SessionId,
    history: &'a [HistoryEntry],
}

impl StreamFrame {
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamFrame::Init { .. } => "init",
            StreamFrame::Append { .. } => "append",
            StreamFrame::History { .. } => "history",
            StreamFrame::StreamError { .. } => "stream-error",
        }
    }

    pub fn data(&self) -> serde_json::Value {
        match self {
            StreamFrame::Init {
                overall_sentiment,
                articles,
            } => json!({
                "overallSentiment": overall_sentiment,
                "resultCount": articles.len(),
                "initial": true,
                "articles": articles,
            }),
            StreamFrame::Append {
                overall_sentiment,
                articles,
            } => json!({
                "overallSentiment": overall_sentiment,
                "resultCount": articles.len(),
                "articles": articles,
            }),
            StreamFrame::History {
                session_id,
                history,
            } => serde_json::to_value(HistoryPayload {
                session_id,
                history,
            })
            .unwrap_or(serde_json::Value::Null),
            StreamFrame::StreamError {
                message,
                session_id,
            } => json!({
                "message": message,
                "sessionId": session_id,
            }),
        }
    }

    /// Single-line JSON body of the frame.
    pub fn data_line(&self) -> String {
        self.data().to_string()
    }

    /// `event: <name>\ndata: <json>\n\n`
    pub fn encode(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event_name(), self.data_line())
    }

    /// Articles carried by an `init` or `append` frame.
    pub fn articles(&self) -> &[serde_json::Value] {
        match self {
            StreamFrame::Init { articles, .. } | StreamFrame::Append { articles, .. } => articles,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::types::SearchRequest;

    #[test]
    fn init_frame_wire_format() {
        let frame = StreamFrame::Init {
            overall_sentiment: Some(json!("positive")),
            articles: vec![json!({"url": "u1"}), json!({"url": "u2"})],
        };
        let encoded = frame.encode();
        assert!(encoded.starts_with("event: init\ndata: {"));
        assert!(encoded.ends_with("}\n\n"));
        assert_eq!(encoded.matches('\n').count(), 3);

        let data = frame.data();
        assert_eq!(data["resultCount"], 2);
        assert_eq!(data["initial"], true);
        assert_eq!(data["overallSentiment"], "positive");
    }

    #[test]
    fn append_frame_has_no_initial_flag() {
        let frame = StreamFrame::Append {
            overall_sentiment: None,
            articles: vec![json!({"url": "u3"})],
        };
        let data = frame.data();
        assert!(data.get("initial").is_none());
        assert_eq!(data["resultCount"], 1);
        assert!(data["overallSentiment"].is_null());
    }

    #[test]
    fn history_frame_payload() {
        let spec = SearchRequest {
            query: Some("rust".into()),
            ..Default::default()
        }
        .to_spec()
        .unwrap();
        let frame = StreamFrame::History {
            session_id: SessionId::from("s1"),
            history: vec![HistoryEntry::from_spec(&spec, Utc::now())],
        };
        let data = frame.data();
        assert_eq!(frame.event_name(), "history");
        assert_eq!(data["sessionId"], "s1");
        assert_eq!(data["history"][0]["query"], "rust");
    }

    #[test]
    fn stream_error_frame_payload() {
        let frame = StreamFrame::StreamError {
            message: "upstream returned 500".into(),
            session_id: SessionId::from("s1"),
        };
        assert!(frame.encode().starts_with("event: stream-error\n"));
        assert_eq!(frame.data()["sessionId"], "s1");
    }
}
