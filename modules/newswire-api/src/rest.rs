use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use tracing::{debug, info};

use newswire_common::SearchRequest;

use crate::error::ApiError;
use crate::AppState;

/// One-shot search. A `sessionId` naming a live session gets the search
/// added to that session's history.
pub async fn api_search(
    State(state): State<Arc<AppState>>,
    Query(request): Query<SearchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = state.orchestrator.resolve_spec(&request).await?;
    let batch = state.orchestrator.search_once(&spec).await?;

    if let Some(session_id) = request.session_id.as_deref().filter(|s| !s.trim().is_empty()) {
        let recorded = state.orchestrator.record_search(session_id, spec).await?;
        if !recorded {
            debug!(session_id, "Search not recorded, session is not live");
        }
    }

    info!(results = batch.articles.len(), "One-shot search");
    Ok(Json(serde_json::json!({
        "overallSentiment": batch.overall_sentiment,
        "resultCount": batch.articles.len(),
        "totalResults": batch.total_results,
        "articles": batch.articles,
    })))
}

pub async fn api_history(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let history = state.orchestrator.fetch_history(&session_id).await?;
    Ok(Json(serde_json::json!({
        "sessionId": session_id,
        "history": history,
    })))
}

pub async fn api_stop_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.orchestrator.stop_session(&session_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(newswire_common::SearchError::NotFound(format!(
            "session {session_id}"
        ))))
    }
}
