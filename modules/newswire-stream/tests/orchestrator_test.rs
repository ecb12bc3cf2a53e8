//! Orchestrator: registry, search resolution, one-shot search, history cache.

use std::sync::Arc;
use std::time::Duration;

use newswire_common::{SearchError, SearchRequest, SearchSpec, StreamFrame, StreamSettings};
use newswire_stream::testing::{source_list, urls_of, MockEnricher, MockSource};
use newswire_stream::{FrameReceiver, Orchestrator, OrchestratorHandle, OutboundChannel};

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn orchestrator(source: Arc<MockSource>) -> OrchestratorHandle {
    orchestrator_with(source, StreamSettings::default())
}

fn orchestrator_with(source: Arc<MockSource>, settings: StreamSettings) -> OrchestratorHandle {
    let (handle, _task) =
        Orchestrator::spawn(source, Arc::new(MockEnricher::passthrough()), settings);
    handle
}

fn spec(query: &str) -> SearchSpec {
    SearchRequest {
        query: Some(query.into()),
        ..Default::default()
    }
    .to_spec()
    .unwrap()
}

fn filter_request(country: &str) -> SearchRequest {
    SearchRequest {
        country: Some(country.into()),
        ..Default::default()
    }
}

/// Every frame until the channel completes.
async fn drain(rx: &mut FrameReceiver) -> Vec<StreamFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = tokio::time::timeout(Duration::from_secs(300), rx.recv())
        .await
        .expect("channel did not complete within 300s")
    {
        frames.push(frame);
    }
    frames
}

async fn next_event(rx: &mut FrameReceiver, event: &str) -> StreamFrame {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(300), rx.recv())
            .await
            .expect("no frame within 300s")
            .unwrap_or_else(|| panic!("channel completed before {event}"));
        if frame.event_name() == event {
            return frame;
        }
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_secs(1)).await;
}

// ---------------------------------------------------------------------------
// Session registry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn reused_session_id_replaces_previous_stream() {
    let source = Arc::new(MockSource::new().then_page(&["a1"]).then_page(&["b1"]));
    let orchestrator = orchestrator(source);

    let (first, mut first_rx) = OutboundChannel::new();
    let id = orchestrator
        .start_session(Some(spec("rust")), Some("shared"), first)
        .await
        .unwrap();
    let init = next_event(&mut first_rx, "init").await;
    assert_eq!(urls_of(init.articles()), ["a1"]);

    let (second, mut second_rx) = OutboundChannel::new();
    let reused = orchestrator
        .start_session(Some(spec("rust")), Some("shared"), second)
        .await
        .unwrap();
    assert_eq!(reused, id);

    // The old channel was completed before the new session registered.
    let leftovers = drain(&mut first_rx).await;
    assert!(leftovers.iter().all(|f| f.event_name() != "stream-error"));
    assert!(leftovers.iter().all(|f| urls_of(f.articles()) != ["b1"]));

    let init = next_event(&mut second_rx, "init").await;
    assert_eq!(urls_of(init.articles()), ["b1"]);

    // The old session's termination notice must not evict the new one.
    settle().await;
    assert_eq!(orchestrator.active_sessions().await.unwrap(), vec![id]);
}

#[tokio::test(start_paused = true)]
async fn generated_session_id_when_none_given() {
    let orchestrator = orchestrator(Arc::new(MockSource::new()));
    let (outbound, _rx) = OutboundChannel::new();
    let id = orchestrator
        .start_session(Some(spec("rust")), None, outbound)
        .await
        .unwrap();
    assert!(id.as_str().starts_with("session-"));
}

#[tokio::test(start_paused = true)]
async fn session_without_search_does_not_stream() {
    let source = Arc::new(MockSource::new());
    let orchestrator = orchestrator(source.clone());
    let (outbound, _rx) = OutboundChannel::new();
    orchestrator
        .start_session(None, Some("idle"), outbound)
        .await
        .unwrap();

    settle().await;
    assert_eq!(source.search_calls(), 0);
    assert!(orchestrator.fetch_history("idle").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_session_completes_channel_quietly() {
    let source = Arc::new(MockSource::new().then_page(&["u1"]));
    let orchestrator = orchestrator(source);
    let (outbound, mut rx) = OutboundChannel::new();
    orchestrator
        .start_session(Some(spec("rust")), Some("s1"), outbound)
        .await
        .unwrap();
    next_event(&mut rx, "init").await;

    assert!(orchestrator.stop_session("s1").await.unwrap());
    let rest = drain(&mut rx).await;
    assert!(rest.iter().all(|f| f.event_name() != "stream-error"));
    assert!(!orchestrator.stop_session("s1").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn shutdown_completes_every_session() {
    let orchestrator = orchestrator(Arc::new(MockSource::new()));
    let (a, mut rx_a) = OutboundChannel::new();
    let (b, mut rx_b) = OutboundChannel::new();
    orchestrator.start_session(Some(spec("a")), Some("a"), a).await.unwrap();
    orchestrator.start_session(Some(spec("b")), Some("b"), b).await.unwrap();

    orchestrator.shutdown().await;
    drain(&mut rx_a).await;
    drain(&mut rx_b).await;
    assert!(orchestrator.active_sessions().await.is_err());
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn history_of_live_session() {
    let orchestrator = orchestrator(Arc::new(MockSource::new()));
    let (outbound, _rx) = OutboundChannel::new();
    orchestrator
        .start_session(Some(spec("first")), Some("s1"), outbound)
        .await
        .unwrap();
    assert!(orchestrator.record_search("s1", spec("second")).await.unwrap());
    settle().await;

    let history = orchestrator.fetch_history("s1").await.unwrap();
    let queries: Vec<_> = history.iter().map(|e| e.query.as_deref()).collect();
    assert_eq!(queries, [Some("first"), Some("second")]);
}

#[tokio::test(start_paused = true)]
async fn history_survives_session_end() {
    let source = Arc::new(MockSource::new().then_status(500));
    let orchestrator = orchestrator(source);
    let (outbound, mut rx) = OutboundChannel::new();
    orchestrator
        .start_session(Some(spec("rust")), Some("s1"), outbound)
        .await
        .unwrap();

    let frames = drain(&mut rx).await;
    assert_eq!(
        frames.iter().filter(|f| f.event_name() == "stream-error").count(),
        1
    );
    settle().await;

    assert!(orchestrator.active_sessions().await.unwrap().is_empty());
    let history = orchestrator.fetch_history("s1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].query.as_deref(), Some("rust"));
    assert!(!orchestrator.record_search("s1", spec("late")).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn cached_history_expires_after_ttl() {
    let settings = StreamSettings {
        history_cache_ttl: Duration::from_secs(60),
        ..StreamSettings::default()
    };
    let orchestrator = orchestrator_with(Arc::new(MockSource::new()), settings);
    let (outbound, rx) = OutboundChannel::new();
    orchestrator
        .start_session(Some(spec("rust")), Some("s1"), outbound)
        .await
        .unwrap();
    settle().await;
    drop(rx);
    settle().await;

    assert_eq!(orchestrator.fetch_history("s1").await.unwrap().len(), 1);
    tokio::time::sleep(Duration::from_secs(61)).await;
    let err = orchestrator.fetch_history("s1").await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test(start_paused = true)]
async fn unknown_session_history_is_not_found() {
    let orchestrator = orchestrator(Arc::new(MockSource::new()));
    let err = orchestrator.fetch_history("nobody").await.unwrap_err();
    assert!(matches!(err, SearchError::NotFound(_)));
}

// ---------------------------------------------------------------------------
// Search resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn blank_request_is_rejected_without_upstream_call() {
    let source = Arc::new(MockSource::new());
    let orchestrator = orchestrator(source.clone());
    let err = orchestrator
        .resolve_spec(&SearchRequest::default())
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(source.sources_calls(), 0);
}

#[tokio::test]
async fn query_requests_skip_source_listing() {
    let source = Arc::new(MockSource::new());
    let orchestrator = orchestrator(source.clone());
    let request = SearchRequest {
        query: Some("rust".into()),
        country: Some("us".into()),
        ..Default::default()
    };
    let spec = orchestrator.resolve_spec(&request).await.unwrap();
    assert_eq!(spec.query(), Some("rust"));
    assert_eq!(source.sources_calls(), 0);
}

#[tokio::test]
async fn filter_expansion_is_capped_at_twenty_sources() {
    let ids: Vec<String> = (1..=25).map(|n| format!("src-{n}")).collect();
    let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let source = Arc::new(MockSource::new().on_sources(200, &source_list(&refs)));
    let orchestrator = orchestrator(source.clone());

    let spec = orchestrator.resolve_spec(&filter_request("us")).await.unwrap();
    assert_eq!(spec.sources().len(), 20);
    assert_eq!(spec.sources()[0], "src-1");
    assert_eq!(source.sources_calls(), 1);
}

#[tokio::test]
async fn filter_with_no_matching_sources_is_not_found() {
    let source = Arc::new(MockSource::new().on_sources(200, &source_list(&[])));
    let orchestrator = orchestrator(source);
    let err = orchestrator.resolve_spec(&filter_request("zz")).await.unwrap_err();
    assert_eq!(err, SearchError::NoSourcesMatched);
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn source_listing_failures_map_to_upstream_errors() {
    let rejected = Arc::new(MockSource::new().on_sources(401, r#"{"status":"error"}"#));
    let err = orchestrator(rejected)
        .resolve_spec(&filter_request("us"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);

    let unreachable = Arc::new(MockSource::new().on_sources_network_error("dns failure"));
    let err = orchestrator(unreachable)
        .resolve_spec(&filter_request("us"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 502);

    let garbled = Arc::new(MockSource::new().on_sources(200, "not json"));
    let err = orchestrator(garbled)
        .resolve_spec(&filter_request("us"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 502);
}

// ---------------------------------------------------------------------------
// One-shot search
// ---------------------------------------------------------------------------

#[tokio::test]
async fn search_once_returns_enriched_batch() {
    let source = Arc::new(MockSource::new().then_page(&["u1", "u2"]));
    let (orchestrator, _task) = Orchestrator::spawn(
        source,
        Arc::new(MockEnricher::annotating("neutral")),
        StreamSettings::default(),
    );

    let batch = orchestrator.search_once(&spec("rust")).await.unwrap();
    assert_eq!(urls_of(&batch.articles), ["u1", "u2"]);
    assert_eq!(batch.overall_sentiment, Some(serde_json::json!("neutral")));
    assert_eq!(batch.total_results, Some(2));
}

#[tokio::test]
async fn search_once_reports_upstream_status() {
    let source = Arc::new(MockSource::new().then_status(429));
    let err = orchestrator(source)
        .search_once(&spec("rust"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 429);
}

#[tokio::test(start_paused = true)]
async fn search_once_gives_up_on_unanswered_fetch() {
    let source = Arc::new(MockSource::new().then_hang());
    let err = orchestrator(source)
        .search_once(&spec("rust"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 502);
}
