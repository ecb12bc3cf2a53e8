use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{delete, get},
    Router,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use newsapi_client::NewsApiClient;
use newswire_common::Config;
use newswire_stream::{Orchestrator, OrchestratorHandle, PassthroughEnricher, SentimentEnricher};
use sentiment_client::SentimentClient;

mod error;
mod rest;
mod stream;

pub struct AppState {
    pub orchestrator: OrchestratorHandle,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("newswire=info".parse()?))
        .init();

    let config = Config::from_env();

    let source = Arc::new(NewsApiClient::with_base_url(
        config.news_api_key.clone(),
        config.news_api_base_url.clone(),
    ));
    let enricher: Arc<dyn SentimentEnricher> = match &config.sentiment_url {
        Some(url) => {
            info!(url = %url, "Sentiment enrichment enabled");
            Arc::new(SentimentClient::new(url.clone()))
        }
        None => {
            info!("SENTIMENT_URL not set, articles pass through unenriched");
            Arc::new(PassthroughEnricher)
        }
    };

    let (orchestrator, orchestrator_task) =
        Orchestrator::spawn(source, enricher, config.stream.clone());

    let state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
    });

    let app = Router::new()
        // Health check
        .route("/", get(|| async { "ok" }))
        // Request/response
        .route("/api/search", get(rest::api_search))
        .route("/api/history/{session_id}", get(rest::api_history))
        .route("/api/sessions/{session_id}", delete(rest::api_stop_session))
        // Live streams
        .route("/api/stream", get(stream::api_stream))
        .route("/api/ws", get(stream::api_ws))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any)
                .expose_headers(tower_http::cors::Any),
        )
        // Method + path only; query strings carry search terms
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        );

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("Newswire API starting on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(orchestrator))
        .await?;

    orchestrator_task.await?;
    Ok(())
}

async fn shutdown_signal(orchestrator: OrchestratorHandle) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown requested, stopping sessions");
    orchestrator.shutdown().await;
}
