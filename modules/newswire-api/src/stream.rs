//! Live transports: SSE and WebSocket. Both resolve the request before
//! opening the stream, so validation and source-expansion failures come back
//! as plain JSON errors.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderName,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info};

use newswire_common::SearchRequest;
use newswire_stream::{FrameReceiver, OutboundChannel};

use crate::error::ApiError;
use crate::AppState;

const SESSION_HEADER: HeaderName = HeaderName::from_static("x-session-id");

pub async fn api_stream(
    State(state): State<Arc<AppState>>,
    Query(request): Query<SearchRequest>,
) -> Result<Response, ApiError> {
    let spec = state.orchestrator.resolve_spec(&request).await?;
    let (outbound, frames) = OutboundChannel::new();
    let session_id = state
        .orchestrator
        .start_session(Some(spec), request.session_id.as_deref(), outbound)
        .await?;
    info!(session_id = %session_id, "SSE stream opened");

    // Dropping `frames` with the response body completes the session.
    let events = async_stream::stream! {
        let mut frames = frames;
        while let Some(frame) = frames.recv().await {
            yield Ok::<_, Infallible>(
                Event::default().event(frame.event_name()).data(frame.data_line()),
            );
        }
    };

    Ok((
        [(SESSION_HEADER, session_id.to_string())],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response())
}

pub async fn api_ws(
    State(state): State<Arc<AppState>>,
    Query(request): Query<SearchRequest>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let spec = state.orchestrator.resolve_spec(&request).await?;
    let (outbound, frames) = OutboundChannel::new();
    let session_id = state
        .orchestrator
        .start_session(Some(spec), request.session_id.as_deref(), outbound)
        .await?;
    info!(session_id = %session_id, "WebSocket stream opened");

    Ok(ws
        .on_upgrade(move |socket| forward_frames(socket, frames))
        .into_response())
}

/// Pump frames into the socket until either side finishes. Client messages
/// other than close are ignored.
async fn forward_frames(socket: WebSocket, mut frames: FrameReceiver) {
    let (mut sink, mut incoming) = socket.split();
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if sink.send(Message::Text(frame.encode().into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = incoming.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("WebSocket closed");
}
