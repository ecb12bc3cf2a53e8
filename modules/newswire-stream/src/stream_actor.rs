//! Per-session poll → dedup → enrich → emit pipeline.
//!
//! The actor owns its seen-key set and closed flag. Fetches and enrichment
//! calls run as tasks in a `JoinSet`; their results come back through the
//! same select loop as messages, so the loop stays free to observe a stop or
//! a completed outbound channel while a call is outstanding.
//!
//! Closing is terminal: one `stream-error` frame for business failures
//! (none for stop / channel completion), timer dropped, in-flight calls
//! aborted, outbound channel completed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use newswire_common::{SearchBatch, SearchSpec, SeenSet, SessionId, StreamFailure, StreamFrame};

use crate::outbound::OutboundChannel;
use crate::supervisor::{supervise, BackoffPolicy, SupervisorExit};
use crate::traits::{enrich_or_raw, ContentSource, SentimentEnricher, SourceResponse};

/// Shortest accepted poll period. A zero period would stall the timer.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Initial,
    Incremental,
}

/// Completions delivered back into the actor loop.
pub enum StreamMessage {
    Fetched {
        kind: FetchKind,
        result: anyhow::Result<SourceResponse>,
    },
    Enriched {
        kind: FetchKind,
        body: String,
        degraded: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Stopped,
    ChannelCompleted,
    Failed(StreamFailure),
}

#[derive(Debug, Default)]
pub struct StreamState {
    pub seen: SeenSet,
    pub closed: bool,
    /// A fetch or its enrichment is outstanding.
    pub in_flight: bool,
}

/// Everything needed to (re)build a stream actor.
#[derive(Clone)]
pub struct StreamConfig {
    pub session_id: SessionId,
    pub spec: Arc<SearchSpec>,
    pub outbound: OutboundChannel,
    pub source: Arc<dyn ContentSource>,
    pub enricher: Arc<dyn SentimentEnricher>,
    pub poll_interval: Duration,
    /// A search still unanswered after this long fails as a network error.
    pub fetch_timeout: Duration,
    pub enrichment_timeout: Duration,
}

pub struct StreamActor {
    config: StreamConfig,
    state: StreamState,
    tasks: JoinSet<StreamMessage>,
    cancel: CancellationToken,
}

impl StreamActor {
    pub fn new(mut config: StreamConfig, cancel: CancellationToken) -> Self {
        if config.poll_interval < MIN_POLL_INTERVAL {
            warn!(
                session_id = %config.session_id,
                poll_interval_ms = config.poll_interval.as_millis() as u64,
                "Poll interval too short, using the minimum"
            );
            config.poll_interval = MIN_POLL_INTERVAL;
        }
        Self {
            config,
            state: StreamState::default(),
            tasks: JoinSet::new(),
            cancel,
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Run until closed. Panics raised inside fetch or enrichment tasks are
    /// re-raised here so the supervisor sees them.
    pub async fn run(mut self) -> CloseReason {
        let session_id = self.config.session_id.clone();
        info!(session_id = %session_id, "Stream started");

        self.spawn_fetch(FetchKind::Initial);

        let period = self.config.poll_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cancel = self.cancel.clone();
        let completion = self.config.outbound.completion();

        let reason = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break CloseReason::Stopped,

                _ = completion.cancelled() => break CloseReason::ChannelCompleted,

                Some(joined) = self.tasks.join_next() => {
                    let message = match joined {
                        Ok(message) => message,
                        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                        Err(_) => continue,
                    };
                    if let Err(failure) = self.handle(message) {
                        break CloseReason::Failed(failure);
                    }
                }

                _ = ticker.tick() => self.on_tick(),
            }
        };

        self.close(&reason);
        drop(ticker);
        info!(session_id = %session_id, reason = ?reason, "Stream closed");
        reason
    }

    fn on_tick(&mut self) {
        if self.state.closed {
            return;
        }
        if self.state.in_flight {
            debug!(session_id = %self.config.session_id, "Previous poll still running, skipping tick");
            return;
        }
        self.spawn_fetch(FetchKind::Incremental);
    }

    fn spawn_fetch(&mut self, kind: FetchKind) {
        self.state.in_flight = true;
        let source = self.config.source.clone();
        let spec = self.config.spec.clone();
        let timeout = self.config.fetch_timeout;
        self.tasks.spawn(async move {
            let result = match tokio::time::timeout(timeout, source.search(&spec)).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!(
                    "no answer within {}s",
                    timeout.as_secs_f64()
                )),
            };
            StreamMessage::Fetched { kind, result }
        });
    }

    fn spawn_enrichment(&mut self, kind: FetchKind, body: String) {
        let enricher = self.config.enricher.clone();
        let timeout = self.config.enrichment_timeout;
        self.tasks.spawn(async move {
            let (body, degraded) = enrich_or_raw(enricher.as_ref(), body, timeout).await;
            StreamMessage::Enriched {
                kind,
                body,
                degraded,
            }
        });
    }

    /// Apply one completion. Anything arriving after close is dropped.
    pub fn handle(&mut self, message: StreamMessage) -> Result<(), StreamFailure> {
        if self.state.closed {
            return Ok(());
        }

        match message {
            StreamMessage::Fetched { kind, result } => {
                let body = check_fetch(result)?;
                self.spawn_enrichment(kind, body);
            }
            StreamMessage::Enriched {
                kind,
                body,
                degraded,
            } => {
                self.state.in_flight = false;
                let batch =
                    SearchBatch::parse(&body).map_err(|e| StreamFailure::Parse(e.to_string()))?;
                if degraded {
                    debug!(session_id = %self.config.session_id, "Emitting unenriched batch");
                }
                self.emit_batch(kind, batch);
            }
        }
        Ok(())
    }

    fn emit_batch(&mut self, kind: FetchKind, batch: SearchBatch) {
        let session_id = &self.config.session_id;
        match kind {
            FetchKind::Initial => {
                self.state.seen.record_all(&batch.articles);
                info!(
                    session_id = %session_id,
                    results = batch.articles.len(),
                    "Initial batch"
                );
                self.config.outbound.push(StreamFrame::Init {
                    overall_sentiment: batch.overall_sentiment,
                    articles: batch.articles,
                });
            }
            FetchKind::Incremental => {
                let fetched = batch.articles.len();
                let fresh = self.state.seen.retain_new(batch.articles);
                if fresh.is_empty() {
                    debug!(session_id = %session_id, fetched, "No new articles");
                    return;
                }
                info!(
                    session_id = %session_id,
                    fetched,
                    new_items = fresh.len(),
                    "Appending new articles"
                );
                self.config.outbound.push(StreamFrame::Append {
                    overall_sentiment: batch.overall_sentiment,
                    articles: fresh,
                });
            }
        }
    }

    /// Enter the terminal state. Idempotent.
    pub fn close(&mut self, reason: &CloseReason) {
        if self.state.closed {
            return;
        }
        self.state.closed = true;

        if let CloseReason::Failed(failure) = reason {
            warn!(session_id = %self.config.session_id, error = %failure, "Stream failed");
            self.config.outbound.push(StreamFrame::StreamError {
                message: failure.to_string(),
                session_id: self.config.session_id.clone(),
            });
        }

        self.tasks.abort_all();
        self.config.outbound.complete();
    }
}

fn check_fetch(result: anyhow::Result<SourceResponse>) -> Result<String, StreamFailure> {
    let response = result.map_err(|e| StreamFailure::Network(e.to_string()))?;
    if response.status >= 400 {
        return Err(StreamFailure::Status(response.status));
    }
    response
        .body
        .filter(|b| !b.trim().is_empty())
        .ok_or(StreamFailure::EmptyBody)
}

// ---------------------------------------------------------------------------
// Supervised spawn
// ---------------------------------------------------------------------------

/// Handle to a supervised stream. Stopping cancels both the actor and its
/// supervisor.
pub struct StreamHandle {
    cancel: CancellationToken,
    task: JoinHandle<SupervisorExit>,
}

impl StreamHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop and wait up to `grace` for the stream to exit; abort it after.
    pub async fn stop_and_wait(self, grace: Duration) {
        self.cancel.cancel();
        let mut task = self.task;
        if tokio::time::timeout(grace, &mut task).await.is_err() {
            warn!("Stream did not stop within grace period, aborting");
            task.abort();
        }
    }
}

/// Spawn a stream actor under restart-with-backoff supervision. Each restart
/// gets a fresh actor for the same session and outbound channel.
pub fn spawn_supervised(config: StreamConfig, policy: BackoffPolicy) -> StreamHandle {
    let cancel = CancellationToken::new();
    let supervisor_cancel = cancel.clone();

    let task = tokio::spawn(async move {
        let outbound = config.outbound.clone();
        let name = format!("stream:{}", config.session_id);
        let exit = supervise(&name, policy, supervisor_cancel.clone(), |restart| {
            if restart > 0 {
                info!(session_id = %config.session_id, restart, "Relaunching stream");
            }
            let actor = StreamActor::new(config.clone(), supervisor_cancel.clone());
            async move {
                actor.run().await;
            }
        })
        .await;

        // A stream that gives up crashing never reached Closed on its own.
        if exit != SupervisorExit::Finished {
            outbound.complete();
        }
        exit
    });

    StreamHandle { cancel, task }
}
