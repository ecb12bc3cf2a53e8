//! Session registry, request router and history cache.
//!
//! The orchestrator is a single task. The registry and the history cache
//! live inside it and are only mutated from its command loop; every other
//! party (transport handlers, session actors, history asks) talks to it
//! through `OrchestratorCommand`s.
//!
//! Stateless request work (search resolution, one-shot search) runs directly
//! on the `OrchestratorHandle` without entering the loop.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use newsapi_client::SourcesResponse;
use newswire_common::{
    HistoryEntry, SearchBatch, SearchError, SearchRequest, SearchSpec, SessionId, StreamSettings,
    MAX_EXPANDED_SOURCES,
};

use crate::outbound::OutboundChannel;
use crate::session_actor::{ActorError, SessionActor, SessionConfig, SessionHandle};
use crate::stream_actor::{spawn_supervised, StreamConfig, StreamHandle};
use crate::supervisor::BackoffPolicy;
use crate::traits::{enrich_or_raw, ContentSource, SentimentEnricher};

/// Orchestrator mailbox capacity.
pub const CHANNEL_CAPACITY: usize = 256;

pub enum OrchestratorCommand {
    // From transport handlers
    StartSession {
        session_id: SessionId,
        spec: Option<SearchSpec>,
        outbound: OutboundChannel,
        reply: oneshot::Sender<SessionId>,
    },
    RecordSearch {
        session_id: SessionId,
        spec: SearchSpec,
        reply: oneshot::Sender<bool>,
    },
    FetchHistory {
        session_id: SessionId,
        reply: oneshot::Sender<Result<Vec<HistoryEntry>, SearchError>>,
    },
    StopSession {
        session_id: SessionId,
        reply: oneshot::Sender<bool>,
    },
    ActiveSessions {
        reply: oneshot::Sender<Vec<SessionId>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },

    // From session actors
    StartStream {
        session_id: SessionId,
        generation: u64,
        spec: Option<SearchSpec>,
        outbound: OutboundChannel,
    },
    HistoryUpdated {
        session_id: SessionId,
        generation: u64,
        entries: Vec<HistoryEntry>,
    },
    SessionClosed {
        session_id: SessionId,
        generation: u64,
    },
}

struct SessionEntry {
    generation: u64,
    session: SessionHandle,
    outbound: OutboundChannel,
    stream: Option<StreamHandle>,
}

struct CachedHistory {
    generation: u64,
    entries: Vec<HistoryEntry>,
    cached_at: Instant,
}

// ============================================================================
// Handle
// ============================================================================

#[derive(Clone)]
pub struct OrchestratorHandle {
    tx: mpsc::Sender<OrchestratorCommand>,
    source: Arc<dyn ContentSource>,
    enricher: Arc<dyn SentimentEnricher>,
    settings: Arc<StreamSettings>,
}

impl OrchestratorHandle {
    /// Register a session under `session_id` (generated when absent or
    /// blank), replacing and stopping any live session with the same id.
    pub async fn start_session(
        &self,
        spec: Option<SearchSpec>,
        session_id: Option<&str>,
        outbound: OutboundChannel,
    ) -> Result<SessionId, SearchError> {
        let session_id = SessionId::resolve(session_id);
        self.ask(|reply| OrchestratorCommand::StartSession {
            session_id,
            spec,
            outbound,
            reply,
        })
        .await
    }

    /// Validate a request into a ready search, expanding filter-only
    /// requests into an explicit source list.
    pub async fn resolve_spec(&self, request: &SearchRequest) -> Result<SearchSpec, SearchError> {
        let spec = request.to_spec()?;
        if !spec.needs_source_expansion() {
            return Ok(spec);
        }

        let response = self
            .source
            .sources(&spec.filter())
            .await
            .map_err(|e| SearchError::bad_gateway(format!("source listing failed: {e}")))?;
        if response.status >= 400 {
            return Err(SearchError::Upstream {
                status: response.status,
                message: response.body.unwrap_or_default(),
            });
        }

        let body = response
            .body
            .ok_or_else(|| SearchError::bad_gateway("source listing returned no body"))?;
        let listing: SourcesResponse = serde_json::from_str(&body)
            .map_err(|e| SearchError::bad_gateway(format!("unparseable source listing: {e}")))?;

        let mut ids = listing.ids();
        if ids.is_empty() {
            return Err(SearchError::NoSourcesMatched);
        }
        ids.truncate(MAX_EXPANDED_SOURCES);
        debug!(sources = ids.len(), "Expanded filters into source list");
        Ok(spec.with_sources(ids))
    }

    /// One fetch + enrichment + parse, outside any session.
    pub async fn search_once(&self, spec: &SearchSpec) -> Result<SearchBatch, SearchError> {
        let response = tokio::time::timeout(self.settings.fetch_timeout, self.source.search(spec))
            .await
            .map_err(|_| SearchError::bad_gateway("search timed out"))?
            .map_err(|e| SearchError::bad_gateway(format!("search failed: {e}")))?;
        if response.status >= 400 {
            return Err(SearchError::Upstream {
                status: response.status,
                message: response.body.unwrap_or_default(),
            });
        }
        let body = response
            .body
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| SearchError::bad_gateway("search returned no body"))?;

        let (body, _degraded) =
            enrich_or_raw(self.enricher.as_ref(), body, self.settings.enrichment_timeout).await;
        SearchBatch::parse(&body)
            .map_err(|e| SearchError::bad_gateway(format!("unparseable search payload: {e}")))
    }

    /// History of a live session, or the cached snapshot of an ended one.
    pub async fn fetch_history(&self, session_id: &str) -> Result<Vec<HistoryEntry>, SearchError> {
        let session_id = SessionId::from(session_id);
        self.ask(|reply| OrchestratorCommand::FetchHistory { session_id, reply })
            .await?
    }

    /// Add a search to a live session's history. Returns false when no
    /// session with that id is live.
    pub async fn record_search(&self, session_id: &str, spec: SearchSpec) -> Result<bool, SearchError> {
        let session_id = SessionId::from(session_id);
        self.ask(|reply| OrchestratorCommand::RecordSearch {
            session_id,
            spec,
            reply,
        })
        .await
    }

    pub async fn stop_session(&self, session_id: &str) -> Result<bool, SearchError> {
        let session_id = SessionId::from(session_id);
        self.ask(|reply| OrchestratorCommand::StopSession { session_id, reply })
            .await
    }

    pub async fn active_sessions(&self) -> Result<Vec<SessionId>, SearchError> {
        self.ask(|reply| OrchestratorCommand::ActiveSessions { reply })
            .await
    }

    /// Stop every session and end the orchestrator task.
    pub async fn shutdown(&self) {
        if self
            .ask(|reply| OrchestratorCommand::Shutdown { reply })
            .await
            .is_err()
        {
            debug!("Orchestrator already stopped");
        }
    }

    async fn ask<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> OrchestratorCommand,
    ) -> Result<T, SearchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| SearchError::Internal("orchestrator has shut down".to_string()))?;
        reply_rx
            .await
            .map_err(|_| SearchError::Internal("orchestrator dropped the request".to_string()))
    }
}

// ============================================================================
// Orchestrator task
// ============================================================================

pub struct Orchestrator {
    sessions: HashMap<SessionId, SessionEntry>,
    history_cache: HashMap<SessionId, CachedHistory>,
    next_generation: u64,
    source: Arc<dyn ContentSource>,
    enricher: Arc<dyn SentimentEnricher>,
    settings: Arc<StreamSettings>,
    command_tx: mpsc::Sender<OrchestratorCommand>,
    command_rx: mpsc::Receiver<OrchestratorCommand>,
}

enum Flow {
    Continue,
    Shutdown,
}

impl Orchestrator {
    pub fn spawn(
        source: Arc<dyn ContentSource>,
        enricher: Arc<dyn SentimentEnricher>,
        settings: StreamSettings,
    ) -> (OrchestratorHandle, JoinHandle<()>) {
        let (orchestrator, handle) = Self::new(source, enricher, settings);
        let task = tokio::spawn(orchestrator.run());
        (handle, task)
    }

    fn new(
        source: Arc<dyn ContentSource>,
        enricher: Arc<dyn SentimentEnricher>,
        settings: StreamSettings,
    ) -> (Self, OrchestratorHandle) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let settings = Arc::new(settings);

        let orchestrator = Self {
            sessions: HashMap::new(),
            history_cache: HashMap::new(),
            next_generation: 0,
            source: source.clone(),
            enricher: enricher.clone(),
            settings: settings.clone(),
            command_tx: tx.clone(),
            command_rx: rx,
        };
        let handle = OrchestratorHandle {
            tx,
            source,
            enricher,
            settings,
        };
        (orchestrator, handle)
    }

    async fn run(mut self) {
        info!("Orchestrator started");
        while let Some(command) = self.command_rx.recv().await {
            if let Flow::Shutdown = self.handle(command).await {
                break;
            }
        }
        info!("Orchestrator stopped");
    }

    async fn handle(&mut self, command: OrchestratorCommand) -> Flow {
        match command {
            OrchestratorCommand::StartSession {
                session_id,
                spec,
                outbound,
                reply,
            } => {
                self.start_session(session_id.clone(), spec, outbound).await;
                let _ = reply.send(session_id);
            }
            OrchestratorCommand::StartStream {
                session_id,
                generation,
                spec,
                outbound,
            } => self.start_stream(session_id, generation, spec, outbound).await,
            OrchestratorCommand::RecordSearch {
                session_id,
                spec,
                reply,
            } => {
                let live = match self.sessions.get(&session_id) {
                    Some(entry) => {
                        let session = entry.session.clone();
                        // Off the loop: the session may itself be waiting on us.
                        tokio::spawn(async move {
                            let _ = session.record_search(Some(spec)).await;
                        });
                        true
                    }
                    None => false,
                };
                let _ = reply.send(live);
            }
            OrchestratorCommand::FetchHistory { session_id, reply } => {
                self.fetch_history(session_id, reply)
            }
            OrchestratorCommand::HistoryUpdated {
                session_id,
                generation,
                entries,
            } => self.cache_history(session_id, generation, entries),
            OrchestratorCommand::SessionClosed {
                session_id,
                generation,
            } => self.deregister(session_id, generation),
            OrchestratorCommand::StopSession { session_id, reply } => {
                let stopped = match self.sessions.remove(&session_id) {
                    Some(entry) => {
                        info!(session_id = %session_id, "Stopping session");
                        self.stop_entry(entry).await;
                        true
                    }
                    None => false,
                };
                let _ = reply.send(stopped);
            }
            OrchestratorCommand::ActiveSessions { reply } => {
                let _ = reply.send(self.sessions.keys().cloned().collect());
            }
            OrchestratorCommand::Shutdown { reply } => {
                info!(sessions = self.sessions.len(), "Shutting down all sessions");
                let entries: Vec<SessionEntry> =
                    self.sessions.drain().map(|(_, entry)| entry).collect();
                for entry in entries {
                    self.stop_entry(entry).await;
                }
                let _ = reply.send(());
                return Flow::Shutdown;
            }
        }
        Flow::Continue
    }

    async fn start_session(
        &mut self,
        session_id: SessionId,
        spec: Option<SearchSpec>,
        outbound: OutboundChannel,
    ) {
        // The old stream must be gone before the new session can emit.
        if let Some(previous) = self.sessions.remove(&session_id) {
            info!(session_id = %session_id, "Session id reused, stopping previous session");
            self.stop_entry(previous).await;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let (session, _task) = SessionActor::spawn(SessionConfig {
            session_id: session_id.clone(),
            generation,
            spec,
            outbound: outbound.clone(),
            orchestrator: self.command_tx.clone(),
        });

        info!(session_id = %session_id, generation, "Session registered");
        self.sessions.insert(
            session_id,
            SessionEntry {
                generation,
                session,
                outbound,
                stream: None,
            },
        );
    }

    async fn start_stream(
        &mut self,
        session_id: SessionId,
        generation: u64,
        spec: Option<SearchSpec>,
        outbound: OutboundChannel,
    ) {
        let Some(entry) = self.sessions.get_mut(&session_id) else {
            debug!(session_id = %session_id, "Stream request for unknown session ignored");
            return;
        };
        if entry.generation != generation {
            debug!(session_id = %session_id, generation, "Stale stream request ignored");
            return;
        }
        let Some(spec) = spec else {
            debug!(session_id = %session_id, "Session has no search, not streaming");
            return;
        };

        if let Some(previous) = entry.stream.take() {
            previous.stop_and_wait(self.settings.stop_grace).await;
        }

        let stream = spawn_supervised(
            StreamConfig {
                session_id: session_id.clone(),
                spec: Arc::new(spec),
                outbound,
                source: self.source.clone(),
                enricher: self.enricher.clone(),
                poll_interval: self.settings.poll_interval,
                fetch_timeout: self.settings.fetch_timeout,
                enrichment_timeout: self.settings.enrichment_timeout,
            },
            BackoffPolicy::from_settings(&self.settings),
        );

        // The entry may only be looked up again after the await above.
        match self.sessions.get_mut(&session_id) {
            Some(entry) if entry.generation == generation => entry.stream = Some(stream),
            _ => stream.stop(),
        }
    }

    fn fetch_history(
        &mut self,
        session_id: SessionId,
        reply: oneshot::Sender<Result<Vec<HistoryEntry>, SearchError>>,
    ) {
        if let Some(entry) = self.sessions.get(&session_id) {
            let session = entry.session.clone();
            let generation = entry.generation;
            let notices = self.command_tx.clone();
            let timeout = self.settings.history_timeout;
            // Served if the session exits before it can answer.
            let last_known = self
                .history_cache
                .get(&session_id)
                .filter(|cached| cached.generation == generation)
                .map(|cached| cached.entries.clone());

            tokio::spawn(async move {
                let result = match tokio::time::timeout(timeout, session.get_history()).await {
                    Ok(Ok(entries)) => {
                        let _ = notices
                            .send(OrchestratorCommand::HistoryUpdated {
                                session_id,
                                generation,
                                entries: entries.clone(),
                            })
                            .await;
                        Ok(entries)
                    }
                    Ok(Err(ActorError::ActorShutdown)) => match last_known {
                        Some(entries) => {
                            debug!(session_id = %session_id, "Session exited mid-request, serving cached history");
                            Ok(entries)
                        }
                        None => Err(SearchError::Internal(
                            "history unavailable: session has shut down".to_string(),
                        )),
                    },
                    Err(_) => Err(SearchError::Internal("history request timed out".to_string())),
                };
                let _ = reply.send(result);
            });
            return;
        }

        self.sweep_cache();
        let result = match self.history_cache.get(&session_id) {
            Some(cached) => Ok(cached.entries.clone()),
            None => Err(SearchError::NotFound(format!("session {session_id}"))),
        };
        let _ = reply.send(result);
    }

    fn cache_history(&mut self, session_id: SessionId, generation: u64, entries: Vec<HistoryEntry>) {
        // A replaced session must not overwrite its successor's history.
        if let Some(entry) = self.sessions.get(&session_id) {
            if entry.generation != generation {
                debug!(session_id = %session_id, generation, "Stale history notice ignored");
                return;
            }
        } else if let Some(cached) = self.history_cache.get(&session_id) {
            // Late notice from a session older than the one already cached.
            if cached.generation > generation {
                debug!(session_id = %session_id, generation, "Stale history notice ignored");
                return;
            }
        }
        self.history_cache.insert(
            session_id,
            CachedHistory {
                generation,
                entries,
                cached_at: Instant::now(),
            },
        );
        self.sweep_cache();
    }

    /// Drop the registry entry only. The cached history stays.
    fn deregister(&mut self, session_id: SessionId, generation: u64) {
        let live_generation = self.sessions.get(&session_id).map(|e| e.generation);
        if live_generation != Some(generation) {
            debug!(session_id = %session_id, generation, "Stale termination notice ignored");
            return;
        }
        if let Some(entry) = self.sessions.remove(&session_id) {
            if let Some(stream) = &entry.stream {
                stream.stop();
            }
        }
        info!(session_id = %session_id, generation, "Session deregistered");
    }

    async fn stop_entry(&self, entry: SessionEntry) {
        entry.session.stop();
        if let Some(stream) = entry.stream {
            stream.stop_and_wait(self.settings.stop_grace).await;
        }
        entry.outbound.complete();
    }

    /// Expire cached snapshots of ended sessions past their TTL.
    fn sweep_cache(&mut self) {
        let ttl = self.settings.history_cache_ttl;
        let sessions = &self.sessions;
        let before = self.history_cache.len();
        self.history_cache
            .retain(|id, cached| sessions.contains_key(id) || cached.cached_at.elapsed() <= ttl);
        let expired = before - self.history_cache.len();
        if expired > 0 {
            debug!(expired, "Expired cached session histories");
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        for entry in self.sessions.values() {
            entry.session.stop();
            if let Some(stream) = &entry.stream {
                stream.stop();
            }
        }
        if !self.sessions.is_empty() {
            warn!(sessions = self.sessions.len(), "Orchestrator dropped with live sessions");
        }
    }
}
