//! Per-session actor owning the bounded search history.
//!
//! On start it asks the orchestrator to launch its stream and records the
//! opening search. It stops on an explicit `Stop`, on cancellation, or when
//! the outbound channel completes, and always reports its exit to the
//! orchestrator so the registry can drop it.

use std::collections::VecDeque;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use newswire_common::{HistoryEntry, SearchSpec, SessionId, StreamFrame};

use crate::orchestrator::OrchestratorCommand;
use crate::outbound::OutboundChannel;

/// Most recent searches kept per session.
pub const HISTORY_LIMIT: usize = 10;

/// Command channel capacity per session.
pub const CHANNEL_CAPACITY: usize = 64;

pub enum SessionCommand {
    RecordSearch(Option<SearchSpec>),
    GetHistory {
        reply: oneshot::Sender<Vec<HistoryEntry>>,
    },
    Stop,
}

#[derive(Debug, Error)]
pub enum ActorError {
    #[error("actor has shut down")]
    ActorShutdown,
}

pub struct SessionConfig {
    pub session_id: SessionId,
    /// Registration number, echoed back in every notice to the orchestrator.
    pub generation: u64,
    pub spec: Option<SearchSpec>,
    pub outbound: OutboundChannel,
    pub orchestrator: mpsc::Sender<OrchestratorCommand>,
}

// ============================================================================
// Handle
// ============================================================================

/// Cheap-to-clone handle for talking to a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
    session_id: SessionId,
}

impl SessionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub async fn record_search(&self, spec: Option<SearchSpec>) -> Result<(), ActorError> {
        self.tx
            .send(SessionCommand::RecordSearch(spec))
            .await
            .map_err(|_| ActorError::ActorShutdown)
    }

    pub async fn get_history(&self) -> Result<Vec<HistoryEntry>, ActorError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::GetHistory { reply: reply_tx })
            .await
            .map_err(|_| ActorError::ActorShutdown)?;
        reply_rx.await.map_err(|_| ActorError::ActorShutdown)
    }

    /// Stop immediately, even if commands are still queued.
    pub fn stop(&self) {
        self.cancel.cancel();
        let _ = self.tx.try_send(SessionCommand::Stop);
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// A handle with no actor behind it. The caller plays the actor through
    /// the returned mailbox.
    #[cfg(test)]
    pub(crate) fn detached(session_id: SessionId) -> (Self, mpsc::Receiver<SessionCommand>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = Self {
            tx,
            cancel: CancellationToken::new(),
            session_id,
        };
        (handle, rx)
    }
}

// ============================================================================
// Actor
// ============================================================================

pub struct SessionActor {
    session_id: SessionId,
    generation: u64,
    opening_spec: Option<SearchSpec>,
    history: VecDeque<HistoryEntry>,
    outbound: OutboundChannel,
    orchestrator: mpsc::Sender<OrchestratorCommand>,
    command_rx: mpsc::Receiver<SessionCommand>,
    cancel: CancellationToken,
}

impl SessionActor {
    pub fn spawn(config: SessionConfig) -> (SessionHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let actor = Self {
            session_id: config.session_id.clone(),
            generation: config.generation,
            opening_spec: config.spec,
            history: VecDeque::with_capacity(HISTORY_LIMIT + 1),
            outbound: config.outbound,
            orchestrator: config.orchestrator,
            command_rx: rx,
            cancel: cancel.clone(),
        };

        let task = tokio::spawn(actor.run());
        let handle = SessionHandle {
            tx,
            cancel,
            session_id: config.session_id,
        };
        (handle, task)
    }

    async fn run(mut self) {
        debug!(session_id = %self.session_id, generation = self.generation, "Session actor started");

        let spec = self.opening_spec.take();
        self.notify(OrchestratorCommand::StartStream {
            session_id: self.session_id.clone(),
            generation: self.generation,
            spec: spec.clone(),
            outbound: self.outbound.clone(),
        })
        .await;
        if let Some(spec) = spec {
            self.record(spec).await;
        }

        let cancel = self.cancel.clone();
        let completion = self.outbound.completion();

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(session_id = %self.session_id, "Session stopped");
                    break;
                }

                _ = completion.cancelled() => {
                    debug!(session_id = %self.session_id, "Outbound channel completed, stopping session");
                    break;
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(SessionCommand::RecordSearch(Some(spec))) => self.record(spec).await,
                    Some(SessionCommand::RecordSearch(None)) => {}
                    Some(SessionCommand::GetHistory { reply }) => {
                        let _ = reply.send(self.history.iter().cloned().collect());
                    }
                    Some(SessionCommand::Stop) | None => {
                        debug!(session_id = %self.session_id, "Session stopped");
                        break;
                    }
                },
            }
        }

        self.notify(OrchestratorCommand::SessionClosed {
            session_id: self.session_id.clone(),
            generation: self.generation,
        })
        .await;
    }

    async fn record(&mut self, spec: SearchSpec) {
        self.history
            .push_back(HistoryEntry::from_spec(&spec, Utc::now()));
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.publish().await;
    }

    async fn publish(&self) {
        let snapshot: Vec<HistoryEntry> = self.history.iter().cloned().collect();
        self.outbound.push(StreamFrame::History {
            session_id: self.session_id.clone(),
            history: snapshot.clone(),
        });
        self.notify(OrchestratorCommand::HistoryUpdated {
            session_id: self.session_id.clone(),
            generation: self.generation,
            entries: snapshot,
        })
        .await;
    }

    async fn notify(&self, command: OrchestratorCommand) {
        if self.orchestrator.send(command).await.is_err() {
            warn!(session_id = %self.session_id, "Orchestrator gone, dropping notice");
        }
    }
}
