pub mod orchestrator;
pub mod outbound;
pub mod session_actor;
pub mod stream_actor;
pub mod supervisor;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use orchestrator::{Orchestrator, OrchestratorCommand, OrchestratorHandle};
pub use outbound::{FrameReceiver, OutboundChannel};
pub use session_actor::{SessionActor, SessionConfig, SessionHandle, HISTORY_LIMIT};
pub use stream_actor::{spawn_supervised, CloseReason, StreamActor, StreamConfig, StreamHandle};
pub use supervisor::{supervise, BackoffPolicy, SupervisorExit};
pub use traits::{enrich_or_raw, ContentSource, PassthroughEnricher, SentimentEnricher, SourceResponse};
