//! Per-session outbound frame channel.
//!
//! `OutboundChannel` is the push side held by one session's SessionActor and
//! StreamActor. `FrameReceiver` is handed to the transport. Completion is a
//! single shared signal: either side may fire it (`complete()` from the
//! actors, dropping the receiver when the client disconnects) and both
//! actors watch it.

use futures::Stream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use newswire_common::StreamFrame;

#[derive(Clone)]
pub struct OutboundChannel {
    tx: mpsc::UnboundedSender<StreamFrame>,
    done: CancellationToken,
}

impl OutboundChannel {
    pub fn new() -> (Self, FrameReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let done = CancellationToken::new();
        (
            Self {
                tx,
                done: done.clone(),
            },
            FrameReceiver { rx, done },
        )
    }

    /// Queue a frame. Returns false once the channel has completed.
    pub fn push(&self, frame: StreamFrame) -> bool {
        if self.done.is_cancelled() {
            return false;
        }
        self.tx.send(frame).is_ok()
    }

    /// Complete the channel. Frames already pushed are still delivered.
    pub fn complete(&self) {
        self.done.cancel();
    }

    pub fn is_completed(&self) -> bool {
        self.done.is_cancelled()
    }

    pub fn completed(&self) -> WaitForCancellationFuture<'_> {
        self.done.cancelled()
    }

    /// Owned completion signal, for select loops that also borrow the actor.
    pub fn completion(&self) -> CancellationToken {
        self.done.clone()
    }
}

pub struct FrameReceiver {
    rx: mpsc::UnboundedReceiver<StreamFrame>,
    done: CancellationToken,
}

impl FrameReceiver {
    /// Next frame, or `None` once the channel has completed and drained.
    pub async fn recv(&mut self) -> Option<StreamFrame> {
        loop {
            match self.rx.try_recv() {
                Ok(frame) => return Some(frame),
                Err(TryRecvError::Disconnected) => return None,
                Err(TryRecvError::Empty) => {}
            }
            if self.done.is_cancelled() {
                return None;
            }
            tokio::select! {
                biased;
                frame = self.rx.recv() => return frame,
                _ = self.done.cancelled() => {}
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamFrame> + Send {
        futures::stream::unfold(self, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        })
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        self.done.cancel();
    }
}
