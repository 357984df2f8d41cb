//! Renderer Event Sink
//!
//! Wraps the renderer's channel so that nothing is delivered once the turn's
//! cancellation token has fired.

use chatloop_core::CanonicalEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<CanonicalEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<CanonicalEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Deliver one event. Returns `false` when it was dropped, either because
    /// the turn is cancelled or because the renderer went away.
    pub async fn emit(&self, event: CanonicalEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => sent.is_ok(),
        }
    }
}
