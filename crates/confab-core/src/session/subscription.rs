use tokio::sync::{broadcast, mpsc};

use crate::session::event::SessionEvent;

/// A [`SessionEvent`] with its position in the session's event order.
#[derive(Debug, Clone)]
pub struct SessionEventEnvelope {
    pub seq: u64,
    pub event: SessionEvent,
}

/// Receiving half of the event feed. Dropping it unsubscribes.
pub struct EventSubscription {
    rx: broadcast::Receiver<SessionEventEnvelope>,
    unsubscribe_tx: mpsc::UnboundedSender<UnsubscribeSignal>,
}

pub(crate) struct UnsubscribeSignal;

impl EventSubscription {
    pub(crate) fn new(
        rx: broadcast::Receiver<SessionEventEnvelope>,
        unsubscribe_tx: mpsc::UnboundedSender<UnsubscribeSignal>,
    ) -> Self {
        Self { rx, unsubscribe_tx }
    }

    /// Next event, or `None` once the session shuts down. A slow receiver
    /// that lags skips the dropped events and keeps going; the snapshot
    /// channel still carries the authoritative state.
    pub async fn recv(&mut self) -> Option<SessionEventEnvelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(lagged = n, "event subscriber lagged, some events were dropped");
                }
            }
        }
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        let _ = self.unsubscribe_tx.send(UnsubscribeSignal);
    }
}
