//! Outbound event channel of a turn

use crate::stream::SseEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Ordered channel from the turn task to the client connection.
///
/// A failed send means the client went away; the sink then cancels the turn
/// so tools and the provider stream are torn down.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::Sender<SseEvent>,
    turn: CancellationToken,
}

impl EventSink {
    pub fn new(sender: mpsc::Sender<SseEvent>, turn: CancellationToken) -> Self {
        Self { sender, turn }
    }

    /// Create a sink together with its receiving end
    pub fn channel(buffer: usize, turn: CancellationToken) -> (Self, mpsc::Receiver<SseEvent>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self::new(sender, turn), receiver)
    }

    /// Deliver one event; returns `false` if the client is gone
    pub async fn send(&self, event: SseEvent) -> bool {
        if self.sender.send(event).await.is_ok() {
            return true;
        }

        if !self.turn.is_cancelled() {
            tracing::info!("Client disconnected, cancelling turn");
            self.turn.cancel();
        }
        false
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Resolves once the receiving side has been dropped
    pub async fn closed(&self) {
        self.sender.closed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_failure_cancels_turn() {
        let turn = CancellationToken::new();
        let (sink, receiver) = EventSink::channel(4, turn.clone());

        assert!(
            sink.send(SseEvent::Answer {
                content: "a".to_string()
            })
            .await
        );
        drop(receiver);

        assert!(
            !sink
                .send(SseEvent::Answer {
                    content: "b".to_string()
                })
                .await
        );
        assert!(turn.is_cancelled());
        assert!(sink.is_closed());
    }
}
