use tokio::sync::broadcast;

use crate::dto::sse::ServerEvent;

/// Fan-out of session events to every open `/sse/session` stream.
pub struct SseHub {
    sender: broadcast::Sender<ServerEvent>,
}

impl SseHub {
    /// `capacity` bounds how far a slow stream may lag before it skips events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Open a receiver for subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.sender.subscribe()
    }

    /// Number of streams currently listening.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Send `event` to every open stream. Events sent while nobody listens are dropped.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_without_listeners_are_dropped() {
        let hub = SseHub::new(4);
        hub.broadcast(ServerEvent::new(None, "lost".into()));

        let mut receiver = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);
        hub.broadcast(ServerEvent::new(Some("session.snapshot".into()), "{}".into()));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.data, "{}");
    }
}
