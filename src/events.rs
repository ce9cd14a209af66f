use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::notes::Note;

pub const EVENT_CAPACITY: usize = 100;

/// Progress events published by a running session.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AgentEvent {
    Observation { step: usize, url: Option<String>, image_base64: String },
    Action { step: usize, tool: String, success: bool, message: String },
    Notes { notes: Vec<Note>, op: String },
    Completed { success: bool, summary: String, steps: usize },
    Error { message: String, step: usize },
    StepLimitReached { steps: usize },
    Cancelled { steps: usize },
}

/// Broadcast fan-out. Lagging receivers lose the oldest events.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: AgentEvent) {
        if self.tx.send(event).is_err() {
            trace!("event dropped, no subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        bus.publish(AgentEvent::Error { message: "x".into(), step: 0 });
    }

    #[tokio::test]
    async fn test_lagging_receiver_drops_oldest() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for step in 0..4 {
            bus.publish(AgentEvent::Error { message: format!("e{step}"), step });
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(2))));
        match rx.recv().await {
            Ok(AgentEvent::Error { step, .. }) => assert_eq!(step, 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
