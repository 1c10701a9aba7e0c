use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::DEFAULT_EVENT_CAPACITY;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "lowercase")]
pub enum IoEvent {
    /// An input line changed level.
    Data { name: String, value: u8 },
    /// A watched line reported a failure.
    Error(String),
}

/// Process-wide publish point for pin events.
///
/// Cloning shares the same channel, so a bus created once can be handed to every
/// subsystem instance and subscribers survive reinitialisation. Events published while
/// nobody is subscribed are dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<IoEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IoEvent> {
        self.tx.subscribe()
    }

    pub fn stream(&self) -> BroadcastStream<IoEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Returns how many subscribers received the event.
    pub fn publish(&self, event: IoEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
