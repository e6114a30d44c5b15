use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-specialist broadcast of committed calendar events.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a specialist's events. Creates the channel if needed.
    /// Slow receivers see `RecvError::Lagged` rather than blocking writers.
    pub fn subscribe(&self, specialist_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(specialist_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// No-op if nobody is listening.
    pub fn send(&self, specialist_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&specialist_id) {
            let _ = sender.send(event.clone());
        }
    }
}
