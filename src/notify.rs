use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::BookingEvent;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for booking events, per workspace plus one firehose that
/// sees every workspace. Downstream automation subscribes here.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<BookingEvent>>,
    all: broadcast::Sender<BookingEvent>,
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
            all: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    /// Subscribe to one workspace's events. Creates the channel if needed.
    pub fn subscribe(&self, workspace_id: Ulid) -> broadcast::Receiver<BookingEvent> {
        let sender = self
            .channels
            .entry(workspace_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<BookingEvent> {
        self.all.subscribe()
    }

    /// Send a notification. No-op if nobody is listening; a slow listener
    /// lags and loses events rather than blocking the commit path.
    pub fn send(&self, event: &BookingEvent) {
        if let Some(sender) = self.channels.get(&event.workspace_id()) {
            let _ = sender.send(event.clone());
        }
        let _ = self.all.send(event.clone());
    }
}
