//! Environment event fan-out.
//!
//! Each environment owns one broadcaster; its background tasks hold clones.
//! Relays subscribe to mirror lifecycle state and hear about background
//! failures that have no caller to return an error to.

use gantry_core::EnvironmentEvent;
use tokio::sync::broadcast;
use tracing::trace;

/// Events buffered per subscriber before the slowest one starts lagging.
const EVENT_BUFFER: usize = 64;

/// Clonable sender side of an environment's event stream.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<EnvironmentEvent>,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER);
        Self { sender }
    }

    /// Publish `event`. Dropped silently when nobody is subscribed.
    pub fn broadcast(&self, event: EnvironmentEvent) {
        if let Ok(receivers) = self.sender.send(event) {
            trace!(receivers, "Environment event published");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EnvironmentEvent> {
        self.sender.subscribe()
    }

    /// Live subscribers, including lagging ones.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
