//! In-process publish/subscribe for the embedded backend.
//!
//! Stands in for Postgres `LISTEN`/`NOTIFY`: every named channel is a
//! `tokio::sync::broadcast` channel of string payloads. Listeners that fall
//! more than `capacity` messages behind observe a lag error and must treat
//! their subscription as lost.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

/// Default number of undelivered payloads buffered per listener.
pub const DEFAULT_HUB_CAPACITY: usize = 1024;

/// A set of named broadcast channels.
#[derive(Debug)]
pub struct NotifyHub {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_CAPACITY)
    }
}

impl NotifyHub {
    /// Creates an empty hub whose channels buffer `capacity` payloads.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Subscribes to `channel`; only payloads published afterwards are received.
    pub fn listen(&self, channel: &str) -> broadcast::Receiver<String> {
        self.sender(channel).subscribe()
    }

    /// Publishes `payload` on `channel` and returns the number of listeners
    /// it was delivered to.
    pub fn notify(&self, channel: &str, payload: String) -> usize {
        match self.sender(channel).send(payload) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(payload)) => {
                tracing::trace!(channel, payload, "notification published with no listeners");
                0
            }
        }
    }
}
