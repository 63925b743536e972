//! The supervised subscribe / catch-up / follow loop.
//!
//! ```text
//!            listen() fails: sleep connect_retry
//!             ┌──────────┐
//!             v          │
//!      ┌──────────────┐  │   listen() ok, catch-up ok   ┌────────────┐
//!  ───>│ Disconnected │──┴────────────────────────────> │ Subscribed │──┐ next(): advance
//!      └──────────────┘                                 └────────────┘<─┘
//!             ^                                               │
//!             └───────────────────────────────────────────────┘
//!               connection error, lag, malformed payload (no delay)
//! ```
//!
//! The subscription is opened before the catch-up query runs, so every
//! advancement is either counted by the query or delivered as a notification.

use std::sync::Arc;
use std::time::Duration;

use crate::error::SourceError;
use crate::kind::SequenceKind;
use crate::source::{NotificationChannel, Notifications};
use crate::tracker::Tracker;

/// Default pause before reopening a connection that could not be opened.
pub const DEFAULT_CONNECT_RETRY: Duration = Duration::from_secs(1);

/// Tunables for [`run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionSettings {
    /// Pause after failing to open a subscription (or to catch up on a new
    /// one). Losing an established subscription reconnects immediately.
    pub connect_retry: Duration,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            connect_retry: DEFAULT_CONNECT_RETRY,
        }
    }
}

/// How a subscription session ended.
enum SessionEnd {
    /// The subscription could not be opened or caught up.
    NotEstablished(SourceError),
    /// An established subscription failed.
    Lost(SourceError),
}

/// Keeps `tracker` fed from `channel` for the life of the process.
///
/// Never returns.
pub async fn run<K: SequenceKind>(
    tracker: Arc<Tracker<K>>,
    channel: Arc<dyn NotificationChannel>,
    settings: SubscriptionSettings,
) {
    tracing::info!(kind = K::NAME, channel = K::CHANNEL, "starting subscription loop");
    loop {
        match session(&tracker, channel.as_ref()).await {
            SessionEnd::NotEstablished(e) => {
                tracing::warn!(
                    kind = K::NAME,
                    error = %e,
                    retry_ms = settings.connect_retry.as_millis() as u64,
                    "could not establish subscription"
                );
                tokio::time::sleep(settings.connect_retry).await;
            }
            SessionEnd::Lost(e) => {
                tracing::warn!(kind = K::NAME, error = %e, "subscription lost, reconnecting");
            }
        }
    }
}

async fn session<K: SequenceKind>(
    tracker: &Tracker<K>,
    channel: &dyn NotificationChannel,
) -> SessionEnd {
    let mut notifications = match channel.listen(K::CHANNEL).await {
        Ok(notifications) => notifications,
        Err(e) => return SessionEnd::NotEstablished(e),
    };

    if let Err(e) = tracker.catch_up().await {
        return SessionEnd::NotEstablished(e);
    }
    tracing::info!(kind = K::NAME, watermark = ?tracker.watermark(), "subscribed");

    match follow(tracker, notifications.as_mut()).await {
        Ok(never) => match never {},
        Err(e) => SessionEnd::Lost(e),
    }
}

/// Feeds notifications into the tracker until the subscription fails.
async fn follow<K: SequenceKind>(
    tracker: &Tracker<K>,
    notifications: &mut dyn Notifications,
) -> Result<std::convert::Infallible, SourceError> {
    loop {
        let raw = notifications.next().await?;
        let (seq, payload) = K::parse_notification(&raw)?;
        tracing::trace!(kind = K::NAME, seq, "notification received");
        tracker.advance(seq, &payload);
    }
}
