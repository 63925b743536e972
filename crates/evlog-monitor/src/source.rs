//! Seams between the engine and its backing store.
//!
//! The traits return boxed futures so trackers and subscription loops can
//! hold backends as trait objects.

use futures_util::future::BoxFuture;

use evlog_types::Seq;

use crate::error::SourceError;
use crate::kind::SequenceKind;

/// Result of a catch-up query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatchUp<P> {
    /// The log has no entries yet.
    Empty,
    /// The highest stored sequence number and its notification payload.
    At(Seq, P),
}

/// Pull-side access to one log.
pub trait RecordSource<K: SequenceKind>: Send + Sync + 'static {
    /// Reads the highest stored sequence number.
    fn catch_up(&self) -> BoxFuture<'_, Result<CatchUp<K::Payload>, SourceError>>;

    /// Reads the record stored under exactly `seq` (`seq > 0`).
    fn fetch(&self, seq: Seq) -> BoxFuture<'_, Result<K::Record, SourceError>>;
}

/// Push-side access: opens subscriptions to named channels.
pub trait NotificationChannel: Send + Sync + 'static {
    /// Opens a fresh connection and subscribes it to `channel`.
    ///
    /// Only payloads published after this resolves are guaranteed to be
    /// delivered.
    fn listen<'a>(
        &'a self,
        channel: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Notifications>, SourceError>>;
}

/// One live subscription. Dropping it closes the connection.
pub trait Notifications: Send {
    /// Waits for the next raw payload.
    ///
    /// Any error means the subscription is dead and must be discarded.
    fn next(&mut self) -> BoxFuture<'_, Result<String, SourceError>>;
}
