//! Per-log policy: channel, notification format, and release semantics.

use std::fmt::Debug;

use evlog_types::{
    parse_event_notification, CommandStatus, Events, NotificationError, Seq, StatusNotification,
    EVENT_CHANNEL, STATUS_CHANNEL,
};

/// Describes one tracked log.
pub trait SequenceKind: Send + Sync + 'static {
    /// Data carried by a notification besides the sequence number.
    type Payload: Clone + Debug + Send + Sync + 'static;

    /// What a waiter receives.
    type Record: Clone + Debug + Send + Sync + 'static;

    /// Short name used in logs.
    const NAME: &'static str;

    /// Notification channel to listen on.
    const CHANNEL: &'static str;

    /// Decodes a notification payload.
    fn parse_notification(payload: &str) -> Result<(Seq, Self::Payload), NotificationError>;

    /// The record released for sequence 0, which is never stored.
    fn origin_record() -> Self::Record;

    /// The record released to every waiter crossed by a live advance that
    /// carries `payload`, or `None` to fetch each waiter's own threshold.
    ///
    /// Only used when the tracker was already initialized; waiters released
    /// by initialization and waiters whose threshold was already reached at
    /// registration always get an exact fetch.
    fn live_record(payload: &Self::Payload) -> Option<Self::Record>;
}

/// The event log: waiters always get the events stored at their threshold.
#[derive(Debug, Clone, Copy)]
pub struct EventSequence;

impl SequenceKind for EventSequence {
    type Payload = ();
    type Record = Events;

    const NAME: &'static str = "event";
    const CHANNEL: &'static str = EVENT_CHANNEL;

    fn parse_notification(payload: &str) -> Result<(Seq, ()), NotificationError> {
        parse_event_notification(payload).map(|seq| (seq, ()))
    }

    fn origin_record() -> Events {
        Vec::new()
    }

    fn live_record(_payload: &()) -> Option<Events> {
        None
    }
}

/// The command status log.
///
/// A live advance releases every crossed waiter with the status that caused
/// the notification: "the first status at or after my threshold", not the
/// status stored at the threshold itself.
#[derive(Debug, Clone, Copy)]
pub struct StatusSequence;

impl SequenceKind for StatusSequence {
    type Payload = CommandStatus;
    type Record = Option<CommandStatus>;

    const NAME: &'static str = "command_status";
    const CHANNEL: &'static str = STATUS_CHANNEL;

    fn parse_notification(payload: &str) -> Result<(Seq, CommandStatus), NotificationError> {
        StatusNotification::parse(payload).map(|n| (n.seq, n.status))
    }

    fn origin_record() -> Option<CommandStatus> {
        None
    }

    fn live_record(payload: &CommandStatus) -> Option<Option<CommandStatus>> {
        Some(Some(payload.clone()))
    }
}
