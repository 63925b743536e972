//! Shared types for the evlog workspace.
//!
//! This crate holds the vocabulary every other crate speaks: sequence
//! numbers, event entries, command status records, and the wire format of
//! the change-notification channels. It has no I/O of its own.
//!
//! Two logical sequences exist:
//!
//! | Sequence | Channel | Record |
//! |----------|---------|--------|
//! | event | [`EVENT_CHANNEL`] | ordered list of [`EventEntry`] |
//! | command status | [`STATUS_CHANNEL`] | [`CommandStatus`] |

mod command;
mod notification;

pub use command::{CommandStatus, CommandSubmission, ParseStatusTypeError, StatusType};
pub use notification::{
    event_notification_payload, parse_event_notification, NotificationError, StatusNotification,
};

use serde::{Deserialize, Serialize};

/// A position in one of the append-only logs.
///
/// Sequence numbers start at 1; `0` means "nothing has happened yet" and never
/// has a stored record.
pub type Seq = i64;

/// The sequence value reported by an empty log.
pub const ORIGIN: Seq = 0;

/// Notification channel carrying event sequence advancements.
pub const EVENT_CHANNEL: &str = "event_stream";

/// Notification channel carrying command status advancements.
pub const STATUS_CHANNEL: &str = "command_status";

/// One typed entry in an event record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEntry {
    /// Event type name, as written by the command processor.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Arbitrary event body.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// The ordered entries stored under a single event sequence number.
pub type Events = Vec<EventEntry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_entry_uses_type_key() {
        let entry: EventEntry =
            serde_json::from_str(r#"{"type":"account_opened","data":{"id":7}}"#)
                .expect("entry should parse");
        assert_eq!(entry.event_type, "account_opened");
        assert_eq!(entry.data["id"], 7);

        let json = serde_json::to_value(&entry).expect("entry should serialize");
        assert_eq!(json["type"], "account_opened");
        assert!(json.get("event_type").is_none());
    }

    #[test]
    fn event_entry_data_defaults_to_null() {
        let entry: EventEntry =
            serde_json::from_str(r#"{"type":"ping"}"#).expect("entry should parse");
        assert!(entry.data.is_null());
    }
}
