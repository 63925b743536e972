//! Wire format of the change-notification channels.
//!
//! Event channel payloads are a bare sequence number (`"42"`). Status channel
//! payloads are a colon-delimited triple `sequence:status_type:command_uuid`
//! (`"42:succeeded:1b4e28ba-2fa1-11d2-883f-0016d3cca427"`).

use thiserror::Error;
use uuid::Uuid;

use crate::command::{CommandStatus, StatusType};
use crate::Seq;

/// A notification payload that does not match the channel's format.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    /// The sequence field is not a non-negative integer.
    #[error("invalid sequence number: {0:?}")]
    InvalidSequence(String),

    /// The payload has the wrong number of colon-separated fields.
    #[error("expected {expected} fields in notification payload, got {got}")]
    FieldCount {
        /// Number of fields the channel format requires.
        expected: usize,
        /// Number of fields present.
        got: usize,
    },

    /// The status field is not one of the known status types.
    #[error("unknown status type in notification: {0:?}")]
    UnknownStatus(String),

    /// The command uuid field does not parse.
    #[error("invalid command uuid in notification: {0:?}")]
    InvalidUuid(String),
}

fn parse_seq(field: &str) -> Result<Seq, NotificationError> {
    match field.trim().parse::<Seq>() {
        Ok(seq) if seq >= 0 => Ok(seq),
        _ => Err(NotificationError::InvalidSequence(field.to_string())),
    }
}

/// Parses an event channel payload into the advertised sequence number.
pub fn parse_event_notification(payload: &str) -> Result<Seq, NotificationError> {
    parse_seq(payload)
}

/// Renders the event channel payload for `seq`.
pub fn event_notification_payload(seq: Seq) -> String {
    seq.to_string()
}

/// A decoded status channel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusNotification {
    /// The status sequence number that was appended.
    pub seq: Seq,
    /// The status stored at `seq`.
    pub status: CommandStatus,
}

impl StatusNotification {
    /// Parses a `sequence:status_type:command_uuid` payload.
    pub fn parse(payload: &str) -> Result<Self, NotificationError> {
        let fields: Vec<&str> = payload.split(':').collect();
        let [seq, status_type, uuid] = fields.as_slice() else {
            return Err(NotificationError::FieldCount {
                expected: 3,
                got: fields.len(),
            });
        };

        let seq = parse_seq(seq)?;
        let status_type: StatusType = status_type
            .parse()
            .map_err(|_| NotificationError::UnknownStatus(status_type.to_string()))?;
        let command_uuid = Uuid::parse_str(uuid.trim())
            .map_err(|_| NotificationError::InvalidUuid(uuid.to_string()))?;

        Ok(Self {
            seq,
            status: CommandStatus {
                command_uuid,
                status_type,
            },
        })
    }

    /// Renders this notification in channel format.
    pub fn to_payload(&self) -> String {
        format!(
            "{}:{}:{}",
            self.seq, self.status.status_type, self.status.command_uuid
        )
    }
}
