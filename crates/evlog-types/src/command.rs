//! Command submission and status types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a submitted command.
///
/// Every command starts `Queued`; the command processor later records exactly
/// one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusType {
    /// Accepted and waiting for the command processor.
    Queued,
    /// Processed; its events were appended to the event log.
    Succeeded,
    /// Rejected by the command processor.
    Failed,
    /// Abandoned before processing completed.
    Aborted,
}

impl StatusType {
    /// Returns the canonical lowercase label, as stored and notified.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }

    /// Whether this status terminates the command's lifecycle.
    pub fn is_outcome(self) -> bool {
        !matches!(self, Self::Queued)
    }
}

impl std::fmt::Display for StatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StatusType {
    type Err = ParseStatusTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "aborted" => Ok(Self::Aborted),
            _ => Err(ParseStatusTypeError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown status type string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status type: {0}")]
pub struct ParseStatusTypeError(pub String);

/// The record stored under one command-status sequence number.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStatus {
    /// The command this status belongs to.
    pub command_uuid: Uuid,
    /// The status recorded at this sequence number.
    pub status_type: StatusType,
}

/// A command as submitted by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandSubmission {
    /// Client-chosen idempotency key.
    pub command_uuid: Uuid,
    /// Command type name understood by the command processor.
    pub command_type: String,
    /// Command arguments.
    #[serde(default)]
    pub command_data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_type_labels_parse_back() {
        for status in [
            StatusType::Queued,
            StatusType::Succeeded,
            StatusType::Failed,
            StatusType::Aborted,
        ] {
            assert_eq!(status.as_str().parse::<StatusType>(), Ok(status));
        }
    }

    #[test]
    fn status_type_rejects_unknown_and_uppercase() {
        assert!("done".parse::<StatusType>().is_err());
        assert!("QUEUED".parse::<StatusType>().is_err());
    }

    #[test]
    fn only_queued_is_not_an_outcome() {
        assert!(!StatusType::Queued.is_outcome());
        assert!(StatusType::Succeeded.is_outcome());
        assert!(StatusType::Failed.is_outcome());
        assert!(StatusType::Aborted.is_outcome());
    }

    #[test]
    fn command_status_serializes_lowercase() {
        let status = CommandStatus {
            command_uuid: Uuid::nil(),
            status_type: StatusType::Succeeded,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status_type"], "succeeded");
        assert_eq!(json["command_uuid"], "00000000-0000-0000-0000-000000000000");
    }
}
