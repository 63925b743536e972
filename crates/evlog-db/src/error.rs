//! Error type shared by the SQLite and Postgres log queries.

use evlog_types::{Seq, StatusType};
use uuid::Uuid;

/// Errors raised while reading or appending to the logs.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// A SQLite statement failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No pooled SQLite connection could be obtained.
    #[error("sqlite pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A Postgres statement or connection failed.
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// JSON stored in or destined for the log could not be (de)serialized.
    #[error("log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A lookup by sequence number did not find exactly one row.
    #[error("expected exactly one {table} row for sequence {seq}, found {rows}")]
    RowCount {
        /// Table that was queried.
        table: &'static str,
        /// Sequence number that was looked up.
        seq: Seq,
        /// Number of rows returned.
        rows: usize,
    },

    /// A stored event record is not a JSON array of entries.
    #[error("event record {seq} is not a JSON array")]
    MalformedEvents {
        /// Sequence number of the offending record.
        seq: Seq,
    },

    /// A stored row holds a value outside its domain.
    #[error("invalid stored value: {0}")]
    InvalidRow(String),

    /// A command with this uuid was already submitted.
    #[error("command {0} already submitted")]
    DuplicateCommand(Uuid),

    /// No command with this uuid was ever submitted.
    #[error("command {0} does not exist")]
    UnknownCommand(Uuid),

    /// An outcome was recorded with a non-terminal status.
    #[error("{0} is not a command outcome")]
    InvalidOutcome(StatusType),
}

impl LogError {
    /// Whether this error means stored data breaks a log invariant.
    ///
    /// Invariant violations are programming or data errors: retrying the
    /// same query will not fix them.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::RowCount { .. }
                | Self::MalformedEvents { .. }
                | Self::InvalidRow(_)
                | Self::Serialization(_)
        )
    }
}
