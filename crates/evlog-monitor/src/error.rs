//! Error types for the watermark engine.

use evlog_db::LogError;
use evlog_types::{NotificationError, Seq};

/// Failures reported by a record source or notification channel.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The backing store failed or returned data that breaks an invariant.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The notification connection was lost or fell behind.
    #[error("notification channel disconnected: {0}")]
    Disconnected(String),

    /// A notification payload did not match the channel format.
    #[error("malformed notification: {0}")]
    Malformed(#[from] NotificationError),

    /// A blocking store task panicked or was cancelled.
    #[error("store task failed: {0}")]
    Task(String),
}

impl SourceError {
    /// Whether retrying the same operation cannot succeed.
    pub fn is_invariant_violation(&self) -> bool {
        match self {
            Self::Log(e) => e.is_invariant_violation(),
            _ => false,
        }
    }
}

/// Misuse of the tracker's state transitions.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TrackerError {
    /// `initialize_empty` was called on a tracker that already has a watermark.
    #[error("tracker already initialized at watermark {watermark}")]
    AlreadyInitialized {
        /// The watermark the tracker holds.
        watermark: Seq,
    },
}

/// Reasons a wait can end without a record.
#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    /// Thresholds are sequence numbers and cannot be negative.
    #[error("threshold must be non-negative, got {0}")]
    NegativeThreshold(Seq),

    /// The tracker stopped releasing before this threshold was delivered.
    #[error("release of threshold {0} was aborted")]
    Aborted(Seq),
}
