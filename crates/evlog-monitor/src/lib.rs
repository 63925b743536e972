//! Watermark notification engine.
//!
//! A [`Tracker`] follows one append-only log's highest sequence number (its
//! *watermark*) and lets callers wait for it:
//!
//! - [`Tracker::current`] resolves with the watermark once it is known.
//! - [`Tracker::wait_for`] resolves with the record for a sequence number
//!   once the watermark has reached it.
//!
//! The watermark only moves through [`Tracker::advance`], which is fed by a
//! [`subscription::run`] loop: it listens on the log's notification channel,
//! runs a catch-up query after every (re)connect, and forwards both into the
//! tracker. Catch-up makes reconnects lossless; `advance` being idempotent for
//! values at or below the watermark makes catch-up safe to repeat.
//!
//! Two logs are tracked, and they differ only in how live advances release
//! waiters (see [`SequenceKind::live_record`]):
//!
//! | Kind | Released record on live advance |
//! |------|---------------------------------|
//! | [`EventSequence`] | the record stored at the waiter's own threshold |
//! | [`StatusSequence`] | the status carried by the notification |
//!
//! # Usage
//!
//! ```rust,ignore
//! let backend = Arc::new(SqliteBackend::new(pool, hub));
//! let events = Arc::new(Tracker::<EventSequence>::new(backend.clone(), retry));
//! tokio::spawn(subscription::run(events.clone(), backend, settings));
//!
//! let t = events.current().await?;
//! let record = events.wait_for(t + 1).await?;
//! ```

mod error;
mod kind;
pub mod postgres;
mod source;
pub mod sqlite;
pub mod subscription;
mod tracker;

pub use error::{SourceError, TrackerError, WaitError};
pub use kind::{EventSequence, SequenceKind, StatusSequence};
pub use source::{CatchUp, NotificationChannel, Notifications, RecordSource};
pub use subscription::SubscriptionSettings;
pub use tracker::{Advance, Tracker};
