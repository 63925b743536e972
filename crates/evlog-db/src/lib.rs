//! Storage layer for evlog.
//!
//! Two backends are supported:
//!
//! - **SQLite** (embedded): an `r2d2` connection pool with WAL mode, embedded
//!   SQL migrations, the event/command-status query helpers, and the command
//!   write path. SQLite has no publish/subscribe facility, so writes hand back
//!   a notification payload that the caller publishes on a [`NotifyHub`].
//! - **Postgres**: a `sqlx` pool and the same read queries against a
//!   pre-existing schema whose triggers emit `pg_notify` on every append.
//!
//! Both backends report failures through [`LogError`], which distinguishes
//! transient failures from invariant violations.

mod error;
mod hub;
mod log;
mod migrations;
mod pool;
pub mod postgres;

pub use error::LogError;
pub use hub::NotifyHub;
pub use log::{
    append_events, enqueue_command, fetch_command_status, fetch_events, latest_event_t,
    latest_status, record_outcome,
};
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError, IN_MEMORY};
