//! Postgres backend.
//!
//! The schema (`event`, `command`, `command_status`), the `enqueue_command`
//! function, and the triggers that `pg_notify` on every append are owned by
//! the database, not by this crate. Queries here use the runtime-checked
//! `sqlx::query*` functions so building does not need a live database.

use std::time::Duration;

use sqlx::postgres::{PgListener, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

use evlog_types::{CommandStatus, CommandSubmission, Events, Seq, StatusType};

use crate::error::LogError;

pub use sqlx::PgPool;

/// Name of the primary key constraint on `command`, reported on duplicate
/// submissions.
const COMMAND_PKEY: &str = "command_pkey";

/// Creates a Postgres pool for on-demand queries.
pub async fn create_pg_pool(url: &str, max_connections: u32) -> Result<PgPool, LogError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await?;
    tracing::info!(max_connections, "connected postgres pool");
    Ok(pool)
}

/// Opens a dedicated connection and issues `LISTEN channel` on it.
pub async fn listen(pool: &PgPool, channel: &str) -> Result<PgListener, LogError> {
    let mut listener = PgListener::connect_with(pool).await?;
    listener.listen(channel).await?;
    Ok(listener)
}

/// Returns the highest event sequence number, or [`evlog_types::ORIGIN`] when the log is empty.
pub async fn latest_event_t(pool: &PgPool) -> Result<Seq, LogError> {
    let t: Seq = sqlx::query_scalar("SELECT COALESCE(MAX(event_t), 0)::BIGINT FROM event")
        .fetch_one(pool)
        .await?;
    Ok(t)
}

/// Fetches the events stored under exactly `event_t`.
pub async fn fetch_events(pool: &PgPool, event_t: Seq) -> Result<Events, LogError> {
    let rows: Vec<serde_json::Value> =
        sqlx::query_scalar("SELECT event_data::JSONB FROM event WHERE event_t = $1")
            .bind(event_t)
            .fetch_all(pool)
            .await?;

    let [value] = rows.as_slice() else {
        return Err(LogError::RowCount {
            table: "event",
            seq: event_t,
            rows: rows.len(),
        });
    };
    if !value.is_array() {
        return Err(LogError::MalformedEvents { seq: event_t });
    }
    Ok(serde_json::from_value(value.clone())?)
}

fn status_from_row(command_uuid: Uuid, status_type: &str) -> Result<CommandStatus, LogError> {
    let status_type: StatusType = status_type
        .parse()
        .map_err(|_| LogError::InvalidRow(format!("status type {status_type:?}")))?;
    Ok(CommandStatus {
        command_uuid,
        status_type,
    })
}

/// Returns the newest status row, or `None` when no command was ever queued.
pub async fn latest_status(pool: &PgPool) -> Result<Option<(Seq, CommandStatus)>, LogError> {
    let row: Option<(Seq, Uuid, String)> = sqlx::query_as(
        "SELECT status_t::BIGINT, command_uuid, status_type::TEXT
         FROM command_status
         ORDER BY status_t DESC
         LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    row.map(|(status_t, uuid, status_type)| Ok((status_t, status_from_row(uuid, &status_type)?)))
        .transpose()
}

/// Fetches the status stored under exactly `status_t`.
pub async fn fetch_command_status(pool: &PgPool, status_t: Seq) -> Result<CommandStatus, LogError> {
    let rows: Vec<(Uuid, String)> = sqlx::query_as(
        "SELECT command_uuid, status_type::TEXT FROM command_status WHERE status_t = $1",
    )
    .bind(status_t)
    .fetch_all(pool)
    .await?;

    let [(uuid, status_type)] = rows.as_slice() else {
        return Err(LogError::RowCount {
            table: "command_status",
            seq: status_t,
            rows: rows.len(),
        });
    };
    status_from_row(*uuid, status_type)
}

/// Submits a command through the database's `enqueue_command` function.
///
/// # Errors
///
/// `LogError::DuplicateCommand` if the uuid violates the command primary key.
pub async fn enqueue_command(pool: &PgPool, submission: &CommandSubmission) -> Result<(), LogError> {
    let result = sqlx::query("SELECT enqueue_command($1, $2, $3)")
        .bind(submission.command_uuid)
        .bind(&submission.command_type)
        .bind(Json(&submission.command_data))
        .execute(pool)
        .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.constraint() == Some(COMMAND_PKEY) => {
            Err(LogError::DuplicateCommand(submission.command_uuid))
        }
        Err(e) => Err(e.into()),
    }
}
