//! SQLite queries over the event and command-status logs.
//!
//! Reads are the two queries the monitor needs per log: the catch-up query
//! (highest sequence number so far) and the exact-key fetch. Writes assign the
//! next sequence number inside the INSERT itself, so concurrent writers can
//! never observe the same `MAX()` and collide.
//!
//! Write functions return the notification the caller must publish once the
//! write is committed; SQLite cannot publish it on its own.

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use evlog_types::{
    CommandStatus, CommandSubmission, EventEntry, Events, Seq, StatusNotification, StatusType,
    ORIGIN,
};

use crate::error::LogError;

fn parse_uuid(raw: &str) -> Result<Uuid, LogError> {
    Uuid::parse_str(raw).map_err(|_| LogError::InvalidRow(format!("command uuid {raw:?}")))
}

fn parse_status_type(raw: &str) -> Result<StatusType, LogError> {
    raw.parse()
        .map_err(|_| LogError::InvalidRow(format!("status type {raw:?}")))
}

/// Returns the highest event sequence number, or [`ORIGIN`] when the log is empty.
pub fn latest_event_t(conn: &Connection) -> Result<Seq, LogError> {
    let t: Option<Seq> = conn.query_row("SELECT MAX(event_t) FROM event", [], |row| row.get(0))?;
    Ok(t.unwrap_or(ORIGIN))
}

/// Fetches the events stored under exactly `event_t`.
///
/// # Errors
///
/// `LogError::RowCount` if there is no such record, `LogError::MalformedEvents`
/// if the stored value is not a JSON array.
pub fn fetch_events(conn: &Connection, event_t: Seq) -> Result<Events, LogError> {
    let mut stmt = conn.prepare_cached("SELECT event_data FROM event WHERE event_t = ?1")?;
    let rows = stmt
        .query_map([event_t], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let [data] = rows.as_slice() else {
        return Err(LogError::RowCount {
            table: "event",
            seq: event_t,
            rows: rows.len(),
        });
    };

    let value: serde_json::Value = serde_json::from_str(data)?;
    if !value.is_array() {
        return Err(LogError::MalformedEvents { seq: event_t });
    }
    let events: Events = serde_json::from_value(value)?;
    tracing::trace!(event_t, count = events.len(), "fetched events");
    Ok(events)
}

/// Appends one event record and returns its sequence number.
///
/// The record may be empty; it still consumes a sequence number.
pub fn append_events(conn: &Connection, entries: &[EventEntry]) -> Result<Seq, LogError> {
    let data = serde_json::to_string(entries)?;
    let event_t: Seq = conn.query_row(
        "INSERT INTO event (event_t, event_data)
         VALUES ((SELECT COALESCE(MAX(event_t), 0) + 1 FROM event), ?1)
         RETURNING event_t",
        [data],
        |row| row.get(0),
    )?;
    tracing::debug!(event_t, count = entries.len(), "appended events");
    Ok(event_t)
}

/// Returns the newest status row, or `None` when no command was ever queued.
pub fn latest_status(conn: &Connection) -> Result<Option<(Seq, CommandStatus)>, LogError> {
    let row: Option<(Seq, String, String)> = conn
        .query_row(
            "SELECT status_t, command_uuid, status_type
             FROM command_status
             ORDER BY status_t DESC
             LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    row.map(|(status_t, uuid, status_type)| {
        Ok((
            status_t,
            CommandStatus {
                command_uuid: parse_uuid(&uuid)?,
                status_type: parse_status_type(&status_type)?,
            },
        ))
    })
    .transpose()
}

/// Fetches the status stored under exactly `status_t`.
pub fn fetch_command_status(conn: &Connection, status_t: Seq) -> Result<CommandStatus, LogError> {
    let mut stmt = conn.prepare_cached(
        "SELECT command_uuid, status_type FROM command_status WHERE status_t = ?1",
    )?;
    let rows = stmt
        .query_map([status_t], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let [(uuid, status_type)] = rows.as_slice() else {
        return Err(LogError::RowCount {
            table: "command_status",
            seq: status_t,
            rows: rows.len(),
        });
    };

    Ok(CommandStatus {
        command_uuid: parse_uuid(uuid)?,
        status_type: parse_status_type(status_type)?,
    })
}

fn insert_status(
    conn: &Connection,
    command_uuid: Uuid,
    status_type: StatusType,
) -> Result<StatusNotification, LogError> {
    let status_t: Seq = conn.query_row(
        "INSERT INTO command_status (status_t, command_uuid, status_type)
         VALUES ((SELECT COALESCE(MAX(status_t), 0) + 1 FROM command_status), ?1, ?2)
         RETURNING status_t",
        params![command_uuid.to_string(), status_type.as_str()],
        |row| row.get(0),
    )?;

    Ok(StatusNotification {
        seq: status_t,
        status: CommandStatus {
            command_uuid,
            status_type,
        },
    })
}

/// Stores a submitted command and appends its `queued` status.
///
/// # Errors
///
/// `LogError::DuplicateCommand` if the command uuid was already submitted.
pub fn enqueue_command(
    conn: &Connection,
    submission: &CommandSubmission,
) -> Result<StatusNotification, LogError> {
    let tx = conn.unchecked_transaction()?;

    let inserted = tx.execute(
        "INSERT INTO command (command_uuid, command_type, command_data)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (command_uuid) DO NOTHING",
        params![
            submission.command_uuid.to_string(),
            submission.command_type,
            serde_json::to_string(&submission.command_data)?,
        ],
    )?;
    if inserted == 0 {
        return Err(LogError::DuplicateCommand(submission.command_uuid));
    }

    let notification = insert_status(&tx, submission.command_uuid, StatusType::Queued)?;
    tx.commit()?;

    tracing::debug!(
        command_uuid = %submission.command_uuid,
        command_type = %submission.command_type,
        status_t = notification.seq,
        "command queued"
    );
    Ok(notification)
}

/// Appends an outcome status (`succeeded`, `failed` or `aborted`) for a
/// previously submitted command.
pub fn record_outcome(
    conn: &Connection,
    command_uuid: Uuid,
    outcome: StatusType,
) -> Result<StatusNotification, LogError> {
    if !outcome.is_outcome() {
        return Err(LogError::InvalidOutcome(outcome));
    }

    let tx = conn.unchecked_transaction()?;
    let exists: bool = tx.query_row(
        "SELECT EXISTS(SELECT 1 FROM command WHERE command_uuid = ?1)",
        [command_uuid.to_string()],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(LogError::UnknownCommand(command_uuid));
    }

    let notification = insert_status(&tx, command_uuid, outcome)?;
    tx.commit()?;

    tracing::debug!(%command_uuid, %outcome, status_t = notification.seq, "command outcome recorded");
    Ok(notification)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;
    use serde_json::json;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        run_migrations(&conn).expect("migrations should succeed");
        conn
    }

    fn submission(command_type: &str) -> CommandSubmission {
        CommandSubmission {
            command_uuid: Uuid::new_v4(),
            command_type: command_type.to_string(),
            command_data: json!({"amount": 10}),
        }
    }

    fn entry(event_type: &str) -> EventEntry {
        EventEntry {
            event_type: event_type.to_string(),
            data: json!({"n": 1}),
        }
    }

    #[test]
    fn empty_logs_report_origin() {
        let conn = test_db();
        assert_eq!(latest_event_t(&conn).unwrap(), ORIGIN);
        assert_eq!(latest_status(&conn).unwrap(), None);
    }

    #[test]
    fn appended_events_get_consecutive_sequence_numbers() {
        let conn = test_db();
        assert_eq!(append_events(&conn, &[entry("a")]).unwrap(), 1);
        assert_eq!(append_events(&conn, &[entry("b"), entry("c")]).unwrap(), 2);
        assert_eq!(latest_event_t(&conn).unwrap(), 2);

        let events = fetch_events(&conn, 2).unwrap();
        let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(types, ["b", "c"]);
    }

    #[test]
    fn fetch_missing_event_is_invariant_violation() {
        let conn = test_db();
        let err = fetch_events(&conn, 9).unwrap_err();
        assert!(matches!(
            err,
            LogError::RowCount {
                table: "event",
                seq: 9,
                rows: 0
            }
        ));
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn fetch_non_array_event_record_is_rejected() {
        let conn = test_db();
        conn.execute(
            "INSERT INTO event (event_t, event_data) VALUES (1, '{\"type\":\"x\"}')",
            [],
        )
        .unwrap();
        assert!(matches!(
            fetch_events(&conn, 1),
            Err(LogError::MalformedEvents { seq: 1 })
        ));
    }

    #[test]
    fn enqueue_appends_queued_status() {
        let conn = test_db();
        let cmd = submission("deposit");

        let notification = enqueue_command(&conn, &cmd).unwrap();
        assert_eq!(notification.seq, 1);
        assert_eq!(notification.status.status_type, StatusType::Queued);
        assert_eq!(notification.status.command_uuid, cmd.command_uuid);

        assert_eq!(fetch_command_status(&conn, 1).unwrap(), notification.status);
        assert_eq!(
            latest_status(&conn).unwrap(),
            Some((1, notification.status.clone()))
        );
    }

    #[test]
    fn duplicate_submission_is_rejected_without_new_status() {
        let conn = test_db();
        let cmd = submission("deposit");
        enqueue_command(&conn, &cmd).unwrap();

        let err = enqueue_command(&conn, &cmd).unwrap_err();
        assert!(matches!(err, LogError::DuplicateCommand(id) if id == cmd.command_uuid));
        assert_eq!(latest_status(&conn).unwrap().map(|(t, _)| t), Some(1));
    }

    #[test]
    fn outcome_follows_queued_status() {
        let conn = test_db();
        let cmd = submission("withdraw");
        enqueue_command(&conn, &cmd).unwrap();

        let outcome = record_outcome(&conn, cmd.command_uuid, StatusType::Failed).unwrap();
        assert_eq!(outcome.seq, 2);
        assert_eq!(
            fetch_command_status(&conn, 2).unwrap().status_type,
            StatusType::Failed
        );
    }

    #[test]
    fn outcome_validation() {
        let conn = test_db();
        let cmd = submission("withdraw");
        enqueue_command(&conn, &cmd).unwrap();

        assert!(matches!(
            record_outcome(&conn, cmd.command_uuid, StatusType::Queued),
            Err(LogError::InvalidOutcome(StatusType::Queued))
        ));
        assert!(matches!(
            record_outcome(&conn, Uuid::new_v4(), StatusType::Succeeded),
            Err(LogError::UnknownCommand(_))
        ));
    }

    #[test]
    fn fetch_missing_status_reports_row_count() {
        let conn = test_db();
        assert!(matches!(
            fetch_command_status(&conn, 1),
            Err(LogError::RowCount {
                table: "command_status",
                rows: 0,
                ..
            })
        ));
    }
}
