use evlog_db::{
    append_events, create_pool, enqueue_command, fetch_command_status, fetch_events,
    latest_event_t, latest_status, record_outcome, run_migrations, DbRuntimeSettings, NotifyHub,
};
use evlog_types::{
    parse_event_notification, CommandSubmission, EventEntry, StatusNotification, StatusType,
    EVENT_CHANNEL, STATUS_CHANNEL,
};
use serde_json::json;
use uuid::Uuid;

#[test]
fn file_backed_pool_persists_across_pools() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let path = dir.path().join("evlog.db");
    let path = path.to_str().expect("temp path should be utf-8");

    {
        let pool = create_pool(path, DbRuntimeSettings::default()).expect("failed to create pool");
        let conn = pool.get().expect("failed to get connection");
        run_migrations(&conn).expect("failed to run migrations");
        append_events(
            &conn,
            &[EventEntry {
                event_type: "opened".to_string(),
                data: json!({"id": 1}),
            }],
        )
        .expect("append should succeed");
    }

    let pool = create_pool(path, DbRuntimeSettings::default()).expect("failed to reopen pool");
    let conn = pool.get().expect("failed to get connection");
    assert_eq!(run_migrations(&conn).expect("migrations should succeed"), 0);
    assert_eq!(latest_event_t(&conn).unwrap(), 1);
    assert_eq!(fetch_events(&conn, 1).unwrap()[0].event_type, "opened");
}

#[test]
fn concurrent_writers_never_share_a_sequence_number() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("evlog.db");
    let pool = create_pool(path.to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    run_migrations(&pool.get().unwrap()).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let conn = pool.get().unwrap();
                (0..10)
                    .map(|_| append_events(&conn, &[]).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen: Vec<i64> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (1..=40).collect::<Vec<_>>());
}

#[tokio::test]
async fn write_path_notifications_round_trip_through_hub() {
    let pool = create_pool(evlog_db::IN_MEMORY, DbRuntimeSettings::default()).unwrap();
    let conn = pool.get().unwrap();
    run_migrations(&conn).unwrap();

    let hub = NotifyHub::default();
    let mut events_rx = hub.listen(EVENT_CHANNEL);
    let mut status_rx = hub.listen(STATUS_CHANNEL);

    let event_t = append_events(&conn, &[]).unwrap();
    hub.notify(EVENT_CHANNEL, event_t.to_string());

    let submission = CommandSubmission {
        command_uuid: Uuid::new_v4(),
        command_type: "deposit".to_string(),
        command_data: json!({"amount": 5}),
    };
    let queued = enqueue_command(&conn, &submission).unwrap();
    hub.notify(STATUS_CHANNEL, queued.to_payload());
    let done = record_outcome(&conn, submission.command_uuid, StatusType::Succeeded).unwrap();
    hub.notify(STATUS_CHANNEL, done.to_payload());

    let notified_t = parse_event_notification(&events_rx.recv().await.unwrap()).unwrap();
    assert_eq!(notified_t, event_t);

    let first = StatusNotification::parse(&status_rx.recv().await.unwrap()).unwrap();
    let second = StatusNotification::parse(&status_rx.recv().await.unwrap()).unwrap();
    assert_eq!(first, queued);
    assert_eq!(second, done);
    assert_eq!(fetch_command_status(&conn, second.seq).unwrap(), second.status);
    assert_eq!(latest_status(&conn).unwrap(), Some((second.seq, second.status)));
}
