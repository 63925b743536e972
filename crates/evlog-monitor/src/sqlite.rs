//! Embedded backend: SQLite for storage, a [`NotifyHub`] for notifications.
//!
//! Every write made through [`SqliteBackend`] publishes its notification on
//! the hub from the same blocking task, right after the write commits, which
//! is what a Postgres trigger calling `pg_notify` does for the Postgres
//! backend.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use rusqlite::Connection;
use tokio::sync::broadcast;
use uuid::Uuid;

use evlog_db::{DbPool, LogError, NotifyHub};
use evlog_types::{
    event_notification_payload, CommandStatus, CommandSubmission, EventEntry, Events, Seq,
    StatusNotification, StatusType, EVENT_CHANNEL, ORIGIN, STATUS_CHANNEL,
};

use crate::error::SourceError;
use crate::kind::{EventSequence, StatusSequence};
use crate::source::{CatchUp, NotificationChannel, Notifications, RecordSource};

/// SQLite pool plus the hub its writes are announced on.
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: DbPool,
    hub: Arc<NotifyHub>,
}

impl SqliteBackend {
    /// Wraps a migrated pool and the hub its notifications go to.
    pub fn new(pool: DbPool, hub: Arc<NotifyHub>) -> Self {
        Self { pool, hub }
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Runs `f` on a pooled connection off the async runtime.
    async fn blocking<T, F>(&self, f: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, LogError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| SourceError::Task(e.to_string()))?
        .map_err(SourceError::from)
    }

    /// Appends one event record and announces it.
    ///
    /// The notification is published by the blocking task right after the
    /// commit, so it goes out even if this future is dropped mid-write.
    pub async fn append_events(&self, entries: Vec<EventEntry>) -> Result<Seq, SourceError> {
        let hub = Arc::clone(&self.hub);
        self.blocking(move |conn| {
            let event_t = evlog_db::append_events(conn, &entries)?;
            hub.notify(EVENT_CHANNEL, event_notification_payload(event_t));
            Ok(event_t)
        })
        .await
    }

    /// Stores a command with its `queued` status and announces the status.
    pub async fn submit_command(
        &self,
        submission: CommandSubmission,
    ) -> Result<StatusNotification, SourceError> {
        let hub = Arc::clone(&self.hub);
        self.blocking(move |conn| {
            let queued = evlog_db::enqueue_command(conn, &submission)?;
            hub.notify(STATUS_CHANNEL, queued.to_payload());
            Ok(queued)
        })
        .await
    }

    /// Records a command outcome and announces it.
    pub async fn record_outcome(
        &self,
        command_uuid: Uuid,
        outcome: StatusType,
    ) -> Result<StatusNotification, SourceError> {
        let hub = Arc::clone(&self.hub);
        self.blocking(move |conn| {
            let recorded = evlog_db::record_outcome(conn, command_uuid, outcome)?;
            hub.notify(STATUS_CHANNEL, recorded.to_payload());
            Ok(recorded)
        })
        .await
    }
}

impl RecordSource<EventSequence> for SqliteBackend {
    fn catch_up(&self) -> BoxFuture<'_, Result<CatchUp<()>, SourceError>> {
        async move {
            let t = self.blocking(evlog_db::latest_event_t).await?;
            Ok(if t == ORIGIN {
                CatchUp::Empty
            } else {
                CatchUp::At(t, ())
            })
        }
        .boxed()
    }

    fn fetch(&self, seq: Seq) -> BoxFuture<'_, Result<Events, SourceError>> {
        self.blocking(move |conn| evlog_db::fetch_events(conn, seq))
            .boxed()
    }
}

impl RecordSource<StatusSequence> for SqliteBackend {
    fn catch_up(&self) -> BoxFuture<'_, Result<CatchUp<CommandStatus>, SourceError>> {
        async move {
            let latest = self.blocking(evlog_db::latest_status).await?;
            Ok(match latest {
                Some((status_t, status)) => CatchUp::At(status_t, status),
                None => CatchUp::Empty,
            })
        }
        .boxed()
    }

    fn fetch(&self, seq: Seq) -> BoxFuture<'_, Result<Option<CommandStatus>, SourceError>> {
        async move {
            let status = self
                .blocking(move |conn| evlog_db::fetch_command_status(conn, seq))
                .await?;
            Ok(Some(status))
        }
        .boxed()
    }
}

impl NotificationChannel for SqliteBackend {
    fn listen<'a>(
        &'a self,
        channel: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Notifications>, SourceError>> {
        let rx = self.hub.listen(channel);
        let notifications: Box<dyn Notifications> = Box::new(HubNotifications {
            channel: channel.to_string(),
            rx,
        });
        async move { Ok(notifications) }.boxed()
    }
}

struct HubNotifications {
    channel: String,
    rx: broadcast::Receiver<String>,
}

impl Notifications for HubNotifications {
    fn next(&mut self) -> BoxFuture<'_, Result<String, SourceError>> {
        async move {
            self.rx.recv().await.map_err(|e| match e {
                broadcast::error::RecvError::Lagged(missed) => SourceError::Disconnected(format!(
                    "listener on {} lagged by {missed} notifications",
                    self.channel
                )),
                broadcast::error::RecvError::Closed => {
                    SourceError::Disconnected(format!("channel {} closed", self.channel))
                }
            })
        }
        .boxed()
    }
}
