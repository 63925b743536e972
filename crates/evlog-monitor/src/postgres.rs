//! Postgres backend: `sqlx` pool for queries, one `PgListener` per subscription.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use sqlx::postgres::PgListener;

use evlog_db::postgres::{self as pg, PgPool};
use evlog_db::LogError;
use evlog_types::{CommandStatus, CommandSubmission, Events, Seq, ORIGIN};

use crate::error::SourceError;
use crate::kind::{EventSequence, StatusSequence};
use crate::source::{CatchUp, NotificationChannel, Notifications, RecordSource};

/// A Postgres database whose triggers notify on every log append.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    /// Wraps a connected pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Submits a command; the database announces its `queued` status.
    pub async fn submit_command(&self, submission: &CommandSubmission) -> Result<(), LogError> {
        pg::enqueue_command(&self.pool, submission).await
    }
}

impl RecordSource<EventSequence> for PgBackend {
    fn catch_up(&self) -> BoxFuture<'_, Result<CatchUp<()>, SourceError>> {
        async move {
            let t = pg::latest_event_t(&self.pool).await?;
            Ok(if t == ORIGIN {
                CatchUp::Empty
            } else {
                CatchUp::At(t, ())
            })
        }
        .boxed()
    }

    fn fetch(&self, seq: Seq) -> BoxFuture<'_, Result<Events, SourceError>> {
        async move { Ok(pg::fetch_events(&self.pool, seq).await?) }.boxed()
    }
}

impl RecordSource<StatusSequence> for PgBackend {
    fn catch_up(&self) -> BoxFuture<'_, Result<CatchUp<CommandStatus>, SourceError>> {
        async move {
            Ok(match pg::latest_status(&self.pool).await? {
                Some((status_t, status)) => CatchUp::At(status_t, status),
                None => CatchUp::Empty,
            })
        }
        .boxed()
    }

    fn fetch(&self, seq: Seq) -> BoxFuture<'_, Result<Option<CommandStatus>, SourceError>> {
        async move { Ok(Some(pg::fetch_command_status(&self.pool, seq).await?)) }.boxed()
    }
}

impl NotificationChannel for PgBackend {
    fn listen<'a>(
        &'a self,
        channel: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn Notifications>, SourceError>> {
        async move {
            let listener = pg::listen(&self.pool, channel).await?;
            let notifications: Box<dyn Notifications> = Box::new(PgNotifications { listener });
            Ok(notifications)
        }
        .boxed()
    }
}

struct PgNotifications {
    listener: PgListener,
}

impl Notifications for PgNotifications {
    // `try_recv` instead of `recv`: `recv` silently reconnects, and
    // notifications sent while reconnecting would be lost without a catch-up.
    fn next(&mut self) -> BoxFuture<'_, Result<String, SourceError>> {
        async move {
            match self.listener.try_recv().await {
                Ok(Some(notification)) => Ok(notification.payload().to_string()),
                Ok(None) => Err(SourceError::Disconnected(
                    "postgres listener connection lost".to_string(),
                )),
                Err(e) => Err(SourceError::Log(e.into())),
            }
        }
        .boxed()
    }
}
