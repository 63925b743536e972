//! evlog server library logic.

pub mod api;
pub mod config;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Json, Router,
};
use config::{DatabaseConfig, DbBackend, LongPollConfig, MonitorConfig};
use evlog_db::{DbRuntimeSettings, LogError, MigrationError, NotifyHub, PoolError};
use evlog_monitor::postgres::PgBackend;
use evlog_monitor::sqlite::SqliteBackend;
use evlog_monitor::subscription::{self, SubscriptionSettings};
use evlog_monitor::{
    EventSequence, NotificationChannel, RecordSource, SourceError, StatusSequence, Tracker,
};
use evlog_types::CommandSubmission;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// The database the logs live in.
#[derive(Debug, Clone)]
pub enum Backend {
    /// Embedded SQLite with in-process notifications.
    Sqlite(Arc<SqliteBackend>),
    /// External Postgres with trigger-driven notifications.
    Postgres(Arc<PgBackend>),
}

/// Failures while opening the configured backend.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The SQLite pool could not be built.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Embedded migrations failed.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// A database connection could not be obtained.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The Postgres backend was selected without a connection string.
    #[error("database.url is required for the postgres backend")]
    MissingDatabaseUrl,
}

impl Backend {
    /// Opens the configured database. SQLite databases are migrated first.
    ///
    /// # Errors
    ///
    /// Returns `StartupError` if the database cannot be opened or migrated.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, StartupError> {
        match config.backend {
            DbBackend::Sqlite => {
                let pool = evlog_db::create_pool(
                    &config.path,
                    DbRuntimeSettings {
                        busy_timeout_ms: config.busy_timeout_ms,
                        pool_max_size: config.pool_max_size,
                    },
                )?;
                {
                    let conn = pool.get().map_err(LogError::from)?;
                    let applied = evlog_db::run_migrations(&conn)?;
                    if applied > 0 {
                        tracing::info!(count = applied, "applied database migrations");
                    }
                }
                let hub = Arc::new(NotifyHub::default());
                Ok(Self::Sqlite(Arc::new(SqliteBackend::new(pool, hub))))
            }
            DbBackend::Postgres => {
                let url = config
                    .url
                    .as_deref()
                    .ok_or(StartupError::MissingDatabaseUrl)?;
                let pool = evlog_db::postgres::create_pg_pool(url, config.pool_max_size).await?;
                Ok(Self::Postgres(Arc::new(PgBackend::new(pool))))
            }
        }
    }

    fn channel(&self) -> Arc<dyn NotificationChannel> {
        match self {
            Self::Sqlite(b) => b.clone(),
            Self::Postgres(b) => b.clone(),
        }
    }

    fn event_source(&self) -> Arc<dyn RecordSource<EventSequence>> {
        match self {
            Self::Sqlite(b) => b.clone(),
            Self::Postgres(b) => b.clone(),
        }
    }

    fn status_source(&self) -> Arc<dyn RecordSource<StatusSequence>> {
        match self {
            Self::Sqlite(b) => b.clone(),
            Self::Postgres(b) => b.clone(),
        }
    }

    /// The embedded backend, if that is what is running.
    pub fn sqlite(&self) -> Option<&SqliteBackend> {
        match self {
            Self::Sqlite(b) => Some(b.as_ref()),
            Self::Postgres(_) => None,
        }
    }

    /// Stores a command and its `queued` status.
    pub async fn submit_command(&self, submission: CommandSubmission) -> Result<(), SourceError> {
        match self {
            Self::Sqlite(b) => b.submit_command(submission).await.map(drop),
            Self::Postgres(b) => Ok(b.submit_command(&submission).await?),
        }
    }
}

/// Application state shared across all request handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Database the logs live in.
    pub backend: Backend,
    /// Event log watermark.
    pub events: Arc<Tracker<EventSequence>>,
    /// Command status log watermark.
    pub statuses: Arc<Tracker<StatusSequence>>,
    /// Long-poll timeout; `None` waits indefinitely.
    pub long_poll_timeout: Option<Duration>,
}

impl AppState {
    /// Creates uninitialized trackers over `backend`.
    ///
    /// The trackers only advance once [`spawn_monitors`](Self::spawn_monitors)
    /// has been called.
    pub fn new(backend: Backend, monitor: &MonitorConfig, long_poll: &LongPollConfig) -> Self {
        let events = Arc::new(Tracker::new(backend.event_source(), monitor.fetch_retry()));
        let statuses = Arc::new(Tracker::new(backend.status_source(), monitor.fetch_retry()));
        Self {
            backend,
            events,
            statuses,
            long_poll_timeout: long_poll.timeout(),
        }
    }

    /// Starts one subscription loop per tracked log.
    pub fn spawn_monitors(&self, settings: SubscriptionSettings) -> [JoinHandle<()>; 2] {
        let channel = self.backend.channel();
        [
            tokio::spawn(subscription::run(
                self.events.clone(),
                channel.clone(),
                settings,
            )),
            tokio::spawn(subscription::run(self.statuses.clone(), channel, settings)),
        ]
    }
}

/// Maximum request body size (2 MiB). Protects against OOM from oversized payloads.
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route(
            "/event-apis/submit-command",
            post(api::submit_command_handler),
        )
        .route("/event-apis/events/t", get(api::event_watermark_handler))
        .route("/event-apis/events/{t}", get(api::events_handler))
        .route(
            "/event-apis/command-status/t",
            get(api::status_watermark_handler),
        )
        .route(
            "/event-apis/command-status/{t}",
            get(api::command_status_handler),
        );

    // The Postgres schema is written by its own producers.
    if state.backend.sqlite().is_some() {
        router = router
            .route("/event-apis/events", post(api::append_events_handler))
            .route(
                "/event-apis/command-outcome",
                post(api::command_outcome_handler),
            );
    }

    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
