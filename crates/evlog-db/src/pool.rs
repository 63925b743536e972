//! SQLite connection pool creation and configuration.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use thiserror::Error;

/// Path value that selects a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors that can occur when creating the database pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the connection pool.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Creates a SQLite connection pool with WAL mode and foreign keys enabled.
///
/// `db_path` is a file path, or [`IN_MEMORY`]. Every pooled connection must
/// see the same data, so an in-memory database is opened as a uniquely named
/// shared-cache URI, and the pool never retires its idle connections (the
/// database disappears when the last connection closes).
///
/// # Errors
///
/// Returns `PoolError::PoolInit` if the connection pool cannot be created.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let in_memory = db_path == IN_MEMORY;
    let target = if in_memory {
        flags |= OpenFlags::SQLITE_OPEN_URI;
        format!(
            "file:evlog-{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        )
    } else {
        db_path.to_string()
    };

    let manager = SqliteConnectionManager::file(target)
        .with_flags(flags)
        .with_init(move |conn| {
            // In-memory databases report "memory", which is expected.
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if journal_mode != "wal" && journal_mode != "memory" {
                return Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                    Some(format!(
                        "failed to set WAL journal mode, got: {}",
                        journal_mode
                    )),
                ));
            }
            conn.execute_batch(&format!(
                "PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = {};",
                settings.busy_timeout_ms
            ))
        });

    let mut builder = Pool::builder().max_size(settings.pool_max_size);
    if in_memory {
        builder = builder.idle_timeout(None).max_lifetime(None);
    }

    let pool = builder.build(manager)?;
    tracing::debug!(
        path = db_path,
        max_size = settings.pool_max_size,
        "created sqlite pool"
    );

    Ok(pool)
}
