//! Policy store backed by SQLite.
//!
//! One [`Store`] owns a connection pool for the whole process; workers and
//! the administrative API share it behind an `Arc`. sqlx keeps a prepared
//! statement cache per pooled connection, so the fixed queries below are
//! prepared once per connection rather than per call. The schema migration
//! is applied inline via `include_str!` on open.

pub mod config;
pub mod file;
pub mod judge;
pub mod net;
pub mod process;

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use crate::codec::CommandError;

pub use config::ConfigKey;
pub use file::{EventStatus, FileEvent, FilePolicy, PolicyStatus};
pub use judge::JudgeRecord;
pub use net::{NetPolicy, Packet};
pub use process::{AuditUpdate, JudgeOutcome, ProcessRecord, TrustStatus};

/// Errors returned by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The database file could not be opened or created.
    #[error("failed to open policy store at {path}: {source}")]
    Open {
        /// Database path.
        path: PathBuf,
        /// Underlying driver error.
        source: sqlx::Error,
    },
    /// Applying the schema failed.
    #[error("failed to apply policy store schema: {0}")]
    Migration(#[source] sqlx::Error),
    /// A query failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// No row with the given id exists.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Table-level entity name.
        entity: &'static str,
        /// Requested id.
        id: i64,
    },
    /// A live file policy already covers this on-disk identity.
    #[error("a file policy already exists for fsid {fsid} ino {ino}")]
    Conflict {
        /// Filesystem id.
        fsid: u64,
        /// Inode.
        ino: u64,
    },
    /// A stored value is outside the range of its domain type.
    #[error("corrupt {field} value in store: {value}")]
    Corrupt {
        /// Column name.
        field: &'static str,
        /// Offending value.
        value: i64,
    },
    /// A command signature could not be decomposed for storage.
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Shared handle to the policy database.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created, the
    /// database cannot be opened, or the migration fails.
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return Err(StoreError::Open {
                    path: path.to_path_buf(),
                    source: sqlx::Error::Io(e),
                });
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .pragma("trusted_schema", "OFF");

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|source| StoreError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let migration_sql = include_str!("../../migrations/001_uranus_schema.sql");
        sqlx::raw_sql(migration_sql)
            .execute(&pool)
            .await
            .map_err(StoreError::Migration)?;

        debug!(path = %path.display(), "policy store opened");
        Ok(Self { pool })
    }

    /// Check that the schema is present and the database answers.
    ///
    /// # Errors
    ///
    /// Returns an error if any expected table is missing or unreadable.
    pub async fn validate(&self) -> Result<(), StoreError> {
        for table in [
            "config",
            "file_policy",
            "file_event",
            "net_policy",
            "process_event",
            "judge",
        ] {
            let found: Option<(String,)> =
                sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1")
                    .bind(table)
                    .fetch_optional(&self.pool)
                    .await?;
            if found.is_none() {
                return Err(StoreError::Migration(sqlx::Error::RowNotFound));
            }
        }
        Ok(())
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Current time as Unix seconds, the timestamp unit of every table.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Reinterpret a kernel `u64` identifier for an SQLite `INTEGER` column.
pub(crate) fn to_sql_u64(value: u64) -> i64 {
    value.cast_signed()
}

/// Inverse of [`to_sql_u64`].
pub(crate) fn from_sql_u64(value: i64) -> u64 {
    value.cast_unsigned()
}

/// Narrow a stored integer, reporting out-of-range values as corruption.
pub(crate) fn narrow<T: TryFrom<i64>>(field: &'static str, value: i64) -> Result<T, StoreError> {
    T::try_from(value).map_err(|_| StoreError::Corrupt { field, value })
}

/// Whether a driver error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
