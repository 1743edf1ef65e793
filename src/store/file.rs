//! File policies and file access events.

use serde::Serialize;

use super::{from_sql_u64, is_unique_violation, narrow, to_sql_u64, unix_now, Store, StoreError};

/// Outcome of resolving a policy path in the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyStatus {
    /// Installed and live.
    Normal,
    /// The kernel answered with an unexpected code.
    Unknown,
    /// Another policy already covers this on-disk identity.
    Conflict,
    /// The path does not resolve to a file.
    FileNotExist,
}

impl PolicyStatus {
    /// Map a `user::file::set` reply code.
    pub fn from_kernel_code(code: i32) -> Self {
        match code {
            0 => Self::Normal,
            -2 => Self::FileNotExist,
            -17 => Self::Conflict,
            _ => Self::Unknown,
        }
    }

    /// Integer persisted in the `status` column.
    pub fn code(&self) -> i64 {
        match self {
            Self::Normal => 0,
            Self::Unknown => 1,
            Self::Conflict => 2,
            Self::FileNotExist => 3,
        }
    }

    fn from_code(value: i64) -> Result<Self, StoreError> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Unknown),
            2 => Ok(Self::Conflict),
            3 => Ok(Self::FileNotExist),
            _ => Err(StoreError::Corrupt {
                field: "file_policy.status",
                value,
            }),
        }
    }
}

/// Read state of a file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Not yet acknowledged by an operator.
    Unread,
    /// Acknowledged.
    Read,
}

impl EventStatus {
    /// Integer persisted in the `status` column.
    pub fn code(&self) -> i64 {
        match self {
            Self::Unread => 0,
            Self::Read => 1,
        }
    }

    /// Parse a persisted or user-supplied code.
    pub fn from_code(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Unread),
            1 => Some(Self::Read),
            _ => None,
        }
    }
}

/// A stored file policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePolicy {
    /// Row id.
    pub id: i64,
    /// User-facing path, re-resolved on every reconciliation.
    pub path: String,
    /// Filesystem id from the last resolution.
    pub fsid: u64,
    /// Inode from the last resolution.
    pub ino: u64,
    /// Permission bitmask.
    pub perm: i32,
    /// Unix seconds of the last change.
    pub timestamp: i64,
    /// Last resolution outcome.
    pub status: PolicyStatus,
}

/// A recorded file access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEvent {
    /// Row id.
    pub id: i64,
    /// Path as reported by the kernel.
    pub path: String,
    /// Filesystem id.
    pub fsid: u64,
    /// Inode.
    pub ino: u64,
    /// Attempted permission bits.
    pub perm: i32,
    /// Unix seconds at which the event was recorded.
    pub timestamp: i64,
    /// Id of the live policy that matched, 0 if none did.
    pub policy: i64,
    /// Read state.
    pub status: EventStatus,
}

type PolicyRow = (i64, String, i64, i64, i64, i64, i64);
type EventRow = (i64, String, i64, i64, i64, i64, i64, i64);

fn policy_from_row(row: PolicyRow) -> Result<FilePolicy, StoreError> {
    let (id, path, fsid, ino, perm, timestamp, status) = row;
    Ok(FilePolicy {
        id,
        path,
        fsid: from_sql_u64(fsid),
        ino: from_sql_u64(ino),
        perm: narrow("file_policy.perm", perm)?,
        timestamp,
        status: PolicyStatus::from_code(status)?,
    })
}

fn event_from_row(row: EventRow) -> Result<FileEvent, StoreError> {
    let (id, path, fsid, ino, perm, timestamp, policy, status) = row;
    Ok(FileEvent {
        id,
        path,
        fsid: from_sql_u64(fsid),
        ino: from_sql_u64(ino),
        perm: narrow("file_event.perm", perm)?,
        timestamp,
        policy,
        status: EventStatus::from_code(status).ok_or(StoreError::Corrupt {
            field: "file_event.status",
            value: status,
        })?,
    })
}

const POLICY_COLUMNS: &str = "id, path, fsid, ino, perm, timestamp, status";
const EVENT_COLUMNS: &str = "id, path, fsid, ino, perm, timestamp, policy, status";

impl Store {
    /// Insert a resolved policy.
    ///
    /// A live policy for the same `(fsid, ino)` makes the insert fail with
    /// [`StoreError::Conflict`]; the check and the insert share a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on a duplicate identity, or a
    /// database error.
    pub async fn insert_file_policy(
        &self,
        path: &str,
        fsid: u64,
        ino: u64,
        perm: i32,
        status: PolicyStatus,
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool().begin().await?;

        if status == PolicyStatus::Normal {
            let existing: Option<(i64,)> = sqlx::query_as(
                "SELECT id FROM file_policy WHERE fsid = ?1 AND ino = ?2 AND status = 0",
            )
            .bind(to_sql_u64(fsid))
            .bind(to_sql_u64(ino))
            .fetch_optional(&mut *tx)
            .await?;
            if existing.is_some() {
                return Err(StoreError::Conflict { fsid, ino });
            }
        }

        let inserted = sqlx::query(
            "INSERT INTO file_policy (path, fsid, ino, perm, timestamp, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(path)
        .bind(to_sql_u64(fsid))
        .bind(to_sql_u64(ino))
        .bind(perm)
        .bind(unix_now())
        .bind(status.code())
        .execute(&mut *tx)
        .await;

        let id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(e) if is_unique_violation(&e) => return Err(StoreError::Conflict { fsid, ino }),
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;
        Ok(id)
    }

    /// Overwrite identity, permissions and status of an existing policy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id,
    /// [`StoreError::Conflict`] if another live policy holds the identity, or
    /// a database error.
    pub async fn update_file_policy(
        &self,
        id: i64,
        fsid: u64,
        ino: u64,
        perm: i32,
        status: PolicyStatus,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool().begin().await?;

        if status == PolicyStatus::Normal {
            let existing: Option<(i64,)> = sqlx::query_as(
                "SELECT id FROM file_policy
                 WHERE fsid = ?1 AND ino = ?2 AND status = 0 AND id != ?3",
            )
            .bind(to_sql_u64(fsid))
            .bind(to_sql_u64(ino))
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
            if existing.is_some() {
                return Err(StoreError::Conflict { fsid, ino });
            }
        }

        let updated = sqlx::query(
            "UPDATE file_policy SET fsid = ?1, ino = ?2, perm = ?3, timestamp = ?4, status = ?5
             WHERE id = ?6",
        )
        .bind(to_sql_u64(fsid))
        .bind(to_sql_u64(ino))
        .bind(perm)
        .bind(unix_now())
        .bind(status.code())
        .bind(id)
        .execute(&mut *tx)
        .await;

        match updated {
            Ok(result) if result.rows_affected() == 0 => {
                return Err(StoreError::NotFound {
                    entity: "file policy",
                    id,
                });
            }
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => return Err(StoreError::Conflict { fsid, ino }),
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;
        Ok(())
    }

    /// Record the outcome of re-resolving a policy at startup.
    ///
    /// If the new identity collides with another live policy the row is
    /// stored as [`PolicyStatus::Conflict`] instead. Returns the status that
    /// was written.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn reconcile_file_policy(
        &self,
        id: i64,
        fsid: u64,
        ino: u64,
        status: PolicyStatus,
    ) -> Result<PolicyStatus, StoreError> {
        let statement = "UPDATE file_policy SET fsid = ?1, ino = ?2, timestamp = ?3, status = ?4
                         WHERE id = ?5";
        let first = sqlx::query(statement)
            .bind(to_sql_u64(fsid))
            .bind(to_sql_u64(ino))
            .bind(unix_now())
            .bind(status.code())
            .bind(id)
            .execute(self.pool())
            .await;

        match first {
            Ok(_) => Ok(status),
            Err(e) if is_unique_violation(&e) => {
                sqlx::query(statement)
                    .bind(to_sql_u64(fsid))
                    .bind(to_sql_u64(ino))
                    .bind(unix_now())
                    .bind(PolicyStatus::Conflict.code())
                    .bind(id)
                    .execute(self.pool())
                    .await?;
                Ok(PolicyStatus::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch one policy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub async fn file_policy(&self, id: i64) -> Result<FilePolicy, StoreError> {
        let row: Option<PolicyRow> =
            sqlx::query_as(&format!("SELECT {POLICY_COLUMNS} FROM file_policy WHERE id = ?1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        match row {
            Some(row) => policy_from_row(row),
            None => Err(StoreError::NotFound {
                entity: "file policy",
                id,
            }),
        }
    }

    /// One page of policies, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a database error or [`StoreError::Corrupt`].
    pub async fn list_file_policies(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FilePolicy>, StoreError> {
        let rows: Vec<PolicyRow> = sqlx::query_as(&format!(
            "SELECT {POLICY_COLUMNS} FROM file_policy ORDER BY id LIMIT ?1 OFFSET ?2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(policy_from_row).collect()
    }

    /// Every policy, for reconciliation.
    ///
    /// # Errors
    ///
    /// Returns a database error or [`StoreError::Corrupt`].
    pub async fn all_file_policies(&self) -> Result<Vec<FilePolicy>, StoreError> {
        let rows: Vec<PolicyRow> =
            sqlx::query_as(&format!("SELECT {POLICY_COLUMNS} FROM file_policy ORDER BY id"))
                .fetch_all(self.pool())
                .await?;
        rows.into_iter().map(policy_from_row).collect()
    }

    /// Delete one policy.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub async fn delete_file_policy(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM file_policy WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "file policy",
                id,
            });
        }
        Ok(())
    }

    /// Id of the live policy covering `(fsid, ino)`, or 0.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn file_policy_id_for(&self, fsid: u64, ino: u64) -> Result<i64, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM file_policy WHERE fsid = ?1 AND ino = ?2 AND status = 0",
        )
        .bind(to_sql_u64(fsid))
        .bind(to_sql_u64(ino))
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map_or(0, |(id,)| id))
    }

    /// Record a file access as unread.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn insert_file_event(
        &self,
        path: &str,
        fsid: u64,
        ino: u64,
        perm: i32,
        policy: i64,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO file_event (path, fsid, ino, perm, timestamp, policy, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(path)
        .bind(to_sql_u64(fsid))
        .bind(to_sql_u64(ino))
        .bind(perm)
        .bind(unix_now())
        .bind(policy)
        .bind(EventStatus::Unread.code())
        .execute(self.pool())
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// One page of events, newest first.
    ///
    /// # Errors
    ///
    /// Returns a database error or [`StoreError::Corrupt`].
    pub async fn list_file_events(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileEvent>, StoreError> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM file_event ORDER BY id DESC LIMIT ?1 OFFSET ?2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(event_from_row).collect()
    }

    /// Mark an event read or unread.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub async fn set_file_event_status(
        &self,
        id: i64,
        status: EventStatus,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE file_event SET status = ?1 WHERE id = ?2")
            .bind(status.code())
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "file event",
                id,
            });
        }
        Ok(())
    }

    /// Delete one event.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub async fn delete_file_event(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM file_event WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "file event",
                id,
            });
        }
        Ok(())
    }
}
