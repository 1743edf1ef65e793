//! Audited process commands and their trust status.
//!
//! One row per raw signature. Rows are created or bumped by the process
//! worker on every `audit::proc::report` and edited by operators through
//! the administrative API.

use serde::Serialize;

use super::{Store, StoreError};
use crate::codec::Command;

/// What the kernel decided for one launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JudgeOutcome {
    /// The launch went ahead.
    Allowed,
    /// The launch was blocked.
    Denied,
}

impl JudgeOutcome {
    /// Interpret the `judge` field of an audit report.
    ///
    /// The kernel reports 2 for a blocked launch; every other value means
    /// the launch was let through.
    pub fn from_wire(judge: i64) -> Self {
        if judge == 2 {
            Self::Denied
        } else {
            Self::Allowed
        }
    }

    /// Integer persisted in the `judge` column.
    pub fn code(&self) -> i64 {
        match self {
            Self::Allowed => 1,
            Self::Denied => 2,
        }
    }

    fn from_code(value: i64) -> Result<Self, StoreError> {
        match value {
            1 => Ok(Self::Allowed),
            2 => Ok(Self::Denied),
            _ => Err(StoreError::Corrupt {
                field: "process_event.judge",
                value,
            }),
        }
    }
}

/// Operator-facing trust state of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustStatus {
    /// Not yet reviewed.
    Pending,
    /// Reviewed and not trusted.
    Untrusted,
    /// On the kernel trusted list.
    Trusted,
}

impl TrustStatus {
    /// Integer persisted in the `status` column and in the config table.
    pub fn code(&self) -> i64 {
        match self {
            Self::Pending => 0,
            Self::Untrusted => 1,
            Self::Trusted => 2,
        }
    }

    /// Parse a persisted or user-supplied code.
    pub fn from_code(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::Untrusted),
            2 => Some(Self::Trusted),
            _ => None,
        }
    }
}

/// One audited command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessRecord {
    /// Row id.
    pub id: i64,
    /// Raw signature, the uniqueness and trust key.
    pub cmd: String,
    /// Working directory, for display.
    pub workdir: String,
    /// Binary path, for display.
    pub binary: String,
    /// Space-joined argv, for display.
    pub argv: String,
    /// Number of audits seen.
    pub count: i64,
    /// Outcome of the most recent audit.
    pub judge: JudgeOutcome,
    /// Trust state.
    pub status: TrustStatus,
}

/// State of a record right after an audit was folded into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditUpdate {
    /// Row id.
    pub id: i64,
    /// Count after the increment; 1 means the row was just created.
    pub count: i64,
    /// Trust state after the update.
    pub status: TrustStatus,
}

impl AuditUpdate {
    /// Whether this audit created the record.
    pub fn is_new(&self) -> bool {
        self.count == 1
    }
}

type ProcessRow = (i64, String, String, String, String, i64, i64, i64);

fn record_from_row(row: ProcessRow) -> Result<ProcessRecord, StoreError> {
    let (id, cmd, workdir, binary, argv, count, judge, status) = row;
    Ok(ProcessRecord {
        id,
        cmd,
        workdir,
        binary,
        argv,
        count,
        judge: JudgeOutcome::from_code(judge)?,
        status: trust_from_column(status)?,
    })
}

fn trust_from_column(value: i64) -> Result<TrustStatus, StoreError> {
    TrustStatus::from_code(value).ok_or(StoreError::Corrupt {
        field: "process_event.status",
        value,
    })
}

const PROCESS_COLUMNS: &str = "id, cmd, workdir, binary, argv, count, judge, status";

impl Store {
    /// Fold one audit into the record for `cmd`.
    ///
    /// Creates the row with count 1 and `initial_status` if it does not
    /// exist; otherwise increments the count and overwrites the judge
    /// outcome, leaving the status alone. A single upsert statement, so
    /// concurrent audits of the same signature never create two rows.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Command`] if `cmd` is not a valid signature, or
    /// a database error.
    pub async fn record_audit(
        &self,
        cmd: &str,
        outcome: JudgeOutcome,
        initial_status: TrustStatus,
    ) -> Result<AuditUpdate, StoreError> {
        let command = Command::decode(cmd)?;
        let (id, count, status): (i64, i64, i64) = sqlx::query_as(
            "INSERT INTO process_event (cmd, workdir, binary, argv, count, judge, status)
             VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6)
             ON CONFLICT(cmd) DO UPDATE SET count = count + 1, judge = excluded.judge
             RETURNING id, count, status",
        )
        .bind(cmd)
        .bind(&command.workdir)
        .bind(&command.binary)
        .bind(&command.argv)
        .bind(outcome.code())
        .bind(initial_status.code())
        .fetch_one(self.pool())
        .await?;

        Ok(AuditUpdate {
            id,
            count,
            status: trust_from_column(status)?,
        })
    }

    /// Raw signatures of every trusted command.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn trusted_commands(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT cmd FROM process_event WHERE status = ?1 ORDER BY id")
                .bind(TrustStatus::Trusted.code())
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().map(|(cmd,)| cmd).collect())
    }

    /// Fetch one record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub async fn process_record(&self, id: i64) -> Result<ProcessRecord, StoreError> {
        let row: Option<ProcessRow> = sqlx::query_as(&format!(
            "SELECT {PROCESS_COLUMNS} FROM process_event WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?;
        match row {
            Some(row) => record_from_row(row),
            None => Err(StoreError::NotFound {
                entity: "process command",
                id,
            }),
        }
    }

    /// Fetch the record for a raw signature, if any.
    ///
    /// # Errors
    ///
    /// Returns a database error or [`StoreError::Corrupt`].
    pub async fn process_record_by_cmd(
        &self,
        cmd: &str,
    ) -> Result<Option<ProcessRecord>, StoreError> {
        let row: Option<ProcessRow> = sqlx::query_as(&format!(
            "SELECT {PROCESS_COLUMNS} FROM process_event WHERE cmd = ?1"
        ))
        .bind(cmd)
        .fetch_optional(self.pool())
        .await?;
        row.map(record_from_row).transpose()
    }

    /// One page of records, most frequent first.
    ///
    /// # Errors
    ///
    /// Returns a database error or [`StoreError::Corrupt`].
    pub async fn list_process_records(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ProcessRecord>, StoreError> {
        let rows: Vec<ProcessRow> = sqlx::query_as(&format!(
            "SELECT {PROCESS_COLUMNS} FROM process_event
             ORDER BY count DESC, id ASC LIMIT ?1 OFFSET ?2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(record_from_row).collect()
    }

    /// Change the trust status of one record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub async fn set_process_status(&self, id: i64, status: TrustStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE process_event SET status = ?1 WHERE id = ?2")
            .bind(status.code())
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "process command",
                id,
            });
        }
        Ok(())
    }

    /// Mark a pending record trusted. Returns `false` if the record is gone
    /// or no longer pending.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn promote_pending(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE process_event SET status = ?1 WHERE id = ?2 AND status = ?3")
            .bind(TrustStatus::Trusted.code())
            .bind(id)
            .bind(TrustStatus::Pending.code())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Delete one record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub async fn delete_process_record(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM process_event WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "process command",
                id,
            });
        }
        Ok(())
    }
}
