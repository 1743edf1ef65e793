//! Observation counters for the standalone judge.

use serde::Serialize;

use super::{Store, StoreError};

/// How often one signature has been observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JudgeRecord {
    /// Row id.
    pub id: i64,
    /// Raw signature.
    pub cmd: String,
    /// Observation count.
    pub times: i64,
}

impl Store {
    /// Count one observation of `cmd` and return the new total.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn increment_judge(&self, cmd: &str) -> Result<i64, StoreError> {
        let (times,): (i64,) = sqlx::query_as(
            "INSERT INTO judge (cmd, times) VALUES (?1, 1)
             ON CONFLICT(cmd) DO UPDATE SET times = times + 1
             RETURNING times",
        )
        .bind(cmd)
        .fetch_one(self.pool())
        .await?;
        Ok(times)
    }

    /// Observation count for `cmd`; 0 if never seen.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn judge_count(&self, cmd: &str) -> Result<i64, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT times FROM judge WHERE cmd = ?1")
            .bind(cmd)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map_or(0, |(times,)| times))
    }

    /// Signatures observed at least `threshold` times.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn judged_at_least(&self, threshold: i64) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT cmd FROM judge WHERE times >= ?1 ORDER BY id")
                .bind(threshold)
                .fetch_all(self.pool())
                .await?;
        Ok(rows.into_iter().map(|(cmd,)| cmd).collect())
    }

    /// One page of counters, most observed first.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn list_judge_records(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<JudgeRecord>, StoreError> {
        let rows: Vec<(i64, String, i64)> = sqlx::query_as(
            "SELECT id, cmd, times FROM judge ORDER BY times DESC, id ASC LIMIT ?1 OFFSET ?2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, cmd, times)| JudgeRecord { id, cmd, times })
            .collect())
    }
}
