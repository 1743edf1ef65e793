//! Key-typed configuration table.
//!
//! Keys form a closed namespace ([`ConfigKey`]). A missing key is a normal
//! state meaning "use the built-in default", so getters return `Option`.

use super::{Store, StoreError};

/// Integer value of a module flag that is switched on.
pub const MODULE_ENABLED: i64 = 1;
/// Integer value of a module flag that is switched off.
pub const MODULE_DISABLED: i64 = 0;

/// Every configuration key the agent reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Process protection on/off.
    ProcessModuleStatus,
    /// Process judge mode: 0 disabled, 1 audit, 2 protect.
    ProcessProtectionMode,
    /// Trust status given to newly seen commands.
    ProcessCmdDefaultStatus,
    /// File protection on/off.
    FileModuleStatus,
    /// Network protection on/off.
    NetModuleStatus,
}

impl ConfigKey {
    /// The key as persisted.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessModuleStatus => "process module status",
            Self::ProcessProtectionMode => "process protection mode",
            Self::ProcessCmdDefaultStatus => "process cmd default status",
            Self::FileModuleStatus => "file module status",
            Self::NetModuleStatus => "net module status",
        }
    }
}

impl Store {
    /// Read an integer entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub async fn get_integer(&self, key: ConfigKey) -> Result<Option<i64>, StoreError> {
        let row: Option<(Option<i64>,)> = sqlx::query_as("SELECT integer FROM config WHERE key = ?1")
            .bind(key.as_str())
            .fetch_optional(self.pool())
            .await?;
        Ok(row.and_then(|(value,)| value))
    }

    /// Write an integer entry, creating the key if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn set_integer(&self, key: ConfigKey, value: i64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO config (key, integer) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET integer = excluded.integer",
        )
        .bind(key.as_str())
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Read a real entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub async fn get_real(&self, key: ConfigKey) -> Result<Option<f64>, StoreError> {
        let row: Option<(Option<f64>,)> = sqlx::query_as("SELECT real FROM config WHERE key = ?1")
            .bind(key.as_str())
            .fetch_optional(self.pool())
            .await?;
        Ok(row.and_then(|(value,)| value))
    }

    /// Write a real entry, creating the key if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn set_real(&self, key: ConfigKey, value: f64) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO config (key, real) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET real = excluded.real",
        )
        .bind(key.as_str())
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Read a text entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub async fn get_text(&self, key: ConfigKey) -> Result<Option<String>, StoreError> {
        let row: Option<(Option<String>,)> = sqlx::query_as("SELECT text FROM config WHERE key = ?1")
            .bind(key.as_str())
            .fetch_optional(self.pool())
            .await?;
        Ok(row.and_then(|(value,)| value))
    }

    /// Write a text entry, creating the key if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database write fails.
    pub async fn set_text(&self, key: ConfigKey, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO config (key, text) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET text = excluded.text",
        )
        .bind(key.as_str())
        .bind(value)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Whether a module flag is set to [`MODULE_ENABLED`]. Unset means off.
    ///
    /// # Errors
    ///
    /// Returns an error if the database read fails.
    pub async fn module_enabled(&self, key: ConfigKey) -> Result<bool, StoreError> {
        Ok(self.get_integer(key).await? == Some(MODULE_ENABLED))
    }
}
