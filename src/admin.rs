//! Administrative operations for a presentation layer.
//!
//! Every operation persists its change and talks to the kernel through a
//! one-shot session, so it never interferes with a running worker.
//! Failures carry a numeric status code ([`AdminError::status_code`]) that a
//! front end can hand to its clients unchanged; none of them is fatal to the
//! agent.

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::codec::{FileSetFlag, Reply, Request};
use crate::session::{self, Endpoint, SessionError};
use crate::store::config::{MODULE_DISABLED, MODULE_ENABLED};
use crate::store::{
    ConfigKey, EventStatus, FileEvent, FilePolicy, NetPolicy, PolicyStatus, ProcessRecord, Store,
    StoreError, TrustStatus,
};
use crate::trust::KeyedLocks;

/// Status code of a successful operation.
pub const STATUS_SUCCESS: i32 = 0;
/// Status code of an unexpected failure.
pub const STATUS_UNKNOWN_ERROR: i32 = 1;
/// Status code of a rejected argument.
pub const STATUS_INVALID_ARGUMENT: i32 = 4;

/// A protection module that can be switched on and off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Module {
    /// Process execution control.
    Process,
    /// File access control.
    File,
    /// Network traffic control.
    Net,
}

impl Module {
    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::File => "file",
            Self::Net => "net",
        }
    }

    /// Parse a lowercase name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "process" => Some(Self::Process),
            "file" => Some(Self::File),
            "net" => Some(Self::Net),
            _ => None,
        }
    }

    fn config_key(&self) -> ConfigKey {
        match self {
            Self::Process => ConfigKey::ProcessModuleStatus,
            Self::File => ConfigKey::FileModuleStatus,
            Self::Net => ConfigKey::NetModuleStatus,
        }
    }

    fn switch(&self, on: bool) -> (Request, Operation) {
        match (self, on) {
            (Self::Process, true) => (Request::ProcessEnable, Operation::ProcessEnable),
            (Self::Process, false) => (Request::ProcessDisable, Operation::ProcessDisable),
            (Self::File, true) => (Request::FileEnable, Operation::FileEnable),
            (Self::File, false) => (Request::FileDisable, Operation::FileDisable),
            (Self::Net, true) => (Request::NetEnable, Operation::NetEnable),
            (Self::Net, false) => (Request::NetDisable, Operation::NetDisable),
        }
    }
}

/// Administrative operation, used to pick a failure status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Change the judge mode.
    UpdateJudge,
    /// Change a command's trust status.
    UpdateCommandStatus,
    /// Read process commands or process settings.
    QueryCommands,
    /// Switch process protection on.
    ProcessEnable,
    /// Switch process protection off.
    ProcessDisable,
    /// Add a file policy.
    AddFilePolicy,
    /// Delete a file policy.
    DeleteFilePolicy,
    /// List file policies.
    ListFilePolicies,
    /// Read one file policy.
    QueryFilePolicy,
    /// List file events.
    ListFileEvents,
    /// Delete a file event.
    DeleteFileEvent,
    /// Change a file policy's permissions.
    UpdateFilePolicy,
    /// Switch file protection on.
    FileEnable,
    /// Switch file protection off.
    FileDisable,
    /// Change the default status of new commands.
    UpdateDefaultStatus,
    /// Read the default status of new commands.
    QueryDefaultStatus,
    /// Switch network protection on.
    NetEnable,
    /// Switch network protection off.
    NetDisable,
    /// Add a network policy.
    AddNetPolicy,
    /// Delete a network policy.
    DeleteNetPolicy,
    /// List network policies.
    ListNetPolicies,
    /// Mark a file event read or unread.
    UpdateFileEvent,
    /// Delete a process command.
    DeleteCommand,
    /// Read a module flag.
    QueryModule,
    /// Kernel passthrough.
    Exec,
}

impl Operation {
    /// Status code reported when this operation fails.
    pub fn failure_code(&self) -> i32 {
        match self {
            Self::UpdateJudge => 10,
            Self::UpdateCommandStatus => 11,
            Self::QueryCommands => 12,
            Self::ProcessEnable => 13,
            Self::ProcessDisable => 14,
            Self::AddFilePolicy => 17,
            Self::DeleteFilePolicy => 18,
            Self::ListFilePolicies => 19,
            Self::QueryFilePolicy => 20,
            Self::ListFileEvents => 21,
            Self::DeleteFileEvent => 22,
            Self::UpdateFilePolicy => 25,
            Self::FileEnable => 26,
            Self::FileDisable => 27,
            Self::UpdateDefaultStatus => 28,
            Self::QueryDefaultStatus => 29,
            Self::NetEnable => 30,
            Self::NetDisable => 31,
            Self::AddNetPolicy => 32,
            Self::DeleteNetPolicy => 33,
            Self::ListNetPolicies => 34,
            Self::UpdateFileEvent => 35,
            Self::DeleteCommand => 36,
            Self::QueryModule => 37,
            Self::Exec => 38,
        }
    }

    fn conflict_code(&self) -> i32 {
        match self {
            Self::AddFilePolicy => 15,
            Self::UpdateFilePolicy => 23,
            other => other.failure_code(),
        }
    }

    fn file_not_exist_code(&self) -> i32 {
        match self {
            Self::AddFilePolicy => 16,
            Self::UpdateFilePolicy => 24,
            other => other.failure_code(),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Failure of an administrative operation.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    /// A caller-supplied value is out of range or unparsable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The referenced row does not exist.
    #[error("{op}: {entity} {id} not found")]
    NotFound {
        /// Failed operation.
        op: Operation,
        /// Entity name.
        entity: &'static str,
        /// Requested id.
        id: i64,
    },
    /// Another live file policy already covers the path's identity.
    #[error("{op}: policy conflict")]
    Conflict {
        /// Failed operation.
        op: Operation,
    },
    /// The policy path does not exist.
    #[error("{op}: file does not exist")]
    FileNotExist {
        /// Failed operation.
        op: Operation,
    },
    /// The kernel answered with a code outside the known set.
    #[error("{op}: unexpected kernel code {code}")]
    Unknown {
        /// Failed operation.
        op: Operation,
        /// Reply code.
        code: i32,
    },
    /// The kernel refused the request.
    #[error("{op}: kernel refused with code {code}")]
    Refused {
        /// Failed operation.
        op: Operation,
        /// Reply code.
        code: i32,
    },
    /// The kernel could not be reached or did not answer in time.
    #[error("{op}: {source}")]
    Session {
        /// Failed operation.
        op: Operation,
        /// Session failure.
        source: SessionError,
    },
    /// The store failed.
    #[error("{op}: {source}")]
    Store {
        /// Failed operation.
        op: Operation,
        /// Store failure.
        source: StoreError,
    },
}

impl AdminError {
    /// Numeric status for clients.
    pub fn status_code(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) | Self::NotFound { .. } => STATUS_INVALID_ARGUMENT,
            Self::Unknown { .. } => STATUS_UNKNOWN_ERROR,
            Self::Conflict { op } => op.conflict_code(),
            Self::FileNotExist { op } => op.file_not_exist_code(),
            Self::Refused { op, .. } | Self::Session { op, .. } | Self::Store { op, .. } => {
                op.failure_code()
            }
        }
    }

    fn store(op: Operation) -> impl FnOnce(StoreError) -> Self {
        move |source| match source {
            StoreError::NotFound { entity, id } => Self::NotFound { op, entity, id },
            StoreError::Conflict { .. } => Self::Conflict { op },
            source => Self::Store { op, source },
        }
    }

    fn session(op: Operation) -> impl FnOnce(SessionError) -> Self {
        move |source| Self::Session { op, source }
    }
}

fn check_page(limit: i64, offset: i64) -> Result<(), AdminError> {
    if limit < 0 || offset < 0 {
        return Err(AdminError::InvalidArgument(format!(
            "limit {limit} and offset {offset} must not be negative"
        )));
    }
    Ok(())
}

/// Entry point for administrative callers.
#[derive(Debug, Clone)]
pub struct Admin {
    store: Store,
    endpoint: Endpoint,
    locks: Arc<KeyedLocks>,
}

impl Admin {
    /// Create an API over `store`, reaching the kernel through `endpoint`.
    pub fn new(store: Store, endpoint: Endpoint) -> Self {
        Self::with_locks(store, endpoint, Arc::new(KeyedLocks::new()))
    }

    /// Create an API that serializes command status changes with a process
    /// worker built on the same `locks`.
    pub fn with_locks(store: Store, endpoint: Endpoint, locks: Arc<KeyedLocks>) -> Self {
        Self {
            store,
            endpoint,
            locks,
        }
    }

    async fn exec(&self, op: Operation, request: &Request) -> Result<Reply, AdminError> {
        session::exec(&self.endpoint, request, self.endpoint.exec_timeout)
            .await
            .map_err(AdminError::session(op))
    }

    async fn exec_checked(&self, op: Operation, request: &Request) -> Result<Reply, AdminError> {
        let reply = self.exec(op, request).await?;
        if !reply.is_success() {
            return Err(AdminError::Refused {
                op,
                code: reply.code,
            });
        }
        Ok(reply)
    }

    // ── Modules ─────────────────────────────────────────────────

    /// Whether the module flag is on. Unset reads as off.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn module_status(&self, module: Module) -> Result<bool, AdminError> {
        self.store
            .module_enabled(module.config_key())
            .await
            .map_err(AdminError::store(Operation::QueryModule))
    }

    /// Persist the flag, then switch the module on in the kernel.
    ///
    /// # Errors
    ///
    /// Returns a store, session or refusal error.
    pub async fn enable(&self, module: Module) -> Result<(), AdminError> {
        self.switch(module, true).await
    }

    /// Persist the flag, then switch the module off in the kernel.
    ///
    /// # Errors
    ///
    /// Returns a store, session or refusal error.
    pub async fn disable(&self, module: Module) -> Result<(), AdminError> {
        self.switch(module, false).await
    }

    async fn switch(&self, module: Module, on: bool) -> Result<(), AdminError> {
        let (request, op) = module.switch(on);
        let flag = if on { MODULE_ENABLED } else { MODULE_DISABLED };
        self.store
            .set_integer(module.config_key(), flag)
            .await
            .map_err(AdminError::store(op))?;
        self.exec_checked(op, &request).await?;
        info!(module = module.as_str(), enabled = on, "module switched");
        Ok(())
    }

    // ── Process ─────────────────────────────────────────────────

    /// Persist and apply the judge mode (0 disabled, 1 audit, 2 protect).
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::InvalidArgument`] for a mode outside 0..=2.
    pub async fn set_judge_mode(&self, mode: i64) -> Result<(), AdminError> {
        if !(0..=2).contains(&mode) {
            return Err(AdminError::InvalidArgument(format!(
                "judge mode {mode} is not 0, 1 or 2"
            )));
        }
        let op = Operation::UpdateJudge;
        self.store
            .set_integer(ConfigKey::ProcessProtectionMode, mode)
            .await
            .map_err(AdminError::store(op))?;
        self.exec_checked(op, &Request::ProcessJudge { judge: mode })
            .await?;
        Ok(())
    }

    /// The persisted judge mode; 0 when unset.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn judge_mode(&self) -> Result<i64, AdminError> {
        let mode = self
            .store
            .get_integer(ConfigKey::ProcessProtectionMode)
            .await
            .map_err(AdminError::store(Operation::QueryCommands))?;
        Ok(mode.unwrap_or(0))
    }

    /// Set the status given to newly seen commands.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::InvalidArgument`] for an unknown status code.
    pub async fn set_default_status(&self, status: i64) -> Result<(), AdminError> {
        if TrustStatus::from_code(status).is_none() {
            return Err(AdminError::InvalidArgument(format!(
                "trust status {status} is not 0, 1 or 2"
            )));
        }
        self.store
            .set_integer(ConfigKey::ProcessCmdDefaultStatus, status)
            .await
            .map_err(AdminError::store(Operation::UpdateDefaultStatus))
    }

    /// The status given to newly seen commands; pending when unset.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub async fn default_status(&self) -> Result<TrustStatus, AdminError> {
        let status = self
            .store
            .get_integer(ConfigKey::ProcessCmdDefaultStatus)
            .await
            .map_err(AdminError::store(Operation::QueryDefaultStatus))?;
        Ok(status
            .and_then(TrustStatus::from_code)
            .unwrap_or(TrustStatus::Pending))
    }

    /// One page of audited commands.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::InvalidArgument`] for a negative page, or a
    /// store error.
    pub async fn list_commands(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ProcessRecord>, AdminError> {
        check_page(limit, offset)?;
        self.store
            .list_process_records(limit, offset)
            .await
            .map_err(AdminError::store(Operation::QueryCommands))
    }

    /// Record a command's status, then trust or distrust it in the kernel.
    ///
    /// Holds the command's lock throughout, so an automatic promotion of the
    /// same command lands either fully before or fully after. If the kernel
    /// refuses, the previous status is restored.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::InvalidArgument`] for an unknown status code or
    /// id, or a session, refusal or store error.
    pub async fn set_command_status(&self, id: i64, status: i64) -> Result<(), AdminError> {
        let op = Operation::UpdateCommandStatus;
        let status = TrustStatus::from_code(status).ok_or_else(|| {
            AdminError::InvalidArgument(format!("trust status {status} is not 0, 1 or 2"))
        })?;
        let cmd = self
            .store
            .process_record(id)
            .await
            .map_err(AdminError::store(op))?
            .cmd;

        let _guard = self.locks.lock(&cmd).await;
        let previous = self
            .store
            .process_record(id)
            .await
            .map_err(AdminError::store(op))?
            .status;
        self.store
            .set_process_status(id, status)
            .await
            .map_err(AdminError::store(op))?;

        let request = match status {
            TrustStatus::Trusted => Request::TrustedInsert { cmd },
            TrustStatus::Pending | TrustStatus::Untrusted => Request::TrustedDelete { cmd },
        };
        if let Err(e) = self.exec_checked(op, &request).await {
            if let Err(restore) = self.store.set_process_status(id, previous).await {
                warn!(id, error = %restore, "failed to restore command status");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Forget a command, withdrawing it from the kernel if it was trusted.
    ///
    /// # Errors
    ///
    /// Returns a session, refusal or store error.
    pub async fn delete_command(&self, id: i64) -> Result<(), AdminError> {
        let op = Operation::DeleteCommand;
        let cmd = self
            .store
            .process_record(id)
            .await
            .map_err(AdminError::store(op))?
            .cmd;

        let _guard = self.locks.lock(&cmd).await;
        let record = self
            .store
            .process_record(id)
            .await
            .map_err(AdminError::store(op))?;
        if record.status == TrustStatus::Trusted {
            self.exec_checked(op, &Request::TrustedDelete { cmd: record.cmd })
                .await?;
        }
        self.store
            .delete_process_record(id)
            .await
            .map_err(AdminError::store(op))
    }

    // ── File ────────────────────────────────────────────────────

    fn check_file_status(op: Operation, code: i32) -> Result<(), AdminError> {
        match PolicyStatus::from_kernel_code(code) {
            PolicyStatus::Normal => Ok(()),
            PolicyStatus::Conflict => Err(AdminError::Conflict { op }),
            PolicyStatus::FileNotExist => Err(AdminError::FileNotExist { op }),
            PolicyStatus::Unknown => Err(AdminError::Unknown { op, code }),
        }
    }

    /// Install a new file policy and store it. Returns the policy id.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::Conflict`], [`AdminError::FileNotExist`] or
    /// [`AdminError::Unknown`] depending on the kernel's verdict; nothing is
    /// stored in those cases.
    pub async fn add_file_policy(&self, path: &str, perm: i32) -> Result<i64, AdminError> {
        let op = Operation::AddFilePolicy;
        let reply = self
            .exec(
                op,
                &Request::FileSet {
                    path: path.to_owned(),
                    perm,
                    flag: FileSetFlag::New,
                },
            )
            .await?;
        Self::check_file_status(op, reply.code)?;

        self.store
            .insert_file_policy(path, reply.fsid, reply.ino, perm, PolicyStatus::Normal)
            .await
            .map_err(AdminError::store(op))
    }

    /// Change the permissions of an existing policy.
    ///
    /// # Errors
    ///
    /// As [`Admin::add_file_policy`], plus [`AdminError::NotFound`].
    pub async fn update_file_policy(&self, id: i64, perm: i32) -> Result<(), AdminError> {
        let op = Operation::UpdateFilePolicy;
        let policy = self
            .store
            .file_policy(id)
            .await
            .map_err(AdminError::store(op))?;
        let reply = self
            .exec(
                op,
                &Request::FileSet {
                    path: policy.path,
                    perm,
                    flag: FileSetFlag::Update,
                },
            )
            .await?;
        Self::check_file_status(op, reply.code)?;

        self.store
            .update_file_policy(id, reply.fsid, reply.ino, perm, PolicyStatus::Normal)
            .await
            .map_err(AdminError::store(op))
    }

    /// Drop a policy from the kernel and the store.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::NotFound`], or a session or store error.
    pub async fn delete_file_policy(&self, id: i64) -> Result<(), AdminError> {
        let op = Operation::DeleteFilePolicy;
        let policy = self
            .store
            .file_policy(id)
            .await
            .map_err(AdminError::store(op))?;
        let reply = self
            .exec(
                op,
                &Request::FileSet {
                    path: policy.path,
                    perm: 0,
                    flag: FileSetFlag::Any,
                },
            )
            .await?;
        if !reply.is_success() {
            warn!(id, code = reply.code, "kernel kept no policy for deleted path");
        }
        self.store
            .delete_file_policy(id)
            .await
            .map_err(AdminError::store(op))
    }

    /// Read one policy.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::NotFound`] or a store error.
    pub async fn file_policy(&self, id: i64) -> Result<FilePolicy, AdminError> {
        self.store
            .file_policy(id)
            .await
            .map_err(AdminError::store(Operation::QueryFilePolicy))
    }

    /// One page of file policies.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::InvalidArgument`] or a store error.
    pub async fn list_file_policies(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FilePolicy>, AdminError> {
        check_page(limit, offset)?;
        self.store
            .list_file_policies(limit, offset)
            .await
            .map_err(AdminError::store(Operation::ListFilePolicies))
    }

    /// One page of file events, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::InvalidArgument`] or a store error.
    pub async fn list_file_events(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<FileEvent>, AdminError> {
        check_page(limit, offset)?;
        self.store
            .list_file_events(limit, offset)
            .await
            .map_err(AdminError::store(Operation::ListFileEvents))
    }

    /// Mark an event read (1) or unread (0).
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::InvalidArgument`] for another code,
    /// [`AdminError::NotFound`], or a store error.
    pub async fn set_file_event_status(&self, id: i64, status: i64) -> Result<(), AdminError> {
        let status = EventStatus::from_code(status).ok_or_else(|| {
            AdminError::InvalidArgument(format!("event status {status} is not 0 or 1"))
        })?;
        self.store
            .set_file_event_status(id, status)
            .await
            .map_err(AdminError::store(Operation::UpdateFileEvent))
    }

    /// Delete one event.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::NotFound`] or a store error.
    pub async fn delete_file_event(&self, id: i64) -> Result<(), AdminError> {
        self.store
            .delete_file_event(id)
            .await
            .map_err(AdminError::store(Operation::DeleteFileEvent))
    }

    // ── Net ─────────────────────────────────────────────────────

    /// Store a policy and install it under its new id. Returns the id.
    ///
    /// If the kernel refuses the policy the row is removed again.
    ///
    /// # Errors
    ///
    /// Returns a store, session or refusal error.
    pub async fn add_net_policy(&self, policy: &NetPolicy) -> Result<i64, AdminError> {
        let op = Operation::AddNetPolicy;
        let id = self
            .store
            .insert_net_policy(policy)
            .await
            .map_err(AdminError::store(op))?;

        let mut stored = policy.clone();
        stored.id = id;
        if let Err(e) = self.exec_checked(op, &Request::NetInsert(stored)).await {
            if let Err(cleanup) = self.store.delete_net_policy(id).await {
                warn!(id, error = %cleanup, "failed to roll back refused net policy");
            }
            return Err(e);
        }
        Ok(id)
    }

    /// Remove a policy from the kernel, then from the store.
    ///
    /// # Errors
    ///
    /// Returns a session, refusal or store error.
    pub async fn delete_net_policy(&self, id: i64) -> Result<(), AdminError> {
        let op = Operation::DeleteNetPolicy;
        self.exec_checked(op, &Request::NetDelete { id }).await?;
        self.store
            .delete_net_policy(id)
            .await
            .map_err(AdminError::store(op))
    }

    /// One page of network policies in evaluation order.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::InvalidArgument`] or a store error.
    pub async fn list_net_policies(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<NetPolicy>, AdminError> {
        check_page(limit, offset)?;
        self.store
            .list_net_policies(limit, offset)
            .await
            .map_err(AdminError::store(Operation::ListNetPolicies))
    }

    // ── Passthrough ─────────────────────────────────────────────

    /// Round-trip `extra` through the kernel and return what came back.
    ///
    /// # Errors
    ///
    /// Returns a session or refusal error.
    pub async fn echo(&self, extra: serde_json::Value) -> Result<serde_json::Value, AdminError> {
        let reply = self
            .exec_checked(Operation::Exec, &Request::Echo { extra })
            .await?;
        Ok(reply.extra.unwrap_or(serde_json::Value::Null))
    }

    /// Ask the kernel-side daemon to exit.
    ///
    /// # Errors
    ///
    /// Returns a session or refusal error.
    pub async fn shutdown_kernel(&self) -> Result<(), AdminError> {
        self.exec_checked(Operation::Exec, &Request::Exit).await?;
        Ok(())
    }

    /// Send a caller-built JSON request and return the raw reply.
    ///
    /// # Errors
    ///
    /// Returns [`AdminError::InvalidArgument`] if `json` is not a JSON
    /// object, or a session error.
    pub async fn exec_raw(&self, json: &str) -> Result<String, AdminError> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| AdminError::InvalidArgument(format!("request is not JSON: {e}")))?;
        if !value.is_object() {
            return Err(AdminError::InvalidArgument(
                "request must be a JSON object".to_owned(),
            ));
        }
        let reply = session::exec_raw(&self.endpoint, json.as_bytes(), self.endpoint.exec_timeout)
            .await
            .map_err(AdminError::session(Operation::Exec))?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }
}
