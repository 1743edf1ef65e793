//! Automatic trust decisions for process commands.
//!
//! Two engines decide when a command signature goes onto the kernel trusted
//! list. [`InlineTrust`] runs inside the process worker and follows the
//! operator's default status; [`JudgeEngine`] backs the standalone judge and
//! promotes signatures seen often enough. Both work on the raw signature and
//! serialize their read-modify-write sequences per signature.

pub mod locks;

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info};

use crate::codec::Request;
use crate::store::{ConfigKey, JudgeOutcome, Store, StoreError, TrustStatus};

pub use locks::KeyedLocks;

/// Observation count at which the standalone judge trusts a signature.
pub const DEFAULT_JUDGE_THRESHOLD: i64 = 3;

/// Status for a record seen for the first time.
///
/// A trusted default only applies to launches the kernel let through;
/// a blocked launch starts out pending for review.
pub fn initial_status(default: TrustStatus, outcome: JudgeOutcome) -> TrustStatus {
    match (default, outcome) {
        (TrustStatus::Trusted, JudgeOutcome::Denied) => TrustStatus::Pending,
        (default, _) => default,
    }
}

/// A trusted-list insert that still holds its signature's lock.
///
/// Send [`Promotion::request`] before dropping the value so that an
/// operator change to the same command cannot reach the kernel in between.
#[derive(Debug)]
pub struct Promotion {
    request: Request,
    _guard: OwnedMutexGuard<()>,
}

impl Promotion {
    /// The insert to send.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Release the lock and keep the request.
    pub fn into_request(self) -> Request {
        self.request
    }
}

/// Trust engine of the process worker.
#[derive(Debug)]
pub struct InlineTrust {
    store: Store,
    locks: Arc<KeyedLocks>,
}

impl InlineTrust {
    /// Create an engine over `store` with its own lock family.
    pub fn new(store: Store) -> Self {
        Self::with_locks(store, Arc::new(KeyedLocks::new()))
    }

    /// Create an engine sharing `locks` with other writers of command status.
    pub fn with_locks(store: Store, locks: Arc<KeyedLocks>) -> Self {
        Self { store, locks }
    }

    /// The configured default status; pending when unset or out of range.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn default_status(&self) -> Result<TrustStatus, StoreError> {
        let configured = self
            .store
            .get_integer(ConfigKey::ProcessCmdDefaultStatus)
            .await?;
        Ok(configured
            .and_then(TrustStatus::from_code)
            .unwrap_or(TrustStatus::Pending))
    }

    /// Fold an audit into the store and decide whether to push the command.
    ///
    /// Same as [`InlineTrust::promote`] without holding the lock afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Command`] for a malformed signature, or a
    /// database error.
    pub async fn observe_audit(&self, cmd: &str, judge: i64) -> Result<Option<Request>, StoreError> {
        Ok(self.promote(cmd, judge).await?.map(Promotion::into_request))
    }

    /// Fold an audit into the store and return the insert to push, if any.
    ///
    /// With a trusted default and an allowed launch the command is trusted
    /// immediately: a new record is created trusted and a pending one is
    /// promoted. Promotion only succeeds while the row is still pending, so
    /// a record an operator marked untrusted is left alone.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Command`] for a malformed signature, or a
    /// database error.
    pub async fn promote(&self, cmd: &str, judge: i64) -> Result<Option<Promotion>, StoreError> {
        let guard = self.locks.lock(cmd).await;

        let default = self.default_status().await?;
        let outcome = JudgeOutcome::from_wire(judge);
        let update = self
            .store
            .record_audit(cmd, outcome, initial_status(default, outcome))
            .await?;

        let auto_trust = default == TrustStatus::Trusted && outcome == JudgeOutcome::Allowed;
        if !auto_trust {
            return Ok(None);
        }

        match update.status {
            TrustStatus::Trusted if update.is_new() => {}
            TrustStatus::Trusted | TrustStatus::Untrusted => return Ok(None),
            TrustStatus::Pending => {
                if !self.store.promote_pending(update.id).await? {
                    return Ok(None);
                }
            }
        }

        debug!(id = update.id, "command trusted by default status");
        Ok(Some(Promotion {
            request: Request::TrustedInsert {
                cmd: cmd.to_owned(),
            },
            _guard: guard,
        }))
    }

    /// Trusted-list inserts for every trusted record.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn startup_requests(&self) -> Result<Vec<Request>, StoreError> {
        let commands = self.store.trusted_commands().await?;
        Ok(commands
            .into_iter()
            .map(|cmd| Request::TrustedInsert { cmd })
            .collect())
    }
}

/// Threshold engine of the standalone judge.
///
/// Observations are counted from `kernel::proc::report`; the check happens
/// on `audit::proc::report`. A signature is pushed at most once per engine
/// lifetime.
#[derive(Debug)]
pub struct JudgeEngine {
    store: Store,
    threshold: i64,
    locks: KeyedLocks,
    promoted: Mutex<HashSet<String>>,
}

impl JudgeEngine {
    /// Create an engine promoting at `threshold` observations.
    pub fn new(store: Store, threshold: i64) -> Self {
        Self {
            store,
            threshold,
            locks: KeyedLocks::new(),
            promoted: Mutex::new(HashSet::new()),
        }
    }

    /// Promotion threshold.
    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    /// Count one passive observation and return the new total.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn observe_kernel(&self, cmd: &str) -> Result<i64, StoreError> {
        let _guard = self.locks.lock(cmd).await;
        self.store.increment_judge(cmd).await
    }

    /// Decide whether an audited signature should go onto the trusted list.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn observe_audit(&self, cmd: &str) -> Result<Option<Request>, StoreError> {
        let _guard = self.locks.lock(cmd).await;

        let times = self.store.judge_count(cmd).await?;
        if times < self.threshold || !self.mark_promoted(cmd) {
            return Ok(None);
        }

        info!(times, threshold = self.threshold, "promoting command to trusted");
        Ok(Some(Request::TrustedInsert {
            cmd: cmd.to_owned(),
        }))
    }

    /// Trusted-list inserts for every signature already over the threshold.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn startup_requests(&self) -> Result<Vec<Request>, StoreError> {
        let commands = self.store.judged_at_least(self.threshold).await?;
        Ok(commands
            .into_iter()
            .filter(|cmd| self.mark_promoted(cmd))
            .map(|cmd| Request::TrustedInsert { cmd })
            .collect())
    }

    /// Returns `true` the first time `cmd` is marked.
    fn mark_promoted(&self, cmd: &str) -> bool {
        self.promoted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cmd.to_owned())
    }
}
