//! File protection worker.
//!
//! Kernel-side file policies are keyed by on-disk identity, which changes
//! whenever a protected file is replaced. Every start therefore re-resolves
//! each stored path and writes back whatever the kernel now reports.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Domain, HandlerError, Kernel, WorkerError};
use crate::codec::{FileSetFlag, Report, Request, Section};
use crate::store::{ConfigKey, PolicyStatus, Store};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Policies re-issued to the kernel.
    pub checked: usize,
    /// Policies whose stored triple was rewritten.
    pub changed: usize,
}

/// Re-issue every stored policy and record identity or status drift.
///
/// Running it twice against an unchanged filesystem changes nothing the
/// second time.
///
/// # Errors
///
/// Returns the first session or store error.
pub async fn reconcile_file_policies(
    store: &Store,
    kernel: &Kernel,
) -> Result<ReconcileSummary, WorkerError> {
    let mut summary = ReconcileSummary::default();

    for policy in store.all_file_policies().await? {
        let reply = kernel
            .exec(&Request::FileSet {
                path: policy.path.clone(),
                perm: policy.perm,
                flag: FileSetFlag::New,
            })
            .await?;
        summary.checked = summary.checked.saturating_add(1);

        let status = PolicyStatus::from_kernel_code(reply.code);
        if (reply.fsid, reply.ino, status) == (policy.fsid, policy.ino, policy.status) {
            continue;
        }

        let written = store
            .reconcile_file_policy(policy.id, reply.fsid, reply.ino, status)
            .await?;
        debug!(id = policy.id, ?written, "file policy drifted");
        summary.changed = summary.changed.saturating_add(1);
    }

    Ok(summary)
}

/// Records file accesses and keeps kernel file policies in sync.
#[derive(Debug)]
pub struct FileDomain {
    store: Store,
}

impl FileDomain {
    /// Create the domain over `store`.
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Domain for FileDomain {
    fn name(&self) -> &'static str {
        "file"
    }

    fn sections(&self) -> &'static [Section] {
        &[Section::FileAccessed]
    }

    async fn reconcile(&self, kernel: &Kernel) -> Result<(), WorkerError> {
        let summary = reconcile_file_policies(&self.store, kernel).await?;
        info!(
            checked = summary.checked,
            changed = summary.changed,
            "file policies reconciled"
        );
        Ok(())
    }

    async fn enable_request(&self) -> Result<Option<Request>, WorkerError> {
        let enabled = self.store.module_enabled(ConfigKey::FileModuleStatus).await?;
        Ok(enabled.then_some(Request::FileEnable))
    }

    fn shutdown_requests(&self) -> Vec<Request> {
        vec![Request::FileDisable, Request::FileClear]
    }

    async fn handle(&self, report: Report, _kernel: &Kernel) -> Result<(), HandlerError> {
        let Report::FileAccessed {
            name,
            fsid,
            ino,
            perm,
        } = report
        else {
            return Ok(());
        };
        let policy = self.store.file_policy_id_for(fsid, ino).await?;
        self.store
            .insert_file_event(&name, fsid, ino, perm, policy)
            .await?;
        Ok(())
    }
}
