//! Process protection worker.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{Domain, HandlerError, Kernel, WorkerError};
use crate::codec::{Report, Request, Section};
use crate::store::{ConfigKey, Store};
use crate::trust::{InlineTrust, KeyedLocks};

/// Audits process launches and maintains the kernel trusted list.
#[derive(Debug)]
pub struct ProcessDomain {
    store: Store,
    trust: InlineTrust,
}

impl ProcessDomain {
    /// Create the domain over `store`.
    pub fn new(store: Store) -> Self {
        Self::with_locks(store, Arc::new(KeyedLocks::new()))
    }

    /// Create the domain sharing per-command `locks` with an [`Admin`].
    ///
    /// [`Admin`]: crate::admin::Admin
    pub fn with_locks(store: Store, locks: Arc<KeyedLocks>) -> Self {
        Self {
            trust: InlineTrust::with_locks(store.clone(), locks),
            store,
        }
    }
}

#[async_trait]
impl Domain for ProcessDomain {
    fn name(&self) -> &'static str {
        "process"
    }

    fn sections(&self) -> &'static [Section] {
        &[Section::ProcessAudited]
    }

    async fn reconcile(&self, kernel: &Kernel) -> Result<(), WorkerError> {
        let trusted = self.trust.startup_requests().await?;
        debug!(count = trusted.len(), "pushing trusted commands");
        for request in &trusted {
            kernel.send(request).await?;
        }

        if let Some(judge) = self
            .store
            .get_integer(ConfigKey::ProcessProtectionMode)
            .await?
        {
            kernel.send(&Request::ProcessJudge { judge }).await?;
        }
        Ok(())
    }

    async fn enable_request(&self) -> Result<Option<Request>, WorkerError> {
        let enabled = self
            .store
            .module_enabled(ConfigKey::ProcessModuleStatus)
            .await?;
        Ok(enabled.then_some(Request::ProcessEnable))
    }

    fn shutdown_requests(&self) -> Vec<Request> {
        vec![Request::ProcessDisable]
    }

    async fn handle(&self, report: Report, kernel: &Kernel) -> Result<(), HandlerError> {
        let Report::ProcessAudited { cmd, judge } = report else {
            return Ok(());
        };
        if let Some(promotion) = self.trust.promote(&cmd, judge).await? {
            kernel.send(promotion.request()).await?;
        }
        Ok(())
    }
}
