//! Network protection worker.
//!
//! Network policies are pushed one way at startup. The kernel keeps no
//! identity the agent could compare against, so nothing is read back.

use async_trait::async_trait;
use tracing::info;

use super::{Domain, HandlerError, Kernel, WorkerError};
use crate::codec::{Report, Request, Section};
use crate::store::{ConfigKey, Store};

/// Pushes stored network policies and toggles network protection.
#[derive(Debug)]
pub struct NetDomain {
    store: Store,
}

impl NetDomain {
    /// Create the domain over `store`.
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Domain for NetDomain {
    fn name(&self) -> &'static str {
        "net"
    }

    fn sections(&self) -> &'static [Section] {
        &[]
    }

    async fn reconcile(&self, kernel: &Kernel) -> Result<(), WorkerError> {
        let policies = self.store.all_net_policies().await?;
        for policy in &policies {
            kernel
                .exec_checked(&Request::NetInsert(policy.clone()))
                .await?;
        }
        info!(count = policies.len(), "net policies pushed");
        Ok(())
    }

    async fn enable_request(&self) -> Result<Option<Request>, WorkerError> {
        let enabled = self.store.module_enabled(ConfigKey::NetModuleStatus).await?;
        Ok(enabled.then_some(Request::NetEnable))
    }

    fn shutdown_requests(&self) -> Vec<Request> {
        vec![Request::NetDisable, Request::NetClear]
    }

    async fn handle(&self, _report: Report, _kernel: &Kernel) -> Result<(), HandlerError> {
        Ok(())
    }
}
