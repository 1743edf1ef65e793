//! Standalone judging worker.
//!
//! Counts passive launch observations and trusts a command once it has been
//! seen often enough. Process protection is always switched on while this
//! worker runs.

use async_trait::async_trait;
use tracing::debug;

use super::{Domain, HandlerError, Kernel, WorkerError};
use crate::codec::{Report, Request, Section};
use crate::store::Store;
use crate::trust::JudgeEngine;

/// Threshold-based trust promotion.
#[derive(Debug)]
pub struct JudgeDomain {
    engine: JudgeEngine,
}

impl JudgeDomain {
    /// Create the domain promoting at `threshold` observations.
    pub fn new(store: Store, threshold: i64) -> Self {
        Self {
            engine: JudgeEngine::new(store, threshold),
        }
    }

    /// The underlying engine.
    pub fn engine(&self) -> &JudgeEngine {
        &self.engine
    }
}

#[async_trait]
impl Domain for JudgeDomain {
    fn name(&self) -> &'static str {
        "judge"
    }

    fn sections(&self) -> &'static [Section] {
        &[Section::ProcessAudited, Section::ProcessObserved]
    }

    async fn reconcile(&self, kernel: &Kernel) -> Result<(), WorkerError> {
        let requests = self.engine.startup_requests().await?;
        debug!(count = requests.len(), "pushing judged commands");
        for request in &requests {
            kernel.send(request).await?;
        }
        Ok(())
    }

    async fn enable_request(&self) -> Result<Option<Request>, WorkerError> {
        Ok(Some(Request::ProcessEnable))
    }

    fn shutdown_requests(&self) -> Vec<Request> {
        vec![Request::ProcessDisable]
    }

    async fn handle(&self, report: Report, kernel: &Kernel) -> Result<(), HandlerError> {
        match report {
            Report::ProcessObserved { cmd } => {
                self.engine.observe_kernel(&cmd).await?;
            }
            Report::ProcessAudited { cmd, .. } => {
                if let Some(request) = self.engine.observe_audit(&cmd).await? {
                    kernel.send(&request).await?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}
