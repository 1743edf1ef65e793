//! Domain workers: one kernel session, one receive loop, per domain.
//!
//! A [`Worker`] drives the lifecycle shared by every domain
//! (`stopped → starting → running → stopping → stopped`); the domain itself
//! plugs in through the [`Domain`] trait, supplying its subscriptions,
//! startup reconciliation, enable/disable commands and event handling.

pub mod file;
pub mod judge;
pub mod net;
pub mod process;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::codec::{Reply, Report, Request, Section};
use crate::fatal::{FatalReason, FatalSignal};
use crate::session::{self, Endpoint, Session, SessionError};
use crate::store::{Store, StoreError};
use crate::watchdog::Watchdog;

pub use file::FileDomain;
pub use judge::JudgeDomain;
pub use net::NetDomain;
pub use process::ProcessDomain;

/// Default heartbeat watchdog interval.
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(10);
/// Default pause between the disable commands and closing the session.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(1);
/// Default bound on waiting for in-flight handlers during stop.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors raised while starting or stopping a worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// `start` was called on a worker that is not stopped.
    #[error("{worker} worker cannot start while {state}")]
    InvalidState {
        /// Worker name.
        worker: &'static str,
        /// Current state.
        state: WorkerState,
    },
    /// The kernel session failed.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The policy store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The kernel acknowledged a request with a failure code.
    #[error("kernel refused {request} with code {code}")]
    Refused {
        /// Wire tag of the refused request.
        request: &'static str,
        /// Reply code.
        code: i32,
    },
    /// The receive loop panicked or was cancelled.
    #[error("receive loop ended abnormally: {0}")]
    Join(#[from] tokio::task::JoinError),
    /// In-flight handlers did not finish within the drain timeout.
    #[error("{pending} event handlers still running after {timeout:?}")]
    DrainTimeout {
        /// Handlers still running.
        pending: usize,
        /// Drain bound that elapsed.
        timeout: Duration,
    },
}

/// Errors raised while handling a single event. Never fatal.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Persisting the event failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Sending a follow-up command failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not connected.
    Stopped,
    /// Connecting, subscribing and reconciling.
    Starting,
    /// Receive loop active.
    Running,
    /// Tearing down.
    Stopping,
}

impl WorkerState {
    /// Lowercase name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A worker's link to the kernel module.
///
/// `send` goes over the worker's own subscription session; `exec` opens a
/// throwaway session so the reply cannot be confused with pushed events.
#[derive(Debug)]
pub struct Kernel {
    session: Arc<Session>,
    endpoint: Endpoint,
}

impl Kernel {
    /// Open a standalone link, outside any worker.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connect`] if the kernel socket is absent.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, SessionError> {
        let session = Session::connect(endpoint).await?;
        Ok(Self {
            session: Arc::new(session),
            endpoint: endpoint.clone(),
        })
    }

    /// Close the subscription session.
    pub fn close(&self) {
        self.session.close();
    }

    /// Fire-and-forget a request on the subscription session.
    ///
    /// # Errors
    ///
    /// Returns a session error if the datagram cannot be written.
    pub async fn send(&self, request: &Request) -> Result<(), SessionError> {
        trace!(request = request.kind(), "sending request");
        self.session.send_request(request).await
    }

    /// Request/response on a one-shot session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] if no reply arrives within the
    /// endpoint's exec timeout.
    pub async fn exec(&self, request: &Request) -> Result<Reply, SessionError> {
        session::exec(&self.endpoint, request, self.endpoint.exec_timeout).await
    }

    /// Like [`Kernel::exec`], failing on a non-zero reply code.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Refused`] on a failure code.
    pub async fn exec_checked(&self, request: &Request) -> Result<Reply, WorkerError> {
        let reply = self.exec(request).await?;
        if !reply.is_success() {
            return Err(WorkerError::Refused {
                request: request.kind(),
                code: reply.code,
            });
        }
        Ok(reply)
    }
}

/// Domain-specific behaviour plugged into a [`Worker`].
#[async_trait]
pub trait Domain: Send + Sync + 'static {
    /// Short name used in logs and fatal reasons.
    fn name(&self) -> &'static str;

    /// Event classes to subscribe to besides the heartbeat.
    fn sections(&self) -> &'static [Section];

    /// Bring kernel state in line with the store. Runs before the receive
    /// loop starts; an error aborts startup.
    async fn reconcile(&self, kernel: &Kernel) -> Result<(), WorkerError>;

    /// The enable command, if the domain's module flag says to send one.
    async fn enable_request(&self) -> Result<Option<Request>, WorkerError>;

    /// Commands sent during stop, after unsubscribing.
    fn shutdown_requests(&self) -> Vec<Request>;

    /// Handle one pushed report.
    async fn handle(&self, report: Report, kernel: &Kernel) -> Result<(), HandlerError>;
}

/// Timing knobs for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Heartbeat watchdog interval.
    pub watchdog_interval: Duration,
    /// Pause after the disable commands before closing the session.
    pub settle: Duration,
    /// Bound on waiting for in-flight handlers.
    pub drain_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            settle: DEFAULT_SETTLE,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// One failed step of a stop sequence.
#[derive(Debug)]
pub struct StepFailure {
    /// What was being attempted.
    pub step: String,
    /// Why it failed.
    pub error: WorkerError,
}

/// Outcome of [`Worker::stop`]. Every step is attempted; failures are
/// collected here instead of aborting the sequence.
#[derive(Debug)]
pub struct ShutdownReport {
    /// Worker name.
    pub worker: &'static str,
    /// Steps that failed, in order.
    pub failures: Vec<StepFailure>,
}

impl ShutdownReport {
    fn new(worker: &'static str) -> Self {
        Self {
            worker,
            failures: Vec::new(),
        }
    }

    fn record(&mut self, step: impl Into<String>, error: impl Into<WorkerError>) {
        let step = step.into();
        let error = error.into();
        warn!(worker = self.worker, step = %step, error = %error, "stop step failed");
        self.failures.push(StepFailure { step, error });
    }

    /// Whether every step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

struct Active {
    kernel: Arc<Kernel>,
    running: Arc<AtomicBool>,
    tracker: TaskTracker,
    receive_loop: JoinHandle<()>,
}

/// Lifecycle driver for one [`Domain`].
pub struct Worker<D: Domain> {
    domain: Arc<D>,
    store: Store,
    endpoint: Endpoint,
    settings: WorkerSettings,
    fatal: FatalSignal,
    state: WorkerState,
    active: Option<Active>,
}

impl<D: Domain> Worker<D> {
    /// Create a stopped worker.
    pub fn new(
        domain: D,
        store: Store,
        endpoint: Endpoint,
        settings: WorkerSettings,
        fatal: FatalSignal,
    ) -> Self {
        Self {
            domain: Arc::new(domain),
            store,
            endpoint,
            settings,
            fatal,
            state: WorkerState::Stopped,
            active: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// The domain this worker drives.
    pub fn domain(&self) -> &D {
        &self.domain
    }

    /// Connect, subscribe, reconcile, optionally enable, then start receiving.
    ///
    /// On failure the session is closed and the worker is back in
    /// [`WorkerState::Stopped`].
    ///
    /// # Errors
    ///
    /// Returns the first error of the startup sequence.
    pub async fn start(&mut self) -> Result<(), WorkerError> {
        let worker = self.domain.name();
        if self.state != WorkerState::Stopped {
            return Err(WorkerError::InvalidState {
                worker,
                state: self.state,
            });
        }

        self.state = WorkerState::Starting;
        match self.bring_up().await {
            Ok(active) => {
                self.active = Some(active);
                self.state = WorkerState::Running;
                info!(worker, "worker running");
                Ok(())
            }
            Err(e) => {
                self.state = WorkerState::Stopped;
                Err(e)
            }
        }
    }

    async fn bring_up(&self) -> Result<Active, WorkerError> {
        let kernel = Arc::new(Kernel::connect(&self.endpoint).await?);

        if let Err(e) = self.prepare(&kernel).await {
            kernel.close();
            return Err(e);
        }

        let running = Arc::new(AtomicBool::new(true));
        let tracker = TaskTracker::new();
        let receive_loop = tokio::spawn(receive_loop(
            Arc::clone(&self.domain),
            Arc::clone(&kernel),
            Arc::clone(&running),
            tracker.clone(),
            self.fatal.clone(),
            self.settings.watchdog_interval,
        ));

        Ok(Active {
            kernel,
            running,
            tracker,
            receive_loop,
        })
    }

    async fn prepare(&self, kernel: &Kernel) -> Result<(), WorkerError> {
        self.store.validate().await?;

        for section in self.subscriptions() {
            kernel.send(&Request::Subscribe { section }).await?;
        }

        self.domain.reconcile(kernel).await?;

        if let Some(request) = self.domain.enable_request().await? {
            kernel.send(&request).await?;
        }
        Ok(())
    }

    fn subscriptions(&self) -> impl Iterator<Item = Section> + '_ {
        std::iter::once(Section::Heartbeat).chain(self.domain.sections().iter().copied())
    }

    /// Unsubscribe, disable, settle, then tear down the session.
    ///
    /// Every step runs even when an earlier one fails. Calling `stop` on a
    /// worker that is not running returns an empty report.
    pub async fn stop(&mut self) -> ShutdownReport {
        let worker = self.domain.name();
        let mut report = ShutdownReport::new(worker);
        let Some(active) = self.active.take() else {
            return report;
        };
        self.state = WorkerState::Stopping;

        for section in self.subscriptions() {
            if let Err(e) = active.kernel.send(&Request::Unsubscribe { section }).await {
                report.record(format!("unsubscribe {}", section.as_str()), e);
            }
        }

        for request in self.domain.shutdown_requests() {
            if let Err(e) = active.kernel.send(&request).await {
                report.record(request.kind(), e);
            }
        }

        tokio::time::sleep(self.settings.settle).await;

        active.running.store(false, Ordering::Release);
        active.kernel.session.shutdown(Instant::now());

        if let Err(e) = active.receive_loop.await {
            report.record("join receive loop", e);
        }

        active.tracker.close();
        if tokio::time::timeout(self.settings.drain_timeout, active.tracker.wait())
            .await
            .is_err()
        {
            report.record(
                "drain handlers",
                WorkerError::DrainTimeout {
                    pending: active.tracker.len(),
                    timeout: self.settings.drain_timeout,
                },
            );
        }

        active.kernel.session.close();
        self.state = WorkerState::Stopped;
        info!(worker, clean = report.is_clean(), "worker stopped");
        report
    }
}

async fn receive_loop<D: Domain>(
    domain: Arc<D>,
    kernel: Arc<Kernel>,
    running: Arc<AtomicBool>,
    tracker: TaskTracker,
    fatal: FatalSignal,
    interval: Duration,
) {
    let worker = domain.name();
    let watchdog = {
        let fatal = fatal.clone();
        Watchdog::new(interval, move || {
            fatal.trip(FatalReason::HeartbeatLost { worker });
        })
    };
    debug!(worker, "receive loop started");

    while running.load(Ordering::Acquire) {
        let received = kernel.session.recv().await;
        if !running.load(Ordering::Acquire) {
            break;
        }

        let bytes = match received {
            Ok(bytes) => bytes,
            Err(e) if e.is_timeout() => continue,
            Err(e) => {
                fatal.trip(FatalReason::SessionFailure {
                    worker,
                    detail: e.to_string(),
                });
                break;
            }
        };

        let report = match Report::decode(&bytes) {
            Ok(report) => report,
            Err(e) => {
                fatal.trip(FatalReason::ProtocolFault {
                    worker,
                    detail: e.to_string(),
                });
                break;
            }
        };

        match report {
            Report::Heartbeat => watchdog.kick(),
            Report::Other => trace!(worker, "ignoring acknowledgement"),
            report => {
                let domain = Arc::clone(&domain);
                let kernel = Arc::clone(&kernel);
                tracker.spawn(async move {
                    if let Err(e) = domain.handle(report, &kernel).await {
                        warn!(worker, error = %e, "dropping event after handler failure");
                    }
                });
            }
        }
    }

    watchdog.stop();
    debug!(worker, "receive loop exited");
}
