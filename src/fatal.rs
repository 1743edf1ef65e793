//! Process-wide fail-fast signal.
//!
//! A lost heartbeat or a corrupt kernel channel means the agent can no longer
//! vouch for what it enforces. Any component that detects such a condition
//! trips the shared [`FatalSignal`]; the entry point observes it, stops every
//! worker in order and exits non-zero.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;
use tracing::error;

/// Why the agent decided it must terminate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalReason {
    /// No heartbeat arrived within the watchdog interval.
    HeartbeatLost {
        /// Worker whose watchdog fired.
        worker: &'static str,
    },
    /// An envelope could not be decoded.
    ProtocolFault {
        /// Worker that received it.
        worker: &'static str,
        /// Decoder diagnostic.
        detail: String,
    },
    /// The session failed with something other than a deadline expiry.
    SessionFailure {
        /// Worker owning the session.
        worker: &'static str,
        /// Session diagnostic.
        detail: String,
    },
}

impl fmt::Display for FatalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeartbeatLost { worker } => {
                write!(f, "{worker} worker: osinfo::report heartbeat timed out")
            }
            Self::ProtocolFault { worker, detail } => {
                write!(f, "{worker} worker: protocol fault: {detail}")
            }
            Self::SessionFailure { worker, detail } => {
                write!(f, "{worker} worker: session failure: {detail}")
            }
        }
    }
}

/// Shared, clonable fail-fast token.
///
/// Only the first reason is kept; later trips are logged and otherwise
/// ignored.
#[derive(Debug, Clone, Default)]
pub struct FatalSignal {
    token: CancellationToken,
    reason: Arc<OnceLock<FatalReason>>,
}

impl FatalSignal {
    /// Create an untripped signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `reason` and wake everyone waiting on [`FatalSignal::tripped`].
    pub fn trip(&self, reason: FatalReason) {
        error!(reason = %reason, "fatal condition, agent must stop");
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    /// Whether the signal has been tripped.
    pub fn is_tripped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The first recorded reason, if tripped.
    pub fn reason(&self) -> Option<&FatalReason> {
        self.reason.get()
    }

    /// Resolve once the signal is tripped.
    pub async fn tripped(&self) {
        self.token.cancelled().await;
    }
}

/// Why a daemon's main task stopped waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitCause {
    /// SIGINT or SIGTERM.
    Signal(&'static str),
    /// The fatal signal was tripped.
    Fatal(FatalReason),
}

/// Block until SIGINT, SIGTERM or a fatal trip.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub async fn wait_for_exit(fatal: &FatalSignal) -> std::io::Result<ExitCause> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;
    let cause = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            ExitCause::Signal("SIGINT")
        }
        _ = terminate.recv() => ExitCause::Signal("SIGTERM"),
        () = fatal.tripped() => {
            // trip() stores the reason before cancelling the token.
            ExitCause::Fatal(fatal.reason().cloned().unwrap_or(FatalReason::SessionFailure {
                worker: "unknown",
                detail: "no reason recorded".to_owned(),
            }))
        }
    };
    Ok(cause)
}
