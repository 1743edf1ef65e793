//! Dead-man's switch for kernel heartbeats.
//!
//! A [`Watchdog`] runs a background Tokio task that calls its timeout
//! callback once if nobody has called [`Watchdog::kick`] for a whole
//! interval. After firing it stays fired; a new watchdog is needed to watch
//! again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

#[derive(Debug)]
struct Shared {
    last_kick: watch::Sender<Instant>,
    disarm: CancellationToken,
}

/// Restartable liveness timer.
///
/// Cloning yields another handle to the same timer, so handler tasks can
/// kick it concurrently.
#[derive(Debug, Clone)]
pub struct Watchdog {
    shared: Arc<Shared>,
}

impl Watchdog {
    /// Arm a watchdog that calls `on_timeout` after `interval` without kicks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<F>(interval: Duration, on_timeout: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (last_kick, kicks) = watch::channel(Instant::now());
        let disarm = CancellationToken::new();

        tokio::spawn(run(interval, kicks, disarm.clone(), on_timeout));

        Self {
            shared: Arc::new(Shared { last_kick, disarm }),
        }
    }

    /// Reset the elapsed time to zero.
    pub fn kick(&self) {
        self.shared.last_kick.send_replace(Instant::now());
    }

    /// Disarm the watchdog; the callback will not run after this returns.
    pub fn stop(&self) {
        self.shared.disarm.cancel();
    }

    /// Whether the watchdog has been stopped or has already fired.
    pub fn is_disarmed(&self) -> bool {
        self.shared.disarm.is_cancelled()
    }
}

async fn run<F>(
    interval: Duration,
    mut kicks: watch::Receiver<Instant>,
    disarm: CancellationToken,
    on_timeout: F,
) where
    F: FnOnce(),
{
    loop {
        // An interval too large for the clock never expires.
        let expires_at = kicks.borrow_and_update().checked_add(interval);
        let expired = async {
            match expires_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            () = disarm.cancelled() => {
                trace!("watchdog disarmed");
                return;
            }
            changed = kicks.changed() => {
                if changed.is_err() {
                    // Every handle is gone; nobody is left to kick or stop us.
                    return;
                }
            }
            () = expired => {
                if disarm.is_cancelled() {
                    return;
                }
                disarm.cancel();
                on_timeout();
                return;
            }
        }
    }
}
