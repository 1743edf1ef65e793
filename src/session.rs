//! Point-to-point datagram session with the kernel module.
//!
//! Each [`Session`] binds its own uniquely named Unix datagram socket and
//! connects it to the module's well-known socket, so several workers can talk
//! to the same module independently. A session delivers whole envelopes in
//! order but makes no delivery promise: a dropped datagram is invisible here
//! and only shows up as missing heartbeats.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::net::UnixDatagram;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::codec::{EnvelopeError, Reply, Request, MAX_ENVELOPE_LEN};

/// Where to find the kernel module and where to create local endpoints.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// Well-known socket of the kernel module.
    pub peer: PathBuf,
    /// Directory for per-session local sockets.
    pub local_dir: PathBuf,
    /// File-name prefix for per-session local sockets.
    pub local_prefix: String,
    /// Deadline for one-shot [`exec`] calls.
    pub exec_timeout: Duration,
}

impl Endpoint {
    fn fresh_local_path(&self) -> PathBuf {
        self.local_dir
            .join(format!("{}-{}.sock", self.local_prefix, uuid::Uuid::new_v4()))
    }
}

// One spare byte lets a datagram over the limit be told apart from one that
// fills it exactly.
const RECV_BUFFER_LEN: usize = MAX_ENVELOPE_LEN + 1;

/// Errors produced by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Binding the local socket or reaching the peer failed.
    #[error("cannot connect {local} to {peer}: {source}")]
    Connect {
        /// Local socket path.
        local: PathBuf,
        /// Peer socket path.
        peer: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Socket I/O failed after connecting.
    #[error("session i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// The socket accepted fewer bytes than the envelope holds.
    #[error("partial write: {written} of {expected} bytes")]
    PartialWrite {
        /// Bytes accepted.
        written: usize,
        /// Envelope length.
        expected: usize,
    },
    /// A datagram exceeded the maximum envelope size.
    #[error("received datagram larger than {MAX_ENVELOPE_LEN} bytes")]
    Oversized,
    /// The receive deadline elapsed.
    #[error("receive deadline elapsed")]
    Timeout,
    /// The timeout does not fit on the clock.
    #[error("timeout {0:?} is out of range")]
    TimeoutOutOfRange(Duration),
    /// The session was closed.
    #[error("session closed")]
    Closed,
    /// Request encoding or reply decoding failed.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

impl SessionError {
    /// Whether this is a deadline expiry, which callers may retry.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// One logical connection to the kernel module.
///
/// `send`, `recv` and `shutdown` take `&self`, so a session can be shared
/// between its receive loop and handler tasks behind an `Arc`. Only one task
/// should be receiving at a time.
#[derive(Debug)]
pub struct Session {
    socket: UnixDatagram,
    local: PathBuf,
    deadline: watch::Sender<Option<Instant>>,
    buffer: Mutex<Vec<u8>>,
    closed: AtomicBool,
}

impl Session {
    /// Bind a fresh local endpoint and connect it to the kernel module.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connect`] if the local socket cannot be bound
    /// or the peer socket does not exist.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, SessionError> {
        let local = endpoint.fresh_local_path();
        remove_socket_file(&local);

        let socket = match UnixDatagram::bind(&local) {
            Ok(socket) => socket,
            Err(source) => {
                return Err(SessionError::Connect {
                    local,
                    peer: endpoint.peer.clone(),
                    source,
                });
            }
        };
        if let Err(source) = socket.connect(&endpoint.peer) {
            remove_socket_file(&local);
            return Err(SessionError::Connect {
                local,
                peer: endpoint.peer.clone(),
                source,
            });
        }

        debug!(local = %local.display(), peer = %endpoint.peer.display(), "session connected");

        let buffer = vec![0u8; RECV_BUFFER_LEN];
        let (deadline, _) = watch::channel(None);

        Ok(Self {
            socket,
            local,
            deadline,
            buffer: Mutex::new(buffer),
            closed: AtomicBool::new(false),
        })
    }

    /// Path of this session's local socket.
    pub fn local_path(&self) -> &Path {
        &self.local
    }

    /// Write one complete envelope.
    ///
    /// # Errors
    ///
    /// Fails if the session is closed, the socket errors, or the datagram
    /// was only partially written.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Closed);
        }
        let written = self.socket.send(bytes).await?;
        if written != bytes.len() {
            return Err(SessionError::PartialWrite {
                written,
                expected: bytes.len(),
            });
        }
        trace!(local = %self.local.display(), len = written, "envelope sent");
        Ok(())
    }

    /// Encode and send a request.
    ///
    /// # Errors
    ///
    /// See [`Session::send`] and [`Request::encode`].
    pub async fn send_request(&self, request: &Request) -> Result<(), SessionError> {
        let bytes = request.encode()?;
        self.send(&bytes).await
    }

    /// Block until one envelope arrives or the deadline elapses.
    ///
    /// The deadline may be moved by [`Session::shutdown`] while this call is
    /// pending; a deadline already in the past fails the call immediately
    /// unless a datagram is ready.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] on deadline expiry,
    /// [`SessionError::Oversized`] for a datagram over the envelope limit,
    /// or [`SessionError::Io`] on a socket failure.
    pub async fn recv(&self) -> Result<Vec<u8>, SessionError> {
        let mut deadline_rx = self.deadline.subscribe();
        let mut buffer = self.buffer.lock().await;

        loop {
            let deadline = *deadline_rx.borrow_and_update();
            let expiry = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                received = self.socket.recv(&mut buffer[..]) => {
                    let len = received?;
                    if len > MAX_ENVELOPE_LEN {
                        return Err(SessionError::Oversized);
                    }
                    return Ok(buffer[..len].to_vec());
                }
                () = expiry => return Err(SessionError::Timeout),
                changed = deadline_rx.changed() => {
                    if changed.is_err() {
                        return Err(SessionError::Closed);
                    }
                }
            }
        }
    }

    /// Set the deadline after which pending and future `recv` calls fail.
    pub fn shutdown(&self, deadline: Instant) {
        self.deadline.send_replace(Some(deadline));
    }

    /// Release the local endpoint and remove its socket file.
    ///
    /// Pending receives are released with [`SessionError::Timeout`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown(Instant::now());
        remove_socket_file(&self.local);
        debug!(local = %self.local.display(), "session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::Acquire) {
            remove_socket_file(&self.local);
        }
    }
}

/// One-shot request/response on a throwaway session.
///
/// Connects, sends `request`, waits up to `timeout` for a single reply and
/// closes the session again, so it never interferes with a worker's
/// long-lived subscription session.
///
/// # Errors
///
/// Returns [`SessionError::Timeout`] if no reply arrives in time; that error
/// is safe to retry. Other errors mean the kernel channel is unusable.
pub async fn exec(
    endpoint: &Endpoint,
    request: &Request,
    timeout: Duration,
) -> Result<Reply, SessionError> {
    let bytes = request.encode()?;
    let raw = exec_raw(endpoint, &bytes, timeout).await?;
    Ok(Reply::decode(&raw)?)
}

/// Like [`exec`], but with a pre-encoded request and an undecoded reply.
///
/// # Errors
///
/// See [`exec`].
pub async fn exec_raw(
    endpoint: &Endpoint,
    request: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>, SessionError> {
    let session = Session::connect(endpoint).await?;
    let result = async {
        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or(SessionError::TimeoutOutOfRange(timeout))?;
        session.send(request).await?;
        session.shutdown(deadline);
        session.recv().await
    }
    .await;
    session.close();
    result
}

fn remove_socket_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "failed to remove socket file"),
    }
}
