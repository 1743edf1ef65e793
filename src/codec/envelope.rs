//! Wire envelopes exchanged with the kernel module.
//!
//! Every datagram carries exactly one JSON object whose `type` field is a
//! `domain::object::action` tag. Requests flow agent → kernel, reports and
//! acknowledgements flow kernel → agent. There is no sequence number; a reply
//! is matched to its request only by arriving on the same session.

use serde::{Deserialize, Serialize, Serializer};

use crate::store::net::NetPolicy;

/// Largest envelope the kernel module will ever emit, in bytes.
pub const MAX_ENVELOPE_LEN: usize = 131_072;

/// Errors raised while encoding or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The payload is not a JSON object of a known shape.
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
    /// The encoded request would not fit in one datagram.
    #[error("envelope of {len} bytes exceeds the {MAX_ENVELOPE_LEN} byte limit")]
    TooLarge {
        /// Encoded length in bytes.
        len: usize,
    },
}

/// Event classes an agent session can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Section {
    /// Kernel heartbeat, emitted periodically while the module is alive.
    #[serde(rename = "osinfo::report")]
    Heartbeat,
    /// Passive observation of a process launch, before judgement.
    #[serde(rename = "kernel::proc::report")]
    ProcessObserved,
    /// A process launch that the kernel judged.
    #[serde(rename = "audit::proc::report")]
    ProcessAudited,
    /// A file access that hit a file policy.
    #[serde(rename = "kernel::file::report")]
    FileAccessed,
}

impl Section {
    /// The wire tag of this section.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heartbeat => "osinfo::report",
            Self::ProcessObserved => "kernel::proc::report",
            Self::ProcessAudited => "audit::proc::report",
            Self::FileAccessed => "kernel::file::report",
        }
    }
}

/// How `user::file::set` treats an existing kernel-side policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSetFlag {
    /// Set unconditionally; used with perm 0 to drop a policy.
    Any,
    /// Create, or replace after a restart.
    New,
    /// Update an existing policy only.
    Update,
}

impl FileSetFlag {
    /// Integer code understood by the kernel module.
    pub fn code(&self) -> i32 {
        match self {
            Self::Any => 0,
            Self::New => 1,
            Self::Update => 2,
        }
    }
}

impl Serialize for FileSetFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

/// Requests sent from the agent to the kernel module.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Turn process protection on.
    #[serde(rename = "user::proc::enable")]
    ProcessEnable,
    /// Turn process protection off.
    #[serde(rename = "user::proc::disable")]
    ProcessDisable,
    /// Change the process judge mode.
    #[serde(rename = "user::proc::judge")]
    ProcessJudge {
        /// 0 disabled, 1 audit, 2 protect.
        judge: i64,
    },
    /// Add a signature to the kernel trusted list.
    #[serde(rename = "user::proc::trusted::insert")]
    TrustedInsert {
        /// Raw command signature.
        cmd: String,
    },
    /// Remove a signature from the kernel trusted list.
    #[serde(rename = "user::proc::trusted::delete")]
    TrustedDelete {
        /// Raw command signature.
        cmd: String,
    },
    /// Empty the kernel trusted list.
    #[serde(rename = "user::proc::trusted::clear")]
    TrustedClear,
    /// Turn file protection on.
    #[serde(rename = "user::file::enable")]
    FileEnable,
    /// Turn file protection off.
    #[serde(rename = "user::file::disable")]
    FileDisable,
    /// Drop every kernel-side file policy.
    #[serde(rename = "user::file::clear")]
    FileClear,
    /// Install or change the policy for one path.
    #[serde(rename = "user::file::set")]
    FileSet {
        /// User-facing path, resolved by the kernel.
        path: String,
        /// Permission bitmask.
        perm: i32,
        /// Create/update semantics.
        flag: FileSetFlag,
    },
    /// Turn network protection on.
    #[serde(rename = "user::net::enable")]
    NetEnable,
    /// Turn network protection off.
    #[serde(rename = "user::net::disable")]
    NetDisable,
    /// Drop every kernel-side network policy.
    #[serde(rename = "user::net::clear")]
    NetClear,
    /// Install one network policy.
    #[serde(rename = "user::net::insert")]
    NetInsert(NetPolicy),
    /// Remove one network policy by id.
    #[serde(rename = "user::net::delete")]
    NetDelete {
        /// Policy id as stored by the agent.
        id: i64,
    },
    /// Subscribe the sending session to an event class.
    #[serde(rename = "user::msg::sub")]
    Subscribe {
        /// Event class.
        section: Section,
    },
    /// Unsubscribe the sending session from an event class.
    #[serde(rename = "user::msg::unsub")]
    Unsubscribe {
        /// Event class.
        section: Section,
    },
    /// Ask the kernel-side daemon to exit.
    #[serde(rename = "user::ctrl::exit")]
    Exit,
    /// Round-trip check; the kernel echoes `extra` back.
    #[serde(rename = "user::test::echo")]
    Echo {
        /// Arbitrary payload.
        extra: serde_json::Value,
    },
}

impl Request {
    /// Serialize to the single-datagram wire form.
    ///
    /// # Errors
    ///
    /// Fails if serialization fails or the result exceeds [`MAX_ENVELOPE_LEN`].
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_ENVELOPE_LEN {
            return Err(EnvelopeError::TooLarge { len: bytes.len() });
        }
        Ok(bytes)
    }

    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProcessEnable => "user::proc::enable",
            Self::ProcessDisable => "user::proc::disable",
            Self::ProcessJudge { .. } => "user::proc::judge",
            Self::TrustedInsert { .. } => "user::proc::trusted::insert",
            Self::TrustedDelete { .. } => "user::proc::trusted::delete",
            Self::TrustedClear => "user::proc::trusted::clear",
            Self::FileEnable => "user::file::enable",
            Self::FileDisable => "user::file::disable",
            Self::FileClear => "user::file::clear",
            Self::FileSet { .. } => "user::file::set",
            Self::NetEnable => "user::net::enable",
            Self::NetDisable => "user::net::disable",
            Self::NetClear => "user::net::clear",
            Self::NetInsert(_) => "user::net::insert",
            Self::NetDelete { .. } => "user::net::delete",
            Self::Subscribe { .. } => "user::msg::sub",
            Self::Unsubscribe { .. } => "user::msg::unsub",
            Self::Exit => "user::ctrl::exit",
            Self::Echo { .. } => "user::test::echo",
        }
    }
}

/// Asynchronous reports pushed by the kernel module.
///
/// Acknowledgements of requests sent on a subscription session also arrive
/// on that session; they decode as [`Report::Other`] and are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub enum Report {
    /// Kernel heartbeat.
    #[serde(rename = "osinfo::report")]
    Heartbeat,
    /// A process launch seen before judgement.
    #[serde(rename = "kernel::proc::report")]
    ProcessObserved {
        /// Raw command signature.
        cmd: String,
    },
    /// A judged process launch.
    #[serde(rename = "audit::proc::report")]
    ProcessAudited {
        /// Raw command signature.
        cmd: String,
        /// Kernel judge code; see [`crate::store::process::JudgeOutcome`].
        judge: i64,
    },
    /// A file access matching a kernel file policy.
    #[serde(rename = "kernel::file::report")]
    FileAccessed {
        /// Path as seen by the kernel.
        name: String,
        /// Filesystem id.
        fsid: u64,
        /// Inode number.
        ino: u64,
        /// Permission bits of the attempted access.
        perm: i32,
    },
    /// Any other envelope type, including acknowledgements.
    #[serde(other)]
    Other,
}

impl Report {
    /// Decode one datagram.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if the bytes are not a JSON
    /// object with a `type` field, or a known type is missing its fields.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Acknowledgement returned by the kernel for a synchronous request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reply {
    /// Echo of the request type, when present.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    /// 0 on success, a negated errno otherwise.
    #[serde(default)]
    pub code: i32,
    /// Resolved filesystem id, on `user::file::set` acks.
    #[serde(default)]
    pub fsid: u64,
    /// Resolved inode, on `user::file::set` acks.
    #[serde(default)]
    pub ino: u64,
    /// Request-specific payload, e.g. the echo body.
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
}

impl Reply {
    /// Decode one acknowledgement datagram.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError::Malformed`] if the bytes are not valid JSON.
    pub fn decode(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Whether the kernel reported success.
    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}
