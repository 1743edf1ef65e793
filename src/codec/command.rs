//! Process command signatures.
//!
//! The kernel module reports an executed command as a single string whose
//! fields are joined by the ASCII unit separator (`0x1F`): the working
//! directory, the binary path, then one or more argv tokens. That raw string
//! is the identity of a command everywhere in the agent; [`Command`] is only
//! a display decomposition of it.

use serde::{Deserialize, Serialize};

/// Field separator used inside a raw command signature.
pub const UNIT_SEPARATOR: char = '\u{1f}';

/// Minimum number of separator-delimited fields in a valid signature.
const MIN_FIELDS: usize = 3;

/// Errors produced when decoding a raw command signature.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// The signature has fewer than workdir, binary and one argv field.
    #[error("malformed command signature: expected at least {MIN_FIELDS} fields, found {found}")]
    TooFewFields {
        /// Number of fields actually present.
        found: usize,
    },
}

/// A command signature decomposed for persistence and display.
///
/// `argv` is the argv tokens joined by single spaces. The join is lossy and
/// must never be handed to a shell or compared against another command; use
/// the raw signature for that.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// Working directory of the process at exec time.
    pub workdir: String,
    /// Path of the executed binary.
    pub binary: String,
    /// Space-joined argument vector.
    pub argv: String,
}

impl Command {
    /// Decode a raw unit-separator-joined signature.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::TooFewFields`] if the signature does not carry
    /// a workdir, a binary and at least one (possibly empty) argv token.
    pub fn decode(raw: &str) -> Result<Self, CommandError> {
        let fields: Vec<&str> = raw.split(UNIT_SEPARATOR).collect();
        if fields.len() < MIN_FIELDS {
            return Err(CommandError::TooFewFields {
                found: fields.len(),
            });
        }

        Ok(Self {
            workdir: fields[0].to_owned(),
            binary: fields[1].to_owned(),
            argv: fields[2..].join(" "),
        })
    }
}

/// Build a raw signature from its parts.
///
/// Mostly useful for tests and tooling that need to fabricate kernel reports.
pub fn encode_signature<S: AsRef<str>>(workdir: &str, binary: &str, argv: &[S]) -> String {
    let mut raw = String::with_capacity(workdir.len().saturating_add(binary.len()).saturating_add(2));
    raw.push_str(workdir);
    raw.push(UNIT_SEPARATOR);
    raw.push_str(binary);
    if argv.is_empty() {
        raw.push(UNIT_SEPARATOR);
    }
    for token in argv {
        raw.push(UNIT_SEPARATOR);
        raw.push_str(token.as_ref());
    }
    raw
}
