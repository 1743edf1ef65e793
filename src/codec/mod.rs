//! Encoding and decoding of everything that crosses the kernel channel.

pub mod command;
pub mod envelope;

pub use command::{Command, CommandError, UNIT_SEPARATOR};
pub use envelope::{EnvelopeError, FileSetFlag, Reply, Report, Request, Section, MAX_ENVELOPE_LEN};
