//! Judge — standalone trust daemon for the hackernel protection module.
//!
//! Watches process launches the kernel reports, counts how often each
//! command signature appears, and puts a signature on the kernel trusted
//! list once it has been seen often enough. Runs only the judge worker,
//! with its own config file and database.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Configuration loading and validation.
pub mod config;
