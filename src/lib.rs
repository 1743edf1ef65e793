//! Uranus — user-space agent for the hackernel protection module.
//!
//! Keeps process, file and network policy in a local SQLite store, pushes it
//! into the kernel module at startup, records what the module reports, and
//! decides which commands become trusted. Talks to the module over a Unix
//! datagram socket carrying one JSON envelope per datagram.
//!
//! See `DESIGN.md` for the architecture.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod admin;
pub mod codec;
pub mod config;
pub mod fatal;
pub mod logging;
pub mod session;
pub mod store;
pub mod trust;
pub mod watchdog;
pub mod worker;
