//! Adapters Layer
//!
//! Outbound adapters implementing the domain ports against SQLite, the
//! filesystem and the shell.

pub mod outbound;
