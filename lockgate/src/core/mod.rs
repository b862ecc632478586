//! Deterministic, pure logic shared by the lockgate commands.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data (lock file text, path lists, process results) and return deterministic
//! outputs suitable for tests.

pub mod header;
pub mod pipeline;
pub mod protected;
pub mod record;
pub mod staleness;
pub mod types;
