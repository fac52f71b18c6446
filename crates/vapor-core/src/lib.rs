//! Vapor Core - shared primitives for the vapor in-memory filesystem.
//!
//! This crate provides:
//! - The injected platform constant set (file-type bits, open flags)
//! - Millisecond timestamps
//! - The errno-level error taxonomy

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod constants;
pub mod error;
pub mod time;

pub use constants::ConstantSet;
pub use error::{ErrorKind, FsError, FsResult};
pub use time::Timestamp;

/// Fixed size of a file data block in bytes (1 MiB).
pub const BLOCK_SIZE: usize = 1 << 20;

/// Unit used for the `blocks` field of a stat record.
pub const STAT_BLOCK_SIZE: u64 = 512;

/// Logical size reported for directories.
pub const DIR_SIZE: u64 = 512;

/// Lowest file descriptor id handed out. Ids below this are reserved for
/// descriptors the surrounding process may synthesize.
pub const FD_BASE: u32 = 20;
