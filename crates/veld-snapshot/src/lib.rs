//! Byte-stable binary snapshots of Veld simulator state.
//!
//! One file holds everything needed to resume a run: configuration
//! (item catalog included, energy functions by tag), tick counter,
//! every materialized patch, the agent table, semaphores, and the
//! coordinator's bookkeeping. All integers are fixed-width
//! little-endian; collections are length-prefixed and written in
//! canonical order (patches ascending by coordinate, agents ascending
//! by id), so identical simulator states produce identical bytes.
//!
//! Loading is byte-strict: wrong magic, an unsupported version byte, a
//! truncated stream, a checksum mismatch, or trailing bytes all fail
//! the load with no partial state.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use error::SnapshotError;
pub use reader::{load, read_state};
pub use writer::{save, write_state};

/// Snapshot file magic bytes.
pub const MAGIC: [u8; 4] = *b"VELD";

/// Current snapshot format version. No migration is performed: any
/// other version byte fails the load.
pub const FORMAT_VERSION: u8 = 1;
