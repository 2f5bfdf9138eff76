//! Error types for snapshot save and load.

use std::fmt;
use std::io;

/// Errors from writing or reading a snapshot.
///
/// Load errors are all-or-nothing: a failed load leaves no partial
/// simulator behind.
#[derive(Debug)]
pub enum SnapshotError {
    /// An I/O error occurred during read or write.
    Io(io::Error),
    /// The file does not start with the expected `b"VELD"` magic bytes.
    InvalidMagic,
    /// The format version is not supported by this build.
    UnsupportedVersion {
        /// The version found in the file.
        found: u8,
    },
    /// A field could not be decoded (truncated or corrupt data).
    Malformed {
        /// Human-readable description of what went wrong.
        detail: String,
    },
    /// The trailing checksum does not match the stream contents.
    ChecksumMismatch {
        /// Checksum stored in the file.
        stored: u64,
        /// Checksum computed over the stream.
        computed: u64,
    },
    /// Bytes remain after the checksum.
    TrailingBytes,
    /// The decoded state failed simulator reconstruction.
    InvalidState {
        /// Description of the validation failure.
        reason: String,
    },
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidMagic => write!(f, "invalid magic bytes (expected b\"VELD\")"),
            Self::UnsupportedVersion { found } => {
                write!(f, "unsupported format version {found}")
            }
            Self::Malformed { detail } => write!(f, "malformed snapshot: {detail}"),
            Self::ChecksumMismatch { stored, computed } => {
                write!(
                    f,
                    "checksum mismatch: stored={stored:#018x}, computed={computed:#018x}"
                )
            }
            Self::TrailingBytes => write!(f, "trailing bytes after checksum"),
            Self::InvalidState { reason } => {
                write!(f, "decoded state failed validation: {reason}")
            }
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SnapshotError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
