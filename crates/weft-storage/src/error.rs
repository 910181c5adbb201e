//! Error types for storage operations.

use std::io;
use std::path::PathBuf;

use weft_types::Address;

/// Errors that can occur during storage operations.
///
/// A read that scans a segment without finding its target is not an error;
/// it surfaces as `Ok(None)` from [`crate::StreamLog::read`].
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// Append targeted an address that is already written or trimmed.
    ///
    /// Expected during normal retry; never retried by the engine itself.
    #[error("address {0} is already written or trimmed")]
    Overwrite(Address),

    /// Filesystem I/O error.
    #[error("filesystem error: {0}")]
    Io(#[from] io::Error),

    /// CRC32C mismatch - the record data is corrupted.
    #[error("corrupted record: checksum mismatch (expected {expected:#010x}, got {actual:#010x})")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// A record body was shorter than its declared length.
    #[error("unexpected end of record data")]
    UnexpectedEof,

    /// A record body carried an unknown data-type tag.
    #[error("invalid data type tag {0:#04x}")]
    InvalidDataType(u8),

    /// A record body carried a negative global address.
    #[error("invalid global address {0}")]
    InvalidAddress(i64),

    /// A trim entry declared an implausible length.
    #[error("invalid trim entry length {0}")]
    InvalidTrimLength(u64),

    /// Segment header carries a version this engine does not speak.
    #[error("log version mismatch for {path}: found {found}, expected {expected}")]
    VersionMismatch {
        path: PathBuf,
        found: u32,
        expected: u32,
    },

    /// Engine is configured to verify checksums but the segment was written
    /// without them.
    #[error("log file {path} was not generated with checksums, cannot verify")]
    UnverifiableSegment { path: PathBuf },
}

impl StorageError {
    /// True for the corruption family of errors.
    ///
    /// These are fatal for the segment they were observed on.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StorageError::ChecksumMismatch { .. }
                | StorageError::UnexpectedEof
                | StorageError::InvalidDataType(_)
                | StorageError::InvalidAddress(_)
                | StorageError::InvalidTrimLength(_)
        )
    }
}
