//! # weft-storage: Segmented append-only log storage for weft
//!
//! This crate implements the durable log storage layer backing a weft
//! storage node. Global addresses are densely packed into fixed-size
//! segment files; records are self-describing frames protected by CRC32C
//! checksums, so the engine detects corruption and torn writes.
//!
//! # Segment File Format
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Header frame                                             │
//! │ ┌──────────────┬────────────┬───────────────────────────┐│
//! │ │ checksum (4) │ length (4) │ version (4) · verify (1)  ││
//! │ └──────────────┴────────────┴───────────────────────────┘│
//! ├──────────────────────────────────────────────────────────┤
//! │ Record 1                                                 │
//! │ ┌─────────────────┬──────────────┬────────────┬─────────┐│
//! │ │ 0x4C45 (2, BE)  │ checksum (4) │ length (4) │ entry   ││
//! │ └─────────────────┴──────────────┴────────────┴─────────┘│
//! ├──────────────────────────────────────────────────────────┤
//! │ Record 2 ...                                             │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Each segment has two sidecar files for trim bookkeeping: `.pending`
//! holds trim intents not yet compacted, `.trimmed` holds committed trims.
//! Trims are two-phase: `trim` records an intent, `compact` rewrites full
//! segments dropping the intended records and commits the trims.
//!
//! # Example
//!
//! ```ignore
//! use weft_storage::{FileStreamLog, LogConfig, StreamLog};
//! use weft_types::{DataType, LogAddress, LogData};
//!
//! let log = FileStreamLog::open(LogConfig::new("/data/weft"))?;
//!
//! log.append(LogAddress::untagged(0), LogData::new(DataType::Data, "hello"))?;
//! log.sync()?;
//!
//! let record = log.read(LogAddress::untagged(0))?;
//! ```

mod config;
mod entry;
mod error;
mod frame;
mod log;
mod manager;
mod memory;
mod scan;
mod segment;
mod trim;

// Public API
pub use config::{LogConfig, DEFAULT_COMPACT_THRESHOLD, DEFAULT_RECORDS_PER_SEGMENT};
pub use entry::LogEntry;
pub use error::StorageError;
pub use frame::{FileHeader, FrameHeader, METADATA_SIZE, RECORD_DELIMITER, VERSION};
pub use log::FileStreamLog;
pub use manager::SegmentManager;
pub use memory::InMemoryLog;
pub use segment::SegmentHandle;
pub use trim::{TrimEntry, TRIM_ENTRY_SIZE};

use weft_types::{LogAddress, LogData};

/// The log engine operations offered to the layers above.
///
/// Implementations must be safe to share across threads; every operation
/// blocks until its I/O completes.
pub trait StreamLog: Send + Sync {
    /// Appends a record at an address.
    ///
    /// The engine stamps the record's global address from `address`; the
    /// caller is responsible for supplying a [`LogData`] consistent with it.
    /// Durability is deferred to [`StreamLog::sync`].
    ///
    /// # Errors
    ///
    /// - [`StorageError::Overwrite`] if the address is already written or
    ///   trimmed
    /// - [`StorageError::Io`] on a failed write
    fn append(&self, address: LogAddress, data: LogData) -> Result<(), StorageError>;

    /// Reads the record at an address.
    ///
    /// Returns `Ok(None)` if no record exists at the address; this is a
    /// normal outcome, not an error.
    ///
    /// # Errors
    ///
    /// - corruption errors if the segment holds a damaged record (and the
    ///   engine verifies checksums)
    /// - [`StorageError::Io`] on a failed read
    fn read(&self, address: LogAddress) -> Result<Option<LogData>, StorageError>;

    /// Records the intent to remove the record at an address.
    ///
    /// Idempotent. The record stays readable until [`StreamLog::compact`]
    /// rewrites its segment.
    fn trim(&self, address: LogAddress) -> Result<(), StorageError>;

    /// Rewrites full segments with enough trim-eligible garbage, dropping
    /// trimmed records. Failures are logged per segment, never surfaced.
    fn compact(&self);

    /// Durability barrier: force-flushes every segment written since the
    /// last sync.
    fn sync(&self) -> Result<(), StorageError>;

    /// Force-flushes and closes every open segment.
    fn close(&self);

    /// Reserved hook, called when a caller releases a record it no longer
    /// holds. The engine takes no action.
    fn release(&self, address: LogAddress, data: LogData) {
        let _ = (address, data);
    }
}

#[cfg(test)]
mod tests;
