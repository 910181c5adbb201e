//! Engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default number of consecutive addresses packed into one segment file.
pub const DEFAULT_RECORDS_PER_SEGMENT: i64 = 10_000;

/// Default compaction threshold (see [`LogConfig::compact_threshold`]).
pub const DEFAULT_COMPACT_THRESHOLD: usize = 20;

/// Configuration for a file-backed log engine.
///
/// # Example
///
/// ```ignore
/// use weft_storage::{FileStreamLog, LogConfig};
///
/// let log = FileStreamLog::open(
///     LogConfig::new("/data/weft").records_per_segment(10_000),
/// )?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory holding the segment files. Created if absent.
    pub log_dir: PathBuf,

    /// Disables checksum verification on read.
    ///
    /// Segment headers record this flag; an engine that verifies refuses to
    /// open segments written with `no_verify` set.
    pub no_verify: bool,

    /// Number of consecutive addresses per segment file.
    pub records_per_segment: i64,

    /// Compaction trigger: a full segment is rewritten once
    /// `pending * compact_threshold >= known - trimmed`.
    pub compact_threshold: usize,
}

impl LogConfig {
    /// Creates a configuration with default sizing for the given directory.
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            no_verify: false,
            records_per_segment: DEFAULT_RECORDS_PER_SEGMENT,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }

    pub fn no_verify(mut self, no_verify: bool) -> Self {
        self.no_verify = no_verify;
        self
    }

    pub fn records_per_segment(mut self, records: i64) -> Self {
        debug_assert!(records > 0, "segment size must be positive");
        self.records_per_segment = records;
        self
    }

    pub fn compact_threshold(mut self, threshold: usize) -> Self {
        self.compact_threshold = threshold;
        self
    }
}
