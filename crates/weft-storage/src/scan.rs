//! Linear record scan over a segment's byte range.
//!
//! Segments have no index; every lookup walks the record frames in file
//! order. The scanner stops cleanly at a torn tail (short read or missing
//! delimiter), so a crash mid-append never makes earlier records
//! unreadable.

use std::fs;
use std::io;
use std::path::Path;

use bytes::Bytes;

use crate::entry::LogEntry;
use crate::frame::{self, FrameHeader, METADATA_SIZE, RECORD_DELIMITER};
use crate::StorageError;

/// Reads the record region of a segment file: everything after the header
/// frame, capped at `size_limit` bytes of file.
///
/// The cap is the size snapshot taken under the segment's write lock, so
/// the region covers only fully written records. Returns `None` if the file
/// does not exist.
pub(crate) fn read_records_region(
    path: &Path,
    size_limit: u64,
) -> Result<Option<Bytes>, StorageError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut data = Bytes::from(data);
    let limit = (size_limit as usize).min(data.len());
    data.truncate(limit);

    let start = frame::records_start(&data)?;
    if start > data.len() {
        return Ok(Some(Bytes::new()));
    }

    Ok(Some(data.slice(start..)))
}

/// Iterates the record frames of a segment's record region.
pub(crate) struct RecordScanner {
    data: Bytes,
    pos: usize,
    verify: bool,
}

impl RecordScanner {
    pub(crate) fn new(data: Bytes, verify: bool) -> Self {
        Self {
            data,
            pos: 0,
            verify,
        }
    }

    /// Decodes the next record frame.
    ///
    /// Returns `Ok(None)` at a clean end of scan: end of region, a torn
    /// trailing frame, or a byte pair that is not the record delimiter (the
    /// segment is treated as ending at the last well-framed record).
    ///
    /// # Errors
    ///
    /// Corruption inside a fully present frame: checksum mismatch (when
    /// verification is on) or a malformed entry body.
    pub(crate) fn next_record(&mut self) -> Result<Option<LogEntry>, StorageError> {
        let remaining = self.data.len() - self.pos;
        if remaining < 2 + METADATA_SIZE {
            return Ok(None);
        }

        let delimiter = u16::from_be_bytes(
            self.data[self.pos..self.pos + 2]
                .try_into()
                .expect("slice is exactly 2 bytes after bounds check"),
        );
        if delimiter != RECORD_DELIMITER {
            tracing::trace!(
                position = self.pos,
                found = delimiter,
                "record delimiter mismatch, ending scan"
            );
            return Ok(None);
        }

        let meta_start = self.pos + 2;
        let meta = FrameHeader::decode(&self.data[meta_start..meta_start + METADATA_SIZE])?;

        let body_start = meta_start + METADATA_SIZE;
        let body_end = body_start + meta.length as usize;
        if body_end > self.data.len() {
            // Torn tail: the frame was not fully written.
            return Ok(None);
        }

        let body = self.data.slice(body_start..body_end);
        if self.verify {
            meta.verify(&body)?;
        }

        let entry = LogEntry::decode(&body)?;
        self.pos = body_end;
        Ok(Some(entry))
    }
}
