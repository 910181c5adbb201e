//! File-backed log engine.
//!
//! [`FileStreamLog`] composes the segment manager, the frame codec, and the
//! trim bookkeeping into the public [`StreamLog`] operations. All I/O is
//! blocking; callers impose their own timeouts if they need any.
//!
//! Durability is deferred: appends register their segment for the next
//! [`StreamLog::sync`] batch instead of forcing every write. Callers that
//! must acknowledge externally call `sync` first.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use weft_types::{Address, LogAddress, LogData};

use crate::config::LogConfig;
use crate::entry::LogEntry;
use crate::frame::{self, METADATA_SIZE, RECORD_DELIMITER};
use crate::manager::SegmentManager;
use crate::scan::{self, RecordScanner};
use crate::segment::{sidecar, SegmentHandle};
use crate::trim::TrimEntry;
use crate::{StorageError, StreamLog};

/// Suffix of the temporary file a compaction rewrite builds.
const COPY_SUFFIX: &str = ".copy";

/// The file-backed log engine.
///
/// Safe to share across threads: appends to the same segment are ordered by
/// the segment's handle lock, reads run on private read channels, and the
/// handle map mediates segment lifecycle.
#[derive(Debug)]
pub struct FileStreamLog {
    config: LogConfig,
    manager: SegmentManager,
    /// Segments written since the last sync.
    sync_pending: Mutex<HashSet<PathBuf>>,
}

impl FileStreamLog {
    /// Opens the engine over `config.log_dir`, creating the directory if
    /// absent and verifying the header of every existing segment.
    ///
    /// # Errors
    ///
    /// Refuses to start on an unreadable directory, a corrupt segment
    /// header, or a version mismatch.
    pub fn open(config: LogConfig) -> Result<Self, StorageError> {
        let manager = SegmentManager::new(&config)?;
        tracing::info!(dir = %config.log_dir.display(), "opened log engine");

        Ok(Self {
            config,
            manager,
            sync_pending: Mutex::new(HashSet::new()),
        })
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    fn verify_checksum(&self) -> bool {
        !self.config.no_verify
    }

    /// Delimiter + frame + body for one record.
    fn frame_record(entry: &LogEntry) -> Vec<u8> {
        let body = entry.encode();
        let mut record = Vec::with_capacity(2 + METADATA_SIZE + body.len());
        record.extend_from_slice(&RECORD_DELIMITER.to_be_bytes());
        record.extend_from_slice(&frame::encode_framed(&body));
        record
    }

    /// Rewrites a full segment, dropping the records in `pending`.
    ///
    /// The dropped addresses are committed to `.trimmed` before the rewrite
    /// becomes visible via the atomic rename, so a crash inside this window
    /// leaves them rejected for re-append rather than silently writable.
    fn rewrite_segment(
        &self,
        handle: &SegmentHandle,
        pending: &HashSet<Address>,
    ) -> Result<(), StorageError> {
        let path = handle.path().to_path_buf();
        let copy_path = sidecar(&path, COPY_SUFFIX);

        let mut copy = File::create(&copy_path)?;
        frame::write_file_header(&mut copy, self.verify_checksum())?;

        let size = handle.size_data()?;
        let region = scan::read_records_region(&path, size)?.unwrap_or_default();
        let mut scanner = RecordScanner::new(region, self.verify_checksum());

        let mut kept = 0usize;
        let mut dropped = 0usize;
        while let Some(entry) = scanner.next_record()? {
            if pending.contains(&entry.global_address) {
                dropped += 1;
                continue;
            }
            copy.write_all(&Self::frame_record(&entry))?;
            kept += 1;
        }
        copy.sync_all()?;

        for address in pending {
            handle.append_trimmed(&TrimEntry::new(*address))?;
            handle.add_trimmed(*address);
        }
        handle.sync_trimmed()?;

        fs::rename(&copy_path, &path)?;
        handle.clear_pending()?;
        self.manager.remove(&path);

        tracing::info!(path = %path.display(), kept, dropped, "compacted segment");
        Ok(())
    }
}

impl StreamLog for FileStreamLog {
    /// The duplicate check and the insert are not one atomic step; the
    /// engine relies on the sequencer handing each address to exactly one
    /// writer.
    fn append(&self, address: LogAddress, data: LogData) -> Result<(), StorageError> {
        let handle = self.manager.get_or_open(&address)?;

        if handle.is_known(address.address) || handle.is_trimmed(address.address) {
            return Err(StorageError::Overwrite(address.address));
        }

        let entry = LogEntry::from_data(address.address, &data);
        handle.append_data(&Self::frame_record(&entry))?;

        self.sync_pending
            .lock()
            .expect("sync set poisoned")
            .insert(handle.path().to_path_buf());
        handle.add_known(address.address);

        tracing::trace!(%address, "written to disk");
        Ok(())
    }

    fn read(&self, address: LogAddress) -> Result<Option<LogData>, StorageError> {
        let handle = self.manager.get_or_open(&address)?;

        let size = handle.size_data()?;
        let Some(region) = scan::read_records_region(handle.path(), size)? else {
            return Ok(None);
        };

        let mut scanner = RecordScanner::new(region, self.verify_checksum());
        while let Some(entry) = scanner.next_record()? {
            if entry.global_address == address.address {
                return Ok(Some(entry.into_data()));
            }
        }

        Ok(None)
    }

    /// Best-effort in the write path: an I/O failure recording the trim
    /// intent is logged and swallowed, the address just stays
    /// un-garbage-collected.
    fn trim(&self, address: LogAddress) -> Result<(), StorageError> {
        let handle = self.manager.get_or_open(&address)?;

        if handle.is_pending(address.address) || handle.is_trimmed(address.address) {
            return Ok(());
        }

        let entry = TrimEntry::new(address.address);
        match handle.append_pending(&entry) {
            // The entry is flushed before the in-memory set observes it.
            Ok(()) => handle.add_pending(address.address),
            Err(e) => {
                tracing::warn!(%address, error = %e, "error writing trim entry");
            }
        }

        Ok(())
    }

    fn compact(&self) {
        for handle in self.manager.handles() {
            let known = handle.known_len();
            let trimmed = handle.trimmed_len();

            if known + trimmed != self.config.records_per_segment as usize {
                tracing::trace!(path = %handle.path().display(), "segment not complete, skipping");
                continue;
            }

            let pending = handle.pending_not_trimmed();
            let live = known.saturating_sub(trimmed);

            // Rewrite once the trim-eligible share of the segment justifies
            // the copy: pending * threshold >= live records.
            if pending.is_empty() || pending.len() * self.config.compact_threshold < live {
                tracing::trace!(
                    path = %handle.path().display(),
                    pending = pending.len(),
                    live,
                    "threshold not exceeded, skipping"
                );
                continue;
            }

            if let Err(e) = self.rewrite_segment(&handle, &pending) {
                tracing::error!(path = %handle.path().display(), error = %e, "compact operation failed");
            }
        }
    }

    fn sync(&self) -> Result<(), StorageError> {
        let paths: Vec<PathBuf> = {
            let mut pending = self.sync_pending.lock().expect("sync set poisoned");
            pending.drain().collect()
        };

        for path in &paths {
            if let Some(handle) = self.manager.get(path) {
                handle.sync_data()?;
            }
        }

        tracing::debug!(channels = paths.len(), "synced channels");
        Ok(())
    }

    fn close(&self) {
        for handle in self.manager.drain() {
            handle.close();
        }
        self.sync_pending.lock().expect("sync set poisoned").clear();
    }
}
