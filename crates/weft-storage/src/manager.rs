//! Segment manager: maps addresses to open segment handles.
//!
//! Segments are opened lazily on first reference. Opening an existing
//! segment validates its file header and rebuilds the in-memory address
//! sets by scanning the data file and parsing the trim sidecars; opening a
//! fresh segment writes the header frame before the handle is published.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use weft_types::LogAddress;

use crate::config::LogConfig;
use crate::frame::{self, FileHeader, FrameHeader, METADATA_SIZE, VERSION};
use crate::scan::{self, RecordScanner};
use crate::segment::{sidecar, SegmentHandle, PENDING_SUFFIX, TRIMMED_SUFFIX};
use crate::trim::TrimEntry;
use crate::StorageError;

/// Owns every open [`SegmentHandle`], keyed by data-file path.
#[derive(Debug)]
pub struct SegmentManager {
    log_dir: PathBuf,
    records_per_segment: i64,
    verify_checksum: bool,
    handles: RwLock<HashMap<PathBuf, Arc<SegmentHandle>>>,
    /// Serializes the open-or-create path so a segment is opened once.
    open_lock: Mutex<()>,
}

impl SegmentManager {
    /// Creates the log directory if absent and verifies every existing
    /// segment header before any handle is opened.
    ///
    /// # Errors
    ///
    /// Fails fast on a corrupt or version-mismatched segment header; the
    /// engine refuses to start over a directory it cannot trust.
    pub fn new(config: &LogConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(&config.log_dir)?;

        let manager = Self {
            log_dir: config.log_dir.clone(),
            records_per_segment: config.records_per_segment,
            verify_checksum: !config.no_verify,
            handles: RwLock::new(HashMap::new()),
            open_lock: Mutex::new(()),
        };

        manager.verify_logs(&manager.log_dir)?;
        Ok(manager)
    }

    /// Data-file path for an address: `{dir}/({stream}-)?{segment}.log`.
    pub fn segment_path(&self, address: &LogAddress) -> PathBuf {
        let segment = address.address.segment(self.records_per_segment);
        let name = match address.stream {
            Some(stream) => format!("{stream}-{segment}.log"),
            None => format!("{segment}.log"),
        };
        self.log_dir.join(name)
    }

    /// Returns the handle for the segment containing `address`, opening or
    /// creating the segment on first reference.
    pub fn get_or_open(&self, address: &LogAddress) -> Result<Arc<SegmentHandle>, StorageError> {
        let path = self.segment_path(address);

        if let Some(handle) = self.handles.read().expect("handle map poisoned").get(&path) {
            return Ok(Arc::clone(handle));
        }

        let _guard = self.open_lock.lock().expect("open lock poisoned");

        // Another thread may have opened the segment while we waited.
        if let Some(handle) = self.handles.read().expect("handle map poisoned").get(&path) {
            return Ok(Arc::clone(handle));
        }

        let handle = self.open_segment(&path)?;
        self.handles
            .write()
            .expect("handle map poisoned")
            .insert(path, Arc::clone(&handle));
        Ok(handle)
    }

    fn open_segment(&self, path: &Path) -> Result<Arc<SegmentHandle>, StorageError> {
        let handle = SegmentHandle::open(path)?;

        if handle.size_data()? == 0 {
            handle.with_data_file(|file| frame::write_file_header(file, self.verify_checksum))?;
            tracing::debug!(path = %path.display(), "created segment");
        } else {
            let header = read_header_frame(path)?;
            self.validate_header(path, &header)?;
            tracing::debug!(path = %path.display(), "opened existing segment");
        }

        // Record-discovery scan: populate `known` from the data file.
        let size = handle.size_data()?;
        if let Some(region) = scan::read_records_region(path, size)? {
            let mut scanner = RecordScanner::new(region, self.verify_checksum);
            while let Some(entry) = scanner.next_record()? {
                handle.add_known(entry.global_address);
            }
        }

        let trimmed_size = handle.size_trimmed()?;
        let pending_size = handle.size_pending()?;
        load_trim_file(&sidecar(path, TRIMMED_SUFFIX), trimmed_size, |entry| {
            handle.add_trimmed(entry.address);
        })?;
        load_trim_file(&sidecar(path, PENDING_SUFFIX), pending_size, |entry| {
            handle.add_pending(entry.address);
        })?;

        Ok(Arc::new(handle))
    }

    fn validate_header(&self, path: &Path, header: &FileHeader) -> Result<(), StorageError> {
        if header.version != VERSION {
            return Err(StorageError::VersionMismatch {
                path: path.to_path_buf(),
                found: header.version,
                expected: VERSION,
            });
        }

        if self.verify_checksum && !header.verify_checksum {
            return Err(StorageError::UnverifiableSegment {
                path: path.to_path_buf(),
            });
        }

        Ok(())
    }

    /// Walks `dir` recursively and validates the header of every `*.log`
    /// file (sidecars carry other extensions and are skipped).
    fn verify_logs(&self, dir: &Path) -> Result<(), StorageError> {
        for dir_entry in fs::read_dir(dir)? {
            let path = dir_entry?.path();

            if path.is_dir() {
                self.verify_logs(&path)?;
                continue;
            }

            if path.extension().is_some_and(|ext| ext == "log") {
                let header = read_header_frame(&path).inspect_err(|e| {
                    tracing::error!(path = %path.display(), error = %e, "segment header failed verification");
                })?;
                self.validate_header(&path, &header)?;
            }
        }

        Ok(())
    }

    /// Returns the open handle for `path`, if any.
    pub fn get(&self, path: &Path) -> Option<Arc<SegmentHandle>> {
        self.handles
            .read()
            .expect("handle map poisoned")
            .get(path)
            .cloned()
    }

    /// Drops the handle for `path`; a later access reopens and re-scans.
    pub fn remove(&self, path: &Path) -> Option<Arc<SegmentHandle>> {
        self.handles
            .write()
            .expect("handle map poisoned")
            .remove(path)
    }

    /// Snapshot of every open handle.
    pub fn handles(&self) -> Vec<Arc<SegmentHandle>> {
        self.handles
            .read()
            .expect("handle map poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Removes and returns every open handle.
    pub fn drain(&self) -> Vec<Arc<SegmentHandle>> {
        self.handles
            .write()
            .expect("handle map poisoned")
            .drain()
            .map(|(_, handle)| handle)
            .collect()
    }
}

/// Reads and validates the header frame of a segment file.
fn read_header_frame(path: &Path) -> Result<FileHeader, StorageError> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let mut meta_buf = [0u8; METADATA_SIZE];
    read_exact_or_eof(&mut file, &mut meta_buf)?;
    let meta = FrameHeader::decode(&meta_buf)?;

    // A declared length past the end of the file is a malformed frame;
    // checking first also bounds the allocation below.
    if u64::from(meta.length) > file_len.saturating_sub(METADATA_SIZE as u64) {
        return Err(StorageError::UnexpectedEof);
    }

    let mut frame_buf = meta_buf.to_vec();
    frame_buf.resize(METADATA_SIZE + meta.length as usize, 0);
    read_exact_or_eof(&mut file, &mut frame_buf[METADATA_SIZE..])?;

    frame::read_file_header(&frame_buf)
}

fn read_exact_or_eof(file: &mut File, buf: &mut [u8]) -> Result<(), StorageError> {
    file.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => StorageError::UnexpectedEof,
        _ => StorageError::Io(e),
    })
}

/// Parses a trim sidecar, feeding each entry to `f`.
///
/// The parse stops at `size`, a snapshot taken under the sidecar channel's
/// lock, so it covers only fully written entries (the same discipline the
/// data-file scan uses). A torn trailing entry (crash mid-append) ends the
/// parse with a warning; everything before it is intact and loaded.
fn load_trim_file(
    path: &Path,
    size: u64,
    mut f: impl FnMut(TrimEntry),
) -> Result<(), StorageError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let mut reader = file.take(size);

    loop {
        match TrimEntry::read_delimited(&mut reader) {
            Ok(Some(entry)) => f(entry),
            Ok(None) => return Ok(()),
            Err(StorageError::UnexpectedEof) => {
                tracing::warn!(path = %path.display(), "torn trailing trim entry, ignoring");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}
