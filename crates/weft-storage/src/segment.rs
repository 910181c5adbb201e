//! Segment handle: open channels and in-memory address sets for one segment.
//!
//! Each segment materializes as three files sharing a base path:
//!
//! ```text
//! {log_dir}/
//!   42.log            <- data segment (header + records)
//!   42.log.trimmed    <- committed trim markers
//!   42.log.pending    <- trim markers not yet compacted
//! ```
//!
//! The data channel is opened for append only; the writer never seeks.
//! Readers open their own read channels and do not contend with writes
//! except to sample the file size.
//!
//! # Invariants
//!
//! - `known` and `trimmed` are disjoint at steady state after open
//! - the in-memory `pending` set and the `.pending` file agree, except
//!   transiently inside a trim write or a compaction rewrite
//! - a size observed under the data lock covers only fully written records

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use weft_types::Address;

use crate::trim::TrimEntry;

/// Suffix of the committed-trim sidecar file.
pub const TRIMMED_SUFFIX: &str = ".trimmed";

/// Suffix of the pending-trim sidecar file.
pub const PENDING_SUFFIX: &str = ".pending";

/// Open channels and address bookkeeping for one segment.
///
/// A handle is created on first reference and lives until the engine is
/// closed or the segment is compacted; handles are never reopened mid-life.
#[derive(Debug)]
pub struct SegmentHandle {
    path: PathBuf,
    /// Append channel for the data file. The mutex orders writes and
    /// guards size observation: the OS append is atomic per write, so a
    /// size sampled under the lock never splits a record.
    data: Mutex<File>,
    trimmed_file: Mutex<File>,
    pending_file: Mutex<File>,
    known: RwLock<HashSet<Address>>,
    trimmed: RwLock<HashSet<Address>>,
    pending: RwLock<HashSet<Address>>,
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

impl SegmentHandle {
    /// Opens (creating if absent) the three channels for `path`.
    ///
    /// The address sets start empty; the segment manager populates them
    /// from the files before publishing the handle.
    pub(crate) fn open(path: &Path) -> io::Result<Self> {
        let data = open_append(path)?;
        let trimmed_file = open_append(&sidecar(path, TRIMMED_SUFFIX))?;
        let pending_file = open_append(&sidecar(path, PENDING_SUFFIX))?;

        Ok(Self {
            path: path.to_path_buf(),
            data: Mutex::new(data),
            trimmed_file: Mutex::new(trimmed_file),
            pending_file: Mutex::new(pending_file),
            known: RwLock::new(HashSet::new()),
            trimmed: RwLock::new(HashSet::new()),
            pending: RwLock::new(HashSet::new()),
        })
    }

    /// Path of the data file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends pre-framed bytes to the data file.
    ///
    /// The caller is responsible for delimiter and frame; this method only
    /// serializes the write against other appends and size observations.
    pub fn append_data(&self, bytes: &[u8]) -> io::Result<()> {
        let mut data = self.data.lock().expect("data lock poisoned");
        data.write_all(bytes)
    }

    /// Size of the data file, covering only fully written records.
    pub fn size_data(&self) -> io::Result<u64> {
        let data = self.data.lock().expect("data lock poisoned");
        Ok(data.metadata()?.len())
    }

    /// Size of the `.trimmed` file, covering only fully written entries.
    pub fn size_trimmed(&self) -> io::Result<u64> {
        let file = self.trimmed_file.lock().expect("trimmed lock poisoned");
        Ok(file.metadata()?.len())
    }

    /// Size of the `.pending` file, covering only fully written entries.
    pub fn size_pending(&self) -> io::Result<u64> {
        let file = self.pending_file.lock().expect("pending lock poisoned");
        Ok(file.metadata()?.len())
    }

    /// Forces the data channel to disk.
    pub fn sync_data(&self) -> io::Result<()> {
        let data = self.data.lock().expect("data lock poisoned");
        data.sync_all()
    }

    /// Runs `f` with the fresh data channel of a new segment, for writing
    /// the file header before the handle is published.
    pub(crate) fn with_data_file<T>(
        &self,
        f: impl FnOnce(&mut File) -> io::Result<T>,
    ) -> io::Result<T> {
        let mut data = self.data.lock().expect("data lock poisoned");
        f(&mut data)
    }

    /// Appends a trim entry to `.pending` and flushes it.
    pub fn append_pending(&self, entry: &TrimEntry) -> io::Result<()> {
        let mut file = self.pending_file.lock().expect("pending lock poisoned");
        entry.write_delimited(&mut *file)?;
        file.sync_all()
    }

    /// Appends a trim entry to `.trimmed`.
    pub fn append_trimmed(&self, entry: &TrimEntry) -> io::Result<()> {
        let mut file = self.trimmed_file.lock().expect("trimmed lock poisoned");
        entry.write_delimited(&mut *file)
    }

    /// Forces the committed-trim channel to disk.
    pub fn sync_trimmed(&self) -> io::Result<()> {
        let file = self.trimmed_file.lock().expect("trimmed lock poisoned");
        file.sync_all()
    }

    /// Empties the `.pending` file and the in-memory pending set.
    pub fn clear_pending(&self) -> io::Result<()> {
        let file = self.pending_file.lock().expect("pending lock poisoned");
        file.set_len(0)?;
        file.sync_all()?;
        self.pending.write().expect("pending set poisoned").clear();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Address sets. Inserts are idempotent; membership checks are atomic.
    // Compound check-then-insert sequences are the caller's concern.
    // ------------------------------------------------------------------

    pub fn is_known(&self, address: Address) -> bool {
        self.known.read().expect("known set poisoned").contains(&address)
    }

    pub fn is_trimmed(&self, address: Address) -> bool {
        self.trimmed
            .read()
            .expect("trimmed set poisoned")
            .contains(&address)
    }

    pub fn is_pending(&self, address: Address) -> bool {
        self.pending
            .read()
            .expect("pending set poisoned")
            .contains(&address)
    }

    pub fn add_known(&self, address: Address) {
        self.known.write().expect("known set poisoned").insert(address);
    }

    pub fn add_trimmed(&self, address: Address) {
        self.trimmed
            .write()
            .expect("trimmed set poisoned")
            .insert(address);
    }

    pub fn add_pending(&self, address: Address) {
        self.pending
            .write()
            .expect("pending set poisoned")
            .insert(address);
    }

    pub fn known_len(&self) -> usize {
        self.known.read().expect("known set poisoned").len()
    }

    pub fn trimmed_len(&self) -> usize {
        self.trimmed.read().expect("trimmed set poisoned").len()
    }

    /// Addresses newly eligible for compaction: `pending \ trimmed`.
    pub fn pending_not_trimmed(&self) -> HashSet<Address> {
        let pending = self.pending.read().expect("pending set poisoned");
        let trimmed = self.trimmed.read().expect("trimmed set poisoned");
        pending.difference(&trimmed).copied().collect()
    }

    /// Force-flushes all three channels and clears the address sets.
    /// Errors are logged, not surfaced; close is best-effort on the way
    /// down.
    pub fn close(&self) {
        for (name, file) in [
            ("data", &self.data),
            ("trimmed", &self.trimmed_file),
            ("pending", &self.pending_file),
        ] {
            let file = file.lock().expect("channel lock poisoned");
            if let Err(e) = file.sync_all() {
                tracing::warn!(path = %self.path.display(), channel = name, error = %e, "error flushing channel on close");
            }
        }

        self.known.write().expect("known set poisoned").clear();
        self.trimmed.write().expect("trimmed set poisoned").clear();
        self.pending.write().expect("pending set poisoned").clear();
    }
}

/// Sidecar path for a data file: `42.log` -> `42.log.trimmed`.
pub(crate) fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}
