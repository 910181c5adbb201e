//! In-memory log for tests.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use weft_types::{Address, LogAddress, LogData, StreamId};

use crate::{StorageError, StreamLog};

type Key = (Option<StreamId>, Address);

/// An in-memory [`StreamLog`].
///
/// Mirrors the observable append/read/trim semantics of the file-backed
/// engine without touching disk. Suitable for unit tests and for callers
/// that need an ephemeral log. `compact` drops pending-trimmed records
/// immediately (there is no segment fullness to wait for) and `sync` is a
/// no-op.
#[derive(Debug, Default)]
pub struct InMemoryLog {
    records: RwLock<HashMap<Key, LogData>>,
    trimmed: RwLock<HashSet<Key>>,
    pending: RwLock<HashSet<Key>>,
}

impl InMemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(address: &LogAddress) -> Key {
        (address.stream, address.address)
    }
}

impl StreamLog for InMemoryLog {
    fn append(&self, address: LogAddress, data: LogData) -> Result<(), StorageError> {
        let key = Self::key(&address);

        let mut records = self.records.write().expect("records poisoned");
        let trimmed = self.trimmed.read().expect("trimmed poisoned");
        if records.contains_key(&key) || trimmed.contains(&key) {
            return Err(StorageError::Overwrite(address.address));
        }

        let mut data = data;
        data.global_address = address.address;
        records.insert(key, data);
        Ok(())
    }

    fn read(&self, address: LogAddress) -> Result<Option<LogData>, StorageError> {
        let records = self.records.read().expect("records poisoned");
        Ok(records.get(&Self::key(&address)).cloned())
    }

    fn trim(&self, address: LogAddress) -> Result<(), StorageError> {
        let key = Self::key(&address);

        if self.trimmed.read().expect("trimmed poisoned").contains(&key) {
            return Ok(());
        }
        self.pending.write().expect("pending poisoned").insert(key);
        Ok(())
    }

    fn compact(&self) {
        let mut records = self.records.write().expect("records poisoned");
        let mut trimmed = self.trimmed.write().expect("trimmed poisoned");
        let mut pending = self.pending.write().expect("pending poisoned");

        for key in pending.drain() {
            records.remove(&key);
            trimmed.insert(key);
        }
    }

    fn sync(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn close(&self) {
        self.records.write().expect("records poisoned").clear();
        self.trimmed.write().expect("trimmed poisoned").clear();
        self.pending.write().expect("pending poisoned").clear();
    }
}
