//! On-disk log entry codec.
//!
//! A [`LogEntry`] is the serialized form of a [`LogData`] plus the global
//! address it was appended at. The encoding is deterministic: collections
//! are ordered, integers are little-endian, and re-encoding a decoded entry
//! reproduces the input bytes (compaction relies on this when it re-frames
//! records it copies).
//!
//! # Entry Format
//!
//! ```text
//! [data_type:u8][global_address:i64][rank:i64][commit:u8]
//! [payload_len:u32][payload:bytes]
//! [stream_count:u32]([stream_id:16B])*
//! [backpointer_count:u32]([stream_id:16B][address:i64])*
//! [logical_count:u32]([stream_id:16B][address:i64])*
//! ```
//!
//! Stream sets and maps are written in ascending stream-id order.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;
use weft_types::{Address, DataType, LogData, StreamId};

use crate::StorageError;

/// Fixed-size prefix: tag(1) + address(8) + rank(8) + commit(1) + payload_len(4).
const FIXED_PREFIX_SIZE: usize = 22;

/// A single record in a segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub data_type: DataType,
    pub global_address: Address,
    pub rank: i64,
    pub commit: bool,
    pub payload: Bytes,
    pub streams: BTreeSet<StreamId>,
    pub backpointers: BTreeMap<StreamId, i64>,
    pub logical_addresses: BTreeMap<StreamId, i64>,
}

impl LogEntry {
    /// Builds the on-disk entry for an append.
    ///
    /// The entry's global address is stamped from the address the append
    /// targets, not from whatever the caller put in `data`.
    pub fn from_data(address: Address, data: &LogData) -> Self {
        Self {
            data_type: data.data_type,
            global_address: address,
            rank: data.rank,
            commit: data.commit,
            payload: data.payload.clone(),
            streams: data.streams.clone(),
            backpointers: data.backpointers.clone(),
            logical_addresses: data.logical_addresses.clone(),
        }
    }

    /// Materializes the caller-facing record.
    pub fn into_data(self) -> LogData {
        LogData {
            data_type: self.data_type,
            global_address: self.global_address,
            payload: self.payload,
            rank: self.rank,
            commit: self.commit,
            streams: self.streams,
            backpointers: self.backpointers,
            logical_addresses: self.logical_addresses,
        }
    }

    /// Serializes the entry to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let size = FIXED_PREFIX_SIZE
            + self.payload.len()
            + 4
            + self.streams.len() * 16
            + 4
            + self.backpointers.len() * 24
            + 4
            + self.logical_addresses.len() * 24;
        let mut buf = Vec::with_capacity(size);

        buf.push(self.data_type.as_u8());
        buf.extend_from_slice(&self.global_address.as_i64().to_le_bytes());
        buf.extend_from_slice(&self.rank.to_le_bytes());
        buf.push(u8::from(self.commit));

        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);

        buf.extend_from_slice(&(self.streams.len() as u32).to_le_bytes());
        for stream in &self.streams {
            buf.extend_from_slice(stream.as_bytes());
        }

        encode_stream_map(&mut buf, &self.backpointers);
        encode_stream_map(&mut buf, &self.logical_addresses);

        debug_assert_eq!(buf.len(), size, "encoded size mismatch");
        buf
    }

    /// Deserializes an entry from a frame body.
    ///
    /// Uses zero-copy slicing for the payload via [`Bytes::slice`].
    ///
    /// # Errors
    ///
    /// - [`StorageError::UnexpectedEof`] if the body is shorter than its
    ///   declared contents
    /// - [`StorageError::InvalidDataType`] on an unknown tag byte
    pub fn decode(data: &Bytes) -> Result<Self, StorageError> {
        let mut cursor = Cursor::new(data);

        let tag = cursor.read_u8()?;
        let data_type = DataType::try_from(tag).map_err(StorageError::InvalidDataType)?;
        let raw_address = cursor.read_i64()?;
        if raw_address < 0 {
            return Err(StorageError::InvalidAddress(raw_address));
        }
        let global_address = Address::new(raw_address);
        let rank = cursor.read_i64()?;
        let commit = cursor.read_u8()? != 0;

        let payload_len = cursor.read_u32()? as usize;
        let payload = cursor.read_slice(payload_len)?;

        let stream_count = cursor.read_u32()? as usize;
        let mut streams = BTreeSet::new();
        for _ in 0..stream_count {
            streams.insert(cursor.read_stream_id()?);
        }

        let backpointers = decode_stream_map(&mut cursor)?;
        let logical_addresses = decode_stream_map(&mut cursor)?;

        Ok(Self {
            data_type,
            global_address,
            rank,
            commit,
            payload,
            streams,
            backpointers,
            logical_addresses,
        })
    }
}

fn encode_stream_map(buf: &mut Vec<u8>, map: &BTreeMap<StreamId, i64>) {
    buf.extend_from_slice(&(map.len() as u32).to_le_bytes());
    for (stream, value) in map {
        buf.extend_from_slice(stream.as_bytes());
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

fn decode_stream_map(cursor: &mut Cursor<'_>) -> Result<BTreeMap<StreamId, i64>, StorageError> {
    let count = cursor.read_u32()? as usize;
    let mut map = BTreeMap::new();
    for _ in 0..count {
        let stream = cursor.read_stream_id()?;
        let value = cursor.read_i64()?;
        map.insert(stream, value);
    }
    Ok(map)
}

/// Bounds-checked reader over a frame body.
struct Cursor<'a> {
    data: &'a Bytes,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a Bytes) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], StorageError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(StorageError::UnexpectedEof)?;
        if end > self.data.len() {
            return Err(StorageError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, StorageError> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32, StorageError> {
        Ok(u32::from_le_bytes(
            self.take(4)?
                .try_into()
                .expect("slice is exactly 4 bytes after bounds check"),
        ))
    }

    fn read_i64(&mut self) -> Result<i64, StorageError> {
        Ok(i64::from_le_bytes(
            self.take(8)?
                .try_into()
                .expect("slice is exactly 8 bytes after bounds check"),
        ))
    }

    fn read_stream_id(&mut self) -> Result<StreamId, StorageError> {
        let bytes: [u8; 16] = self
            .take(16)?
            .try_into()
            .expect("slice is exactly 16 bytes after bounds check");
        Ok(StreamId::from_bytes(bytes))
    }

    fn read_slice(&mut self, len: usize) -> Result<Bytes, StorageError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(StorageError::UnexpectedEof)?;
        if end > self.data.len() {
            return Err(StorageError::UnexpectedEof);
        }
        let slice = self.data.slice(self.pos..end);
        self.pos = end;
        Ok(slice)
    }
}
