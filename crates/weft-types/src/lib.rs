//! # weft-types: Core types for the weft log fabric
//!
//! This crate contains shared types used across the weft system:
//! - Log addressing ([`Address`], [`StreamId`], [`LogAddress`])
//! - Record classification ([`DataType`])
//! - The caller-facing record ([`LogData`])
//!
//! Addresses are absolute positions in a single global log. An address can
//! optionally be tagged with a stream identifier, which partitions the
//! on-disk namespace: untagged addresses live in one global space, tagged
//! addresses form a per-stream space.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::Display,
    ops::{Add, AddAssign, Sub},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Address - Copy (cheap 8-byte value)
// ============================================================================

/// Absolute position of a record in the log.
///
/// Addresses are assigned monotonically by the sequencer and never reused.
/// Uses i64 internally (signed 64-bit for compatibility with the on-disk
/// trim-entry encoding).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Address(i64);

impl Address {
    pub const ZERO: Address = Address(0);

    pub fn new(address: i64) -> Self {
        debug_assert!(address >= 0, "Address cannot be negative");
        Self(address)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Returns the segment this address is packed into.
    ///
    /// Addresses are densely packed into fixed-size segments of
    /// `records_per_segment` consecutive addresses. The mapping is
    /// deterministic and never stored.
    pub fn segment(&self, records_per_segment: i64) -> i64 {
        debug_assert!(records_per_segment > 0, "segment size must be positive");
        self.0 / records_per_segment
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Address {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Address {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Address {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl From<i64> for Address {
    fn from(value: i64) -> Self {
        debug_assert!(value >= 0, "Address cannot be negative");
        Self(value)
    }
}

impl From<Address> for i64 {
    fn from(address: Address) -> Self {
        address.0
    }
}

// ============================================================================
// StreamId - Copy (16-byte value)
// ============================================================================

/// Unique 128-bit identifier for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamId(Uuid);

impl StreamId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    /// Generates a fresh random stream identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for StreamId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<StreamId> for Uuid {
    fn from(id: StreamId) -> Self {
        id.0
    }
}

// ============================================================================
// LogAddress - Copy (optional tag + address)
// ============================================================================

/// A global address, optionally tagged with the stream it belongs to.
///
/// The tag selects the namespace: for a given `(stream, address)` pair there
/// is at most one materialized record. Tagged and untagged addresses with
/// equal numeric values are distinct records in distinct segment files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogAddress {
    pub stream: Option<StreamId>,
    pub address: Address,
}

impl LogAddress {
    /// An address in the global, untagged namespace.
    pub fn untagged(address: impl Into<Address>) -> Self {
        Self {
            stream: None,
            address: address.into(),
        }
    }

    /// An address in a per-stream namespace.
    pub fn tagged(stream: StreamId, address: impl Into<Address>) -> Self {
        Self {
            stream: Some(stream),
            address: address.into(),
        }
    }
}

impl Display for LogAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.stream {
            Some(stream) => write!(f, "{}@{}", self.address, stream),
            None => write!(f, "{}", self.address),
        }
    }
}

// ============================================================================
// DataType - Copy (simple tag enum)
// ============================================================================

/// Classification tag carried by every log record.
///
/// The storage engine treats the tag as opaque; it is interpreted by the
/// layers above (hole-filling, ranked writes, trim markers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DataType {
    Data = 0,
    Empty = 1,
    Hole = 2,
    Trimmed = 3,
    RankOnly = 4,
}

impl DataType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for DataType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(DataType::Data),
            1 => Ok(DataType::Empty),
            2 => Ok(DataType::Hole),
            3 => Ok(DataType::Trimmed),
            4 => Ok(DataType::RankOnly),
            other => Err(other),
        }
    }
}

// ============================================================================
// LogData - Clone (Bytes payload is cheap to clone)
// ============================================================================

/// The caller-facing log record.
///
/// Everything except `global_address` is opaque to the storage engine.
/// The engine stamps `global_address` from the address an append targets,
/// and the invariant `global_address == appended address` holds for every
/// record materialized from disk.
///
/// Collections are ordered (`BTreeSet`/`BTreeMap`) so the on-disk encoding
/// of a record is deterministic and byte-stable across rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogData {
    pub data_type: DataType,
    pub global_address: Address,
    /// The opaque payload (zero-copy Bytes).
    pub payload: Bytes,
    /// Rank for ranked (contended) writes.
    pub rank: i64,
    /// Set when the entry has been committed by the transaction layer.
    pub commit: bool,
    /// Streams this entry belongs to.
    pub streams: BTreeSet<StreamId>,
    /// Per-stream backpointers to the previous entry of each stream.
    pub backpointers: BTreeMap<StreamId, i64>,
    /// Per-stream logical addresses of this entry.
    pub logical_addresses: BTreeMap<StreamId, i64>,
}

impl LogData {
    /// Creates a plain data record with the given payload.
    ///
    /// The global address is stamped by the engine on append; the default
    /// here is only a placeholder.
    pub fn new(data_type: DataType, payload: impl Into<Bytes>) -> Self {
        Self {
            data_type,
            global_address: Address::ZERO,
            payload: payload.into(),
            rank: 0,
            commit: false,
            streams: BTreeSet::new(),
            backpointers: BTreeMap::new(),
            logical_addresses: BTreeMap::new(),
        }
    }
}
