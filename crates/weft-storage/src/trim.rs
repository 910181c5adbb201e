//! Trim entry codec for the `.pending` and `.trimmed` sidecar files.
//!
//! Trim files are a sequence of length-delimited entries:
//!
//! ```text
//! [length:varint][checksum:u32][address:i64]
//!    1-2B            4B            8B
//! ```
//!
//! The length prefix is an unsigned LEB128 varint and the body is a fixed
//! 12 bytes, little-endian. The checksum is the CRC32C of the address's
//! 8-byte little-endian encoding.

use std::io::{self, Read, Write};

use weft_types::Address;

use crate::frame::address_checksum;
use crate::StorageError;

/// Serialized size of a trim entry body.
pub const TRIM_ENTRY_SIZE: usize = 12;

/// A durable trim marker for one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrimEntry {
    pub checksum: u32,
    pub address: Address,
}

impl TrimEntry {
    pub fn new(address: Address) -> Self {
        Self {
            checksum: address_checksum(address.as_i64()),
            address,
        }
    }

    pub fn encode_body(&self) -> [u8; TRIM_ENTRY_SIZE] {
        let mut buf = [0u8; TRIM_ENTRY_SIZE];
        buf[0..4].copy_from_slice(&self.checksum.to_le_bytes());
        buf[4..12].copy_from_slice(&self.address.as_i64().to_le_bytes());
        buf
    }

    /// # Errors
    ///
    /// Returns [`StorageError::ChecksumMismatch`] if the recorded checksum
    /// does not match the address.
    pub fn decode_body(data: &[u8; TRIM_ENTRY_SIZE]) -> Result<Self, StorageError> {
        let checksum = u32::from_le_bytes(
            data[0..4]
                .try_into()
                .expect("slice is exactly 4 bytes after bounds check"),
        );
        let raw_address = i64::from_le_bytes(
            data[4..12]
                .try_into()
                .expect("slice is exactly 8 bytes after bounds check"),
        );

        let expected = address_checksum(raw_address);
        if checksum != expected {
            return Err(StorageError::ChecksumMismatch {
                expected,
                actual: checksum,
            });
        }
        if raw_address < 0 {
            return Err(StorageError::InvalidAddress(raw_address));
        }

        Ok(Self {
            checksum,
            address: Address::new(raw_address),
        })
    }

    /// Writes the entry with its varint length prefix.
    pub fn write_delimited(&self, writer: &mut impl Write) -> io::Result<()> {
        let mut buf = Vec::with_capacity(1 + TRIM_ENTRY_SIZE);
        encode_varint_u64(&mut buf, TRIM_ENTRY_SIZE as u64);
        buf.extend_from_slice(&self.encode_body());
        writer.write_all(&buf)
    }

    /// Reads the next length-delimited entry.
    ///
    /// Returns `Ok(None)` at a clean end of file.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidTrimLength`] if the prefix is not the fixed
    ///   body size
    /// - [`StorageError::UnexpectedEof`] if the file ends mid-entry
    /// - [`StorageError::ChecksumMismatch`] on a corrupted body
    pub fn read_delimited(reader: &mut impl Read) -> Result<Option<Self>, StorageError> {
        let length = match read_varint_u64(reader)? {
            Some(length) => length,
            None => return Ok(None),
        };
        if length != TRIM_ENTRY_SIZE as u64 {
            return Err(StorageError::InvalidTrimLength(length));
        }

        let mut body = [0u8; TRIM_ENTRY_SIZE];
        reader
            .read_exact(&mut body)
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => StorageError::UnexpectedEof,
                _ => StorageError::Io(e),
            })?;

        Self::decode_body(&body).map(Some)
    }
}

/// Appends `value` as an unsigned LEB128 varint.
fn encode_varint_u64(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80;
        }

        buf.push(byte);

        if value == 0 {
            break;
        }
    }
}

/// Reads an unsigned LEB128 varint.
///
/// Returns `Ok(None)` on end of file before the first byte.
fn read_varint_u64(reader: &mut impl Read) -> Result<Option<u64>, StorageError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    let mut first = true;

    loop {
        let mut byte = [0u8; 1];
        match reader.read_exact(&mut byte) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                if first {
                    return Ok(None);
                }
                return Err(StorageError::UnexpectedEof);
            }
            Err(e) => return Err(e.into()),
        }
        first = false;

        value |= u64::from(byte[0] & 0x7F) << shift;

        if byte[0] & 0x80 == 0 {
            return Ok(Some(value));
        }

        shift += 7;
        if shift >= 64 {
            return Err(StorageError::InvalidTrimLength(value));
        }
    }
}

#[cfg(test)]
pub(crate) fn encode_varint_for_tests(value: u64) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_varint_u64(&mut buf, value);
    buf
}
