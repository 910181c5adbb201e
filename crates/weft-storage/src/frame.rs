//! Metadata frame and file header codec.
//!
//! Every unit written to a segment file is a frame: a fixed-size metadata
//! prefix protecting a variable-length body with a CRC32C checksum.
//!
//! # Frame Format
//!
//! ```text
//! [checksum:u32][length:u32][body:bytes]
//!      4B           4B        variable
//! ```
//!
//! - **checksum**: CRC32C (Castagnoli) of the body
//! - **length**: size of the body in bytes
//!
//! Integers are little-endian. The metadata prefix is exactly
//! [`METADATA_SIZE`] bytes, so a reader can always consume it before
//! deciding how much body to read.
//!
//! The first frame of every segment file carries the [`FileHeader`]; it is
//! written without a record delimiter. Record frames that follow it are
//! prefixed with the big-endian delimiter [`RECORD_DELIMITER`].

use std::fs::File;
use std::io::{self, Write};

use crate::StorageError;

/// Serialized size of the frame metadata prefix.
pub const METADATA_SIZE: usize = 8;

/// Two-byte record delimiter, written big-endian ("LE" in ASCII).
pub const RECORD_DELIMITER: u16 = 0x4C45;

/// On-disk format version.
pub const VERSION: u32 = 1;

/// Serialized size of a [`FileHeader`] body.
pub const FILE_HEADER_BODY_SIZE: usize = 5;

/// CRC32C of an arbitrary byte string.
pub fn checksum(bytes: &[u8]) -> u32 {
    crc32c::crc32c(bytes)
}

/// CRC32C of an address, hashing its 8-byte little-endian encoding.
pub fn address_checksum(address: i64) -> u32 {
    crc32c::crc32c(&address.to_le_bytes())
}

/// The fixed-size metadata prefix of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub checksum: u32,
    pub length: u32,
}

impl FrameHeader {
    /// Computes the metadata for a body.
    pub fn for_body(body: &[u8]) -> Self {
        Self {
            checksum: checksum(body),
            length: body.len() as u32,
        }
    }

    pub fn encode(&self) -> [u8; METADATA_SIZE] {
        let mut buf = [0u8; METADATA_SIZE];
        buf[0..4].copy_from_slice(&self.checksum.to_le_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Decodes the metadata prefix from the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::UnexpectedEof`] if fewer than
    /// [`METADATA_SIZE`] bytes are available.
    pub fn decode(data: &[u8]) -> Result<Self, StorageError> {
        if data.len() < METADATA_SIZE {
            return Err(StorageError::UnexpectedEof);
        }

        let checksum = u32::from_le_bytes(
            data[0..4]
                .try_into()
                .expect("slice is exactly 4 bytes after bounds check"),
        );
        let length = u32::from_le_bytes(
            data[4..8]
                .try_into()
                .expect("slice is exactly 4 bytes after bounds check"),
        );

        Ok(Self { checksum, length })
    }

    /// Verifies that `body` matches the recorded checksum.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ChecksumMismatch`] on mismatch.
    pub fn verify(&self, body: &[u8]) -> Result<(), StorageError> {
        let actual = checksum(body);
        if actual != self.checksum {
            return Err(StorageError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }
}

/// Wraps a body in a frame: metadata prefix followed by the body.
pub fn encode_framed(body: &[u8]) -> Vec<u8> {
    let header = FrameHeader::for_body(body);
    let mut buf = Vec::with_capacity(METADATA_SIZE + body.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(body);
    buf
}

/// The first record of every segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    /// On-disk format version. A mismatch is fatal for the segment.
    pub version: u32,
    /// Whether the records in this file were written for verification.
    pub verify_checksum: bool,
}

impl FileHeader {
    pub fn new(verify_checksum: bool) -> Self {
        Self {
            version: VERSION,
            verify_checksum,
        }
    }

    /// Format: `[version:u32][verify_checksum:u8]`, little-endian.
    pub fn encode_body(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FILE_HEADER_BODY_SIZE);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.push(u8::from(self.verify_checksum));
        buf
    }

    /// # Errors
    ///
    /// Returns [`StorageError::UnexpectedEof`] if the body is truncated.
    pub fn decode_body(data: &[u8]) -> Result<Self, StorageError> {
        if data.len() < FILE_HEADER_BODY_SIZE {
            return Err(StorageError::UnexpectedEof);
        }

        let version = u32::from_le_bytes(
            data[0..4]
                .try_into()
                .expect("slice is exactly 4 bytes after bounds check"),
        );
        let verify_checksum = data[4] != 0;

        Ok(Self {
            version,
            verify_checksum,
        })
    }
}

/// Writes a framed [`FileHeader`] to a fresh segment file and forces it to
/// disk, so an empty-but-created segment is never observable.
pub fn write_file_header(file: &mut File, verify_checksum: bool) -> io::Result<()> {
    let header = FileHeader::new(verify_checksum);
    file.write_all(&encode_framed(&header.encode_body()))?;
    file.sync_all()
}

/// Reads and validates the header frame at the start of `data`.
///
/// The header checksum is verified unconditionally; a segment whose header
/// cannot be trusted cannot be scanned at all.
///
/// # Errors
///
/// - [`StorageError::UnexpectedEof`] if the file is shorter than a header
/// - [`StorageError::ChecksumMismatch`] if the header fails verification
pub fn read_file_header(data: &[u8]) -> Result<FileHeader, StorageError> {
    let meta = FrameHeader::decode(data)?;

    let body_end = METADATA_SIZE + meta.length as usize;
    if data.len() < body_end {
        return Err(StorageError::UnexpectedEof);
    }

    let body = &data[METADATA_SIZE..body_end];
    meta.verify(body)?;

    FileHeader::decode_body(body)
}

/// Byte offset of the first record frame, given the header frame at the
/// start of `data`.
pub fn records_start(data: &[u8]) -> Result<usize, StorageError> {
    let meta = FrameHeader::decode(data)?;
    Ok(METADATA_SIZE + meta.length as usize)
}
