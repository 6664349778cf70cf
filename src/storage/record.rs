//! On-disk record format for the advertisement cache
//!
//! ```text
//! +------------------+
//! | Record Length    | (u32 LE, total including this field and checksum)
//! +------------------+
//! | Key              | (length-prefixed string: "namespace/name")
//! +------------------+
//! | Lifetime         | (u64 LE, absolute ms since the Unix epoch)
//! +------------------+
//! | Expiration       | (u64 LE, duration ms)
//! +------------------+
//! | Tombstone Flag   | (u8: 0 = live, 1 = deleted)
//! +------------------+
//! | Payload          | (length-prefixed bytes)
//! +------------------+
//! | Checksum         | (u32 LE)
//! +------------------+
//! ```
//!
//! The checksum covers all bytes except the checksum itself. Lifetime is the
//! absolute local-retention deadline; expiration bounds how long the payload
//! is considered fresh enough to share remotely. The store persists both
//! verbatim, the cache layer owns their semantics.

use std::io::{self, Read};

/// Lifetime value meaning "retain until explicitly removed".
pub const LIFETIME_UNBOUNDED: u64 = u64::MAX;

/// Minimum possible encoded record size in bytes.
pub(crate) const MIN_RECORD_SIZE: usize = 4 + 4 + 8 + 8 + 1 + 4 + 4;

/// A cache record as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    /// Composite key: `namespace/name`
    pub key: String,
    /// Absolute local invalidation instant (ms since the Unix epoch)
    pub lifetime: u64,
    /// Remote-shareable freshness bound, fixed at write time (ms)
    pub expiration: u64,
    /// Whether this record is a delete marker
    pub is_tombstone: bool,
    /// Opaque advertisement payload (empty for tombstones)
    pub payload: Vec<u8>,
}

impl CacheRecord {
    /// Create a live record.
    pub fn new(key: impl Into<String>, payload: Vec<u8>, lifetime: u64, expiration: u64) -> Self {
        Self {
            key: key.into(),
            lifetime,
            expiration,
            is_tombstone: false,
            payload,
        }
    }

    /// Create a tombstone marking the key as deleted.
    pub fn tombstone(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            lifetime: 0,
            expiration: 0,
            is_tombstone: true,
            payload: Vec::new(),
        }
    }

    /// Serialize the record body (everything between length prefix and checksum).
    fn serialize_body(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.key.len() + self.payload.len() + 32);

        buf.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.key.as_bytes());

        buf.extend_from_slice(&self.lifetime.to_le_bytes());
        buf.extend_from_slice(&self.expiration.to_le_bytes());

        buf.push(if self.is_tombstone { 1 } else { 0 });

        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);

        buf
    }

    /// Serialize the complete record to bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let body = self.serialize_body();
        let record_length = (4 + body.len() + 4) as u32;

        // Checksum covers length prefix + body
        let mut checksum_data = Vec::with_capacity(4 + body.len());
        checksum_data.extend_from_slice(&record_length.to_le_bytes());
        checksum_data.extend_from_slice(&body);
        let checksum = super::checksum::compute_checksum(&checksum_data);

        let mut record = Vec::with_capacity(record_length as usize);
        record.extend_from_slice(&record_length.to_le_bytes());
        record.extend_from_slice(&body);
        record.extend_from_slice(&checksum.to_le_bytes());

        record
    }

    /// Deserialize a record from bytes, verifying the checksum.
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn deserialize(data: &[u8]) -> io::Result<(Self, usize)> {
        if data.len() < MIN_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "record too short",
            ));
        }

        let record_length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;

        if record_length < MIN_RECORD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid record length: {}", record_length),
            ));
        }

        if data.len() < record_length {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "record truncated: expected {} bytes, got {}",
                    record_length,
                    data.len()
                ),
            ));
        }

        let checksum_offset = record_length - 4;
        let stored_checksum = u32::from_le_bytes([
            data[checksum_offset],
            data[checksum_offset + 1],
            data[checksum_offset + 2],
            data[checksum_offset + 3],
        ]);

        if !super::checksum::verify_checksum(&data[0..checksum_offset], stored_checksum) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("checksum mismatch: stored {:08x}", stored_checksum),
            ));
        }

        let mut cursor = io::Cursor::new(&data[4..checksum_offset]);

        fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf)?;
            Ok(u32::from_le_bytes(buf))
        }

        fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
            let mut buf = [0u8; 8];
            reader.read_exact(&mut buf)?;
            Ok(u64::from_le_bytes(buf))
        }

        let key_len = read_u32(&mut cursor)? as usize;
        let mut key_buf = vec![0u8; key_len];
        cursor.read_exact(&mut key_buf)?;
        let key = String::from_utf8(key_buf)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("invalid UTF-8: {}", e)))?;

        let lifetime = read_u64(&mut cursor)?;
        let expiration = read_u64(&mut cursor)?;

        let mut tombstone_buf = [0u8; 1];
        cursor.read_exact(&mut tombstone_buf)?;
        let is_tombstone = tombstone_buf[0] != 0;

        let payload_len = read_u32(&mut cursor)? as usize;
        let mut payload = vec![0u8; payload_len];
        cursor.read_exact(&mut payload)?;

        Ok((
            Self {
                key,
                lifetime,
                expiration,
                is_tombstone,
                payload,
            },
            record_length,
        ))
    }
}
