//! Binary codec for a single WAL entry.

use byteorder::{LittleEndian, ReadBytesExt};
use crc32fast::Hasher as Crc32;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{WalError, MAX_KEY_BYTES, MAX_VALUE_BYTES};

/// Size of the fixed header: crc(4) + timestamp(8) + tombstone(1) + key_size(8) + value_size(8).
pub const HEADER_SIZE: usize = 29;

const CRC_SIZE: usize = 4;

/// One logical WAL record.
///
/// The CRC is computed when the entry is built and is carried verbatim when
/// it is decoded, so [`validate`](WalEntry::validate) on a decoded entry
/// compares the stored checksum against the bytes that were actually read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalEntry {
    crc: u32,
    timestamp: u64,
    tombstone: bool,
    key: Vec<u8>,
    value: Vec<u8>,
}

impl WalEntry {
    /// Builds an entry stamped with the current wall-clock second.
    pub fn new(key: Vec<u8>, value: Vec<u8>, tombstone: bool) -> Self {
        Self::with_timestamp(key, value, tombstone, now_secs())
    }

    /// Builds an entry with an explicit timestamp and a freshly computed CRC.
    pub fn with_timestamp(key: Vec<u8>, value: Vec<u8>, tombstone: bool, timestamp: u64) -> Self {
        let mut entry = Self {
            crc: 0,
            timestamp,
            tombstone,
            key,
            value,
        };
        entry.crc = entry.compute_crc();
        entry
    }

    #[must_use]
    pub fn crc(&self) -> u32 {
        self.crc
    }

    /// Seconds since the Unix epoch.
    #[must_use]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.tombstone
    }

    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    #[must_use]
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Consumes the entry, returning `(key, value)`.
    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        (self.key, self.value)
    }

    /// Number of bytes this entry occupies in the log.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.value.len()
    }

    /// Serializes the entry with its stored CRC.
    ///
    /// ```text
    /// [crc: u32][timestamp: u64][tombstone: u8][key_size: u64][value_size: u64][key][value]
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        self.encode_with_crc(self.crc)
    }

    /// Recomputes the CRC over the serialized form (CRC field zeroed) and
    /// compares it with the stored one.
    #[must_use]
    pub fn validate(&self) -> bool {
        self.compute_crc() == self.crc
    }

    /// Decodes one entry from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds only part of an entry; the caller
    /// should supply more bytes and try again. Returns the entry and the
    /// number of bytes it consumed otherwise. The CRC is **not** checked
    /// here; call [`validate`](WalEntry::validate).
    ///
    /// # Errors
    ///
    /// [`WalError::Corrupt`] if the tombstone byte is not 0/1 or a size field
    /// exceeds the key/value caps.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>, WalError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut hdr = &buf[..HEADER_SIZE];
        let crc = hdr.read_u32::<LittleEndian>()?;
        let timestamp = hdr.read_u64::<LittleEndian>()?;
        let tombstone = match hdr.read_u8()? {
            0 => false,
            1 => true,
            other => {
                return Err(WalError::Corrupt(format!("tombstone byte {:#04x}", other)));
            }
        };
        let key_size = hdr.read_u64::<LittleEndian>()?;
        let value_size = hdr.read_u64::<LittleEndian>()?;

        if key_size > MAX_KEY_BYTES as u64 {
            return Err(WalError::Corrupt(format!("key size {} exceeds cap", key_size)));
        }
        if value_size > MAX_VALUE_BYTES as u64 {
            return Err(WalError::Corrupt(format!("value size {} exceeds cap", value_size)));
        }

        let key_end = HEADER_SIZE + key_size as usize;
        let total = key_end + value_size as usize;
        if buf.len() < total {
            return Ok(None);
        }

        let entry = Self {
            crc,
            timestamp,
            tombstone,
            key: buf[HEADER_SIZE..key_end].to_vec(),
            value: buf[key_end..total].to_vec(),
        };
        Ok(Some((entry, total)))
    }

    fn encode_with_crc(&self, crc: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&crc.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.to_le_bytes());
        buf.push(u8::from(self.tombstone));
        buf.extend_from_slice(&(self.key.len() as u64).to_le_bytes());
        buf.extend_from_slice(&(self.value.len() as u64).to_le_bytes());
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);
        buf
    }

    fn compute_crc(&self) -> u32 {
        let bytes = self.encode_with_crc(0);
        let mut hasher = Crc32::new();
        hasher.update(&bytes);
        hasher.finalize()
    }
}

/// Current wall-clock time in whole seconds.
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

const _: () = assert!(CRC_SIZE + 8 + 1 + 8 + 8 == HEADER_SIZE);
