//! SSTable binary format: header, data records and zone pointers.
//!
//! ## Header (32 bytes)
//!
//! ```text
//! [f0: u64 LE][f1: u64 LE][f2: u64 LE][f3: u64 LE]
//! ```
//!
//! - `f0 = data_size + 32`: absolute end of the data zone (the index starts here).
//! - `f1 = index_size + 32`: the summary zone starts at `f0 + f1 - 32`.
//! - `f2`: absolute start of the bloom-filter zone.
//! - `f3`: byte length of the bloom bit array.
//!
//! ## Data record
//!
//! ```text
//! [key_size: u64][value_size: u64][timestamp: u64][tombstone: u8][key][value]
//! ```
//!
//! ## Index / summary record
//!
//! ```text
//! [key_len: u64][key][offset: u64]
//! ```

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memtable::MemTableEntry;
use std::io::{self, Read, Write};

/// Size of the fixed header at the start of every table.
pub const HEADER_SIZE: u64 = 32;

/// Fixed part of a data record: sizes, timestamp and tombstone flag.
pub const RECORD_HEADER_SIZE: u64 = 8 + 8 + 8 + 1;

/// Maximum key size we'll allocate during reads (64 KiB). Prevents OOM on corrupt files.
pub const MAX_KEY_BYTES: usize = 64 * 1024;
/// Maximum value size we'll allocate during reads (10 MiB). Prevents OOM on corrupt files.
pub const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Decoded table header. Field names follow the zones they describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// `f0`
    pub data_end: u64,
    /// `f1`
    pub index_field: u64,
    /// `f2`
    pub bloom_start: u64,
    /// `f3`
    pub bloom_bits_len: u64,
}

impl Header {
    /// Builds the header from zone sizes, once every zone has been written.
    pub fn from_sizes(data_size: u64, index_size: u64, bloom_start: u64, bloom_bits_len: u64) -> Self {
        Self {
            data_end: data_size + HEADER_SIZE,
            index_field: index_size + HEADER_SIZE,
            bloom_start,
            bloom_bits_len,
        }
    }

    pub fn data_start(&self) -> u64 {
        HEADER_SIZE
    }

    pub fn index_start(&self) -> u64 {
        self.data_end
    }

    /// `f0 + f1 - 32`
    pub fn summary_start(&self) -> u64 {
        self.data_end + self.index_field - HEADER_SIZE
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.data_end)?;
        w.write_u64::<LittleEndian>(self.index_field)?;
        w.write_u64::<LittleEndian>(self.bloom_start)?;
        w.write_u64::<LittleEndian>(self.bloom_bits_len)?;
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Self {
            data_end: r.read_u64::<LittleEndian>()?,
            index_field: r.read_u64::<LittleEndian>()?,
            bloom_start: r.read_u64::<LittleEndian>()?,
            bloom_bits_len: r.read_u64::<LittleEndian>()?,
        })
    }

    /// Checks that the zones are ordered and fit inside a file of `file_len` bytes.
    pub fn validate(&self, file_len: u64) -> io::Result<()> {
        if self.data_end < HEADER_SIZE || self.index_field < HEADER_SIZE {
            return Err(invalid(format!("header sizes below {}: {:?}", HEADER_SIZE, self)));
        }
        let summary = self
            .data_end
            .checked_add(self.index_field - HEADER_SIZE)
            .ok_or_else(|| invalid(format!("header overflow: {:?}", self)))?;
        if summary > self.bloom_start {
            return Err(invalid(format!(
                "summary zone starts at {} after bloom zone {}",
                summary, self.bloom_start
            )));
        }
        let bloom_min = self
            .bloom_start
            .checked_add(8)
            .and_then(|n| n.checked_add(self.bloom_bits_len))
            .ok_or_else(|| invalid(format!("header overflow: {:?}", self)))?;
        if bloom_min > file_len {
            return Err(invalid(format!(
                "bloom zone needs {} bytes, file has {}",
                bloom_min, file_len
            )));
        }
        Ok(())
    }
}

/// Encoded size of a data record.
pub fn record_len(entry: &MemTableEntry) -> u64 {
    RECORD_HEADER_SIZE + entry.key.len() as u64 + entry.value.len() as u64
}

/// Appends one data record; returns the bytes written.
pub fn write_record<W: Write>(w: &mut W, entry: &MemTableEntry) -> io::Result<u64> {
    w.write_u64::<LittleEndian>(entry.key.len() as u64)?;
    w.write_u64::<LittleEndian>(entry.value.len() as u64)?;
    w.write_u64::<LittleEndian>(entry.timestamp)?;
    w.write_u8(u8::from(entry.tombstone))?;
    w.write_all(&entry.key)?;
    w.write_all(&entry.value)?;
    Ok(record_len(entry))
}

/// Reads one data record.
pub fn read_record<R: Read>(r: &mut R) -> io::Result<MemTableEntry> {
    let key_size = r.read_u64::<LittleEndian>()?;
    let value_size = r.read_u64::<LittleEndian>()?;
    let timestamp = r.read_u64::<LittleEndian>()?;
    let tombstone = match r.read_u8()? {
        0 => false,
        1 => true,
        other => return Err(invalid(format!("corrupt data: tombstone byte {:#04x}", other))),
    };
    if key_size > MAX_KEY_BYTES as u64 {
        return Err(invalid(format!(
            "corrupt data: key_size {} exceeds maximum {}",
            key_size, MAX_KEY_BYTES
        )));
    }
    if value_size > MAX_VALUE_BYTES as u64 {
        return Err(invalid(format!(
            "corrupt data: value_size {} exceeds maximum {}",
            value_size, MAX_VALUE_BYTES
        )));
    }
    let mut key = vec![0u8; key_size as usize];
    r.read_exact(&mut key)?;
    let mut value = vec![0u8; value_size as usize];
    r.read_exact(&mut value)?;
    Ok(MemTableEntry {
        key,
        value,
        tombstone,
        timestamp,
    })
}

/// Encoded size of an index or summary record.
pub fn pointer_len(key: &[u8]) -> u64 {
    8 + key.len() as u64 + 8
}

/// Appends one index/summary record; returns the bytes written.
pub fn write_pointer<W: Write>(w: &mut W, key: &[u8], offset: u64) -> io::Result<u64> {
    w.write_u64::<LittleEndian>(key.len() as u64)?;
    w.write_all(key)?;
    w.write_u64::<LittleEndian>(offset)?;
    Ok(pointer_len(key))
}

/// Reads one index/summary record as `(key, offset)`.
pub fn read_pointer<R: Read>(r: &mut R) -> io::Result<(Vec<u8>, u64)> {
    let key_len = r.read_u64::<LittleEndian>()?;
    if key_len > MAX_KEY_BYTES as u64 {
        return Err(invalid(format!(
            "corrupt index: key_len {} exceeds maximum {}",
            key_len, MAX_KEY_BYTES
        )));
    }
    let mut key = vec![0u8; key_len as usize];
    r.read_exact(&mut key)?;
    let offset = r.read_u64::<LittleEndian>()?;
    Ok((key, offset))
}
