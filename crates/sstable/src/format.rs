use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use kvpair::{KeyValuePair, KEY_SIZE_MASK, TOMBSTONE_MASK};
use std::io::{self, Read, Write};
use uuid::Uuid;

use crate::index::EntryLocation;

/// The 40-byte table header:
/// `[uuid: 16][version: u64][file_size: u64][num_entries: u64]`.
///
/// `file_size` is the committed size: entries are only visible once a
/// header pointing past them has been fsynced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableHeader {
    pub id: Uuid,
    pub version: u64,
    pub file_size: u64,
    pub num_entries: u64,
}

impl TableHeader {
    pub const SIZE: u64 = 40;

    pub(crate) fn new(version: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            version,
            file_size: Self::SIZE,
            num_entries: 0,
        }
    }

    pub fn with_new_size(mut self, file_size: u64, num_entries: u64) -> Self {
        self.file_size = file_size;
        self.num_entries = num_entries;
        self
    }

    pub fn encode(&self) -> [u8; 40] {
        let mut bytes = [0u8; 40];
        bytes[..16].copy_from_slice(self.id.as_bytes());
        bytes[16..24].copy_from_slice(&self.version.to_be_bytes());
        bytes[24..32].copy_from_slice(&self.file_size.to_be_bytes());
        bytes[32..].copy_from_slice(&self.num_entries.to_be_bytes());
        bytes
    }

    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<Self> {
        let mut id = [0u8; 16];
        reader.read_exact(&mut id)?;
        let version = reader.read_u64::<BigEndian>()?;
        let file_size = reader.read_u64::<BigEndian>()?;
        let num_entries = reader.read_u64::<BigEndian>()?;
        Ok(Self {
            id: Uuid::from_bytes(id),
            version,
            file_size,
            num_entries,
        })
    }
}

/// A decoded table entry together with its position in the file.
///
/// Unlike the write-ahead-log record codec, the table codec is honest on
/// both sides: the value bytes are written and read back exactly as given,
/// tombstone or not. Tombstones written by this engine carry no value bytes
/// because their pairs were stripped upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub location: EntryLocation,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub is_deleted: bool,
}

impl TableEntry {
    pub fn key_size(&self) -> u64 {
        self.key.len() as u64
    }

    pub fn value_size(&self) -> u64 {
        self.value.len() as u64
    }
}

/// Writes one entry, returning its encoded length.
pub(crate) fn write_entry<W: Write>(writer: &mut W, pair: &KeyValuePair) -> io::Result<u64> {
    let value: &[u8] = pair.value.as_deref().unwrap_or(&[]);

    let mut size_word = pair.key.len() as u64;
    if pair.is_deleted {
        size_word |= TOMBSTONE_MASK;
    }
    writer.write_u64::<BigEndian>(size_word)?;
    writer.write_all(&pair.key)?;
    writer.write_u64::<BigEndian>(value.len() as u64)?;
    writer.write_all(value)?;

    Ok(8 + pair.key.len() as u64 + 8 + value.len() as u64)
}

/// Reads one entry, returning `(key, value, is_deleted, bytes_consumed)`.
pub(crate) fn read_entry<R: Read>(reader: &mut R) -> io::Result<(Vec<u8>, Vec<u8>, bool, u64)> {
    let size_word = reader.read_u64::<BigEndian>()?;
    let key_size = size_word & KEY_SIZE_MASK;
    let is_deleted = size_word & TOMBSTONE_MASK != 0;

    let mut key = vec![0u8; key_size as usize];
    reader.read_exact(&mut key)?;

    let value_size = reader.read_u64::<BigEndian>()?;
    let mut value = vec![0u8; value_size as usize];
    reader.read_exact(&mut value)?;

    Ok((key, value, is_deleted, 8 + key_size + 8 + value_size))
}
