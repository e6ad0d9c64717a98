//! Key-value pair data model and its on-disk codec.
//!
//! A [`KeyValuePair`] is the logical record the engine moves around: an
//! opaque byte key, an optional byte value, and a tombstone flag. The
//! [`StoredKeyValuePair`] is its serialized form, used verbatim as the
//! payload of write-ahead-log CUD records:
//!
//! ```text
//! ┌───────────┬──────────────┬──────────────────┬────────────┬────────────────────┐
//! │ 1 bit     │ 63 bits      │ (key size) bytes │ 8 bytes    │ (value size) bytes │
//! ├───────────┼──────────────┼──────────────────┼────────────┼────────────────────┤
//! │ tombstone │ key size     │ key              │ value size │ value              │
//! └───────────┴──────────────┴──────────────────┴────────────┴────────────────────┘
//! ```
//!
//! All integers are big-endian. A tombstone is always serialized with
//! `value_size = 0` and no value bytes, whatever the in-memory value field
//! holds, and deserializes with `value = None`. SSTables share the same byte
//! layout but keep the value honest on both sides; that codec lives with the
//! table format.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// High bit of the leading size word marks the record as a tombstone.
pub const TOMBSTONE_MASK: u64 = 1 << 63;
/// Remaining 63 bits of the leading size word carry the key length.
pub const KEY_SIZE_MASK: u64 = !TOMBSTONE_MASK;

/// A logical key-value record.
///
/// Equality compares key, value, and tombstone flag. Keys order as raw
/// bytes, lexicographically.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValuePair {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub is_deleted: bool,
}

impl KeyValuePair {
    /// A live pair carrying `value`.
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
            is_deleted: false,
        }
    }

    /// A tombstone for `key`.
    pub fn tombstone(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: None,
            is_deleted: true,
        }
    }

    /// The on-disk form of this pair. Tombstones shed their value here.
    pub fn to_stored(&self) -> StoredKeyValuePair {
        StoredKeyValuePair {
            key: self.key.clone(),
            value: if self.is_deleted {
                None
            } else {
                self.value.clone()
            },
            is_deleted: self.is_deleted,
        }
    }
}

/// Serialized form of a [`KeyValuePair`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredKeyValuePair {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub is_deleted: bool,
}

impl StoredKeyValuePair {
    pub fn key_size(&self) -> u64 {
        self.key.len() as u64
    }

    /// Serialized length in bytes.
    pub fn size_of(&self) -> u64 {
        let value_size = if self.is_deleted {
            0
        } else {
            self.value.as_ref().map_or(0, |v| v.len() as u64)
        };
        8 + self.key_size() + 8 + value_size
    }

    /// Writes the record. A set tombstone flag forces `value_size = 0` and
    /// suppresses the value bytes regardless of the value field.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<u64> {
        let mut size_word = self.key_size();
        if self.is_deleted {
            size_word |= TOMBSTONE_MASK;
        }
        writer.write_u64::<BigEndian>(size_word)?;
        writer.write_all(&self.key)?;

        let value: &[u8] = if self.is_deleted {
            &[]
        } else {
            self.value.as_deref().unwrap_or(&[])
        };
        writer.write_u64::<BigEndian>(value.len() as u64)?;
        writer.write_all(value)?;

        Ok(8 + self.key.len() as u64 + 8 + value.len() as u64)
    }

    /// Reads one record, returning it and the number of bytes consumed.
    /// Tombstones come back with `value = None`.
    pub fn read_from<R: Read>(reader: &mut R) -> io::Result<(Self, u64)> {
        let size_word = reader.read_u64::<BigEndian>()?;
        let key_size = size_word & KEY_SIZE_MASK;
        let is_deleted = size_word & TOMBSTONE_MASK != 0;

        let mut key = vec![0u8; key_size as usize];
        reader.read_exact(&mut key)?;

        let value_size = reader.read_u64::<BigEndian>()?;
        let mut value = vec![0u8; value_size as usize];
        reader.read_exact(&mut value)?;

        let consumed = 8 + key_size + 8 + value_size;
        let value = if is_deleted { None } else { Some(value) };

        Ok((
            Self {
                key,
                value,
                is_deleted,
            },
            consumed,
        ))
    }

    pub fn to_pair(&self) -> KeyValuePair {
        KeyValuePair {
            key: self.key.clone(),
            value: self.value.clone(),
            is_deleted: self.is_deleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(stored: &StoredKeyValuePair) -> (StoredKeyValuePair, u64) {
        let mut buf = Vec::new();
        let written = stored.write_to(&mut buf).unwrap();
        assert_eq!(written, buf.len() as u64);

        let (decoded, consumed) = StoredKeyValuePair::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(consumed, written);
        (decoded, written)
    }

    #[test]
    fn live_pair_round_trips() {
        let stored = KeyValuePair::new(b"greeting".to_vec(), b"hello".to_vec()).to_stored();
        let (decoded, written) = round_trip(&stored);
        assert_eq!(decoded, stored);
        assert_eq!(written, stored.size_of());
        assert_eq!(written, 8 + 8 + 8 + 5);
    }

    #[test]
    fn tombstone_round_trips_with_empty_value() {
        let stored = KeyValuePair::tombstone(b"greeting".to_vec()).to_stored();
        let (decoded, written) = round_trip(&stored);
        assert!(decoded.is_deleted);
        assert_eq!(decoded.value, None);
        assert_eq!(written, 8 + 8 + 8);
    }

    #[test]
    fn tombstone_with_leftover_value_serializes_without_it() {
        // A deleted pair may still carry value bytes in memory; the encoder
        // must not write them.
        let stored = StoredKeyValuePair {
            key: b"k".to_vec(),
            value: Some(b"stale".to_vec()),
            is_deleted: true,
        };

        let mut buf = Vec::new();
        let written = stored.write_to(&mut buf).unwrap();
        assert_eq!(written, 8 + 1 + 8);

        let (decoded, _) = StoredKeyValuePair::read_from(&mut buf.as_slice()).unwrap();
        assert!(decoded.is_deleted);
        assert_eq!(decoded.value, None);
    }

    #[test]
    fn to_stored_drops_value_of_deleted_pair() {
        let pair = KeyValuePair {
            key: b"k".to_vec(),
            value: Some(b"v".to_vec()),
            is_deleted: true,
        };
        assert_eq!(pair.to_stored().value, None);
    }

    #[test]
    fn tombstone_bit_rides_the_size_word() {
        let stored = KeyValuePair::tombstone(b"abc".to_vec()).to_stored();
        let mut buf = Vec::new();
        stored.write_to(&mut buf).unwrap();

        let size_word = u64::from_be_bytes(buf[..8].try_into().unwrap());
        assert_eq!(size_word & TOMBSTONE_MASK, TOMBSTONE_MASK);
        assert_eq!(size_word & KEY_SIZE_MASK, 3);
    }

    #[test]
    fn empty_key_and_empty_value_are_representable() {
        let stored = KeyValuePair::new(Vec::new(), Vec::new()).to_stored();
        let (decoded, written) = round_trip(&stored);
        assert_eq!(decoded, stored);
        assert_eq!(written, 16);
    }
}
