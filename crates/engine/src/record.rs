//! Application records carried as write-ahead-log entry content.

use anyhow::{bail, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use kvpair::StoredKeyValuePair;
use std::io::{self, Write};

const RECORD_TYPE_CUD: u8 = 0x00;
const RECORD_TYPE_CREATE_SSTABLE: u8 = 0x01;

/// One write-ahead-log record: a leading type byte followed by the
/// type-specific payload. Unknown type bytes are a parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JournalRecord {
    /// Create, update, or delete of a single key.
    Cud(StoredKeyValuePair),
    /// Marks the point where the in-memory index was frozen for flushing
    /// into `sstable_<N>.sst` and `writeahead_log_<M>.jrn` took over.
    CreateSsTable { sstable_number: u64, wal_number: u64 },
}

impl JournalRecord {
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        match self {
            Self::Cud(stored) => {
                writer.write_u8(RECORD_TYPE_CUD)?;
                stored.write_to(writer)?;
            }
            Self::CreateSsTable {
                sstable_number,
                wal_number,
            } => {
                writer.write_u8(RECORD_TYPE_CREATE_SSTABLE)?;
                writer.write_u64::<BigEndian>(*sstable_number)?;
                writer.write_u64::<BigEndian>(*wal_number)?;
            }
        }
        Ok(())
    }

    pub fn parse(content: &[u8]) -> Result<Self> {
        let Some((&type_byte, mut body)) = content.split_first() else {
            bail!("journal record is empty");
        };
        match type_byte {
            RECORD_TYPE_CUD => {
                let (stored, _) = StoredKeyValuePair::read_from(&mut body)?;
                Ok(Self::Cud(stored))
            }
            RECORD_TYPE_CREATE_SSTABLE => {
                let sstable_number = body.read_u64::<BigEndian>()?;
                let wal_number = body.read_u64::<BigEndian>()?;
                Ok(Self::CreateSsTable {
                    sstable_number,
                    wal_number,
                })
            }
            other => bail!("unsupported journal record type: {other:#04x}"),
        }
    }
}
