//! Startup replay of the write-ahead logs.
//!
//! The logs themselves were already checksum-recovered when the directory
//! scan opened them, so replay trusts their contents and only re-applies
//! the application records.

use anyhow::Result;

use crate::record::JournalRecord;
use crate::{DbShared, LOCK_POISONED};

impl DbShared {
    /// Replays every write-ahead log, oldest first: CUD records land in the
    /// active in-memory index, and CreateSSTable markers are re-processed
    /// so a flush interrupted by a crash either resumes (table missing) or
    /// finishes its cleanup (table already on disk).
    pub(crate) fn replay_write_ahead_logs(&self) -> Result<()> {
        let mut state = self.state.write().expect(LOCK_POISONED);

        let mut records = Vec::new();
        for wal in state.write_ahead_logs.iter().rev() {
            let mut cursor = wal.cursor(false);
            while let Some(entry) = cursor.next_entry()? {
                records.push(JournalRecord::parse(&entry.content)?);
            }
        }

        for record in records {
            match record {
                JournalRecord::Cud(stored) => {
                    state.active_index_mut().upsert(stored.to_pair());
                }
                JournalRecord::CreateSsTable {
                    sstable_number,
                    wal_number,
                } => {
                    self.process_create_sstable(&mut state, sstable_number, wal_number)?;
                }
            }
        }
        Ok(())
    }
}
