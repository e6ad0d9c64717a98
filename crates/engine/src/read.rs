//! Read path: point lookup across the in-memory indexes and the SSTable
//! stack, newest first. The first hit wins; tombstones are hits and are
//! returned as such for the caller to interpret.

use anyhow::{bail, Result};
use kvpair::KeyValuePair;
use std::sync::atomic::Ordering;

use crate::{Db, LOCK_POISONED};

impl Db {
    /// Looks up `key`. Returns the most recent pair for it (possibly a
    /// tombstone with `is_deleted` set), or `None` if the key was never
    /// written.
    pub fn lookup(&self, key: &[u8]) -> Result<Option<KeyValuePair>> {
        if self.shared.is_closed.load(Ordering::Acquire) {
            bail!("database is closed");
        }

        let state = self.shared.state.read().expect(LOCK_POISONED);

        for index in &state.mem_indexes {
            if let Some(pair) = index.lookup(key) {
                return Ok(Some(pair.clone()));
            }
        }

        for table in &state.sstables {
            if let Some(entry) = table.lookup_entry(key)? {
                return Ok(Some(KeyValuePair {
                    key: key.to_vec(),
                    value: if entry.is_deleted {
                        None
                    } else {
                        Some(entry.value)
                    },
                    is_deleted: entry.is_deleted,
                }));
            }
        }

        Ok(None)
    }
}
