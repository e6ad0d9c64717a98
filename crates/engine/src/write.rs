//! Write path: `upsert`, `delete`, and the shared mutation plumbing.
//!
//! Every mutation is serialized into a CUD record, appended (and fsynced)
//! to the active write-ahead log, and only then applied to the active
//! in-memory index, all under the exclusive lock, so WAL order is commit
//! order.

use anyhow::{anyhow, bail, Result};
use kvpair::KeyValuePair;
use std::sync::atomic::Ordering;

use crate::record::JournalRecord;
use crate::{Db, DbShared, DbState, LOCK_POISONED};

impl Db {
    /// Inserts or overwrites `key` with `value`.
    pub fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.apply_mutation(KeyValuePair::new(key.to_vec(), value.to_vec()))
    }

    /// Deletes `key` by writing a tombstone. The tombstone stays visible to
    /// [`Db::lookup`] so it can shadow older on-disk values.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.apply_mutation(KeyValuePair::tombstone(key.to_vec()))
    }

    fn apply_mutation(&self, pair: KeyValuePair) -> Result<()> {
        self.shared.check_state()?;

        let mut state = self.shared.state.write().expect(LOCK_POISONED);
        state.check_err()?;

        let stored = pair.to_stored();
        if let Err(err) = state.append_record(&JournalRecord::Cud(stored.clone())) {
            state.state_err = Some(err.to_string());
            return Err(err);
        }

        state.active_index_mut().upsert(stored.to_pair());
        Ok(())
    }
}

impl DbShared {
    /// Fails fast when the database is closed, was never started, or is
    /// carrying a sticky error.
    pub(crate) fn check_state(&self) -> Result<()> {
        if self.is_closed.load(Ordering::Acquire) {
            bail!("database is closed");
        }
        if !self.is_running.load(Ordering::Acquire) {
            bail!("database is not running");
        }
        self.state.read().expect(LOCK_POISONED).check_err()
    }
}

impl DbState {
    pub(crate) fn check_err(&self) -> Result<()> {
        match &self.state_err {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }

    /// Serializes `record` and appends it to the active write-ahead log.
    pub(crate) fn append_record(&mut self, record: &JournalRecord) -> Result<()> {
        let mut content = Vec::with_capacity(64);
        record.write_to(&mut content)?;

        let wal = self
            .write_ahead_logs
            .first_mut()
            .expect("an active write-ahead log is always open");
        wal.append_entry(&content)?;
        Ok(())
    }
}
