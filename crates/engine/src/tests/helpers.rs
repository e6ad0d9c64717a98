use crate::Db;
use std::time::{Duration, Instant};

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}

/// A consistent snapshot of the coordinator's internals.
pub struct StateSnapshot {
    pub wal_count: usize,
    pub active_wal_entries: u64,
    pub mem_index_count: usize,
    pub active_index_len: usize,
    pub sstable_count: usize,
    pub sstable_entry_counts: Vec<u64>,
    pub next_sstable_number: u64,
    pub next_wal_number: u64,
    pub has_state_err: bool,
}

pub fn snapshot(db: &Db) -> StateSnapshot {
    let state = db.shared.state.read().expect("lock is poisoned");
    StateSnapshot {
        wal_count: state.write_ahead_logs.len(),
        active_wal_entries: state.write_ahead_logs.first().map_or(0, |w| w.num_entries()),
        mem_index_count: state.mem_indexes.len(),
        active_index_len: state.mem_indexes[0].len(),
        sstable_count: state.sstables.len(),
        sstable_entry_counts: state.sstables.iter().map(|t| t.num_entries()).collect(),
        next_sstable_number: state.next_sstable_number,
        next_wal_number: state.next_wal_number,
        has_state_err: state.state_err.is_some(),
    }
}

/// The flushed state every test converges on: one WAL, one (empty-or-not)
/// active index, `sstables` tables on disk.
pub fn flushed(db: &Db, sstables: usize) -> bool {
    let s = snapshot(db);
    s.wal_count == 1 && s.mem_index_count == 1 && s.sstable_count == sstables
}
