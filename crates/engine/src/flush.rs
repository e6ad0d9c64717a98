//! Flush machinery: rotating the write-ahead log, freezing the in-memory
//! index, the bounded job queue, and the background worker that persists
//! frozen indexes as SSTables.

use anyhow::{bail, Result};
use journal::Journal;
use memindex::MemIndex;
use sstable::SsTable;
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::record::JournalRecord;
use crate::{sstable_path, wal_path, Db, DbShared, DbState, LOCK_POISONED, SSTABLE_FORMAT_VERSION};

/// At most this many flushes may be queued; producers block on a full
/// queue.
const FLUSH_QUEUE_CAPACITY: usize = 5;
/// Pause between retries of a failed flush.
const FLUSH_RETRY_DELAY: Duration = Duration::from_millis(50);

/// A frozen in-memory index on its way into `sstable_<N>.sst`.
pub(crate) struct FlushJob {
    sstable_number: u64,
    index: Arc<MemIndex>,
}

impl Db {
    /// Initiates a flush: appends a CreateSSTable marker to the current
    /// write-ahead log, installs a fresh log and a fresh active index, and
    /// hands the frozen index to the background worker.
    ///
    /// Blocks while the flush queue is full; fails with "database was
    /// closed" if shutdown wins that wait.
    pub fn create_sstable(&self) -> Result<()> {
        self.shared.check_state()?;

        let mut state = self.shared.state.write().expect(LOCK_POISONED);
        state.check_err()?;

        let sstable_number = state.next_sstable_number;
        let wal_number = state.next_wal_number;
        let record = JournalRecord::CreateSsTable {
            sstable_number,
            wal_number,
        };
        if let Err(err) = state.append_record(&record) {
            state.state_err = Some(err.to_string());
            return Err(err);
        }
        state.next_sstable_number += 1;
        state.next_wal_number += 1;

        self.shared
            .process_create_sstable(&mut state, sstable_number, wal_number)
    }
}

impl DbShared {
    /// Handles a CreateSSTable marker, from the foreground call or from
    /// replay: rotate the write-ahead log, freeze the active index, enqueue
    /// the flush. If the table already exists on disk the flush committed
    /// in a previous life, and only its cleanup is finished here.
    pub(crate) fn process_create_sstable(
        &self,
        state: &mut DbState,
        sstable_number: u64,
        wal_number: u64,
    ) -> Result<()> {
        // replayed markers must push the counters forward the same way the
        // foreground call that wrote them once did
        state.next_sstable_number = state.next_sstable_number.max(sstable_number + 1);
        state.next_wal_number = state.next_wal_number.max(wal_number + 1);

        if sstable_path(&self.path, sstable_number).exists() {
            log::warn!("sstable {sstable_number} already exists; skipping flush");
            state.drop_oldest_write_ahead_log();
            state.active_index_mut().clear();
            return Ok(());
        }

        self.install_write_ahead_log(state, wal_number)?;

        state.mem_indexes.insert(0, Arc::new(MemIndex::new()));
        let frozen = Arc::clone(&state.mem_indexes[1]);

        self.flush_queue.push(FlushJob {
            sstable_number,
            index: frozen,
        })
    }

    /// Creates `writeahead_log_<N>.jrn` through the temp-rename protocol and
    /// installs it as the new active log. Skipped when the file already
    /// exists (it was then already opened by the directory scan).
    fn install_write_ahead_log(&self, state: &mut DbState, wal_number: u64) -> Result<()> {
        let canonical = wal_path(&self.path, wal_number);
        if canonical.exists() {
            log::warn!("write-ahead log {wal_number} already exists; skipping creation");
            return Ok(());
        }

        let staging = self.stage_temp_path("writeahead_log_")?;
        let mut wal = match Journal::create(&staging, 0) {
            Ok(wal) => wal,
            Err(err) => {
                state.state_err = Some(err.to_string());
                return Err(err.into());
            }
        };
        if let Err(err) = wal.rename(&canonical) {
            state.state_err = Some(err.to_string());
            let _ = fs::remove_file(&staging);
            return Err(err.into());
        }

        state.write_ahead_logs.insert(0, wal);
        Ok(())
    }

    /// Reserves a unique file name under `tmp/`: claim one with a
    /// placeholder, then free it for an exclusive re-create. `rename` out of
    /// `tmp/` into the database directory is what commits the final file.
    fn stage_temp_path(&self, prefix: &str) -> Result<PathBuf> {
        let placeholder = tempfile::Builder::new()
            .prefix(prefix)
            .tempfile_in(self.path.join("tmp"))?;
        let temp_path = placeholder.into_temp_path();
        let path = temp_path.to_path_buf();
        temp_path.close()?;
        Ok(path)
    }
}

impl DbState {
    /// Closes and unlinks the oldest write-ahead log. Keeps at least the
    /// active one.
    pub(crate) fn drop_oldest_write_ahead_log(&mut self) {
        if self.write_ahead_logs.len() <= 1 {
            return;
        }
        let wal = self.write_ahead_logs.pop().expect("length checked above");
        let path = wal.path().to_path_buf();
        drop(wal);
        if let Err(err) = fs::remove_file(&path) {
            log::warn!(
                "failed to remove superseded write-ahead log {}: {err}",
                path.display()
            );
        }
    }
}

/// Background worker loop: drain the flush queue until shutdown, retrying
/// each job until it commits. Failures are expected to be transient (disk
/// pressure and the like); the frozen data stays replayable from its WAL
/// the whole time.
pub(crate) fn run_worker(shared: &DbShared) {
    while let Some(job) = shared.flush_queue.pop() {
        loop {
            match flush_job(shared, &job) {
                Ok(()) => break,
                Err(err) => {
                    log::error!(
                        "flush of sstable {} failed: {err}; retrying",
                        job.sstable_number
                    );
                    if shared.flush_queue.is_shutdown() {
                        return;
                    }
                    std::thread::sleep(FLUSH_RETRY_DELAY);
                }
            }
        }
    }
}

/// One flush attempt: write the frozen index into a staged table under
/// `tmp/`, rename it into place, then commit the swap under the lock
/// (table in, frozen index out, superseded write-ahead log unlinked).
fn flush_job(shared: &DbShared, job: &FlushJob) -> Result<()> {
    let staging = shared.stage_temp_path("sstable_")?;
    let mut table = SsTable::create(&staging, SSTABLE_FORMAT_VERSION, shared.index_chunk_size)?;

    let result = table
        .append_entries(job.index.iter().cloned())
        .and_then(|()| table.rename(sstable_path(&shared.path, job.sstable_number)));
    if let Err(err) = result {
        let _ = fs::remove_file(&staging);
        return Err(err.into());
    }

    let mut state = shared.state.write().expect(LOCK_POISONED);
    state.sstables.insert(0, table);
    if state.mem_indexes.len() > 1 {
        state.mem_indexes.pop();
    }
    state.drop_oldest_write_ahead_log();
    Ok(())
}

/// Bounded multi-producer queue feeding the flush worker.
///
/// Capacity is a soft back-pressure bound: pushes block while it is full
/// and wake as soon as the worker takes a job or shutdown is requested.
pub(crate) struct FlushQueue {
    inner: Mutex<QueueInner>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct QueueInner {
    jobs: VecDeque<FlushJob>,
    shutdown: bool,
}

impl FlushQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Enqueues a job, blocking while the queue is full. Fails once
    /// shutdown has been requested.
    fn push(&self, job: FlushJob) -> Result<()> {
        let mut inner = self.inner.lock().expect(LOCK_POISONED);
        loop {
            if inner.shutdown {
                bail!("database was closed");
            }
            if inner.jobs.len() < FLUSH_QUEUE_CAPACITY {
                inner.jobs.push_back(job);
                self.not_empty.notify_one();
                return Ok(());
            }
            inner = self.not_full.wait(inner).expect(LOCK_POISONED);
        }
    }

    /// Dequeues the next job, blocking while the queue is empty. Returns
    /// `None` once shutdown has been requested.
    fn pop(&self) -> Option<FlushJob> {
        let mut inner = self.inner.lock().expect(LOCK_POISONED);
        loop {
            if inner.shutdown {
                return None;
            }
            if let Some(job) = inner.jobs.pop_front() {
                self.not_full.notify_one();
                return Some(job);
            }
            inner = self.not_empty.wait(inner).expect(LOCK_POISONED);
        }
    }

    pub(crate) fn shutdown(&self) {
        let mut inner = self.inner.lock().expect(LOCK_POISONED);
        inner.shutdown = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    fn is_shutdown(&self) -> bool {
        self.inner.lock().expect(LOCK_POISONED).shutdown
    }
}
