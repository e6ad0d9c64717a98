//! # Engine: LSM coordinator
//!
//! Threads the [`journal`], [`memindex`], and [`sstable`] crates together
//! into a log-structured merge-tree key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Caller
//!   |
//!   v
//! ┌─────────────────────────────────────────────────┐
//! │                      DB                         │
//! │                                                 │
//! │ write.rs → WAL append → active index upsert     │
//! │               |                                 │
//! │               | create_sstable()                │
//! │               v                                 │
//! │ flush.rs → marker in old WAL → new WAL          │
//! │          → freeze index → flush queue (≤ 5)     │
//! │               |                                 │
//! │               v      background worker          │
//! │          tmp table → rename → install at head   │
//! │          → drop frozen index + old WAL          │
//! │                                                 │
//! │ read.rs → indexes (newest first)                │
//! │         → sstables (newest first)               │
//! │           first match wins, tombstones included │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Directory layout
//!
//! ```text
//! <root>/
//!   tmp/                      staging area, reset on every open
//!   writeahead_log_<N>.jrn    journals, N = 1, 2, …
//!   sstable_<N>.sst           sorted tables, N = 1, 2, …
//! ```
//!
//! Anything else in the directory is logged and ignored.
//!
//! ## Crash safety
//!
//! Every mutation is appended to the active write-ahead log (and fsynced)
//! **before** the in-memory update. A flush writes its SSTable into `tmp/`
//! and renames it into place, so a table either exists completely or not at
//! all; the superseded WAL is only unlinked after the rename. Startup
//! replays the surviving WALs oldest first, re-driving any flush whose
//! marker is on disk but whose table is not.

mod flush;
mod read;
mod record;
mod recovery;
mod write;

pub use kvpair::KeyValuePair;

use anyhow::{Context, Result};
use journal::Journal;
use memindex::MemIndex;
use sstable::SsTable;
use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

use flush::FlushQueue;

pub(crate) const LOCK_POISONED: &str = "lock is poisoned";

/// Stamped into every SSTable header this engine writes. Carried and
/// preserved by the table format, never interpreted.
const SSTABLE_FORMAT_VERSION: u64 = 1;

/// A log-structured merge-tree key-value database.
///
/// All methods take `&self`; an internal reader-writer lock serializes
/// mutations against lookups, and a single background worker turns frozen
/// in-memory indexes into SSTables. Share the handle by reference.
///
/// # Lifecycle
///
/// [`Db::create`] or [`Db::open`] builds the handle, [`Db::start`] spawns
/// the flush worker and replays the write-ahead logs, and [`Db::close`]
/// (idempotent, also run on drop) shuts the worker down and closes every
/// file.
pub struct Db {
    pub(crate) shared: Arc<DbShared>,
}

pub(crate) struct DbShared {
    pub(crate) path: PathBuf,
    pub(crate) index_chunk_size: Option<u64>,
    pub(crate) state: RwLock<DbState>,
    pub(crate) flush_queue: FlushQueue,
    pub(crate) is_running: AtomicBool,
    pub(crate) is_closed: AtomicBool,
    pub(crate) worker: Mutex<Option<JoinHandle<()>>>,
}

pub(crate) struct DbState {
    /// Open write-ahead logs, newest first. Element 0 takes appends; older
    /// ones are kept only until the flush that supersedes them commits.
    write_ahead_logs: Vec<Journal>,
    /// In-memory indexes, newest first. Element 0 is active and uniquely
    /// owned; the rest are frozen, shared with in-flight flush jobs.
    mem_indexes: Vec<Arc<MemIndex>>,
    /// Sorted tables, newest first. Numbering strictly decreases down the
    /// list.
    sstables: Vec<SsTable>,
    next_sstable_number: u64,
    next_wal_number: u64,
    /// Sticky: once set, every subsequent mutation fails fast with it.
    state_err: Option<String>,
}

impl Db {
    /// Creates a new database directory (mode 0755, exclusive) with its
    /// first write-ahead log, then opens it.
    pub fn create(path: impl AsRef<Path>, index_chunk_size: Option<u64>) -> Result<Self> {
        Self::open_inner(path.as_ref(), true, index_chunk_size)
    }

    /// Opens an existing database directory.
    pub fn open(path: impl AsRef<Path>, index_chunk_size: Option<u64>) -> Result<Self> {
        Self::open_inner(path.as_ref(), false, index_chunk_size)
    }

    fn open_inner(path: &Path, create: bool, index_chunk_size: Option<u64>) -> Result<Self> {
        if create {
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o755);
            builder
                .create(path)
                .with_context(|| format!("create database directory {}", path.display()))?;
            // the first WAL exists from the moment the directory does
            if let Err(err) = Journal::create(wal_path(path, 1), 0) {
                let _ = fs::remove_dir_all(path);
                return Err(err.into());
            }
        }

        match Self::scan_directory(path, index_chunk_size) {
            Ok(db) => Ok(db),
            Err(err) => {
                if create {
                    let _ = fs::remove_dir_all(path);
                }
                Err(err)
            }
        }
    }

    /// Resets `tmp/`, opens every table and journal in the directory, and
    /// assembles the initial coordinator state.
    fn scan_directory(path: &Path, index_chunk_size: Option<u64>) -> Result<Self> {
        let tmp = path.join("tmp");
        let _ = fs::remove_dir_all(&tmp);
        let mut builder = fs::DirBuilder::new();
        builder.mode(0o755);
        builder.create(&tmp)?;

        let mut sstables: Vec<(u64, SsTable)> = Vec::new();
        let mut write_ahead_logs: Vec<(u64, Journal)> = Vec::new();

        for dirent in fs::read_dir(path)? {
            let dirent = dirent?;
            let file_name = dirent.file_name();
            let Some(name) = file_name.to_str() else {
                log::warn!("unexpected file {:?} in database directory", file_name);
                continue;
            };
            if name == "tmp" {
                continue;
            }
            if dirent.file_type()?.is_dir() {
                log::warn!("unexpected directory {name:?} in database directory");
                continue;
            }

            if name.ends_with(".sst") {
                let Some(number) = file_number(name, "sstable_", ".sst") else {
                    log::warn!("unexpected sstable file {name:?} in database directory");
                    continue;
                };
                let table = SsTable::open(dirent.path(), index_chunk_size)?;
                sstables.push((number, table));
            } else if name.ends_with(".jrn") {
                let Some(number) = file_number(name, "writeahead_log_", ".jrn") else {
                    log::warn!("unexpected journal file {name:?} in database directory");
                    continue;
                };
                let wal = Journal::open(dirent.path())?;
                write_ahead_logs.push((number, wal));
            } else {
                log::warn!("unexpected file {name:?} in database directory");
            }
        }

        // newest first
        sstables.sort_by(|a, b| b.0.cmp(&a.0));
        write_ahead_logs.sort_by(|a, b| b.0.cmp(&a.0));

        let next_sstable_number = sstables.first().map_or(0, |(number, _)| *number) + 1;
        let next_wal_number = write_ahead_logs.first().map_or(0, |(number, _)| *number) + 1;

        let state = DbState {
            write_ahead_logs: write_ahead_logs.into_iter().map(|(_, wal)| wal).collect(),
            mem_indexes: vec![Arc::new(MemIndex::new())],
            sstables: sstables.into_iter().map(|(_, table)| table).collect(),
            next_sstable_number,
            next_wal_number,
            state_err: None,
        };

        Ok(Self {
            shared: Arc::new(DbShared {
                path: path.to_path_buf(),
                index_chunk_size,
                state: RwLock::new(state),
                flush_queue: FlushQueue::new(),
                is_running: AtomicBool::new(false),
                is_closed: AtomicBool::new(false),
                worker: Mutex::new(None),
            }),
        })
    }

    /// Spawns the background flush worker and replays all write-ahead logs,
    /// oldest first. Idempotent while running.
    pub fn start(&self) -> Result<()> {
        if self.shared.is_closed.load(Ordering::Acquire) {
            anyhow::bail!("database is closed");
        }
        if self.shared.is_running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::spawn(move || flush::run_worker(&shared));
        *self.shared.worker.lock().expect(LOCK_POISONED) = Some(handle);

        self.shared.replay_write_ahead_logs()
    }

    /// Shuts down the flush worker and closes every file. Idempotent; also
    /// invoked on drop. Pending flushes are abandoned; their write-ahead
    /// logs survive on disk and replay re-drives them on the next start.
    pub fn close(&self) -> Result<()> {
        if self.shared.is_closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.shared.flush_queue.shutdown();
        if let Some(worker) = self.shared.worker.lock().expect(LOCK_POISONED).take() {
            let _ = worker.join();
        }
        self.shared.is_running.store(false, Ordering::Release);

        let mut state = self.shared.state.write().expect(LOCK_POISONED);
        state.write_ahead_logs.clear();
        state.sstables.clear();
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("Db");
        s.field("path", &self.shared.path)
            .field("is_running", &self.shared.is_running.load(Ordering::Relaxed))
            .field("is_closed", &self.shared.is_closed.load(Ordering::Relaxed));
        if let Ok(state) = self.shared.state.try_read() {
            s.field("write_ahead_logs", &state.write_ahead_logs.len())
                .field("mem_indexes", &state.mem_indexes.len())
                .field("sstables", &state.sstables.len())
                .field("next_sstable_number", &state.next_sstable_number)
                .field("next_wal_number", &state.next_wal_number);
        }
        s.finish()
    }
}

impl DbState {
    /// The active in-memory index. Uniquely owned by construction: frozen
    /// indexes further down the list are the only shared ones.
    pub(crate) fn active_index_mut(&mut self) -> &mut MemIndex {
        Arc::get_mut(&mut self.mem_indexes[0]).expect("active in-memory index is uniquely owned")
    }
}

pub(crate) fn sstable_path(root: &Path, number: u64) -> PathBuf {
    root.join(format!("sstable_{number}.sst"))
}

pub(crate) fn wal_path(root: &Path, number: u64) -> PathBuf {
    root.join(format!("writeahead_log_{number}.jrn"))
}

/// Parses `<prefix><base-10 number><suffix>` file names.
pub(crate) fn file_number(name: &str, prefix: &str, suffix: &str) -> Option<u64> {
    name.strip_suffix(suffix)?.strip_prefix(prefix)?.parse().ok()
}

#[cfg(test)]
mod tests;
