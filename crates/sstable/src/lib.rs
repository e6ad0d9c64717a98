//! # SSTable: sorted string table
//!
//! An on-disk sequence of key-value records in strictly ascending key order,
//! immutable once the handle is dropped. The engine flushes a frozen
//! in-memory index into one of these, and [`SsTable::merge_tables`] folds
//! several tables into a new one.
//!
//! ## File layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ HEADER (40 bytes)                                            │
//! │   uuid (16) | version (u64) | file_size (u64) | num_entries  │
//! ├──────────────────────────────────────────────────────────────┤
//! │ ENTRIES (sorted, no duplicate keys)                          │
//! │                                                              │
//! │   tombstone:1 + key_size:63 | key | value_size (u64) | value │
//! │                                                              │
//! │   ... repeated ...                                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are big-endian. `version` is caller-chosen and carried
//! around, never interpreted.
//!
//! ## Durability
//!
//! Appends are a two-phase commit: entry bytes are written past
//! `header.file_size` and fsynced, then the header is rewritten with the new
//! size and entry count and fsynced again. A crash between the phases leaves
//! trailing bytes that the next open discards by truncating back to the
//! committed `header.file_size`. An out-of-order key in the input aborts the
//! whole append the same way, so each `append_entries` call is
//! all-or-nothing.
//!
//! ## Lookup
//!
//! A sparse in-memory index, rebuilt on open, keeps one `(key, location)`
//! pair per `chunk_size` bytes of file. A point lookup binary-searches the
//! index for the closest preceding entry and scans forward from there,
//! stopping as soon as the on-disk key exceeds the target.

mod format;
mod index;
mod merge;

pub use format::{TableEntry, TableHeader};
pub use index::{EntryLocation, SparseIndexEntry, SparseMemIndex};

use fileview::FileView;
use kvpair::KeyValuePair;
use std::cmp::Ordering;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Sparse-index granularity used when the caller does not pick one.
pub const DEFAULT_INDEX_CHUNK_SIZE: u64 = 10;

/// Errors that can occur during SSTable operations.
#[derive(Debug, Error)]
pub enum SsTableError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// An appended key was not strictly greater than the previous one.
    #[error("out of order entry append attempt")]
    OutOfOrderAppend,
}

/// An open sorted string table.
pub struct SsTable {
    path: PathBuf,
    header: TableHeader,
    file: File,
    index: SparseMemIndex,
    /// Largest key in the table, `None` while empty. Guards append ordering.
    last_key: Option<Vec<u8>>,
}

impl SsTable {
    /// Creates a new, empty table at `path` (mode 0644, exclusive; the file
    /// must not exist) carrying `version` in its header.
    pub fn create(
        path: impl AsRef<Path>,
        version: u64,
        index_chunk_size: Option<u64>,
    ) -> Result<Self, SsTableError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o644)
            .open(&path)?;

        let table = Self {
            path,
            header: TableHeader::new(version),
            file,
            index: SparseMemIndex::with_chunk_size(
                index_chunk_size.unwrap_or(DEFAULT_INDEX_CHUNK_SIZE),
            ),
            last_key: None,
        };

        let mut view = FileView::at(&table.file, 0);
        if let Err(err) = view.write_all(&table.header.encode()) {
            let _ = fs::remove_file(&table.path);
            return Err(err.into());
        }
        Ok(table)
    }

    /// Opens an existing table, discards any uncommitted trailing bytes, and
    /// rebuilds the sparse index.
    pub fn open(
        path: impl AsRef<Path>,
        index_chunk_size: Option<u64>,
    ) -> Result<Self, SsTableError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        let header = {
            let mut reader = BufReader::new(FileView::at(&file, 0));
            TableHeader::read_from(&mut reader)?
        };

        let mut table = Self {
            path,
            header,
            file,
            index: SparseMemIndex::with_chunk_size(
                index_chunk_size.unwrap_or(DEFAULT_INDEX_CHUNK_SIZE),
            ),
            last_key: None,
        };

        // Bytes past the committed size are leftovers of an interrupted
        // append. Failing to drop them is harmless: iteration is bounded by
        // the header size anyway.
        let _ = table.file.set_len(table.header.file_size);

        table.reindex()?;
        Ok(table)
    }

    pub fn header(&self) -> TableHeader {
        self.header
    }

    pub fn num_entries(&self) -> u64 {
        self.header.num_entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A deep-cloned snapshot of the sparse index.
    pub fn index(&self) -> SparseMemIndex {
        self.index.clone()
    }

    /// Point lookup. Binary-searches the sparse index for the closest
    /// preceding location, then scans forward until the key is found or
    /// overshot.
    pub fn lookup_entry(&self, key: &[u8]) -> Result<Option<TableEntry>, SsTableError> {
        let location = self.index.search_location(key);
        for entry in self.entries_at(location) {
            let entry = entry?;
            match key.cmp(entry.key.as_slice()) {
                Ordering::Less => return Ok(None),
                Ordering::Equal => return Ok(Some(entry)),
                Ordering::Greater => {}
            }
        }
        Ok(None)
    }

    /// Lazily iterates every entry in file order.
    pub fn entries(&self) -> Entries<'_> {
        self.entries_at(EntryLocation::default())
    }

    /// Lazily iterates entries starting at `location`. A default location
    /// (entry number 0) starts right past the header.
    pub fn entries_at(&self, mut location: EntryLocation) -> Entries<'_> {
        if location.entry_number == 0 {
            location.offset = TableHeader::SIZE;
        }
        Entries {
            table: self,
            reader: BufReader::new(FileView::at(&self.file, location.offset)),
            location,
            failed: false,
        }
    }

    /// Appends `pairs` to the table. Keys must be strictly ascending and
    /// strictly greater than everything already in the table; any violation
    /// (or I/O failure) rolls the file back to its committed size and
    /// nothing is appended.
    pub fn append_entries<I>(&mut self, pairs: I) -> Result<(), SsTableError>
    where
        I: IntoIterator<Item = KeyValuePair>,
    {
        self.append_fallible(pairs.into_iter().map(Ok))
    }

    /// Append core that also accepts upstream failures mid-stream, so that a
    /// merge source error aborts with the same rollback as a local one.
    pub(crate) fn append_fallible<I>(&mut self, pairs: I) -> Result<(), SsTableError>
    where
        I: IntoIterator<Item = Result<KeyValuePair, SsTableError>>,
    {
        if let Err(err) = self.try_append(pairs) {
            let _ = self.truncate_to_committed();
            return Err(err);
        }
        self.partial_reindex()
    }

    fn try_append<I>(&mut self, pairs: I) -> Result<(), SsTableError>
    where
        I: IntoIterator<Item = Result<KeyValuePair, SsTableError>>,
    {
        let mut writer = BufWriter::new(FileView::at(&self.file, self.header.file_size));
        let mut last_key = self.last_key.clone();
        let mut bytes_written = 0u64;
        let mut entries_added = 0u64;

        for pair in pairs {
            let pair = pair?;
            if let Some(previous) = &last_key {
                if pair.key.as_slice() <= previous.as_slice() {
                    log::warn!(
                        "rejecting append of key {:?} after last key {:?}",
                        String::from_utf8_lossy(&pair.key),
                        String::from_utf8_lossy(previous),
                    );
                    return Err(SsTableError::OutOfOrderAppend);
                }
            }
            bytes_written += format::write_entry(&mut writer, &pair)?;
            entries_added += 1;
            last_key = Some(pair.key);
        }

        writer.flush()?;
        drop(writer);
        self.file.sync_all()?;

        // Entry bytes are durable; only now is the header allowed to point
        // at them.
        let new_size = self.header.file_size + bytes_written;
        let new_entries = self.header.num_entries + entries_added;
        self.write_new_size(new_size, new_entries)?;
        self.last_key = last_key;
        Ok(())
    }

    fn write_new_size(&mut self, file_size: u64, num_entries: u64) -> Result<(), SsTableError> {
        let new_header = self.header.with_new_size(file_size, num_entries);
        let mut view = FileView::at(&self.file, 0);
        view.write_all(&new_header.encode())?;
        self.file.sync_all()?;
        self.header = new_header;
        Ok(())
    }

    fn truncate_to_committed(&mut self) -> io::Result<()> {
        self.file.set_len(self.header.file_size)
    }

    /// Full sparse-index rebuild: walk every entry, indexing one per
    /// `chunk_size` bytes.
    fn reindex(&mut self) -> Result<(), SsTableError> {
        let chunk_size = self.index.chunk_size;
        let mut indexed_entries = Vec::new();
        let mut next_chunk_start = chunk_size;
        let mut last_key = None;

        for entry in self.entries() {
            let entry = entry?;
            if entry.location.offset >= next_chunk_start {
                next_chunk_start = entry.location.offset + chunk_size;
                indexed_entries.push(SparseIndexEntry {
                    key: entry.key.clone(),
                    location: entry.location,
                });
            }
            last_key = Some(entry.key);
        }

        self.last_key = last_key;
        self.index = SparseMemIndex {
            chunk_size,
            indexed_entries,
        };
        Ok(())
    }

    /// Index only what was appended since the last indexed entry.
    fn partial_reindex(&mut self) -> Result<(), SsTableError> {
        let Some(last_indexed) = self.index.indexed_entries.last() else {
            return self.reindex();
        };
        let start = last_indexed.location;
        let chunk_size = self.index.chunk_size;
        let mut next_chunk_start = start.offset + chunk_size;
        let mut added = Vec::new();
        let mut last_key = None;

        for entry in self.entries_at(start) {
            let entry = entry?;
            if entry.location.offset >= next_chunk_start {
                next_chunk_start = entry.location.offset + chunk_size;
                added.push(SparseIndexEntry {
                    key: entry.key.clone(),
                    location: entry.location,
                });
            }
            last_key = Some(entry.key);
        }

        if last_key.is_some() {
            self.last_key = last_key;
        }
        self.index.indexed_entries.extend(added);
        Ok(())
    }

    /// Renames the underlying file. The open descriptor is unaffected.
    pub fn rename(&mut self, new_path: impl AsRef<Path>) -> Result<(), SsTableError> {
        let new_path = new_path.as_ref().to_path_buf();
        fs::rename(&self.path, &new_path)?;
        self.path = new_path;
        Ok(())
    }
}

impl std::fmt::Debug for SsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SsTable")
            .field("path", &self.path)
            .field("header", &self.header)
            .field("indexed_entries", &self.index.indexed_entries.len())
            .finish()
    }
}

/// Lazy forward iterator over a table's entries, bounded by the committed
/// file size. Reads through its own positional view, so iterators never
/// interfere with each other or with appends.
pub struct Entries<'a> {
    table: &'a SsTable,
    reader: BufReader<FileView<'a>>,
    location: EntryLocation,
    failed: bool,
}

impl Iterator for Entries<'_> {
    type Item = Result<TableEntry, SsTableError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.location.offset >= self.table.header.file_size {
            return None;
        }
        match format::read_entry(&mut self.reader) {
            Ok((key, value, is_deleted, consumed)) => {
                let entry = TableEntry {
                    location: self.location,
                    key,
                    value,
                    is_deleted,
                };
                self.location.offset += consumed;
                self.location.entry_number += 1;
                Some(Ok(entry))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests;
