//! N-way merge of sorted tables.
//!
//! A min-heap of per-source cursors yields entries in ascending key order.
//! When several sources carry the same key, the source added last wins and
//! the older entries for that key are dropped. Tombstones are entries like
//! any other: they propagate into the merged table so they keep shadowing
//! values in tables older than every source.

use kvpair::KeyValuePair;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::mem;

use crate::{Entries, SsTable, SsTableError, TableEntry};

impl SsTable {
    /// Merges all entries of `sources` into this table.
    ///
    /// Pass sources oldest first: their order encodes recency, and on key
    /// ties the entry of the latest source is the one written. The
    /// destination must sort strictly after its current contents, i.e. it is
    /// normally empty.
    pub fn merge_tables(&mut self, sources: &[SsTable]) -> Result<(), SsTableError> {
        let mut mux = TableMux::new();
        for source in sources {
            mux.add_source(source.entries())?;
        }

        self.append_fallible(std::iter::from_fn(move || match mux.next_entry() {
            Ok(Some(entry)) => Some(Ok(KeyValuePair {
                key: entry.key,
                value: Some(entry.value),
                is_deleted: entry.is_deleted,
            })),
            Ok(None) => None,
            Err(err) => Some(Err(err)),
        }))
    }
}

/// One source's cursor plus its current front entry.
struct MuxSource<'a> {
    current: TableEntry,
    /// Position in the order sources were added; higher means more recent.
    ordinal: usize,
    entries: Entries<'a>,
}

impl PartialEq for MuxSource<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.current.key == other.current.key && self.ordinal == other.ordinal
    }
}

impl Eq for MuxSource<'_> {}

impl PartialOrd for MuxSource<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MuxSource<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse the key comparison so the
        // smallest key surfaces first, and on equal keys put the
        // later-added source on top so its entry wins.
        other
            .current
            .key
            .cmp(&self.current.key)
            .then_with(|| self.ordinal.cmp(&other.ordinal))
    }
}

/// Merging multiplexer over any number of entry cursors.
struct TableMux<'a> {
    heap: BinaryHeap<MuxSource<'a>>,
    source_count: usize,
    last_key: Option<Vec<u8>>,
}

impl<'a> TableMux<'a> {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            source_count: 0,
            last_key: None,
        }
    }

    fn add_source(&mut self, mut entries: Entries<'a>) -> Result<(), SsTableError> {
        let ordinal = self.source_count;
        self.source_count += 1;

        match entries.next() {
            Some(Ok(current)) => {
                self.heap.push(MuxSource {
                    current,
                    ordinal,
                    entries,
                });
                Ok(())
            }
            Some(Err(err)) => Err(err),
            None => Ok(()),
        }
    }

    fn next_entry(&mut self) -> Result<Option<TableEntry>, SsTableError> {
        while let Some(mut source) = self.heap.pop() {
            let entry = match source.entries.next() {
                Some(Ok(next)) => {
                    let entry = mem::replace(&mut source.current, next);
                    self.heap.push(source);
                    entry
                }
                Some(Err(err)) => return Err(err),
                None => source.current,
            };

            // a key already emitted came from a more recent source
            if self.last_key.as_deref() == Some(entry.key.as_slice()) {
                continue;
            }

            self.last_key = Some(entry.key.clone());
            return Ok(Some(entry));
        }
        Ok(None)
    }
}
