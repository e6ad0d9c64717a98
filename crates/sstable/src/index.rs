/// Position of an entry within a table file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryLocation {
    pub entry_number: u64,
    pub offset: u64,
}

/// One indexed key with the location of its entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseIndexEntry {
    pub key: Vec<u8>,
    pub location: EntryLocation,
}

/// Sparse in-memory index over a table's entries.
///
/// Invariant: `indexed_entries` is strictly ascending by key, and adjacent
/// entries are at least `chunk_size` file bytes apart.
#[derive(Debug, Clone, Default)]
pub struct SparseMemIndex {
    pub chunk_size: u64,
    pub indexed_entries: Vec<SparseIndexEntry>,
}

impl SparseMemIndex {
    pub(crate) fn with_chunk_size(chunk_size: u64) -> Self {
        Self {
            chunk_size,
            indexed_entries: Vec::new(),
        }
    }

    /// The location to start a forward scan for `key`: the exact match if
    /// indexed, otherwise the closest preceding indexed entry, otherwise the
    /// start of the table.
    pub fn search_location(&self, key: &[u8]) -> EntryLocation {
        match self
            .indexed_entries
            .binary_search_by(|entry| entry.key.as_slice().cmp(key))
        {
            Ok(idx) => self.indexed_entries[idx].location,
            Err(0) => EntryLocation::default(),
            Err(idx) => self.indexed_entries[idx - 1].location,
        }
    }
}
