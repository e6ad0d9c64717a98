//! The mutable in-memory index of the storage engine.
//!
//! A key-sorted sequence of [`KeyValuePair`]s. Every mutation lands here
//! right after its write-ahead-log append; a frozen index is later drained
//! into an SSTable in one ordered sweep, which is why a sorted vector is the
//! representation of choice: point operations are a binary search, and flush
//! iteration is free.
//!
//! Tombstones are stored like any other pair so that deletions shadow older
//! on-disk values during lookups. Capacity is unbounded; deciding when to
//! flush is the coordinator's job.

use kvpair::KeyValuePair;

/// Ordered key → pair map with binary-search upsert and lookup.
#[derive(Debug, Clone, Default)]
pub struct MemIndex {
    pairs: Vec<KeyValuePair>,
}

impl MemIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `pair`, replacing any existing pair with the same key.
    pub fn upsert(&mut self, pair: KeyValuePair) {
        match self
            .pairs
            .binary_search_by(|probe| probe.key.as_slice().cmp(pair.key.as_slice()))
        {
            Ok(idx) => self.pairs[idx] = pair,
            Err(idx) => self.pairs.insert(idx, pair),
        }
    }

    /// Returns the stored pair for `key`, tombstones included.
    pub fn lookup(&self, key: &[u8]) -> Option<&KeyValuePair> {
        self.pairs
            .binary_search_by(|probe| probe.key.as_slice().cmp(key))
            .ok()
            .map(|idx| &self.pairs[idx])
    }

    /// Iterates all pairs in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = &KeyValuePair> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_and_lookup() {
        let mut index = MemIndex::new();
        index.upsert(KeyValuePair::new(b"k1".to_vec(), b"v1".to_vec()));

        assert_eq!(index.len(), 1);
        let pair = index.lookup(b"k1").unwrap();
        assert_eq!(pair.value.as_deref(), Some(&b"v1"[..]));

        // overwrite keeps a single slot
        index.upsert(KeyValuePair::new(b"k1".to_vec(), b"v2".to_vec()));
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup(b"k1").unwrap().value.as_deref(), Some(&b"v2"[..]));
    }

    #[test]
    fn lookup_missing_key() {
        let index = MemIndex::new();
        assert!(index.lookup(b"nope").is_none());
    }

    #[test]
    fn tombstone_is_stored_and_returned() {
        let mut index = MemIndex::new();
        index.upsert(KeyValuePair::new(b"k".to_vec(), b"v".to_vec()));
        index.upsert(KeyValuePair::tombstone(b"k".to_vec()));

        let pair = index.lookup(b"k").unwrap();
        assert!(pair.is_deleted);
        assert_eq!(pair.value, None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn iteration_is_key_ordered() {
        let mut index = MemIndex::new();
        for key in [&b"pear"[..], b"apple", b"quince", b"banana"] {
            index.upsert(KeyValuePair::new(key.to_vec(), b"x".to_vec()));
        }

        let keys: Vec<_> = index.iter().map(|p| p.key.clone()).collect();
        assert_eq!(
            keys,
            vec![
                b"apple".to_vec(),
                b"banana".to_vec(),
                b"pear".to_vec(),
                b"quince".to_vec()
            ]
        );
    }

    #[test]
    fn keys_compare_as_raw_bytes() {
        let mut index = MemIndex::new();
        index.upsert(KeyValuePair::new(vec![0xff], b"hi".to_vec()));
        index.upsert(KeyValuePair::new(vec![0x00], b"lo".to_vec()));

        let keys: Vec<_> = index.iter().map(|p| p.key.clone()).collect();
        assert_eq!(keys, vec![vec![0x00], vec![0xff]]);
    }

    #[test]
    fn clear_empties_the_index() {
        let mut index = MemIndex::new();
        index.upsert(KeyValuePair::new(b"k".to_vec(), b"v".to_vec()));
        index.clear();
        assert!(index.is_empty());
        assert!(index.lookup(b"k").is_none());
    }
}
