use crate::*;
use kvpair::KeyValuePair;
use tempfile::tempdir;

// --------------------- Sparse index shape ---------------------

#[test]
fn sparse_index_respects_chunk_spacing() {
    let dir = tempdir().unwrap();
    let mut table = SsTable::create(dir.path().join("table.sst"), 0, Some(25)).unwrap();

    table
        .append_entries((0..100).map(|i| {
            KeyValuePair::new(format!("{i:03}").into_bytes(), b"value".to_vec())
        }))
        .unwrap();

    let index = table.index();
    assert_eq!(index.chunk_size, 25);
    assert!(!index.indexed_entries.is_empty());

    for pair in index.indexed_entries.windows(2) {
        assert!(pair[0].key < pair[1].key, "index keys must ascend");
        assert!(
            pair[1].location.offset - pair[0].location.offset >= 25,
            "indexed entries must be at least a chunk apart"
        );
    }
}

#[test]
fn partial_reindex_matches_full_reindex() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("table.sst");

    // build in two appends; the second extends the index incrementally
    let mut table = SsTable::create(&path, 0, Some(30)).unwrap();
    table
        .append_entries((0..50).map(|i| {
            KeyValuePair::new(format!("{i:03}").into_bytes(), b"value".to_vec())
        }))
        .unwrap();
    table
        .append_entries((50..100).map(|i| {
            KeyValuePair::new(format!("{i:03}").into_bytes(), b"value".to_vec())
        }))
        .unwrap();
    let incremental = table.index();
    drop(table);

    // reopening rebuilds the index from scratch
    let reopened = SsTable::open(&path, Some(30)).unwrap();
    let full = reopened.index();

    assert_eq!(incremental.indexed_entries, full.indexed_entries);
}

// --------------------- Point lookup at scale ---------------------

#[test]
fn lookup_a_thousand_keys_through_a_sparse_index() {
    let dir = tempdir().unwrap();
    let mut table = SsTable::create(dir.path().join("table.sst"), 0, Some(1000)).unwrap();

    table
        .append_entries((0..1000).map(|i| {
            KeyValuePair::new(
                format!("someKey{i:3}").into_bytes(),
                format!("someValue{i}").into_bytes(),
            )
        }))
        .unwrap();

    assert_eq!(table.num_entries(), 1000);
    let index = table.index();
    assert!(
        (index.indexed_entries.len() as u64) <= table.header().file_size / 1000,
        "index must stay sparse: {} entries for {} bytes",
        index.indexed_entries.len(),
        table.header().file_size
    );

    for i in 0..1000 {
        let key = format!("someKey{i:3}");
        let entry = table
            .lookup_entry(key.as_bytes())
            .unwrap()
            .unwrap_or_else(|| panic!("key {key:?} must be found"));
        assert_eq!(entry.value, format!("someValue{i}").into_bytes());
        assert!(!entry.is_deleted);

        let miss = format!("someKey{i:3}x");
        assert!(table.lookup_entry(miss.as_bytes()).unwrap().is_none());
    }
}

#[test]
fn lookup_outside_the_key_range() {
    let dir = tempdir().unwrap();
    let mut table = SsTable::create(dir.path().join("table.sst"), 0, None).unwrap();
    table
        .append_entries([
            KeyValuePair::new(b"b".to_vec(), b"1".to_vec()),
            KeyValuePair::new(b"m".to_vec(), b"2".to_vec()),
        ])
        .unwrap();

    assert!(table.lookup_entry(b"a").unwrap().is_none());
    assert!(table.lookup_entry(b"z").unwrap().is_none());
    assert!(table.lookup_entry(b"c").unwrap().is_none());
}

#[test]
fn index_snapshot_is_detached() {
    let dir = tempdir().unwrap();
    let mut table = SsTable::create(dir.path().join("table.sst"), 0, Some(10)).unwrap();
    table
        .append_entries((0..20).map(|i| {
            KeyValuePair::new(format!("{i:02}").into_bytes(), b"v".to_vec())
        }))
        .unwrap();

    let before = table.index();
    table
        .append_entries((20..40).map(|i| {
            KeyValuePair::new(format!("{i:02}").into_bytes(), b"v".to_vec())
        }))
        .unwrap();

    // the snapshot taken earlier did not grow with the table
    assert!(before.indexed_entries.len() < table.index().indexed_entries.len());
}
