use super::helpers::*;
use crate::*;
use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tempfile::tempdir;

const NUM_KEYS: u64 = 100;

fn check_final_lookups(db: &Db) -> Result<()> {
    for i in 0..NUM_KEYS {
        let key_x = format!("keyX {i:03}");
        let entry = db.lookup(key_x.as_bytes())?.unwrap();
        assert_eq!(
            entry.value.as_deref(),
            Some(format!("value {i}").as_bytes()),
            "{key_x}"
        );
        assert!(!entry.is_deleted, "{key_x}");

        let key_y = format!("keyY {i:03}");
        let entry = db.lookup(key_y.as_bytes())?.unwrap();
        assert!(entry.is_deleted, "{key_y}");
        assert_eq!(entry.value, None, "{key_y}");
    }
    Ok(())
}

#[test]
fn concurrent_writers_across_two_flushes() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("db");

    let db = Db::create(&path, Some(1000))?;
    db.start()?;

    let progress_x = AtomicU64::new(0);
    let progress_y = AtomicU64::new(0);

    std::thread::scope(|scope| -> Result<()> {
        scope.spawn(|| {
            for i in 0..NUM_KEYS {
                db.upsert(
                    format!("keyX {i:03}").as_bytes(),
                    format!("value {i}").as_bytes(),
                )
                .unwrap();
                progress_x.fetch_add(1, Ordering::Relaxed);
            }
        });

        scope.spawn(|| {
            for i in 0..NUM_KEYS {
                db.upsert(
                    format!("keyY {i:03}").as_bytes(),
                    format!("value {i}").as_bytes(),
                )
                .unwrap();
                progress_y.fetch_add(1, Ordering::Relaxed);
            }
            for i in 0..NUM_KEYS {
                db.delete(format!("keyY {i:03}").as_bytes()).unwrap();
                progress_y.fetch_add(1, Ordering::Relaxed);
            }
        });

        // let both writers make some headway before the first flush
        assert!(wait_until(Duration::from_secs(5), || {
            progress_x.load(Ordering::Relaxed) >= NUM_KEYS / 4
                && progress_y.load(Ordering::Relaxed) >= NUM_KEYS / 4
        }));
        db.create_sstable()?;

        // and let them finish before the second
        assert!(wait_until(Duration::from_secs(7), || {
            progress_x.load(Ordering::Relaxed) + progress_y.load(Ordering::Relaxed)
                >= 3 * NUM_KEYS
        }));
        db.create_sstable()?;
        Ok(())
    })?;

    assert!(wait_until(Duration::from_secs(5), || flushed(&db, 2)));

    let s = snapshot(&db);
    assert_eq!(s.next_sstable_number, 3);
    assert_eq!(s.next_wal_number, 4);
    assert_eq!(s.active_index_len, 0);
    assert_eq!(s.active_wal_entries, 0);
    assert!(!s.has_state_err);

    check_final_lookups(&db)?;
    db.close()?;

    let same = Db::open(&path, Some(1000))?;
    same.start()?;

    let s = snapshot(&same);
    assert_eq!(s.wal_count, 1);
    assert_eq!(s.mem_index_count, 1);
    assert_eq!(s.active_index_len, 0);
    assert_eq!(s.sstable_count, 2);
    assert_eq!(s.next_sstable_number, 3);
    assert_eq!(s.next_wal_number, 4);

    check_final_lookups(&same)?;
    same.close()?;
    Ok(())
}

#[test]
fn concurrent_readers_see_consistent_values() -> Result<()> {
    let dir = tempdir()?;
    let db = Db::create(dir.path().join("db"), None)?;
    db.start()?;

    for i in 0..50u64 {
        db.upsert(format!("key{i:02}").as_bytes(), b"stable")?;
    }

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for i in 0..50u64 {
                    let entry = db.lookup(format!("key{i:02}").as_bytes()).unwrap().unwrap();
                    assert_eq!(entry.value.as_deref(), Some(&b"stable"[..]));
                }
            });
        }
        scope.spawn(|| {
            for i in 50..100u64 {
                db.upsert(format!("key{i:02}").as_bytes(), b"stable").unwrap();
            }
        });
    });

    db.close()?;
    Ok(())
}
