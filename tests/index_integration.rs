//! Integration tests for the paged index.
//!
//! These tests drive the public API only: splits and merges, range scans,
//! iterators interleaved with mutations, and persistence through real
//! page stores.

use pagedindex::{
    DiskManager, Error, Index, IndexConfig, MemoryPageStore, PageStore, SharedPageStore,
};
use tempfile::tempdir;

fn small_config() -> IndexConfig {
    IndexConfig::new(2, 4, 2, 4).unwrap()
}

fn small_index() -> Index<MemoryPageStore> {
    Index::create(MemoryPageStore::new(), small_config()).unwrap()
}

fn filled(keys: impl IntoIterator<Item = i64>) -> Index<MemoryPageStore> {
    let mut index = small_index();
    for key in keys {
        index.insert(key, key * 10).unwrap();
    }
    index
}

fn ascending_keys<S: PageStore>(index: &Index<S>, min: i64, max: i64) -> Vec<i64> {
    index
        .ascending_iter(min, max)
        .unwrap()
        .map(|entry| entry.unwrap().key)
        .collect()
}

fn descending_keys<S: PageStore>(index: &Index<S>, max: i64, min: i64) -> Vec<i64> {
    index
        .descending_iter(max, min)
        .unwrap()
        .map(|entry| entry.unwrap().key)
        .collect()
}

// ============================================================================
// Structure
// ============================================================================

/// Keys come back in strictly increasing order no matter the insert order.
#[test]
fn test_scan_order_after_shuffled_inserts() {
    // 0..500 visited in a fixed pseudo-random order
    let keys: Vec<i64> = (0..500).map(|i| (i * 211) % 500).collect();
    let index = filled(keys);

    let scanned = ascending_keys(&index, i64::MIN, i64::MAX);
    assert_eq!(scanned, (0..500).collect::<Vec<_>>());
    assert!(index.height().unwrap() > 2);
    index.verify().unwrap();
}

#[test]
fn test_range_bounds_are_inclusive() {
    let index = filled([1, 5, 10, 15, 20]);

    assert_eq!(ascending_keys(&index, 5, 15), vec![5, 10, 15]);
    assert_eq!(descending_keys(&index, 15, 5), vec![15, 10, 5]);
    assert_eq!(ascending_keys(&index, 6, 9), Vec::<i64>::new());
    assert_eq!(ascending_keys(&index, 15, 5), Vec::<i64>::new());
    assert_eq!(descending_keys(&index, 5, 15), Vec::<i64>::new());
}

#[test]
fn test_first_overflow_splits_once() {
    let index = filled(1..=5);

    let stats = index.stats();
    assert_eq!(stats.leaf_splits, 1);
    assert_eq!(stats.root_growths, 1);
    assert_eq!(index.height().unwrap(), 2);
    index.verify().unwrap();
}

#[test]
fn test_insert_existing_key_overwrites() {
    let mut index = small_index();
    index.insert(7, 1).unwrap();
    index.insert(7, 2).unwrap();

    assert_eq!(index.lookup(7).unwrap(), Some(2));
    assert_eq!(ascending_keys(&index, i64::MIN, i64::MAX), vec![7]);
}

#[test]
fn test_lookup_and_max_key() {
    let mut index = filled((0..100).map(|i| i * 3));

    assert_eq!(index.lookup(30).unwrap(), Some(300));
    assert_eq!(index.lookup(31).unwrap(), None);
    assert_eq!(index.max_key().unwrap(), Some(297));

    assert!(index.delete(297).unwrap());
    assert_eq!(index.max_key().unwrap(), Some(294));
}

/// Growing to several levels and deleting everything returns to a single
/// empty leaf.
#[test]
fn test_grow_then_shrink_to_empty_root() {
    let mut index = filled(1..=300);
    assert!(index.height().unwrap() >= 3);

    for key in 1..=300 {
        assert_eq!(index.delete_existing(key).unwrap(), key * 10);
        if key % 50 == 0 {
            index.verify().unwrap();
        }
    }

    assert_eq!(index.height().unwrap(), 1);
    assert!(index.is_empty().unwrap());
    assert_eq!(index.max_key().unwrap(), None);
    assert_eq!(index.loaded_pages(), 1);

    let stats = index.stats();
    assert!(stats.leaf_merges > 0);
    assert!(stats.inner_merges > 0);
    assert!(stats.root_demotions >= 2);
}

/// Deleting from the high end exercises the rightmost-child paths.
#[test]
fn test_delete_in_descending_order() {
    let mut index = filled(1..=300);
    for key in (1..=300).rev() {
        assert!(index.delete(key).unwrap());
    }
    assert!(index.is_empty().unwrap());
    index.verify().unwrap();
}

// ============================================================================
// Iterating while mutating
// ============================================================================

#[test]
fn test_ascending_iteration_deleting_every_key() {
    let mut index = filled(0..400);

    let mut iter = index.ascending_iter(i64::MIN, i64::MAX).unwrap();
    let mut seen = Vec::new();
    while iter.has_next() {
        let entry = iter.next_entry().unwrap();
        index.delete_existing(entry.key).unwrap();
        seen.push(entry.key);
    }

    assert_eq!(seen, (0..400).collect::<Vec<_>>());
    assert!(index.is_empty().unwrap());
    assert_eq!(index.open_iterators(), 0);
    assert_eq!(index.loaded_pages(), 1);
}

#[test]
fn test_descending_iteration_deleting_every_key() {
    let mut index = filled(0..400);

    let mut iter = index.descending_iter(i64::MAX, i64::MIN).unwrap();
    let mut seen = Vec::new();
    while iter.has_next() {
        let entry = iter.next_entry().unwrap();
        index.delete_existing(entry.key).unwrap();
        seen.push(entry.key);
    }

    assert_eq!(seen, (0..400).rev().collect::<Vec<_>>());
    assert!(index.is_empty().unwrap());
    assert_eq!(index.loaded_pages(), 1);
}

/// Keys inserted behind the scan position are not returned; every key that
/// existed when the scan started comes back once.
#[test]
fn test_ascending_iteration_with_inserts_behind() {
    let mut index = filled(0..200);

    let mut iter = index.ascending_iter(0, i64::MAX).unwrap();
    let mut seen = Vec::new();
    while iter.has_next() {
        let entry = iter.next_entry().unwrap();
        index.delete_existing(entry.key).unwrap();
        index.insert(-1 - entry.key, entry.value).unwrap();
        seen.push(entry.key);
    }

    assert_eq!(seen, (0..200).collect::<Vec<_>>());
    assert_eq!(
        ascending_keys(&index, i64::MIN, i64::MAX),
        (-200..0).collect::<Vec<_>>()
    );
    index.verify().unwrap();
}

#[test]
fn test_descending_iteration_with_inserts_behind() {
    let mut index = filled(0..200);

    let mut iter = index.descending_iter(199, i64::MIN).unwrap();
    let mut seen = Vec::new();
    while iter.has_next() {
        let entry = iter.next_entry().unwrap();
        index.delete_existing(entry.key).unwrap();
        index.insert(entry.key + 1000, entry.value).unwrap();
        seen.push(entry.key);
    }

    assert_eq!(seen, (0..200).rev().collect::<Vec<_>>());
    assert_eq!(
        ascending_keys(&index, i64::MIN, i64::MAX),
        (1000..1200).collect::<Vec<_>>()
    );
    index.verify().unwrap();
}

/// Deleting every other key ahead of the scan position.
#[test]
fn test_ascending_iteration_skips_keys_deleted_ahead() {
    let mut index = filled(0..300);

    let mut iter = index.ascending_iter(i64::MIN, i64::MAX).unwrap();
    let mut seen = Vec::new();
    while iter.has_next() {
        let entry = iter.next_entry().unwrap();
        seen.push(entry.key);
        if entry.key % 10 == 0 {
            // remove a block of keys far ahead of the cursor
            for ahead in entry.key + 5..entry.key + 10 {
                index.delete(ahead).unwrap();
            }
        }
    }

    let expected: Vec<i64> = (0..300).filter(|k| k % 10 < 5).collect();
    assert_eq!(seen, expected);
    index.verify().unwrap();
}

#[test]
fn test_two_iterators_over_disjoint_ranges() {
    let mut index = filled(0..300);

    let mut low = index.ascending_iter(0, 149).unwrap();
    let mut high = index.descending_iter(299, 150).unwrap();
    let mut low_seen = Vec::new();
    let mut high_seen = Vec::new();

    while low.has_next() || high.has_next() {
        if low.has_next() {
            let entry = low.next_entry().unwrap();
            index.delete_existing(entry.key).unwrap();
            low_seen.push(entry.key);
        }
        if high.has_next() {
            let entry = high.next_entry().unwrap();
            index.delete_existing(entry.key).unwrap();
            high_seen.push(entry.key);
        }
    }

    assert_eq!(low_seen, (0..150).collect::<Vec<_>>());
    assert_eq!(high_seen, (150..300).rev().collect::<Vec<_>>());
    assert!(index.is_empty().unwrap());
    assert_eq!(index.loaded_pages(), 1);
}

#[test]
fn test_parallel_scans_without_mutation() {
    let index = filled(0..100);

    let mut up = index.ascending_iter(0, 99).unwrap();
    let mut down = index.descending_iter(99, 0).unwrap();
    assert_eq!(index.open_iterators(), 2);

    for i in 0..100 {
        assert_eq!(up.next_entry().unwrap().key, i);
        assert_eq!(down.next_entry().unwrap().key, 99 - i);
    }
    assert!(!up.has_next());
    assert!(!down.has_next());
    assert_eq!(index.open_iterators(), 0);
}

// ============================================================================
// Iterator lifecycle
// ============================================================================

#[test]
fn test_exhausted_iterator_reports_error() {
    let index = filled([1, 2]);

    let mut iter = index.ascending_iter(1, 2).unwrap();
    assert_eq!(iter.next_entry().unwrap().key, 1);
    assert_eq!(iter.next_entry().unwrap().key, 2);
    assert!(!iter.has_next());
    assert!(matches!(iter.next_entry(), Err(Error::IteratorExhausted)));
    assert!(iter.next().is_none());

    let mut empty = index.ascending_iter(3, 10).unwrap();
    assert!(!empty.has_next());
    assert!(matches!(empty.next_entry(), Err(Error::IteratorExhausted)));
}

#[test]
fn test_closed_iterator_reports_error() {
    let index = filled(0..20);

    let mut iter = index.descending_iter(19, 0).unwrap();
    assert_eq!(iter.next_entry().unwrap().key, 19);
    assert_eq!(index.open_iterators(), 1);

    index.close(&mut iter);
    assert!(iter.is_closed());
    assert!(!iter.has_next());
    assert!(matches!(iter.next_entry(), Err(Error::IteratorClosed)));
    assert_eq!(index.open_iterators(), 0);

    // Closing twice is harmless
    iter.close();
    assert!(iter.is_closed());
}

#[test]
fn test_iterator_remove_is_unsupported() {
    let index = filled(0..3);
    let mut iter = index.ascending_iter(0, 2).unwrap();
    assert!(matches!(
        iter.remove(),
        Err(Error::UnsupportedOperation(_))
    ));
    assert_eq!(iter.next_entry().unwrap().key, 0);
}

#[test]
fn test_dropping_iterator_releases_snapshots() {
    let mut index = filled(0..40);

    let during = {
        let mut iter = index.ascending_iter(0, 39).unwrap();
        assert_eq!(iter.next_entry().unwrap().key, 0);
        index.delete(1).unwrap();
        assert_eq!(index.stats().cow_snapshots, 1);
        index.loaded_pages()
    };

    assert_eq!(index.open_iterators(), 0);
    assert_eq!(index.loaded_pages(), during - 1);
    index.insert(1, 10).unwrap();
    index.verify().unwrap();
    assert_eq!(ascending_keys(&index, 0, 39), (0..40).collect::<Vec<_>>());
}

#[test]
fn test_delete_existing_of_missing_key() {
    let mut index = filled([1, 2, 3]);
    match index.delete_existing(4) {
        Err(Error::KeyNotFound { key, leaf }) => {
            assert_eq!(key, 4);
            assert!(!leaf.is_empty());
        }
        other => panic!("expected KeyNotFound, got {:?}", other),
    }
    assert_eq!(ascending_keys(&index, 0, 10), vec![1, 2, 3]);
}

#[test]
fn test_invalid_config_is_rejected() {
    assert!(matches!(
        IndexConfig::new(3, 4, 2, 4),
        Err(Error::InvalidConfig(_))
    ));
    assert!(matches!(
        IndexConfig::new(0, 4, 2, 4),
        Err(Error::InvalidConfig(_))
    ));
}

// ============================================================================
// Persistence
// ============================================================================

#[test]
fn test_write_and_reopen_from_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.db");
    let config = IndexConfig::default();

    let root = {
        let dm = DiskManager::create(&path).unwrap();
        let mut index = Index::create(dm, config).unwrap();
        for key in 0..2000 {
            index.insert(key, -key).unwrap();
        }
        index.write().unwrap()
    };

    let dm = DiskManager::open(&path).unwrap();
    let mut index = Index::open(dm, root, config).unwrap();
    // Only the root is read on open
    assert_eq!(index.loaded_pages(), 1);

    assert_eq!(index.lookup(1234).unwrap(), Some(-1234));
    assert_eq!(index.max_key().unwrap(), Some(1999));
    assert_eq!(
        ascending_keys(&index, 100, 104),
        vec![100, 101, 102, 103, 104]
    );
    index.verify().unwrap();

    for key in (0..2000).filter(|k| k % 2 == 0) {
        index.delete_existing(key).unwrap();
    }
    let root = index.write().unwrap();
    drop(index);

    let dm = DiskManager::open(&path).unwrap();
    let index = Index::open(dm, root, config).unwrap();
    let keys = ascending_keys(&index, i64::MIN, i64::MAX);
    assert_eq!(keys, (0..2000).filter(|k| k % 2 == 1).collect::<Vec<_>>());
    index.verify().unwrap();
}

#[test]
fn test_rewrite_after_root_change_on_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("index.db");

    let dm = DiskManager::create(&path).unwrap();
    let mut index = Index::create(dm, small_config()).unwrap();
    index.insert(1, 1).unwrap();
    let first_root = index.write().unwrap();

    for key in 2..=50 {
        index.insert(key, key).unwrap();
    }
    let second_root = index.write().unwrap();
    assert_ne!(first_root, second_root);
    drop(index);

    let dm = DiskManager::open(&path).unwrap();
    let index = Index::open(dm, second_root, small_config()).unwrap();
    assert_eq!(descending_keys(&index, 50, 48), vec![50, 49, 48]);
}

#[test]
fn test_indexes_sharing_one_store() {
    let store = SharedPageStore::new(MemoryPageStore::new());

    let mut ids = Index::create(store.clone(), small_config()).unwrap();
    let mut ages = Index::create(store.clone(), small_config()).unwrap();
    for key in 0..50 {
        ids.insert(key, key + 1).unwrap();
        ages.insert(key + 100, key).unwrap();
    }
    let ids_root = ids.write().unwrap();
    let ages_root = ages.write().unwrap();
    drop(ids);
    drop(ages);

    let ids = Index::open(store.clone(), ids_root, small_config()).unwrap();
    let ages = Index::open(store.clone(), ages_root, small_config()).unwrap();
    assert_eq!(ascending_keys(&ids, 0, 2), vec![0, 1, 2]);
    assert_eq!(ascending_keys(&ages, 0, 102), vec![100, 101, 102]);
    assert_eq!(ages.lookup(149).unwrap(), Some(49));
    assert!(store.with_store(|s| s.live_pages()) > 2);
}

#[test]
fn test_merges_release_store_pages() {
    let store = SharedPageStore::new(MemoryPageStore::new());
    let mut index = Index::create(store.clone(), small_config()).unwrap();

    for key in 0..100 {
        index.insert(key, key).unwrap();
    }
    index.write().unwrap();
    let full = store.with_store(|s| s.live_pages());

    for key in 0..100 {
        index.delete(key).unwrap();
    }
    index.write().unwrap();
    assert!(store.with_store(|s| s.live_pages()) < full);
    assert_eq!(store.with_store(|s| s.live_pages()), 1);
}
