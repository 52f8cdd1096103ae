//! Integration tests for the B+Tree over the buffer pool.

use mica_buffer::BufferPoolManager;
use mica_common::disk::MemoryDiskManager;
use mica_common::page::{PageId, HEADER_PAGE_ID, INVALID_PAGE_ID};
use mica_common::types::{GenericKey, LexicographicComparator, RecordId};
use mica_storage::{BPlusTree, FileDiskManager, FileDiskManagerConfig, HeaderPage, Transaction};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;

type Key = GenericKey<8>;
type Tree = BPlusTree<Key, RecordId, LexicographicComparator>;

fn key(v: u64) -> Key {
    Key::from_u64(v)
}

fn rid(v: u64) -> RecordId {
    RecordId {
        page_id: v as u32,
        slot: (v % 97) as u32,
    }
}

fn new_tree(pool_size: usize, leaf_max: u32, internal_max: u32) -> (Arc<BufferPoolManager>, Tree) {
    let disk = Arc::new(MemoryDiskManager::new());
    let bpm = Arc::new(BufferPoolManager::new(pool_size, disk));
    let tree = Tree::new(
        "test_index",
        bpm.clone(),
        LexicographicComparator,
        leaf_max,
        internal_max,
    );
    (bpm, tree)
}

fn insert_all(tree: &Tree, values: impl IntoIterator<Item = u64>) {
    let mut txn = Transaction::new();
    for v in values {
        assert!(tree.insert(&key(v), &rid(v), &mut txn).unwrap(), "insert {v}");
    }
}

fn remove_all(tree: &Tree, values: impl IntoIterator<Item = u64>) {
    let mut txn = Transaction::new();
    for v in values {
        tree.remove(&key(v), &mut txn).unwrap();
    }
}

fn collect_keys(tree: &Tree) -> Vec<u64> {
    tree.iter().unwrap().map(|(k, _)| k.to_u64()).collect()
}

fn header_root(bpm: &BufferPoolManager, name: &str) -> Option<PageId> {
    let frame = bpm.fetch_page(HEADER_PAGE_ID).unwrap();
    let root = {
        let mut data = frame.write_data();
        HeaderPage::new(&mut data[..]).get_root_id(name)
    };
    bpm.unpin_page(HEADER_PAGE_ID, false);
    root
}

fn assert_no_pins(bpm: &BufferPoolManager) {
    assert_eq!(bpm.stats().pinned_frames, 0, "leaked pin");
}

#[test]
fn test_empty_tree() {
    let (bpm, tree) = new_tree(16, 4, 4);
    let mut txn = Transaction::new();

    assert!(tree.is_empty());
    assert_eq!(tree.get_value(&key(1), &mut txn).unwrap(), None);
    tree.remove(&key(1), &mut txn).unwrap();
    assert!(tree.iter().unwrap().next().is_none());
    assert!(tree.iter().unwrap().is_end());
    assert_no_pins(&bpm);
}

#[test]
fn test_sequential_insert_and_lookup() {
    // Ten keys with leaf_max_size = 4 force at least one internal level.
    let (bpm, tree) = new_tree(32, 4, 4);
    insert_all(&tree, 1..=10);

    let mut txn = Transaction::new();
    for v in 1..=10 {
        assert_eq!(tree.get_value(&key(v), &mut txn).unwrap(), Some(rid(v)), "key {v}");
    }
    assert_eq!(tree.get_value(&key(7), &mut txn).unwrap(), Some(rid(7)));
    assert_eq!(tree.get_value(&key(11), &mut txn).unwrap(), None);

    // All leaves stay linked left to right.
    assert_eq!(collect_keys(&tree), (1..=10).collect::<Vec<_>>());

    // The root moved off the first leaf and is mirrored in the header page.
    assert!(tree.root_page_id().is_valid());
    assert_eq!(header_root(&bpm, "test_index"), Some(tree.root_page_id()));
    assert_no_pins(&bpm);
}

#[test]
fn test_duplicate_insert_keeps_first_value() {
    let (bpm, tree) = new_tree(16, 4, 4);
    let mut txn = Transaction::new();

    assert!(tree.insert(&key(5), &rid(1), &mut txn).unwrap());
    assert!(!tree.insert(&key(5), &rid(2), &mut txn).unwrap());
    assert_eq!(tree.get_value(&key(5), &mut txn).unwrap(), Some(rid(1)));
    assert_no_pins(&bpm);
}

#[test]
fn test_delete_collapses_to_single_leaf() {
    let (bpm, tree) = new_tree(32, 4, 4);
    insert_all(&tree, 1..=10);
    remove_all(&tree, 1..=9);

    let mut txn = Transaction::new();
    assert_eq!(tree.get_value(&key(10), &mut txn).unwrap(), Some(rid(10)));
    for v in 1..=9 {
        assert_eq!(tree.get_value(&key(v), &mut txn).unwrap(), None, "key {v}");
    }
    assert_eq!(collect_keys(&tree), vec![10]);
    assert_eq!(header_root(&bpm, "test_index"), Some(tree.root_page_id()));
    assert_no_pins(&bpm);
}

#[test]
fn test_delete_everything_then_reinsert() {
    let (bpm, tree) = new_tree(32, 4, 4);
    insert_all(&tree, 1..=20);
    remove_all(&tree, 1..=20);

    assert!(tree.is_empty());
    assert_eq!(header_root(&bpm, "test_index"), Some(INVALID_PAGE_ID));
    assert!(collect_keys(&tree).is_empty());

    insert_all(&tree, [3, 1, 2]);
    assert_eq!(collect_keys(&tree), vec![1, 2, 3]);
    assert_eq!(header_root(&bpm, "test_index"), Some(tree.root_page_id()));
    assert_no_pins(&bpm);
}

#[test]
fn test_remove_absent_key_is_noop() {
    let (bpm, tree) = new_tree(16, 4, 4);
    insert_all(&tree, [2, 4, 6]);

    remove_all(&tree, [1, 3, 7]);
    assert_eq!(collect_keys(&tree), vec![2, 4, 6]);
    assert_no_pins(&bpm);
}

#[test]
fn test_iteration_from_key() {
    let (bpm, tree) = new_tree(64, 4, 4);
    insert_all(&tree, (1..=50).map(|v| v * 2)); // even keys 2..=100

    // Present start key.
    let from_40: Vec<u64> = tree
        .iter_from(&key(40))
        .unwrap()
        .map(|(k, _)| k.to_u64())
        .collect();
    assert_eq!(from_40, (20..=50).map(|v| v * 2).collect::<Vec<_>>());

    // Absent start key lands on the next larger one.
    let from_41: Vec<u64> = tree
        .iter_from(&key(41))
        .unwrap()
        .map(|(k, _)| k.to_u64())
        .collect();
    assert_eq!(from_41, (21..=50).map(|v| v * 2).collect::<Vec<_>>());

    // Start past the maximum yields nothing.
    assert!(tree.iter_from(&key(1000)).unwrap().next().is_none());
    assert_no_pins(&bpm);
}

#[test]
fn test_shuffled_insert_orders_keys() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let mut values: Vec<u64> = (1..=200).collect();
    values.shuffle(&mut rng);

    let (bpm, tree) = new_tree(64, 4, 5);
    insert_all(&tree, values.iter().copied());

    assert_eq!(collect_keys(&tree), (1..=200).collect::<Vec<_>>());

    let mut txn = Transaction::new();
    for v in 1..=200 {
        assert_eq!(tree.get_value(&key(v), &mut txn).unwrap(), Some(rid(v)));
    }
    assert_no_pins(&bpm);
}

#[test]
fn test_random_churn_under_small_pool() {
    // A 16-frame pool forces steady eviction under the churn.
    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let mut values: Vec<u64> = (0..300).collect();
    values.shuffle(&mut rng);

    let (bpm, tree) = new_tree(16, 4, 5);
    insert_all(&tree, values.iter().copied());

    let (removed, kept) = values.split_at(150);
    let mut removed = removed.to_vec();
    removed.shuffle(&mut rng);
    remove_all(&tree, removed.iter().copied());

    let mut expected: Vec<u64> = kept.to_vec();
    expected.sort_unstable();
    assert_eq!(collect_keys(&tree), expected);

    let mut txn = Transaction::new();
    for v in &removed {
        assert_eq!(tree.get_value(&key(*v), &mut txn).unwrap(), None);
    }
    for v in kept {
        assert_eq!(tree.get_value(&key(*v), &mut txn).unwrap(), Some(rid(*v)));
    }
    assert_no_pins(&bpm);
}

#[test]
fn test_insert_delete_inverse_restores_key_set() {
    let (bpm, tree) = new_tree(32, 4, 4);
    insert_all(&tree, [10, 20, 30, 40, 50]);
    let before = collect_keys(&tree);

    let mut txn = Transaction::new();
    assert!(tree.insert(&key(25), &rid(25), &mut txn).unwrap());
    tree.remove(&key(25), &mut txn).unwrap();

    assert_eq!(collect_keys(&tree), before);
    assert_no_pins(&bpm);
}

#[test]
fn test_concurrent_disjoint_inserts() {
    // Two writers on disjoint ranges with tiny fan-out produce exactly the
    // union of their keys.
    let (bpm, tree) = new_tree(256, 3, 3);
    let tree = Arc::new(tree);

    let low = {
        let tree = Arc::clone(&tree);
        std::thread::spawn(move || {
            let mut txn = Transaction::new();
            for v in 1..=50u64 {
                assert!(tree.insert(&key(v), &rid(v), &mut txn).unwrap());
            }
        })
    };
    let high = {
        let tree = Arc::clone(&tree);
        std::thread::spawn(move || {
            let mut txn = Transaction::new();
            for v in 51..=100u64 {
                assert!(tree.insert(&key(v), &rid(v), &mut txn).unwrap());
            }
        })
    };
    low.join().unwrap();
    high.join().unwrap();

    assert_eq!(collect_keys(&tree), (1..=100).collect::<Vec<_>>());
    let mut txn = Transaction::new();
    for v in 1..=100 {
        assert_eq!(tree.get_value(&key(v), &mut txn).unwrap(), Some(rid(v)));
    }
    assert_no_pins(&bpm);
}

#[test]
fn test_concurrent_readers_and_writer() {
    let (bpm, tree) = new_tree(256, 4, 4);
    insert_all(&tree, (0..100).map(|v| v * 2));
    let tree = Arc::new(tree);

    let writer = {
        let tree = Arc::clone(&tree);
        std::thread::spawn(move || {
            let mut txn = Transaction::new();
            for v in 0..100u64 {
                assert!(tree.insert(&key(v * 2 + 1), &rid(v * 2 + 1), &mut txn).unwrap());
            }
        })
    };
    let readers: Vec<_> = (0..2)
        .map(|_| {
            let tree = Arc::clone(&tree);
            std::thread::spawn(move || {
                let mut txn = Transaction::new();
                for v in 0..100u64 {
                    // Pre-existing even keys stay visible throughout.
                    assert_eq!(
                        tree.get_value(&key(v * 2), &mut txn).unwrap(),
                        Some(rid(v * 2))
                    );
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(collect_keys(&tree), (0..200).collect::<Vec<_>>());
    assert_no_pins(&bpm);
}

#[test]
fn test_concurrent_disjoint_removes() {
    let (bpm, tree) = new_tree(256, 3, 4);
    insert_all(&tree, 1..=100);
    let tree = Arc::new(tree);

    let handles: Vec<_> = [(1u64, 25u64), (26, 50), (51, 75)]
        .into_iter()
        .map(|(lo, hi)| {
            let tree = Arc::clone(&tree);
            std::thread::spawn(move || {
                let mut txn = Transaction::new();
                for v in lo..=hi {
                    tree.remove(&key(v), &mut txn).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(collect_keys(&tree), (76..=100).collect::<Vec<_>>());
    assert_no_pins(&bpm);
}

#[test]
fn test_root_persisted_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = FileDiskManagerConfig {
        data_path: dir.path().join("mica.db"),
        fsync_enabled: false,
    };

    {
        let disk = Arc::new(FileDiskManager::new(config.clone()).unwrap());
        let bpm = Arc::new(BufferPoolManager::new(64, disk));
        let tree = Tree::new(
            "orders_pk",
            bpm.clone(),
            LexicographicComparator,
            4,
            4,
        );
        let mut txn = Transaction::new();
        for v in 1..=50u64 {
            assert!(tree.insert(&key(v), &rid(v), &mut txn).unwrap());
        }
        bpm.flush_all().unwrap();
    }

    let disk = Arc::new(FileDiskManager::new(config).unwrap());
    let bpm = Arc::new(BufferPoolManager::new(64, disk));
    let tree = Tree::open(
        "orders_pk",
        bpm.clone(),
        LexicographicComparator,
        4,
        4,
    )
    .unwrap();

    assert!(!tree.is_empty());
    assert_eq!(header_root(&bpm, "orders_pk"), Some(tree.root_page_id()));
    let mut txn = Transaction::new();
    for v in 1..=50u64 {
        assert_eq!(tree.get_value(&key(v), &mut txn).unwrap(), Some(rid(v)));
    }
    assert_eq!(collect_keys(&tree), (1..=50).collect::<Vec<_>>());
    assert_no_pins(&bpm);
}

#[test]
fn test_two_indexes_share_the_header_page() {
    let disk = Arc::new(MemoryDiskManager::new());
    let bpm = Arc::new(BufferPoolManager::new(64, disk));
    let orders = Tree::new("orders_pk", bpm.clone(), LexicographicComparator, 4, 4);
    let users = Tree::new("users_pk", bpm.clone(), LexicographicComparator, 4, 4);

    let mut txn = Transaction::new();
    for v in 1..=10u64 {
        assert!(orders.insert(&key(v), &rid(v), &mut txn).unwrap());
        assert!(users.insert(&key(v * 100), &rid(v * 100), &mut txn).unwrap());
    }

    assert_eq!(header_root(&bpm, "orders_pk"), Some(orders.root_page_id()));
    assert_eq!(header_root(&bpm, "users_pk"), Some(users.root_page_id()));
    assert_ne!(orders.root_page_id(), users.root_page_id());
    assert_no_pins(&bpm);
}
