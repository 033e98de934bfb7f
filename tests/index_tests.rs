//! Tests for the index implementations
//!
//! Every implementation runs the same contract checks. Isolation differs:
//! the in-memory indexes iterate a snapshot, the persistent index a read
//! transaction; both hide writes made after the iterator was created.

use caskdb::config::IndexType;
use caskdb::data::LogRecordPos;
use caskdb::index::{new_indexer, AdaptiveRadixTree, BPlusTreeIndex, BTreeIndex, Indexer};
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn pos(file_id: u32, offset: u64) -> LogRecordPos {
    LogRecordPos {
        file_id,
        offset,
        size: 10,
    }
}

/// One index of every kind; the TempDir keeps the persistent one alive
fn all_indexes() -> (TempDir, Vec<(&'static str, Box<dyn Indexer>)>) {
    let dir = TempDir::new().unwrap();
    let indexes: Vec<(&'static str, Box<dyn Indexer>)> = vec![
        ("btree", Box::new(BTreeIndex::new())),
        ("art", Box::new(AdaptiveRadixTree::new())),
        ("bptree", Box::new(BPlusTreeIndex::open(dir.path(), false).unwrap())),
    ];
    (dir, indexes)
}

fn collect(index: &dyn Indexer, reverse: bool) -> Vec<Vec<u8>> {
    let mut iter = index.iterator(reverse).unwrap();
    let mut keys = Vec::new();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.next().unwrap();
    }
    keys
}

// =============================================================================
// Contract Tests
// =============================================================================

#[test]
fn test_put_get_replace() {
    let (_dir, indexes) = all_indexes();
    for (name, index) in indexes {
        assert_eq!(index.put(b"a".to_vec(), pos(1, 0)).unwrap(), None, "{}", name);
        assert_eq!(index.get(b"a").unwrap(), Some(pos(1, 0)), "{}", name);

        let old = index.put(b"a".to_vec(), pos(2, 64)).unwrap();
        assert_eq!(old, Some(pos(1, 0)), "{}", name);
        assert_eq!(index.get(b"a").unwrap(), Some(pos(2, 64)), "{}", name);
        assert_eq!(index.get(b"missing").unwrap(), None, "{}", name);
        assert_eq!(index.size().unwrap(), 1, "{}", name);
    }
}

#[test]
fn test_delete() {
    let (_dir, indexes) = all_indexes();
    for (name, index) in indexes {
        index.put(b"a".to_vec(), pos(0, 0)).unwrap();

        assert_eq!(index.delete(b"a").unwrap(), (Some(pos(0, 0)), true), "{}", name);
        assert_eq!(index.delete(b"a").unwrap(), (None, false), "{}", name);
        assert_eq!(index.get(b"a").unwrap(), None, "{}", name);
        assert_eq!(index.size().unwrap(), 0, "{}", name);
    }
}

#[test]
fn test_iteration_order() {
    let (_dir, indexes) = all_indexes();
    let mut keys: Vec<Vec<u8>> = (0..500u32)
        .map(|i| format!("key-{:05}", i * 7 % 500).into_bytes())
        .collect();
    keys.shuffle(&mut thread_rng());

    for (name, index) in indexes {
        for (i, key) in keys.iter().enumerate() {
            index.put(key.clone(), pos(0, i as u64)).unwrap();
        }

        let mut expected = keys.clone();
        expected.sort();
        assert_eq!(collect(index.as_ref(), false), expected, "{}", name);

        expected.reverse();
        assert_eq!(collect(index.as_ref(), true), expected, "{}", name);
    }
}

#[test]
fn test_prefix_sharing_keys() {
    // Keys that are prefixes of each other exercise ART's inner leaves
    let (_dir, indexes) = all_indexes();
    let keys: [&[u8]; 6] = [b"a", b"ab", b"abc", b"abd", b"b", b""];

    for (name, index) in indexes {
        for (i, key) in keys.iter().enumerate() {
            index.put(key.to_vec(), pos(0, i as u64)).unwrap();
        }
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(index.get(key).unwrap(), Some(pos(0, i as u64)), "{}", name);
        }

        assert_eq!(
            collect(index.as_ref(), false),
            vec![b"".to_vec(), b"a".to_vec(), b"ab".to_vec(), b"abc".to_vec(), b"abd".to_vec(), b"b".to_vec()],
            "{}",
            name
        );

        index.delete(b"ab").unwrap();
        index.delete(b"abc").unwrap();
        assert_eq!(index.get(b"abd").unwrap(), Some(pos(0, 3)), "{}", name);
        assert_eq!(index.get(b"a").unwrap(), Some(pos(0, 0)), "{}", name);
        assert_eq!(index.size().unwrap(), 4, "{}", name);
    }
}

#[test]
fn test_seek() {
    let (_dir, indexes) = all_indexes();
    for (name, index) in indexes {
        for key in [b"aa", b"cc", b"ee"] {
            index.put(key.to_vec(), pos(0, 0)).unwrap();
        }

        let mut iter = index.iterator(false).unwrap();
        iter.seek(b"bb").unwrap();
        assert_eq!(iter.key(), b"cc", "{}", name);
        iter.seek(b"cc").unwrap();
        assert_eq!(iter.key(), b"cc", "{}", name);
        iter.seek(b"zz").unwrap();
        assert!(!iter.valid(), "{}", name);

        let mut iter = index.iterator(true).unwrap();
        iter.seek(b"dd").unwrap();
        assert_eq!(iter.key(), b"cc", "{}", name);
        iter.next().unwrap();
        assert_eq!(iter.key(), b"aa", "{}", name);
        iter.seek(b"a").unwrap();
        assert!(!iter.valid(), "{}", name);

        iter.rewind().unwrap();
        assert_eq!(iter.key(), b"ee", "{}", name);
    }
}

#[test]
fn test_iterator_does_not_see_later_writes() {
    let (_dir, indexes) = all_indexes();
    for (name, index) in indexes {
        index.put(b"a".to_vec(), pos(0, 0)).unwrap();
        index.put(b"b".to_vec(), pos(0, 1)).unwrap();

        let mut iter = index.iterator(false).unwrap();
        index.put(b"c".to_vec(), pos(0, 2)).unwrap();
        index.delete(b"a").unwrap();

        let mut seen = Vec::new();
        while iter.valid() {
            seen.push((iter.key().to_vec(), iter.value()));
            iter.next().unwrap();
        }
        assert_eq!(
            seen,
            vec![(b"a".to_vec(), pos(0, 0)), (b"b".to_vec(), pos(0, 1))],
            "{}",
            name
        );
        drop(iter);

        assert_eq!(collect(index.as_ref(), false), vec![b"b".to_vec(), b"c".to_vec()], "{}", name);
    }
}

#[test]
fn test_empty_index_iterator() {
    let (_dir, indexes) = all_indexes();
    for (name, index) in indexes {
        let iter = index.iterator(false).unwrap();
        assert!(!iter.valid(), "{}", name);
    }
}

// =============================================================================
// ART Node Growth Tests
// =============================================================================

#[test]
fn test_art_grows_and_shrinks_nodes() {
    let index = AdaptiveRadixTree::new();

    // 256 distinct first bytes forces the widest node, then back down
    for b in 0..=255u8 {
        index.put(vec![b, 1], pos(0, b as u64)).unwrap();
    }
    assert_eq!(index.size().unwrap(), 256);
    for b in 0..=255u8 {
        assert_eq!(index.get(&[b, 1]).unwrap(), Some(pos(0, b as u64)));
    }

    for b in 0..=250u8 {
        assert!(index.delete(&[b, 1]).unwrap().1);
    }
    assert_eq!(index.size().unwrap(), 5);
    assert_eq!(
        collect(&index, false),
        (251..=255u8).map(|b| vec![b, 1]).collect::<Vec<_>>()
    );
}

#[test]
fn test_art_matches_btree_on_random_ops() {
    let art = AdaptiveRadixTree::new();
    let btree = BTreeIndex::new();
    let mut rng = thread_rng();

    for i in 0..5_000u64 {
        let key = format!("k{}", rng.gen_range(0..800)).into_bytes();
        if rng.gen_bool(0.3) {
            assert_eq!(art.delete(&key).unwrap(), btree.delete(&key).unwrap());
        } else {
            assert_eq!(
                art.put(key.clone(), pos(0, i)).unwrap(),
                btree.put(key, pos(0, i)).unwrap()
            );
        }
    }

    assert_eq!(art.size().unwrap(), btree.size().unwrap());
    assert_eq!(collect(&art, false), collect(&btree, false));
}

// =============================================================================
// Persistent Index Tests
// =============================================================================

#[test]
fn test_bptree_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let index = new_indexer(IndexType::BPlusTree, dir.path(), true).unwrap();
        index.put(b"durable".to_vec(), pos(3, 99)).unwrap();
        index.close().unwrap();
    }

    let index = new_indexer(IndexType::BPlusTree, dir.path(), true).unwrap();
    assert_eq!(index.get(b"durable").unwrap(), Some(pos(3, 99)));
    assert_eq!(index.size().unwrap(), 1);
}
