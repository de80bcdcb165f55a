//! Tests for the Indexer implementations
//!
//! Every test runs against all three backends; they must be
//! indistinguishable through the trait.

use caskdb::data::LogRecordPos;
use caskdb::index::{new_indexer, BPlusTreeIndex, IndexIterator, IndexType, Indexer};
use caskdb::CaskError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const ALL_TYPES: [IndexType; 3] = [IndexType::BTree, IndexType::Art, IndexType::BPlusTree];

fn for_each_backend<F>(mut f: F)
where
    F: FnMut(IndexType, Box<dyn Indexer>),
{
    for index_type in ALL_TYPES {
        let temp_dir = TempDir::new().unwrap();
        let index = new_indexer(index_type, temp_dir.path(), false).unwrap();
        f(index_type, index);
    }
}

fn pos(file_id: u32, offset: u64) -> LogRecordPos {
    LogRecordPos::new(file_id, offset, 16)
}

fn collect(iter: &mut Box<dyn IndexIterator>) -> Vec<Vec<u8>> {
    let mut keys = Vec::new();
    while iter.valid() {
        keys.push(iter.key().to_vec());
        iter.next();
    }
    keys
}

fn keys(list: &[&str]) -> Vec<Vec<u8>> {
    list.iter().map(|k| k.as_bytes().to_vec()).collect()
}

// =============================================================================
// Put / Get / Delete Tests
// =============================================================================

#[test]
fn test_last_write_wins() {
    for_each_backend(|index_type, index| {
        assert_eq!(index.put(b"k".to_vec(), pos(1, 0)).unwrap(), None);
        assert_eq!(
            index.put(b"k".to_vec(), pos(1, 16)).unwrap(),
            Some(pos(1, 0)),
            "{}",
            index_type
        );
        assert_eq!(index.get(b"k").unwrap(), Some(pos(1, 16)));
        assert_eq!(index.size().unwrap(), 1);
    });
}

#[test]
fn test_delete_reports_presence() {
    for_each_backend(|index_type, index| {
        index.put(b"a".to_vec(), pos(1, 0)).unwrap();
        index.put(b"b".to_vec(), pos(1, 16)).unwrap();

        assert_eq!(index.delete(b"a").unwrap(), Some(pos(1, 0)), "{}", index_type);
        assert_eq!(index.delete(b"a").unwrap(), None);
        assert_eq!(index.delete(b"missing").unwrap(), None);
        assert_eq!(index.get(b"a").unwrap(), None);
        assert_eq!(index.size().unwrap(), 1);
    });
}

#[test]
fn test_list_keys_is_sorted() {
    for_each_backend(|index_type, index| {
        for (i, key) in ["pear", "apple", "fig", "banana", "app"].iter().enumerate() {
            index.put(key.as_bytes().to_vec(), pos(1, i as u64)).unwrap();
        }
        assert_eq!(
            index.list_keys().unwrap(),
            keys(&["app", "apple", "banana", "fig", "pear"]),
            "{}",
            index_type
        );
    });
}

#[test]
fn test_backends_agree_on_mixed_workload() {
    let mut results = Vec::new();
    for_each_backend(|_, index| {
        for i in 0..200u32 {
            let key = format!("key-{:03}", (i * 37) % 200).into_bytes();
            index.put(key, pos(i / 50 + 1, i as u64)).unwrap();
        }
        for i in (0..200u32).step_by(3) {
            index.delete(format!("key-{:03}", i).as_bytes()).unwrap();
        }

        let mut iter = index.iterator(false).unwrap();
        iter.rewind();
        let mut entries = Vec::new();
        while iter.valid() {
            entries.push((iter.key().to_vec(), iter.value()));
            iter.next();
        }
        results.push(entries);
    });

    assert_eq!(results[0].len(), 200 - 67);
    assert_eq!(results[0], results[1]);
    assert_eq!(results[0], results[2]);
}

// =============================================================================
// Iterator Tests
// =============================================================================

#[test]
fn test_iterator_forward_and_reverse() {
    for_each_backend(|index_type, index| {
        for key in ["c", "a", "e", "b", "d"] {
            index.put(key.as_bytes().to_vec(), pos(1, 0)).unwrap();
        }

        let mut forward = index.iterator(false).unwrap();
        forward.rewind();
        assert_eq!(collect(&mut forward), keys(&["a", "b", "c", "d", "e"]), "{}", index_type);

        let mut reverse = index.iterator(true).unwrap();
        reverse.rewind();
        assert_eq!(collect(&mut reverse), keys(&["e", "d", "c", "b", "a"]));
    });
}

#[test]
fn test_iterator_seek() {
    for_each_backend(|index_type, index| {
        for key in ["aa", "cc", "ee"] {
            index.put(key.as_bytes().to_vec(), pos(1, 0)).unwrap();
        }

        let mut forward = index.iterator(false).unwrap();
        forward.seek(b"bb");
        assert_eq!(forward.key(), b"cc", "{}", index_type);
        forward.seek(b"cc");
        assert_eq!(forward.key(), b"cc");
        forward.seek(b"zz");
        assert!(!forward.valid());

        let mut reverse = index.iterator(true).unwrap();
        reverse.seek(b"dd");
        assert_eq!(reverse.key(), b"cc");
        reverse.seek(b"a");
        assert!(!reverse.valid());
    });
}

#[test]
fn test_iterator_is_a_snapshot() {
    for_each_backend(|index_type, index| {
        index.put(b"a".to_vec(), pos(1, 0)).unwrap();
        index.put(b"b".to_vec(), pos(1, 16)).unwrap();

        let mut iter = index.iterator(false).unwrap();

        index.put(b"c".to_vec(), pos(1, 32)).unwrap();
        index.delete(b"a").unwrap();
        index.put(b"b".to_vec(), pos(2, 0)).unwrap();

        iter.rewind();
        assert_eq!(iter.key(), b"a", "{}", index_type);
        assert_eq!(iter.value(), pos(1, 0));
        iter.next();
        assert_eq!(iter.value(), pos(1, 16));
        iter.next();
        assert!(!iter.valid());
    });
}

#[test]
fn test_iterator_close_empties_snapshot() {
    for_each_backend(|_, index| {
        index.put(b"a".to_vec(), pos(1, 0)).unwrap();
        let mut iter = index.iterator(false).unwrap();
        iter.close();
        iter.rewind();
        assert!(!iter.valid());
    });
}

// =============================================================================
// Backend-Specific Tests
// =============================================================================

#[test]
fn test_only_bptree_is_persistent() {
    for_each_backend(|index_type, index| {
        assert_eq!(index.is_persistent(), index_type == IndexType::BPlusTree);
    });
}

#[test]
fn test_bptree_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let index = BPlusTreeIndex::open(temp_dir.path(), false).unwrap();
        index.put(b"durable".to_vec(), pos(3, 96)).unwrap();
        index.put(b"gone".to_vec(), pos(3, 128)).unwrap();
        index.delete(b"gone").unwrap();
        index.close().unwrap();
    }

    let index = BPlusTreeIndex::open(temp_dir.path(), false).unwrap();
    assert_eq!(index.get(b"durable").unwrap(), Some(pos(3, 96)));
    assert_eq!(index.get(b"gone").unwrap(), None);
    assert_eq!(index.size().unwrap(), 1);
}

#[test]
fn test_index_type_parsing() {
    assert_eq!("btree".parse::<IndexType>().unwrap(), IndexType::BTree);
    assert_eq!("ART".parse::<IndexType>().unwrap(), IndexType::Art);
    assert_eq!("bptree".parse::<IndexType>().unwrap(), IndexType::BPlusTree);
    assert_eq!(IndexType::try_from(2u8).unwrap(), IndexType::Art);
    assert!(matches!(
        IndexType::try_from(0u8),
        Err(CaskError::UnsupportedBackend(_))
    ));
    assert_eq!(IndexType::BPlusTree.to_string(), "bptree");
}
