//! Merge tests: compaction, finalization on reopen, crash leftovers

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use caskdb::data::LogRecord;
use caskdb::merge::merge_dir_path;
use caskdb::{CaskError, Config, Engine, IndexType, IoType, WriteBatchOptions};
use tempfile::TempDir;

use super::{
    config, data_files, db_dir, small_segment_config, test_key, test_value, ALL_INDEX_TYPES,
};

// =============================================================================
// Helper Functions
// =============================================================================

/// Writes 300 records over 100 keys, then deletes every tenth key
fn write_churn(engine: &Engine) {
    for round in 0..3 {
        for i in 0..100 {
            engine.put(&test_key(i), &test_value(i + round)).unwrap();
        }
    }
    for i in (0..100).step_by(10) {
        engine.delete(&test_key(i)).unwrap();
    }
}

fn assert_churn_state(engine: &Engine) {
    for i in 0..100 {
        if i % 10 == 0 {
            assert!(matches!(engine.get(&test_key(i)), Err(CaskError::KeyNotFound)));
        } else {
            assert_eq!(engine.get(&test_key(i)).unwrap(), test_value(i + 2));
        }
    }
    assert_eq!(engine.stat().unwrap().key_num, 90);
}

/// Name → bytes of every segment and the hint file
fn snapshot_files(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut files = BTreeMap::new();
    for path in data_files(dir) {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        files.insert(name, fs::read(&path).unwrap());
    }
    files.insert("hint-index".to_string(), fs::read(dir.join("hint-index")).unwrap());
    files
}

// =============================================================================
// Guard Tests
// =============================================================================

#[test]
fn test_merge_ratio_unreached() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config(&db_dir(&temp_dir), IndexType::BTree)).unwrap();
    engine.put(b"only", b"live data").unwrap();

    match engine.merge() {
        Err(CaskError::MergeRatioUnreached { ratio, threshold }) => {
            assert_eq!(ratio, 0.0);
            assert_eq!(threshold, 0.5);
        }
        other => panic!("expected MergeRatioUnreached, got {:?}", other),
    }
}

#[test]
fn test_merge_on_empty_engine() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let cfg = small_segment_config(&dir, IndexType::BTree, IoType::StandardFio);

    let engine = Engine::open(cfg.clone()).unwrap();
    engine.merge().unwrap();
    assert!(!merge_dir_path(&dir).exists());
    engine.close().unwrap();
    drop(engine);

    let engine = Engine::open(cfg).unwrap();
    assert_eq!(engine.stat().unwrap().key_num, 0);
}

// =============================================================================
// Compaction Tests
// =============================================================================

#[test]
fn test_merge_applied_on_reopen() {
    for index_type in ALL_INDEX_TYPES {
        let temp_dir = TempDir::new().unwrap();
        let dir = db_dir(&temp_dir);
        let cfg = small_segment_config(&dir, index_type, IoType::MemoryMap);

        let segments_before = {
            let engine = Engine::open(cfg.clone()).unwrap();
            write_churn(&engine);
            let segments_before = engine.stat().unwrap().data_file_num;

            engine.merge().unwrap();
            assert!(merge_dir_path(&dir).join("merge-finished").exists());

            // The running engine keeps serving from its old segments
            assert_churn_state(&engine);
            engine.put(b"after-merge", b"kept").unwrap();
            engine.close().unwrap();
            segments_before
        };

        let engine = Engine::open(cfg).unwrap();
        assert!(!merge_dir_path(&dir).exists());
        assert!(dir.join("hint-index").exists());
        assert!(dir.join("merge-finished").exists());

        assert_churn_state_with_extra(&engine);
        let stat = engine.stat().unwrap();
        assert!(
            stat.data_file_num < segments_before,
            "{}: {} segments after merge, {} before",
            index_type,
            stat.data_file_num,
            segments_before
        );
    }
}

fn assert_churn_state_with_extra(engine: &Engine) {
    assert_eq!(engine.get(b"after-merge").unwrap(), b"kept");
    for i in 0..100 {
        if i % 10 == 0 {
            assert!(matches!(engine.get(&test_key(i)), Err(CaskError::KeyNotFound)));
        } else {
            assert_eq!(engine.get(&test_key(i)).unwrap(), test_value(i + 2));
        }
    }
    assert_eq!(engine.stat().unwrap().key_num, 91);
}

#[test]
fn test_merge_applied_after_crash() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let cfg = small_segment_config(&dir, IndexType::Art, IoType::StandardFio);
    {
        let engine = Engine::open(cfg.clone()).unwrap();
        write_churn(&engine);
        engine.merge().unwrap();
        engine.put(&test_key(1), b"newest").unwrap();
        engine.sync().unwrap();
        // Dropped without close
    }

    let engine = Engine::open(cfg).unwrap();
    assert_eq!(engine.get(&test_key(1)).unwrap(), b"newest");
    assert_eq!(engine.get(&test_key(2)).unwrap(), test_value(4));
    assert!(matches!(engine.get(&test_key(10)), Err(CaskError::KeyNotFound)));
    assert_eq!(engine.stat().unwrap().key_num, 90);
}

#[test]
fn test_merge_keeps_committed_batches() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let cfg = small_segment_config(&dir, IndexType::BTree, IoType::StandardFio);
    {
        let engine = Engine::open(cfg.clone()).unwrap();
        let batch = engine.new_write_batch(WriteBatchOptions::default()).unwrap();
        for i in 0..20 {
            batch.put(&test_key(i), &test_value(i)).unwrap();
        }
        batch.commit().unwrap();
        for i in 0..10 {
            engine.put(&test_key(i), b"plain").unwrap();
        }
        engine.merge().unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(cfg).unwrap();
    for i in 0..10 {
        assert_eq!(engine.get(&test_key(i)).unwrap(), b"plain");
    }
    for i in 10..20 {
        assert_eq!(engine.get(&test_key(i)).unwrap(), test_value(i));
    }
    assert_eq!(engine.seq_no(), 1);
}

#[test]
fn test_merge_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let cfg = small_segment_config(&dir, IndexType::BTree, IoType::StandardFio);
    {
        let engine = Engine::open(cfg.clone()).unwrap();
        write_churn(&engine);
        engine.merge().unwrap();
        engine.close().unwrap();
    }

    let first = {
        let engine = Engine::open(cfg.clone()).unwrap();
        assert_churn_state(&engine);
        let files = snapshot_files(&dir);

        // No writes in between: a second merge rewrites the same records
        engine.merge().unwrap();
        engine.close().unwrap();
        files
    };

    let engine = Engine::open(cfg).unwrap();
    assert_churn_state(&engine);
    assert_eq!(snapshot_files(&dir), first);
}

#[test]
fn test_merge_reclaims_disk_space() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let cfg = Config::builder()
        .dir_path(&dir)
        .data_file_size(4096)
        .data_file_merge_ratio(0.3)
        .build();

    let size_before = {
        let engine = Engine::open(cfg.clone()).unwrap();
        write_churn(&engine);
        let stat = engine.stat().unwrap();
        assert!(stat.reclaimable_size > 0);
        engine.merge().unwrap();
        engine.close().unwrap();
        stat.disk_size
    };

    let engine = Engine::open(cfg).unwrap();
    let stat = engine.stat().unwrap();
    assert!(stat.disk_size < size_before);
    assert_eq!(stat.reclaimable_size, 0);
    assert_churn_state(&engine);
}

// =============================================================================
// Crash Leftover Tests
// =============================================================================

#[test]
fn test_unfinished_merge_is_discarded() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let cfg = small_segment_config(&dir, IndexType::BTree, IoType::StandardFio);

    let files_before = {
        let engine = Engine::open(cfg.clone()).unwrap();
        write_churn(&engine);
        engine.merge().unwrap();
        engine.close().unwrap();
        data_files(&dir)
    };

    // Crash before the marker became durable
    fs::remove_file(merge_dir_path(&dir).join("merge-finished")).unwrap();

    let engine = Engine::open(cfg).unwrap();
    assert!(!merge_dir_path(&dir).exists());
    assert!(!dir.join("hint-index").exists());
    assert_eq!(data_files(&dir), files_before);
    assert_churn_state(&engine);
}

#[test]
fn test_persistent_index_torn_tail_then_merge() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let segment = dir.join("000000001.data");
    let cfg = small_segment_config(&dir, IndexType::BPlusTree, IoType::StandardFio);

    let valid_len = {
        let engine = Engine::open(cfg.clone()).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.close().unwrap();
        fs::metadata(&segment).unwrap().len()
    };

    // Half of a record, as if the process died mid-append
    let (torn, _) = LogRecord::normal(vec![0, b'x'], b"lost".to_vec()).encode();
    let mut file = OpenOptions::new().append(true).open(&segment).unwrap();
    file.write_all(&torn[..torn.len() / 2]).unwrap();
    drop(file);

    {
        let engine = Engine::open(cfg.clone()).unwrap();
        assert_eq!(fs::metadata(&segment).unwrap().len(), valid_len);

        engine.put(b"b", b"2").unwrap();
        assert_eq!(engine.get(b"b").unwrap(), b"2");
        engine.merge().unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(cfg).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), b"1");
    assert_eq!(engine.get(b"b").unwrap(), b"2");
    assert_eq!(engine.stat().unwrap().key_num, 2);
}

#[test]
fn test_merge_refuses_segment_with_unreadable_live_region() {
    let temp_dir = TempDir::new().unwrap();
    let dir = db_dir(&temp_dir);
    let segment = dir.join("000000001.data");
    let cfg = small_segment_config(&dir, IndexType::BPlusTree, IoType::StandardFio);
    {
        let engine = Engine::open(cfg.clone()).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.close().unwrap();
    }

    // Value byte of "a": crc(4) + type(1) + ksize(1) + vsize(1) + key [0, 'a'](2)
    let mut bytes = fs::read(&segment).unwrap();
    bytes[9] ^= 0xFF;
    fs::write(&segment, &bytes).unwrap();

    {
        let engine = Engine::open(cfg.clone()).unwrap();
        // "b" sits past the bad record and is still indexed, so nothing is cut
        assert_eq!(fs::metadata(&segment).unwrap().len(), bytes.len() as u64);
        assert_eq!(engine.get(b"b").unwrap(), b"2");

        assert!(matches!(engine.merge(), Err(CaskError::CorruptRecord(_))));
        assert!(!merge_dir_path(&dir).exists());
        assert_eq!(engine.get(b"b").unwrap(), b"2");
        engine.close().unwrap();
    }

    let engine = Engine::open(cfg).unwrap();
    assert!(!merge_dir_path(&dir).exists());
    assert_eq!(engine.get(b"b").unwrap(), b"2");
}
