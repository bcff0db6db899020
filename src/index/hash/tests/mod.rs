//! Extendible hash tests — splits, directory doubling, invariants,
//! uniqueness, pathological chains.

use tempfile::TempDir;

use crate::index::hash::ExtendibleHashIndex;
use crate::index::{Entry, FieldType, IndexError, Key};

const KW: u32 = 24;

fn build_empty(tmp: &TempDir, bucket_size: u32, unique: bool) -> ExtendibleHashIndex {
    ExtendibleHashIndex::build(tmp.path(), FieldType::Text, KW, bucket_size, unique, &[]).unwrap()
}

#[test]
fn point_lookup_after_many_inserts() {
    let tmp = TempDir::new().unwrap();
    let mut index = build_empty(&tmp, 4, false);

    for i in 0..500u64 {
        index
            .insert(Entry::new(Key::Text(format!("order-{i:05}")), i))
            .unwrap();
    }

    for i in (0..500u64).step_by(17) {
        assert_eq!(
            index.search(&Key::Text(format!("order-{i:05}"))).unwrap(),
            vec![i]
        );
    }
    assert!(index.search(&Key::Text("order-99999".into())).unwrap().is_empty());
}

#[test]
fn directory_invariants_hold_after_any_insert_sequence() {
    let tmp = TempDir::new().unwrap();
    let mut index = build_empty(&tmp, 2, false);

    for i in 0..200u64 {
        index
            .insert(Entry::new(Key::Text(format!("k{i}")), i))
            .unwrap();
        index.verify_directory().unwrap();
    }

    assert!(index.global_depth() > 0);
    assert_eq!(index.directory().len(), 1 << index.global_depth());
    assert_eq!(index.scan_all().unwrap().len(), 200);
}

#[test]
fn duplicate_key_rejected_when_unique() {
    let tmp = TempDir::new().unwrap();
    let mut index = build_empty(&tmp, 4, true);

    index.insert(Entry::new(Key::Text("a".into()), 1)).unwrap();
    let err = index.insert(Entry::new(Key::Text("a".into()), 2)).unwrap_err();
    assert!(matches!(err, IndexError::DuplicateKey(_)));
}

#[test]
fn duplicate_keys_chain_instead_of_splitting_forever() {
    let tmp = TempDir::new().unwrap();
    let mut index = build_empty(&tmp, 2, false);

    // Identical keys hash identically; no split can separate them.
    for rid in 0..20u64 {
        index.insert(Entry::new(Key::Text("same".into()), rid)).unwrap();
    }

    let mut rids = index.search(&Key::Text("same".into())).unwrap();
    rids.sort_unstable();
    assert_eq!(rids, (0..20).collect::<Vec<u64>>());
    // Depth stays minimal — the overflow chain absorbed the load.
    assert!(index.global_depth() <= 1);
    index.verify_directory().unwrap();
}

#[test]
fn delete_removes_and_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let mut index = build_empty(&tmp, 4, false);

    for i in 0..50u64 {
        index.insert(Entry::new(Key::Text(format!("k{i}")), i)).unwrap();
    }

    assert_eq!(index.delete(&Key::Text("k25".into())).unwrap(), vec![25]);
    assert!(index.search(&Key::Text("k25".into())).unwrap().is_empty());
    assert!(index.delete(&Key::Text("k25".into())).unwrap().is_empty());
    index.verify_directory().unwrap();
}

#[test]
fn buddy_merge_preserves_remaining_entries() {
    let tmp = TempDir::new().unwrap();
    let mut index = build_empty(&tmp, 2, false);

    for i in 0..40u64 {
        index.insert(Entry::new(Key::Text(format!("k{i}")), i)).unwrap();
    }
    for i in 0..35u64 {
        index.delete(&Key::Text(format!("k{i}"))).unwrap();
        index.verify_directory().unwrap();
    }

    let mut left: Vec<u64> = index.scan_all().unwrap().iter().map(|e| e.rid).collect();
    left.sort_unstable();
    assert_eq!(left, (35..40).collect::<Vec<u64>>());
}

#[test]
fn reopen_preserves_directory_and_entries() {
    let tmp = TempDir::new().unwrap();
    let (depth, count);
    {
        let mut index = build_empty(&tmp, 2, false);
        for i in 0..100u64 {
            index.insert(Entry::new(Key::Text(format!("k{i}")), i)).unwrap();
        }
        depth = index.global_depth();
        count = index.scan_all().unwrap().len();
    }

    let index = ExtendibleHashIndex::open(tmp.path(), FieldType::Text, KW, false).unwrap();
    assert_eq!(index.global_depth(), depth);
    assert_eq!(index.scan_all().unwrap().len(), count);
    index.verify_directory().unwrap();
    assert_eq!(index.search(&Key::Text("k42".into())).unwrap(), vec![42]);
}

#[test]
fn int_keys_hash_stably() {
    let tmp = TempDir::new().unwrap();
    let mut index =
        ExtendibleHashIndex::build(tmp.path(), FieldType::Int, KW, 4, false, &[]).unwrap();

    for i in 0..100i64 {
        index.insert(Entry::new(Key::Int(i), i as u64)).unwrap();
    }
    assert_eq!(index.search(&Key::Int(73)).unwrap(), vec![73]);
}
