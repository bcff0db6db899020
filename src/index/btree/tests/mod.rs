//! B+ tree tests — ordering, balance invariants, duplicates, persistence.

use tempfile::TempDir;

use crate::index::btree::BTreeIndex;
use crate::index::{Entry, Key};
use crate::stop::StopSignal;

fn int_entries(values: &[i64]) -> Vec<Entry> {
    values
        .iter()
        .enumerate()
        .map(|(rid, v)| Entry::new(Key::Int(*v), rid as u64))
        .collect()
}

fn keys(entries: &[Entry]) -> Vec<i64> {
    entries
        .iter()
        .map(|e| match e.key {
            Key::Int(v) => v,
            _ => unreachable!(),
        })
        .collect()
}

#[test]
fn search_after_bulk_build() {
    let tmp = TempDir::new().unwrap();
    let values: Vec<i64> = (0..1000).map(|i| i * 3).collect();
    let tree = BTreeIndex::build(tmp.path().join("btree.idx"), 8, &int_entries(&values)).unwrap();

    assert_eq!(tree.search(&Key::Int(999)), vec![333]);
    assert!(tree.search(&Key::Int(1000)).is_empty());
    tree.check_invariants().unwrap();
}

#[test]
fn range_walks_leaf_chain_in_order() {
    let tmp = TempDir::new().unwrap();
    let values: Vec<i64> = (0..500).collect();
    let tree = BTreeIndex::build(tmp.path().join("btree.idx"), 8, &int_entries(&values)).unwrap();
    let stop = StopSignal::default();

    let got = keys(&tree.range(&Key::Int(80), &Key::Int(90), &stop).unwrap());
    assert_eq!(got, (80..=90).collect::<Vec<i64>>());
}

#[test]
fn range_scan_of_everything_is_sorted_multiset() {
    let tmp = TempDir::new().unwrap();
    // Insert in a scrambled order.
    let mut values: Vec<i64> = (0..300).collect();
    let n = values.len();
    for i in 0..n {
        values.swap(i, (i * 7 + 3) % n);
    }
    let tree = BTreeIndex::build(tmp.path().join("btree.idx"), 6, &int_entries(&values)).unwrap();
    let stop = StopSignal::default();

    let got = keys(&tree.scan_all(&stop).unwrap());
    assert_eq!(got, (0..300).collect::<Vec<i64>>());
    tree.check_invariants().unwrap();
}

#[test]
fn duplicates_emit_in_insertion_order() {
    let tmp = TempDir::new().unwrap();
    let mut tree = BTreeIndex::build(tmp.path().join("btree.idx"), 4, &[]).unwrap();
    let stop = StopSignal::default();

    for rid in 0..20u64 {
        tree.insert(Entry::new(Key::Int(7), rid));
    }
    tree.insert(Entry::new(Key::Int(3), 100));
    tree.insert(Entry::new(Key::Int(9), 101));

    assert_eq!(tree.search(&Key::Int(7)), (0..20).collect::<Vec<u64>>());
    let in_range = tree.range(&Key::Int(7), &Key::Int(7), &stop).unwrap();
    assert_eq!(in_range.len(), 20);
    tree.check_invariants().unwrap();
}

#[test]
fn delete_removes_all_matches_and_rebalances() {
    let tmp = TempDir::new().unwrap();
    let values: Vec<i64> = (0..200).collect();
    let mut tree =
        BTreeIndex::build(tmp.path().join("btree.idx"), 6, &int_entries(&values)).unwrap();
    let stop = StopSignal::default();

    for v in 50..150 {
        let removed = tree.delete(&Key::Int(v));
        assert_eq!(removed.len(), 1);
        tree.check_invariants().unwrap();
    }

    assert_eq!(tree.len(), 100);
    let got = keys(&tree.scan_all(&stop).unwrap());
    let expected: Vec<i64> = (0..50).chain(150..200).collect();
    assert_eq!(got, expected);
}

#[test]
fn delete_missing_key_is_a_noop() {
    let tmp = TempDir::new().unwrap();
    let mut tree =
        BTreeIndex::build(tmp.path().join("btree.idx"), 4, &int_entries(&[1, 2, 3])).unwrap();

    assert!(tree.delete(&Key::Int(99)).is_empty());
    assert_eq!(tree.len(), 3);
}

#[test]
fn delete_everything_leaves_an_empty_root() {
    let tmp = TempDir::new().unwrap();
    let values: Vec<i64> = (0..100).collect();
    let mut tree =
        BTreeIndex::build(tmp.path().join("btree.idx"), 4, &int_entries(&values)).unwrap();
    let stop = StopSignal::default();

    for v in 0..100 {
        tree.delete(&Key::Int(v));
    }
    assert!(tree.is_empty());
    assert!(tree.scan_all(&stop).unwrap().is_empty());

    // The tree keeps working after total erasure.
    tree.insert(Entry::new(Key::Int(42), 7));
    assert_eq!(tree.search(&Key::Int(42)), vec![7]);
}

#[test]
fn save_and_open_round_trip() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("btree.idx");
    let stop = StopSignal::default();

    {
        let mut tree = BTreeIndex::build(&path, 6, &int_entries(&(0..150).collect::<Vec<_>>()))
            .unwrap();
        tree.delete(&Key::Int(75));
        tree.insert(Entry::new(Key::Int(75), 999));
        tree.save().unwrap();
    }

    let tree = BTreeIndex::open(&path).unwrap();
    assert_eq!(tree.len(), 150);
    assert_eq!(tree.search(&Key::Int(75)), vec![999]);
    tree.check_invariants().unwrap();
    let got = keys(&tree.scan_all(&stop).unwrap());
    assert_eq!(got, (0..150).collect::<Vec<i64>>());
}

#[test]
fn float_keys_order_numerically() {
    let tmp = TempDir::new().unwrap();
    let entries: Vec<Entry> = [80.5f64, 92.0, 80.0, 90.0, 85.25]
        .iter()
        .enumerate()
        .map(|(rid, v)| Entry::new(Key::Float(*v), rid as u64))
        .collect();
    let tree = BTreeIndex::build(tmp.path().join("btree.idx"), 4, &entries).unwrap();
    let stop = StopSignal::default();

    let got: Vec<u64> = tree
        .range(&Key::Float(80.0), &Key::Float(90.0), &stop)
        .unwrap()
        .iter()
        .map(|e| e.rid)
        .collect();
    // 80.0 (rid 2), 80.5 (rid 0), 85.25 (rid 4), 90.0 (rid 3)
    assert_eq!(got, vec![2, 0, 4, 3]);
}
