//! ISAM tests — descent, overflow chains, bloom short-circuit, reopen.

use tempfile::TempDir;

use crate::index::isam::IsamIndex;
use crate::index::{Entry, FieldType, Key};
use crate::stop::StopSignal;

const KW: u32 = 16;

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
fn point_search_descends_two_levels() {
    let tmp = TempDir::new().unwrap();
    // Block factor 4 forces multiple data pages and leaf groups.
    let values: Vec<i64> = (0..100).map(|i| i * 10).collect();
    let index = IsamIndex::build(tmp.path(), FieldType::Int, KW, 4, &int_entries(&values)).unwrap();

    assert_eq!(index.search(&Key::Int(730)).unwrap(), vec![73]);
    assert_eq!(index.search(&Key::Int(0)).unwrap(), vec![0]);
    assert_eq!(index.search(&Key::Int(990)).unwrap(), vec![99]);
    assert!(index.search(&Key::Int(735)).unwrap().is_empty());
}

#[test]
fn range_walks_pages_sequentially() {
    let tmp = TempDir::new().unwrap();
    let values: Vec<i64> = (0..50).collect();
    let index = IsamIndex::build(tmp.path(), FieldType::Int, KW, 4, &int_entries(&values)).unwrap();
    let stop = StopSignal::default();

    let got = keys(&index.range(&Key::Int(13), &Key::Int(29), &stop).unwrap());
    assert_eq!(got, (13..=29).collect::<Vec<i64>>());
}

#[test]
fn inserts_spill_to_overflow_chain() {
    let tmp = TempDir::new().unwrap();
    let values: Vec<i64> = vec![0, 10, 20, 30];
    let mut index =
        IsamIndex::build(tmp.path(), FieldType::Int, KW, 2, &int_entries(&values)).unwrap();
    let stop = StopSignal::default();

    // Page covering [0, 10) is full; these all chain behind it.
    for (i, v) in [1i64, 2, 3, 4, 5].iter().enumerate() {
        index.insert(Entry::new(Key::Int(*v), 100 + i as u64)).unwrap();
    }

    assert!(index.overflow_pages().unwrap() >= 1);
    assert_eq!(index.search(&Key::Int(3)).unwrap(), vec![102]);

    let got = keys(&index.range(&Key::Int(0), &Key::Int(10), &stop).unwrap());
    assert_eq!(got, vec![0, 1, 2, 3, 4, 5, 10]);
}

#[test]
fn bloom_rejects_absent_keys_without_page_reads() {
    let tmp = TempDir::new().unwrap();
    let values: Vec<i64> = (0..1000).map(|i| i * 2).collect();
    let index = IsamIndex::build(tmp.path(), FieldType::Int, KW, 64, &int_entries(&values)).unwrap();

    // Odd keys were never indexed; the bloom filter answers most of these
    // directly.  Correctness: none may be reported present.
    for v in (1..2000).step_by(2) {
        assert!(index.search(&Key::Int(v)).unwrap().is_empty());
    }
}

#[test]
fn inserted_keys_survive_bloom_after_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let mut index =
            IsamIndex::build(tmp.path(), FieldType::Int, KW, 4, &int_entries(&[0, 10, 20]))
                .unwrap();
        index.insert(Entry::new(Key::Int(15), 77)).unwrap();
    }

    let index = IsamIndex::open(tmp.path(), FieldType::Int, KW).unwrap();
    assert_eq!(index.search(&Key::Int(15)).unwrap(), vec![77]);
}

#[test]
fn delete_tombstones_in_page_and_chain() {
    let tmp = TempDir::new().unwrap();
    let mut index =
        IsamIndex::build(tmp.path(), FieldType::Int, KW, 2, &int_entries(&[0, 10])).unwrap();

    // Duplicate key 5 lands in the page then its chain.
    index.insert(Entry::new(Key::Int(5), 50)).unwrap();
    index.insert(Entry::new(Key::Int(5), 51)).unwrap();
    index.insert(Entry::new(Key::Int(5), 52)).unwrap();

    let mut removed = index.delete(&Key::Int(5)).unwrap();
    removed.sort_unstable();
    assert_eq!(removed, vec![50, 51, 52]);
    assert!(index.search(&Key::Int(5)).unwrap().is_empty());

    // Idempotent.
    assert!(index.delete(&Key::Int(5)).unwrap().is_empty());
}

#[test]
fn scan_all_is_non_decreasing_with_duplicates() {
    let tmp = TempDir::new().unwrap();
    let mut index =
        IsamIndex::build(tmp.path(), FieldType::Int, KW, 4, &int_entries(&[10, 20, 30, 40]))
            .unwrap();
    let stop = StopSignal::default();

    index.insert(Entry::new(Key::Int(20), 90)).unwrap();
    index.insert(Entry::new(Key::Int(25), 91)).unwrap();

    let got = keys(&index.scan_all(&stop).unwrap());
    let mut sorted = got.clone();
    sorted.sort_unstable();
    assert_eq!(got, sorted);
    assert_eq!(got, vec![10, 20, 20, 25, 30, 40]);
}

#[test]
fn keys_below_first_page_route_to_page_zero() {
    let tmp = TempDir::new().unwrap();
    let mut index =
        IsamIndex::build(tmp.path(), FieldType::Int, KW, 4, &int_entries(&[100, 200])).unwrap();
    let stop = StopSignal::default();

    index.insert(Entry::new(Key::Int(-5), 9)).unwrap();
    assert_eq!(index.search(&Key::Int(-5)).unwrap(), vec![9]);
    let got = keys(&index.range(&Key::Int(-10), &Key::Int(150), &stop).unwrap());
    assert_eq!(got, vec![-5, 100]);
}
