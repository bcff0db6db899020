//! Microbenchmarks for the hot index paths.

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use tempfile::TempDir;

use mosaicdb::index::btree::BTreeIndex;
use mosaicdb::index::hash::ExtendibleHashIndex;
use mosaicdb::index::{Entry, FieldType, Key};
use mosaicdb::record::RecordStore;
use mosaicdb::stop::StopSignal;

fn bench_record_store(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let mut store = RecordStore::create(tmp.path().join("records.dat"), &[16, 32]).unwrap();
    for i in 0..10_000u64 {
        store.append(&[format!("k{i}"), format!("value-{i}")]).unwrap();
    }

    c.bench_function("record_store/read", |b| {
        let mut rid = 0u64;
        b.iter(|| {
            rid = (rid + 7919) % 10_000;
            black_box(store.read(rid).unwrap());
        });
    });
}

fn bench_btree(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let entries: Vec<Entry> = (0..50_000).map(|i| Entry::new(Key::Int(i), i as u64)).collect();
    let tree = BTreeIndex::build(tmp.path().join("btree.idx"), 64, &entries).unwrap();
    let stop = StopSignal::default();

    c.bench_function("btree/point", |b| {
        let mut k = 0i64;
        b.iter(|| {
            k = (k + 7919) % 50_000;
            black_box(tree.search(&Key::Int(k)));
        });
    });

    c.bench_function("btree/range_100", |b| {
        let mut k = 0i64;
        b.iter(|| {
            k = (k + 7919) % 49_000;
            black_box(tree.range(&Key::Int(k), &Key::Int(k + 100), &stop).unwrap());
        });
    });
}

fn bench_hash(c: &mut Criterion) {
    let tmp = TempDir::new().unwrap();
    let mut index =
        ExtendibleHashIndex::build(tmp.path(), FieldType::Text, 24, 32, false, &[]).unwrap();
    for i in 0..50_000u64 {
        index.insert(Entry::new(Key::Text(format!("key-{i:06}")), i)).unwrap();
    }

    c.bench_function("hash/point", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = (i + 7919) % 50_000;
            black_box(index.search(&Key::Text(format!("key-{i:06}"))).unwrap());
        });
    });
}

criterion_group!(benches, bench_record_store, bench_btree, bench_hash);
criterion_main!(benches);
