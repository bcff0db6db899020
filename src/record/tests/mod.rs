//! Record store tests — append/read/tombstone/scan and reopen behavior.

use tempfile::TempDir;

use crate::record::{RecordStore, RecordStoreError};

fn sample_store(tmp: &TempDir) -> RecordStore {
    RecordStore::create(tmp.path().join("records.dat"), &[8, 16]).unwrap()
}

#[test]
fn append_then_read_round_trips() {
    let tmp = TempDir::new().unwrap();
    let mut store = sample_store(&tmp);

    let rid = store
        .append(&["42".to_string(), "hello world".to_string()])
        .unwrap();
    assert_eq!(rid, 0);

    let fields = store.read(rid).unwrap().unwrap();
    assert_eq!(fields, vec!["42".to_string(), "hello world".to_string()]);
}

#[test]
fn rids_are_sequential() {
    let tmp = TempDir::new().unwrap();
    let mut store = sample_store(&tmp);

    for i in 0..10u64 {
        let rid = store
            .append(&[format!("{i}"), format!("value-{i}")])
            .unwrap();
        assert_eq!(rid, i);
    }
    assert_eq!(store.slot_count(), 10);
}

#[test]
fn tombstone_hides_record_from_read_and_scan() {
    let tmp = TempDir::new().unwrap();
    let mut store = sample_store(&tmp);

    let a = store.append(&["1".into(), "one".into()]).unwrap();
    let b = store.append(&["2".into(), "two".into()]).unwrap();
    let c = store.append(&["3".into(), "three".into()]).unwrap();

    store.tombstone(b).unwrap();

    assert!(store.read(a).unwrap().is_some());
    assert!(store.read(b).unwrap().is_none());
    assert!(store.read(c).unwrap().is_some());

    let rids: Vec<u64> = store.scan().map(|r| r.unwrap().0).collect();
    assert_eq!(rids, vec![a, c]);
}

#[test]
fn tombstone_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let mut store = sample_store(&tmp);

    let rid = store.append(&["1".into(), "one".into()]).unwrap();
    store.tombstone(rid).unwrap();
    store.tombstone(rid).unwrap();
    assert!(store.read(rid).unwrap().is_none());
}

#[test]
fn out_of_range_rid_is_an_error_not_a_panic() {
    let tmp = TempDir::new().unwrap();
    let store = sample_store(&tmp);

    let err = store.read(99).unwrap_err();
    assert!(matches!(err, RecordStoreError::OutOfRange { rid: 99, .. }));
}

#[test]
fn oversized_field_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut store = sample_store(&tmp);

    let err = store
        .append(&["way-too-long-for-eight".into(), "ok".into()])
        .unwrap_err();
    assert!(matches!(err, RecordStoreError::FieldTooWide { index: 0, .. }));
}

#[test]
fn field_count_mismatch_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let mut store = sample_store(&tmp);

    let err = store.append(&["only-one".into()]).unwrap_err();
    assert!(matches!(
        err,
        RecordStoreError::FieldCountMismatch { expected: 2, actual: 1 }
    ));
}

#[test]
fn reopen_preserves_records_and_widths() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("records.dat");

    {
        let mut store = RecordStore::create(&path, &[8, 16]).unwrap();
        store.append(&["1".into(), "one".into()]).unwrap();
        store.append(&["2".into(), "two".into()]).unwrap();
        store.tombstone(0).unwrap();
        store.sync().unwrap();
    }

    let store = RecordStore::open(&path).unwrap();
    assert_eq!(store.widths(), &[8, 16]);
    assert_eq!(store.slot_count(), 2);
    assert!(store.read(0).unwrap().is_none());
    assert_eq!(
        store.read(1).unwrap().unwrap(),
        vec!["2".to_string(), "two".to_string()]
    );
}

#[test]
fn open_rejects_foreign_file() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("records.dat");
    std::fs::write(&path, b"not a record store at all").unwrap();

    let err = RecordStore::open(&path).unwrap_err();
    assert!(matches!(err, RecordStoreError::InvalidFile(_)));
}

#[test]
fn empty_fields_round_trip() {
    let tmp = TempDir::new().unwrap();
    let mut store = sample_store(&tmp);

    let rid = store.append(&[String::new(), String::new()]).unwrap();
    let fields = store.read(rid).unwrap().unwrap();
    assert_eq!(fields, vec![String::new(), String::new()]);
}
