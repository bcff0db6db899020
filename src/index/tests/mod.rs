//! Typed key semantics — parsing, ordering, fixed-width round-trips.

use crate::index::{FieldType, IndexError, Key};

#[test]
fn int_keys_compare_numerically() {
    let a = Key::parse("9", FieldType::Int).unwrap();
    let b = Key::parse("10", FieldType::Int).unwrap();
    assert!(a < b); // lexicographically "9" > "10"
}

#[test]
fn float_keys_compare_numerically() {
    let a = Key::parse("2.5", FieldType::Float).unwrap();
    let b = Key::parse("10.0", FieldType::Float).unwrap();
    assert!(a < b);
}

#[test]
fn text_keys_compare_lexicographically() {
    let a = Key::parse("apple", FieldType::Text).unwrap();
    let b = Key::parse("banana", FieldType::Text).unwrap();
    assert!(a < b);
}

#[test]
fn geo_key_parses_lat_lon_pair() {
    let k = Key::parse("47.60, -122.33", FieldType::Geo2d).unwrap();
    match k {
        Key::Geo(lat, lon) => {
            assert!((lat - 47.60).abs() < 1e-9);
            assert!((lon + 122.33).abs() < 1e-9);
        }
        other => panic!("expected geo key, got {other:?}"),
    }
}

#[test]
fn bad_literals_are_rejected() {
    assert!(matches!(
        Key::parse("abc", FieldType::Int),
        Err(IndexError::BadKey(_))
    ));
    assert!(matches!(
        Key::parse("1.0", FieldType::Int),
        Err(IndexError::BadKey(_))
    ));
    assert!(matches!(
        Key::parse("47.6", FieldType::Geo2d),
        Err(IndexError::BadKey(_))
    ));
}

#[test]
fn fixed_width_round_trip() {
    for (raw, ty) in [
        ("hello", FieldType::Text),
        ("-42", FieldType::Int),
        ("3.25", FieldType::Float),
        ("47.6,-122.33", FieldType::Geo2d),
    ] {
        let key = Key::parse(raw, ty).unwrap();
        let mut buf = Vec::new();
        key.write_fixed(32, &mut buf).unwrap();
        assert_eq!(buf.len(), 32);
        let back = Key::read_fixed(&buf, ty).unwrap();
        assert_eq!(back, key);
    }
}

#[test]
fn fixed_width_rejects_oversized_key() {
    let key = Key::Text("much too long".into());
    let mut buf = Vec::new();
    assert!(matches!(
        key.write_fixed(4, &mut buf),
        Err(IndexError::BadKey(_))
    ));
}

#[test]
fn float_total_order_handles_negatives_and_zero() {
    let keys: Vec<Key> = ["-3.5", "-0.0", "0.0", "1.25"]
        .iter()
        .map(|s| Key::parse(s, FieldType::Float).unwrap())
        .collect();
    let mut sorted = keys.clone();
    sorted.sort();
    assert_eq!(sorted, keys);
}
