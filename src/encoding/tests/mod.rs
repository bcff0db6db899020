//! Round-trip and failure-mode tests for the wire format.

use crate::encoding::{
    Decode, Encode, EncodingError, MAX_BYTE_LEN, decode_from_slice, decode_vec, encode_to_vec,
    encode_vec,
};

#[test]
fn u32_round_trip() {
    for v in [0u32, 1, 0xFF, 0xFFFF, u32::MAX] {
        let bytes = encode_to_vec(&v).unwrap();
        assert_eq!(bytes.len(), 4);
        let (back, n) = decode_from_slice::<u32>(&bytes).unwrap();
        assert_eq!(back, v);
        assert_eq!(n, 4);
    }
}

#[test]
fn u64_and_i64_round_trip() {
    let bytes = encode_to_vec(&u64::MAX).unwrap();
    assert_eq!(decode_from_slice::<u64>(&bytes).unwrap().0, u64::MAX);

    let bytes = encode_to_vec(&(-12345i64)).unwrap();
    assert_eq!(decode_from_slice::<i64>(&bytes).unwrap().0, -12345);
}

#[test]
fn float_round_trip_is_bit_exact() {
    for v in [0.0f64, -0.0, 1.5, f64::MIN_POSITIVE, f64::INFINITY] {
        let bytes = encode_to_vec(&v).unwrap();
        let (back, _) = decode_from_slice::<f64>(&bytes).unwrap();
        assert_eq!(back.to_bits(), v.to_bits());
    }

    let nan = f32::NAN;
    let bytes = encode_to_vec(&nan).unwrap();
    let (back, _) = decode_from_slice::<f32>(&bytes).unwrap();
    assert_eq!(back.to_bits(), nan.to_bits());
}

#[test]
fn string_round_trip() {
    let s = "añomalía — texto".to_string();
    let bytes = encode_to_vec(&s).unwrap();
    let (back, n) = decode_from_slice::<String>(&bytes).unwrap();
    assert_eq!(back, s);
    assert_eq!(n, bytes.len());
}

#[test]
fn f32_vector_round_trip() {
    let v: Vec<f32> = vec![0.25, -1.0, 3.5, 0.0];
    let bytes = encode_to_vec(&v).unwrap();
    let (back, _) = decode_from_slice::<Vec<f32>>(&bytes).unwrap();
    assert_eq!(back, v);
}

#[test]
fn option_round_trip() {
    let some: Option<u64> = Some(42);
    let none: Option<u64> = None;

    let bytes = encode_to_vec(&some).unwrap();
    assert_eq!(decode_from_slice::<Option<u64>>(&bytes).unwrap().0, some);

    let bytes = encode_to_vec(&none).unwrap();
    assert_eq!(decode_from_slice::<Option<u64>>(&bytes).unwrap().0, none);
}

#[test]
fn struct_vec_round_trip() {
    let items: Vec<u64> = (0..100).collect();
    let mut buf = Vec::new();
    encode_vec(&items, &mut buf).unwrap();
    let (back, _) = decode_vec::<u64>(&buf).unwrap();
    assert_eq!(back, items);
}

#[test]
fn truncated_buffer_is_eof() {
    let bytes = encode_to_vec(&u64::MAX).unwrap();
    let err = decode_from_slice::<u64>(&bytes[..5]).unwrap_err();
    assert!(matches!(err, EncodingError::UnexpectedEof { .. }));
}

#[test]
fn oversized_length_is_rejected() {
    // Claim a byte vector far larger than the buffer (and the safety limit).
    let mut bytes = Vec::new();
    (MAX_BYTE_LEN + 1).encode_to(&mut bytes).unwrap();
    let err = decode_from_slice::<Vec<u8>>(&bytes).unwrap_err();
    assert!(matches!(err, EncodingError::LengthOverflow(_)));
}

#[test]
fn invalid_bool_byte_is_rejected() {
    let err = decode_from_slice::<bool>(&[0x07]).unwrap_err();
    assert!(matches!(err, EncodingError::InvalidBool(0x07)));
}

#[test]
fn invalid_option_tag_is_rejected() {
    let err = decode_from_slice::<Option<u32>>(&[0x02]).unwrap_err();
    assert!(matches!(err, EncodingError::InvalidTag { tag: 2, .. }));
}
