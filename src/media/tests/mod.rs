//! Media index tests — both kNN paths, codebook modes, identity checks.

use std::fs;

use tempfile::TempDir;

use crate::media::extractor::{ByteHistogramExtractor, ByteWindowExtractor, FeatureExtractor};
use crate::media::{KnnMethod, MediaIndex, MediaIndexError};
use crate::stop::StopSignal;

/// Write asset files with controlled byte content.
fn write_assets(tmp: &TempDir, contents: &[&[u8]]) -> Vec<(u64, String)> {
    contents
        .iter()
        .enumerate()
        .map(|(i, bytes)| {
            let path = tmp.path().join(format!("asset-{i}.bin"));
            fs::write(&path, bytes).unwrap();
            (i as u64, path.to_string_lossy().into_owned())
        })
        .collect()
}

#[test]
fn global_mode_ranks_by_cosine() {
    let tmp = TempDir::new().unwrap();
    // Asset 0: all zeros; asset 1: all 0xFF; asset 2: half and half.
    let assets = write_assets(
        &tmp,
        &[&[0u8; 64], &[0xFFu8; 64], &[&[0u8; 32][..], &[0xFFu8; 32][..]].concat()],
    );
    let stop = StopSignal::default();
    let index = MediaIndex::build(
        tmp.path().join("mm"),
        &ByteHistogramExtractor,
        &assets,
        8,
        42,
        &stop,
    )
    .unwrap();

    // Query with a copy of asset 0's content.
    let query_path = tmp.path().join("query.bin");
    fs::write(&query_path, [0u8; 64]).unwrap();

    let hits = index
        .query(
            &ByteHistogramExtractor,
            query_path.to_str().unwrap(),
            3,
            KnnMethod::Sequential,
            &stop,
        )
        .unwrap();

    assert_eq!(hits[0].0, 0);
    assert!((hits[0].1 - 1.0).abs() < 1e-6);
    // Asset 2 shares the zero byte; asset 1 shares nothing.
    assert_eq!(hits[1].0, 2);
    assert_eq!(hits[2].0, 1);
    assert!(hits[2].1.abs() < 1e-6);
}

#[test]
fn inverted_equals_sequential() {
    let tmp = TempDir::new().unwrap();
    let assets = write_assets(
        &tmp,
        &[
            &[1, 1, 1, 1, 2, 2, 2, 2],
            &[200, 200, 201, 201, 202, 202, 203, 203],
            &[1, 1, 2, 2, 200, 200, 201, 201],
            &[50, 51, 52, 53, 54, 55, 56, 57],
        ],
    );
    let stop = StopSignal::default();
    let index = MediaIndex::build(
        tmp.path().join("mm"),
        &ByteHistogramExtractor,
        &assets,
        8,
        42,
        &stop,
    )
    .unwrap();

    let query_path = tmp.path().join("query.bin");
    fs::write(&query_path, [1u8, 1, 1, 1, 2, 2, 2, 2]).unwrap();
    let q = query_path.to_str().unwrap();

    let sequential = index
        .query(&ByteHistogramExtractor, q, 4, KnnMethod::Sequential, &stop)
        .unwrap();
    let inverted = index
        .query(&ByteHistogramExtractor, q, 4, KnnMethod::Inverted, &stop)
        .unwrap();

    let seq_ids: Vec<u64> = sequential.iter().map(|h| h.0).collect();
    let inv_ids: Vec<u64> = inverted.iter().map(|h| h.0).collect();
    assert_eq!(seq_ids, inv_ids);
    for (s, i) in sequential.iter().zip(&inverted) {
        assert!((s.1 - i.1).abs() < 1e-9);
    }
}

#[test]
fn bag_of_words_mode_trains_and_retrieves() {
    let tmp = TempDir::new().unwrap();
    // Two content families: low bytes and high bytes.
    let low: Vec<u8> = (0..128).map(|i| (i % 8) as u8).collect();
    let high: Vec<u8> = (0..128).map(|i| 240 + (i % 8) as u8).collect();
    let mixed: Vec<u8> = low.iter().chain(high.iter()).copied().collect();
    let assets = write_assets(&tmp, &[&low, &high, &mixed]);
    let stop = StopSignal::default();

    let index = MediaIndex::build(
        tmp.path().join("mm"),
        &ByteWindowExtractor,
        &assets,
        4,
        7,
        &stop,
    )
    .unwrap();

    let query_path = tmp.path().join("query.bin");
    fs::write(&query_path, &low).unwrap();

    for method in [KnnMethod::Sequential, KnnMethod::Inverted] {
        let hits = index
            .query(&ByteWindowExtractor, query_path.to_str().unwrap(), 3, method, &stop)
            .unwrap();
        assert_eq!(hits[0].0, 0, "query identical to asset 0");
        assert!(hits[0].1 >= hits[1].1 && hits[1].1 >= hits[2].1);
    }
}

#[test]
fn bow_mode_inverted_equals_sequential() {
    let tmp = TempDir::new().unwrap();
    // Distinct byte families drive the codebook toward separated words,
    // leaving some assets without any word shared with the query — the
    // inverted path must score candidates through the idf weights and
    // pad non-candidates at zero, landing on the exhaustive ranking.
    let low: Vec<u8> = (0..128).map(|i| (i % 8) as u8).collect();
    let mid: Vec<u8> = (0..128).map(|i| 120 + (i % 8) as u8).collect();
    let high: Vec<u8> = (0..128).map(|i| 240 + (i % 8) as u8).collect();
    let mixed: Vec<u8> = low.iter().chain(mid.iter()).copied().collect();
    let assets = write_assets(&tmp, &[&low, &mid, &high, &mixed]);
    let stop = StopSignal::default();

    let index = MediaIndex::build(
        tmp.path().join("mm"),
        &ByteWindowExtractor,
        &assets,
        3,
        11,
        &stop,
    )
    .unwrap();

    let query_path = tmp.path().join("query.bin");
    fs::write(&query_path, &low).unwrap();
    let q = query_path.to_str().unwrap();

    let sequential = index
        .query(&ByteWindowExtractor, q, 4, KnnMethod::Sequential, &stop)
        .unwrap();
    let inverted = index
        .query(&ByteWindowExtractor, q, 4, KnnMethod::Inverted, &stop)
        .unwrap();

    assert_eq!(sequential.len(), 4);
    let seq_ids: Vec<u64> = sequential.iter().map(|h| h.0).collect();
    let inv_ids: Vec<u64> = inverted.iter().map(|h| h.0).collect();
    assert_eq!(seq_ids, inv_ids);
    for (s, i) in sequential.iter().zip(&inverted) {
        assert!((s.1 - i.1).abs() < 1e-9, "scores diverge: {s:?} vs {i:?}");
    }

    // The identical asset wins outright (ties break to the lower id),
    // and scores descend.
    assert_eq!(seq_ids[0], 0);
    assert!(sequential.windows(2).all(|w| w[0].1 >= w[1].1));
}

#[test]
fn extractor_identity_is_enforced() {
    let tmp = TempDir::new().unwrap();
    let assets = write_assets(&tmp, &[&[1, 2, 3, 4]]);
    let stop = StopSignal::default();
    let index = MediaIndex::build(
        tmp.path().join("mm"),
        &ByteHistogramExtractor,
        &assets,
        8,
        42,
        &stop,
    )
    .unwrap();

    let err = index
        .query(&ByteWindowExtractor, "whatever.bin", 1, KnnMethod::Sequential, &stop)
        .unwrap_err();
    assert!(matches!(err, MediaIndexError::ExtractorMismatch { .. }));
}

#[test]
fn insert_and_remove_do_not_touch_the_codebook() {
    let tmp = TempDir::new().unwrap();
    let low: Vec<u8> = (0..64).map(|i| (i % 4) as u8).collect();
    let high: Vec<u8> = (0..64).map(|i| 250 - (i % 4) as u8).collect();
    let assets = write_assets(&tmp, &[&low, &high]);
    let stop = StopSignal::default();

    let mut index = MediaIndex::build(
        tmp.path().join("mm"),
        &ByteWindowExtractor,
        &assets,
        4,
        7,
        &stop,
    )
    .unwrap();
    let codebook_before = fs::read(tmp.path().join("mm").join("codebook")).unwrap();

    let extra = tmp.path().join("asset-extra.bin");
    fs::write(&extra, &low).unwrap();
    index
        .insert_asset(99, &ByteWindowExtractor, extra.to_str().unwrap())
        .unwrap();
    assert_eq!(index.len(), 3);

    assert!(index.remove_asset(1).unwrap());
    assert!(!index.remove_asset(1).unwrap());
    assert_eq!(index.len(), 2);

    let codebook_after = fs::read(tmp.path().join("mm").join("codebook")).unwrap();
    assert_eq!(codebook_before, codebook_after);

    // The fresh asset is retrievable.
    let hits = index
        .query(
            &ByteWindowExtractor,
            extra.to_str().unwrap(),
            2,
            KnnMethod::Inverted,
            &stop,
        )
        .unwrap();
    assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<u64>>()[..2], [0, 99][..]);
}

#[test]
fn reopen_preserves_index() {
    let tmp = TempDir::new().unwrap();
    let assets = write_assets(&tmp, &[&[1u8; 32], &[2u8; 32]]);
    let stop = StopSignal::default();
    {
        MediaIndex::build(
            tmp.path().join("mm"),
            &ByteHistogramExtractor,
            &assets,
            8,
            42,
            &stop,
        )
        .unwrap();
    }

    let index = MediaIndex::open(tmp.path().join("mm")).unwrap();
    assert_eq!(index.len(), 2);
    assert_eq!(index.extractor_id(), ByteHistogramExtractor.id());

    let query_path = tmp.path().join("query.bin");
    fs::write(&query_path, [1u8; 32]).unwrap();
    let hits = index
        .query(
            &ByteHistogramExtractor,
            query_path.to_str().unwrap(),
            2,
            KnnMethod::Sequential,
            &stop,
        )
        .unwrap();
    assert_eq!(hits[0].0, 0);
}

#[test]
fn zero_similarity_padding_orders_by_asset_id() {
    let tmp = TempDir::new().unwrap();
    // Three disjoint byte alphabets: querying one finds the others at 0.
    let assets = write_assets(&tmp, &[&[10u8; 16], &[20u8; 16], &[30u8; 16]]);
    let stop = StopSignal::default();
    let index = MediaIndex::build(
        tmp.path().join("mm"),
        &ByteHistogramExtractor,
        &assets,
        8,
        42,
        &stop,
    )
    .unwrap();

    let query_path = tmp.path().join("query.bin");
    fs::write(&query_path, [20u8; 16]).unwrap();

    let hits = index
        .query(
            &ByteHistogramExtractor,
            query_path.to_str().unwrap(),
            3,
            KnnMethod::Inverted,
            &stop,
        )
        .unwrap();
    let ids: Vec<u64> = hits.iter().map(|h| h.0).collect();
    assert_eq!(ids, vec![1, 0, 2]);
}
