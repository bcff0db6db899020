//! R-tree tests — kNN ordering, radius pruning, haversine, MBR invariant.

use tempfile::TempDir;

use crate::index::rtree::{Metric, RTreeIndex};
use crate::stop::StopSignal;

fn grid_points(n: i64) -> Vec<((f64, f64), u64)> {
    let mut points = Vec::new();
    let mut rid = 0u64;
    for x in 0..n {
        for y in 0..n {
            points.push(((x as f64, y as f64), rid));
            rid += 1;
        }
    }
    points
}

#[test]
fn knn_returns_nearest_in_ascending_distance() {
    let tmp = TempDir::new().unwrap();
    let tree = RTreeIndex::build(
        tmp.path().join("rtree.idx"),
        Metric::Euclidean,
        4,
        &grid_points(10),
    )
    .unwrap();
    let stop = StopSignal::default();

    let hits = tree.knn((4.2, 4.2), 3, &stop).unwrap();
    assert_eq!(hits.len(), 3);
    // (4,4) is nearest, then (5,4) and (4,5) at equal distance —
    // insertion order breaks the tie: (4,5) was inserted before (5,4).
    assert_eq!(hits[0].0, 44);
    assert_eq!(hits[1].0, 45);
    assert_eq!(hits[2].0, 54);
    assert!(hits[0].1 <= hits[1].1 && hits[1].1 <= hits[2].1);
}

#[test]
fn knn_is_exhaustive_equivalent() {
    let tmp = TempDir::new().unwrap();
    let points = grid_points(8);
    let tree = RTreeIndex::build(
        tmp.path().join("rtree.idx"),
        Metric::Euclidean,
        4,
        &points,
    )
    .unwrap();
    let stop = StopSignal::default();

    let query = (3.7, 2.1);
    let k = 10;
    let got: Vec<u64> = tree.knn(query, k, &stop).unwrap().iter().map(|h| h.0).collect();

    let mut brute: Vec<(u64, f64)> = points
        .iter()
        .map(|((x, y), rid)| {
            (*rid, ((x - query.0).powi(2) + (y - query.1).powi(2)).sqrt())
        })
        .collect();
    brute.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    let expected: Vec<u64> = brute.iter().take(k).map(|(rid, _)| *rid).collect();

    assert_eq!(got, expected);
}

#[test]
fn radius_search_prunes_but_misses_nothing() {
    let tmp = TempDir::new().unwrap();
    let tree = RTreeIndex::build(
        tmp.path().join("rtree.idx"),
        Metric::Euclidean,
        4,
        &grid_points(10),
    )
    .unwrap();
    let stop = StopSignal::default();

    let hits = tree.radius((5.0, 5.0), 1.5, &stop).unwrap();
    let rids: Vec<u64> = hits.iter().map(|h| h.0).collect();
    // Within 1.5 of (5,5): the center plus its four axis neighbours
    // (distance 1) and four diagonals (distance √2 ≈ 1.414).
    assert_eq!(rids.len(), 9);
    assert_eq!(rids[0], 55);
    assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
}

#[test]
fn haversine_radius_in_kilometres() {
    let tmp = TempDir::new().unwrap();
    // Two nearby Seattle points and one far across the mountains.
    let points = vec![
        ((47.60, -122.33), 0u64),
        ((47.62, -122.30), 1u64),
        ((48.00, -121.00), 2u64),
    ];
    let tree = RTreeIndex::build(
        tmp.path().join("rtree.idx"),
        Metric::Haversine,
        4,
        &points,
    )
    .unwrap();
    let stop = StopSignal::default();

    let hits = tree.radius((47.61, -122.31), 5.0, &stop).unwrap();
    let rids: Vec<u64> = hits.iter().map(|h| h.0).collect();
    assert_eq!(rids, vec![0, 1]);
    assert!(hits[0].1 < hits[1].1 || (hits[0].1 == hits[1].1));
    // The third point is ~100 km away.
    assert!(tree.radius((47.61, -122.31), 150.0, &stop).unwrap().len() == 3);
}

#[test]
fn mbr_invariant_holds_after_inserts() {
    let tmp = TempDir::new().unwrap();
    let tree = RTreeIndex::build(
        tmp.path().join("rtree.idx"),
        Metric::Euclidean,
        4,
        &grid_points(12),
    )
    .unwrap();
    tree.check_mbrs().unwrap();
}

#[test]
fn delete_removes_point_and_tightens_mbrs() {
    let tmp = TempDir::new().unwrap();
    let mut tree = RTreeIndex::build(
        tmp.path().join("rtree.idx"),
        Metric::Euclidean,
        4,
        &grid_points(6),
    )
    .unwrap();
    let stop = StopSignal::default();

    let removed = tree.delete((3.0, 3.0));
    assert_eq!(removed, vec![21]);
    tree.check_mbrs().unwrap();

    let hits = tree.knn((3.0, 3.0), 1, &stop).unwrap();
    assert_ne!(hits[0].0, 21);
    assert!(tree.delete((3.0, 3.0)).is_empty());
}

#[test]
fn save_and_open_round_trip() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("rtree.idx");
    let stop = StopSignal::default();

    {
        let mut tree =
            RTreeIndex::build(&path, Metric::Euclidean, 4, &grid_points(7)).unwrap();
        tree.insert((100.0, 100.0), 999);
        tree.save().unwrap();
    }

    let tree = RTreeIndex::open(&path, Metric::Euclidean).unwrap();
    tree.check_mbrs().unwrap();
    let hits = tree.knn((100.0, 100.0), 1, &stop).unwrap();
    assert_eq!(hits[0].0, 999);
    assert_eq!(hits[0].1, 0.0);
}

#[test]
fn duplicate_points_tie_break_by_insertion_order() {
    let tmp = TempDir::new().unwrap();
    let points = vec![
        ((1.0, 1.0), 10u64),
        ((1.0, 1.0), 11u64),
        ((1.0, 1.0), 12u64),
        ((2.0, 2.0), 13u64),
    ];
    let tree =
        RTreeIndex::build(tmp.path().join("rtree.idx"), Metric::Euclidean, 4, &points).unwrap();
    let stop = StopSignal::default();

    let hits = tree.knn((1.0, 1.0), 3, &stop).unwrap();
    let rids: Vec<u64> = hits.iter().map(|h| h.0).collect();
    assert_eq!(rids, vec![10, 11, 12]);
}
