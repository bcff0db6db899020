//! # R-Tree Index
//!
//! A spatial index over 2-D points.  Leaves store `(MBR, rid)` entries,
//! internal nodes store `(MBR, child)` entries; every internal MBR is the
//! minimal axis-aligned rectangle enclosing its subtree.
//!
//! ## Operations
//!
//! - **Insert** — descend into the subtree whose MBR needs the least
//!   enlargement (tie: smallest area); split full nodes with Guttman's
//!   quadratic pick-seeds; repair MBRs along the path.
//! - **kNN** — best-first traversal with a priority queue keyed by the
//!   minimum distance from the query point to a node's MBR, feeding a
//!   bounded heap of the `k` closest points.  Equal distances break by
//!   insertion order, so results are deterministic.
//! - **Radius** — depth-first descent pruning any subtree whose MBR's
//!   minimum distance exceeds the radius.
//!
//! ## Distance
//!
//! Tables flag their point field as geographic or planar at creation:
//! geographic points measure great-circle (haversine) kilometres,
//! planar points measure euclidean distance.
//!
//! Like the B+ tree, nodes live in an arena and the whole structure is
//! dumped atomically to `rtree.idx`.

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{info, trace};

use crate::encoding::{Decode, Encode};
use crate::fs::atomic_write;
use crate::index::IndexError;
use crate::stop::StopSignal;

const RTREE_MAGIC: [u8; 4] = *b"RTR1";
const RTREE_VERSION: u32 = 1;

/// Max entries per node before a split.
pub const RTREE_DEFAULT_MAX_ENTRIES: usize = 8;

/// Mean earth radius in kilometres, for haversine distances.
const EARTH_RADIUS_KM: f64 = 6371.0;

// ------------------------------------------------------------------------------------------------
// Geometry
// ------------------------------------------------------------------------------------------------

/// Axis-aligned minimum bounding rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mbr {
    /// Lower corner `(x, y)`.
    pub min: (f64, f64),
    /// Upper corner `(x, y)`.
    pub max: (f64, f64),
}

impl Mbr {
    /// Degenerate rectangle covering a single point.
    pub fn point(x: f64, y: f64) -> Self {
        Self { min: (x, y), max: (x, y) }
    }

    fn union(&self, other: &Mbr) -> Mbr {
        Mbr {
            min: (self.min.0.min(other.min.0), self.min.1.min(other.min.1)),
            max: (self.max.0.max(other.max.0), self.max.1.max(other.max.1)),
        }
    }

    fn area(&self) -> f64 {
        (self.max.0 - self.min.0) * (self.max.1 - self.min.1)
    }

    fn enlargement(&self, other: &Mbr) -> f64 {
        self.union(other).area() - self.area()
    }

    /// Closest point of the rectangle to `(x, y)`.
    fn clamp(&self, x: f64, y: f64) -> (f64, f64) {
        (x.clamp(self.min.0, self.max.0), y.clamp(self.min.1, self.max.1))
    }
}

/// Distance metric selected by the table definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Plain planar distance.
    Euclidean,
    /// Great-circle distance in kilometres; points are `(lat, lon)`.
    Haversine,
}

impl Metric {
    /// Distance between two points.
    pub fn distance(&self, a: (f64, f64), b: (f64, f64)) -> f64 {
        match self {
            Metric::Euclidean => ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt(),
            Metric::Haversine => haversine_km(a, b),
        }
    }

    /// Lower bound on the distance from a point to anywhere in `mbr`.
    fn min_distance(&self, point: (f64, f64), mbr: &Mbr) -> f64 {
        let nearest = mbr.clamp(point.0, point.1);
        self.distance(point, nearest)
    }
}

/// Great-circle distance between `(lat, lon)` pairs, in kilometres.
fn haversine_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

// ------------------------------------------------------------------------------------------------
// Nodes
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct LeafEntry {
    mbr: Mbr,
    rid: u64,
    /// Monotonic arrival stamp; the deterministic tie-breaker.
    seq: u64,
}

#[derive(Debug, Clone)]
struct ChildEntry {
    mbr: Mbr,
    child: usize,
}

#[derive(Debug, Clone)]
enum Node {
    Free,
    Leaf(Vec<LeafEntry>),
    Internal(Vec<ChildEntry>),
}

// ------------------------------------------------------------------------------------------------
// RTreeIndex
// ------------------------------------------------------------------------------------------------

/// R-tree over 2-D points, persisted wholesale to `rtree.idx`.
pub struct RTreeIndex {
    path: PathBuf,
    nodes: Vec<Node>,
    free: Vec<usize>,
    root: usize,
    metric: Metric,
    max_entries: usize,
    next_seq: u64,
}

impl RTreeIndex {
    fn min_entries(&self) -> usize {
        (self.max_entries / 2).max(2)
    }

    /// Create an empty tree and load the given points.
    pub fn build(
        path: impl AsRef<Path>,
        metric: Metric,
        max_entries: usize,
        points: &[((f64, f64), u64)],
    ) -> Result<Self, IndexError> {
        let mut tree = Self {
            path: path.as_ref().to_path_buf(),
            nodes: vec![Node::Leaf(Vec::new())],
            free: Vec::new(),
            root: 0,
            metric,
            max_entries: max_entries.max(4),
            next_seq: 0,
        };
        for ((x, y), rid) in points {
            tree.insert((*x, *y), *rid);
        }
        tree.save()?;
        info!(points = points.len(), "rtree built");
        Ok(tree)
    }

    /// Load a persisted tree.
    pub fn open(path: impl AsRef<Path>, metric: Metric) -> Result<Self, IndexError> {
        let path = path.as_ref().to_path_buf();
        let mut bytes = Vec::new();
        File::open(&path)?.read_to_end(&mut bytes)?;

        if bytes.len() < 12 || bytes[..4] != RTREE_MAGIC {
            return Err(IndexError::Corrupt("rtree.idx: bad magic".into()));
        }
        let payload_len =
            u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let payload = &bytes[8..8 + payload_len];
        let stored_crc = u32::from_le_bytes(
            bytes[8 + payload_len..8 + payload_len + 4]
                .try_into()
                .map_err(|_| IndexError::Corrupt("rtree.idx truncated".into()))?,
        );
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            return Err(IndexError::Corrupt("rtree.idx checksum mismatch".into()));
        }

        let mut off = 0usize;
        let (version, n) = u32::decode_from(&payload[off..])?;
        off += n;
        if version != RTREE_VERSION {
            return Err(IndexError::Corrupt(format!("rtree.idx version {version}")));
        }
        let (max_entries, n) = u64::decode_from(&payload[off..])?;
        off += n;
        let (root, n) = u64::decode_from(&payload[off..])?;
        off += n;
        let (next_seq, n) = u64::decode_from(&payload[off..])?;
        off += n;
        let (node_count, n) = u64::decode_from(&payload[off..])?;
        off += n;

        let mut nodes = Vec::with_capacity(node_count as usize);
        let mut free = Vec::new();
        for i in 0..node_count {
            let (tag, n) = u8::decode_from(&payload[off..])?;
            off += n;
            match tag {
                0 => {
                    free.push(i as usize);
                    nodes.push(Node::Free);
                }
                1 => {
                    let (count, n) = u32::decode_from(&payload[off..])?;
                    off += n;
                    let mut entries = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        let (mbr, n) = decode_mbr(&payload[off..])?;
                        off += n;
                        let (rid, n) = u64::decode_from(&payload[off..])?;
                        off += n;
                        let (seq, n) = u64::decode_from(&payload[off..])?;
                        off += n;
                        entries.push(LeafEntry { mbr, rid, seq });
                    }
                    nodes.push(Node::Leaf(entries));
                }
                2 => {
                    let (count, n) = u32::decode_from(&payload[off..])?;
                    off += n;
                    let mut entries = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        let (mbr, n) = decode_mbr(&payload[off..])?;
                        off += n;
                        let (child, n) = u64::decode_from(&payload[off..])?;
                        off += n;
                        entries.push(ChildEntry { mbr, child: child as usize });
                    }
                    nodes.push(Node::Internal(entries));
                }
                other => return Err(IndexError::Corrupt(format!("rtree node tag {other}"))),
            }
        }

        Ok(Self {
            path,
            nodes,
            free,
            root: root as usize,
            metric,
            max_entries: max_entries as usize,
            next_seq,
        })
    }

    /// Atomically dump the arena to `rtree.idx`.
    pub fn save(&self) -> Result<(), IndexError> {
        let mut payload = Vec::new();
        RTREE_VERSION.encode_to(&mut payload)?;
        (self.max_entries as u64).encode_to(&mut payload)?;
        (self.root as u64).encode_to(&mut payload)?;
        self.next_seq.encode_to(&mut payload)?;
        (self.nodes.len() as u64).encode_to(&mut payload)?;
        for node in &self.nodes {
            match node {
                Node::Free => payload.push(0),
                Node::Leaf(entries) => {
                    payload.push(1);
                    (entries.len() as u32).encode_to(&mut payload)?;
                    for entry in entries {
                        encode_mbr(&entry.mbr, &mut payload)?;
                        entry.rid.encode_to(&mut payload)?;
                        entry.seq.encode_to(&mut payload)?;
                    }
                }
                Node::Internal(entries) => {
                    payload.push(2);
                    (entries.len() as u32).encode_to(&mut payload)?;
                    for entry in entries {
                        encode_mbr(&entry.mbr, &mut payload)?;
                        (entry.child as u64).encode_to(&mut payload)?;
                    }
                }
            }
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&payload);
        let crc = hasher.finalize();
        let mut bytes = Vec::with_capacity(12 + payload.len());
        bytes.extend_from_slice(&RTREE_MAGIC);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes.extend_from_slice(&crc.to_le_bytes());

        atomic_write(&self.path, &bytes)?;
        Ok(())
    }

    /// Insert a point.
    pub fn insert(&mut self, point: (f64, f64), rid: u64) {
        let entry = LeafEntry {
            mbr: Mbr::point(point.0, point.1),
            rid,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        trace!(?point, rid, "rtree insert");

        if let Some((split_mbr, split_node)) = self.insert_rec(self.root, entry) {
            let old_root_mbr = self.node_mbr(self.root);
            let old_root = self.root;
            let new_root = self.alloc(Node::Internal(vec![
                ChildEntry { mbr: old_root_mbr, child: old_root },
                ChildEntry { mbr: split_mbr, child: split_node },
            ]));
            self.root = new_root;
        }
    }

    /// The `k` points closest to `query`, as `(rid, distance)` ascending.
    pub fn knn(
        &self,
        query: (f64, f64),
        k: usize,
        stop: &StopSignal,
    ) -> Result<Vec<(u64, f64)>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }

        // Best-first frontier ordered by (min distance, arrival stamp).
        let mut frontier: BinaryHeap<FrontierItem> = BinaryHeap::new();
        frontier.push(FrontierItem {
            dist: self.metric.min_distance(query, &self.node_mbr(self.root)),
            seq: 0,
            kind: FrontierKind::Node(self.root),
        });

        let mut results = Vec::with_capacity(k);
        while let Some(item) = frontier.pop() {
            stop.checkpoint()?;
            match item.kind {
                FrontierKind::Point(rid) => {
                    results.push((rid, item.dist));
                    if results.len() == k {
                        break;
                    }
                }
                FrontierKind::Node(node) => match &self.nodes[node] {
                    Node::Free => unreachable!("free node on frontier"),
                    Node::Leaf(entries) => {
                        for entry in entries {
                            frontier.push(FrontierItem {
                                dist: self.metric.distance(query, entry.mbr.min),
                                seq: entry.seq,
                                kind: FrontierKind::Point(entry.rid),
                            });
                        }
                    }
                    Node::Internal(entries) => {
                        for entry in entries {
                            frontier.push(FrontierItem {
                                dist: self.metric.min_distance(query, &entry.mbr),
                                seq: 0,
                                kind: FrontierKind::Node(entry.child),
                            });
                        }
                    }
                },
            }
        }
        Ok(results)
    }

    /// Every point within `radius` of `query`, as `(rid, distance)`
    /// ascending.
    pub fn radius(
        &self,
        query: (f64, f64),
        radius: f64,
        stop: &StopSignal,
    ) -> Result<Vec<(u64, f64)>, IndexError> {
        let mut hits: Vec<(u64, f64, u64)> = Vec::new();
        self.radius_rec(self.root, query, radius, stop, &mut hits)?;
        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.2.cmp(&b.2)));
        Ok(hits.into_iter().map(|(rid, d, _)| (rid, d)).collect())
    }

    fn radius_rec(
        &self,
        node: usize,
        query: (f64, f64),
        radius: f64,
        stop: &StopSignal,
        hits: &mut Vec<(u64, f64, u64)>,
    ) -> Result<(), IndexError> {
        stop.checkpoint()?;
        match &self.nodes[node] {
            Node::Free => Err(IndexError::Corrupt("reachable free rtree node".into())),
            Node::Leaf(entries) => {
                for entry in entries {
                    let d = self.metric.distance(query, entry.mbr.min);
                    if d <= radius {
                        hits.push((entry.rid, d, entry.seq));
                    }
                }
                Ok(())
            }
            Node::Internal(entries) => {
                for entry in entries {
                    if self.metric.min_distance(query, &entry.mbr) <= radius {
                        self.radius_rec(entry.child, query, radius, stop, hits)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Remove every stored point equal to `point`.  Returns removed rids.
    ///
    /// MBRs along affected paths are tightened; emptied subtrees are kept
    /// in place (their rectangles no longer attract traversal).
    pub fn delete(&mut self, point: (f64, f64)) -> Vec<u64> {
        let mut removed = Vec::new();
        self.delete_rec(self.root, point, &mut removed);
        removed
    }

    fn delete_rec(&mut self, node: usize, point: (f64, f64), removed: &mut Vec<u64>) -> bool {
        match self.nodes[node].clone() {
            Node::Free => false,
            Node::Leaf(entries) => {
                let before = entries.len();
                let kept: Vec<LeafEntry> = entries
                    .into_iter()
                    .filter(|e| {
                        let hit = e.mbr.min == point;
                        if hit {
                            removed.push(e.rid);
                        }
                        !hit
                    })
                    .collect();
                let changed = kept.len() != before;
                self.nodes[node] = Node::Leaf(kept);
                changed
            }
            Node::Internal(mut entries) => {
                let mut changed = false;
                for entry in entries.iter_mut() {
                    let covers = entry.mbr.min.0 <= point.0
                        && point.0 <= entry.mbr.max.0
                        && entry.mbr.min.1 <= point.1
                        && point.1 <= entry.mbr.max.1;
                    if covers && self.delete_rec(entry.child, point, removed) {
                        entry.mbr = self.node_mbr(entry.child);
                        changed = true;
                    }
                }
                self.nodes[node] = Node::Internal(entries);
                changed
            }
        }
    }

    /// Verify that every internal MBR equals the union of its children's.
    pub fn check_mbrs(&self) -> Result<(), IndexError> {
        self.check_node(self.root)?;
        Ok(())
    }

    fn check_node(&self, node: usize) -> Result<Mbr, IndexError> {
        match &self.nodes[node] {
            Node::Free => Err(IndexError::Corrupt("reachable free rtree node".into())),
            Node::Leaf(entries) => Ok(entries
                .iter()
                .map(|e| e.mbr)
                .reduce(|a, b| a.union(&b))
                .unwrap_or(Mbr::point(0.0, 0.0))),
            Node::Internal(entries) => {
                let mut total: Option<Mbr> = None;
                for entry in entries {
                    let child_mbr = self.check_node(entry.child)?;
                    if entry.mbr != child_mbr {
                        return Err(IndexError::Corrupt(format!(
                            "node {node}: stored MBR differs from child union"
                        )));
                    }
                    total = Some(match total {
                        Some(t) => t.union(&child_mbr),
                        None => child_mbr,
                    });
                }
                total.ok_or_else(|| IndexError::Corrupt("empty internal node".into()))
            }
        }
    }

    // --------------------------------------------------------------------------------------------
    // Insert internals
    // --------------------------------------------------------------------------------------------

    fn node_mbr(&self, node: usize) -> Mbr {
        match &self.nodes[node] {
            Node::Free => Mbr::point(0.0, 0.0),
            Node::Leaf(entries) => entries
                .iter()
                .map(|e| e.mbr)
                .reduce(|a, b| a.union(&b))
                .unwrap_or(Mbr::point(0.0, 0.0)),
            Node::Internal(entries) => entries
                .iter()
                .map(|e| e.mbr)
                .reduce(|a, b| a.union(&b))
                .unwrap_or(Mbr::point(0.0, 0.0)),
        }
    }

    fn alloc(&mut self, node: Node) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    /// Recursive insert; returns the `(mbr, node)` of a new sibling when
    /// the subtree split.
    fn insert_rec(&mut self, node: usize, entry: LeafEntry) -> Option<(Mbr, usize)> {
        match self.nodes[node].clone() {
            Node::Free => unreachable!("insert into free node"),
            Node::Leaf(mut entries) => {
                entries.push(entry);
                if entries.len() <= self.max_entries {
                    self.nodes[node] = Node::Leaf(entries);
                    return None;
                }
                let (left, right) = self.quadratic_split_leaf(entries);
                self.nodes[node] = Node::Leaf(left);
                let right_mbr = right
                    .iter()
                    .map(|e| e.mbr)
                    .reduce(|a, b| a.union(&b))
                    .unwrap_or(Mbr::point(0.0, 0.0));
                let sibling = self.alloc(Node::Leaf(right));
                Some((right_mbr, sibling))
            }
            Node::Internal(mut entries) => {
                // Least-enlargement descent; ties prefer the smaller area.
                let target = Self::choose_subtree(&entries, &entry.mbr);
                let split = self.insert_rec(entries[target].child, entry);
                entries[target].mbr = self.node_mbr(entries[target].child);

                if let Some((mbr, child)) = split {
                    entries.push(ChildEntry { mbr, child });
                    if entries.len() > self.max_entries {
                        let (left, right) = self.quadratic_split_internal(entries);
                        self.nodes[node] = Node::Internal(left);
                        let right_mbr = right
                            .iter()
                            .map(|e| e.mbr)
                            .reduce(|a, b| a.union(&b))
                            .unwrap_or(Mbr::point(0.0, 0.0));
                        let sibling = self.alloc(Node::Internal(right));
                        return Some((right_mbr, sibling));
                    }
                }
                self.nodes[node] = Node::Internal(entries);
                None
            }
        }
    }

    fn choose_subtree(entries: &[ChildEntry], mbr: &Mbr) -> usize {
        let mut best = 0;
        let mut best_enlargement = f64::INFINITY;
        let mut best_area = f64::INFINITY;
        for (i, entry) in entries.iter().enumerate() {
            let enlargement = entry.mbr.enlargement(mbr);
            let area = entry.mbr.area();
            if enlargement < best_enlargement
                || (enlargement == best_enlargement && area < best_area)
            {
                best = i;
                best_enlargement = enlargement;
                best_area = area;
            }
        }
        best
    }

    fn quadratic_split_leaf(
        &self,
        entries: Vec<LeafEntry>,
    ) -> (Vec<LeafEntry>, Vec<LeafEntry>) {
        let mbrs: Vec<Mbr> = entries.iter().map(|e| e.mbr).collect();
        let (assign_left, assign_right) = quadratic_partition(&mbrs, self.min_entries());
        split_by(entries, &assign_left, &assign_right)
    }

    fn quadratic_split_internal(
        &self,
        entries: Vec<ChildEntry>,
    ) -> (Vec<ChildEntry>, Vec<ChildEntry>) {
        let mbrs: Vec<Mbr> = entries.iter().map(|e| e.mbr).collect();
        let (assign_left, assign_right) = quadratic_partition(&mbrs, self.min_entries());
        split_by(entries, &assign_left, &assign_right)
    }
}

fn split_by<T: Clone>(items: Vec<T>, left: &[usize], right: &[usize]) -> (Vec<T>, Vec<T>) {
    let l = left.iter().map(|i| items[*i].clone()).collect();
    let r = right.iter().map(|i| items[*i].clone()).collect();
    (l, r)
}

/// Guttman's quadratic split: seed with the pair wasting the most area,
/// then assign each remaining rectangle to the group whose MBR it
/// enlarges least, forcing assignment once a group must absorb the rest
/// to reach the minimum fill.
fn quadratic_partition(mbrs: &[Mbr], min_fill: usize) -> (Vec<usize>, Vec<usize>) {
    let n = mbrs.len();

    // Pick seeds: the pair with the greatest dead area when joined.
    let (mut seed_a, mut seed_b, mut worst) = (0, 1, f64::NEG_INFINITY);
    for i in 0..n {
        for j in i + 1..n {
            let waste = mbrs[i].union(&mbrs[j]).area() - mbrs[i].area() - mbrs[j].area();
            if waste > worst {
                worst = waste;
                seed_a = i;
                seed_b = j;
            }
        }
    }

    let mut left = vec![seed_a];
    let mut right = vec![seed_b];
    let mut left_mbr = mbrs[seed_a];
    let mut right_mbr = mbrs[seed_b];

    let pending: Vec<usize> = (0..n).filter(|i| *i != seed_a && *i != seed_b).collect();
    for (done, &i) in pending.iter().enumerate() {
        let remaining = pending.len() - done;

        // Forced assignment: one group needs every remaining rectangle to
        // reach the minimum fill.
        if left.len() + remaining <= min_fill {
            left.push(i);
            left_mbr = left_mbr.union(&mbrs[i]);
            continue;
        }
        if right.len() + remaining <= min_fill {
            right.push(i);
            right_mbr = right_mbr.union(&mbrs[i]);
            continue;
        }

        let le = left_mbr.enlargement(&mbrs[i]);
        let re = right_mbr.enlargement(&mbrs[i]);
        if le < re || (le == re && left.len() <= right.len()) {
            left.push(i);
            left_mbr = left_mbr.union(&mbrs[i]);
        } else {
            right.push(i);
            right_mbr = right_mbr.union(&mbrs[i]);
        }
    }

    (left, right)
}

// ------------------------------------------------------------------------------------------------
// kNN frontier ordering
// ------------------------------------------------------------------------------------------------

enum FrontierKind {
    Node(usize),
    Point(u64),
}

struct FrontierItem {
    dist: f64,
    seq: u64,
    kind: FrontierKind,
}

impl PartialEq for FrontierItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for FrontierItem {}

impl PartialOrd for FrontierItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the smallest distance pops
        // first, with the arrival stamp as the deterministic tie-breaker.
        other
            .dist
            .total_cmp(&self.dist)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// ------------------------------------------------------------------------------------------------
// MBR codec
// ------------------------------------------------------------------------------------------------

fn encode_mbr(mbr: &Mbr, buf: &mut Vec<u8>) -> Result<(), crate::encoding::EncodingError> {
    mbr.min.0.encode_to(buf)?;
    mbr.min.1.encode_to(buf)?;
    mbr.max.0.encode_to(buf)?;
    mbr.max.1.encode_to(buf)?;
    Ok(())
}

fn decode_mbr(buf: &[u8]) -> Result<(Mbr, usize), crate::encoding::EncodingError> {
    let (min_x, mut off) = f64::decode_from(buf)?;
    let (min_y, n) = f64::decode_from(&buf[off..])?;
    off += n;
    let (max_x, n) = f64::decode_from(&buf[off..])?;
    off += n;
    let (max_y, n) = f64::decode_from(&buf[off..])?;
    off += n;
    Ok((Mbr { min: (min_x, min_y), max: (max_x, max_y) }, off))
}
