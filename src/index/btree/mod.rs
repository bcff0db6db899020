//! # B+ Tree Index
//!
//! A balanced order-`m` B+ tree over `(key, rid)` entries.  Internal nodes
//! hold separator keys and child pointers; leaves hold the entries plus a
//! right-sibling pointer, forming a singly-linked chain that drives range
//! iteration.
//!
//! ## Representation
//!
//! Nodes live in an **arena** (`Vec<Node>` keyed by index) rather than an
//! ambient pointer graph, which keeps split/merge bookkeeping and
//! serialization straightforward.  Freed node slots are recycled through a
//! free list.
//!
//! ## Balancing
//!
//! - Insert into the target leaf; on overflow split at `⌈m/2⌉` and promote
//!   the first key of the new right leaf; splits propagate upward and a
//!   root split grows the tree by one level.
//! - Delete from the target leaf; on underflow (fewer than `⌈m/2⌉ − 1`
//!   entries) borrow from a sibling or merge with it; merges propagate and
//!   a root with a single child collapses.
//!
//! Duplicate keys are supported.  Equal keys are stored in insertion order
//! and the leaf chain lets range scans emit every duplicate.
//!
//! ## Persistence
//!
//! The whole arena is dumped to `btree.idx` through the [`crate::encoding`]
//! wire format, framed with magic/version/CRC32 and written atomically.
//! The engine persists after each mutating statement; a crash in between
//! re-serves the previous durable tree.

#[cfg(test)]
mod tests;

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{info, trace};

use crate::encoding::{self, Decode, Encode};
use crate::fs::atomic_write;
use crate::index::{Entry, IndexError, Key};
use crate::stop::StopSignal;

const BTREE_MAGIC: [u8; 4] = *b"BPT1";
const BTREE_VERSION: u32 = 1;

/// Default tree order (max children per internal node).
pub const BTREE_DEFAULT_ORDER: usize = 32;

const NIL: i64 = -1;

// ------------------------------------------------------------------------------------------------
// Nodes
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Node {
    /// Recycled arena slot.
    Free,
    Internal {
        /// Separator keys; `children.len() == keys.len() + 1`.
        keys: Vec<Key>,
        children: Vec<usize>,
    },
    Leaf {
        entries: Vec<Entry>,
        /// Arena index of the right sibling, `-1` at the end of the chain.
        next: i64,
    },
}

/// Result of a recursive insert: the subtree split and this separator /
/// new-right-sibling pair must be installed in the parent.
struct Split {
    key: Key,
    right: usize,
}

// ------------------------------------------------------------------------------------------------
// BTreeIndex
// ------------------------------------------------------------------------------------------------

/// Order-`m` B+ tree with linked leaves, persisted wholesale to `btree.idx`.
pub struct BTreeIndex {
    path: PathBuf,
    order: usize,
    nodes: Vec<Node>,
    free: Vec<usize>,
    root: usize,
    len: u64,
}

impl BTreeIndex {
    /// Max entries a leaf (or keys an internal node) may hold.
    fn max_keys(&self) -> usize {
        self.order - 1
    }

    /// Minimum entries for any non-root node.
    fn min_keys(&self) -> usize {
        self.order.div_ceil(2) - 1
    }

    /// Create an empty tree and bulk-load the given sorted entries.
    pub fn build(
        path: impl AsRef<Path>,
        order: usize,
        entries: &[Entry],
    ) -> Result<Self, IndexError> {
        let mut tree = Self {
            path: path.as_ref().to_path_buf(),
            order: order.max(4),
            nodes: vec![Node::Leaf { entries: Vec::new(), next: NIL }],
            free: Vec::new(),
            root: 0,
            len: 0,
        };
        for entry in entries {
            tree.insert(entry.clone());
        }
        tree.save()?;
        info!(entries = entries.len(), order = tree.order, "btree built");
        Ok(tree)
    }

    /// Load a persisted tree from `btree.idx`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IndexError> {
        let path = path.as_ref().to_path_buf();
        let mut bytes = Vec::new();
        File::open(&path)?.read_to_end(&mut bytes)?;

        if bytes.len() < 12 || bytes[..4] != BTREE_MAGIC {
            return Err(IndexError::Corrupt("btree.idx: bad magic".into()));
        }
        let payload_len =
            u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let payload = &bytes[8..8 + payload_len];
        let stored_crc = u32::from_le_bytes(
            bytes[8 + payload_len..8 + payload_len + 4]
                .try_into()
                .map_err(|_| IndexError::Corrupt("btree.idx truncated".into()))?,
        );
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            return Err(IndexError::Corrupt("btree.idx checksum mismatch".into()));
        }

        let mut off = 0usize;
        let (version, n) = u32::decode_from(&payload[off..])?;
        off += n;
        if version != BTREE_VERSION {
            return Err(IndexError::Corrupt(format!("btree.idx version {version}")));
        }
        let (order, n) = u64::decode_from(&payload[off..])?;
        off += n;
        let (root, n) = u64::decode_from(&payload[off..])?;
        off += n;
        let (len, n) = u64::decode_from(&payload[off..])?;
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
                    let (keys, n) = encoding::decode_vec::<Key>(&payload[off..])?;
                    off += n;
                    let (raw_children, n) = encoding::decode_vec::<u64>(&payload[off..])?;
                    off += n;
                    nodes.push(Node::Internal {
                        keys,
                        children: raw_children.into_iter().map(|c| c as usize).collect(),
                    });
                }
                2 => {
                    let (count, n) = u32::decode_from(&payload[off..])?;
                    off += n;
                    let mut entries = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        let (key, n) = Key::decode_from(&payload[off..])?;
                        off += n;
                        let (rid, n) = u64::decode_from(&payload[off..])?;
                        off += n;
                        entries.push(Entry::new(key, rid));
                    }
                    let (next, n) = i64::decode_from(&payload[off..])?;
                    off += n;
                    nodes.push(Node::Leaf { entries, next });
                }
                other => {
                    return Err(IndexError::Corrupt(format!("btree node tag {other}")));
                }
            }
        }

        Ok(Self {
            path,
            order: order as usize,
            nodes,
            free,
            root: root as usize,
            len,
        })
    }

    /// Atomically dump the arena to `btree.idx`.
    pub fn save(&self) -> Result<(), IndexError> {
        let mut payload = Vec::new();
        BTREE_VERSION.encode_to(&mut payload)?;
        (self.order as u64).encode_to(&mut payload)?;
        (self.root as u64).encode_to(&mut payload)?;
        self.len.encode_to(&mut payload)?;
        (self.nodes.len() as u64).encode_to(&mut payload)?;
        for node in &self.nodes {
            match node {
                Node::Free => payload.push(0),
                Node::Internal { keys, children } => {
                    payload.push(1);
                    encoding::encode_vec(keys, &mut payload)?;
                    let raw: Vec<u64> = children.iter().map(|c| *c as u64).collect();
                    encoding::encode_vec(&raw, &mut payload)?;
                }
                Node::Leaf { entries, next } => {
                    payload.push(2);
                    (entries.len() as u32).encode_to(&mut payload)?;
                    for entry in entries {
                        entry.key.encode_to(&mut payload)?;
                        entry.rid.encode_to(&mut payload)?;
                    }
                    next.encode_to(&mut payload)?;
                }
            }
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&payload);
        let crc = hasher.finalize();
        let mut bytes = Vec::with_capacity(12 + payload.len());
        bytes.extend_from_slice(&BTREE_MAGIC);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes.extend_from_slice(&crc.to_le_bytes());

        atomic_write(&self.path, &bytes)?;
        Ok(())
    }

    /// Number of live entries.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the tree holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// All rids whose key equals `key`.
    pub fn search(&self, key: &Key) -> Vec<u64> {
        let mut rids = Vec::new();
        let mut leaf = self.descend(key);
        loop {
            let Node::Leaf { entries, next } = &self.nodes[leaf] else {
                return rids;
            };
            let mut past_key = false;
            for entry in entries {
                if entry.key == *key {
                    rids.push(entry.rid);
                } else if entry.key > *key {
                    past_key = true;
                    break;
                }
            }
            // Duplicates can spill into the right sibling.
            if past_key || *next < 0 {
                break;
            }
            leaf = *next as usize;
        }
        rids
    }

    /// All entries with key in `[lo, hi]`, in non-decreasing key order.
    pub fn range(
        &self,
        lo: &Key,
        hi: &Key,
        stop: &StopSignal,
    ) -> Result<Vec<Entry>, IndexError> {
        let mut out = Vec::new();
        let mut leaf = self.descend(lo);
        loop {
            stop.checkpoint()?;
            let Node::Leaf { entries, next } = &self.nodes[leaf] else {
                break;
            };
            for entry in entries {
                if entry.key > *hi {
                    return Ok(out);
                }
                if entry.key >= *lo {
                    out.push(entry.clone());
                }
            }
            if *next < 0 {
                break;
            }
            leaf = *next as usize;
        }
        Ok(out)
    }

    /// All entries in key order, walking the leaf chain.
    pub fn scan_all(&self, stop: &StopSignal) -> Result<Vec<Entry>, IndexError> {
        let mut out = Vec::new();
        let mut leaf = self.leftmost_leaf();
        loop {
            stop.checkpoint()?;
            let Node::Leaf { entries, next } = &self.nodes[leaf] else {
                break;
            };
            out.extend(entries.iter().cloned());
            if *next < 0 {
                break;
            }
            leaf = *next as usize;
        }
        Ok(out)
    }

    /// Insert one entry.  Duplicates are appended after their equals.
    pub fn insert(&mut self, entry: Entry) {
        trace!(key = %entry.key, rid = entry.rid, "btree insert");
        if let Some(split) = self.insert_rec(self.root, entry) {
            let new_root = self.alloc(Node::Internal {
                keys: vec![split.key],
                children: vec![self.root, split.right],
            });
            self.root = new_root;
        }
        self.len += 1;
    }

    /// Remove every entry matching `key`, rebalancing as needed.
    /// Returns the removed rids; a missing key is a no-op.
    pub fn delete(&mut self, key: &Key) -> Vec<u64> {
        let mut removed = Vec::new();
        while let Some(rid) = self.delete_one(key) {
            removed.push(rid);
        }
        removed
    }

    /// Verify balance invariants: every non-root node at least half-full,
    /// all leaves at equal depth, keys non-decreasing along the chain.
    pub fn check_invariants(&self) -> Result<(), IndexError> {
        let mut leaf_depths = Vec::new();
        self.check_node(self.root, 0, true, &mut leaf_depths)?;
        if let (Some(min), Some(max)) = (leaf_depths.iter().min(), leaf_depths.iter().max())
            && min != max
        {
            return Err(IndexError::Corrupt(format!(
                "leaves at unequal depths ({min}..{max})"
            )));
        }

        let mut prev: Option<Key> = None;
        let mut leaf = self.leftmost_leaf();
        loop {
            let Node::Leaf { entries, next } = &self.nodes[leaf] else {
                break;
            };
            for entry in entries {
                if let Some(p) = &prev
                    && entry.key < *p
                {
                    return Err(IndexError::Corrupt("leaf chain out of order".into()));
                }
                prev = Some(entry.key.clone());
            }
            if *next < 0 {
                break;
            }
            leaf = *next as usize;
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Descent helpers
    // --------------------------------------------------------------------------------------------

    /// Leaf that may contain the leftmost occurrence of `key`
    /// (left-biased on equality).
    fn descend(&self, key: &Key) -> usize {
        let mut node = self.root;
        loop {
            match &self.nodes[node] {
                Node::Leaf { .. } => return node,
                Node::Internal { keys, children } => {
                    let idx = keys.partition_point(|k| k < key);
                    node = children[idx];
                }
                Node::Free => unreachable!("descend never reaches a freed slot"),
            }
        }
    }

    fn leftmost_leaf(&self) -> usize {
        let mut node = self.root;
        loop {
            match &self.nodes[node] {
                Node::Leaf { .. } => return node,
                Node::Internal { children, .. } => node = children[0],
                Node::Free => unreachable!("leftmost_leaf never reaches a freed slot"),
            }
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

    fn release(&mut self, slot: usize) {
        self.nodes[slot] = Node::Free;
        self.free.push(slot);
    }

    // --------------------------------------------------------------------------------------------
    // Insert
    // --------------------------------------------------------------------------------------------

    fn insert_rec(&mut self, node: usize, entry: Entry) -> Option<Split> {
        match &self.nodes[node] {
            Node::Leaf { .. } => self.insert_into_leaf(node, entry),
            Node::Internal { keys, children } => {
                let idx = keys.partition_point(|k| *k <= entry.key);
                let child = children[idx];
                let split = self.insert_rec(child, entry)?;
                self.install_split(node, idx, split)
            }
            Node::Free => unreachable!("insert_rec never reaches a freed slot"),
        }
    }

    fn insert_into_leaf(&mut self, leaf: usize, entry: Entry) -> Option<Split> {
        let max = self.max_keys();
        let mid = self.order.div_ceil(2);

        let Node::Leaf { entries, next } = &mut self.nodes[leaf] else {
            unreachable!("descend always ends at a leaf");
        };
        // Insert after any equal keys: duplicates stay in arrival order.
        let pos = entries.partition_point(|e| e.key <= entry.key);
        entries.insert(pos, entry);

        if entries.len() <= max {
            return None;
        }

        let right_entries = entries.split_off(mid);
        let old_next = *next;
        let promoted = right_entries[0].key.clone();
        let right = self.alloc(Node::Leaf { entries: right_entries, next: old_next });
        let Node::Leaf { next, .. } = &mut self.nodes[leaf] else {
            unreachable!();
        };
        *next = right as i64;

        Some(Split { key: promoted, right })
    }

    /// Install a child split into an internal node, splitting it in turn
    /// on overflow.
    fn install_split(&mut self, node: usize, child_idx: usize, split: Split) -> Option<Split> {
        let max = self.max_keys();

        let Node::Internal { keys, children } = &mut self.nodes[node] else {
            unreachable!("install_split only runs on internals");
        };
        keys.insert(child_idx, split.key);
        children.insert(child_idx + 1, split.right);

        if keys.len() <= max {
            return None;
        }

        // Middle key moves up; it separates the two halves.
        let mid = keys.len() / 2;
        let promoted = keys[mid].clone();
        let right_keys = keys.split_off(mid + 1);
        keys.pop();
        let right_children = children.split_off(mid + 1);

        let right = self.alloc(Node::Internal { keys: right_keys, children: right_children });
        Some(Split { key: promoted, right })
    }

    // --------------------------------------------------------------------------------------------
    // Delete
    // --------------------------------------------------------------------------------------------

    fn delete_one(&mut self, key: &Key) -> Option<u64> {
        let removed = self.delete_rec(self.root, key);
        if removed.is_some() {
            self.len -= 1;
            // Root collapse: an internal root with one child shrinks the tree.
            while let Node::Internal { keys, children } = &self.nodes[self.root] {
                if !keys.is_empty() {
                    break;
                }
                let only_child = children[0];
                self.release(self.root);
                self.root = only_child;
            }
        }
        removed
    }

    fn delete_rec(&mut self, node: usize, key: &Key) -> Option<u64> {
        match &self.nodes[node] {
            Node::Leaf { .. } => {
                let Node::Leaf { entries, .. } = &mut self.nodes[node] else {
                    unreachable!();
                };
                let pos = entries.iter().position(|e| e.key == *key)?;
                Some(entries.remove(pos).rid)
            }
            Node::Internal { keys, children } => {
                // Left-biased descent, but duplicates may sit at or beyond
                // the separator; try successive children until one holds
                // the key.
                let start = keys.partition_point(|k| k < key);
                let end = keys.partition_point(|k| k <= key);
                let children = children.clone();
                for idx in start..=end {
                    let child = children[idx];
                    if let Some(rid) = self.delete_rec(child, key) {
                        self.rebalance_child(node, idx);
                        return Some(rid);
                    }
                }
                None
            }
            Node::Free => unreachable!("delete_rec never reaches a freed slot"),
        }
    }

    fn node_key_count(&self, node: usize) -> usize {
        match &self.nodes[node] {
            Node::Free => 0,
            Node::Internal { keys, .. } => keys.len(),
            Node::Leaf { entries, .. } => entries.len(),
        }
    }

    /// Restore minimum occupancy of `children[idx]` by borrowing from a
    /// sibling or merging with one.
    fn rebalance_child(&mut self, parent: usize, idx: usize) {
        let min = self.min_keys();
        let Node::Internal { children, .. } = &self.nodes[parent] else {
            unreachable!();
        };
        let child = children[idx];
        if self.node_key_count(child) >= min {
            return;
        }

        let Node::Internal { children, .. } = &self.nodes[parent] else {
            unreachable!();
        };
        let left = idx.checked_sub(1).map(|i| children[i]);
        let right = children.get(idx + 1).copied();

        if let Some(left) = left
            && self.node_key_count(left) > min
        {
            self.borrow_from_left(parent, idx, left, child);
            return;
        }
        if let Some(right) = right
            && self.node_key_count(right) > min
        {
            self.borrow_from_right(parent, idx, child, right);
            return;
        }
        if left.is_some() {
            self.merge_children(parent, idx - 1);
        } else if right.is_some() {
            self.merge_children(parent, idx);
        }
    }

    fn borrow_from_left(&mut self, parent: usize, idx: usize, left: usize, child: usize) {
        match (self.nodes[left].clone(), self.nodes[child].clone()) {
            (
                Node::Leaf { entries: mut le, next: lnext },
                Node::Leaf { entries: mut ce, next: cnext },
            ) => {
                let moved = le.pop().unwrap_or_else(|| unreachable!("left has > min entries"));
                ce.insert(0, moved.clone());
                self.nodes[left] = Node::Leaf { entries: le, next: lnext };
                self.nodes[child] = Node::Leaf { entries: ce, next: cnext };
                self.set_separator(parent, idx - 1, moved.key);
            }
            (
                Node::Internal { keys: mut lk, children: mut lc },
                Node::Internal { keys: mut ck, children: mut cc },
            ) => {
                let sep = self.separator(parent, idx - 1);
                let moved_child = lc.pop().unwrap_or_else(|| unreachable!());
                let new_sep = lk.pop().unwrap_or_else(|| unreachable!());
                ck.insert(0, sep);
                cc.insert(0, moved_child);
                self.nodes[left] = Node::Internal { keys: lk, children: lc };
                self.nodes[child] = Node::Internal { keys: ck, children: cc };
                self.set_separator(parent, idx - 1, new_sep);
            }
            _ => unreachable!("siblings are at the same level"),
        }
    }

    fn borrow_from_right(&mut self, parent: usize, idx: usize, child: usize, right: usize) {
        match (self.nodes[child].clone(), self.nodes[right].clone()) {
            (
                Node::Leaf { entries: mut ce, next: cnext },
                Node::Leaf { entries: mut re, next: rnext },
            ) => {
                let moved = re.remove(0);
                ce.push(moved);
                let new_sep = re[0].key.clone();
                self.nodes[child] = Node::Leaf { entries: ce, next: cnext };
                self.nodes[right] = Node::Leaf { entries: re, next: rnext };
                self.set_separator(parent, idx, new_sep);
            }
            (
                Node::Internal { keys: mut ck, children: mut cc },
                Node::Internal { keys: mut rk, children: mut rc },
            ) => {
                let sep = self.separator(parent, idx);
                let moved_child = rc.remove(0);
                let new_sep = rk.remove(0);
                ck.push(sep);
                cc.push(moved_child);
                self.nodes[child] = Node::Internal { keys: ck, children: cc };
                self.nodes[right] = Node::Internal { keys: rk, children: rc };
                self.set_separator(parent, idx, new_sep);
            }
            _ => unreachable!("siblings are at the same level"),
        }
    }

    /// Merge `children[idx + 1]` into `children[idx]` and drop the
    /// separator between them.
    fn merge_children(&mut self, parent: usize, idx: usize) {
        let Node::Internal { keys, children } = &mut self.nodes[parent] else {
            unreachable!();
        };
        let sep = keys.remove(idx);
        let left = children[idx];
        let right = children.remove(idx + 1);

        match (self.nodes[left].clone(), self.nodes[right].clone()) {
            (
                Node::Leaf { entries: mut le, .. },
                Node::Leaf { entries: re, next: rnext },
            ) => {
                le.extend(re);
                self.nodes[left] = Node::Leaf { entries: le, next: rnext };
            }
            (
                Node::Internal { keys: mut lk, children: mut lc },
                Node::Internal { keys: rk, children: rc },
            ) => {
                lk.push(sep);
                lk.extend(rk);
                lc.extend(rc);
                self.nodes[left] = Node::Internal { keys: lk, children: lc };
            }
            _ => unreachable!("siblings are at the same level"),
        }
        self.release(right);
    }

    fn separator(&self, parent: usize, idx: usize) -> Key {
        let Node::Internal { keys, .. } = &self.nodes[parent] else {
            unreachable!();
        };
        keys[idx].clone()
    }

    fn set_separator(&mut self, parent: usize, idx: usize, key: Key) {
        let Node::Internal { keys, .. } = &mut self.nodes[parent] else {
            unreachable!();
        };
        keys[idx] = key;
    }

    // --------------------------------------------------------------------------------------------
    // Invariant checking
    // --------------------------------------------------------------------------------------------

    fn check_node(
        &self,
        node: usize,
        depth: usize,
        is_root: bool,
        leaf_depths: &mut Vec<usize>,
    ) -> Result<(), IndexError> {
        match &self.nodes[node] {
            Node::Free => Err(IndexError::Corrupt("reachable free node".into())),
            Node::Leaf { entries, .. } => {
                if !is_root && entries.len() < self.min_keys() {
                    return Err(IndexError::Corrupt(format!(
                        "leaf {node} under-full ({} < {})",
                        entries.len(),
                        self.min_keys()
                    )));
                }
                leaf_depths.push(depth);
                Ok(())
            }
            Node::Internal { keys, children } => {
                if children.len() != keys.len() + 1 {
                    return Err(IndexError::Corrupt("internal fan-out mismatch".into()));
                }
                if !is_root && keys.len() < self.min_keys() {
                    return Err(IndexError::Corrupt(format!(
                        "internal {node} under-full ({} < {})",
                        keys.len(),
                        self.min_keys()
                    )));
                }
                for child in children {
                    self.check_node(*child, depth + 1, false, leaf_depths)?;
                }
                Ok(())
            }
        }
    }
}
