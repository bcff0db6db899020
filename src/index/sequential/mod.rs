//! # Sequential + Auxiliary Index
//!
//! An ordered *main* file plus a bounded, unordered *auxiliary* area.
//! Searches binary-search the main file and fall back to a linear scan of
//! the auxiliary area for recent inserts; when the auxiliary area crosses
//! its threshold the two are merged and the main file is rewritten.
//!
//! ## On-disk layout
//!
//! ```text
//! main.seq: [MAGIC][PAYLOAD_LEN][key_width, head, generation][CRC32]
//!           [SLOT 0][SLOT 1]…          slot = [marker][key][rid][next]
//! aux.seq:  [MAGIC][PAYLOAD_LEN][key_width, generation][CRC32]
//!           [SLOT 0][SLOT 1]…          slot = [marker][key][rid]
//! ```
//!
//! Main slots are written in ascending key order; each slot carries a
//! singly-linked `next` pointer (slot index, `-1` = end) and the header
//! records the head of the chain.  Binary search ignores the pointers;
//! range walks follow them.
//!
//! ## Merge
//!
//! Inserts append to the auxiliary file.  Once `|aux| ≥ K` (default
//! `max(8, |main| / 10)`), both files are merged: live entries are
//! stable-sorted by key and a fresh main/aux pair is committed through
//! the temp-write → fsync → rename pattern.  Both headers carry a
//! **merge generation**; the new main (generation `g+1`) renames before
//! the aux reset, and an aux file whose generation lags main is
//! recognized on open as the residue of an interrupted merge and
//! discarded — its entries are already in the committed main.  A crash
//! anywhere in the merge therefore never loses an entry and never
//! surfaces one twice.
//!
//! ## Deletion
//!
//! Tombstone in place (marker byte); the next merge drops tombstones.

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use tracing::{info, trace, warn};

use crate::encoding::Encode;
use crate::fs::atomic_write;
use crate::index::{Entry, FieldType, IndexError, Key};
use crate::stop::StopSignal;

const SEQ_MAIN_MAGIC: [u8; 4] = *b"SEQ1";
const SEQ_AUX_MAGIC: [u8; 4] = *b"SQX1";
const SEQ_VERSION: u32 = 1;

const MARKER_TOMBSTONE: u8 = 0x00;
const MARKER_LIVE: u8 = 0x01;

/// Minimum auxiliary size before a merge can trigger, regardless of ratio.
const SEQ_MIN_MERGE_THRESHOLD: u64 = 8;

// ------------------------------------------------------------------------------------------------
// SequentialIndex
// ------------------------------------------------------------------------------------------------

/// Ordered main file + auxiliary insert area over `(key, rid)` entries.
pub struct SequentialIndex {
    dir: PathBuf,
    main: File,
    aux: File,
    key_type: FieldType,
    key_width: u32,
    unique: bool,
    /// Explicit merge threshold; `None` = `max(8, |main| / 10)`.
    threshold: Option<u64>,
    main_header_len: u64,
    aux_header_len: u64,
    main_count: u64,
    aux_count: u64,
    head: i64,
    /// Merge generation stamped into both headers; see [`Self::merge`].
    generation: u64,
}

impl SequentialIndex {
    /// Size of one main-file slot.
    fn main_slot_size(&self) -> u64 {
        1 + u64::from(self.key_width) + 8 + 8
    }

    /// Size of one auxiliary-file slot.
    fn aux_slot_size(&self) -> u64 {
        1 + u64::from(self.key_width) + 8
    }

    /// Bulk-build a fresh index from entries already sorted by key.
    pub fn build(
        dir: impl AsRef<Path>,
        key_type: FieldType,
        key_width: u32,
        unique: bool,
        threshold: Option<u64>,
        entries: &[Entry],
    ) -> Result<Self, IndexError> {
        let dir = dir.as_ref().to_path_buf();
        write_main_file(&dir.join("main.seq"), key_width, 0, entries)?;
        write_aux_header(&dir.join("aux.seq"), key_width, 0)?;
        info!(entries = entries.len(), "sequential index built");
        Self::open(dir, key_type, key_width, unique, threshold)
    }

    /// Open an existing index pair.
    pub fn open(
        dir: impl AsRef<Path>,
        key_type: FieldType,
        key_width: u32,
        unique: bool,
        threshold: Option<u64>,
    ) -> Result<Self, IndexError> {
        let dir = dir.as_ref().to_path_buf();
        let main = OpenOptions::new().read(true).write(true).open(dir.join("main.seq"))?;
        let mut aux = OpenOptions::new().read(true).write(true).open(dir.join("aux.seq"))?;

        let (main_header_len, head, generation) = read_main_header(&main, key_width)?;
        let (mut aux_header_len, aux_generation) = read_aux_header(&aux, key_width)?;

        // A lagging aux generation means a merge committed its main file
        // but crashed before resetting aux: every aux entry is already in
        // main, so the stale area is discarded to finish the merge.
        if aux_generation != generation {
            warn!(
                main_generation = generation,
                aux_generation, "discarding stale auxiliary area from interrupted merge"
            );
            write_aux_header(&dir.join("aux.seq"), key_width, generation)?;
            aux = OpenOptions::new().read(true).write(true).open(dir.join("aux.seq"))?;
            (aux_header_len, _) = read_aux_header(&aux, key_width)?;
        }

        let mut index = Self {
            dir,
            main,
            aux,
            key_type,
            key_width,
            unique,
            threshold,
            main_header_len,
            aux_header_len,
            main_count: 0,
            aux_count: 0,
            head,
            generation,
        };
        index.main_count =
            (index.main.metadata()?.len() - main_header_len) / index.main_slot_size();
        index.aux_count = (index.aux.metadata()?.len() - aux_header_len) / index.aux_slot_size();
        Ok(index)
    }

    /// All rids whose key equals `key`.
    pub fn search(&self, key: &Key) -> Result<Vec<u64>, IndexError> {
        let mut rids = Vec::new();

        // Main: binary search for the leftmost slot ≥ key, then scan while equal.
        let mut pos = self.lower_bound(key)?;
        while pos < self.main_count {
            let (marker, k, rid, _) = self.read_main_slot(pos)?;
            if k != *key {
                break;
            }
            if marker == MARKER_LIVE {
                rids.push(rid);
            }
            pos += 1;
        }

        // Auxiliary: recent inserts live here until the next merge.
        for i in 0..self.aux_count {
            let (marker, k, rid) = self.read_aux_slot(i)?;
            if marker == MARKER_LIVE && k == *key {
                rids.push(rid);
            }
        }

        Ok(rids)
    }

    /// All live entries with key in `[lo, hi]`, in non-decreasing key order.
    pub fn range(
        &self,
        lo: &Key,
        hi: &Key,
        stop: &StopSignal,
    ) -> Result<Vec<Entry>, IndexError> {
        let mut from_main = Vec::new();

        // Locate the first main key ≥ lo, then walk the linked list.
        let start = self.lower_bound(lo)?;
        if start < self.main_count {
            let mut cursor = if start == 0 { self.head } else { start as i64 };
            // The head pointer matters when slot 0 was reordered by a merge;
            // after a merge the chain is 0→1→…, so slot order and chain
            // order agree and starting mid-chain is sound.
            while cursor >= 0 {
                stop.checkpoint()?;
                let (marker, k, rid, next) = self.read_main_slot(cursor as u64)?;
                if k > *hi {
                    break;
                }
                if marker == MARKER_LIVE && k >= *lo {
                    from_main.push(Entry::new(k, rid));
                }
                cursor = next;
            }
        }

        // Union with auxiliary entries inside the range.
        let mut from_aux = Vec::new();
        for i in 0..self.aux_count {
            stop.checkpoint()?;
            let (marker, k, rid) = self.read_aux_slot(i)?;
            if marker == MARKER_LIVE && k >= *lo && k <= *hi {
                from_aux.push(Entry::new(k, rid));
            }
        }
        from_aux.sort_by(|a, b| a.key.cmp(&b.key));

        // Merge the two sorted runs.
        let mut out = Vec::with_capacity(from_main.len() + from_aux.len());
        let (mut i, mut j) = (0, 0);
        while i < from_main.len() && j < from_aux.len() {
            if from_main[i].key <= from_aux[j].key {
                out.push(from_main[i].clone());
                i += 1;
            } else {
                out.push(from_aux[j].clone());
                j += 1;
            }
        }
        out.extend_from_slice(&from_main[i..]);
        out.extend_from_slice(&from_aux[j..]);
        Ok(out)
    }

    /// Insert one entry.  Appends to the auxiliary area and merges when the
    /// threshold is crossed.
    pub fn insert(&mut self, entry: Entry, stop: &StopSignal) -> Result<(), IndexError> {
        if self.unique && !self.search(&entry.key)?.is_empty() {
            return Err(IndexError::DuplicateKey(entry.key.render()));
        }

        let mut slot = Vec::with_capacity(self.aux_slot_size() as usize);
        slot.push(MARKER_LIVE);
        entry.key.write_fixed(self.key_width as usize, &mut slot)?;
        entry.rid.encode_to(&mut slot)?;

        let offset = self.aux_header_len + self.aux_count * self.aux_slot_size();
        self.aux.write_all_at(&slot, offset)?;
        self.aux_count += 1;
        trace!(key = %entry.key, rid = entry.rid, "sequential insert (aux)");

        if self.aux_count >= self.merge_threshold() {
            self.merge(stop)?;
        }
        Ok(())
    }

    /// Tombstone every entry matching `key`.  Returns the rids removed;
    /// deleting a missing key is a no-op.
    pub fn delete(&mut self, key: &Key) -> Result<Vec<u64>, IndexError> {
        let mut removed = Vec::new();

        let mut pos = self.lower_bound(key)?;
        while pos < self.main_count {
            let (marker, k, rid, _) = self.read_main_slot(pos)?;
            if k != *key {
                break;
            }
            if marker == MARKER_LIVE {
                let offset = self.main_header_len + pos * self.main_slot_size();
                self.main.write_all_at(&[MARKER_TOMBSTONE], offset)?;
                removed.push(rid);
            }
            pos += 1;
        }

        for i in 0..self.aux_count {
            let (marker, k, rid) = self.read_aux_slot(i)?;
            if marker == MARKER_LIVE && k == *key {
                let offset = self.aux_header_len + i * self.aux_slot_size();
                self.aux.write_all_at(&[MARKER_TOMBSTONE], offset)?;
                removed.push(rid);
            }
        }

        Ok(removed)
    }

    /// All live entries in key order.  Used by invariant checks and the
    /// full-index scan path.
    pub fn scan_all(&self, stop: &StopSignal) -> Result<Vec<Entry>, IndexError> {
        match (self.min_key()?, self.max_key()?) {
            (Some(lo), Some(hi)) => self.range(&lo, &hi, stop),
            _ => Ok(Vec::new()),
        }
    }

    /// Number of live + tombstoned slots in the auxiliary area.
    pub fn aux_len(&self) -> u64 {
        self.aux_count
    }

    /// Number of slots in the main file.
    pub fn main_len(&self) -> u64 {
        self.main_count
    }

    /// Merge main ∪ aux into a fresh main file and reset aux.
    ///
    /// The two renames commit as one logical unit through the generation
    /// stamp: the new main carries generation `g+1` and renames first,
    /// then aux is reset at `g+1`.  A crash in between leaves main at
    /// `g+1` and aux at `g`; [`Self::open`] detects the lag and discards
    /// the stale aux area, whose entries the committed main already
    /// holds.  A crash before the main rename leaves both files at `g`,
    /// untouched.  At no point can a reader see an entry through both
    /// files.
    pub fn merge(&mut self, stop: &StopSignal) -> Result<(), IndexError> {
        let mut live = Vec::new();
        for pos in 0..self.main_count {
            stop.checkpoint()?;
            let (marker, k, rid, _) = self.read_main_slot(pos)?;
            if marker == MARKER_LIVE {
                live.push(Entry::new(k, rid));
            }
        }
        for i in 0..self.aux_count {
            stop.checkpoint()?;
            let (marker, k, rid) = self.read_aux_slot(i)?;
            if marker == MARKER_LIVE {
                live.push(Entry::new(k, rid));
            }
        }
        live.sort_by(|a, b| a.key.cmp(&b.key));

        // Main commits first at the next generation; the aux reset at the
        // same generation completes the unit.
        let next_generation = self.generation + 1;
        let main_path = self.dir.join("main.seq");
        write_main_file(&main_path, self.key_width, next_generation, &live)?;
        let aux_path = self.dir.join("aux.seq");
        write_aux_header(&aux_path, self.key_width, next_generation)?;

        // Reopen handles against the renamed files.
        self.main = OpenOptions::new().read(true).write(true).open(&main_path)?;
        self.aux = OpenOptions::new().read(true).write(true).open(&aux_path)?;
        let (header_len, head, generation) = read_main_header(&self.main, self.key_width)?;
        self.main_header_len = header_len;
        self.head = head;
        self.main_count = live.len() as u64;
        self.aux_count = 0;
        self.generation = generation;

        info!(entries = live.len(), generation, "sequential index merged");
        Ok(())
    }

    fn merge_threshold(&self) -> u64 {
        self.threshold
            .unwrap_or_else(|| SEQ_MIN_MERGE_THRESHOLD.max(self.main_count / 10))
    }

    fn min_key(&self) -> Result<Option<Key>, IndexError> {
        let mut min: Option<Key> = None;
        if self.main_count > 0 {
            let (_, k, _, _) = self.read_main_slot(0)?;
            min = Some(k);
        }
        for i in 0..self.aux_count {
            let (_, k, _) = self.read_aux_slot(i)?;
            if min.as_ref().is_none_or(|m| k < *m) {
                min = Some(k);
            }
        }
        Ok(min)
    }

    fn max_key(&self) -> Result<Option<Key>, IndexError> {
        let mut max: Option<Key> = None;
        if self.main_count > 0 {
            let (_, k, _, _) = self.read_main_slot(self.main_count - 1)?;
            max = Some(k);
        }
        for i in 0..self.aux_count {
            let (_, k, _) = self.read_aux_slot(i)?;
            if max.as_ref().is_none_or(|m| k > *m) {
                max = Some(k);
            }
        }
        Ok(max)
    }

    /// Index of the leftmost main slot whose key is ≥ `key`.
    fn lower_bound(&self, key: &Key) -> Result<u64, IndexError> {
        let (mut lo, mut hi) = (0u64, self.main_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (_, k, _, _) = self.read_main_slot(mid)?;
            if k < *key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    fn read_main_slot(&self, pos: u64) -> Result<(u8, Key, u64, i64), IndexError> {
        let mut slot = vec![0u8; self.main_slot_size() as usize];
        self.main
            .read_exact_at(&mut slot, self.main_header_len + pos * self.main_slot_size())?;
        let kw = self.key_width as usize;
        let key = Key::read_fixed(&slot[1..1 + kw], self.key_type)?;
        let rid = u64::from_le_bytes(slot[1 + kw..1 + kw + 8].try_into().map_err(|_| {
            IndexError::Corrupt("main slot rid truncated".into())
        })?);
        let next = i64::from_le_bytes(slot[1 + kw + 8..1 + kw + 16].try_into().map_err(|_| {
            IndexError::Corrupt("main slot next-pointer truncated".into())
        })?);
        Ok((slot[0], key, rid, next))
    }

    fn read_aux_slot(&self, pos: u64) -> Result<(u8, Key, u64), IndexError> {
        let mut slot = vec![0u8; self.aux_slot_size() as usize];
        self.aux
            .read_exact_at(&mut slot, self.aux_header_len + pos * self.aux_slot_size())?;
        let kw = self.key_width as usize;
        let key = Key::read_fixed(&slot[1..1 + kw], self.key_type)?;
        let rid = u64::from_le_bytes(slot[1 + kw..1 + kw + 8].try_into().map_err(|_| {
            IndexError::Corrupt("aux slot rid truncated".into())
        })?);
        Ok((slot[0], key, rid))
    }
}

// ------------------------------------------------------------------------------------------------
// File framing
// ------------------------------------------------------------------------------------------------

fn frame_header(magic: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut hasher = Crc32::new();
    hasher.update(payload);
    let crc = hasher.finalize();

    let mut header = Vec::with_capacity(4 + 4 + payload.len() + 4);
    header.extend_from_slice(&magic);
    header.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    header.extend_from_slice(payload);
    header.extend_from_slice(&crc.to_le_bytes());
    header
}

fn read_framed_header(file: &File, magic: [u8; 4]) -> Result<(Vec<u8>, u64), IndexError> {
    let mut fixed = [0u8; 8];
    file.read_exact_at(&mut fixed, 0)?;
    if fixed[..4] != magic {
        return Err(IndexError::Corrupt("bad magic".into()));
    }
    let payload_len = u32::from_le_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]) as usize;
    let mut payload = vec![0u8; payload_len + 4];
    file.read_exact_at(&mut payload, 8)?;
    let stored_crc = u32::from_le_bytes([
        payload[payload_len],
        payload[payload_len + 1],
        payload[payload_len + 2],
        payload[payload_len + 3],
    ]);
    payload.truncate(payload_len);

    let mut hasher = Crc32::new();
    hasher.update(&payload);
    if hasher.finalize() != stored_crc {
        return Err(IndexError::Corrupt("header checksum mismatch".into()));
    }
    Ok((payload, 8 + payload_len as u64 + 4))
}

/// Atomically (re)write the main file from sorted live entries.
fn write_main_file(
    path: &Path,
    key_width: u32,
    generation: u64,
    entries: &[Entry],
) -> Result<(), IndexError> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&SEQ_VERSION.to_le_bytes());
    payload.extend_from_slice(&key_width.to_le_bytes());
    let head: i64 = if entries.is_empty() { -1 } else { 0 };
    payload.extend_from_slice(&head.to_le_bytes());
    payload.extend_from_slice(&generation.to_le_bytes());

    let mut bytes = frame_header(SEQ_MAIN_MAGIC, &payload);
    for (i, entry) in entries.iter().enumerate() {
        bytes.push(MARKER_LIVE);
        entry.key.write_fixed(key_width as usize, &mut bytes)?;
        bytes.extend_from_slice(&entry.rid.to_le_bytes());
        let next: i64 = if i + 1 < entries.len() { (i + 1) as i64 } else { -1 };
        bytes.extend_from_slice(&next.to_le_bytes());
    }

    atomic_write(path, &bytes)?;
    Ok(())
}

/// Atomically reset the auxiliary file to header-only.
fn write_aux_header(path: &Path, key_width: u32, generation: u64) -> Result<(), IndexError> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&SEQ_VERSION.to_le_bytes());
    payload.extend_from_slice(&key_width.to_le_bytes());
    payload.extend_from_slice(&generation.to_le_bytes());
    atomic_write(path, &frame_header(SEQ_AUX_MAGIC, &payload))?;
    Ok(())
}

fn read_main_header(file: &File, expected_width: u32) -> Result<(u64, i64, u64), IndexError> {
    let (payload, header_len) = read_framed_header(file, SEQ_MAIN_MAGIC)?;
    if payload.len() != 24 {
        return Err(IndexError::Corrupt("main header payload size".into()));
    }
    let version = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let width = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
    if version != SEQ_VERSION || width != expected_width {
        return Err(IndexError::Corrupt(format!(
            "main header mismatch (version {version}, width {width})"
        )));
    }
    let head = i64::from_le_bytes(payload[8..16].try_into().map_err(|_| {
        IndexError::Corrupt("main header head-pointer truncated".into())
    })?);
    let generation = u64::from_le_bytes(payload[16..24].try_into().map_err(|_| {
        IndexError::Corrupt("main header generation truncated".into())
    })?);
    Ok((header_len, head, generation))
}

fn read_aux_header(file: &File, expected_width: u32) -> Result<(u64, u64), IndexError> {
    let (payload, header_len) = read_framed_header(file, SEQ_AUX_MAGIC)?;
    if payload.len() != 16 {
        return Err(IndexError::Corrupt("aux header payload size".into()));
    }
    let width = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
    if width != expected_width {
        return Err(IndexError::Corrupt(format!("aux header width {width}")));
    }
    let generation = u64::from_le_bytes(payload[8..16].try_into().map_err(|_| {
        IndexError::Corrupt("aux header generation truncated".into())
    })?);
    Ok((header_len, generation))
}

