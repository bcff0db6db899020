//! # Two-Level ISAM Index
//!
//! A **static** two-level sparse index over key-ordered data pages, built
//! once and never rebuilt.  Inserts that do not fit their target page go
//! to that page's singly-linked overflow chain; long chains are an
//! intentional, diagnosable cost of the structure, not a bug.
//!
//! ## On-disk layout
//!
//! ```text
//! isam.rt:   [MAGIC][LEN][version, key_width, block_factor,
//!             primary_pages, root entries, bloom bytes][CRC32]
//! isam.lf:   [MAGIC][LEN][version, key_width][CRC32]
//!            [first_key][page]…                  (one entry per data page)
//! isam.data: [MAGIC][LEN][version, key_width, block_factor][CRC32]
//!            [PAGE 0][PAGE 1]…
//!
//! page = [used u32][overflow i64][slot × B]     slot = [marker][key][rid]
//! ```
//!
//! The leaf-index file stores the first key of every data page, grouped
//! into logical pages of `B` entries; the root stores the first key of
//! each leaf group.  Both are frozen after the build: the root is loaded
//! into memory, the leaf file is memory-mapped read-only.
//!
//! ## Bloom filter
//!
//! Point searches consult a bloom filter over all indexed keys before
//! descending, so absent-key probes usually cost zero page reads.  The
//! filter lives in `isam.rt` and is atomically rewritten when inserts add
//! keys; the sparse pages themselves never change.

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use bloomfilter::Bloom;
use memmap2::Mmap;
use tracing::{info, trace, warn};

use crate::encoding::{self, Encode};
use crate::fs::atomic_write;
use crate::index::{Entry, FieldType, IndexError, Key};
use crate::stop::StopSignal;

const ISAM_ROOT_MAGIC: [u8; 4] = *b"ISR1";
const ISAM_LEAF_MAGIC: [u8; 4] = *b"ISL1";
const ISAM_DATA_MAGIC: [u8; 4] = *b"ISD1";
const ISAM_VERSION: u32 = 1;

const MARKER_TOMBSTONE: u8 = 0x00;
const MARKER_LIVE: u8 = 0x01;

/// Default entries per data page (and per leaf-index group).
pub const ISAM_DEFAULT_BLOCK_FACTOR: u32 = 64;

const ISAM_BLOOM_FP_RATE: f64 = 0.01;
/// Sizing floor for the bloom filter so small builds still leave
/// headroom for later inserts.
const ISAM_BLOOM_MIN_CAPACITY: usize = 1024;

// ------------------------------------------------------------------------------------------------
// IsamIndex
// ------------------------------------------------------------------------------------------------

/// Static two-level ISAM over `(key, rid)` entries with overflow chains.
pub struct IsamIndex {
    dir: PathBuf,
    data: File,
    leaf: Mmap,
    leaf_header_len: usize,
    leaf_count: u64,
    root: Vec<(Key, u64)>,
    bloom: Bloom<Vec<u8>>,
    key_type: FieldType,
    key_width: u32,
    block_factor: u32,
    primary_pages: u64,
    data_header_len: u64,
}

impl IsamIndex {
    fn slot_size(&self) -> u64 {
        1 + u64::from(self.key_width) + 8
    }

    fn page_size(&self) -> u64 {
        4 + 8 + u64::from(self.block_factor) * self.slot_size()
    }

    fn leaf_entry_size(&self) -> usize {
        self.key_width as usize + 8
    }

    /// One-pass build from entries already sorted by key.  Root and leaf
    /// index are written once and frozen.
    pub fn build(
        dir: impl AsRef<Path>,
        key_type: FieldType,
        key_width: u32,
        block_factor: u32,
        entries: &[Entry],
    ) -> Result<Self, IndexError> {
        let dir = dir.as_ref().to_path_buf();
        let b = block_factor as usize;
        let slot_size = 1 + key_width as usize + 8;
        let page_size = 4 + 8 + b * slot_size;

        // Data pages.
        let mut data_payload = Vec::new();
        ISAM_VERSION.encode_to(&mut data_payload)?;
        key_width.encode_to(&mut data_payload)?;
        block_factor.encode_to(&mut data_payload)?;
        let mut data_bytes = frame(ISAM_DATA_MAGIC, &data_payload);

        let mut leaf_entries: Vec<(Key, u64)> = Vec::new();
        let mut bloom = Bloom::new_for_fp_rate(
            ISAM_BLOOM_MIN_CAPACITY.max(entries.len() * 2),
            ISAM_BLOOM_FP_RATE,
        )
        .map_err(|e| IndexError::Corrupt(format!("bloom sizing: {e}")))?;

        for (page_no, chunk) in entries.chunks(b.max(1)).enumerate() {
            let mut page = Vec::with_capacity(page_size);
            (chunk.len() as u32).encode_to(&mut page)?;
            (-1i64).encode_to(&mut page)?;
            for entry in chunk {
                page.push(MARKER_LIVE);
                entry.key.write_fixed(key_width as usize, &mut page)?;
                entry.rid.encode_to(&mut page)?;
                bloom.set(&entry.key.render().into_bytes());
            }
            page.resize(page_size, 0);
            data_bytes.extend_from_slice(&page);
            leaf_entries.push((chunk[0].key.clone(), page_no as u64));
        }

        atomic_write(&dir.join("isam.data"), &data_bytes)?;

        // Leaf-index file.
        let mut leaf_payload = Vec::new();
        ISAM_VERSION.encode_to(&mut leaf_payload)?;
        key_width.encode_to(&mut leaf_payload)?;
        let mut leaf_bytes = frame(ISAM_LEAF_MAGIC, &leaf_payload);
        for (key, page) in &leaf_entries {
            key.write_fixed(key_width as usize, &mut leaf_bytes)?;
            page.encode_to(&mut leaf_bytes)?;
        }
        atomic_write(&dir.join("isam.lf"), &leaf_bytes)?;

        // Root: first key of each leaf group.
        let root: Vec<(Key, u64)> = leaf_entries
            .chunks(b.max(1))
            .enumerate()
            .map(|(group, chunk)| (chunk[0].0.clone(), group as u64))
            .collect();

        write_root_file(
            &dir.join("isam.rt"),
            key_width,
            block_factor,
            leaf_entries.len() as u64,
            &root,
            &bloom,
        )?;

        info!(
            entries = entries.len(),
            pages = leaf_entries.len(),
            "isam index built"
        );

        Self::open(dir, key_type, key_width)
    }

    /// Open a built index: load the root, mmap the frozen leaf file.
    pub fn open(
        dir: impl AsRef<Path>,
        key_type: FieldType,
        key_width: u32,
    ) -> Result<Self, IndexError> {
        let dir = dir.as_ref().to_path_buf();

        let root_file = File::open(dir.join("isam.rt"))?;
        let (payload, _) = read_frame(&root_file, ISAM_ROOT_MAGIC)?;
        let mut off = 0usize;
        let (version, n) = encoding::decode_from_slice::<u32>(&payload[off..])?;
        off += n;
        if version != ISAM_VERSION {
            return Err(IndexError::Corrupt(format!("isam.rt version {version}")));
        }
        let (stored_width, n) = encoding::decode_from_slice::<u32>(&payload[off..])?;
        off += n;
        if stored_width != key_width {
            return Err(IndexError::Corrupt("isam.rt key width mismatch".into()));
        }
        let (block_factor, n) = encoding::decode_from_slice::<u32>(&payload[off..])?;
        off += n;
        let (primary_pages, n) = encoding::decode_from_slice::<u64>(&payload[off..])?;
        off += n;
        let (root_count, n) = encoding::decode_from_slice::<u32>(&payload[off..])?;
        off += n;
        let mut root = Vec::with_capacity(root_count as usize);
        for _ in 0..root_count {
            let key = Key::read_fixed(&payload[off..off + key_width as usize], key_type)?;
            off += key_width as usize;
            let (group, n) = encoding::decode_from_slice::<u64>(&payload[off..])?;
            off += n;
            root.push((key, group));
        }
        let (bloom_bytes, _) = encoding::decode_from_slice::<Vec<u8>>(&payload[off..])?;
        let bloom = Bloom::from_slice(&bloom_bytes)
            .map_err(|e| IndexError::Corrupt(format!("isam bloom: {e}")))?;

        let leaf_file = File::open(dir.join("isam.lf"))?;
        let (leaf_payload, leaf_header_len) = read_frame(&leaf_file, ISAM_LEAF_MAGIC)?;
        let _ = leaf_payload;
        // SAFETY: the leaf file is written once at build time and never
        // modified afterwards; the mapping is read-only.
        let leaf = unsafe { Mmap::map(&leaf_file)? };
        let leaf_entry_size = key_width as usize + 8;
        let leaf_count = ((leaf.len() - leaf_header_len as usize) / leaf_entry_size) as u64;

        let data = OpenOptions::new().read(true).write(true).open(dir.join("isam.data"))?;
        let (_, data_header_len) = read_frame(&data, ISAM_DATA_MAGIC)?;

        Ok(Self {
            dir,
            data,
            leaf,
            leaf_header_len: leaf_header_len as usize,
            leaf_count,
            root,
            bloom,
            key_type,
            key_width,
            block_factor,
            primary_pages,
            data_header_len,
        })
    }

    /// All rids whose key equals `key`.
    pub fn search(&self, key: &Key) -> Result<Vec<u64>, IndexError> {
        if self.primary_pages == 0 {
            return Ok(Vec::new());
        }
        if !self.bloom.check(&key.render().into_bytes()) {
            trace!(%key, "isam bloom negative");
            return Ok(Vec::new());
        }

        let page = self.locate_page(key)?;
        let mut rids = Vec::new();
        for entry in self.page_group_entries(page)? {
            if entry.key == *key {
                rids.push(entry.rid);
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
        if self.primary_pages == 0 {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        let start = self.locate_page(lo)?;
        let mut page = start;
        while page < self.primary_pages {
            stop.checkpoint()?;
            // The start page is always scanned: keys below the table's
            // smallest build key live in page 0's overflow chain.
            if page > start && self.leaf_first_key(page)? > *hi {
                break;
            }
            for entry in self.page_group_entries(page)? {
                if entry.key >= *lo && entry.key <= *hi {
                    out.push(entry);
                }
            }
            page += 1;
        }
        Ok(out)
    }

    /// Insert one entry into its target page, spilling to the overflow
    /// chain when the page is full.  The sparse levels are never rebuilt.
    pub fn insert(&mut self, entry: Entry) -> Result<(), IndexError> {
        if self.primary_pages == 0 {
            return Err(IndexError::Corrupt(
                "isam index was built empty; rebuild the table to insert".into(),
            ));
        }

        let target = self.locate_page(&entry.key)?;
        let mut page_no = target;
        loop {
            let (used, overflow) = self.page_header(page_no)?;
            if u64::from(used) < u64::from(self.block_factor) {
                self.write_slot(page_no, used, &entry)?;
                self.write_page_header(page_no, used + 1, overflow)?;
                break;
            }
            if overflow >= 0 {
                page_no = overflow as u64;
                continue;
            }
            // Chain a fresh overflow page at the end of the file.
            let new_page = self.append_overflow_page(&entry)?;
            self.write_page_header(page_no, used, new_page as i64)?;
            let chain = new_page - self.primary_pages + 1;
            if chain > 4 {
                warn!(page = target, chain, "isam overflow chain growing");
            }
            break;
        }

        self.bloom.set(&entry.key.render().into_bytes());
        self.save_root()?;
        trace!(key = %entry.key, rid = entry.rid, "isam insert");
        Ok(())
    }

    /// Tombstone every entry matching `key`.  Returns the rids removed.
    pub fn delete(&mut self, key: &Key) -> Result<Vec<u64>, IndexError> {
        if self.primary_pages == 0 {
            return Ok(Vec::new());
        }
        let mut removed = Vec::new();
        let mut page_no = self.locate_page(key)?;
        loop {
            let (used, overflow) = self.page_header(page_no)?;
            for slot in 0..used {
                let (marker, k, rid) = self.read_slot(page_no, slot)?;
                if marker == MARKER_LIVE && k == *key {
                    self.tombstone_slot(page_no, slot)?;
                    removed.push(rid);
                }
            }
            if overflow < 0 {
                break;
            }
            page_no = overflow as u64;
        }
        Ok(removed)
    }

    /// All live entries in key order.
    pub fn scan_all(&self, stop: &StopSignal) -> Result<Vec<Entry>, IndexError> {
        let mut out = Vec::new();
        for page in 0..self.primary_pages {
            stop.checkpoint()?;
            out.extend(self.page_group_entries(page)?);
        }
        Ok(out)
    }

    /// Number of overflow pages currently chained, across all pages.
    pub fn overflow_pages(&self) -> Result<u64, IndexError> {
        let file_len = self.data.metadata()?.len();
        let total = (file_len - self.data_header_len) / self.page_size();
        Ok(total - self.primary_pages)
    }

    // --------------------------------------------------------------------------------------------
    // Descent
    // --------------------------------------------------------------------------------------------

    /// Data page whose key range covers `key`: root → leaf group → page.
    fn locate_page(&self, key: &Key) -> Result<u64, IndexError> {
        let group = match self.root.iter().rposition(|(k, _)| k <= key) {
            Some(i) => self.root[i].1,
            None => 0,
        };

        let b = u64::from(self.block_factor);
        let lo = group * b;
        let hi = ((group + 1) * b).min(self.leaf_count);

        let mut page = lo;
        for i in lo..hi {
            if self.leaf_first_key(i)? <= *key {
                page = i;
            } else {
                break;
            }
        }
        Ok(page)
    }

    fn leaf_first_key(&self, index: u64) -> Result<Key, IndexError> {
        let offset = self.leaf_header_len + index as usize * self.leaf_entry_size();
        let slot = &self.leaf[offset..offset + self.key_width as usize];
        Key::read_fixed(slot, self.key_type)
    }

    /// Live entries of one primary page plus its overflow chain, sorted.
    fn page_group_entries(&self, page: u64) -> Result<Vec<Entry>, IndexError> {
        let mut entries = Vec::new();
        let mut page_no = page;
        loop {
            let (used, overflow) = self.page_header(page_no)?;
            for slot in 0..used {
                let (marker, k, rid) = self.read_slot(page_no, slot)?;
                if marker == MARKER_LIVE {
                    entries.push(Entry::new(k, rid));
                }
            }
            if overflow < 0 {
                break;
            }
            page_no = overflow as u64;
        }
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    // --------------------------------------------------------------------------------------------
    // Page I/O
    // --------------------------------------------------------------------------------------------

    fn page_offset(&self, page: u64) -> u64 {
        self.data_header_len + page * self.page_size()
    }

    fn page_header(&self, page: u64) -> Result<(u32, i64), IndexError> {
        let mut buf = [0u8; 12];
        self.data.read_exact_at(&mut buf, self.page_offset(page))?;
        let used = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let overflow = i64::from_le_bytes(buf[4..12].try_into().map_err(|_| {
            IndexError::Corrupt("page header truncated".into())
        })?);
        Ok((used, overflow))
    }

    fn write_page_header(&self, page: u64, used: u32, overflow: i64) -> Result<(), IndexError> {
        let mut buf = Vec::with_capacity(12);
        buf.extend_from_slice(&used.to_le_bytes());
        buf.extend_from_slice(&overflow.to_le_bytes());
        self.data.write_all_at(&buf, self.page_offset(page))?;
        Ok(())
    }

    fn slot_offset(&self, page: u64, slot: u32) -> u64 {
        self.page_offset(page) + 12 + u64::from(slot) * self.slot_size()
    }

    fn read_slot(&self, page: u64, slot: u32) -> Result<(u8, Key, u64), IndexError> {
        let mut buf = vec![0u8; self.slot_size() as usize];
        self.data.read_exact_at(&mut buf, self.slot_offset(page, slot))?;
        let kw = self.key_width as usize;
        let key = Key::read_fixed(&buf[1..1 + kw], self.key_type)?;
        let rid = u64::from_le_bytes(buf[1 + kw..1 + kw + 8].try_into().map_err(|_| {
            IndexError::Corrupt("slot rid truncated".into())
        })?);
        Ok((buf[0], key, rid))
    }

    fn write_slot(&self, page: u64, slot: u32, entry: &Entry) -> Result<(), IndexError> {
        let mut buf = Vec::with_capacity(self.slot_size() as usize);
        buf.push(MARKER_LIVE);
        entry.key.write_fixed(self.key_width as usize, &mut buf)?;
        entry.rid.encode_to(&mut buf)?;
        self.data.write_all_at(&buf, self.slot_offset(page, slot))?;
        Ok(())
    }

    fn tombstone_slot(&self, page: u64, slot: u32) -> Result<(), IndexError> {
        self.data
            .write_all_at(&[MARKER_TOMBSTONE], self.slot_offset(page, slot))?;
        Ok(())
    }

    /// Append a fresh overflow page holding one entry; returns its index.
    fn append_overflow_page(&mut self, entry: &Entry) -> Result<u64, IndexError> {
        let file_len = self.data.metadata()?.len();
        let page_no = (file_len - self.data_header_len) / self.page_size();

        let mut page = Vec::with_capacity(self.page_size() as usize);
        1u32.encode_to(&mut page)?;
        (-1i64).encode_to(&mut page)?;
        page.push(MARKER_LIVE);
        entry.key.write_fixed(self.key_width as usize, &mut page)?;
        entry.rid.encode_to(&mut page)?;
        page.resize(self.page_size() as usize, 0);

        self.data.write_all_at(&page, self.page_offset(page_no))?;
        Ok(page_no)
    }

    /// Rewrite `isam.rt` (root entries + bloom) atomically.
    fn save_root(&self) -> Result<(), IndexError> {
        write_root_file(
            &self.dir.join("isam.rt"),
            self.key_width,
            self.block_factor,
            self.leaf_count,
            &self.root,
            &self.bloom,
        )
    }
}

// ------------------------------------------------------------------------------------------------
// File framing
// ------------------------------------------------------------------------------------------------

fn frame(magic: [u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    let crc = hasher.finalize();

    let mut bytes = Vec::with_capacity(4 + 4 + payload.len() + 4);
    bytes.extend_from_slice(&magic);
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(payload);
    bytes.extend_from_slice(&crc.to_le_bytes());
    bytes
}

fn read_frame(file: &File, magic: [u8; 4]) -> Result<(Vec<u8>, u64), IndexError> {
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

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&payload);
    if hasher.finalize() != stored_crc {
        return Err(IndexError::Corrupt("header checksum mismatch".into()));
    }
    Ok((payload, 8 + payload_len as u64 + 4))
}

fn write_root_file(
    path: &Path,
    key_width: u32,
    block_factor: u32,
    leaf_count: u64,
    root: &[(Key, u64)],
    bloom: &Bloom<Vec<u8>>,
) -> Result<(), IndexError> {
    let mut payload = Vec::new();
    ISAM_VERSION.encode_to(&mut payload)?;
    key_width.encode_to(&mut payload)?;
    block_factor.encode_to(&mut payload)?;
    // Primary pages and leaf entries are one-to-one.
    leaf_count.encode_to(&mut payload)?;
    (root.len() as u32).encode_to(&mut payload)?;
    for (key, group) in root {
        key.write_fixed(key_width as usize, &mut payload)?;
        group.encode_to(&mut payload)?;
    }
    bloom.as_slice().to_vec().encode_to(&mut payload)?;

    atomic_write(path, &frame(ISAM_ROOT_MAGIC, &payload))?;
    Ok(())
}
