//! # Extendible Hash Index
//!
//! A directory of `2^g` bucket pointers over fixed-size bucket pages, each
//! with its own local depth `l ≤ g`.  Point lookups cost one directory
//! probe plus one bucket scan; there is **no range support**.
//!
//! ## On-disk layout
//!
//! ```text
//! hash.dir:     [MAGIC][LEN][version, global_depth, bucket_id × 2^g][CRC32]
//! hash.buckets: [MAGIC][LEN][version, key_width, bucket_size][CRC32]
//!               [BUCKET 0][BUCKET 1]…
//!
//! bucket = [local_depth u32][count u32][overflow i64][(key, rid) × bsize]
//! ```
//!
//! The directory is tiny and rewritten **atomically** (copy to a temporary
//! file, fsync, rename) on every structural change: bucket split, directory
//! doubling, buddy merge.  Bucket pages are updated in place; a crash
//! mid-insert can at worst lose that one in-flight entry, never the
//! directory's consistency.
//!
//! ## Split discipline
//!
//! - Target bucket full and `l < g` → split: allocate a sibling with depth
//!   `l+1`, redistribute by bit `l`, redirect exactly half the pointers.
//! - Target bucket full and `l = g` → double the directory, then split.
//! - All entries in the bucket share one hash (pathological, e.g. mass
//!   duplicates) → chain an overflow bucket instead of splitting forever.
//!
//! ## Key hashing
//!
//! Keys hash through `xxh3` over their canonical string form, so the same
//! key always lands in the same slot across processes and reopens.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace};
use xxhash_rust::xxh3::xxh3_64;

use crate::encoding::{self, Encode};
use crate::fs::atomic_write;
use crate::index::{Entry, FieldType, IndexError, Key};

const HASH_DIR_MAGIC: [u8; 4] = *b"EXD1";
const HASH_BUCKET_MAGIC: [u8; 4] = *b"EXB1";
const HASH_VERSION: u32 = 1;

/// Default entries per bucket page.
pub const HASH_DEFAULT_BUCKET_SIZE: u32 = 32;

/// Hard ceiling on the global depth; one million buckets is far beyond
/// anything this engine serves, and the cap bounds directory doubling
/// under adversarial key sets.
const HASH_MAX_GLOBAL_DEPTH: u32 = 20;

// ------------------------------------------------------------------------------------------------
// ExtendibleHashIndex
// ------------------------------------------------------------------------------------------------

/// Extendible hashing over `(key, rid)` entries.
pub struct ExtendibleHashIndex {
    dir_path: PathBuf,
    buckets: File,
    directory: Vec<u64>,
    global_depth: u32,
    key_type: FieldType,
    key_width: u32,
    bucket_size: u32,
    unique: bool,
    buckets_header_len: u64,
}

impl ExtendibleHashIndex {
    fn entry_size(&self) -> u64 {
        u64::from(self.key_width) + 8
    }

    fn page_size(&self) -> u64 {
        4 + 4 + 8 + u64::from(self.bucket_size) * self.entry_size()
    }

    /// Create a fresh index (global depth 0, one empty bucket) and load
    /// the given entries.
    pub fn build(
        dir: impl AsRef<Path>,
        key_type: FieldType,
        key_width: u32,
        bucket_size: u32,
        unique: bool,
        entries: &[Entry],
    ) -> Result<Self, IndexError> {
        let dir = dir.as_ref().to_path_buf();

        let mut header_payload = Vec::new();
        HASH_VERSION.encode_to(&mut header_payload)?;
        key_width.encode_to(&mut header_payload)?;
        bucket_size.encode_to(&mut header_payload)?;
        let header = frame(HASH_BUCKET_MAGIC, &header_payload);

        {
            use std::io::Write;
            let mut f = File::create(dir.join("hash.buckets"))?;
            f.write_all(&header)?;
            f.sync_all()?;
        }

        let mut index = Self {
            dir_path: dir.clone(),
            buckets: OpenOptions::new()
                .read(true)
                .write(true)
                .open(dir.join("hash.buckets"))?,
            directory: vec![0],
            global_depth: 0,
            key_type,
            key_width,
            bucket_size,
            unique,
            buckets_header_len: header.len() as u64,
        };

        // Bucket 0 with local depth 0.
        index.write_bucket_page(0, 0, &[], -1)?;
        index.save_directory()?;

        for entry in entries {
            index.insert(entry.clone())?;
        }
        info!(entries = entries.len(), "extendible hash index built");
        Ok(index)
    }

    /// Open an existing index.
    pub fn open(
        dir: impl AsRef<Path>,
        key_type: FieldType,
        key_width: u32,
        unique: bool,
    ) -> Result<Self, IndexError> {
        let dir = dir.as_ref().to_path_buf();

        let dir_file = File::open(dir.join("hash.dir"))?;
        let (payload, _) = read_frame(&dir_file, HASH_DIR_MAGIC)?;
        let mut off = 0usize;
        let (version, n) = encoding::decode_from_slice::<u32>(&payload[off..])?;
        off += n;
        if version != HASH_VERSION {
            return Err(IndexError::Corrupt(format!("hash.dir version {version}")));
        }
        let (global_depth, n) = encoding::decode_from_slice::<u32>(&payload[off..])?;
        off += n;
        let mut directory = Vec::with_capacity(1usize << global_depth);
        for _ in 0..(1u64 << global_depth) {
            let (bid, n) = encoding::decode_from_slice::<u64>(&payload[off..])?;
            off += n;
            directory.push(bid);
        }

        let buckets = OpenOptions::new()
            .read(true)
            .write(true)
            .open(dir.join("hash.buckets"))?;
        let (bucket_payload, buckets_header_len) = read_frame(&buckets, HASH_BUCKET_MAGIC)?;
        let mut off = 4usize; // skip version
        let (stored_width, n) = encoding::decode_from_slice::<u32>(&bucket_payload[off..])?;
        off += n;
        if stored_width != key_width {
            return Err(IndexError::Corrupt("hash.buckets key width mismatch".into()));
        }
        let (bucket_size, _) = encoding::decode_from_slice::<u32>(&bucket_payload[off..])?;

        Ok(Self {
            dir_path: dir,
            buckets,
            directory,
            global_depth,
            key_type,
            key_width,
            bucket_size,
            unique,
            buckets_header_len,
        })
    }

    /// All rids whose key equals `key`.
    pub fn search(&self, key: &Key) -> Result<Vec<u64>, IndexError> {
        let mut rids = Vec::new();
        let mut bucket = self.slot_bucket(key);
        loop {
            let (_, count, overflow, entries) = self.read_bucket_page(bucket)?;
            for (k, rid) in entries.into_iter().take(count as usize) {
                if k == *key {
                    rids.push(rid);
                }
            }
            if overflow < 0 {
                break;
            }
            bucket = overflow as u64;
        }
        Ok(rids)
    }

    /// Insert one entry, splitting or doubling as needed.
    pub fn insert(&mut self, entry: Entry) -> Result<(), IndexError> {
        if self.unique && !self.search(&entry.key)?.is_empty() {
            return Err(IndexError::DuplicateKey(entry.key.render()));
        }

        let hash = hash_key(&entry.key);
        loop {
            let slot = (hash & self.mask()) as usize;
            let bucket = self.directory[slot];
            let (local_depth, count, overflow, _) = self.read_bucket_page(bucket)?;

            if count < self.bucket_size {
                self.append_to_page(bucket, count, &entry)?;
                trace!(key = %entry.key, rid = entry.rid, bucket, "hash insert");
                return Ok(());
            }

            // Primary page full.  Chain if splitting cannot help, else split.
            if self.all_hashes_equal(bucket)? {
                self.append_to_chain(bucket, overflow, &entry)?;
                return Ok(());
            }

            if local_depth < self.global_depth {
                self.split_bucket(bucket, local_depth)?;
            } else if self.global_depth < HASH_MAX_GLOBAL_DEPTH {
                self.double_directory()?;
                self.split_bucket(bucket, local_depth)?;
            } else {
                self.append_to_chain(bucket, overflow, &entry)?;
                return Ok(());
            }
        }
    }

    /// Remove every entry matching `key`.  Returns the rids removed;
    /// missing keys are a no-op.  Attempts a buddy merge afterwards.
    pub fn delete(&mut self, key: &Key) -> Result<Vec<u64>, IndexError> {
        let bucket = self.slot_bucket(key);
        let (local_depth, _, _, _) = self.read_bucket_page(bucket)?;
        let all = self.chain_entries(bucket)?;

        let (removed, kept): (Vec<_>, Vec<_>) = all.into_iter().partition(|(k, _)| k == key);
        if removed.is_empty() {
            return Ok(Vec::new());
        }

        let kept: Vec<Entry> = kept.into_iter().map(|(k, rid)| Entry::new(k, rid)).collect();
        self.rewrite_chain(bucket, local_depth, &kept)?;
        self.try_buddy_merge(bucket)?;
        Ok(removed.into_iter().map(|(_, rid)| rid).collect())
    }

    /// Every entry in the index, in no particular order.
    pub fn scan_all(&self) -> Result<Vec<Entry>, IndexError> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for &bucket in &self.directory {
            if !seen.insert(bucket) {
                continue;
            }
            for (k, rid) in self.chain_entries(bucket)? {
                out.push(Entry::new(k, rid));
            }
        }
        Ok(out)
    }

    /// Current global depth.
    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    /// Directory snapshot (bucket id per slot).
    pub fn directory(&self) -> &[u64] {
        &self.directory
    }

    /// Local depth of the bucket behind a directory slot.
    pub fn local_depth(&self, slot: usize) -> Result<u32, IndexError> {
        let (ld, _, _, _) = self.read_bucket_page(self.directory[slot])?;
        Ok(ld)
    }

    /// Check the structural invariants: directory size is `2^g` and each
    /// bucket with local depth `l` is referenced by exactly `2^(g−l)`
    /// pointers agreeing on their low `l` bits.
    pub fn verify_directory(&self) -> Result<(), IndexError> {
        if self.directory.len() != 1usize << self.global_depth {
            return Err(IndexError::Corrupt(format!(
                "directory size {} != 2^{}",
                self.directory.len(),
                self.global_depth
            )));
        }

        let mut pointers: HashMap<u64, Vec<usize>> = HashMap::new();
        for (slot, &bucket) in self.directory.iter().enumerate() {
            pointers.entry(bucket).or_default().push(slot);
        }
        for (bucket, slots) in pointers {
            let (local_depth, _, _, _) = self.read_bucket_page(bucket)?;
            let expected = 1usize << (self.global_depth - local_depth);
            if slots.len() != expected {
                return Err(IndexError::Corrupt(format!(
                    "bucket {bucket} (depth {local_depth}) has {} pointers, expected {expected}",
                    slots.len()
                )));
            }
            let low_mask = (1u64 << local_depth) - 1;
            let stamp = slots[0] as u64 & low_mask;
            if slots.iter().any(|s| (*s as u64 & low_mask) != stamp) {
                return Err(IndexError::Corrupt(format!(
                    "bucket {bucket} pointers disagree on low {local_depth} bits"
                )));
            }
        }
        Ok(())
    }

    // --------------------------------------------------------------------------------------------
    // Split / double / merge
    // --------------------------------------------------------------------------------------------

    fn mask(&self) -> u64 {
        (1u64 << self.global_depth) - 1
    }

    fn slot_bucket(&self, key: &Key) -> u64 {
        self.directory[(hash_key(key) & self.mask()) as usize]
    }

    /// Split `bucket` (depth `local_depth`) into itself and a sibling at
    /// depth `local_depth + 1`, redistributing by bit `local_depth`.
    fn split_bucket(&mut self, bucket: u64, local_depth: u32) -> Result<(), IndexError> {
        let entries = self.chain_entries(bucket)?;
        let new_depth = local_depth + 1;
        let bit = 1u64 << local_depth;

        let (stay, moved): (Vec<_>, Vec<_>) = entries
            .into_iter()
            .partition(|(k, _)| hash_key(k) & bit == 0);

        let sibling = self.allocate_bucket()?;

        let stay: Vec<Entry> = stay.into_iter().map(|(k, r)| Entry::new(k, r)).collect();
        let moved: Vec<Entry> = moved.into_iter().map(|(k, r)| Entry::new(k, r)).collect();
        self.rewrite_chain(bucket, new_depth, &stay)?;
        self.rewrite_chain(sibling, new_depth, &moved)?;

        // Redirect the half of this bucket's pointers whose split bit is set.
        for slot in 0..self.directory.len() {
            if self.directory[slot] == bucket && (slot as u64) & bit != 0 {
                self.directory[slot] = sibling;
            }
        }
        self.save_directory()?;

        debug!(
            bucket,
            sibling,
            depth = new_depth,
            stayed = stay.len(),
            moved = moved.len(),
            "bucket split"
        );
        Ok(())
    }

    /// Duplicate every directory pointer and bump the global depth.
    fn double_directory(&mut self) -> Result<(), IndexError> {
        let mut doubled = Vec::with_capacity(self.directory.len() * 2);
        doubled.extend_from_slice(&self.directory);
        doubled.extend_from_slice(&self.directory);
        self.directory = doubled;
        self.global_depth += 1;
        self.save_directory()?;
        info!(global_depth = self.global_depth, "directory doubled");
        Ok(())
    }

    /// Merge `bucket` with its buddy when both fit into one page.
    fn try_buddy_merge(&mut self, bucket: u64) -> Result<(), IndexError> {
        let (local_depth, count, overflow, _) = self.read_bucket_page(bucket)?;
        if local_depth == 0 || overflow >= 0 {
            return Ok(());
        }

        let Some(slot) = self.directory.iter().position(|b| *b == bucket) else {
            return Ok(());
        };
        let buddy_slot = slot ^ (1usize << (local_depth - 1));
        let buddy = self.directory[buddy_slot];
        if buddy == bucket {
            return Ok(());
        }
        let (buddy_depth, buddy_count, buddy_overflow, _) = self.read_bucket_page(buddy)?;
        if buddy_depth != local_depth
            || buddy_overflow >= 0
            || count + buddy_count > self.bucket_size
        {
            return Ok(());
        }

        let merged: Vec<Entry> = self
            .chain_entries(bucket)?
            .into_iter()
            .chain(self.chain_entries(buddy)?)
            .map(|(k, r)| Entry::new(k, r))
            .collect();
        self.rewrite_chain(bucket, local_depth - 1, &merged)?;

        for slot_bucket in self.directory.iter_mut() {
            if *slot_bucket == buddy {
                *slot_bucket = bucket;
            }
        }
        self.save_directory()?;
        debug!(bucket, buddy, depth = local_depth - 1, "buddy merge");
        Ok(())
    }

    /// Whether every entry reachable from `bucket` hashes identically —
    /// the pathological case where splitting cannot separate them.
    fn all_hashes_equal(&self, bucket: u64) -> Result<bool, IndexError> {
        let entries = self.chain_entries(bucket)?;
        let mut hashes = entries.iter().map(|(k, _)| hash_key(k));
        match hashes.next() {
            None => Ok(false),
            Some(first) => Ok(hashes.all(|h| h == first)),
        }
    }

    // --------------------------------------------------------------------------------------------
    // Bucket page I/O
    // --------------------------------------------------------------------------------------------

    fn bucket_offset(&self, bucket: u64) -> u64 {
        self.buckets_header_len + bucket * self.page_size()
    }

    fn bucket_count(&self) -> Result<u64, IndexError> {
        let len = self.buckets.metadata()?.len();
        Ok((len - self.buckets_header_len) / self.page_size())
    }

    fn allocate_bucket(&mut self) -> Result<u64, IndexError> {
        let bucket = self.bucket_count()?;
        self.write_bucket_page(bucket, 0, &[], -1)?;
        Ok(bucket)
    }

    fn read_bucket_page(
        &self,
        bucket: u64,
    ) -> Result<(u32, u32, i64, Vec<(Key, u64)>), IndexError> {
        let mut page = vec![0u8; self.page_size() as usize];
        self.buckets.read_exact_at(&mut page, self.bucket_offset(bucket))?;

        let local_depth = u32::from_le_bytes([page[0], page[1], page[2], page[3]]);
        let count = u32::from_le_bytes([page[4], page[5], page[6], page[7]]);
        let overflow = i64::from_le_bytes(page[8..16].try_into().map_err(|_| {
            IndexError::Corrupt("bucket header truncated".into())
        })?);

        let kw = self.key_width as usize;
        let mut entries = Vec::with_capacity(count as usize);
        let mut off = 16usize;
        for _ in 0..count {
            let key = Key::read_fixed(&page[off..off + kw], self.key_type)?;
            off += kw;
            let rid = u64::from_le_bytes(page[off..off + 8].try_into().map_err(|_| {
                IndexError::Corrupt("bucket entry truncated".into())
            })?);
            off += 8;
            entries.push((key, rid));
        }
        Ok((local_depth, count, overflow, entries))
    }

    fn write_bucket_page(
        &self,
        bucket: u64,
        local_depth: u32,
        entries: &[Entry],
        overflow: i64,
    ) -> Result<(), IndexError> {
        let mut page = Vec::with_capacity(self.page_size() as usize);
        local_depth.encode_to(&mut page)?;
        (entries.len() as u32).encode_to(&mut page)?;
        overflow.encode_to(&mut page)?;
        for entry in entries {
            entry.key.write_fixed(self.key_width as usize, &mut page)?;
            entry.rid.encode_to(&mut page)?;
        }
        page.resize(self.page_size() as usize, 0);
        self.buckets.write_all_at(&page, self.bucket_offset(bucket))?;
        Ok(())
    }

    /// Append one entry into slot `count` of a page with room.
    fn append_to_page(&self, bucket: u64, count: u32, entry: &Entry) -> Result<(), IndexError> {
        let mut slot = Vec::with_capacity(self.entry_size() as usize);
        entry.key.write_fixed(self.key_width as usize, &mut slot)?;
        entry.rid.encode_to(&mut slot)?;
        let offset = self.bucket_offset(bucket) + 16 + u64::from(count) * self.entry_size();
        self.buckets.write_all_at(&slot, offset)?;
        self.buckets
            .write_all_at(&(count + 1).to_le_bytes(), self.bucket_offset(bucket) + 4)?;
        Ok(())
    }

    /// Append into the overflow chain rooted at `bucket`.
    fn append_to_chain(
        &mut self,
        bucket: u64,
        first_overflow: i64,
        entry: &Entry,
    ) -> Result<(), IndexError> {
        let mut page = bucket;
        let mut overflow = first_overflow;
        while overflow >= 0 {
            page = overflow as u64;
            let (_, count, next, _) = self.read_bucket_page(page)?;
            if count < self.bucket_size {
                self.append_to_page(page, count, entry)?;
                return Ok(());
            }
            overflow = next;
        }

        let new_page = self.allocate_bucket()?;
        self.write_bucket_page(new_page, 0, std::slice::from_ref(entry), -1)?;
        // Link from the tail of the chain.
        let offset = self.bucket_offset(page) + 8;
        self.buckets.write_all_at(&(new_page as i64).to_le_bytes(), offset)?;
        debug!(bucket, new_page, "overflow bucket chained");
        Ok(())
    }

    /// Entries of a bucket and its whole overflow chain.
    fn chain_entries(&self, bucket: u64) -> Result<Vec<(Key, u64)>, IndexError> {
        let mut out = Vec::new();
        let mut page = bucket;
        loop {
            let (_, count, overflow, entries) = self.read_bucket_page(page)?;
            out.extend(entries.into_iter().take(count as usize));
            if overflow < 0 {
                break;
            }
            page = overflow as u64;
        }
        Ok(out)
    }

    /// Rewrite a bucket (and chain) from scratch with the given entries,
    /// reusing existing chain pages before allocating new ones.
    fn rewrite_chain(
        &mut self,
        bucket: u64,
        local_depth: u32,
        entries: &[Entry],
    ) -> Result<(), IndexError> {
        // Collect reusable chain pages.
        let mut reusable = Vec::new();
        let (_, _, mut overflow, _) = self.read_bucket_page(bucket)?;
        while overflow >= 0 {
            reusable.push(overflow as u64);
            let (_, _, next, _) = self.read_bucket_page(overflow as u64)?;
            overflow = next;
        }

        let bsize = self.bucket_size as usize;
        let mut chunks = entries.chunks(bsize);
        let first: &[Entry] = chunks.next().unwrap_or(&[]);

        let rest: Vec<&[Entry]> = chunks.collect();
        let mut chain_pages = Vec::with_capacity(rest.len());
        for _ in 0..rest.len() {
            match reusable.pop() {
                Some(p) => chain_pages.push(p),
                None => chain_pages.push(self.allocate_bucket()?),
            }
        }

        let first_next = chain_pages.first().map_or(-1, |p| *p as i64);
        self.write_bucket_page(bucket, local_depth, first, first_next)?;
        for (i, chunk) in rest.iter().enumerate() {
            let next = chain_pages.get(i + 1).map_or(-1, |p| *p as i64);
            self.write_bucket_page(chain_pages[i], 0, chunk, next)?;
        }
        Ok(())
    }

    /// Atomically rewrite `hash.dir`.
    fn save_directory(&self) -> Result<(), IndexError> {
        let mut payload = Vec::new();
        HASH_VERSION.encode_to(&mut payload)?;
        self.global_depth.encode_to(&mut payload)?;
        for bucket in &self.directory {
            bucket.encode_to(&mut payload)?;
        }
        atomic_write(&self.dir_path.join("hash.dir"), &frame(HASH_DIR_MAGIC, &payload))?;
        Ok(())
    }
}

/// Stable 64-bit hash of a key's canonical form.
fn hash_key(key: &Key) -> u64 {
    xxh3_64(key.render().as_bytes())
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
