//! # SPIMI Text Index
//!
//! Free-text retrieval over designated record fields, ranked by **TF–IDF
//! cosine similarity**.  Construction is single-pass with block
//! spill-and-merge ([`builder`]); queries run against the persistent
//! artifacts plus an in-memory delta for recent inserts.
//!
//! ## Artifacts (per table, under `spimi/`)
//!
//! | File | Contents |
//! |------|----------|
//! | `dict` | term → `(df, offset, len, crc)`, bloom filter over terms, `N` |
//! | `post` | contiguous per-term posting blocks `[(doc_id, tf)…]` |
//! | `norms` | per-document `‖d‖₂` under `(1+log tf)·log(N/df)` weights |
//!
//! The postings file is memory-mapped read-only after build; the
//! dictionary is loaded and binary-searched in memory with the bloom
//! filter screening absent query terms first.
//!
//! ## Scoring
//!
//! For a query `q` and document `d`:
//!
//! ```text
//! score(d) = Σ_t  w(t,q) · w(t,d)  /  ‖d‖₂      w = (1+log tf)·log(N/df)
//! ```
//!
//! Results are the top-k by score through a bounded min-heap; equal scores
//! order by ascending doc id, so rankings are deterministic.
//!
//! ## Incremental updates
//!
//! Inserts land in an in-memory delta consulted by every query; when the
//! delta crosses [`TextIndex::DELTA_MERGE_THRESHOLD`] documents it is
//! folded into the persistent index (postings re-merged, `df` and norms
//! recomputed, artifacts atomically replaced).  Deletes set a tombstone
//! consulted at query time; their `df` contribution is dropped at the
//! next merge.

pub mod builder;
pub mod tokenizer;

#[cfg(test)]
mod tests;

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use bloomfilter::Bloom;
use memmap2::Mmap;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::encoding::{self, EncodingError};
use crate::stop::StopSignal;
use builder::{SpimiBuilder, idf, tf_weight, write_artifacts};
use tokenizer::{Language, tokenize_query};

pub(crate) const SPIMI_DICT_MAGIC: [u8; 4] = *b"SPD1";
pub(crate) const SPIMI_POST_MAGIC: [u8; 4] = *b"SPP1";
pub(crate) const SPIMI_NORMS_MAGIC: [u8; 4] = *b"SPN1";
pub(crate) const SPIMI_VERSION: u32 = 1;

pub(crate) const SPIMI_BLOOM_FP_RATE: f64 = 0.01;
pub(crate) const SPIMI_BLOOM_MIN_CAPACITY: usize = 1024;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by the text index.
#[derive(Debug, Error)]
pub enum TextIndexError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error in a persisted artifact.
    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// A persisted artifact failed validation.
    #[error("Corrupt text index: {0}")]
    Corrupt(String),
}

// ------------------------------------------------------------------------------------------------
// Dictionary
// ------------------------------------------------------------------------------------------------

/// One dictionary row: where a term's postings live and how many
/// documents carry it.
#[derive(Debug, Clone)]
pub(crate) struct DictEntry {
    pub(crate) term: String,
    pub(crate) df: u32,
    pub(crate) offset: u64,
    pub(crate) len: u32,
    pub(crate) crc: u32,
}

/// In-memory delta over the persistent index.
#[derive(Default)]
struct DeltaIndex {
    /// term → postings of delta documents.
    postings: HashMap<String, Vec<(u64, u32)>>,
    /// doc → its term counts (norm computation needs the full vector).
    docs: HashMap<u64, HashMap<String, u32>>,
}

// ------------------------------------------------------------------------------------------------
// TextIndex
// ------------------------------------------------------------------------------------------------

/// Persistent SPIMI index plus delta, tombstones, and the query path.
pub struct TextIndex {
    dir: PathBuf,
    language: Language,
    /// Documents in the persistent index.
    doc_count: u64,
    dict: Vec<DictEntry>,
    bloom: Bloom<Vec<u8>>,
    posts: Mmap,
    norms: HashMap<u64, f64>,
    delta: DeltaIndex,
    tombstones: HashSet<u64>,
}

impl TextIndex {
    /// Delta documents tolerated before a merge folds them in.
    pub const DELTA_MERGE_THRESHOLD: usize = 1024;

    /// Build from scratch: stream documents through a [`SpimiBuilder`]
    /// and open the result.
    pub fn build<I>(
        dir: impl AsRef<Path>,
        language: Language,
        memory_budget: usize,
        docs: I,
        stop: &StopSignal,
    ) -> Result<Self, TextIndexError>
    where
        I: IntoIterator<Item = (u64, Vec<(String, String)>)>,
    {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let mut builder =
            SpimiBuilder::new(&dir, language, memory_budget);
        for (doc_id, fields) in docs {
            builder.add_document(doc_id, &fields)?;
        }
        builder.finish(stop)?;
        Self::open(dir, language)
    }

    /// Open the persistent artifacts.
    pub fn open(dir: impl AsRef<Path>, language: Language) -> Result<Self, TextIndexError> {
        let dir = dir.as_ref().to_path_buf();

        // Dictionary.
        let dict_bytes = std::fs::read(dir.join("dict"))?;
        let payload = unframe(&dict_bytes, SPIMI_DICT_MAGIC)?;
        let mut off = 0usize;
        let (version, n) = encoding::decode_from_slice::<u32>(&payload[off..])?;
        off += n;
        if version != SPIMI_VERSION {
            return Err(TextIndexError::Corrupt(format!("dict version {version}")));
        }
        let (doc_count, n) = encoding::decode_from_slice::<u64>(&payload[off..])?;
        off += n;
        let (bloom_bytes, n) = encoding::decode_from_slice::<Vec<u8>>(&payload[off..])?;
        off += n;
        let bloom = Bloom::from_slice(&bloom_bytes)
            .map_err(|e| TextIndexError::Corrupt(format!("dict bloom: {e}")))?;
        let (term_count, n) = encoding::decode_from_slice::<u64>(&payload[off..])?;
        off += n;
        let mut dict = Vec::with_capacity(term_count as usize);
        for _ in 0..term_count {
            let (term, n) = encoding::decode_from_slice::<String>(&payload[off..])?;
            off += n;
            let (df, n) = encoding::decode_from_slice::<u32>(&payload[off..])?;
            off += n;
            let (offset, n) = encoding::decode_from_slice::<u64>(&payload[off..])?;
            off += n;
            let (len, n) = encoding::decode_from_slice::<u32>(&payload[off..])?;
            off += n;
            let (crc, n) = encoding::decode_from_slice::<u32>(&payload[off..])?;
            off += n;
            dict.push(DictEntry { term, df, offset, len, crc });
        }

        // Postings, read-only after build.
        let post_file = File::open(dir.join("post"))?;
        // SAFETY: the postings file is replaced only by atomic rename and
        // never written in place; the mapping is read-only.
        let posts = unsafe { Mmap::map(&post_file)? };

        // Norms.
        let norms_bytes = std::fs::read(dir.join("norms"))?;
        let payload = unframe(&norms_bytes, SPIMI_NORMS_MAGIC)?;
        let mut off = 0usize;
        let (_, n) = encoding::decode_from_slice::<u32>(&payload[off..])?;
        off += n;
        let (_, n) = encoding::decode_from_slice::<u64>(&payload[off..])?;
        off += n;
        let (norm_count, n) = encoding::decode_from_slice::<u64>(&payload[off..])?;
        off += n;
        let mut norms = HashMap::with_capacity(norm_count as usize);
        for _ in 0..norm_count {
            let (doc, n) = encoding::decode_from_slice::<u64>(&payload[off..])?;
            off += n;
            let (norm, n) = encoding::decode_from_slice::<f64>(&payload[off..])?;
            off += n;
            norms.insert(doc, norm);
        }

        debug!(terms = dict.len(), docs = doc_count, "text index opened");

        Ok(Self {
            dir,
            language,
            doc_count,
            dict,
            bloom,
            posts,
            norms,
            delta: DeltaIndex::default(),
            tombstones: HashSet::new(),
        })
    }

    /// Total live documents across the persistent index and delta.
    pub fn live_docs(&self) -> u64 {
        self.doc_count + self.delta.docs.len() as u64 - self.tombstones.len() as u64
    }

    /// Number of documents waiting in the delta.
    pub fn delta_len(&self) -> usize {
        self.delta.docs.len()
    }

    /// Index one new document into the delta; merges into the persistent
    /// index when the delta crosses its threshold.
    pub fn insert_document(
        &mut self,
        doc_id: u64,
        fields: &[(String, String)],
        stop: &StopSignal,
    ) -> Result<(), TextIndexError> {
        let counts = SpimiBuilder::term_counts(fields, self.language);
        for (term, tf) in &counts {
            self.delta
                .postings
                .entry(term.clone())
                .or_default()
                .push((doc_id, *tf));
        }
        self.delta.docs.insert(doc_id, counts);
        self.tombstones.remove(&doc_id);
        trace!(doc_id, "text delta insert");

        if self.delta.docs.len() >= Self::DELTA_MERGE_THRESHOLD {
            self.merge_delta(stop)?;
        }
        Ok(())
    }

    /// Tombstone a document.  Consulted by every query; postings and `df`
    /// are physically dropped at the next merge.
    pub fn delete_document(&mut self, doc_id: u64) {
        if self.delta.docs.remove(&doc_id).is_some() {
            for postings in self.delta.postings.values_mut() {
                postings.retain(|(doc, _)| *doc != doc_id);
            }
            return;
        }
        self.tombstones.insert(doc_id);
    }

    /// Fold the delta into the persistent index: re-merge every term's
    /// postings, drop tombstoned documents, recompute `df` and norms, and
    /// atomically replace the artifacts.
    pub fn merge_delta(&mut self, stop: &StopSignal) -> Result<(), TextIndexError> {
        let mut merged: HashMap<String, Vec<(u64, u32)>> = HashMap::new();

        // Persistent postings, minus tombstones.
        for i in 0..self.dict.len() {
            stop.checkpoint()?;
            let postings = self.read_postings(&self.dict[i])?;
            let live: Vec<(u64, u32)> = postings
                .into_iter()
                .filter(|(doc, _)| !self.tombstones.contains(doc))
                .collect();
            if !live.is_empty() {
                merged.insert(self.dict[i].term.clone(), live);
            }
        }

        // Delta postings.
        for (term, postings) in &self.delta.postings {
            merged.entry(term.clone()).or_default().extend(postings.iter().copied());
        }

        let live_doc_count = self.live_docs();
        let mut merged: Vec<(String, Vec<(u64, u32)>)> = merged.into_iter().collect();
        merged.sort_by(|a, b| a.0.cmp(&b.0));
        for (_, postings) in merged.iter_mut() {
            postings.sort_unstable_by_key(|(doc, _)| *doc);
        }

        write_artifacts(&self.dir, live_doc_count, merged, stop)?;

        let reopened = Self::open(&self.dir, self.language)?;
        self.doc_count = reopened.doc_count;
        self.dict = reopened.dict;
        self.bloom = reopened.bloom;
        self.posts = reopened.posts;
        self.norms = reopened.norms;
        self.delta = DeltaIndex::default();
        self.tombstones.clear();

        info!(docs = self.doc_count, "text delta merged");
        Ok(())
    }

    /// Rank documents against a free-text query.  Returns up to `k`
    /// `(doc_id, score)` pairs, best first; equal scores order by doc id.
    pub fn query(
        &self,
        query: &str,
        k: usize,
        stop: &StopSignal,
    ) -> Result<Vec<(u64, f64)>, TextIndexError> {
        let tokens = tokenize_query(query, self.language);
        if tokens.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut query_tf: HashMap<String, u32> = HashMap::new();
        for token in tokens {
            *query_tf.entry(token).or_insert(0) += 1;
        }

        let n = self.live_docs();
        let mut scores: HashMap<u64, f64> = HashMap::new();

        for (term, qtf) in &query_tf {
            stop.checkpoint()?;
            let df = self.combined_df(term);
            if df == 0 {
                continue;
            }
            let idf_t = idf(n, df);
            let wq = tf_weight(*qtf) * idf_t;

            if let Some(entry) = self.dict_lookup(term) {
                for (doc, tf) in self.read_postings(entry)? {
                    if self.tombstones.contains(&doc) {
                        continue;
                    }
                    let wd = tf_weight(tf) * idf_t;
                    *scores.entry(doc).or_insert(0.0) += wq * wd;
                }
            }
            if let Some(postings) = self.delta.postings.get(term) {
                for (doc, tf) in postings {
                    let wd = tf_weight(*tf) * idf_t;
                    *scores.entry(*doc).or_insert(0.0) += wq * wd;
                }
            }
        }

        // Normalize by document length and keep the k best.
        let mut heap = TopK::new(k);
        for (doc, dot) in scores {
            let norm = self.doc_norm(doc, n);
            let score = if norm > 0.0 { dot / norm } else { 0.0 };
            heap.offer(doc, score);
        }
        Ok(heap.into_sorted())
    }

    // --------------------------------------------------------------------------------------------
    // Internals
    // --------------------------------------------------------------------------------------------

    fn dict_lookup(&self, term: &str) -> Option<&DictEntry> {
        if !self.bloom.check(&term.as_bytes().to_vec()) {
            return None;
        }
        self.dict
            .binary_search_by(|e| e.term.as_str().cmp(term))
            .ok()
            .map(|i| &self.dict[i])
    }

    fn combined_df(&self, term: &str) -> u32 {
        let persistent = self.dict_lookup(term).map_or(0, |e| e.df);
        let delta = self
            .delta
            .postings
            .get(term)
            .map_or(0, |p| p.len() as u32);
        persistent + delta
    }

    fn read_postings(&self, entry: &DictEntry) -> Result<Vec<(u64, u32)>, TextIndexError> {
        let start = entry.offset as usize;
        let end = start + entry.len as usize;
        if end > self.posts.len() {
            return Err(TextIndexError::Corrupt(format!(
                "postings for {:?} out of bounds",
                entry.term
            )));
        }
        let block = &self.posts[start..end];

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(block);
        if hasher.finalize() != entry.crc {
            return Err(TextIndexError::Corrupt(format!(
                "postings checksum mismatch for {:?}",
                entry.term
            )));
        }

        let (count, mut off) = encoding::decode_from_slice::<u32>(block)?;
        let mut postings = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (doc, n) = encoding::decode_from_slice::<u64>(&block[off..])?;
            off += n;
            let (tf, n) = encoding::decode_from_slice::<u32>(&block[off..])?;
            off += n;
            postings.push((doc, tf));
        }
        Ok(postings)
    }

    /// ‖d‖₂ — persisted for index documents, computed on the fly for
    /// delta documents (their `df` environment shifts until the merge).
    fn doc_norm(&self, doc: u64, n: u64) -> f64 {
        if let Some(norm) = self.norms.get(&doc) {
            return *norm;
        }
        let Some(counts) = self.delta.docs.get(&doc) else {
            return 0.0;
        };
        let mut norm2 = 0.0;
        for (term, tf) in counts {
            let w = tf_weight(*tf) * idf(n, self.combined_df(term));
            norm2 += w * w;
        }
        norm2.sqrt()
    }
}

// ------------------------------------------------------------------------------------------------
// Bounded top-k heap
// ------------------------------------------------------------------------------------------------

/// Bounded min-heap keeping the `k` best `(doc, score)` pairs.  Worse =
/// lower score, then higher doc id — so ties resolve to smaller ids.
pub(crate) struct TopK {
    k: usize,
    heap: std::collections::BinaryHeap<std::cmp::Reverse<ScoredDoc>>,
}

#[derive(PartialEq)]
struct ScoredDoc {
    score: f64,
    doc: u64,
}

impl Eq for ScoredDoc {}

impl PartialOrd for ScoredDoc {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredDoc {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.doc.cmp(&self.doc))
    }
}

impl TopK {
    pub(crate) fn new(k: usize) -> Self {
        Self { k, heap: std::collections::BinaryHeap::with_capacity(k + 1) }
    }

    pub(crate) fn offer(&mut self, doc: u64, score: f64) {
        self.heap.push(std::cmp::Reverse(ScoredDoc { score, doc }));
        if self.heap.len() > self.k {
            self.heap.pop();
        }
    }

    /// Drain into best-first order.
    pub(crate) fn into_sorted(self) -> Vec<(u64, f64)> {
        let mut out: Vec<(u64, f64)> = self
            .heap
            .into_iter()
            .map(|std::cmp::Reverse(s)| (s.doc, s.score))
            .collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        out
    }
}

// ------------------------------------------------------------------------------------------------
// Frame helpers
// ------------------------------------------------------------------------------------------------

pub(crate) fn frame(magic: [u8; 4], payload: &[u8]) -> Vec<u8> {
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

pub(crate) fn unframe(bytes: &[u8], magic: [u8; 4]) -> Result<&[u8], TextIndexError> {
    if bytes.len() < 12 || bytes[..4] != magic {
        return Err(TextIndexError::Corrupt("bad magic".into()));
    }
    let payload_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if bytes.len() < 8 + payload_len + 4 {
        return Err(TextIndexError::Corrupt("truncated file".into()));
    }
    let payload = &bytes[8..8 + payload_len];
    let stored_crc = u32::from_le_bytes(
        bytes[8 + payload_len..8 + payload_len + 4]
            .try_into()
            .map_err(|_| TextIndexError::Corrupt("truncated checksum".into()))?,
    );
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    if hasher.finalize() != stored_crc {
        return Err(TextIndexError::Corrupt("checksum mismatch".into()));
    }
    Ok(payload)
}
