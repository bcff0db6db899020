//! SPIMI construction — single-pass in-memory inversion with block
//! spill-and-merge.
//!
//! [`SpimiBuilder`] accumulates postings in memory while documents stream
//! in.  When the posting count crosses the memory budget, the block is
//! sorted by term and spilled to a numbered temporary file.  `finish`
//! performs an m-way merge of all spilled blocks into the final three
//! artifacts:
//!
//! ```text
//! spimi/post  — per-term posting blocks [(doc_id, tf)…], CRC32 each
//! spimi/norms — per-document ℓ₂ norms of the TF–IDF vectors
//! spimi/dict  — term → (df, offset, len, crc), plus a bloom over terms
//! ```
//!
//! The write order is deliberate: postings first, then norms, then the
//! dictionary — readers enter through the dictionary, so a crash anywhere
//! in the merge leaves the previous index fully intact.
//!
//! Spills happen only **between** documents, so one document's postings
//! for a term never straddle two blocks and merged `df` counts stay exact.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

use bloomfilter::Bloom;
use tracing::{debug, info};

use crate::encoding::Encode;
use crate::fs::atomic_write;
use crate::stop::StopSignal;
use crate::text::tokenizer::{Language, tokenize};
use crate::text::{
    DictEntry, SPIMI_BLOOM_FP_RATE, SPIMI_BLOOM_MIN_CAPACITY, SPIMI_DICT_MAGIC,
    SPIMI_NORMS_MAGIC, SPIMI_POST_MAGIC, SPIMI_VERSION, TextIndexError, frame,
};

/// Default in-memory posting budget before a block spills.
pub const SPIMI_DEFAULT_MEMORY_BUDGET: usize = 100_000;

// ------------------------------------------------------------------------------------------------
// SpimiBuilder
// ------------------------------------------------------------------------------------------------

/// Streaming index builder.  Feed documents, then [`SpimiBuilder::finish`].
pub struct SpimiBuilder {
    dir: PathBuf,
    language: Language,
    memory_budget: usize,
    block: HashMap<String, Vec<(u64, u32)>>,
    block_postings: usize,
    blocks: Vec<PathBuf>,
    doc_count: u64,
}

impl SpimiBuilder {
    /// Create a builder writing into the `spimi/` directory of a table.
    pub fn new(dir: impl AsRef<std::path::Path>, language: Language, memory_budget: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            language,
            memory_budget: memory_budget.max(1024),
            block: HashMap::new(),
            block_postings: 0,
            blocks: Vec::new(),
            doc_count: 0,
        }
    }

    /// Term frequencies for one document: plain tokens over the union of
    /// the designated fields, plus `field:token` variants for scoped
    /// matching.
    pub fn term_counts(
        fields: &[(String, String)],
        language: Language,
    ) -> HashMap<String, u32> {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for (name, text) in fields {
            let field = name.to_lowercase();
            for token in tokenize(text, language) {
                *counts.entry(format!("{field}:{token}")).or_insert(0) += 1;
                *counts.entry(token).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Index one document.  `doc_id` is the record's rid.
    pub fn add_document(
        &mut self,
        doc_id: u64,
        fields: &[(String, String)],
    ) -> Result<(), TextIndexError> {
        for (term, tf) in Self::term_counts(fields, self.language) {
            self.block.entry(term).or_default().push((doc_id, tf));
            self.block_postings += 1;
        }
        self.doc_count += 1;

        // Spill only at document boundaries so df stays exact.
        if self.block_postings >= self.memory_budget {
            self.spill()?;
        }
        Ok(())
    }

    /// Number of documents fed so far.
    pub fn doc_count(&self) -> u64 {
        self.doc_count
    }

    /// Sort the current block by term and write it to disk.
    fn spill(&mut self) -> Result<(), TextIndexError> {
        if self.block.is_empty() {
            return Ok(());
        }
        let path = self.dir.join(format!("block-{:06}.tmp", self.blocks.len()));
        let mut writer = BufWriter::new(File::create(&path)?);

        let mut terms: Vec<(String, Vec<(u64, u32)>)> = self.block.drain().collect();
        terms.sort_by(|a, b| a.0.cmp(&b.0));

        for (term, mut postings) in terms {
            postings.sort_unstable_by_key(|(doc, _)| *doc);
            let mut buf = Vec::new();
            term.encode_to(&mut buf)?;
            (postings.len() as u32).encode_to(&mut buf)?;
            for (doc, tf) in &postings {
                doc.encode_to(&mut buf)?;
                tf.encode_to(&mut buf)?;
            }
            writer.write_all(&buf)?;
        }
        writer.flush()?;

        debug!(block = self.blocks.len(), postings = self.block_postings, "spimi block spilled");
        self.blocks.push(path);
        self.block_postings = 0;
        Ok(())
    }

    /// Spill the final block and m-way merge everything into the
    /// persistent artifacts.
    pub fn finish(mut self, stop: &StopSignal) -> Result<(), TextIndexError> {
        self.spill()?;

        let mut readers = Vec::with_capacity(self.blocks.len());
        for path in &self.blocks {
            readers.push(BlockReader::open(path)?);
        }

        let merged = merge_blocks(readers, stop)?;
        write_artifacts(&self.dir, self.doc_count, merged, stop)?;

        for path in &self.blocks {
            let _ = fs::remove_file(path);
        }
        info!(docs = self.doc_count, blocks = self.blocks.len(), "spimi index built");
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Block reader
// ------------------------------------------------------------------------------------------------

/// Streams `(term, postings)` groups out of one spilled block.
struct BlockReader {
    reader: BufReader<File>,
    /// Lookahead group, already decoded.
    head: Option<(String, Vec<(u64, u32)>)>,
}

impl BlockReader {
    fn open(path: &PathBuf) -> Result<Self, TextIndexError> {
        let mut reader = Self { reader: BufReader::new(File::open(path)?), head: None };
        reader.advance()?;
        Ok(reader)
    }

    fn advance(&mut self) -> Result<(), TextIndexError> {
        self.head = self.read_group()?;
        Ok(())
    }

    fn read_group(&mut self) -> Result<Option<(String, Vec<(u64, u32)>)>, TextIndexError> {
        let Some(term_len) = self.try_read_u32()? else {
            return Ok(None);
        };
        let mut term_bytes = vec![0u8; term_len as usize];
        self.reader.read_exact(&mut term_bytes)?;
        let term = String::from_utf8(term_bytes)
            .map_err(|_| TextIndexError::Corrupt("block term is not UTF-8".into()))?;

        let count = self.read_u32()?;
        let mut postings = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut buf = [0u8; 12];
            self.reader.read_exact(&mut buf)?;
            let doc = u64::from_le_bytes(buf[..8].try_into().unwrap_or_default());
            let tf = u32::from_le_bytes(buf[8..].try_into().unwrap_or_default());
            postings.push((doc, tf));
        }
        Ok(Some((term, postings)))
    }

    /// Read a u32, returning `None` at a clean end-of-file.
    fn try_read_u32(&mut self) -> Result<Option<u32>, TextIndexError> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < 4 {
            let n = self.reader.read(&mut buf[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(TextIndexError::Corrupt("block truncated mid-header".into()));
            }
            filled += n;
        }
        Ok(Some(u32::from_le_bytes(buf)))
    }

    fn read_u32(&mut self) -> Result<u32, TextIndexError> {
        let mut buf = [0u8; 4];
        self.reader.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }
}

/// m-way merge: repeatedly take the smallest head term across blocks and
/// concatenate its postings.
fn merge_blocks(
    mut readers: Vec<BlockReader>,
    stop: &StopSignal,
) -> Result<Vec<(String, Vec<(u64, u32)>)>, TextIndexError> {
    let mut merged = Vec::new();
    loop {
        stop.checkpoint()?;
        let Some(smallest) = readers
            .iter()
            .filter_map(|r| r.head.as_ref().map(|(t, _)| t.clone()))
            .min()
        else {
            break;
        };

        let mut postings: Vec<(u64, u32)> = Vec::new();
        for reader in readers.iter_mut() {
            while let Some((term, _)) = &reader.head {
                if *term != smallest {
                    break;
                }
                let (_, mut group) = reader
                    .head
                    .take()
                    .unwrap_or_else(|| unreachable!("head checked above"));
                postings.append(&mut group);
                reader.advance()?;
            }
        }
        postings.sort_unstable_by_key(|(doc, _)| *doc);
        merged.push((smallest, postings));
    }
    Ok(merged)
}

// ------------------------------------------------------------------------------------------------
// Artifact writing (shared with delta merges)
// ------------------------------------------------------------------------------------------------

/// Write `post`, `norms` and `dict` from fully merged postings.
///
/// Also used by [`TextIndex::merge_delta`](crate::text::TextIndex) when
/// folding the in-memory delta into the persistent index.
pub(crate) fn write_artifacts(
    dir: &std::path::Path,
    doc_count: u64,
    merged: Vec<(String, Vec<(u64, u32)>)>,
    stop: &StopSignal,
) -> Result<(), TextIndexError> {
    // 1. Postings file, committed through the same atomic pattern as the
    //    other artifacts so the rename is durable across a crash.
    let mut header = Vec::new();
    SPIMI_VERSION.encode_to(&mut header)?;
    let mut post_bytes = frame(SPIMI_POST_MAGIC, &header);

    let mut dict: Vec<DictEntry> = Vec::with_capacity(merged.len());
    let mut norms2: HashMap<u64, f64> = HashMap::new();

    for (term, postings) in &merged {
        stop.checkpoint()?;
        let df = postings.len() as u32;
        let idf = idf(doc_count, df);

        let mut block = Vec::new();
        (postings.len() as u32).encode_to(&mut block)?;
        for (doc, tf) in postings {
            doc.encode_to(&mut block)?;
            tf.encode_to(&mut block)?;
            let w = tf_weight(*tf) * idf;
            *norms2.entry(*doc).or_insert(0.0) += w * w;
        }

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&block);
        dict.push(DictEntry {
            term: term.clone(),
            df,
            offset: post_bytes.len() as u64,
            len: block.len() as u32,
            crc: hasher.finalize(),
        });
        post_bytes.extend_from_slice(&block);
    }
    atomic_write(dir.join("post").as_path(), &post_bytes)?;

    // 2. Norms file.
    let mut norms_payload = Vec::new();
    SPIMI_VERSION.encode_to(&mut norms_payload)?;
    doc_count.encode_to(&mut norms_payload)?;
    let mut norm_entries: Vec<(u64, f64)> =
        norms2.into_iter().map(|(doc, n2)| (doc, n2.sqrt())).collect();
    norm_entries.sort_unstable_by_key(|(doc, _)| *doc);
    (norm_entries.len() as u64).encode_to(&mut norms_payload)?;
    for (doc, norm) in &norm_entries {
        doc.encode_to(&mut norms_payload)?;
        norm.encode_to(&mut norms_payload)?;
    }
    atomic_write(dir.join("norms").as_path(), &frame(SPIMI_NORMS_MAGIC, &norms_payload))?;

    // 3. Dictionary, last: readers enter here.
    let mut bloom = Bloom::new_for_fp_rate(
        SPIMI_BLOOM_MIN_CAPACITY.max(dict.len() * 2),
        SPIMI_BLOOM_FP_RATE,
    )
    .map_err(|e| TextIndexError::Corrupt(format!("bloom sizing: {e}")))?;
    for entry in &dict {
        bloom.set(&entry.term.clone().into_bytes());
    }

    let mut dict_payload = Vec::new();
    SPIMI_VERSION.encode_to(&mut dict_payload)?;
    doc_count.encode_to(&mut dict_payload)?;
    bloom.as_slice().to_vec().encode_to(&mut dict_payload)?;
    (dict.len() as u64).encode_to(&mut dict_payload)?;
    for entry in &dict {
        entry.term.encode_to(&mut dict_payload)?;
        entry.df.encode_to(&mut dict_payload)?;
        entry.offset.encode_to(&mut dict_payload)?;
        entry.len.encode_to(&mut dict_payload)?;
        entry.crc.encode_to(&mut dict_payload)?;
    }
    atomic_write(dir.join("dict").as_path(), &frame(SPIMI_DICT_MAGIC, &dict_payload))?;

    Ok(())
}

/// `(1 + log tf)` term-frequency damping.
pub(crate) fn tf_weight(tf: u32) -> f64 {
    1.0 + f64::from(tf).ln()
}

/// `log(N/df)`, clamped non-negative.
pub(crate) fn idf(doc_count: u64, df: u32) -> f64 {
    if df == 0 || doc_count == 0 {
        return 0.0;
    }
    (doc_count as f64 / f64::from(df)).ln().max(0.0)
}
