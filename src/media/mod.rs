//! # Multimedia Index
//!
//! Content-similarity retrieval over image/audio assets through a
//! **bag-of-visual/acoustic-words** model:
//!
//! 1. An external [`extractor::FeatureExtractor`] turns each asset into
//!    descriptor vectors (local sets) or one global vector.
//! 2. For local descriptors, a k-means [`codebook`] trained over a bounded
//!    random sample maps each descriptor to a word; the per-asset word
//!    counts form an ℓ₂-normalized histogram.  For global vectors the
//!    histogram is the vector itself (identity codebook).
//! 3. Histograms are idf-weighted (trained mode), re-normalized, and
//!    indexed both as dense vectors (exhaustive kNN) and as an inverted
//!    file `word → [(asset, weight)]` (candidate-pruned kNN).
//!
//! Both kNN paths score the same normalized weighted vectors, so the
//! inverted path returns exactly the exhaustive ranking: cosine is zero on
//! disjoint supports, and assets sharing no word with the query are
//! appended at score zero in ascending id order.
//!
//! ## Artifacts (per table, under `mm/`)
//!
//! | File | Contents |
//! |------|----------|
//! | `codebook` | extractor identity, mode, centroids — immutable after build |
//! | `hist` | raw ℓ₂-normalized histogram per asset |
//! | `inv` | idf table, inverted file, per-asset norms |
//!
//! Removing an asset never retrains the codebook; `idf` and the inverted
//! file are recomputed from the surviving histograms.

pub mod codebook;
pub mod extractor;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::encoding::{self, Encode};
use crate::fs::atomic_write;
use crate::stop::StopSignal;
use crate::text::TopK;
use extractor::{Descriptors, FeatureExtractor};

const MM_CODEBOOK_MAGIC: [u8; 4] = *b"MMC1";
const MM_HIST_MAGIC: [u8; 4] = *b"MMH1";
const MM_INV_MAGIC: [u8; 4] = *b"MMI1";
const MM_VERSION: u32 = 1;

/// Default codebook size.
pub const MM_DEFAULT_CLUSTERS: u32 = 256;

/// Cap on descriptors sampled for codebook training.
const MM_SAMPLE_CAP: usize = 50_000;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by the multimedia index.
#[derive(Debug, Error)]
pub enum MediaIndexError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding / decoding error in a persisted artifact.
    #[error("Encoding error: {0}")]
    Encoding(#[from] encoding::EncodingError),

    /// A persisted artifact failed validation.
    #[error("Corrupt media index: {0}")]
    Corrupt(String),

    /// The extractor failed on an asset.
    #[error("Extractor error: {0}")]
    Extractor(String),

    /// A query descriptor came from a different extractor than the one
    /// the table was built with.
    #[error("extractor mismatch: table built with {expected:?}, query used {actual:?}")]
    ExtractorMismatch {
        /// Identity recorded at build time.
        expected: String,
        /// Identity offered by the query.
        actual: String,
    },

    /// Descriptor dimensionality differs from the codebook's.
    #[error("descriptor dimension {actual} does not match index dimension {expected}")]
    DimensionMismatch {
        /// Dimension the index was built with.
        expected: usize,
        /// Dimension offered now.
        actual: usize,
    },
}

// ------------------------------------------------------------------------------------------------
// Modes
// ------------------------------------------------------------------------------------------------

/// How descriptors map to histogram words.
enum CodebookMode {
    /// Global-vector extractors: the histogram is the vector itself and
    /// idf weighting is skipped (every dimension is dense by nature).
    Identity { dim: usize },
    /// Local-descriptor extractors: nearest-centroid assignment over the
    /// trained, frozen centroids.
    Trained { centroids: Vec<Vec<f32>> },
}

impl CodebookMode {
    fn words(&self) -> usize {
        match self {
            CodebookMode::Identity { dim } => *dim,
            CodebookMode::Trained { centroids } => centroids.len(),
        }
    }
}

/// kNN evaluation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnnMethod {
    /// Score every asset.
    Sequential,
    /// Enumerate only assets sharing a non-zero word with the query.
    Inverted,
}

// ------------------------------------------------------------------------------------------------
// MediaIndex
// ------------------------------------------------------------------------------------------------

/// Bag-of-words similarity index over multimedia assets.
pub struct MediaIndex {
    dir: PathBuf,
    extractor_id: String,
    clusters: u32,
    mode: CodebookMode,
    /// asset → raw ℓ₂-normalized histogram.
    histograms: BTreeMap<u64, Vec<f32>>,
    /// Derived: per-word idf (all 1.0 in identity mode).
    idf: Vec<f32>,
    /// Derived: asset → idf-weighted, re-normalized vector.
    weighted: BTreeMap<u64, Vec<f32>>,
    /// Derived: word → [(asset, weighted component)], assets ascending.
    inverted: Vec<Vec<(u64, f32)>>,
    /// Derived: ‖h‖₂ of the weighted vector before re-normalization.
    norms: BTreeMap<u64, f64>,
}

impl MediaIndex {
    /// Build from assets: extract, train the codebook (local mode), build
    /// histograms and the inverted file, persist everything.
    pub fn build(
        dir: impl AsRef<Path>,
        extractor: &dyn FeatureExtractor,
        assets: &[(u64, String)],
        clusters: u32,
        seed: u64,
        stop: &StopSignal,
    ) -> Result<Self, MediaIndexError> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        // 1. Extract every asset.
        let mut extracted: Vec<(u64, Descriptors)> = Vec::with_capacity(assets.len());
        for (asset_id, path) in assets {
            stop.checkpoint()?;
            extracted.push((*asset_id, extractor.extract(Path::new(path))?));
        }

        // 2. Decide the mode from the first asset; verify the rest agree.
        let mode = match extracted.first() {
            None | Some((_, Descriptors::Global(_))) => {
                let dim = match extracted.first() {
                    Some((_, Descriptors::Global(v))) => v.len(),
                    _ => 0,
                };
                CodebookMode::Identity { dim }
            }
            Some((_, Descriptors::Local(_))) => {
                let mut rng = StdRng::seed_from_u64(seed);
                let sample = sample_descriptors(&extracted, MM_SAMPLE_CAP, &mut rng);
                if sample.is_empty() {
                    return Err(MediaIndexError::Extractor(
                        "no descriptors to train a codebook on".into(),
                    ));
                }
                let centroids = codebook::train(&sample, clusters as usize, &mut rng, stop)?;
                CodebookMode::Trained { centroids }
            }
        };

        // 3. Histograms.
        let mut index = Self {
            dir,
            extractor_id: extractor.id(),
            clusters,
            mode,
            histograms: BTreeMap::new(),
            idf: Vec::new(),
            weighted: BTreeMap::new(),
            inverted: Vec::new(),
            norms: BTreeMap::new(),
        };
        for (asset_id, descriptors) in &extracted {
            let hist = index.histogram(descriptors)?;
            index.histograms.insert(*asset_id, hist);
        }

        index.rebuild_derived();
        index.save_codebook()?;
        index.save_state()?;
        info!(
            assets = assets.len(),
            words = index.mode.words(),
            extractor = %index.extractor_id,
            "media index built"
        );
        Ok(index)
    }

    /// Open the persisted artifacts.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, MediaIndexError> {
        let dir = dir.as_ref().to_path_buf();

        // Codebook — mmap'd read-only; it never changes after build.
        let file = std::fs::File::open(dir.join("codebook"))?;
        // SAFETY: written once at build, replaced never; read-only map.
        let map = unsafe { Mmap::map(&file)? };
        let payload = unframe(&map, MM_CODEBOOK_MAGIC)?;
        let mut off = 0usize;
        let (version, n) = encoding::decode_from_slice::<u32>(&payload[off..])?;
        off += n;
        if version != MM_VERSION {
            return Err(MediaIndexError::Corrupt(format!("codebook version {version}")));
        }
        let (extractor_id, n) = encoding::decode_from_slice::<String>(&payload[off..])?;
        off += n;
        let (clusters, n) = encoding::decode_from_slice::<u32>(&payload[off..])?;
        off += n;
        let (tag, n) = encoding::decode_from_slice::<u8>(&payload[off..])?;
        off += n;
        let mode = match tag {
            0 => {
                let (dim, n) = encoding::decode_from_slice::<u64>(&payload[off..])?;
                off += n;
                CodebookMode::Identity { dim: dim as usize }
            }
            1 => {
                let (count, n) = encoding::decode_from_slice::<u64>(&payload[off..])?;
                off += n;
                let mut centroids = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let (c, n) = encoding::decode_from_slice::<Vec<f32>>(&payload[off..])?;
                    off += n;
                    centroids.push(c);
                }
                CodebookMode::Trained { centroids }
            }
            other => {
                return Err(MediaIndexError::Corrupt(format!("codebook mode tag {other}")));
            }
        };

        // Histograms.
        let hist_bytes = std::fs::read(dir.join("hist"))?;
        let payload = unframe(&hist_bytes, MM_HIST_MAGIC)?;
        let mut off = 4usize; // version
        let (count, n) = encoding::decode_from_slice::<u64>(&payload[off..])?;
        off += n;
        let mut histograms = BTreeMap::new();
        for _ in 0..count {
            let (asset, n) = encoding::decode_from_slice::<u64>(&payload[off..])?;
            off += n;
            let (hist, n) = encoding::decode_from_slice::<Vec<f32>>(&payload[off..])?;
            off += n;
            histograms.insert(asset, hist);
        }

        let mut index = Self {
            dir,
            extractor_id,
            clusters,
            mode,
            histograms,
            idf: Vec::new(),
            weighted: BTreeMap::new(),
            inverted: Vec::new(),
            norms: BTreeMap::new(),
        };
        // The inverted artifact is derivable; recomputing on open keeps it
        // consistent with the histograms even if `inv` lagged a crash.
        index.rebuild_derived();
        debug!(assets = index.histograms.len(), "media index opened");
        Ok(index)
    }

    /// Extractor identity recorded at build time.
    pub fn extractor_id(&self) -> &str {
        &self.extractor_id
    }

    /// Number of indexed assets.
    pub fn len(&self) -> usize {
        self.histograms.len()
    }

    /// Whether no assets are indexed.
    pub fn is_empty(&self) -> bool {
        self.histograms.is_empty()
    }

    /// Index one new asset through the frozen codebook.
    pub fn insert_asset(
        &mut self,
        asset_id: u64,
        extractor: &dyn FeatureExtractor,
        path: &str,
    ) -> Result<(), MediaIndexError> {
        self.check_extractor(extractor)?;
        let descriptors = extractor.extract(Path::new(path))?;
        let hist = self.histogram(&descriptors)?;
        self.histograms.insert(asset_id, hist);
        self.rebuild_derived();
        self.save_state()?;
        trace!(asset_id, "media asset indexed");
        Ok(())
    }

    /// Remove an asset.  The codebook is not retrained.
    pub fn remove_asset(&mut self, asset_id: u64) -> Result<bool, MediaIndexError> {
        let existed = self.histograms.remove(&asset_id).is_some();
        if existed {
            self.rebuild_derived();
            self.save_state()?;
        }
        Ok(existed)
    }

    /// Rank assets by similarity to the asset at `path`.
    pub fn query(
        &self,
        extractor: &dyn FeatureExtractor,
        path: &str,
        k: usize,
        method: KnnMethod,
        stop: &StopSignal,
    ) -> Result<Vec<(u64, f64)>, MediaIndexError> {
        self.check_extractor(extractor)?;
        let descriptors = extractor.extract(Path::new(path))?;
        let query = self.weight(&self.histogram(&descriptors)?);
        match method {
            KnnMethod::Sequential => self.knn_sequential(&query, k, stop),
            KnnMethod::Inverted => self.knn_inverted(&query, k, stop),
        }
    }

    /// Exhaustive cosine kNN over every indexed asset, fanned out across
    /// worker threads.
    pub fn knn_sequential(
        &self,
        query: &[f32],
        k: usize,
        stop: &StopSignal,
    ) -> Result<Vec<(u64, f64)>, MediaIndexError> {
        let entries: Vec<(&u64, &Vec<f32>)> = self.weighted.iter().collect();
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
            .min(8)
            .max(1);
        let chunk = entries.len().div_ceil(workers).max(1);

        let partials: Vec<Vec<(u64, f64)>> = crossbeam::thread::scope(|scope| {
            let mut handles = Vec::new();
            for piece in entries.chunks(chunk) {
                handles.push(scope.spawn(move |_| {
                    piece
                        .iter()
                        .map(|(asset, vec)| (**asset, dot(query, vec)))
                        .collect::<Vec<(u64, f64)>>()
                }));
            }
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_default())
                .collect()
        })
        .map_err(|_| MediaIndexError::Extractor("scoring worker panicked".into()))?;

        stop.checkpoint()?;
        let mut heap = TopK::new(k);
        for partial in partials {
            for (asset, score) in partial {
                heap.offer(asset, score);
            }
        }
        Ok(heap.into_sorted())
    }

    /// Inverted-file kNN: accumulate scores only for assets sharing at
    /// least one non-zero word with the query, then pad with zero-score
    /// assets so the ranking matches the exhaustive path exactly.
    pub fn knn_inverted(
        &self,
        query: &[f32],
        k: usize,
        stop: &StopSignal,
    ) -> Result<Vec<(u64, f64)>, MediaIndexError> {
        let mut scores: BTreeMap<u64, f64> = BTreeMap::new();
        for (word, q) in query.iter().enumerate() {
            if *q == 0.0 || word >= self.inverted.len() {
                continue;
            }
            stop.checkpoint()?;
            for (asset, component) in &self.inverted[word] {
                *scores.entry(*asset).or_insert(0.0) += f64::from(*q) * f64::from(*component);
            }
        }

        let mut heap = TopK::new(k);
        for (asset, score) in &scores {
            heap.offer(*asset, *score);
        }
        // Cosine is zero on disjoint supports; non-enumerated assets rank
        // at zero, in ascending id order, exactly as the exhaustive path
        // would place them.
        if scores.len() < k {
            for asset in self.weighted.keys() {
                if !scores.contains_key(asset) {
                    heap.offer(*asset, 0.0);
                }
            }
        }
        Ok(heap.into_sorted())
    }

    // --------------------------------------------------------------------------------------------
    // Vector plumbing
    // --------------------------------------------------------------------------------------------

    fn check_extractor(&self, extractor: &dyn FeatureExtractor) -> Result<(), MediaIndexError> {
        if extractor.id() != self.extractor_id {
            return Err(MediaIndexError::ExtractorMismatch {
                expected: self.extractor_id.clone(),
                actual: extractor.id(),
            });
        }
        Ok(())
    }

    /// Raw ℓ₂-normalized histogram of one asset.
    fn histogram(&self, descriptors: &Descriptors) -> Result<Vec<f32>, MediaIndexError> {
        let words = self.mode.words();
        match (&self.mode, descriptors) {
            (CodebookMode::Identity { dim }, Descriptors::Global(v)) => {
                if v.len() != *dim {
                    return Err(MediaIndexError::DimensionMismatch {
                        expected: *dim,
                        actual: v.len(),
                    });
                }
                Ok(l2_normalize(v.clone()))
            }
            (CodebookMode::Trained { centroids }, Descriptors::Local(set)) => {
                let dim = centroids.first().map_or(0, Vec::len);
                let mut hist = vec![0.0f32; words];
                for d in set {
                    if d.len() != dim {
                        return Err(MediaIndexError::DimensionMismatch {
                            expected: dim,
                            actual: d.len(),
                        });
                    }
                    hist[codebook::nearest(centroids, d)] += 1.0;
                }
                Ok(l2_normalize(hist))
            }
            (CodebookMode::Identity { .. }, Descriptors::Local(_)) => {
                Err(MediaIndexError::Extractor(
                    "index was built on global vectors but the extractor produced local descriptors"
                        .into(),
                ))
            }
            (CodebookMode::Trained { .. }, Descriptors::Global(_)) => {
                Err(MediaIndexError::Extractor(
                    "index was built on local descriptors but the extractor produced a global vector"
                        .into(),
                ))
            }
        }
    }

    /// idf-weight and re-normalize a raw histogram.
    fn weight(&self, hist: &[f32]) -> Vec<f32> {
        let weighted: Vec<f32> = hist
            .iter()
            .enumerate()
            .map(|(w, v)| v * self.idf.get(w).copied().unwrap_or(1.0))
            .collect();
        l2_normalize(weighted)
    }

    /// Recompute idf, weighted vectors, the inverted file and norms from
    /// the raw histograms.
    fn rebuild_derived(&mut self) {
        let words = self.mode.words();
        let n = self.histograms.len() as f64;

        self.idf = match self.mode {
            // Dense global vectors: idf over dimensions is meaningless.
            CodebookMode::Identity { .. } => vec![1.0; words],
            CodebookMode::Trained { .. } => {
                let mut df = vec![0u64; words];
                for hist in self.histograms.values() {
                    for (w, v) in hist.iter().enumerate() {
                        if *v != 0.0 {
                            df[w] += 1;
                        }
                    }
                }
                df.iter()
                    .map(|d| {
                        if *d == 0 {
                            0.0
                        } else {
                            ((n / *d as f64).ln().max(0.0)) as f32
                        }
                    })
                    .collect()
            }
        };

        self.weighted.clear();
        self.norms.clear();
        self.inverted = vec![Vec::new(); words];
        for (asset, hist) in &self.histograms {
            let raw: Vec<f32> = hist
                .iter()
                .enumerate()
                .map(|(w, v)| v * self.idf[w])
                .collect();
            let norm = raw.iter().map(|v| f64::from(*v) * f64::from(*v)).sum::<f64>().sqrt();
            let vec = l2_normalize(raw);
            for (w, v) in vec.iter().enumerate() {
                if *v != 0.0 {
                    self.inverted[w].push((*asset, *v));
                }
            }
            self.norms.insert(*asset, norm);
            self.weighted.insert(*asset, vec);
        }
    }

    // --------------------------------------------------------------------------------------------
    // Persistence
    // --------------------------------------------------------------------------------------------

    fn save_codebook(&self) -> Result<(), MediaIndexError> {
        let mut payload = Vec::new();
        MM_VERSION.encode_to(&mut payload)?;
        self.extractor_id.encode_to(&mut payload)?;
        self.clusters.encode_to(&mut payload)?;
        match &self.mode {
            CodebookMode::Identity { dim } => {
                0u8.encode_to(&mut payload)?;
                (*dim as u64).encode_to(&mut payload)?;
            }
            CodebookMode::Trained { centroids } => {
                1u8.encode_to(&mut payload)?;
                (centroids.len() as u64).encode_to(&mut payload)?;
                for c in centroids {
                    c.encode_to(&mut payload)?;
                }
            }
        }
        atomic_write(&self.dir.join("codebook"), &frame(MM_CODEBOOK_MAGIC, &payload))?;
        Ok(())
    }

    /// Persist histograms and the derived inverted file.
    fn save_state(&self) -> Result<(), MediaIndexError> {
        let mut payload = Vec::new();
        MM_VERSION.encode_to(&mut payload)?;
        (self.histograms.len() as u64).encode_to(&mut payload)?;
        for (asset, hist) in &self.histograms {
            asset.encode_to(&mut payload)?;
            hist.encode_to(&mut payload)?;
        }
        atomic_write(&self.dir.join("hist"), &frame(MM_HIST_MAGIC, &payload))?;

        let mut payload = Vec::new();
        MM_VERSION.encode_to(&mut payload)?;
        self.idf.encode_to(&mut payload)?;
        (self.inverted.len() as u64).encode_to(&mut payload)?;
        for postings in &self.inverted {
            (postings.len() as u64).encode_to(&mut payload)?;
            for (asset, component) in postings {
                asset.encode_to(&mut payload)?;
                component.encode_to(&mut payload)?;
            }
        }
        (self.norms.len() as u64).encode_to(&mut payload)?;
        for (asset, norm) in &self.norms {
            asset.encode_to(&mut payload)?;
            norm.encode_to(&mut payload)?;
        }
        atomic_write(&self.dir.join("inv"), &frame(MM_INV_MAGIC, &payload))?;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Helpers
// ------------------------------------------------------------------------------------------------

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum()
}

fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x = (f64::from(*x) / norm) as f32;
        }
    }
    v
}

/// Bounded random sample of descriptors across all assets.
fn sample_descriptors(
    extracted: &[(u64, Descriptors)],
    cap: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f32>> {
    let mut all: Vec<&Vec<f32>> = Vec::new();
    for (_, d) in extracted {
        if let Descriptors::Local(set) = d {
            all.extend(set.iter());
        }
    }
    if all.len() <= cap {
        return all.into_iter().cloned().collect();
    }
    let mut sample = Vec::with_capacity(cap);
    for _ in 0..cap {
        sample.push(all[rng.random_range(0..all.len())].clone());
    }
    sample
}

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

fn unframe(bytes: &[u8], magic: [u8; 4]) -> Result<&[u8], MediaIndexError> {
    if bytes.len() < 12 || bytes[..4] != magic {
        return Err(MediaIndexError::Corrupt("bad magic".into()));
    }
    let payload_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    if bytes.len() < 8 + payload_len + 4 {
        return Err(MediaIndexError::Corrupt("truncated file".into()));
    }
    let payload = &bytes[8..8 + payload_len];
    let stored_crc = u32::from_le_bytes(
        bytes[8 + payload_len..8 + payload_len + 4]
            .try_into()
            .map_err(|_| MediaIndexError::Corrupt("truncated checksum".into()))?,
    );
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    if hasher.finalize() != stored_crc {
        return Err(MediaIndexError::Corrupt("checksum mismatch".into()));
    }
    Ok(payload)
}
