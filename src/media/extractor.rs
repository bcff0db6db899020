//! Feature extractor contract.
//!
//! The multimedia index is extractor-agnostic: it consumes descriptor
//! vectors and never inspects the asset itself.  An extractor's identity
//! (name, version, parameters) is recorded in the table metadata; queries
//! carrying a different identity are rejected rather than silently scored
//! in an incompatible space.
//!
//! Two reference extractors ship with the engine so multimedia tables work
//! out of the box without native dependencies.  Production deployments
//! register real image/audio extractors under their own method names.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::MediaIndexError;

/// Descriptor output of one asset.
pub enum Descriptors {
    /// A set of local descriptors (e.g. 128-D keypoint vectors); goes
    /// through the codebook.
    Local(Vec<Vec<f32>>),
    /// One pooled global vector; the codebook is the identity.
    Global(Vec<f32>),
}

/// Supplier of descriptor vectors for asset files.
pub trait FeatureExtractor: Send + Sync {
    /// Canonical identity: `name/version;params`.  Stored in table
    /// metadata and matched on every query.
    fn id(&self) -> String;

    /// Produce descriptors for the asset at `path`.
    fn extract(&self, path: &Path) -> Result<Descriptors, MediaIndexError>;
}

// ------------------------------------------------------------------------------------------------
// Reference extractors
// ------------------------------------------------------------------------------------------------

/// Global 256-bin byte-value histogram of the file, ℓ₁-scaled.
///
/// Content-deterministic and format-blind; a stand-in for pooled CNN or
/// MFCC-statistics vectors.
pub struct ByteHistogramExtractor;

impl FeatureExtractor for ByteHistogramExtractor {
    fn id(&self) -> String {
        "byte-histogram/1".to_string()
    }

    fn extract(&self, path: &Path) -> Result<Descriptors, MediaIndexError> {
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Err(MediaIndexError::Extractor(format!(
                "empty asset file {:?}",
                path.display()
            )));
        }
        let mut hist = vec![0.0f32; 256];
        for b in &bytes {
            hist[*b as usize] += 1.0;
        }
        let total = bytes.len() as f32;
        for v in hist.iter_mut() {
            *v /= total;
        }
        Ok(Descriptors::Global(hist))
    }
}

/// Local descriptors from disjoint byte windows, scaled to `[0, 1]`.
///
/// Each window of `WINDOW` bytes becomes one descriptor; short files
/// produce a single zero-padded window.  A stand-in for keypoint
/// descriptors, exercising the full codebook path.
pub struct ByteWindowExtractor;

const WINDOW: usize = 16;

impl FeatureExtractor for ByteWindowExtractor {
    fn id(&self) -> String {
        format!("byte-window/1;w={WINDOW}")
    }

    fn extract(&self, path: &Path) -> Result<Descriptors, MediaIndexError> {
        let bytes = std::fs::read(path)?;
        if bytes.is_empty() {
            return Err(MediaIndexError::Extractor(format!(
                "empty asset file {:?}",
                path.display()
            )));
        }
        let mut descriptors = Vec::with_capacity(bytes.len().div_ceil(WINDOW));
        for chunk in bytes.chunks(WINDOW) {
            let mut v = vec![0.0f32; WINDOW];
            for (slot, b) in v.iter_mut().zip(chunk) {
                *slot = f32::from(*b) / 255.0;
            }
            descriptors.push(v);
        }
        Ok(Descriptors::Local(descriptors))
    }
}

/// The built-in method table: method name → extractor.
pub fn default_extractors() -> HashMap<String, Arc<dyn FeatureExtractor>> {
    let mut map: HashMap<String, Arc<dyn FeatureExtractor>> = HashMap::new();
    map.insert("histogram".to_string(), Arc::new(ByteHistogramExtractor));
    map.insert("bow".to_string(), Arc::new(ByteWindowExtractor));
    map
}
