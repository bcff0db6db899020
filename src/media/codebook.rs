//! Codebook training — k-means over sampled descriptors.
//!
//! The codebook maps local descriptors to discrete visual/acoustic words.
//! It is trained **once** at table build time over a bounded random sample
//! and never refitted; adding or removing assets only re-assigns against
//! the frozen centroids.

use rand::Rng;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::stop::StopSignal;

/// Lloyd iterations; assignments stabilize quickly on descriptor data.
const KMEANS_ITERATIONS: usize = 10;

/// Squared euclidean distance between two descriptors.
fn distance2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of the centroid nearest to `v`.  Ties resolve to the lower
/// index, so assignment is deterministic.
pub fn nearest(centroids: &[Vec<f32>], v: &[f32]) -> usize {
    let mut best = 0;
    let mut best_d = f32::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = distance2(c, v);
        if d < best_d {
            best = i;
            best_d = d;
        }
    }
    best
}

/// Train `k` centroids over the sample with Lloyd's algorithm.
///
/// Fewer distinct samples than `k` yields fewer centroids; empty clusters
/// are reseeded from a random sample point.
pub fn train(
    sample: &[Vec<f32>],
    k: usize,
    rng: &mut StdRng,
    stop: &StopSignal,
) -> Result<Vec<Vec<f32>>, std::io::Error> {
    let k = k.min(sample.len()).max(1);
    let dim = sample.first().map_or(0, Vec::len);

    // Initial centroids: k distinct random sample points.
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    let mut chosen = std::collections::HashSet::new();
    while centroids.len() < k {
        let i = rng.random_range(0..sample.len());
        if chosen.insert(i) {
            centroids.push(sample[i].clone());
        }
    }

    let mut assignment = vec![0usize; sample.len()];
    for iteration in 0..KMEANS_ITERATIONS {
        stop.checkpoint()?;

        let mut moved = false;
        for (i, v) in sample.iter().enumerate() {
            let c = nearest(&centroids, v);
            if assignment[i] != c {
                assignment[i] = c;
                moved = true;
            }
        }
        if !moved && iteration > 0 {
            debug!(iteration, "kmeans converged early");
            break;
        }

        // Recompute means; reseed clusters that lost every member.
        let mut sums = vec![vec![0.0f32; dim]; k];
        let mut counts = vec![0usize; k];
        for (i, v) in sample.iter().enumerate() {
            let c = assignment[i];
            counts[c] += 1;
            for (s, x) in sums[c].iter_mut().zip(v) {
                *s += x;
            }
        }
        for c in 0..k {
            if counts[c] == 0 {
                centroids[c] = sample[rng.random_range(0..sample.len())].clone();
                continue;
            }
            for (s, out) in sums[c].iter().zip(centroids[c].iter_mut()) {
                *out = s / counts[c] as f32;
            }
        }
    }

    info!(k, dim, sample = sample.len(), "codebook trained");
    Ok(centroids)
}
