//! Representative subsets of a point cloud
//!
//! Selection favours convex-hull vertices so that a response surface built
//! on the subset covers as much of the cloud as possible. When fewer points
//! than vertices are requested, a handful of random vertex subsets are
//! scored by how many cloud points their hull contains and the best one
//! wins. This is a heuristic approximation of maximum coverage, not an
//! optimum.

use super::hull::{count_inside, hull_vertices, normalize};
use crate::error::ValidationError;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

/// Random vertex subsets tried when fewer points than vertices are requested
pub const DEFAULT_TRIALS: usize = 10;

/// Hull-based subsampler with its own random stream
#[derive(Debug, Clone)]
pub struct Subsampler {
    trials: usize,
    rng: ChaCha20Rng,
}

impl Default for Subsampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Subsampler {
    /// Seeded from OS entropy
    pub fn new() -> Self {
        Self {
            trials: DEFAULT_TRIALS,
            rng: ChaCha20Rng::from_entropy(),
        }
    }

    /// Reproducible selection
    pub fn with_seed(seed: u64) -> Self {
        Self {
            trials: DEFAULT_TRIALS,
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    pub fn trials(mut self, trials: usize) -> Self {
        self.trials = trials.max(1);
        self
    }

    /// Indices of `n` representative points
    pub fn select(&mut self, points: &[Vec<f64>], n: usize) -> Result<Vec<usize>, ValidationError> {
        let m = points.len();
        if n == 0 || n > m {
            return Err(ValidationError::InvalidSubsampleSize {
                requested: n,
                available: m,
            });
        }
        if n == m {
            return Ok((0..m).collect());
        }

        let scaled = normalize(points);
        let vertices = hull_vertices(&scaled);
        let nv = vertices.len();
        tracing::debug!(points = m, vertices = nv, requested = n, "hull computed");

        if n == nv {
            return Ok(vertices);
        }

        if n > nv {
            let mut interior: Vec<usize> = (0..m).filter(|i| !vertices.contains(i)).collect();
            interior.shuffle(&mut self.rng);
            let mut chosen = vertices;
            chosen.extend(interior.into_iter().take(n - nv));
            return Ok(chosen);
        }

        let mut best: Option<(usize, Vec<usize>)> = None;
        for trial in 0..self.trials {
            let mut candidate = vertices.clone();
            candidate.shuffle(&mut self.rng);
            candidate.truncate(n);

            let hull: Vec<&[f64]> = candidate.iter().map(|&i| scaled[i].as_slice()).collect();
            let score = count_inside(&scaled, &hull);
            tracing::trace!(trial, score, "scored vertex subset");
            if best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, candidate));
            }
        }
        Ok(best.map(|(_, c)| c).unwrap_or_default())
    }

    /// The selected points themselves
    pub fn subsample(
        &mut self,
        points: &[Vec<f64>],
        n: usize,
    ) -> Result<Vec<Vec<f64>>, ValidationError> {
        if n == points.len() && n > 0 {
            return Ok(points.to_vec());
        }
        let picked = self.select(points, n)?;
        Ok(picked.into_iter().map(|i| points[i].clone()).collect())
    }
}

/// One-shot subsample, reproducible when `seed` is given
pub fn subsample(
    points: &[Vec<f64>],
    n: usize,
    seed: Option<u64>,
) -> Result<Vec<Vec<f64>>, ValidationError> {
    let mut sampler = match seed {
        Some(seed) => Subsampler::with_seed(seed),
        None => Subsampler::new(),
    };
    sampler.subsample(points, n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn corners() -> Vec<Vec<f64>> {
        vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![1.0, 1.0],
            vec![0.0, 1.0],
        ]
    }

    #[test]
    fn test_all_corners_returned() {
        let out = subsample(&corners(), 4, Some(1)).unwrap();
        assert_eq!(out, corners());
    }

    #[test]
    fn test_two_corners_from_square() {
        let pts = corners();
        let out = subsample(&pts, 2, Some(7)).unwrap();
        assert_eq!(out.len(), 2);
        assert_ne!(out[0], out[1]);
        assert!(out.iter().all(|p| pts.contains(p)));
    }

    #[test]
    fn test_diagonal_pair_preferred() {
        let mut pts = corners();
        pts.push(vec![0.5, 0.5]);
        let mut sampler = Subsampler::with_seed(3).trials(64);
        let picked = sampler.select(&pts, 2).unwrap();
        // only a diagonal pair also covers the centre
        let mut pair = picked.clone();
        pair.sort();
        assert!(pair == vec![0, 2] || pair == vec![1, 3], "picked {:?}", picked);
    }

    #[test]
    fn test_interior_points_fill_request() {
        let mut pts = corners();
        pts.push(vec![0.5, 0.5]);
        pts.push(vec![0.25, 0.5]);
        let picked = Subsampler::with_seed(11).select(&pts, 5).unwrap();
        assert_eq!(picked.len(), 5);
        assert_eq!(&picked[..4], &[0, 1, 2, 3]);
        assert!(picked[4] == 4 || picked[4] == 5);
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        assert!(matches!(
            subsample(&corners(), 0, Some(1)),
            Err(ValidationError::InvalidSubsampleSize { requested: 0, .. })
        ));
        assert!(matches!(
            subsample(&corners(), 5, Some(1)),
            Err(ValidationError::InvalidSubsampleSize { available: 4, .. })
        ));
    }

    #[test]
    fn test_same_seed_same_selection() {
        let pts: Vec<Vec<f64>> = (0..12)
            .map(|i| {
                let t = i as f64 * 0.5;
                vec![t.cos(), t.sin()]
            })
            .collect();
        let a = Subsampler::with_seed(42).select(&pts, 4).unwrap();
        let b = Subsampler::with_seed(42).select(&pts, 4).unwrap();
        assert_eq!(a, b);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn returns_exactly_n_points(
            pts in prop::collection::vec(prop::collection::vec(-10.0f64..10.0, 2), 1..12),
            frac in 0.0f64..=1.0,
            seed in any::<u64>(),
        ) {
            let m = pts.len();
            let n = 1 + ((m - 1) as f64 * frac) as usize;
            let out = subsample(&pts, n, Some(seed)).unwrap();
            prop_assert_eq!(out.len(), n);
            if n == m {
                prop_assert_eq!(out, pts);
            }
        }
    }
}
