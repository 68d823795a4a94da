//! K-means clustering used to seed mixture training.
//!
//! Training only needs the [`Clusterer`] interface; [`KMeans`] is the
//! built-in implementation (k-means++ seeding followed by Lloyd iterations).

use crate::{
    config::KMeansConfig,
    errors::{validate_count, validate_data_length, validate_shape, GmmError, GmmResult},
};
use nalgebra::DMatrix;
use rand::distributions::{Distribution, WeightedIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Centers and hard assignments returned by a clusterer.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    /// n × d cluster centers
    pub centers: DMatrix<f64>,
    /// Cluster index of each data point
    pub assignments: Vec<usize>,
}

impl Clustering {
    /// Checks the result against the requested shape.
    pub fn validate(&self, n: usize, d: usize, nx: usize) -> GmmResult<()> {
        validate_shape(&self.centers, (n, d), "cluster centers")?;
        if self.assignments.len() != nx {
            return Err(GmmError::DimensionMismatch {
                operation: "cluster assignments".to_string(),
                expected: nx,
                actual: self.assignments.len(),
            });
        }
        if let Some(&bad) = self.assignments.iter().find(|&&a| a >= n) {
            return Err(GmmError::InvalidParameter {
                parameter: "assignment".to_string(),
                value: bad as f64,
                constraint: format!("< {}", n),
            });
        }
        Ok(())
    }

    /// Number of points assigned to each cluster.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.centers.nrows()];
        for &a in &self.assignments {
            counts[a] += 1;
        }
        counts
    }
}

/// Black-box `cluster(x, n) -> centers, assignments` capability.
pub trait Clusterer {
    /// Partitions the rows of `x` into `n` clusters.
    fn cluster(&self, x: &DMatrix<f64>, n: usize) -> GmmResult<Clustering>;
}

/// Lloyd's k-means with k-means++ seeding.
#[derive(Debug, Clone, Default)]
pub struct KMeans {
    config: KMeansConfig,
}

impl KMeans {
    /// Clusterer with the given settings.
    pub fn new(config: KMeansConfig) -> Self {
        Self { config }
    }

    fn rng(&self) -> ChaCha20Rng {
        match self.config.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        }
    }

    /// Picks `n` initial centers, each with probability proportional to the
    /// squared distance to the nearest center chosen so far.
    fn plus_plus<R: Rng + ?Sized>(x: &DMatrix<f64>, n: usize, rng: &mut R) -> DMatrix<f64> {
        let nx = x.nrows();
        let mut chosen = vec![rng.gen_range(0..nx)];
        let mut distances: Vec<f64> = (0..nx)
            .map(|i| (x.row(i) - x.row(chosen[0])).norm_squared())
            .collect();

        while chosen.len() < n {
            let next = match WeightedIndex::new(&distances) {
                Ok(dist) => dist.sample(rng),
                // Every point coincides with a center; any index will do.
                Err(_) => rng.gen_range(0..nx),
            };
            chosen.push(next);
            for (i, dist) in distances.iter_mut().enumerate() {
                *dist = dist.min((x.row(i) - x.row(next)).norm_squared());
            }
        }
        x.select_rows(chosen.iter())
    }

    fn nearest(x: &DMatrix<f64>, i: usize, centers: &DMatrix<f64>) -> usize {
        let mut best = 0;
        let mut min_dist = f64::INFINITY;
        for j in 0..centers.nrows() {
            let dist = (x.row(i) - centers.row(j)).norm_squared();
            if dist < min_dist {
                min_dist = dist;
                best = j;
            }
        }
        best
    }
}

impl Clusterer for KMeans {
    fn cluster(&self, x: &DMatrix<f64>, n: usize) -> GmmResult<Clustering> {
        validate_count(n, 1, "n")?;
        validate_data_length(x, n)?;

        let (nx, d) = x.shape();
        let mut rng = self.rng();
        let mut centers = Self::plus_plus(x, n, &mut rng);
        let mut assignments = vec![0; nx];

        for iteration in 0..self.config.max_iter {
            for (i, a) in assignments.iter_mut().enumerate() {
                *a = Self::nearest(x, i, &centers);
            }

            let mut sums = DMatrix::zeros(n, d);
            let mut counts = vec![0usize; n];
            for (i, &a) in assignments.iter().enumerate() {
                let mut row = sums.row_mut(a);
                row += x.row(i);
                counts[a] += 1;
            }

            let mut max_change = 0.0f64;
            for j in 0..n {
                // Empty clusters keep their previous center.
                if counts[j] == 0 {
                    continue;
                }
                let center = sums.row(j) / counts[j] as f64;
                max_change = max_change.max((&center - centers.row(j)).norm());
                centers.row_mut(j).copy_from(&center);
            }

            if max_change < self.config.tolerance {
                log::debug!("k-means converged after {} iterations", iteration + 1);
                break;
            }
        }

        for (i, a) in assignments.iter_mut().enumerate() {
            *a = Self::nearest(x, i, &centers);
        }
        Ok(Clustering {
            centers,
            assignments,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> DMatrix<f64> {
        DMatrix::from_fn(60, 2, |i, k| {
            let centre = [(-5.0, -5.0), (0.0, 5.0), (5.0, -5.0)][i % 3];
            let jitter = ((i * 31 + k * 17) % 11) as f64 / 11.0 - 0.5;
            if k == 0 { centre.0 + jitter } else { centre.1 + jitter }
        })
    }

    #[test]
    fn test_kmeans_recovers_blobs() {
        let x = blobs();
        let clustering = KMeans::default().cluster(&x, 3).unwrap();
        assert!(clustering.validate(3, 2, 60).is_ok());
        assert_eq!(clustering.counts(), vec![20, 20, 20]);
        for i in 0..60 {
            assert_eq!(clustering.assignments[i], clustering.assignments[i % 3]);
        }
    }

    #[test]
    fn test_kmeans_is_deterministic_with_seed() {
        let x = blobs();
        let a = KMeans::default().cluster(&x, 3).unwrap();
        let b = KMeans::default().cluster(&x, 3).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_kmeans_handles_identical_points() {
        let x = DMatrix::from_element(5, 2, 1.0);
        let clustering = KMeans::default().cluster(&x, 2).unwrap();
        assert!(clustering.validate(2, 2, 5).is_ok());
    }

    #[test]
    fn test_kmeans_needs_enough_points() {
        let x = DMatrix::zeros(2, 2);
        assert!(matches!(
            KMeans::default().cluster(&x, 3),
            Err(GmmError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_assignments() {
        let clustering = Clustering {
            centers: DMatrix::zeros(2, 1),
            assignments: vec![0, 2],
        };
        assert!(clustering.validate(2, 1, 2).is_err());
    }

    #[test]
    fn test_validate_rejects_wrong_center_shape() {
        let clustering = Clustering {
            centers: DMatrix::zeros(3, 2),
            assignments: vec![0, 1],
        };
        assert!(matches!(
            clustering.validate(2, 2, 2),
            Err(GmmError::ShapeMismatch { expected: (2, 2), actual: (3, 2), .. })
        ));
    }
}
