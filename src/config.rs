//! # Training Configuration
//!
//! Configuration structures for EM, split initialization and k-means seeding.
//! Every struct has public fields, a `Default` and named presets.

use crate::errors::{validate_parameter, GmmResult};
use crate::math_utils::constants;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Initialization strategy for [`crate::Gmm::train`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum InitMethod {
    /// K-means centers and assignments, then EM.
    KMeans,
    /// Repeated binary splitting from a single Gaussian.
    Split,
}

/// EM loop settings.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EmConfig {
    /// Number of EM iterations (fixed, no convergence test)
    pub n_iter: usize,
    /// Lower bound for variances (diagonal) and eigenvalues (full)
    pub var_floor: f64,
    /// Components with less occupancy keep their mean and covariance
    pub min_occupancy: f64,
    /// Record the average log-likelihood after every iteration
    pub track_logll: bool,
}

impl Default for EmConfig {
    fn default() -> Self {
        Self {
            n_iter: 10,
            var_floor: constants::DEFAULT_VAR_FLOOR,
            min_occupancy: constants::DEFAULT_MIN_OCCUPANCY,
            track_logll: true,
        }
    }
}

impl EmConfig {
    /// Default settings with a different iteration count.
    pub fn with_iterations(n_iter: usize) -> Self {
        Self {
            n_iter,
            ..Self::default()
        }
    }

    /// Checks ranges.
    pub fn validate(&self) -> GmmResult<()> {
        validate_parameter(self.var_floor, 0.0, f64::MAX, "var_floor")?;
        validate_parameter(self.min_occupancy, 0.0, f64::MAX, "min_occupancy")?;
        Ok(())
    }
}

/// Splitting initializer settings.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SplitConfig {
    /// Children lighter than this are replaced by a split of the heaviest component
    pub min_weight: f64,
    /// Offset of the children along the principal axis, in standard deviations
    pub cov_factor: f64,
    /// EM iterations after each doubling
    pub n_iter: usize,
    /// EM iterations at the full mixture count
    pub n_final: usize,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            min_weight: 1e-5,
            cov_factor: 0.2,
            n_iter: 10,
            n_final: 10,
        }
    }
}

impl SplitConfig {
    /// Checks ranges.
    pub fn validate(&self) -> GmmResult<()> {
        validate_parameter(self.min_weight, 0.0, 1.0, "min_weight")?;
        validate_parameter(self.cov_factor, 0.0, f64::MAX, "cov_factor")?;
        Ok(())
    }
}

/// K-means seeding settings.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KMeansConfig {
    /// Maximum Lloyd iterations
    pub max_iter: usize,
    /// Stop when no center moves further than this
    pub tolerance: f64,
    /// Seed for k-means++ center selection (None: OS entropy)
    pub seed: Option<u64>,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            max_iter: 50,
            tolerance: 1e-6,
            seed: Some(42),
        }
    }
}

/// Everything needed by [`crate::Gmm::train`].
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TrainingConfig {
    /// EM settings (k-means path and per-doubling runs use `em.var_floor`)
    pub em: EmConfig,
    /// Split initializer settings
    pub split: SplitConfig,
    /// K-means settings
    pub kmeans: KMeansConfig,
}

impl TrainingConfig {
    /// Few iterations, for quick experiments and tests.
    pub fn quick() -> Self {
        Self {
            em: EmConfig::with_iterations(5),
            split: SplitConfig {
                n_iter: 3,
                n_final: 5,
                ..SplitConfig::default()
            },
            kmeans: KMeansConfig {
                max_iter: 20,
                ..KMeansConfig::default()
            },
        }
    }

    /// Default iteration counts.
    pub fn standard() -> Self {
        Self::default()
    }

    /// Long final runs for production models.
    pub fn thorough() -> Self {
        Self {
            em: EmConfig::with_iterations(50),
            split: SplitConfig {
                n_iter: 10,
                n_final: 50,
                ..SplitConfig::default()
            },
            kmeans: KMeansConfig {
                max_iter: 100,
                ..KMeansConfig::default()
            },
        }
    }

    /// Checks every nested configuration.
    pub fn validate(&self) -> GmmResult<()> {
        self.em.validate()?;
        self.split.validate()
    }
}

/// Which parameters MAP adaptation updates.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MapOptions {
    /// Adapt means
    pub means: bool,
    /// Adapt weights
    pub weights: bool,
    /// Adapt covariances
    pub covars: bool,
    /// Lower bound for adapted variances (eigenvalues for full covariances).
    /// Should match the floor the background model was trained with.
    pub var_floor: f64,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            means: true,
            weights: false,
            covars: false,
            var_floor: constants::DEFAULT_VAR_FLOOR,
        }
    }
}

impl MapOptions {
    /// Adapt means, weights and covariances.
    pub fn all() -> Self {
        Self {
            weights: true,
            covars: true,
            ..Self::default()
        }
    }

    /// Same options with a different variance floor.
    pub fn with_var_floor(self, var_floor: f64) -> Self {
        Self { var_floor, ..self }
    }

    /// Validates the variance floor.
    pub fn validate(&self) -> GmmResult<()> {
        validate_parameter(self.var_floor, 0.0, f64::MAX, "var_floor")
    }
}
