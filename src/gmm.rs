//! The Gaussian mixture model parameter container.
//!
//! A [`Gmm`] holds `n` weights, an `n × d` mean matrix, per-component
//! covariances and its own event [`History`]. Weights always sum to one; `n`
//! and `d` never change in place: splitting, pruning and kind conversion
//! return a new model.

use crate::{
    config::{InitMethod, TrainingConfig},
    covariance::{cholesky_factor, CovarianceKind, Covariances},
    errors::{
        validate_all_finite, validate_count, validate_data, validate_data_length,
        validate_parameter, GmmError, GmmResult,
    },
    history::History,
    kmeans::Clusterer,
    math_utils::constants,
};
use nalgebra::{DMatrix, DVector};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use rand_distr::StandardNormal;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Gaussian mixture model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Gmm {
    weights: DVector<f64>,
    means: DMatrix<f64>,
    covariances: Covariances,
    history: History,
}

impl Gmm {
    /// Zero means, identity covariances and uniform weights.
    pub fn new(n: usize, d: usize, kind: CovarianceKind) -> GmmResult<Self> {
        validate_count(n, 1, "n")?;
        validate_count(d, 1, "d")?;

        let mut gmm = Self {
            weights: DVector::from_element(n, 1.0 / n as f64),
            means: DMatrix::zeros(n, d),
            covariances: Covariances::identity(n, d, kind),
            history: History::new(),
        };
        gmm.add_history(format!(
            "GMM created with {} {} Gaussians in {} dimensions",
            n, kind, d
        ));
        Ok(gmm)
    }

    /// Builds a model from explicit parameters.
    ///
    /// Weights are renormalized; shapes, finiteness and definiteness are checked.
    pub fn from_parts(
        weights: DVector<f64>,
        means: DMatrix<f64>,
        covariances: Covariances,
    ) -> GmmResult<Self> {
        let (n, d) = means.shape();
        validate_count(n, 1, "n")?;
        validate_count(d, 1, "d")?;
        if weights.len() != n {
            return Err(GmmError::ShapeMismatch {
                operation: "weights".to_string(),
                expected: (n, 1),
                actual: (weights.len(), 1),
            });
        }
        let total: f64 = weights.iter().sum();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || total <= 0.0 {
            return Err(GmmError::InvalidParameter {
                parameter: "weights".to_string(),
                value: total,
                constraint: "finite, non-negative, positive sum".to_string(),
            });
        }

        let mut gmm = Self {
            weights: weights / total,
            means,
            covariances,
            history: History::new(),
        };
        gmm.validate()?;
        gmm.add_history(format!(
            "GMM created from parameters: {} {} Gaussians in {} dimensions",
            n,
            gmm.kind(),
            d
        ));
        Ok(gmm)
    }

    /// Single Gaussian with the sample mean and covariance of `x`.
    pub fn from_data(x: &DMatrix<f64>, kind: CovarianceKind) -> GmmResult<Self> {
        Self::from_data_with_floor(x, kind, constants::DEFAULT_VAR_FLOOR)
    }

    /// As [`Gmm::from_data`], flooring variances at `var_floor`.
    pub fn from_data_with_floor(
        x: &DMatrix<f64>,
        kind: CovarianceKind,
        var_floor: f64,
    ) -> GmmResult<Self> {
        validate_data_length(x, 1)?;
        validate_count(x.ncols(), 1, "d")?;
        validate_data(x, x.ncols(), "from_data")?;
        validate_parameter(var_floor, 0.0, f64::MAX, "var_floor")?;

        let (nx, d) = x.shape();
        let mean = x.row_mean();
        let centered = DMatrix::from_fn(nx, d, |i, k| x[(i, k)] - mean[k]);
        let mut covariances = match kind {
            CovarianceKind::Diagonal => {
                let var = centered.component_mul(&centered).row_mean();
                Covariances::Diagonal(DMatrix::from_fn(1, d, |_, k| var[k]))
            }
            CovarianceKind::Full => {
                Covariances::Full(vec![centered.transpose() * &centered / nx as f64])
            }
        };
        covariances.apply_floor(var_floor);

        let mut gmm = Self {
            weights: DVector::from_element(1, 1.0),
            means: DMatrix::from_fn(1, d, |_, k| mean[k]),
            covariances,
            history: History::new(),
        };
        gmm.add_history(format!(
            "Initialized single {} Gaussian with d={} using {} data points",
            kind, d, nx
        ));
        Ok(gmm)
    }

    /// Trains an `n`-component model on `x` with the chosen initializer.
    ///
    /// `InitMethod::KMeans` uses the crate's k-means (seeded from the
    /// configuration) and then runs EM; `InitMethod::Split` needs `n` to be a
    /// power of two.
    pub fn train(
        x: &DMatrix<f64>,
        n: usize,
        kind: CovarianceKind,
        method: InitMethod,
        config: &TrainingConfig,
    ) -> GmmResult<Self> {
        match method {
            InitMethod::KMeans => {
                let clusterer = crate::kmeans::KMeans::new(config.kmeans.clone());
                Self::from_kmeans(x, n, kind, &clusterer, config)
            }
            InitMethod::Split => Self::from_split(x, n, kind, config),
        }
    }

    /// K-means seeded model followed by `config.em.n_iter` EM iterations.
    pub fn from_kmeans<C: Clusterer + ?Sized>(
        x: &DMatrix<f64>,
        n: usize,
        kind: CovarianceKind,
        clusterer: &C,
        config: &TrainingConfig,
    ) -> GmmResult<Self> {
        validate_count(n, 1, "n")?;
        validate_count(x.ncols(), 1, "d")?;
        validate_data(x, x.ncols(), "from_kmeans")?;
        validate_data_length(x, n)?;

        let (nx, d) = x.shape();
        let clustering = clusterer.cluster(x, n)?;
        clustering.validate(n, d, nx)?;

        let var_floor = config.em.var_floor;
        let global = Self::from_data_with_floor(x, kind, var_floor)?;

        let mut weights = DVector::zeros(n);
        let mut means = clustering.centers.clone();
        let mut covariances = Covariances::identity(n, d, kind);
        for j in 0..n {
            let members: Vec<usize> = clustering
                .assignments
                .iter()
                .enumerate()
                .filter(|(_, &a)| a == j)
                .map(|(i, _)| i)
                .collect();
            weights[j] = members.len().max(1) as f64 / nx as f64;

            if members.len() < 2 {
                // Too few points for a covariance estimate.
                match &mut covariances {
                    Covariances::Diagonal(v) => {
                        v.row_mut(j)
                            .copy_from(&global.covariances.variances(0).transpose());
                    }
                    Covariances::Full(c) => c[j] = global.covariances.dense(0),
                }
                continue;
            }

            let subset = x.select_rows(members.iter());
            let mean = subset.row_mean();
            means.row_mut(j).copy_from(&mean);
            let centered = DMatrix::from_fn(subset.nrows(), d, |i, k| subset[(i, k)] - mean[k]);
            match &mut covariances {
                Covariances::Diagonal(v) => {
                    v.row_mut(j)
                        .copy_from(&centered.component_mul(&centered).row_mean());
                }
                Covariances::Full(c) => {
                    c[j] = centered.transpose() * &centered / subset.nrows() as f64;
                }
            }
        }
        covariances.apply_floor(var_floor);

        let total = weights.sum();
        let mut gmm = Self {
            weights: weights / total,
            means,
            covariances,
            history: History::new(),
        };
        gmm.add_history(format!(
            "K-means with {} data points and {} centers",
            nx, n
        ));
        log::info!("k-means initialization of {} Gaussians done, running EM", n);
        gmm.em(x, &config.em)?;
        Ok(gmm)
    }

    /// Number of components.
    pub fn n(&self) -> usize {
        self.weights.len()
    }

    /// Feature dimensionality.
    pub fn d(&self) -> usize {
        self.means.ncols()
    }

    /// Covariance representation.
    pub fn kind(&self) -> CovarianceKind {
        self.covariances.kind()
    }

    /// Mixture weights (sum to one).
    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    /// n × d component means.
    pub fn means(&self) -> &DMatrix<f64> {
        &self.means
    }

    /// Component covariances.
    pub fn covariances(&self) -> &Covariances {
        &self.covariances
    }

    /// Event history.
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Appends an event to the history.
    pub fn add_history(&mut self, event: impl Into<String>) {
        self.history.record(event);
    }

    /// Number of free parameters.
    pub fn n_params(&self) -> usize {
        let (n, d) = (self.n(), self.d());
        let cov_params = match self.kind() {
            CovarianceKind::Diagonal => n * d,
            CovarianceKind::Full => n * d * (d + 1) / 2,
        };
        n * d + cov_params + n - 1
    }

    /// Checks every model invariant.
    pub fn validate(&self) -> GmmResult<()> {
        let (n, d) = self.means.shape();
        validate_count(n, 1, "n")?;
        validate_count(d, 1, "d")?;
        if self.weights.len() != n {
            return Err(GmmError::ShapeMismatch {
                operation: "weights".to_string(),
                expected: (n, 1),
                actual: (self.weights.len(), 1),
            });
        }
        if let Some((j, &w)) = self
            .weights
            .iter()
            .enumerate()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(GmmError::InvalidParameter {
                parameter: format!("weight[{}]", j),
                value: w,
                constraint: "finite and >= 0".to_string(),
            });
        }
        let total = self.weights.sum();
        if (total - 1.0).abs() > constants::WEIGHT_SUM_TOLERANCE * n as f64 {
            return Err(GmmError::InvalidParameter {
                parameter: "sum(weights)".to_string(),
                value: total,
                constraint: "1".to_string(),
            });
        }
        validate_all_finite(self.means.as_slice(), "means")?;
        self.covariances.validate(n, d)
    }

    /// New model without the components whose weight is below `min_weight`.
    pub fn prune(&self, min_weight: f64) -> GmmResult<Self> {
        validate_parameter(min_weight, 0.0, 1.0, "min_weight")?;
        let keep: Vec<usize> = (0..self.n())
            .filter(|&j| self.weights[j] >= min_weight)
            .collect();
        if keep.is_empty() {
            return Err(GmmError::InvalidParameter {
                parameter: "min_weight".to_string(),
                value: min_weight,
                constraint: format!("<= largest weight {}", self.weights.max()),
            });
        }

        let weights = self.weights.select_rows(keep.iter());
        let total = weights.sum();
        let mut pruned = Self {
            weights: weights / total,
            means: self.means.select_rows(keep.iter()),
            covariances: self.covariances.select(&keep),
            history: self.history.clone(),
        };
        pruned.add_history(format!(
            "Pruned {} Gaussians with weight below {}",
            self.n() - keep.len(),
            min_weight
        ));
        Ok(pruned)
    }

    /// Converts to full covariances (new model).
    pub fn to_full(&self) -> Self {
        let mut gmm = self.clone();
        if let Covariances::Diagonal(_) = self.covariances {
            gmm.covariances = Covariances::Full((0..self.n()).map(|j| self.covariances.dense(j)).collect());
            gmm.add_history("Converted to full covariance");
        }
        gmm
    }

    /// Converts to diagonal covariances by dropping off-diagonal terms (new model).
    pub fn to_diag(&self) -> Self {
        let mut gmm = self.clone();
        if let Covariances::Full(c) = &self.covariances {
            let d = self.d();
            gmm.covariances =
                Covariances::Diagonal(DMatrix::from_fn(self.n(), d, |j, k| c[j][(k, k)]));
            gmm.add_history("Converted to diagonal covariance");
        }
        gmm
    }

    /// Draws `nx` points from the mixture.
    pub fn sample<R: Rng + ?Sized>(&self, nx: usize, rng: &mut R) -> GmmResult<DMatrix<f64>> {
        let chooser = WeightedIndex::new(self.weights.iter()).map_err(|e| GmmError::NumericalError {
            reason: format!("cannot sample from weights: {}", e),
            operation: Some("sample".to_string()),
        })?;
        let d = self.d();
        let factors = match &self.covariances {
            Covariances::Diagonal(v) => v
                .map(f64::sqrt)
                .row_iter()
                .map(|r| DMatrix::from_diagonal(&r.transpose()))
                .collect::<Vec<_>>(),
            Covariances::Full(c) => c
                .iter()
                .enumerate()
                .map(|(j, m)| cholesky_factor(m, j).map(|chol| chol.l()))
                .collect::<GmmResult<Vec<_>>>()?,
        };

        let mut x = DMatrix::zeros(nx, d);
        for i in 0..nx {
            let j = chooser.sample(rng);
            let z = DVector::from_fn(d, |_, _| {
                let v: f64 = StandardNormal.sample(rng);
                v
            });
            let point = &factors[j] * z;
            for k in 0..d {
                x[(i, k)] = self.means[(j, k)] + point[k];
            }
        }
        Ok(x)
    }

    /// Replaces the parameters after an update, renormalizing the weights.
    pub(crate) fn set_parameters(
        &mut self,
        weights: DVector<f64>,
        means: DMatrix<f64>,
        covariances: Covariances,
    ) {
        debug_assert_eq!(weights.len(), self.n());
        debug_assert_eq!(means.shape(), self.means.shape());
        debug_assert_eq!(covariances.kind(), self.kind());
        let total = weights.sum();
        self.weights = if total > 0.0 { weights / total } else { weights };
        self.means = means;
        self.covariances = covariances;
    }

    /// Builds a model of a new size that inherits this model's history.
    pub(crate) fn derive(
        &self,
        weights: DVector<f64>,
        means: DMatrix<f64>,
        covariances: Covariances,
    ) -> Self {
        let total = weights.sum();
        Self {
            weights: weights / total,
            means,
            covariances,
            history: self.history.clone(),
        }
    }
}
