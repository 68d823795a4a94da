//! Per-Gaussian log-densities, average log-likelihood and posteriors.
//!
//! [`DensityModel`] is an immutable snapshot of a [`Gmm`] with everything the
//! hot loop needs precomputed: log weights, log normalizers and either inverse
//! variances (diagonal) or inverse Cholesky factors (full). It is `Sync` and is
//! shared read-only by all statistics workers.

use crate::{
    covariance::{cholesky_factor, Covariances},
    errors::{validate_data, validate_data_length, GmmError, GmmResult},
    gmm::Gmm,
    math_utils::{constants::LOG_2PI, log_normalize},
};
use nalgebra::{DMatrix, DMatrixView, DVector};

#[derive(Debug, Clone)]
enum ComponentParams {
    Diagonal {
        /// n × d reciprocal variances
        inv_var: DMatrix<f64>,
    },
    Full {
        /// L⁻¹ per component, Σ = L Lᵀ
        inv_chol: Vec<DMatrix<f64>>,
    },
}

/// Frozen, precomputed view of a mixture used for density evaluation.
#[derive(Debug, Clone)]
pub struct DensityModel {
    log_weights: DVector<f64>,
    means: DMatrix<f64>,
    /// −½(d ln 2π + ln |Σ_j|)
    log_norm: DVector<f64>,
    params: ComponentParams,
}

impl DensityModel {
    /// Precomputes the snapshot, factorizing full covariances.
    ///
    /// A full covariance that is not positive definite is reported as
    /// [`GmmError::FactorizationFailed`] naming the component.
    pub fn new(gmm: &Gmm) -> GmmResult<Self> {
        let (n, d) = (gmm.n(), gmm.d());
        let log_weights = gmm.weights().map(f64::ln);
        let means = gmm.means().clone();

        let (log_norm, params) = match gmm.covariances() {
            Covariances::Diagonal(var) => {
                if let Some((idx, &v)) = var.iter().enumerate().find(|(_, v)| !(**v > 0.0 && v.is_finite())) {
                    return Err(GmmError::NumericalError {
                        reason: format!(
                            "variance of component {} is not positive: {}",
                            idx % n,
                            v
                        ),
                        operation: Some("density".to_string()),
                    });
                }
                let log_norm = DVector::from_fn(n, |j, _| {
                    let log_det: f64 = var.row(j).iter().map(|v| v.ln()).sum();
                    -0.5 * (d as f64 * LOG_2PI + log_det)
                });
                let inv_var = var.map(|v| 1.0 / v);
                (log_norm, ComponentParams::Diagonal { inv_var })
            }
            Covariances::Full(covs) => {
                let mut log_norm = DVector::zeros(n);
                let mut inv_chol = Vec::with_capacity(n);
                for (j, cov) in covs.iter().enumerate() {
                    let chol = cholesky_factor(cov, j)?;
                    let l = chol.l();
                    let log_det = 2.0 * l.diagonal().iter().map(|x| x.ln()).sum::<f64>();
                    log_norm[j] = -0.5 * (d as f64 * LOG_2PI + log_det);
                    let linv = l
                        .solve_lower_triangular(&DMatrix::identity(d, d))
                        .ok_or_else(|| GmmError::FactorizationFailed {
                            component: j,
                            reason: "Cholesky factor is singular".to_string(),
                        })?;
                    inv_chol.push(linv);
                }
                (log_norm, ComponentParams::Full { inv_chol })
            }
        };

        Ok(Self {
            log_weights,
            means,
            log_norm,
            params,
        })
    }

    /// Number of components.
    pub fn n(&self) -> usize {
        self.log_weights.len()
    }

    /// Dimensionality.
    pub fn d(&self) -> usize {
        self.means.ncols()
    }

    /// Whitening transform of component `j`: diag(1/σ) or L⁻¹.
    pub fn whitening(&self, j: usize) -> DMatrix<f64> {
        match &self.params {
            ComponentParams::Diagonal { inv_var } => {
                DMatrix::from_diagonal(&inv_var.row(j).map(f64::sqrt).transpose())
            }
            ComponentParams::Full { inv_chol } => inv_chol[j].clone(),
        }
    }

    /// log N(x_i; μ_j, Σ_j) for every row i of `x` and component j.
    pub fn log_densities(&self, x: &DMatrixView<'_, f64>) -> DMatrix<f64> {
        let (m, d) = (x.nrows(), self.d());
        let n = self.n();
        let mut ll = DMatrix::zeros(m, n);

        match &self.params {
            ComponentParams::Diagonal { inv_var } => {
                for j in 0..n {
                    for i in 0..m {
                        let mut quad = 0.0;
                        for k in 0..d {
                            let diff = x[(i, k)] - self.means[(j, k)];
                            quad += diff * diff * inv_var[(j, k)];
                        }
                        ll[(i, j)] = self.log_norm[j] - 0.5 * quad;
                    }
                }
            }
            ComponentParams::Full { inv_chol } => {
                for (j, linv) in inv_chol.iter().enumerate() {
                    let centered = DMatrix::from_fn(m, d, |i, k| x[(i, k)] - self.means[(j, k)]);
                    let z = centered * linv.transpose();
                    for i in 0..m {
                        ll[(i, j)] = self.log_norm[j] - 0.5 * z.row(i).norm_squared();
                    }
                }
            }
        }
        ll
    }

    /// Posteriors of the rows of `x`; underflow indices are offset by `offset`.
    pub fn posterior(&self, x: &DMatrixView<'_, f64>, offset: usize) -> Posterior {
        let mut ll = self.log_densities(x);
        let (m, n) = ll.shape();
        let mut log_likelihood = DVector::zeros(m);
        let mut underflow = Vec::new();
        let mut row = vec![0.0; n];

        for i in 0..m {
            for j in 0..n {
                row[j] = ll[(i, j)] + self.log_weights[j];
            }
            let lse = log_normalize(&mut row);
            log_likelihood[i] = lse;
            if lse.is_finite() {
                for j in 0..n {
                    ll[(i, j)] = row[j].exp();
                }
            } else {
                underflow.push(offset + i);
                for j in 0..n {
                    ll[(i, j)] = 0.0;
                }
            }
        }

        Posterior {
            post: ll,
            log_likelihood,
            underflow,
        }
    }
}

/// Posteriors with per-point diagnostics.
#[derive(Debug, Clone)]
pub struct Posterior {
    /// nx × n responsibilities; each row sums to one unless the point underflowed
    pub post: DMatrix<f64>,
    /// log p(x_i) per point
    pub log_likelihood: DVector<f64>,
    /// Points with zero density under every component (their `post` row is zero)
    pub underflow: Vec<usize>,
}

fn full_view(x: &DMatrix<f64>) -> DMatrixView<'_, f64> {
    x.rows(0, x.nrows())
}

/// Per-Gaussian log-densities, `nx × n`.
pub fn llpg(gmm: &Gmm, x: &DMatrix<f64>) -> GmmResult<DMatrix<f64>> {
    validate_data(x, gmm.d(), "llpg")?;
    let model = DensityModel::new(gmm)?;
    Ok(model.log_densities(&full_view(x)))
}

/// Posteriors together with per-point log-likelihoods and underflow diagnostics.
pub fn gmm_posterior(gmm: &Gmm, x: &DMatrix<f64>) -> GmmResult<Posterior> {
    validate_data(x, gmm.d(), "posterior")?;
    let model = DensityModel::new(gmm)?;
    let posterior = model.posterior(&full_view(x), 0);
    if !posterior.underflow.is_empty() {
        log::warn!(
            "{} of {} points have zero density under every component (first: {})",
            posterior.underflow.len(),
            x.nrows(),
            posterior.underflow[0]
        );
    }
    Ok(posterior)
}

/// Responsibilities p(j | x_i), `nx × n`.
pub fn post(gmm: &Gmm, x: &DMatrix<f64>) -> GmmResult<DMatrix<f64>> {
    gmm_posterior(gmm, x).map(|p| p.post)
}

/// Average log-likelihood per point, divided by the dimensionality.
///
/// The division by `d` keeps values comparable across feature dimensions: a
/// single Gaussian with isotropic variance σ² fitted to its own data gives
/// about −ln σ − ½(ln 2π + 1).
pub fn avll(gmm: &Gmm, x: &DMatrix<f64>) -> GmmResult<f64> {
    validate_data_length(x, 1)?;
    let posterior = gmm_posterior(gmm, x)?;
    Ok(posterior.log_likelihood.sum() / x.nrows() as f64 / gmm.d() as f64)
}

impl Gmm {
    /// See [`llpg`].
    pub fn llpg(&self, x: &DMatrix<f64>) -> GmmResult<DMatrix<f64>> {
        llpg(self, x)
    }

    /// See [`avll`].
    pub fn avll(&self, x: &DMatrix<f64>) -> GmmResult<f64> {
        avll(self, x)
    }

    /// See [`post`].
    pub fn post(&self, x: &DMatrix<f64>) -> GmmResult<DMatrix<f64>> {
        post(self, x)
    }
}
