//! Covariance storage for mixture components.
//!
//! Diagonal and full covariances are stored differently but live under one
//! closed enum, [`Covariances`]. Algorithms match on it once at the top of an
//! operation; adding a third kind is a compile-time exhaustiveness failure.

use crate::errors::{GmmError, GmmResult};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn, SymmetricEigen};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relative tolerance for the symmetry check on full covariances.
const SYMMETRY_TOLERANCE: f64 = 1e-8;

/// Covariance representation selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CovarianceKind {
    /// One variance per component and dimension.
    Diagonal,
    /// A symmetric positive-definite d × d matrix per component.
    Full,
}

impl fmt::Display for CovarianceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CovarianceKind::Diagonal => write!(f, "diag"),
            CovarianceKind::Full => write!(f, "full"),
        }
    }
}

/// Per-component covariance parameters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Covariances {
    /// n × d matrix of variances, row j belongs to component j.
    Diagonal(DMatrix<f64>),
    /// n matrices of size d × d.
    Full(Vec<DMatrix<f64>>),
}

impl Covariances {
    /// Identity covariances for `n` components in `d` dimensions.
    pub fn identity(n: usize, d: usize, kind: CovarianceKind) -> Self {
        match kind {
            CovarianceKind::Diagonal => Covariances::Diagonal(DMatrix::from_element(n, d, 1.0)),
            CovarianceKind::Full => Covariances::Full(vec![DMatrix::identity(d, d); n]),
        }
    }

    /// The representation in use.
    pub fn kind(&self) -> CovarianceKind {
        match self {
            Covariances::Diagonal(_) => CovarianceKind::Diagonal,
            Covariances::Full(_) => CovarianceKind::Full,
        }
    }

    /// Number of components stored.
    pub fn len(&self) -> usize {
        match self {
            Covariances::Diagonal(v) => v.nrows(),
            Covariances::Full(c) => c.len(),
        }
    }

    /// True if no component is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Variances (the diagonal) of component `j`.
    pub fn variances(&self, j: usize) -> DVector<f64> {
        match self {
            Covariances::Diagonal(v) => v.row(j).transpose(),
            Covariances::Full(c) => c[j].diagonal(),
        }
    }

    /// Component `j` as a dense d × d matrix.
    pub fn dense(&self, j: usize) -> DMatrix<f64> {
        match self {
            Covariances::Diagonal(v) => DMatrix::from_diagonal(&v.row(j).transpose()),
            Covariances::Full(c) => c[j].clone(),
        }
    }

    /// Copies only the components listed in `keep`, in that order.
    pub fn select(&self, keep: &[usize]) -> Self {
        match self {
            Covariances::Diagonal(v) => Covariances::Diagonal(v.select_rows(keep.iter())),
            Covariances::Full(c) => Covariances::Full(keep.iter().map(|&j| c[j].clone()).collect()),
        }
    }

    /// Checks shape, finiteness and definiteness for `n` components in `d` dimensions.
    pub fn validate(&self, n: usize, d: usize) -> GmmResult<()> {
        match self {
            Covariances::Diagonal(v) => {
                if v.shape() != (n, d) {
                    return Err(GmmError::ShapeMismatch {
                        operation: "diagonal covariances".to_string(),
                        expected: (n, d),
                        actual: v.shape(),
                    });
                }
                for j in 0..n {
                    for k in 0..d {
                        let var = v[(j, k)];
                        if !(var.is_finite() && var > 0.0) {
                            return Err(GmmError::InvalidParameter {
                                parameter: format!("variance[{}, {}]", j, k),
                                value: var,
                                constraint: "finite and > 0".to_string(),
                            });
                        }
                    }
                }
            }
            Covariances::Full(c) => {
                if c.len() != n {
                    return Err(GmmError::ShapeMismatch {
                        operation: "full covariances".to_string(),
                        expected: (n, 1),
                        actual: (c.len(), 1),
                    });
                }
                for (j, m) in c.iter().enumerate() {
                    if m.shape() != (d, d) {
                        return Err(GmmError::ShapeMismatch {
                            operation: format!("covariance of component {}", j),
                            expected: (d, d),
                            actual: m.shape(),
                        });
                    }
                    check_symmetric(m, j)?;
                    cholesky_factor(m, j)?;
                }
            }
        }
        Ok(())
    }

    /// Clamps every variance (diagonal) or eigenvalue (full) to at least `floor`.
    pub fn apply_floor(&mut self, floor: f64) {
        match self {
            Covariances::Diagonal(v) => {
                for var in v.iter_mut() {
                    *var = var.max(floor);
                }
            }
            Covariances::Full(c) => {
                for m in c.iter_mut() {
                    *m = floor_eigenvalues(m, floor);
                }
            }
        }
    }

    /// Principal variance axis of component `j` as (variance, unit direction).
    ///
    /// Diagonal: the dimension with the largest variance (lowest index on ties).
    /// Full: the dominant eigenvector.
    pub fn principal_axis(&self, j: usize) -> (f64, DVector<f64>) {
        match self {
            Covariances::Diagonal(v) => {
                let d = v.ncols();
                let mut best = 0;
                for k in 1..d {
                    if v[(j, k)] > v[(j, best)] {
                        best = k;
                    }
                }
                let mut axis = DVector::zeros(d);
                axis[best] = 1.0;
                (v[(j, best)], axis)
            }
            Covariances::Full(c) => {
                let eig = SymmetricEigen::new(symmetrize(&c[j]));
                let mut best = 0;
                for k in 1..eig.eigenvalues.len() {
                    if eig.eigenvalues[k] > eig.eigenvalues[best] {
                        best = k;
                    }
                }
                (
                    eig.eigenvalues[best].max(0.0),
                    eig.eigenvectors.column(best).into_owned(),
                )
            }
        }
    }
}

/// (m + mᵀ) / 2
pub fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

/// Returns a symmetric matrix whose eigenvalues are all at least `floor`.
///
/// The input is returned (symmetrized) unchanged when it already satisfies the
/// floor, so well-conditioned covariances are not perturbed by the round trip
/// through the eigendecomposition.
pub fn floor_eigenvalues(m: &DMatrix<f64>, floor: f64) -> DMatrix<f64> {
    let sym = symmetrize(m);
    let mut eig = SymmetricEigen::new(sym.clone());
    if eig.eigenvalues.iter().all(|&l| l >= floor) {
        return sym;
    }
    for l in eig.eigenvalues.iter_mut() {
        *l = l.max(floor);
    }
    symmetrize(&eig.recompose())
}

/// Cholesky factorization of component `component`'s covariance.
pub fn cholesky_factor(m: &DMatrix<f64>, component: usize) -> GmmResult<Cholesky<f64, Dyn>> {
    if m.iter().any(|v| !v.is_finite()) {
        return Err(GmmError::FactorizationFailed {
            component,
            reason: format!("{}x{} covariance contains non-finite entries", m.nrows(), m.ncols()),
        });
    }
    Cholesky::new(m.clone()).ok_or_else(|| GmmError::FactorizationFailed {
        component,
        reason: format!(
            "Cholesky decomposition of the {}x{} covariance failed (diagonal: {:?})",
            m.nrows(),
            m.ncols(),
            m.diagonal().as_slice()
        ),
    })
}

fn check_symmetric(m: &DMatrix<f64>, component: usize) -> GmmResult<()> {
    let scale = m.amax().max(1.0);
    let asym = (m - m.transpose()).amax();
    if asym > SYMMETRY_TOLERANCE * scale {
        return Err(GmmError::FactorizationFailed {
            component,
            reason: format!("covariance is not symmetric (max asymmetry {:.2e})", asym),
        });
    }
    Ok(())
}
