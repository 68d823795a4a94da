//! Binary splitting initializer.
//!
//! Every split doubles the component count by replacing each Gaussian with two
//! children displaced along its principal variance axis. Repeated splitting
//! with short EM refinements grows a single Gaussian into a mixture of any
//! power-of-two size.

use crate::{
    config::{EmConfig, TrainingConfig},
    covariance::{CovarianceKind, Covariances},
    errors::{validate_count, validate_data_length, validate_parameter, GmmError, GmmResult},
    gmm::Gmm,
    math_utils::is_power_of_two,
};
use nalgebra::{DMatrix, DVector, RowDVector};

/// Doubles the number of components of `gmm`.
///
/// Component `j` yields children `j` and `n + j`, each with half the parent
/// weight, means `μ ∓ cov_factor·√λ·v` along the principal axis `(λ, v)` and
/// the parent's covariance. Children lighter than `min_weight` are replaced by
/// a further split of the currently heaviest component, so the result always
/// has `2n` components.
pub fn split(gmm: &Gmm, min_weight: f64, cov_factor: f64) -> GmmResult<Gmm> {
    validate_parameter(min_weight, 0.0, 1.0, "min_weight")?;
    validate_parameter(cov_factor, 0.0, f64::MAX, "cov_factor")?;

    let (n, d) = (gmm.n(), gmm.d());
    let doubled: Vec<usize> = (0..n).chain(0..n).collect();
    let mut weights = DVector::from_fn(2 * n, |i, _| gmm.weights()[i % n] / 2.0);
    let mut means = DMatrix::zeros(2 * n, d);
    let mut covariances = gmm.covariances().select(&doubled);

    for j in 0..n {
        let offset = split_offset(gmm.covariances(), j, cov_factor);
        let mean = gmm.means().row(j);
        means.row_mut(j).copy_from(&(&mean - &offset));
        means.row_mut(n + j).copy_from(&(&mean + &offset));
    }

    let light: Vec<usize> = (0..2 * n).filter(|&c| weights[c] < min_weight).collect();
    for &c in &light {
        let heaviest = (0..2 * n)
            .filter(|&h| weights[h] >= min_weight)
            .fold(None, |best: Option<usize>, h| match best {
                Some(b) if weights[b] >= weights[h] => Some(b),
                _ => Some(h),
            })
            .ok_or_else(|| GmmError::InvalidParameter {
                parameter: "min_weight".to_string(),
                value: min_weight,
                constraint: format!("at most the largest child weight {}", weights.max()),
            })?;

        let offset = split_offset(&covariances, heaviest, cov_factor);
        let mean = means.row(heaviest).into_owned();
        means.row_mut(heaviest).copy_from(&(&mean - &offset));
        means.row_mut(c).copy_from(&(&mean + &offset));
        weights[heaviest] /= 2.0;
        weights[c] = weights[heaviest];
        copy_covariance(&mut covariances, heaviest, c);
    }
    if !light.is_empty() {
        log::info!(
            "replaced {} split children below weight {} by splitting the heaviest components",
            light.len(),
            min_weight
        );
    }

    let mut result = gmm.derive(weights, means, covariances);
    result.add_history(format!(
        "Split {} into {} Gaussians ({} light children replaced)",
        n,
        2 * n,
        light.len()
    ));
    Ok(result)
}

/// Displacement of the children of component `j`, as a row vector.
fn split_offset(covariances: &Covariances, j: usize, cov_factor: f64) -> RowDVector<f64> {
    let (variance, axis) = covariances.principal_axis(j);
    (axis * (cov_factor * variance.sqrt())).transpose()
}

fn copy_covariance(covariances: &mut Covariances, from: usize, to: usize) {
    match covariances {
        Covariances::Diagonal(v) => {
            let row = v.row(from).into_owned();
            v.row_mut(to).copy_from(&row);
        }
        Covariances::Full(c) => c[to] = c[from].clone(),
    }
}

/// Grows `gmm` to `target` components by repeated splitting.
///
/// Each doubling is followed by `config.split.n_iter` EM iterations on `x`, and
/// the full-size model gets a final run of `config.split.n_final` iterations.
/// `target` must be `gmm.n()` times a power of two.
pub fn split_to(gmm: &Gmm, target: usize, x: &DMatrix<f64>, config: &TrainingConfig) -> GmmResult<Gmm> {
    config.validate()?;
    if target < gmm.n() || target % gmm.n() != 0 || !is_power_of_two(target / gmm.n()) {
        return Err(GmmError::NotPowerOfTwo { n: target });
    }

    let refine = EmConfig {
        n_iter: config.split.n_iter,
        ..config.em.clone()
    };
    let mut current = gmm.clone();
    while current.n() < target {
        current = current.split(config.split.min_weight, config.split.cov_factor)?;
        current.em(x, &refine)?;
        log::info!("split to {} of {} Gaussians", current.n(), target);
    }

    let last = EmConfig {
        n_iter: config.split.n_final,
        ..config.em.clone()
    };
    current.em(x, &last)?;
    Ok(current)
}

impl Gmm {
    /// See [`split`].
    pub fn split(&self, min_weight: f64, cov_factor: f64) -> GmmResult<Gmm> {
        split(self, min_weight, cov_factor)
    }

    /// Single Gaussian from `x`, split up to `n` components with EM refinement.
    ///
    /// `n` must be a power of two.
    pub fn from_split(
        x: &DMatrix<f64>,
        n: usize,
        kind: CovarianceKind,
        config: &TrainingConfig,
    ) -> GmmResult<Self> {
        validate_count(n, 1, "n")?;
        if !is_power_of_two(n) {
            return Err(GmmError::NotPowerOfTwo { n });
        }
        validate_data_length(x, n)?;
        let seed = Self::from_data_with_floor(x, kind, config.em.var_floor)?;
        log::info!(
            "growing {} {} Gaussians from a single Gaussian on {} points",
            n,
            kind,
            x.nrows()
        );
        split_to(&seed, n, x, config)
    }
}
