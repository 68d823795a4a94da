//! MAP adaptation of a background model and linear dot-scoring.

use crate::{
    config::MapOptions,
    covariance::{floor_eigenvalues, Covariances},
    csstats::CSstats,
    errors::{GmmError, GmmResult},
    gmm::Gmm,
    stats::{stats, SecondOrder, StatsOrder},
};
use nalgebra::DMatrix;

fn validate_relevance(r: f64) -> GmmResult<()> {
    if r.is_nan() || r < 0.0 {
        return Err(GmmError::InvalidParameter {
            parameter: "relevance".to_string(),
            value: r,
            constraint: ">= 0 (infinity allowed)".to_string(),
        });
    }
    Ok(())
}

impl Gmm {
    /// Adapts this model toward `x` with relevance factor `r`.
    ///
    /// For each component, α = N / (N + r) blends the current parameters with
    /// the statistics of `x`. Means always follow `options.means`; weights and
    /// covariances are adapted only when requested. Components without
    /// occupancy are left as they are. Adapted covariances are floored at
    /// `options.var_floor`.
    pub fn map_adapt(&mut self, x: &DMatrix<f64>, r: f64, options: MapOptions) -> GmmResult<()> {
        validate_relevance(r)?;
        options.validate()?;
        let order = if options.covars {
            StatsOrder::Second
        } else {
            StatsOrder::First
        };
        let s = stats(self, x, order)?;
        let first = s.first.as_ref().ok_or_else(|| GmmError::NumericalError {
            reason: "MAP adaptation needs first-order statistics".to_string(),
            operation: Some("map_adapt".to_string()),
        })?;

        let (n, d) = (self.n(), self.d());
        let total = s.zeroth.sum();
        let alpha = s.zeroth.map(|occupancy| {
            if occupancy > 0.0 && r.is_finite() {
                occupancy / (occupancy + r)
            } else {
                0.0
            }
        });

        let old_means = self.means().clone();
        let mut means = old_means.clone();
        let mut weights = self.weights().clone();
        let mut covariances = self.covariances().clone();

        for j in (0..n).filter(|&j| alpha[j] > 0.0) {
            let a = alpha[j];
            let occupancy = s.zeroth[j];
            let data_mean = first.row(j) / occupancy;
            if options.means {
                let adapted = old_means.row(j) * (1.0 - a) + &data_mean * a;
                means.row_mut(j).copy_from(&adapted);
            }
            if options.weights && total > 0.0 {
                weights[j] = a * occupancy / total + (1.0 - a) * weights[j];
            }
            if options.covars {
                let (mu, mu_hat) = (old_means.row(j), means.row(j));
                match (&mut covariances, s.second.as_ref()) {
                    (Covariances::Diagonal(v), Some(SecondOrder::Diagonal(sq))) => {
                        for k in 0..d {
                            let var = a * sq[(j, k)] / occupancy
                                + (1.0 - a) * (v[(j, k)] + mu[k] * mu[k])
                                - mu_hat[k] * mu_hat[k];
                            v[(j, k)] = var.max(options.var_floor);
                        }
                    }
                    (Covariances::Full(c), Some(SecondOrder::Full(sq))) => {
                        let cov = &sq[j] * (a / occupancy)
                            + (&c[j] + mu.transpose() * mu) * (1.0 - a)
                            - mu_hat.transpose() * mu_hat;
                        c[j] = floor_eigenvalues(&cov, options.var_floor);
                    }
                    _ => {
                        return Err(GmmError::NumericalError {
                            reason: "statistics do not match the covariance kind".to_string(),
                            operation: Some("map_adapt".to_string()),
                        })
                    }
                }
            }
        }

        self.set_parameters(weights, means, covariances);
        let adapted: Vec<&str> = [
            (options.means, "means"),
            (options.weights, "weights"),
            (options.covars, "covars"),
        ]
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, name)| *name)
        .collect();
        self.add_history(format!(
            "MAP adaptation of {} with r = {} on {} data points",
            adapted.join(", "),
            r,
            s.nx
        ));
        Ok(())
    }
}

/// Adapted copy of `gmm`; see [`Gmm::map_adapt`].
pub fn maxapost(gmm: &Gmm, x: &DMatrix<f64>, r: f64, options: MapOptions) -> GmmResult<Gmm> {
    let mut adapted = gmm.clone();
    adapted.map_adapt(x, r, options)?;
    Ok(adapted)
}

/// Linear score Σ_j Σ_k x.f[j,k]·y.f[j,k] / (x.n[j] + r) between two sets of
/// first-order centered statistics of the same model.
pub fn dotscore(x: &CSstats, y: &CSstats, r: f64) -> GmmResult<f64> {
    validate_relevance(r)?;
    if x.f.shape() != y.f.shape() || x.n.len() != x.f.nrows() {
        return Err(GmmError::ShapeMismatch {
            operation: "dotscore".to_string(),
            expected: x.f.shape(),
            actual: y.f.shape(),
        });
    }

    let mut score = 0.0;
    for j in 0..x.f.nrows() {
        let denominator = x.n[j] + r;
        if denominator > 0.0 && denominator.is_finite() {
            score += x.f.row(j).dot(&y.f.row(j)) / denominator;
        }
    }
    Ok(score)
}
