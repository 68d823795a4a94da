//! Centered and scaled Baum-Welch statistics.
//!
//! Raw statistics are re-expressed in each component's own frame: the
//! component mean is subtracted and the result is whitened by the component
//! covariance (divided by σ for diagonal models, multiplied by L⁻¹ for full
//! models with Σ = L Lᵀ). Statistics from different batches against the same
//! model stay additive and directly comparable.

use crate::{
    density::DensityModel,
    errors::{GmmError, GmmResult},
    executor::Executor,
    gmm::Gmm,
    stats::{SecondOrder, Stats, StatsEngine, StatsOrder},
};
use nalgebra::{DMatrix, DVector};

/// Centered, scaled statistics of a data batch against a model.
#[derive(Debug, Clone, PartialEq)]
pub struct CSstats {
    /// Zero-order occupancy per component
    pub n: DVector<f64>,
    /// Centered, whitened first-order statistics, n × d
    pub f: DMatrix<f64>,
    /// Centered, whitened second-order statistics (order 2 only)
    pub s: Option<SecondOrder>,
}

impl CSstats {
    /// First-order centered statistics of `x` against `gmm`.
    pub fn new(gmm: &Gmm, x: &DMatrix<f64>) -> GmmResult<Self> {
        csstats(gmm, x, StatsOrder::First)
    }

    /// Number of components.
    pub fn n_components(&self) -> usize {
        self.n.len()
    }

    /// Dimensionality.
    pub fn d(&self) -> usize {
        self.f.ncols()
    }

    /// First-order statistics concatenated component by component.
    pub fn supervector(&self) -> DVector<f64> {
        DVector::from_iterator(self.f.len(), self.f.transpose().iter().copied())
    }
}

/// Sequential centered statistics; see [`StatsEngine::csstats`].
pub fn csstats(gmm: &Gmm, x: &DMatrix<f64>, order: StatsOrder) -> GmmResult<CSstats> {
    StatsEngine::sequential().csstats(gmm, x, order)
}

impl<'e, E: Executor> StatsEngine<'e, E> {
    /// Centered, scaled statistics of order 1 or 2.
    pub fn csstats(&self, gmm: &Gmm, x: &DMatrix<f64>, order: StatsOrder) -> GmmResult<CSstats> {
        if order == StatsOrder::Zeroth {
            return Err(GmmError::InvalidParameter {
                parameter: "order".to_string(),
                value: 0.0,
                constraint: "1 or 2 for centered statistics".to_string(),
            });
        }
        let stats = self.stats(gmm, x, order)?;
        let model = DensityModel::new(gmm)?;
        center_and_scale(gmm, &model, &stats)
    }
}

fn center_and_scale(gmm: &Gmm, model: &DensityModel, stats: &Stats) -> GmmResult<CSstats> {
    let Some(first) = stats.first.as_ref() else {
        return Err(GmmError::NumericalError {
            reason: "centered statistics need first-order sums".to_string(),
            operation: Some("csstats".to_string()),
        });
    };
    let (n, d) = (gmm.n(), gmm.d());
    let mut f = DMatrix::zeros(n, d);
    let mut s = stats.second.as_ref().map(|second| match second {
        SecondOrder::Diagonal(_) => SecondOrder::Diagonal(DMatrix::zeros(n, d)),
        SecondOrder::Full(_) => SecondOrder::Full(vec![DMatrix::zeros(d, d); n]),
    });

    for j in 0..n {
        let occupancy = stats.zeroth[j];
        let mu = gmm.means().row(j).transpose();
        let raw = first.row(j).transpose();
        let centered = &raw - &mu * occupancy;
        let whitening = model.whitening(j);
        f.row_mut(j).copy_from(&(&whitening * &centered).transpose());

        match (s.as_mut(), stats.second.as_ref()) {
            (Some(SecondOrder::Diagonal(out)), Some(SecondOrder::Diagonal(sq))) => {
                for k in 0..d {
                    let scale = whitening[(k, k)];
                    let m = sq[(j, k)] - 2.0 * raw[k] * mu[k] + occupancy * mu[k] * mu[k];
                    out[(j, k)] = m * scale * scale;
                }
            }
            (Some(SecondOrder::Full(out)), Some(SecondOrder::Full(sq))) => {
                let m = &sq[j] - &raw * mu.transpose() - &mu * raw.transpose()
                    + &mu * mu.transpose() * occupancy;
                out[j] = &whitening * m * whitening.transpose();
            }
            _ => {}
        }
    }

    Ok(CSstats {
        n: stats.zeroth.clone(),
        f,
        s,
    })
}
