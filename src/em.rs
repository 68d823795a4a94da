//! Expectation-Maximization training loop.
//!
//! Each iteration accumulates second-order Baum-Welch statistics against the
//! current parameters (E-step) and re-estimates weights, means and
//! covariances from them in closed form (M-step). The loop runs a fixed
//! number of iterations; callers wanting an early stop drive
//! [`EmTrainer::step`] themselves and stop between iterations.

use crate::{
    config::EmConfig,
    covariance::{floor_eigenvalues, Covariances},
    errors::{validate_data, validate_data_length, GmmError, GmmResult},
    executor::{Executor, Sequential},
    gmm::Gmm,
    stats::{SecondOrder, Stats, StatsEngine, StatsOrder},
};
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Lifecycle of an EM run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmState {
    /// No iteration done yet
    Initialized,
    /// At least one iteration done, more to go
    Iterating {
        /// Iterations completed so far
        completed: usize,
    },
    /// Configured iteration count exhausted
    Finished {
        /// Iterations performed
        iterations: usize,
    },
}

/// Outcome of an EM run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EmReport {
    /// Average log-likelihood after each iteration (empty unless tracked)
    pub avll: Vec<f64>,
    /// Iterations performed
    pub iterations: usize,
}

impl EmReport {
    /// Average log-likelihood after the last iteration, if tracked.
    pub fn final_avll(&self) -> Option<f64> {
        self.avll.last().copied()
    }
}

/// Stepwise EM driver over a mutable model and a fixed data batch.
pub struct EmTrainer<'a, 'e, E: Executor = Sequential> {
    gmm: &'a mut Gmm,
    x: &'a DMatrix<f64>,
    config: EmConfig,
    engine: StatsEngine<'e, E>,
    state: EmState,
    avll: Vec<f64>,
}

impl<'a> EmTrainer<'a, 'static, Sequential> {
    /// Sequential trainer.
    pub fn new(gmm: &'a mut Gmm, x: &'a DMatrix<f64>, config: &EmConfig) -> GmmResult<Self> {
        Self::with_engine(gmm, x, config, StatsEngine::sequential())
    }
}

impl<'a, 'e, E: Executor> EmTrainer<'a, 'e, E> {
    /// Trainer whose E-step runs on `engine`.
    pub fn with_engine(
        gmm: &'a mut Gmm,
        x: &'a DMatrix<f64>,
        config: &EmConfig,
        engine: StatsEngine<'e, E>,
    ) -> GmmResult<Self> {
        config.validate()?;
        validate_data_length(x, 1)?;
        validate_data(x, gmm.d(), "em")?;
        Ok(Self {
            gmm,
            x,
            config: config.clone(),
            engine,
            state: EmState::Initialized,
            avll: Vec::new(),
        })
    }

    /// Current state.
    pub fn state(&self) -> EmState {
        self.state
    }

    /// The model being trained.
    pub fn gmm(&self) -> &Gmm {
        &*self.gmm
    }

    /// Average log-likelihoods recorded so far.
    pub fn avll_history(&self) -> &[f64] {
        &self.avll
    }

    fn completed(&self) -> usize {
        match self.state {
            EmState::Initialized => 0,
            EmState::Iterating { completed } => completed,
            EmState::Finished { iterations } => iterations,
        }
    }

    /// Performs one iteration. Returns `false` once the iteration count is
    /// exhausted, without touching the model.
    pub fn step(&mut self) -> GmmResult<bool> {
        let completed = self.completed();
        if matches!(self.state, EmState::Finished { .. }) || completed >= self.config.n_iter {
            self.state = EmState::Finished {
                iterations: completed,
            };
            return Ok(false);
        }

        let stats = self.engine.stats(self.gmm, self.x, StatsOrder::Second)?;
        let (weights, means, covariances) = maximize(self.gmm, &stats, &self.config)?;
        self.gmm.set_parameters(weights, means, covariances);

        let iteration = completed + 1;
        if self.config.track_logll {
            let avll = self
                .engine
                .stats(self.gmm, self.x, StatsOrder::Zeroth)?
                .avll()
                .ok_or(GmmError::InsufficientData {
                    required: 1,
                    actual: 0,
                })?;
            log::debug!("EM iteration {}: avll = {:.6}", iteration, avll);
            self.gmm
                .add_history(format!("EM iteration {}: avll = {:.6}", iteration, avll));
            self.avll.push(avll);
        } else {
            log::debug!("EM iteration {} done", iteration);
        }

        self.state = if iteration >= self.config.n_iter {
            EmState::Finished {
                iterations: iteration,
            }
        } else {
            EmState::Iterating {
                completed: iteration,
            }
        };
        Ok(true)
    }

    /// Runs the remaining iterations and summarizes the run in the history.
    pub fn run(mut self) -> GmmResult<EmReport> {
        while self.step()? {}
        let iterations = self.completed();
        self.gmm.add_history(format!(
            "EM with {} iterations on {} data points",
            iterations,
            self.x.nrows()
        ));
        Ok(EmReport {
            avll: self.avll,
            iterations,
        })
    }
}

/// M-step: closed-form re-estimation from second-order statistics.
fn maximize(
    gmm: &Gmm,
    stats: &Stats,
    config: &EmConfig,
) -> GmmResult<(DVector<f64>, DMatrix<f64>, Covariances)> {
    let (Some(first), Some(second)) = (stats.first.as_ref(), stats.second.as_ref()) else {
        return Err(GmmError::NumericalError {
            reason: "EM needs second-order statistics".to_string(),
            operation: Some("em".to_string()),
        });
    };
    let total = stats.zeroth.sum();
    if !(total > 0.0) {
        return Err(GmmError::NumericalError {
            reason: format!(
                "no data point has non-zero density ({} underflowed)",
                stats.underflow.len()
            ),
            operation: Some("em".to_string()),
        });
    }

    let d = gmm.d();
    let weights = &stats.zeroth / stats.nx as f64;
    let mut means = gmm.means().clone();
    let mut covariances = gmm.covariances().clone();
    let mut frozen = Vec::new();

    for j in 0..gmm.n() {
        let occupancy = stats.zeroth[j];
        if occupancy < config.min_occupancy {
            frozen.push(j);
            continue;
        }
        let mean = first.row(j) / occupancy;
        means.row_mut(j).copy_from(&mean);

        match (&mut covariances, second) {
            (Covariances::Diagonal(v), SecondOrder::Diagonal(s)) => {
                for k in 0..d {
                    let var = s[(j, k)] / occupancy - mean[k] * mean[k];
                    v[(j, k)] = var.max(config.var_floor);
                }
            }
            (Covariances::Full(c), SecondOrder::Full(s)) => {
                let mu = mean.transpose();
                let cov = &s[j] / occupancy - &mu * mu.transpose();
                c[j] = floor_eigenvalues(&cov, config.var_floor);
            }
            _ => {
                return Err(GmmError::NumericalError {
                    reason: "statistics do not match the covariance kind".to_string(),
                    operation: Some("em".to_string()),
                })
            }
        }
    }

    if !frozen.is_empty() {
        log::warn!(
            "{} components below occupancy {} kept their mean and covariance: {:?}",
            frozen.len(),
            config.min_occupancy,
            frozen
        );
    }
    Ok((weights, means, covariances))
}

impl Gmm {
    /// Runs `config.n_iter` sequential EM iterations on `x`.
    pub fn em(&mut self, x: &DMatrix<f64>, config: &EmConfig) -> GmmResult<EmReport> {
        EmTrainer::new(self, x, config)?.run()
    }

    /// As [`Gmm::em`], with the E-step on `engine`.
    pub fn em_with<E: Executor>(
        &mut self,
        x: &DMatrix<f64>,
        config: &EmConfig,
        engine: StatsEngine<'_, E>,
    ) -> GmmResult<EmReport> {
        EmTrainer::with_engine(self, x, config, engine)?.run()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::CovarianceKind;

    fn two_clusters() -> DMatrix<f64> {
        DMatrix::from_fn(200, 2, |i, k| {
            let centre = if i % 2 == 0 { -3.0 } else { 3.0 };
            centre + ((i * 7 + k * 13) % 17) as f64 / 17.0 - 0.5
        })
    }

    fn start(kind: CovarianceKind) -> Gmm {
        let gmm = Gmm::from_parts(
            DVector::from_vec(vec![0.5, 0.5]),
            DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 1.0, 0.0]),
            Covariances::identity(2, 2, CovarianceKind::Diagonal),
        )
        .unwrap();
        match kind {
            CovarianceKind::Diagonal => gmm,
            CovarianceKind::Full => gmm.to_full(),
        }
    }

    #[test]
    fn test_em_monotone_avll() {
        let x = two_clusters();
        for kind in [CovarianceKind::Diagonal, CovarianceKind::Full] {
            let mut gmm = start(kind);
            let report = gmm.em(&x, &EmConfig::with_iterations(8)).unwrap();
            assert_eq!(report.iterations, 8);
            assert_eq!(report.avll.len(), 8);
            for pair in report.avll.windows(2) {
                assert!(pair[1] >= pair[0] - 1e-9, "avll decreased: {:?}", report.avll);
            }
            assert!(gmm.validate().is_ok());
        }
    }

    #[test]
    fn test_em_finds_cluster_centres() {
        let x = two_clusters();
        let mut gmm = start(CovarianceKind::Diagonal);
        gmm.em(&x, &EmConfig::with_iterations(20)).unwrap();
        let (lo, hi) = if gmm.means()[(0, 0)] < gmm.means()[(1, 0)] { (0, 1) } else { (1, 0) };
        assert!((gmm.means()[(lo, 0)] + 3.0).abs() < 0.2);
        assert!((gmm.means()[(hi, 0)] - 3.0).abs() < 0.2);
        assert!((gmm.weights()[0] - 0.5).abs() < 0.05);
    }

    #[test]
    fn test_stepwise_state_machine() {
        let x = two_clusters();
        let mut gmm = start(CovarianceKind::Diagonal);
        let mut trainer = EmTrainer::new(&mut gmm, &x, &EmConfig::with_iterations(2)).unwrap();
        assert_eq!(trainer.state(), EmState::Initialized);
        assert!(trainer.step().unwrap());
        assert_eq!(trainer.state(), EmState::Iterating { completed: 1 });
        assert!(trainer.step().unwrap());
        assert_eq!(trainer.state(), EmState::Finished { iterations: 2 });
        assert!(!trainer.step().unwrap());
        assert_eq!(trainer.avll_history().len(), 2);
    }

    #[test]
    fn test_untracked_run_records_no_avll() {
        let x = two_clusters();
        let mut gmm = start(CovarianceKind::Diagonal);
        let before = gmm.history().len();
        let config = EmConfig {
            track_logll: false,
            ..EmConfig::with_iterations(3)
        };
        let report = gmm.em(&x, &config).unwrap();
        assert!(report.avll.is_empty());
        assert_eq!(report.final_avll(), None);
        assert_eq!(gmm.history().len(), before + 1);
    }

    #[test]
    fn test_empty_component_is_frozen() {
        let x = DMatrix::from_fn(50, 1, |i, _| (i % 5) as f64 * 0.1);
        let mut gmm = Gmm::from_parts(
            DVector::from_vec(vec![0.5, 0.5]),
            DMatrix::from_row_slice(2, 1, &[0.2, 1e4]),
            Covariances::Diagonal(DMatrix::from_row_slice(2, 1, &[1.0, 1e-2])),
        )
        .unwrap();
        gmm.em(&x, &EmConfig::with_iterations(2)).unwrap();
        assert_eq!(gmm.means()[(1, 0)], 1e4);
        assert_eq!(gmm.covariances().variances(1)[0], 1e-2);
        assert!(gmm.weights()[1] < 1e-10);
        assert!((gmm.weights().sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_variance_floor_applies() {
        let x = DMatrix::from_element(20, 2, 1.5);
        let mut gmm = Gmm::new(1, 2, CovarianceKind::Full).unwrap();
        let config = EmConfig {
            var_floor: 0.01,
            ..EmConfig::with_iterations(1)
        };
        gmm.em(&x, &config).unwrap();
        let cov = gmm.covariances().dense(0);
        assert!((cov[(0, 0)] - 0.01).abs() < 1e-10);
        assert!((gmm.means()[(0, 1)] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_em_rejects_wrong_dimension() {
        let mut gmm = Gmm::new(2, 3, CovarianceKind::Diagonal).unwrap();
        let x = DMatrix::zeros(10, 2);
        assert!(matches!(
            gmm.em(&x, &EmConfig::default()),
            Err(GmmError::DimensionMismatch { .. })
        ));
    }
}
