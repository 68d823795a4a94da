//! Baum-Welch sufficient statistics against a frozen mixture.
//!
//! The data batch is cut into contiguous chunks; every chunk is evaluated
//! against the same immutable [`DensityModel`] and produces partial
//! [`Stats`]; the partials are reduced by element-wise addition. Because the
//! reduction is a plain sum, the chunk count and worker order only affect
//! floating-point rounding.

use crate::{
    covariance::CovarianceKind,
    density::DensityModel,
    errors::{validate_data, GmmError, GmmResult},
    executor::{partition, Executor, Sequential},
    gmm::Gmm,
};
use nalgebra::{DMatrix, DMatrixView, DVector};

static SEQUENTIAL: Sequential = Sequential;

/// Highest order of statistics to accumulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatsOrder {
    /// Occupancy only
    Zeroth,
    /// Occupancy and first-order sums
    First,
    /// Occupancy, first- and second-order sums
    Second,
}

impl TryFrom<usize> for StatsOrder {
    type Error = GmmError;

    fn try_from(order: usize) -> GmmResult<Self> {
        match order {
            0 => Ok(StatsOrder::Zeroth),
            1 => Ok(StatsOrder::First),
            2 => Ok(StatsOrder::Second),
            _ => Err(GmmError::InvalidParameter {
                parameter: "order".to_string(),
                value: order as f64,
                constraint: "0, 1 or 2".to_string(),
            }),
        }
    }
}

/// Second-order sums, shaped by the covariance kind.
#[derive(Debug, Clone, PartialEq)]
pub enum SecondOrder {
    /// n × d sums of γ·x⊙x
    Diagonal(DMatrix<f64>),
    /// n matrices Σ_i γ_ij x_i x_iᵀ
    Full(Vec<DMatrix<f64>>),
}

impl SecondOrder {
    fn add_assign(&mut self, other: &SecondOrder) -> GmmResult<()> {
        match (self, other) {
            (SecondOrder::Diagonal(a), SecondOrder::Diagonal(b)) => *a += b,
            (SecondOrder::Full(a), SecondOrder::Full(b)) => {
                for (a, b) in a.iter_mut().zip(b) {
                    *a += b;
                }
            }
            _ => {
                return Err(GmmError::NumericalError {
                    reason: "cannot merge diagonal and full second-order statistics".to_string(),
                    operation: Some("merge".to_string()),
                })
            }
        }
        Ok(())
    }
}

/// Uncentered zero-, first- and second-order statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct Stats {
    /// Number of data points accumulated
    pub nx: usize,
    /// Dimensionality of the data
    pub d: usize,
    /// Total log-likelihood of the accumulated points (underflowed points excluded)
    pub llh: f64,
    /// Per-component occupancy Σ_i γ_ij
    pub zeroth: DVector<f64>,
    /// Per-component Σ_i γ_ij x_i, n × d
    pub first: Option<DMatrix<f64>>,
    /// Per-component second-order sums
    pub second: Option<SecondOrder>,
    /// Indices of points with zero density under every component
    pub underflow: Vec<usize>,
}

impl Stats {
    /// Empty statistics for `n` components in `d` dimensions.
    pub fn zeros(n: usize, d: usize, kind: CovarianceKind, order: StatsOrder) -> Self {
        let first = (order >= StatsOrder::First).then(|| DMatrix::zeros(n, d));
        let second = (order >= StatsOrder::Second).then(|| match kind {
            CovarianceKind::Diagonal => SecondOrder::Diagonal(DMatrix::zeros(n, d)),
            CovarianceKind::Full => SecondOrder::Full(vec![DMatrix::zeros(d, d); n]),
        });
        Self {
            nx: 0,
            d,
            llh: 0.0,
            zeroth: DVector::zeros(n),
            first,
            second,
            underflow: Vec::new(),
        }
    }

    /// Highest order present.
    pub fn order(&self) -> StatsOrder {
        match (&self.first, &self.second) {
            (_, Some(_)) => StatsOrder::Second,
            (Some(_), None) => StatsOrder::First,
            (None, None) => StatsOrder::Zeroth,
        }
    }

    /// Number of components.
    pub fn n(&self) -> usize {
        self.zeroth.len()
    }

    /// Adds `other` element-wise.
    pub fn merge(&mut self, other: &Stats) -> GmmResult<()> {
        if other.zeroth.len() != self.zeroth.len() || other.d != self.d || other.order() != self.order() {
            return Err(GmmError::ShapeMismatch {
                operation: "merge statistics".to_string(),
                expected: (self.n(), self.d),
                actual: (other.n(), other.d),
            });
        }
        self.nx += other.nx;
        self.llh += other.llh;
        self.zeroth += &other.zeroth;
        if let (Some(a), Some(b)) = (self.first.as_mut(), other.first.as_ref()) {
            *a += b;
        }
        if let (Some(a), Some(b)) = (self.second.as_mut(), other.second.as_ref()) {
            a.add_assign(b)?;
        }
        self.underflow.extend_from_slice(&other.underflow);
        Ok(())
    }

    /// Average log-likelihood per point and dimension; `None` for an empty batch.
    pub fn avll(&self) -> Option<f64> {
        if self.nx == 0 || self.d == 0 {
            return None;
        }
        Some(self.llh / self.nx as f64 / self.d as f64)
    }
}

/// Accumulates statistics of one chunk.
fn accumulate(
    model: &DensityModel,
    x: &DMatrixView<'_, f64>,
    offset: usize,
    kind: CovarianceKind,
    order: StatsOrder,
) -> Stats {
    let posterior = model.posterior(x, offset);
    let gamma = &posterior.post;

    // Underflowed rows carry zero posterior but may hold values whose square
    // overflows; zero them so 0·∞ cannot reach the sums.
    let mut cleaned = None;
    if !posterior.underflow.is_empty() && order >= StatsOrder::First {
        let mut xs = x.clone_owned();
        for &i in &posterior.underflow {
            xs.row_mut(i - offset).fill(0.0);
        }
        cleaned = Some(xs);
    }
    let x = match &cleaned {
        Some(xs) => xs.rows(0, xs.nrows()),
        None => x.rows(0, x.nrows()),
    };
    let x = &x;
    let mut stats = Stats::zeros(model.n(), model.d(), kind, StatsOrder::Zeroth);

    stats.nx = x.nrows();
    stats.llh = posterior
        .log_likelihood
        .iter()
        .filter(|v| v.is_finite())
        .sum();
    stats.zeroth = gamma.row_sum().transpose();

    if order >= StatsOrder::First {
        stats.first = Some(gamma.tr_mul(x));
    }
    if order >= StatsOrder::Second {
        stats.second = Some(match kind {
            CovarianceKind::Diagonal => SecondOrder::Diagonal(gamma.tr_mul(&x.component_mul(x))),
            CovarianceKind::Full => SecondOrder::Full(
                (0..model.n())
                    .map(|j| {
                        let weighted =
                            DMatrix::from_fn(x.nrows(), x.ncols(), |i, k| gamma[(i, j)] * x[(i, k)]);
                        x.tr_mul(&weighted)
                    })
                    .collect(),
            ),
        });
    }
    stats.underflow = posterior.underflow;
    stats
}

/// Statistics engine bound to a caller-supplied executor.
///
/// The GMM is borrowed immutably for the duration of each call, so no EM
/// update can run against it while workers read the snapshot.
#[derive(Debug)]
pub struct StatsEngine<'e, E: Executor = Sequential> {
    executor: &'e E,
    chunks: Option<usize>,
}

impl<E: Executor> Clone for StatsEngine<'_, E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E: Executor> Copy for StatsEngine<'_, E> {}

impl StatsEngine<'static, Sequential> {
    /// Single chunk on the calling thread.
    pub fn sequential() -> Self {
        Self {
            executor: &SEQUENTIAL,
            chunks: Some(1),
        }
    }
}

impl Default for StatsEngine<'static, Sequential> {
    fn default() -> Self {
        Self::sequential()
    }
}

impl<'e, E: Executor> StatsEngine<'e, E> {
    /// Engine using `executor`, one chunk per worker.
    pub fn new(executor: &'e E) -> Self {
        Self {
            executor,
            chunks: None,
        }
    }

    /// Overrides the number of chunks.
    pub fn with_chunks(mut self, chunks: usize) -> Self {
        self.chunks = Some(chunks.max(1));
        self
    }

    /// Number of chunks used for a batch of `nx` points.
    pub fn chunk_count(&self, nx: usize) -> usize {
        self.chunks
            .unwrap_or_else(|| self.executor.workers())
            .clamp(1, nx.max(1))
    }

    /// Baum-Welch statistics of `x` against the frozen `gmm`.
    pub fn stats(&self, gmm: &Gmm, x: &DMatrix<f64>, order: StatsOrder) -> GmmResult<Stats> {
        validate_data(x, gmm.d(), "stats")?;
        let model = DensityModel::new(gmm)?;
        let kind = gmm.kind();
        let ranges = partition(x.nrows(), self.chunk_count(x.nrows()));

        let partials = self.executor.map_chunks(&ranges, |r| {
            accumulate(&model, &x.rows(r.start, r.len()), r.start, kind, order)
        });

        let mut total = Stats::zeros(gmm.n(), gmm.d(), kind, order);
        for partial in &partials {
            total.merge(partial)?;
        }

        if !total.underflow.is_empty() {
            log::warn!(
                "{} of {} points have zero density under every component and were not accumulated",
                total.underflow.len(),
                total.nx
            );
        }
        log::debug!(
            "accumulated order {:?} statistics of {} points in {} chunks",
            order,
            total.nx,
            ranges.len()
        );
        Ok(total)
    }
}

/// Sequential Baum-Welch statistics; see [`StatsEngine::stats`].
pub fn stats(gmm: &Gmm, x: &DMatrix<f64>, order: StatsOrder) -> GmmResult<Stats> {
    StatsEngine::sequential().stats(gmm, x, order)
}
