//! Log-domain primitives shared by every density and statistics routine.
//!
//! All mixture sums go through [`log_sum_exp`] so that likelihoods spanning
//! hundreds of orders of magnitude neither overflow nor underflow.

/// Numerical constants used across the crate.
pub mod constants {
    /// ln(2π)
    pub const LOG_2PI: f64 = 1.8378770664093453;

    /// Default floor for variances and covariance eigenvalues.
    pub const DEFAULT_VAR_FLOOR: f64 = 1e-3;

    /// Default occupancy below which a component is frozen during the M-step.
    pub const DEFAULT_MIN_OCCUPANCY: f64 = 1e-10;

    /// Tolerance on the sum of mixture weights.
    pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-8;

    /// Default relevance factor for MAP adaptation.
    pub const DEFAULT_RELEVANCE: f64 = 16.0;
}

/// Log of the sum of exponentials of `values`.
///
/// Subtracts the maximum before exponentiating. Returns `-inf` for an empty
/// slice or when every entry is `-inf`; returns `+inf` if any entry is `+inf`.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max_val = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    let sum: f64 = values.iter().map(|&v| (v - max_val).exp()).sum();
    max_val + sum.ln()
}

/// Normalizes a row of log-likelihoods into log-posteriors in place.
///
/// Returns the log-sum that was subtracted. If the log-sum is `-inf` (every
/// entry underflowed) the row is left untouched so that no NaN is produced;
/// callers check the returned value.
pub fn log_normalize(values: &mut [f64]) -> f64 {
    let lse = log_sum_exp(values);
    if lse.is_finite() {
        for v in values.iter_mut() {
            *v -= lse;
        }
    }
    lse
}

/// Returns true if `n` is a power of two (1 included).
pub fn is_power_of_two(n: usize) -> bool {
    n != 0 && n & (n - 1) == 0
}
