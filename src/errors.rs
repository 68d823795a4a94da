//! Error types and validation functions for mixture model operations.
//!
//! Structural problems (bad dimensions, bad configuration) are reported through
//! [`GmmError`] and propagate to the caller unmodified. Numerical floors are
//! applied locally by the algorithms and never surface here.

use nalgebra::DMatrix;
use std::sync::Arc;
use thiserror::Error;

/// Error types for mixture model construction, training and scoring.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum GmmError {
    /// Insufficient data for the requested operation.
    #[error("Insufficient data: need at least {required} points, got {actual}")]
    InsufficientData {
        /// Minimum required data points
        required: usize,
        /// Actual number of data points provided
        actual: usize,
    },

    /// Invalid parameter value.
    #[error("Invalid parameter: {parameter} = {value}, expected {constraint}")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value provided
        value: f64,
        /// Valid range or constraint description
        constraint: String,
    },

    /// Split initialization needs a power-of-two component count.
    #[error("Split initialization requires a power-of-two number of components, got {n}")]
    NotPowerOfTwo {
        /// Requested number of components
        n: usize,
    },

    /// Data dimensionality does not match the model.
    #[error("Dimension mismatch in {operation}: expected d = {expected}, got d = {actual}")]
    DimensionMismatch {
        /// Operation that received the data
        operation: String,
        /// Dimension declared by the model
        expected: usize,
        /// Dimension of the supplied data
        actual: usize,
    },

    /// Matrix or vector has the wrong shape.
    #[error("Shape mismatch in {operation}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Operation that detected the mismatch
        operation: String,
        /// Expected (rows, columns)
        expected: (usize, usize),
        /// Actual (rows, columns)
        actual: (usize, usize),
    },

    /// Cholesky factorization of a full covariance failed.
    #[error("Covariance of component {component} is not positive definite: {reason}")]
    FactorizationFailed {
        /// Index of the offending component
        component: usize,
        /// Description of the matrix and the failure
        reason: String,
    },

    /// Numerical computation error.
    #[error("Numerical computation failed: {reason}")]
    NumericalError {
        /// Detailed reason for numerical failure
        reason: String,
        /// Operation that failed
        operation: Option<String>,
    },

    /// Worker pool could not be created.
    #[error("Concurrent execution failed: {resource}")]
    ConcurrencyError {
        /// Resource that couldn't be set up
        resource: String,
    },

    /// I/O operation error.
    #[error("I/O operation failed: {operation}")]
    IoError {
        /// I/O operation that failed
        operation: String,
        /// Underlying error if available
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// Serialization/deserialization error.
    #[error("Serialization failed: {format}: {reason}")]
    SerializationError {
        /// Format that failed (JSON, ...)
        format: String,
        /// Underlying message
        reason: String,
    },
}

/// Result type for mixture model operations.
pub type GmmResult<T> = Result<T, GmmError>;

/// Validates that a parameter is within expected bounds (inclusive).
///
/// # Example
/// ```rust
/// use gmm_engine::errors::validate_parameter;
///
/// assert!(validate_parameter(0.5, 0.0, 1.0, "min_weight").is_ok());
/// assert!(validate_parameter(1.5, 0.0, 1.0, "min_weight").is_err());
/// ```
pub fn validate_parameter(value: f64, min: f64, max: f64, name: &str) -> GmmResult<()> {
    if value.is_nan() {
        return Err(GmmError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: "must not be NaN".to_string(),
        });
    }

    if min.is_nan() || max.is_nan() || min > max {
        return Err(GmmError::NumericalError {
            reason: format!(
                "Invalid bounds for parameter {}: min={}, max={}",
                name, min, max
            ),
            operation: None,
        });
    }

    if value < min || value > max {
        Err(GmmError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: format!("[{}, {}]", min, max),
        })
    } else {
        Ok(())
    }
}

/// Validates that a count is at least `min`.
pub fn validate_count(value: usize, min: usize, name: &str) -> GmmResult<()> {
    if value < min {
        return Err(GmmError::InvalidParameter {
            parameter: name.to_string(),
            value: value as f64,
            constraint: format!(">= {}", min),
        });
    }
    Ok(())
}

/// Validates that all values in a slice are finite.
///
/// Returns on the first non-finite value, naming its index.
pub fn validate_all_finite(data: &[f64], name: &str) -> GmmResult<()> {
    if let Some((i, &value)) = data.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(GmmError::NumericalError {
            reason: format!("{} contains non-finite value at index {}: {}", name, i, value),
            operation: None,
        });
    }
    Ok(())
}

/// Validates a data matrix against the model dimensionality.
///
/// Rows are data points; the column count must equal `d` and every entry must
/// be finite. Nothing is reshaped or truncated.
pub fn validate_data(x: &DMatrix<f64>, d: usize, operation: &str) -> GmmResult<()> {
    if x.ncols() != d {
        return Err(GmmError::DimensionMismatch {
            operation: operation.to_string(),
            expected: d,
            actual: x.ncols(),
        });
    }

    // Column-major storage: convert the flat index back to (row, column).
    if let Some((idx, &value)) = x.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        let nrows = x.nrows().max(1);
        return Err(GmmError::NumericalError {
            reason: format!(
                "data contains non-finite value at row {}, column {}: {}",
                idx % nrows,
                idx / nrows,
                value
            ),
            operation: Some(operation.to_string()),
        });
    }
    Ok(())
}

/// Validates that a data matrix holds at least `min_rows` points.
pub fn validate_data_length(x: &DMatrix<f64>, min_rows: usize) -> GmmResult<()> {
    if x.nrows() < min_rows {
        return Err(GmmError::InsufficientData {
            required: min_rows,
            actual: x.nrows(),
        });
    }
    Ok(())
}

/// Validates the shape of a matrix.
pub fn validate_shape(
    m: &DMatrix<f64>,
    expected: (usize, usize),
    operation: &str,
) -> GmmResult<()> {
    if m.shape() != expected {
        return Err(GmmError::ShapeMismatch {
            operation: operation.to_string(),
            expected,
            actual: m.shape(),
        });
    }
    Ok(())
}
