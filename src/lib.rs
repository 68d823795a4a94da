//! # Gaussian Mixture Models
//!
//! EM training and sufficient-statistics engine for Gaussian mixture models
//! with diagonal or full covariances.
//!
//! This crate estimates mixture parameters by Expectation-Maximization,
//! evaluates per-component and mixture log-likelihoods in the log domain,
//! grows mixtures by binary splitting, and derives the Baum-Welch statistics
//! used for MAP adaptation of a universal background model (UBM) and for
//! linear dot-scoring.
//!
//! ## Key Features
//!
//! - **Diagonal and full covariances** behind one closed [`Covariances`] enum
//! - **Log-domain densities**: stable posteriors with per-point underflow diagnostics
//! - **EM training**: fixed iteration count, variance/eigenvalue floors, occupancy guards
//! - **Initialization**: single Gaussian from data, k-means seeding, binary splitting
//! - **Sufficient statistics**: chunked map-reduce over a caller-supplied [`Executor`]
//! - **Adaptation and scoring**: MAP adaptation, centered statistics, dot-scoring
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gmm_engine::{CovarianceKind, Gmm, InitMethod, TrainingConfig};
//! use nalgebra::DMatrix;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1000 points in 2 dimensions, one point per row
//!     let x = DMatrix::from_fn(1000, 2, |i, k| ((i * 37 + k * 11) % 101) as f64 / 10.0);
//!
//!     let gmm = Gmm::train(
//!         &x,
//!         8,
//!         CovarianceKind::Diagonal,
//!         InitMethod::Split,
//!         &TrainingConfig::standard(),
//!     )?;
//!     println!("avll = {:.4}", gmm.avll(&x)?);
//!
//!     for entry in gmm.history().entries() {
//!         println!("{}", entry);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Parallel statistics
//!
//! With the `parallel` feature (default), [`ThreadPoolExecutor`] runs the
//! per-chunk work on a private rayon pool. Results match the sequential path up
//! to floating-point summation order.
//!
//! ```rust,no_run
//! # #[cfg(feature = "parallel")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use gmm_engine::{CovarianceKind, Gmm, StatsEngine, StatsOrder, ThreadPoolExecutor};
//! use nalgebra::DMatrix;
//!
//! let x = DMatrix::from_fn(10_000, 4, |i, k| ((i + k) % 13) as f64);
//! let ubm = Gmm::from_data(&x, CovarianceKind::Full)?;
//! let pool = ThreadPoolExecutor::new(4)?;
//! let stats = StatsEngine::new(&pool).stats(&ubm, &x, StatsOrder::Second)?;
//! assert_eq!(stats.nx, 10_000);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "parallel"))]
//! # fn main() {}
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod covariance;
pub mod errors;
pub mod history;
pub mod math_utils;

// Model and algorithms
pub mod adaptation;
pub mod csstats;
pub mod density;
pub mod em;
pub mod executor;
pub mod gmm;
pub mod kmeans;
pub mod split;
pub mod stats;

#[cfg(feature = "serde")]
#[cfg_attr(docsrs, doc(cfg(feature = "serde")))]
pub mod persistence;

// Re-exports for convenience - main public API
pub use config::{EmConfig, InitMethod, KMeansConfig, MapOptions, SplitConfig, TrainingConfig};
pub use covariance::{CovarianceKind, Covariances};
pub use errors::{GmmError, GmmResult};
pub use gmm::Gmm;
pub use history::{History, HistoryEntry};

// Density and posterior exports
pub use density::{avll, gmm_posterior, llpg, post, DensityModel, Posterior};

// Training exports
pub use em::{EmReport, EmState, EmTrainer};
pub use kmeans::{Clusterer, Clustering, KMeans};
pub use split::{split, split_to};

// Statistics, adaptation and scoring exports
pub use adaptation::{dotscore, maxapost};
pub use csstats::{csstats, CSstats};
pub use executor::{partition, Executor, Sequential};
#[cfg(feature = "parallel")]
pub use executor::ThreadPoolExecutor;
pub use stats::{stats, SecondOrder, Stats, StatsEngine, StatsOrder};

#[cfg(feature = "serde")]
pub use persistence::{load_json, save_json};
