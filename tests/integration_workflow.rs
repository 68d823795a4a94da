//! Integration tests for full training and scoring workflows
//!
//! These tests drive the public API the way a recognition pipeline does:
//! train a background model, adapt it to enrollment data, and score test
//! batches against it.

use assert_approx_eq::assert_approx_eq;
use gmm_engine::{
    csstats, dotscore, maxapost, math_utils::constants::LOG_2PI, stats, CSstats, CovarianceKind,
    Covariances, EmConfig, Gmm, InitMethod, MapOptions, StatsOrder, TrainingConfig,
};
use nalgebra::{DMatrix, DVector};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, Normal};

/// Draws `nx` points per center from isotropic Gaussians of standard deviation `sd`.
fn blobs(centers: &[[f64; 2]], nx: usize, sd: f64, seed: u64) -> DMatrix<f64> {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0, sd).unwrap();
    let mut x = DMatrix::zeros(centers.len() * nx, 2);
    for (c, center) in centers.iter().enumerate() {
        for i in 0..nx {
            for k in 0..2 {
                x[(c * nx + i, k)] = center[k] + noise.sample(&mut rng);
            }
        }
    }
    x
}

/// Test scenario: a single Gaussian fitted to standard normal data
///
/// After one EM iteration the mean stays at the origin and the average
/// log-likelihood per dimension is that of a unit-variance Gaussian,
/// −½(ln 2π + 1).
#[test]
fn test_single_gaussian_em_sanity() {
    let x = blobs(&[[0.0, 0.0]], 1000, 1.0, 42);
    let mut gmm = Gmm::new(1, 2, CovarianceKind::Diagonal).unwrap();
    let report = gmm.em(&x, &EmConfig::with_iterations(1)).unwrap();

    assert!(gmm.means()[(0, 0)].abs() < 0.1);
    assert!(gmm.means()[(0, 1)].abs() < 0.1);
    let avll = report.final_avll().unwrap();
    assert_approx_eq!(avll, -0.5 * (LOG_2PI + 1.0), 0.1);
    assert_approx_eq!(gmm.avll(&x).unwrap(), avll, 1e-12);
}

/// Test scenario: splitting a single Gaussian
#[test]
fn test_split_single_gaussian_scenario() {
    let gmm = Gmm::from_parts(
        DVector::from_vec(vec![1.0]),
        DMatrix::from_row_slice(1, 2, &[1.0, 1.0]),
        Covariances::Diagonal(DMatrix::from_row_slice(1, 2, &[9.0, 1.0])),
    )
    .unwrap();
    let split = gmm.split(1e-5, 0.2).unwrap();

    assert_eq!(split.n(), 2);
    assert_approx_eq!(split.weights()[0], 0.5, 1e-12);
    assert_approx_eq!(split.weights()[1], 0.5, 1e-12);
    // offset 0.2·σ along the dimension of largest variance
    assert_approx_eq!(split.means()[(0, 0)], 1.0 - 0.6, 1e-12);
    assert_approx_eq!(split.means()[(1, 0)], 1.0 + 0.6, 1e-12);
    assert_approx_eq!(split.means()[(0, 1)], 1.0, 1e-12);
}

/// Test scenario: zero-order statistics of ten points
#[test]
fn test_zero_order_statistics_scenario() {
    let x = blobs(&[[-2.0, 0.0], [2.0, 0.0]], 5, 0.5, 3);
    let gmm = Gmm::train(&x, 2, CovarianceKind::Diagonal, InitMethod::KMeans, &TrainingConfig::quick())
        .unwrap();
    let s = stats(&gmm, &x, StatsOrder::Zeroth).unwrap();
    assert_eq!(s.zeroth.len(), 2);
    assert_approx_eq!(s.zeroth.sum(), 10.0, 1e-10);
}

/// Test scenario: both initializers recover three well-separated clusters
#[test]
fn test_training_recovers_clusters() {
    let centers = [[-6.0, 0.0], [0.0, 6.0], [6.0, 0.0]];
    let x = blobs(&centers, 300, 0.7, 11);

    for kind in [CovarianceKind::Diagonal, CovarianceKind::Full] {
        let gmm = Gmm::train(&x, 3, kind, InitMethod::KMeans, &TrainingConfig::standard()).unwrap();
        assert!(gmm.validate().is_ok());
        for center in &centers {
            let closest = (0..3)
                .map(|j| {
                    let dx = gmm.means()[(j, 0)] - center[0];
                    let dy = gmm.means()[(j, 1)] - center[1];
                    (dx * dx + dy * dy).sqrt()
                })
                .fold(f64::INFINITY, f64::min);
            assert!(closest < 0.3, "no component near {:?} ({:?})", center, kind);
        }
        for &w in gmm.weights().iter() {
            assert_approx_eq!(w, 1.0 / 3.0, 0.05);
        }
    }
}

/// Test scenario: split initialization to a power-of-two mixture
#[test]
fn test_split_training_workflow() {
    let x = blobs(&[[-4.0, -4.0], [-4.0, 4.0], [4.0, -4.0], [4.0, 4.0]], 200, 0.8, 5);
    let gmm = Gmm::train(&x, 4, CovarianceKind::Diagonal, InitMethod::Split, &TrainingConfig::standard())
        .unwrap();
    assert_eq!(gmm.n(), 4);
    assert!(gmm.validate().is_ok());

    let single = Gmm::from_data(&x, CovarianceKind::Diagonal).unwrap();
    assert!(gmm.avll(&x).unwrap() > single.avll(&x).unwrap());

    // initial entry, one split per doubling, EM runs in between
    let events: Vec<&str> = gmm.history().entries().iter().map(|e| e.event()).collect();
    assert_eq!(events.iter().filter(|e| e.starts_with("Split")).count(), 2);
    assert!(events.iter().any(|e| e.starts_with("EM with")));
}

/// Test scenario: EM never lowers the average log-likelihood
#[test]
fn test_em_monotonicity_on_random_data() {
    let x = blobs(&[[-1.0, 0.0], [1.5, 1.0], [0.0, -2.0]], 150, 1.0, 23);
    for kind in [CovarianceKind::Diagonal, CovarianceKind::Full] {
        let mut gmm = Gmm::from_data(&x, kind).unwrap().split(1e-5, 0.5).unwrap().split(1e-5, 0.5).unwrap();
        let report = gmm.em(&x, &EmConfig::with_iterations(15)).unwrap();
        for pair in report.avll.windows(2) {
            assert!(pair[1] >= pair[0] - 1e-9, "{:?}: {:?}", kind, report.avll);
        }
    }
}

/// Test scenario: sampled data recovers the generating mixture
#[test]
fn test_sample_and_refit() {
    let truth = Gmm::from_parts(
        DVector::from_vec(vec![0.3, 0.7]),
        DMatrix::from_row_slice(2, 2, &[-5.0, 0.0, 5.0, 1.0]),
        Covariances::Full(vec![
            DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 1.0]),
            DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.0, 2.0]),
        ]),
    )
    .unwrap();
    let mut rng = ChaCha20Rng::seed_from_u64(99);
    let x = truth.sample(4000, &mut rng).unwrap();

    let fitted = Gmm::train(&x, 2, CovarianceKind::Full, InitMethod::KMeans, &TrainingConfig::standard())
        .unwrap();
    let j = if fitted.means()[(0, 0)] > 0.0 { 0 } else { 1 };
    assert_approx_eq!(fitted.weights()[j], 0.7, 0.03);
    assert_approx_eq!(fitted.means()[(j, 1)], 1.0, 0.1);
    let cov = fitted.covariances().dense(1 - j);
    assert_approx_eq!(cov[(0, 1)], 0.5, 0.1);
}

/// Test scenario: enrollment by MAP adaptation and linear scoring
///
/// A background model is trained on pooled data from two sources. Test data
/// from the enrolled source must score higher than data from the other one.
#[test]
fn test_map_adaptation_and_dotscore() {
    let a = blobs(&[[2.0, 0.0]], 200, 1.0, 7);
    let b = blobs(&[[-2.0, 0.0]], 200, 1.0, 8);
    let a_test = blobs(&[[2.0, 0.0]], 100, 1.0, 9);
    let b_test = blobs(&[[-2.0, 0.0]], 100, 1.0, 10);
    let pooled = DMatrix::from_fn(400, 2, |i, k| if i < 200 { a[(i, k)] } else { b[(i - 200, k)] });

    let ubm = Gmm::from_data(&pooled, CovarianceKind::Diagonal).unwrap();

    let enrolled = maxapost(&ubm, &a, 16.0, MapOptions::default()).unwrap();
    assert!(enrolled.means()[(0, 0)] > ubm.means()[(0, 0)] + 1.0);
    assert!(enrolled.avll(&a_test).unwrap() > ubm.avll(&a_test).unwrap());

    let enroll = CSstats::new(&ubm, &a).unwrap();
    let same = dotscore(&CSstats::new(&ubm, &a_test).unwrap(), &enroll, 16.0).unwrap();
    let other = dotscore(&CSstats::new(&ubm, &b_test).unwrap(), &enroll, 16.0).unwrap();
    assert!(same > 0.0);
    assert!(same > other);
}

/// Test scenario: MAP relevance limits
#[test]
fn test_map_relevance_limits() {
    let x = blobs(&[[1.0, -1.0]], 100, 0.5, 17);
    let ubm = Gmm::new(1, 2, CovarianceKind::Diagonal).unwrap();

    let stiff = maxapost(&ubm, &x, 1e12, MapOptions::all()).unwrap();
    assert_approx_eq!(stiff.means()[(0, 0)], 0.0, 1e-6);
    assert_approx_eq!(stiff.covariances().variances(0)[0], 1.0, 1e-6);

    let free = maxapost(&ubm, &x, 0.0, MapOptions::default()).unwrap();
    let data_mean = x.row_mean();
    assert_approx_eq!(free.means()[(0, 0)], data_mean[0], 1e-10);
    assert_approx_eq!(free.means()[(0, 1)], data_mean[1], 1e-10);
}

/// Test scenario: centered statistics are additive across batches
#[test]
fn test_centered_statistics_are_additive() {
    let x = blobs(&[[0.5, 0.5], [-1.0, 2.0]], 50, 1.0, 31);
    let ubm = Gmm::from_data(&x, CovarianceKind::Full).unwrap().split(1e-5, 0.2).unwrap();
    let whole = csstats(&ubm, &x, StatsOrder::First).unwrap();
    let top = csstats(&ubm, &x.rows(0, 40).into_owned(), StatsOrder::First).unwrap();
    let bottom = csstats(&ubm, &x.rows(40, 60).into_owned(), StatsOrder::First).unwrap();

    assert!((&whole.n - (&top.n + &bottom.n)).amax() < 1e-10);
    assert!((&whole.f - (&top.f + &bottom.f)).amax() < 1e-10);
    assert_eq!(whole.supervector().len(), 2 * 2);
}
