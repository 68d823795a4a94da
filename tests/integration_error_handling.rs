//! Integration tests for error handling and invalid input scenarios
//!
//! Every entry point must reject malformed input with a structured error and
//! never hand back a partially constructed model.

use gmm_engine::{
    avll, csstats, dotscore, errors::GmmError, llpg, post, split_to, stats, CSstats, Clusterer,
    Clustering, CovarianceKind, Covariances, EmConfig, Gmm, GmmResult, InitMethod, MapOptions,
    SplitConfig, StatsOrder, TrainingConfig,
};
use nalgebra::{DMatrix, DVector};

fn data(nx: usize, d: usize) -> DMatrix<f64> {
    DMatrix::from_fn(nx, d, |i, k| ((i * 7 + k * 3) % 10) as f64 * 0.3)
}

/// Test scenario: constructing models with empty shapes
#[test]
fn test_construction_errors() {
    match Gmm::new(0, 3, CovarianceKind::Diagonal) {
        Err(GmmError::InvalidParameter { parameter, .. }) => assert_eq!(parameter, "n"),
        other => panic!("Expected InvalidParameter, got {:?}", other),
    }
    assert!(matches!(
        Gmm::new(2, 0, CovarianceKind::Full),
        Err(GmmError::InvalidParameter { .. })
    ));
    assert!(matches!(
        Gmm::from_data(&DMatrix::zeros(0, 2), CovarianceKind::Diagonal),
        Err(GmmError::InsufficientData { .. })
    ));
}

/// Test scenario: split initialization with a non-power-of-two size
#[test]
fn test_split_requires_power_of_two() {
    let x = data(100, 2);
    for n in [3, 5, 6, 12] {
        match Gmm::train(&x, n, CovarianceKind::Diagonal, InitMethod::Split, &TrainingConfig::quick()) {
            Err(GmmError::NotPowerOfTwo { n: reported }) => assert_eq!(reported, n),
            other => panic!("Expected NotPowerOfTwo for {}, got {:?}", n, other),
        }
    }

    let gmm = Gmm::new(2, 2, CovarianceKind::Diagonal).unwrap();
    assert!(matches!(
        split_to(&gmm, 6, &x, &TrainingConfig::quick()),
        Err(GmmError::NotPowerOfTwo { n: 6 })
    ));
    assert!(matches!(
        split_to(&gmm, 1, &x, &TrainingConfig::quick()),
        Err(GmmError::NotPowerOfTwo { .. })
    ));
}

/// Test scenario: data dimensionality differs from the model's
#[test]
fn test_dimension_mismatch_everywhere() {
    let mut gmm = Gmm::new(2, 3, CovarianceKind::Diagonal).unwrap();
    let x = data(10, 2);

    let is_mismatch = |r: GmmResult<()>| match r {
        Err(GmmError::DimensionMismatch { expected, actual, .. }) => {
            assert_eq!((expected, actual), (3, 2));
        }
        other => panic!("Expected DimensionMismatch, got {:?}", other),
    };
    is_mismatch(llpg(&gmm, &x).map(|_| ()));
    is_mismatch(avll(&gmm, &x).map(|_| ()));
    is_mismatch(post(&gmm, &x).map(|_| ()));
    is_mismatch(stats(&gmm, &x, StatsOrder::Second).map(|_| ()));
    is_mismatch(csstats(&gmm, &x, StatsOrder::First).map(|_| ()));
    is_mismatch(gmm.map_adapt(&x, 16.0, MapOptions::default()));
    is_mismatch(gmm.em(&x, &EmConfig::default()).map(|_| ()));
}

/// Test scenario: non-finite values in the data
#[test]
fn test_non_finite_data_rejected() {
    let gmm = Gmm::new(1, 2, CovarianceKind::Diagonal).unwrap();
    let mut x = data(5, 2);
    x[(3, 1)] = f64::NAN;
    match stats(&gmm, &x, StatsOrder::Zeroth) {
        Err(GmmError::NumericalError { reason, .. }) => assert!(reason.contains('3')),
        other => panic!("Expected NumericalError, got {:?}", other),
    }
    x[(3, 1)] = f64::INFINITY;
    assert!(Gmm::from_data(&x, CovarianceKind::Full).is_err());
}

/// Test scenario: indefinite full covariance
#[test]
fn test_factorization_failure_names_component() {
    let result = Gmm::from_parts(
        DVector::from_vec(vec![0.5, 0.5]),
        DMatrix::zeros(2, 2),
        Covariances::Full(vec![
            DMatrix::identity(2, 2),
            DMatrix::from_row_slice(2, 2, &[1.0, 3.0, 3.0, 1.0]),
        ]),
    );
    match result {
        Err(GmmError::FactorizationFailed { component, .. }) => assert_eq!(component, 1),
        other => panic!("Expected FactorizationFailed, got {:?}", other),
    }
}

/// Test scenario: malformed parameters
#[test]
fn test_parameter_validation() {
    assert!(Gmm::from_parts(
        DVector::from_vec(vec![1.0, -0.5]),
        DMatrix::zeros(2, 1),
        Covariances::identity(2, 1, CovarianceKind::Diagonal),
    )
    .is_err());
    assert!(matches!(
        Gmm::from_parts(
            DVector::from_vec(vec![1.0]),
            DMatrix::zeros(2, 1),
            Covariances::identity(2, 1, CovarianceKind::Diagonal),
        ),
        Err(GmmError::ShapeMismatch { .. })
    ));

    let gmm = Gmm::new(2, 1, CovarianceKind::Diagonal).unwrap();
    assert!(gmm.split(-0.1, 0.2).is_err());
    assert!(gmm.split(1e-5, f64::NAN).is_err());
    assert!(StatsOrder::try_from(3).is_err());

    let x = data(20, 1);
    let bad = TrainingConfig {
        split: SplitConfig {
            min_weight: 2.0,
            ..SplitConfig::default()
        },
        ..TrainingConfig::quick()
    };
    assert!(Gmm::train(&x, 2, CovarianceKind::Diagonal, InitMethod::Split, &bad).is_err());
}

/// Test scenario: adaptation and scoring argument checks
#[test]
fn test_adaptation_and_scoring_errors() {
    let mut gmm = Gmm::new(2, 2, CovarianceKind::Diagonal).unwrap();
    let x = data(20, 2);
    assert!(matches!(
        gmm.map_adapt(&x, -1.0, MapOptions::default()),
        Err(GmmError::InvalidParameter { .. })
    ));
    assert!(matches!(
        csstats(&gmm, &x, StatsOrder::Zeroth),
        Err(GmmError::InvalidParameter { .. })
    ));

    let a = CSstats::new(&gmm, &x).unwrap();
    let other = Gmm::new(3, 2, CovarianceKind::Diagonal).unwrap();
    let b = CSstats::new(&other, &x).unwrap();
    assert!(matches!(dotscore(&a, &b, 16.0), Err(GmmError::ShapeMismatch { .. })));
}

struct WrongShape;

impl Clusterer for WrongShape {
    fn cluster(&self, x: &DMatrix<f64>, n: usize) -> GmmResult<Clustering> {
        Ok(Clustering {
            centers: DMatrix::zeros(n + 1, x.ncols()),
            assignments: vec![0; x.nrows()],
        })
    }
}

/// Test scenario: an external clusterer returns inconsistent output
#[test]
fn test_bad_clusterer_output_rejected() {
    let x = data(30, 2);
    assert!(matches!(
        Gmm::from_kmeans(&x, 2, CovarianceKind::Diagonal, &WrongShape, &TrainingConfig::quick()),
        Err(GmmError::ShapeMismatch { .. })
    ));
    assert!(matches!(
        Gmm::train(&data(2, 2), 4, CovarianceKind::Diagonal, InitMethod::KMeans, &TrainingConfig::quick()),
        Err(GmmError::InsufficientData { .. })
    ));
}
