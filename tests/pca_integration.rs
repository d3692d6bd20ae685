//! End-to-end tests of the public API: fit, transform, diagnostics,
//! persistence, and ellipse geometry working together.

use approx::assert_abs_diff_eq;
use ndarray::{array, Array2};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use pca_core::{
    confidence_ellipses, diagnostics, fit, ConfidenceLevel, KernelKind, Method, MissingStrategy,
    PcaConfig, PcaError, PcaModel, ScaleKind,
};

fn random_matrix(n_samples: usize, n_features: usize, seed: u64) -> Array2<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Array2::from_shape_fn((n_samples, n_features), |_| rng.gen_range(-3.0..3.0))
}

#[test]
fn svd_fit_on_ten_by_four() {
    let data = random_matrix(10, 4, 7);
    let config = PcaConfig {
        components: 2,
        method: Method::Svd,
        mean_center: true,
        ..PcaConfig::default()
    };
    let model = fit(data, &config).unwrap();

    assert_eq!(model.scores.dim(), (10, 2));
    assert_eq!(model.explained_variance.len(), 2);
    assert!(model.explained_variance[0] >= model.explained_variance[1]);
    let total: f64 = model.explained_variance_ratio.iter().sum();
    assert!(total <= 1.0 + 1e-12);
    assert_eq!(model.component_labels, vec!["PC1", "PC2"]);
}

#[test]
fn transform_round_trip_matches_fit_scores() {
    let data = random_matrix(12, 5, 3);
    for method in [Method::Svd, Method::Nipals] {
        let config = PcaConfig {
            components: 3,
            method,
            scale: ScaleKind::Standard,
            ..PcaConfig::default()
        };
        let model = fit(data.clone(), &config).unwrap();
        let projected = model.transform(data.view()).unwrap();
        for (a, b) in projected.iter().zip(model.scores.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-8);
        }
    }
}

#[test]
fn nipals_agrees_with_svd_up_to_sign() {
    let data = random_matrix(15, 4, 11);
    let config = |method| PcaConfig {
        components: 3,
        method,
        ..PcaConfig::default()
    };
    let svd_model = fit(data.clone(), &config(Method::Svd)).unwrap();
    let nipals_model = fit(data, &config(Method::Nipals)).unwrap();

    for (a, b) in nipals_model.scores.iter().zip(svd_model.scores.iter()) {
        assert_abs_diff_eq!(a.abs(), b.abs(), epsilon = 1e-5);
    }
    let svd_loadings = svd_model.loadings.unwrap();
    let nipals_loadings = nipals_model.loadings.unwrap();
    for (a, b) in nipals_loadings.iter().zip(svd_loadings.iter()) {
        assert_abs_diff_eq!(a.abs(), b.abs(), epsilon = 1e-5);
    }
}

#[test]
fn too_many_components_is_invalid_config_not_truncation() {
    let data = random_matrix(5, 10, 2);
    let config = PcaConfig {
        components: 5, // min(5 - 1, 10) = 4
        ..PcaConfig::default()
    };
    assert!(matches!(
        fit(data, &config),
        Err(PcaError::InvalidConfig(_))
    ));
}

#[test]
fn nipals_native_tolerates_a_nan_cell() {
    let mut data = random_matrix(10, 4, 5);
    data[[4, 2]] = f64::NAN;
    let config = PcaConfig {
        components: 2,
        method: Method::Nipals,
        missing: MissingStrategy::Native,
        ..PcaConfig::default()
    };
    let model = fit(data, &config).unwrap();
    assert!(model.scores.iter().all(|v| v.is_finite()));
    assert!(model
        .loadings
        .as_ref()
        .unwrap()
        .iter()
        .all(|v| v.is_finite()));
}

#[test]
fn nipals_keeps_partial_result_when_leading_eigenvalues_nearly_tie() {
    // Two planted components with eigenvalues in ratio 0.9995^2: the power
    // iteration separates them far too slowly for the iteration cap, so the
    // fit must come back usable with the convergence flag cleared.
    let t1 = [1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
    let t2 = [1.0, 1.0, -1.0, -1.0, 1.0, 1.0, -1.0, -1.0];
    let b = 0.9995;
    let s = std::f64::consts::FRAC_1_SQRT_2;
    let data = Array2::from_shape_fn((8, 4), |(i, j)| match j {
        0 => s * (t1[i] + b * t2[i]),
        1 => s * (t1[i] - b * t2[i]),
        _ => 0.0,
    });

    let config = PcaConfig {
        components: 1,
        method: Method::Nipals,
        ..PcaConfig::default()
    };
    let model = fit(data, &config).unwrap();

    assert!(!model.converged);
    assert!(model.scores.iter().all(|v| v.is_finite()));
    assert!(model
        .loadings
        .as_ref()
        .unwrap()
        .iter()
        .all(|v| v.is_finite()));
    assert!(model.explained_variance[0] > 0.0);
}

#[test]
fn nan_without_a_strategy_is_an_error() {
    let mut data = random_matrix(8, 3, 9);
    data[[1, 1]] = f64::NAN;
    assert!(matches!(
        fit(data, &PcaConfig::default()),
        Err(PcaError::InvalidConfig(_))
    ));
}

#[test]
fn mean_impute_and_drop_rows_both_fit() {
    let mut data = random_matrix(10, 4, 13);
    data[[0, 0]] = f64::NAN;
    data[[7, 3]] = f64::NAN;
    for strategy in [MissingStrategy::MeanImpute, MissingStrategy::DropRows] {
        let config = PcaConfig {
            components: 2,
            missing: strategy,
            ..PcaConfig::default()
        };
        let model = fit(data.clone(), &config).unwrap();
        assert!(model.scores.iter().all(|v| v.is_finite()));
    }
    // DropRows keeps 8 of the 10 rows.
    let config = PcaConfig {
        components: 2,
        missing: MissingStrategy::DropRows,
        ..PcaConfig::default()
    };
    let model = fit(data, &config).unwrap();
    assert_eq!(model.scores.nrows(), 8);
}

#[test]
fn transform_rejects_mismatched_columns() {
    let data = random_matrix(10, 4, 1);
    let model = fit(data, &PcaConfig::default()).unwrap();
    let narrow = random_matrix(3, 3, 1);
    assert!(matches!(
        model.transform(narrow.view()),
        Err(PcaError::DimensionMismatch {
            expected: 4,
            actual: 3
        })
    ));
}

#[test]
fn kernel_round_trip_through_retained_training_data() {
    let data = random_matrix(9, 3, 21);
    let config = PcaConfig {
        components: 2,
        method: Method::Kernel,
        mean_center: false,
        kernel: Some(KernelKind::Rbf { gamma: 0.5 }),
        retain_training_data: true,
        ..PcaConfig::default()
    };
    let model = fit(data.clone(), &config).unwrap();
    assert!(model.loadings.is_none());
    let projected = model.transform(data.view()).unwrap();
    for (a, b) in projected.iter().zip(model.scores.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-6);
    }
}

#[test]
fn kernel_diagnostics_are_unsupported() {
    let data = random_matrix(9, 3, 21);
    let config = PcaConfig {
        components: 2,
        method: Method::Kernel,
        mean_center: false,
        kernel: Some(KernelKind::Linear),
        ..PcaConfig::default()
    };
    let model = fit(data.clone(), &config).unwrap();
    assert!(matches!(
        diagnostics(&model, data.view()),
        Err(PcaError::UnsupportedForMethod(_))
    ));
}

#[test]
fn diagnostics_flag_an_injected_outlier() {
    let mut data = random_matrix(20, 4, 17);
    for j in 0..4 {
        data[[19, j]] = 50.0;
    }
    let config = PcaConfig {
        components: 2,
        ..PcaConfig::default()
    };
    let model = fit(data.clone(), &config).unwrap();
    let metrics = diagnostics(&model, data.view()).unwrap();

    let max_t2_index = metrics
        .t2
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
        .map(|(i, _)| i)
        .unwrap();
    assert_eq!(max_t2_index, 19);
    assert!(metrics.t2[19] > metrics.t2_limits.p95);
    assert!(metrics.outlier_mask[19]);
    assert!(metrics.mahalanobis[19] > metrics.mahalanobis[0]);
}

#[test]
fn model_json_round_trip_preserves_transform_behavior() {
    let data = random_matrix(10, 4, 29);
    let config = PcaConfig {
        components: 2,
        scale: ScaleKind::Standard,
        ..PcaConfig::default()
    };
    let model = fit(data.clone(), &config).unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.json");
    model.save(&path).unwrap();
    let loaded = PcaModel::load(&path).unwrap();

    let original = model.transform(data.view()).unwrap();
    let reloaded = loaded.transform(data.view()).unwrap();
    for (a, b) in original.iter().zip(reloaded.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
    }
}

#[test]
fn score_plot_ellipses_from_a_fitted_model() {
    let data = random_matrix(12, 4, 31);
    let config = PcaConfig {
        components: 2,
        ..PcaConfig::default()
    };
    let model = fit(data, &config).unwrap();

    let labels: Vec<String> = (0..12)
        .map(|i| if i < 6 { "a".to_string() } else { "b".to_string() })
        .collect();
    let ellipses = confidence_ellipses(
        model.scores.column(0),
        model.scores.column(1),
        &labels,
        ConfidenceLevel::P95,
    )
    .unwrap();
    assert_eq!(ellipses.len(), 2);
    for params in ellipses.values() {
        assert!(params.semi_major >= params.semi_minor);
        assert!(params.semi_minor > 0.0);
    }
}

#[test]
fn robust_scaling_survives_an_extreme_value() {
    let mut data = random_matrix(12, 3, 37);
    data[[0, 0]] = 1000.0;
    let config = PcaConfig {
        components: 2,
        scale: ScaleKind::Robust,
        ..PcaConfig::default()
    };
    let model = fit(data.clone(), &config).unwrap();
    assert!(model.preprocessing.medians.is_some());
    let projected = model.transform(data.view()).unwrap();
    for (a, b) in projected.iter().zip(model.scores.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-8);
    }
}
