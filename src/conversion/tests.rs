use ndarray::Array2;

use super::ConversionEngine;
use crate::error::VcError;
use crate::features::{apply_delta, build_joint, ZeroFrameFilter};
use crate::mixture::{CovarianceKind, FitSummary, GaussianComponent, MixtureModel, MixtureTrainer};
use crate::types::{AlignedPair, FeatureLayout, FeatureSequence};

fn summary() -> FitSummary {
    FitSummary {
        n_samples: 10,
        n_iter: 1,
        converged: true,
        log_likelihood: 0.0,
        reg_covar: 1e-6,
        seed: 0,
        trained_at: String::new(),
    }
}

/// One component, identity covariance, no source/target coupling: every
/// frame converts to the target mean.
fn constant_model(layout: FeatureLayout, target_mean: f64) -> MixtureModel {
    let side = layout.side_dim();
    let dim = layout.joint_dim();
    let mut mean = vec![0.0; dim];
    for m in mean.iter_mut().skip(side).take(layout.static_dim) {
        *m = target_mean;
    }
    let mut covariance = vec![0.0; dim * dim];
    for i in 0..dim {
        covariance[i * dim + i] = 1.0;
    }
    MixtureModel::from_parts(
        layout,
        CovarianceKind::Full,
        vec![GaussianComponent {
            weight: 1.0,
            mean,
            covariance,
        }],
        summary(),
    )
    .unwrap()
}

fn ramp(len: usize, dim: usize) -> FeatureSequence {
    FeatureSequence::new(Array2::from_shape_fn((len, dim), |(t, c)| {
        1.0 + t as f64 * 0.5 + c as f64
    }))
    .unwrap()
}

#[test]
fn output_has_one_static_frame_per_input_frame() {
    let engine = ConversionEngine::new(&constant_model(FeatureLayout::augmented(3), 2.0)).unwrap();
    let result = engine.convert(&ramp(11, 6)).unwrap();
    assert_eq!(result.features.len(), 11);
    assert_eq!(result.features.dim(), 3);
    assert_eq!(result.responsibilities.dim(), (11, 1));
    assert!(result.features.frames().iter().all(|&v| (v - 2.0).abs() < 1e-12));
}

#[test]
fn dimension_mismatch_is_invalid_input() {
    let engine = ConversionEngine::new(&constant_model(FeatureLayout::augmented(3), 2.0)).unwrap();
    let err = engine.convert(&ramp(4, 3)).err().unwrap();
    assert!(matches!(err, VcError::InvalidInput { stage: "convert", .. }));
}

#[test]
fn empty_input_converts_to_empty_output() {
    let model = constant_model(FeatureLayout::static_only(2), 1.0);
    let engine = ConversionEngine::new(&model).unwrap();
    let result = engine.convert(&FeatureSequence::zeros(0, 2)).unwrap();
    assert!(result.features.is_empty());
    assert_eq!(result.features.dim(), 2);
}

#[test]
fn mlpg_leaves_constant_trajectory_unchanged() {
    let model = constant_model(FeatureLayout::augmented(2), -0.75);
    let plain = ConversionEngine::new(&model).unwrap();
    let smoothed = ConversionEngine::new(&model).unwrap().with_mlpg(true);
    assert!(smoothed.uses_mlpg());

    let source = apply_delta(&ramp(9, 2));
    let a = plain.convert(&source).unwrap();
    let b = smoothed.convert(&source).unwrap();
    for (x, y) in a.features.frames().iter().zip(b.features.frames().iter()) {
        assert!((x - y).abs() < 1e-9);
        assert!((y + 0.75).abs() < 1e-9);
    }
}

#[test]
fn mlpg_is_ignored_without_delta_features() {
    let engine = ConversionEngine::new(&constant_model(FeatureLayout::static_only(2), 0.0))
        .unwrap()
        .with_mlpg(true);
    assert!(!engine.uses_mlpg());
}

#[test]
fn responsibilities_follow_the_source_marginal() {
    // Two components far apart in source space, equal weights.
    let layout = FeatureLayout::static_only(1);
    let component = |x: f64, y: f64| GaussianComponent {
        weight: 0.5,
        mean: vec![x, y],
        covariance: vec![1.0, 0.0, 0.0, 1.0],
    };
    let model = MixtureModel::from_parts(
        layout,
        CovarianceKind::Full,
        vec![component(-10.0, 5.0), component(10.0, -5.0)],
        summary(),
    )
    .unwrap();
    let engine = ConversionEngine::new(&model).unwrap();
    let source = FeatureSequence::from_rows(&[vec![-10.0], vec![0.0], vec![10.0]]).unwrap();
    let result = engine.convert(&source).unwrap();

    for row in result.responsibilities.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-12);
    }
    assert!(result.responsibilities[(0, 0)] > 0.999);
    assert!((result.responsibilities[(1, 0)] - 0.5).abs() < 1e-12);
    assert!(result.responsibilities[(2, 1)] > 0.999);
    assert!((result.features.frame(0)[0] - 5.0).abs() < 1e-6);
    assert!(result.features.frame(1)[0].abs() < 1e-12);
}

#[test]
fn single_component_learns_affine_mapping() {
    let source = FeatureSequence::from_rows(&[
        vec![1.0, 2.0],
        vec![2.0, 1.0],
        vec![3.0, 5.0],
    ])
    .unwrap();
    let target = FeatureSequence::new(source.frames().mapv(|v| 2.0 * v + 1.0)).unwrap();
    let pair = AlignedPair::new(source.clone(), target.clone(), vec![(0, 0), (1, 1), (2, 2)])
        .unwrap();

    let layout = FeatureLayout::static_only(2);
    let joint = build_joint(&[pair], layout, &ZeroFrameFilter).unwrap();
    assert_eq!(joint.n_samples(), 3);
    let model = MixtureTrainer::new(1).fit(&joint).unwrap();
    let result = ConversionEngine::new(&model).unwrap().convert(&source).unwrap();

    assert_eq!(result.features.len(), 3);
    for (got, want) in result.features.frames().iter().zip(target.frames().iter()) {
        assert!((got - want).abs() < 1e-3, "got {got}, want {want}");
    }
}

fn joint_model(layout: FeatureLayout, parts: &[(f64, Vec<f64>, Vec<f64>)]) -> MixtureModel {
    let components = parts
        .iter()
        .map(|(weight, mean, covariance)| GaussianComponent {
            weight: *weight,
            mean: mean.clone(),
            covariance: covariance.clone(),
        })
        .collect();
    MixtureModel::from_parts(layout, CovarianceKind::Full, components, summary()).unwrap()
}

#[test]
fn zero_source_covariance_converts_to_target_mean() {
    #[rustfmt::skip]
    let covariance = vec![
        0.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 1.0, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ];
    let model = joint_model(
        FeatureLayout::static_only(2),
        &[(1.0, vec![1.0, 1.0, 4.0, 5.0], covariance)],
    );
    let engine = ConversionEngine::new(&model).unwrap();
    assert_eq!(engine.active_components(), 1);

    let source = FeatureSequence::from_rows(&[vec![0.3, 2.0], vec![7.0, -1.0]]).unwrap();
    let result = engine.convert(&source).unwrap();
    for t in 0..2 {
        assert!((result.features.frame(t)[0] - 4.0).abs() < 1e-9);
        assert!((result.features.frame(t)[1] - 5.0).abs() < 1e-9);
    }
}

#[test]
fn unfactorable_component_is_skipped() {
    let model = joint_model(
        FeatureLayout::static_only(1),
        &[
            (0.5, vec![0.0, 3.0], vec![1.0, 0.0, 0.0, 1.0]),
            // negative variance survives every regularization step
            (0.5, vec![5.0, -2.0], vec![-1e6, 0.0, 0.0, 1.0]),
        ],
    );
    let engine = ConversionEngine::new(&model).unwrap();
    assert_eq!(engine.active_components(), 1);

    let source = FeatureSequence::from_rows(&[vec![0.0], vec![5.0]]).unwrap();
    let result = engine.convert(&source).unwrap();
    assert_eq!(result.responsibilities.dim(), (2, 2));
    for t in 0..2 {
        assert!((result.features.frame(t)[0] - 3.0).abs() < 1e-9);
        assert!((result.responsibilities[(t, 0)] - 1.0).abs() < 1e-12);
        assert_eq!(result.responsibilities[(t, 1)], 0.0);
    }
}

#[test]
fn all_components_unfactorable_is_singular_covariance() {
    let bad = vec![-1e6, 0.0, 0.0, 1.0];
    let single = joint_model(
        FeatureLayout::static_only(1),
        &[(1.0, vec![0.0, 0.0], bad.clone())],
    );
    assert!(matches!(
        ConversionEngine::new(&single).err().unwrap(),
        VcError::SingularCovariance { component: 0, dim: 1 }
    ));

    let pair = joint_model(
        FeatureLayout::static_only(1),
        &[(0.5, vec![0.0, 0.0], bad.clone()), (0.5, vec![1.0, 1.0], bad)],
    );
    assert!(matches!(
        ConversionEngine::new(&pair).err().unwrap(),
        VcError::SingularCovariance { component: 1, dim: 1 }
    ));
}

#[test]
fn affine_mapping_with_zero_delta_columns() {
    let source = FeatureSequence::from_rows(&[
        vec![1.0, 2.0, 0.0, 0.0],
        vec![2.0, 1.0, 0.0, 0.0],
        vec![3.0, 5.0, 0.0, 0.0],
    ])
    .unwrap();
    let target = FeatureSequence::from_rows(&[
        vec![3.0, 5.0, 0.0, 0.0],
        vec![5.0, 3.0, 0.0, 0.0],
        vec![7.0, 11.0, 0.0, 0.0],
    ])
    .unwrap();
    let pair = AlignedPair::new(source.clone(), target.clone(), vec![(0, 0), (1, 1), (2, 2)])
        .unwrap();

    // delta columns carry no variance beyond the regularization term
    let joint = build_joint(&[pair], FeatureLayout::augmented(2), &ZeroFrameFilter).unwrap();
    assert_eq!(joint.n_samples(), 3);
    let model = MixtureTrainer::new(1).fit(&joint).unwrap();
    let result = ConversionEngine::new(&model).unwrap().convert(&source).unwrap();

    assert_eq!(result.features.dim(), 2);
    for t in 0..3 {
        for c in 0..2 {
            let (got, want) = (result.features.frame(t)[c], target.frame(t)[c]);
            assert!((got - want).abs() < 1e-3, "frame {t} coeff {c}: {got} vs {want}");
        }
    }
}
