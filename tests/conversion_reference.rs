use gmm_vc_rs::alignment::fastdtw::{dtw, fastdtw};
use gmm_vc_rs::features::{apply_delta, build_joint, ZeroFrameFilter};
use gmm_vc_rs::pipeline::traits::SequenceAligner;
use gmm_vc_rs::{
    AlignedPair, AudioBuffer, ConversionEngine, FeatureLayout, FeatureSequence, MixtureTrainer,
    VcConfig, VoiceConversionBuilder,
};
use libtest_mimic::{Arguments, Failed, Trial};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SUITE_NAME: &str = "conversion_reference";
const SEED: u64 = 42;

fn main() {
    let args = Arguments::from_args();
    let cases: [(&str, fn() -> Result<(), String>); 7] = [
        ("affine_mapping_single_component", affine_mapping_single_component),
        ("affine_mapping_zero_delta", affine_mapping_zero_delta),
        ("piecewise_mapping_two_components", piecewise_mapping_two_components),
        ("fastdtw_matches_exact_dtw_with_wide_radius", fastdtw_matches_exact_dtw_with_wide_radius),
        ("fastdtw_path_is_monotonic", fastdtw_path_is_monotonic),
        ("mlpg_conversion_is_finite", mlpg_conversion_is_finite),
        ("cepstral_vocoder_round_trip", cepstral_vocoder_round_trip),
    ];
    let tests = cases
        .into_iter()
        .map(|(name, case)| {
            Trial::test(format!("{SUITE_NAME}::{name}"), move || case().map_err(Failed::from))
        })
        .collect();
    libtest_mimic::run(&args, tests).exit();
}

fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message())
    }
}

fn diagonal_pair(source: FeatureSequence, target: FeatureSequence) -> Result<AlignedPair, String> {
    let path = (0..source.len()).map(|t| (t, t)).collect();
    AlignedPair::new(source, target, path).map_err(|e| e.to_string())
}

fn random_sequence(rng: &mut StdRng, len: usize, dim: usize) -> FeatureSequence {
    let frames = Array2::from_shape_fn((len, dim), |_| rng.gen_range(-1.0..1.0));
    FeatureSequence::new(frames).unwrap_or_else(|_| FeatureSequence::zeros(len, dim))
}

/// Three frames, two coefficients, `target = 2 * source + 1`, one component.
fn affine_mapping_single_component() -> Result<(), String> {
    let source = FeatureSequence::from_rows(&[vec![1.0, 2.0], vec![2.0, 1.0], vec![3.0, 5.0]])
        .map_err(|e| e.to_string())?;
    let target = FeatureSequence::new(source.frames().mapv(|v| 2.0 * v + 1.0))
        .map_err(|e| e.to_string())?;
    let joint = build_joint(
        &[diagonal_pair(source.clone(), target.clone())?],
        FeatureLayout::static_only(2),
        &ZeroFrameFilter,
    )
    .map_err(|e| e.to_string())?;
    let model = MixtureTrainer::new(1).fit(&joint).map_err(|e| e.to_string())?;
    let result = ConversionEngine::new(&model)
        .and_then(|engine| engine.convert(&source))
        .map_err(|e| e.to_string())?;

    check(result.features.len() == 3, || {
        format!("expected 3 frames, got {}", result.features.len())
    })?;
    for (got, want) in result.features.frames().iter().zip(target.frames().iter()) {
        check((got - want).abs() < 1e-3, || format!("converted {got}, expected {want}"))?;
    }
    Ok(())
}

/// Same mapping with zero delta columns appended; the delta block of every
/// covariance is pure regularization.
fn affine_mapping_zero_delta() -> Result<(), String> {
    let statics = [[1.0, 2.0], [2.0, 1.0], [3.0, 5.0]];
    let with_zero_delta = |f: fn(f64) -> f64| {
        let rows: Vec<Vec<f64>> = statics
            .iter()
            .map(|r| vec![f(r[0]), f(r[1]), 0.0, 0.0])
            .collect();
        FeatureSequence::from_rows(&rows).map_err(|e| e.to_string())
    };
    let source = with_zero_delta(|v| v)?;
    let target = with_zero_delta(|v| 2.0 * v + 1.0)?;
    let joint = build_joint(
        &[diagonal_pair(source.clone(), target.clone())?],
        FeatureLayout::augmented(2),
        &ZeroFrameFilter,
    )
    .map_err(|e| e.to_string())?;
    let model = MixtureTrainer::new(1).fit(&joint).map_err(|e| e.to_string())?;
    let result = ConversionEngine::new(&model)
        .and_then(|engine| engine.convert(&source))
        .map_err(|e| e.to_string())?;

    check(result.features.dim() == 2, || {
        format!("expected 2 static coefficients, got {}", result.features.dim())
    })?;
    for t in 0..3 {
        for c in 0..2 {
            let (got, want) = (result.features.frame(t)[c], target.frame(t)[c]);
            check((got - want).abs() < 1e-3, || {
                format!("frame {t} coeff {c}: converted {got}, expected {want}")
            })?;
        }
    }
    Ok(())
}

/// Two source clusters mapped by different affine functions; the mixture must
/// route each frame through its own cluster's regression.
fn piecewise_mapping_two_components() -> Result<(), String> {
    let mut rng = StdRng::seed_from_u64(SEED);
    let n = 200;
    let mut source = Array2::zeros((n, 1));
    let mut target = Array2::zeros((n, 1));
    for t in 0..n {
        let x: f64 = rng.gen_range(-1.0..1.0);
        if t % 2 == 0 {
            source[(t, 0)] = 10.0 + x;
            target[(t, 0)] = 3.0 * x + 5.0;
        } else {
            source[(t, 0)] = -10.0 + x;
            target[(t, 0)] = -x - 5.0;
        }
    }
    let source = FeatureSequence::new(source).map_err(|e| e.to_string())?;
    let target = FeatureSequence::new(target).map_err(|e| e.to_string())?;
    let joint = build_joint(
        &[diagonal_pair(source.clone(), target.clone())?],
        FeatureLayout::static_only(1),
        &ZeroFrameFilter,
    )
    .map_err(|e| e.to_string())?;
    let model = MixtureTrainer::new(2)
        .with_seed(SEED)
        .fit(&joint)
        .map_err(|e| e.to_string())?;
    let result = ConversionEngine::new(&model)
        .and_then(|engine| engine.convert(&source))
        .map_err(|e| e.to_string())?;

    let mut max_err = 0.0f64;
    for (got, want) in result.features.frames().iter().zip(target.frames().iter()) {
        max_err = max_err.max((got - want).abs());
    }
    check(max_err < 1e-2, || format!("max conversion error {max_err}"))
}

fn fastdtw_matches_exact_dtw_with_wide_radius() -> Result<(), String> {
    let mut rng = StdRng::seed_from_u64(SEED);
    for case in 0..10 {
        let n = rng.gen_range(2..30);
        let m = rng.gen_range(2..30);
        let x = random_sequence(&mut rng, n, 3);
        let y = random_sequence(&mut rng, m, 3);
        let (exact, exact_path) = dtw(x.frames(), y.frames());
        let (approx, approx_path) = fastdtw(x.frames(), y.frames(), 40);
        check((exact - approx).abs() < 1e-9, || {
            format!("case {case}: exact {exact} vs fastdtw {approx}")
        })?;
        check(exact_path == approx_path, || format!("case {case}: paths differ"))?;
    }
    Ok(())
}

fn fastdtw_path_is_monotonic() -> Result<(), String> {
    let mut rng = StdRng::seed_from_u64(SEED + 1);
    let x = random_sequence(&mut rng, 257, 4);
    let y = random_sequence(&mut rng, 190, 4);
    let (_, path) = fastdtw(x.frames(), y.frames(), 1);
    check(path.first() == Some(&(0, 0)), || "path must start at (0, 0)".to_string())?;
    check(path.last() == Some(&(256, 189)), || {
        format!("path must end at (256, 189), got {:?}", path.last())
    })?;
    check(path.len() <= 257 + 190 - 1, || format!("path too long: {}", path.len()))?;
    for w in path.windows(2) {
        let (a, b) = (w[0], w[1]);
        let step = (b.0 - a.0, b.1 - a.1);
        check(matches!(step, (1, 0) | (0, 1) | (1, 1)), || {
            format!("invalid step {a:?} -> {b:?}")
        })?;
    }
    Ok(())
}

fn mlpg_conversion_is_finite() -> Result<(), String> {
    let mut rng = StdRng::seed_from_u64(SEED + 2);
    let source = random_sequence(&mut rng, 120, 3);
    let target = FeatureSequence::new(source.frames().mapv(|v| 0.5 * v - 0.25))
        .map_err(|e| e.to_string())?;
    let pair = diagonal_pair(apply_delta(&source), apply_delta(&target))?;
    let joint = build_joint(&[pair], FeatureLayout::augmented(3), &ZeroFrameFilter)
        .map_err(|e| e.to_string())?;
    let model = MixtureTrainer::new(4)
        .with_seed(SEED)
        .fit(&joint)
        .map_err(|e| e.to_string())?;
    let engine = ConversionEngine::new(&model)
        .map_err(|e| e.to_string())?
        .with_mlpg(true);
    let result = engine.convert(&apply_delta(&source)).map_err(|e| e.to_string())?;

    check(result.features.len() == 120 && result.features.dim() == 3, || {
        format!(
            "unexpected shape {}x{}",
            result.features.len(),
            result.features.dim()
        )
    })?;
    for (got, want) in result.features.frames().iter().zip(target.frames().iter()) {
        check((got - want).abs() < 0.1, || format!("converted {got}, expected {want}"))?;
    }
    Ok(())
}

struct DiagonalAligner;

impl SequenceAligner for DiagonalAligner {
    fn align(
        &self,
        source: &FeatureSequence,
        target: &FeatureSequence,
    ) -> gmm_vc_rs::Result<AlignedPair> {
        let len = source.len().min(target.len());
        let trim = |seq: &FeatureSequence| {
            FeatureSequence::new(seq.frames().slice(ndarray::s![..len, ..]).to_owned())
        };
        AlignedPair::new(trim(source)?, trim(target)?, (0..len).map(|t| (t, t)).collect())
    }
}

fn tone(rng: &mut StdRng, f0: f32, brightness: f32, len: usize) -> AudioBuffer {
    let rate = 16_000.0f32;
    let samples = (0..len)
        .map(|i| {
            let t = i as f32 / rate;
            let mut v = 0.0;
            for h in 1..=8 {
                let amp = brightness.powi(h - 1) * 0.2;
                v += amp * (2.0 * std::f32::consts::PI * f0 * h as f32 * t).sin();
            }
            v + rng.gen_range(-0.01..0.01)
        })
        .collect();
    AudioBuffer {
        sample_rate_hz: 16_000,
        samples,
    }
}

/// Train on synthetic parallel recordings through the bundled vocoder, then
/// convert a held-out recording end to end.
fn cepstral_vocoder_round_trip() -> Result<(), String> {
    let mut rng = StdRng::seed_from_u64(SEED + 3);
    let config = VcConfig {
        padded_length: 120,
        n_components: 2,
        reg_covar: 1e-3,
        ..VcConfig::default()
    };
    let pipeline = VoiceConversionBuilder::new(config)
        .with_cepstral_vocoder()
        .with_sequence_aligner(Box::new(DiagonalAligner))
        .build()
        .map_err(|e| e.to_string())?;

    let pairs: Vec<(AudioBuffer, AudioBuffer)> = [110.0, 130.0, 150.0, 170.0]
        .iter()
        .map(|&f0| {
            (
                tone(&mut rng, f0, 0.5, 8_000),
                tone(&mut rng, f0 * 1.5, 0.8, 8_000),
            )
        })
        .collect();
    let model = pipeline.train_audio(&pairs).map_err(|e| e.to_string())?;

    let held_out = tone(&mut rng, 130.0, 0.5, 6_400);
    let converted = pipeline
        .convert_audio(&model, &held_out)
        .map_err(|e| e.to_string())?;
    check(converted.samples.len() == held_out.samples.len(), || {
        format!(
            "converted {} samples from {}",
            converted.samples.len(),
            held_out.samples.len()
        )
    })?;
    check(converted.samples.iter().all(|v| v.is_finite()), || {
        "converted audio has non-finite samples".to_string()
    })
}
