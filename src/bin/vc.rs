use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use gmm_vc_rs::pipeline::defaults::JsonModelStore;
use gmm_vc_rs::{
    AudioBuffer, CovarianceKind, SpeakerPair, VcConfig, VoiceConversionBuilder,
    VoiceConversionPipeline,
};
use indicatif::{ProgressBar, ProgressStyle};

/// Speaker pairs trained by `benchmark`: male to female, Scottish to Canadian.
const BENCHMARK_PAIRS: [(&str, &str); 2] = [("bdl", "clb"), ("awb", "jmk")];

#[derive(Debug, Parser)]
#[command(name = "vc")]
#[command(about = "Train and apply joint-density GMM voice conversion")]
struct Args {
    /// JSON configuration; flags below override its fields.
    #[arg(long, env = "VC_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "VC_MODELS_DIRECTORY", default_value = "models")]
    models_dir: PathBuf,
    #[arg(long, env = "VC_SAMPLING_RATE")]
    sampling_rate: Option<u32>,
    #[arg(long, env = "VC_PADDED_LENGTH")]
    padded_length: Option<usize>,
    #[arg(long, env = "VC_COMPONENTS")]
    components: Option<usize>,
    #[arg(long, env = "VC_DIAGONAL", default_value_t = false)]
    diagonal: bool,
    #[arg(long, env = "VC_SEED")]
    seed: Option<u64>,
    #[arg(long, env = "VC_MLPG", default_value_t = false)]
    mlpg: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Train on parallel CMU Arctic utterances of two speakers.
    Train {
        source: String,
        target: String,
        #[arg(long, env = "VC_CMU_DIRECTORY", default_value = "data/cmu_arctic")]
        cmu_dir: PathBuf,
        #[arg(long, env = "VC_CMU_MAX_RANGE")]
        max_pairs: Option<usize>,
    },
    /// Train the bdl-clb and awb-jmk Arctic pairs.
    Benchmark {
        #[arg(long, env = "VC_CMU_DIRECTORY", default_value = "data/cmu_arctic")]
        cmu_dir: PathBuf,
        #[arg(long, env = "VC_CMU_MAX_RANGE")]
        max_pairs: Option<usize>,
    },
    /// Train on one long recording pair, cut into fixed-length chunks.
    Analyze { source: PathBuf, target: PathBuf },
    /// Convert a recording with a saved model.
    Convert {
        model: PathBuf,
        audio: PathBuf,
        #[arg(long, env = "VC_AUDIO_DIRECTORY", default_value = "audio")]
        out_dir: PathBuf,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    match &args.command {
        Command::Train {
            source,
            target,
            cmu_dir,
            max_pairs,
        } => {
            let pipeline = build_pipeline(config, &args.models_dir)?;
            train_arctic(&pipeline, cmu_dir, source, target, *max_pairs)
        }
        Command::Benchmark { cmu_dir, max_pairs } => {
            let pipeline = build_pipeline(config, &args.models_dir)?;
            for (source, target) in BENCHMARK_PAIRS {
                train_arctic(&pipeline, cmu_dir, source, target, *max_pairs)?;
            }
            Ok(())
        }
        Command::Analyze { source, target } => {
            let pipeline = build_pipeline(config, &args.models_dir)?;
            analyze(&pipeline, source, target)
        }
        Command::Convert {
            model,
            audio,
            out_dir,
        } => {
            let store_dir = model.parent().unwrap_or(Path::new(".")).to_path_buf();
            let pipeline = build_pipeline(config, &store_dir)?;
            convert(&pipeline, model, audio, out_dir)
        }
    }
}

fn resolve_config(args: &Args) -> Result<VcConfig, String> {
    let mut config = match &args.config {
        Some(path) => VcConfig::load(path).map_err(|err| err.to_string())?,
        None => VcConfig::default(),
    };
    if let Some(rate) = args.sampling_rate {
        config.sampling_rate_hz = rate;
    }
    if let Some(len) = args.padded_length {
        config.padded_length = len;
    }
    if let Some(k) = args.components {
        config.n_components = k;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if args.diagonal {
        config.covariance = CovarianceKind::Diagonal;
    }
    if args.mlpg {
        config.use_mlpg = true;
    }
    Ok(config)
}

fn build_pipeline(config: VcConfig, models_dir: &Path) -> Result<VoiceConversionPipeline, String> {
    let store = JsonModelStore::new(models_dir);
    tracing::debug!(dir = %store.dir().display(), "vc: model store");
    VoiceConversionBuilder::new(config)
        .with_cepstral_vocoder()
        .with_model_store(Box::new(store))
        .build()
        .map_err(|err| format!("Failed to build pipeline: {err}"))
}

fn progress_bar(len: usize) -> ProgressBar {
    let progress = ProgressBar::new(len as u64);
    progress.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );
    progress
}

/// Sorted `.wav`/`.flac` files under `<root>/<speaker>/wav`.
fn list_speaker_audio(root: &Path, speaker: &str) -> Result<Vec<PathBuf>, String> {
    let dir = root.join(speaker).join("wav");
    let entries = fs::read_dir(&dir)
        .map_err(|err| format!("Failed to list '{}': {err}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|err| format!("Failed to read entry in '{}': {err}", dir.display()))?
            .path();
        let is_audio = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("wav") || e.eq_ignore_ascii_case("flac"))
            .unwrap_or(false);
        if is_audio {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn load(pipeline: &VoiceConversionPipeline, path: &Path) -> Result<AudioBuffer, String> {
    pipeline.load_audio(path).map_err(|err| err.to_string())
}

fn train_arctic(
    pipeline: &VoiceConversionPipeline,
    cmu_dir: &Path,
    source: &str,
    target: &str,
    max_pairs: Option<usize>,
) -> Result<(), String> {
    let key = SpeakerPair::new(source, target);
    let source_files = list_speaker_audio(cmu_dir, source)?;
    let target_files = list_speaker_audio(cmu_dir, target)?;
    let limit = max_pairs
        .unwrap_or(pipeline.config().max_training_pairs)
        .min(source_files.len())
        .min(target_files.len());
    if limit == 0 {
        return Err(format!("No parallel audio found for {key} under '{}'", cmu_dir.display()));
    }

    eprintln!("Processing Arctic dataset ({key}), {limit} utterance pairs");
    let progress = progress_bar(limit);
    let mut pairs = Vec::with_capacity(limit);
    for (source_path, target_path) in source_files.iter().zip(&target_files).take(limit) {
        if let Some(name) = source_path.file_name() {
            progress.set_message(name.to_string_lossy().into_owned());
        }
        pairs.push((load(pipeline, source_path)?, load(pipeline, target_path)?));
        progress.inc(1);
    }
    progress.finish_with_message("loaded");

    eprintln!("Training mixture model ({key})");
    let started = Instant::now();
    let model = pipeline
        .train_audio(&pairs)
        .map_err(|err| format!("{key}: training failed: {err}"))?;
    pipeline
        .save_model(&key, &model)
        .map_err(|err| format!("{key}: {err}"))?;
    eprintln!(
        "Training finished ({key}): {} components ({:?} covariance), converged={}, {:.1}s",
        model.n_components(),
        model.covariance_kind(),
        model.summary().converged,
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

fn analyze(
    pipeline: &VoiceConversionPipeline,
    source: &Path,
    target: &Path,
) -> Result<(), String> {
    let key = SpeakerPair::new(file_stem(source)?, file_stem(target)?);
    eprintln!("Loading audio files: {} {}", source.display(), target.display());
    let source_audio = load(pipeline, source)?;
    let target_audio = load(pipeline, target)?;

    let model = pipeline
        .train_segmented_audio(&source_audio, &target_audio)
        .map_err(|err| format!("{key}: training failed: {err}"))?;
    pipeline
        .save_model(&key, &model)
        .map_err(|err| format!("{key}: {err}"))?;
    eprintln!("Training finished ({key})");
    Ok(())
}

fn convert(
    pipeline: &VoiceConversionPipeline,
    model_path: &Path,
    audio_path: &Path,
    out_dir: &Path,
) -> Result<(), String> {
    let model_name = file_stem(model_path)?;
    let key = SpeakerPair::parse(&model_name).ok_or_else(|| {
        format!(
            "Model file '{}' is not named <source>-<target>.json",
            model_path.display()
        )
    })?;
    eprintln!("Loading model: {}", model_path.display());
    let model = pipeline.load_model(&key).map_err(|err| err.to_string())?;

    let audio = load(pipeline, audio_path)?;
    eprintln!("Converting audio: {}", audio_path.display());
    let converted = pipeline
        .convert_audio(&model, &audio)
        .map_err(|err| format!("{}: conversion failed: {err}", audio_path.display()))?;

    fs::create_dir_all(out_dir)
        .map_err(|err| format!("Failed to create '{}': {err}", out_dir.display()))?;
    let out_path = out_dir.join(format!("{model_name}-{}.wav", file_stem(audio_path)?));
    pipeline
        .write_audio(&out_path, &converted)
        .map_err(|err| err.to_string())?;
    eprintln!("Converted audio written to {}", out_path.display());
    Ok(())
}

fn file_stem(path: &Path) -> Result<String, String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| format!("'{}' has no file name", path.display()))
}
