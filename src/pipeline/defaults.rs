use std::fs;
use std::path::{Path, PathBuf};

use claxon::FlacReader;

use crate::alignment::align;
use crate::error::{Result, VcError};
use crate::mixture::MixtureModel;
use crate::pipeline::traits::{AudioIo, ModelStore, SequenceAligner};
use crate::types::{AlignedPair, AudioBuffer, FeatureSequence, SpeakerPair};

pub use crate::features::ZeroFrameFilter;

pub struct FastDtwAligner {
    pub radius: usize,
}

impl Default for FastDtwAligner {
    fn default() -> Self {
        Self { radius: 1 }
    }
}

impl SequenceAligner for FastDtwAligner {
    fn align(&self, source: &FeatureSequence, target: &FeatureSequence) -> Result<AlignedPair> {
        align(source, target, self.radius)
    }
}

/// Stores one JSON document per speaker pair: `<dir>/<source>-<target>.json`.
pub struct JsonModelStore {
    dir: PathBuf,
}

impl JsonModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &SpeakerPair) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl ModelStore for JsonModelStore {
    fn save(&self, key: &SpeakerPair, model: &MixtureModel) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| VcError::io(format!("create model dir {}", self.dir.display()), e))?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(model)
            .map_err(|e| VcError::json(format!("serialize model {key}"), e))?;

        // Readers never see a half-written model: write aside, then rename.
        fs::write(&tmp, json)
            .map_err(|e| VcError::io(format!("write {}", tmp.display()), e))?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            VcError::io(format!("rename {} to {}", tmp.display(), path.display()), e)
        })?;

        tracing::info!(
            pair = %key,
            path = %path.display(),
            components = model.n_components(),
            "store: saved model"
        );
        Ok(())
    }

    fn load(&self, key: &SpeakerPair) -> Result<MixtureModel> {
        let path = self.path_for(key);
        let data = fs::read(&path)
            .map_err(|e| VcError::io(format!("read model {}", path.display()), e))?;
        let model: MixtureModel = serde_json::from_slice(&data)
            .map_err(|e| VcError::json(format!("parse model {}", path.display()), e))?;
        model.validate()?;
        tracing::debug!(pair = %key, path = %path.display(), "store: loaded model");
        Ok(model)
    }
}

/// Mono audio files: `.wav` read and write, `.flac` read. Multi-channel input
/// is averaged down to one channel.
pub struct FileAudioIo;

impl AudioIo for FileAudioIo {
    fn load(&self, path: &Path) -> Result<AudioBuffer> {
        match extension(path).as_deref() {
            Some("wav") => read_wav_mono(path),
            Some("flac") => read_flac_mono(path),
            _ => Err(VcError::audio(
                format!("load {}", path.display()),
                "unsupported extension (expected .wav or .flac)",
            )),
        }
    }

    fn write(&self, path: &Path, audio: &AudioBuffer) -> Result<()> {
        if extension(path).as_deref() != Some("wav") {
            return Err(VcError::audio(
                format!("write {}", path.display()),
                "only .wav output is supported",
            ));
        }
        let context = || format!("write {}", path.display());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: audio.sample_rate_hz,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer =
            hound::WavWriter::create(path, spec).map_err(|e| VcError::audio(context(), e))?;
        for &sample in &audio.samples {
            let pcm = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            writer
                .write_sample(pcm)
                .map_err(|e| VcError::audio(context(), e))?;
        }
        writer.finalize().map_err(|e| VcError::audio(context(), e))
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

fn read_wav_mono(path: &Path) -> Result<AudioBuffer> {
    let context = || format!("decode WAV {}", path.display());
    let reader = hound::WavReader::open(path).map_err(|e| VcError::audio(context(), e))?;
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let scale = int_scale(spec.bits_per_sample as u32);
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| VcError::audio(context(), e))?
        }
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| VcError::audio(context(), e))?,
    };
    Ok(AudioBuffer {
        sample_rate_hz: spec.sample_rate,
        samples: downmix(&interleaved, spec.channels as usize, path)?,
    })
}

fn read_flac_mono(path: &Path) -> Result<AudioBuffer> {
    let context = || format!("decode FLAC {}", path.display());
    let mut reader = FlacReader::open(path).map_err(|e| VcError::audio(context(), e))?;
    let streaminfo = reader.streaminfo();
    let scale = int_scale(streaminfo.bits_per_sample);
    let interleaved = reader
        .samples()
        .map(|s| s.map(|v| v as f32 / scale))
        .collect::<std::result::Result<Vec<f32>, _>>()
        .map_err(|e| VcError::audio(context(), e))?;
    Ok(AudioBuffer {
        sample_rate_hz: streaminfo.sample_rate,
        samples: downmix(&interleaved, streaminfo.channels as usize, path)?,
    })
}

fn int_scale(bits_per_sample: u32) -> f32 {
    if bits_per_sample > 1 {
        ((1_i64 << (bits_per_sample - 1)) - 1) as f32
    } else {
        1.0
    }
}

fn downmix(interleaved: &[f32], channels: usize, path: &Path) -> Result<Vec<f32>> {
    match channels {
        0 => Err(VcError::audio(
            format!("decode {}", path.display()),
            "file has zero channels",
        )),
        1 => Ok(interleaved.to_vec()),
        _ => Ok(interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixture::{CovarianceKind, MixtureTrainer};
    use crate::types::{FeatureLayout, JointDistribution};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("gmm_vc_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn small_model() -> MixtureModel {
        let mut rows = Vec::new();
        for i in 0..12 {
            let x = 1.0 + i as f64;
            rows.extend([x, 0.5 * x - 2.0]);
        }
        let samples = ndarray::Array2::from_shape_vec((12, 2), rows).unwrap();
        let joint = JointDistribution::from_parts(samples, FeatureLayout::static_only(1));
        MixtureTrainer::new(1)
            .with_covariance(CovarianceKind::Full)
            .fit(&joint)
            .unwrap()
    }

    #[test]
    fn fastdtw_aligner_matches_free_function() {
        let source = FeatureSequence::from_rows(&[vec![1.0], vec![2.0], vec![3.0]]).unwrap();
        let target =
            FeatureSequence::from_rows(&[vec![1.0], vec![2.0], vec![2.0], vec![3.0]]).unwrap();
        let aligner = FastDtwAligner::default();
        let pair = aligner.align(&source, &target).unwrap();
        assert_eq!(pair, align(&source, &target, 1).unwrap());
    }

    #[test]
    fn json_store_round_trips_model() {
        let dir = temp_dir("store_round_trip");
        let store = JsonModelStore::new(&dir);
        let key = SpeakerPair::new("bdl", "clb");
        let model = small_model();

        store.save(&key, &model).unwrap();
        assert!(store.path_for(&key).ends_with("bdl-clb.json"));
        assert!(!dir.join("bdl-clb.json.tmp").exists());
        let loaded = store.load(&key).unwrap();
        assert_eq!(loaded.layout(), model.layout());
        assert_eq!(loaded.summary().seed, model.summary().seed);
        for (a, b) in loaded.components().iter().zip(model.components()) {
            assert!((a.weight - b.weight).abs() < 1e-12);
            let saved = b.mean.iter().chain(&b.covariance);
            for (x, y) in a.mean.iter().chain(&a.covariance).zip(saved) {
                assert!((x - y).abs() <= 1e-12 * y.abs().max(1.0));
            }
        }

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn json_store_rejects_invalid_model() {
        let dir = temp_dir("store_invalid");
        let store = JsonModelStore::new(&dir);
        let key = SpeakerPair::new("awb", "jmk");
        store.save(&key, &small_model()).unwrap();

        let path = store.path_for(&key);
        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        value["components"][0]["weight"] = serde_json::json!(0.25);
        fs::write(&path, serde_json::to_vec(&value).unwrap()).unwrap();

        assert!(matches!(
            store.load(&key),
            Err(VcError::InvalidInput { .. })
        ));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_model_is_io_error() {
        let store = JsonModelStore::new(temp_dir("store_missing"));
        let err = store.load(&SpeakerPair::new("a", "b")).unwrap_err();
        assert!(matches!(err, VcError::Io { .. }));
    }

    #[test]
    fn wav_write_then_load_keeps_rate_and_length() {
        let dir = temp_dir("wav_io");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tone.wav");
        let audio = AudioBuffer {
            sample_rate_hz: 16_000,
            samples: (0..1600)
                .map(|i| (i as f32 * 0.05).sin() * 0.5)
                .collect(),
        };
        FileAudioIo.write(&path, &audio).unwrap();
        let loaded = FileAudioIo.load(&path).unwrap();
        assert_eq!(loaded.sample_rate_hz, 16_000);
        assert_eq!(loaded.samples.len(), 1600);
        for (a, b) in audio.samples.iter().zip(&loaded.samples) {
            assert!((a - b).abs() < 1e-3);
        }
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn unsupported_extension_is_audio_error() {
        let err = FileAudioIo.load(Path::new("clip.mp3")).unwrap_err();
        assert!(matches!(err, VcError::Audio { .. }));
    }

    #[test]
    fn downmix_averages_channels() {
        let mono = downmix(&[0.5, -0.5, 1.0, 0.0], 2, Path::new("x.wav")).unwrap();
        assert_eq!(mono, vec![0.0, 0.5]);
    }
}
