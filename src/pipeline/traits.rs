use std::path::Path;

use ndarray::ArrayView1;

use crate::error::Result;
use crate::mixture::MixtureModel;
use crate::types::{AlignedPair, AudioBuffer, FeatureSequence, SpeakerPair};

/// Vocoder analysis: audio in, one static feature frame per analysis hop out.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, audio: &AudioBuffer) -> Result<FeatureSequence>;

    fn expected_sample_rate_hz(&self) -> u32;
}

/// Vocoder synthesis. `source` is the audio the features were extracted from,
/// so implementations can reuse its excitation.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, source: &AudioBuffer, converted: &FeatureSequence)
        -> Result<AudioBuffer>;
}

pub trait SequenceAligner: Send + Sync {
    fn align(&self, source: &FeatureSequence, target: &FeatureSequence) -> Result<AlignedPair>;
}

/// Decides which `source ‖ target` rows enter the joint distribution.
pub trait FrameFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn keep(&self, source: ArrayView1<'_, f64>, target: ArrayView1<'_, f64>) -> bool;
}

pub trait AudioIo: Send + Sync {
    fn load(&self, path: &Path) -> Result<AudioBuffer>;

    fn write(&self, path: &Path, audio: &AudioBuffer) -> Result<()>;
}

pub trait ModelStore: Send + Sync {
    fn save(&self, key: &SpeakerPair, model: &MixtureModel) -> Result<()>;

    fn load(&self, key: &SpeakerPair) -> Result<MixtureModel>;
}
