use crate::config::VcConfig;
use crate::error::{Result, VcError};
use crate::pipeline::defaults::{FastDtwAligner, FileAudioIo, JsonModelStore, ZeroFrameFilter};
use crate::pipeline::runtime::{VoiceConversionParts, VoiceConversionPipeline};
use crate::pipeline::traits::{
    AudioIo, FeatureExtractor, FrameFilter, ModelStore, SequenceAligner, Synthesizer,
};
use crate::vocoder::CepstralVocoder;

/// Directory the default model store writes to.
pub const DEFAULT_MODEL_DIR: &str = "models";

pub struct VoiceConversionBuilder {
    config: VcConfig,
    cepstral_vocoder: bool,
    feature_extractor: Option<Box<dyn FeatureExtractor>>,
    synthesizer: Option<Box<dyn Synthesizer>>,
    sequence_aligner: Option<Box<dyn SequenceAligner>>,
    frame_filter: Option<Box<dyn FrameFilter>>,
    model_store: Option<Box<dyn ModelStore>>,
    audio_io: Option<Box<dyn AudioIo>>,
}

impl VoiceConversionBuilder {
    pub fn new(config: VcConfig) -> Self {
        Self {
            config,
            cepstral_vocoder: false,
            feature_extractor: None,
            synthesizer: None,
            sequence_aligner: None,
            frame_filter: None,
            model_store: None,
            audio_io: None,
        }
    }

    /// Uses [`CepstralVocoder`] at the configured sample rate for both
    /// analysis and synthesis, unless either is injected explicitly.
    pub fn with_cepstral_vocoder(mut self) -> Self {
        self.cepstral_vocoder = true;
        self
    }

    pub fn with_feature_extractor(mut self, feature_extractor: Box<dyn FeatureExtractor>) -> Self {
        self.feature_extractor = Some(feature_extractor);
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Box<dyn Synthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn with_sequence_aligner(mut self, sequence_aligner: Box<dyn SequenceAligner>) -> Self {
        self.sequence_aligner = Some(sequence_aligner);
        self
    }

    pub fn with_frame_filter(mut self, frame_filter: Box<dyn FrameFilter>) -> Self {
        self.frame_filter = Some(frame_filter);
        self
    }

    pub fn with_model_store(mut self, model_store: Box<dyn ModelStore>) -> Self {
        self.model_store = Some(model_store);
        self
    }

    pub fn with_audio_io(mut self, audio_io: Box<dyn AudioIo>) -> Self {
        self.audio_io = Some(audio_io);
        self
    }

    pub fn build(self) -> Result<VoiceConversionPipeline> {
        self.config.validate()?;
        let rate = self.config.sampling_rate_hz;

        let mut feature_extractor = self.feature_extractor;
        let mut synthesizer = self.synthesizer;
        if self.cepstral_vocoder {
            if feature_extractor.is_none() {
                feature_extractor = Some(Box::new(CepstralVocoder::new(rate)?));
            }
            if synthesizer.is_none() {
                synthesizer = Some(Box::new(CepstralVocoder::new(rate)?));
            }
        }

        if let Some(extractor) = &feature_extractor {
            let expected = extractor.expected_sample_rate_hz();
            if expected != rate {
                return Err(VcError::configuration(
                    "sampling_rate_hz",
                    format!("configured {rate} Hz but the feature extractor expects {expected} Hz"),
                ));
            }
        }

        let radius = self.config.dtw_radius;
        Ok(VoiceConversionPipeline::from_parts(VoiceConversionParts {
            feature_extractor,
            synthesizer,
            sequence_aligner: self
                .sequence_aligner
                .unwrap_or_else(|| Box::new(FastDtwAligner { radius })),
            frame_filter: self.frame_filter.unwrap_or_else(|| Box::new(ZeroFrameFilter)),
            model_store: self
                .model_store
                .unwrap_or_else(|| Box::new(JsonModelStore::new(DEFAULT_MODEL_DIR))),
            audio_io: self.audio_io.unwrap_or_else(|| Box::new(FileAudioIo)),
            config: self.config,
        }))
    }
}
