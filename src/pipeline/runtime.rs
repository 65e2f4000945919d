use std::path::Path;

use ndarray::{s, Array2};

use crate::config::{PairFailurePolicy, VcConfig};
use crate::conversion::ConversionEngine;
use crate::error::{Result, VcError};
use crate::features::{apply_delta, build_joint, pad_or_truncate};
use crate::mixture::{MixtureModel, MixtureTrainer};
use crate::pipeline::traits::{
    AudioIo, FeatureExtractor, FrameFilter, ModelStore, SequenceAligner, Synthesizer,
};
use crate::types::{
    AlignedPair, AudioBuffer, ConversionResult, FeatureLayout, FeatureSequence,
    JointDistribution, SpeakerPair,
};

/// A training pair that was left out of the corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedPair {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusReport {
    pub prepared: usize,
    pub skipped: Vec<SkippedPair>,
}

/// Joint training matrix plus what happened to each input pair.
#[derive(Debug, Clone)]
pub struct Corpus {
    pub joint: JointDistribution,
    pub report: CorpusReport,
}

pub struct VoiceConversionPipeline {
    config: VcConfig,
    feature_extractor: Option<Box<dyn FeatureExtractor>>,
    synthesizer: Option<Box<dyn Synthesizer>>,
    sequence_aligner: Box<dyn SequenceAligner>,
    frame_filter: Box<dyn FrameFilter>,
    model_store: Box<dyn ModelStore>,
    audio_io: Box<dyn AudioIo>,
}

pub(crate) struct VoiceConversionParts {
    pub config: VcConfig,
    pub feature_extractor: Option<Box<dyn FeatureExtractor>>,
    pub synthesizer: Option<Box<dyn Synthesizer>>,
    pub sequence_aligner: Box<dyn SequenceAligner>,
    pub frame_filter: Box<dyn FrameFilter>,
    pub model_store: Box<dyn ModelStore>,
    pub audio_io: Box<dyn AudioIo>,
}

impl VoiceConversionPipeline {
    pub(crate) fn from_parts(parts: VoiceConversionParts) -> Self {
        Self {
            config: parts.config,
            feature_extractor: parts.feature_extractor,
            synthesizer: parts.synthesizer,
            sequence_aligner: parts.sequence_aligner,
            frame_filter: parts.frame_filter,
            model_store: parts.model_store,
            audio_io: parts.audio_io,
        }
    }

    pub fn config(&self) -> &VcConfig {
        &self.config
    }

    /// Align, drop energy, pad or truncate to `padded_length`, append deltas.
    pub fn prepare_pair(
        &self,
        source: &FeatureSequence,
        target: &FeatureSequence,
    ) -> Result<AlignedPair> {
        let aligned = self.sequence_aligner.align(source, target)?;
        let len = self.config.padded_length;
        let prepared = aligned
            .map_sides(|seq| self.drop_energy(seq))?
            .map_sides(|seq| Ok(pad_or_truncate(seq, len)))?
            .map_sides(|seq| Ok(apply_delta(seq)))?;
        tracing::debug!(
            source_frames = source.len(),
            target_frames = target.len(),
            prepared_frames = prepared.len(),
            dim = prepared.dim(),
            "pipeline: prepared pair"
        );
        Ok(prepared)
    }

    /// Cuts one long utterance pair into `padded_length`-frame chunks and
    /// prepares each one. Aligned chunks are padded to twice the chunk length,
    /// the longest warping path two chunks can produce.
    pub fn prepare_segmented(
        &self,
        source: &FeatureSequence,
        target: &FeatureSequence,
    ) -> Result<Vec<AlignedPair>> {
        let len = self.config.padded_length;
        let chunks = source.len().min(target.len()) / len;
        if chunks == 0 {
            return Err(VcError::invalid_input(
                "prepare segmented",
                format!(
                    "need at least {len} frames per side, got source {} / target {}",
                    source.len(),
                    target.len()
                ),
            ));
        }

        let mut prepared = Vec::with_capacity(chunks);
        for chunk in 0..chunks {
            let range = chunk * len..(chunk + 1) * len;
            let source_chunk = FeatureSequence::from_array(
                source.frames().slice(s![range.clone(), ..]).to_owned(),
            );
            let target_chunk =
                FeatureSequence::from_array(target.frames().slice(s![range, ..]).to_owned());
            let pair = self
                .sequence_aligner
                .align(&source_chunk, &target_chunk)?
                .map_sides(|seq| self.drop_energy(seq))?
                .map_sides(|seq| Ok(pad_or_truncate(seq, 2 * len)))?
                .map_sides(|seq| Ok(apply_delta(seq)))?;
            prepared.push(pair);
        }
        tracing::debug!(
            source_frames = source.len(),
            target_frames = target.len(),
            chunks,
            chunk_frames = len,
            "pipeline: prepared segmented pair"
        );
        Ok(prepared)
    }

    /// Prepares every pair under the configured [`PairFailurePolicy`] and
    /// stacks the survivors into one joint distribution.
    pub fn build_corpus(&self, pairs: &[(FeatureSequence, FeatureSequence)]) -> Result<Corpus> {
        self.build_corpus_with(pairs.len(), |i| {
            let (source, target) = &pairs[i];
            self.prepare_pair(source, target)
        })
    }

    pub fn train(&self, pairs: &[(FeatureSequence, FeatureSequence)]) -> Result<MixtureModel> {
        let corpus = self.build_corpus(pairs)?;
        self.fit(&corpus.joint)
    }

    /// Trains on a single long recording pair cut into chunks.
    pub fn train_segmented(
        &self,
        source: &FeatureSequence,
        target: &FeatureSequence,
    ) -> Result<MixtureModel> {
        let pairs = self.prepare_segmented(source, target)?;
        let layout = self.layout_for(source.dim())?;
        let joint = build_joint(&pairs, layout, self.frame_filter.as_ref())?;
        self.fit(&joint)
    }

    /// [`Self::train_segmented`] on features extracted from two recordings.
    pub fn train_segmented_audio(
        &self,
        source: &AudioBuffer,
        target: &AudioBuffer,
    ) -> Result<MixtureModel> {
        let extractor = self.extractor()?;
        self.check_sample_rate(source)?;
        self.check_sample_rate(target)?;
        let source = extractor.extract(source)?;
        let target = extractor.extract(target)?;
        self.train_segmented(&source, &target)
    }

    /// Extracts features from parallel recordings, then trains.
    pub fn train_audio(&self, pairs: &[(AudioBuffer, AudioBuffer)]) -> Result<MixtureModel> {
        let extractor = self.extractor()?;
        let corpus = self.build_corpus_with(pairs.len(), |i| {
            let (source, target) = &pairs[i];
            self.check_sample_rate(source)?;
            self.check_sample_rate(target)?;
            let source = extractor.extract(source)?;
            let target = extractor.extract(target)?;
            self.prepare_pair(&source, &target)
        })?;
        self.fit(&corpus.joint)
    }

    /// Trains and persists under `key`. Nothing is written if training fails.
    pub fn train_and_save(
        &self,
        key: &SpeakerPair,
        pairs: &[(FeatureSequence, FeatureSequence)],
    ) -> Result<MixtureModel> {
        let model = self.train(pairs)?;
        self.save_model(key, &model)?;
        Ok(model)
    }

    pub fn conversion_engine(&self, model: &MixtureModel) -> Result<ConversionEngine> {
        Ok(ConversionEngine::new(model)?.with_mlpg(self.config.use_mlpg))
    }

    /// Converts static source features. The returned frames keep the input
    /// dimension: the source energy coefficient is carried over unchanged
    /// when it was excluded from training.
    pub fn convert_features(
        &self,
        model: &MixtureModel,
        source: &FeatureSequence,
    ) -> Result<ConversionResult> {
        let engine = self.conversion_engine(model)?;
        self.convert_with_engine(&engine, source)
    }

    pub fn convert_with_engine(
        &self,
        engine: &ConversionEngine,
        source: &FeatureSequence,
    ) -> Result<ConversionResult> {
        let expected = self.layout_for(source.dim())?;
        if engine.layout().static_dim != expected.static_dim {
            return Err(VcError::invalid_input(
                "convert",
                format!(
                    "model was trained on {} static coefficients, input gives {}",
                    engine.layout().static_dim,
                    expected.static_dim
                ),
            ));
        }

        let stripped = self.drop_energy(source)?;
        let augmented = if engine.layout().with_delta {
            apply_delta(&stripped)
        } else {
            stripped
        };
        let mut result = engine.convert(&augmented)?;

        if self.config.drop_energy_coefficient {
            let n = source.len();
            let dim = result.features.dim();
            let mut restored = Array2::zeros((n, dim + 1));
            restored.column_mut(0).assign(&source.frames().column(0));
            restored
                .slice_mut(s![.., 1..])
                .assign(&result.features.frames());
            result.features = FeatureSequence::from_array(restored);
        }
        Ok(result)
    }

    pub fn convert_audio(&self, model: &MixtureModel, audio: &AudioBuffer) -> Result<AudioBuffer> {
        self.check_sample_rate(audio)?;
        let synthesizer = self.synthesizer.as_deref().ok_or_else(|| {
            VcError::configuration("synthesizer", "no synthesizer configured for audio conversion")
        })?;
        let features = self.extractor()?.extract(audio)?;
        let converted = self.convert_features(model, &features)?;
        let out = synthesizer.synthesize(audio, &converted.features)?;
        tracing::debug!(
            input_ms = audio.duration_ms(),
            output_ms = out.duration_ms(),
            frames = features.len(),
            "pipeline: converted audio"
        );
        Ok(out)
    }

    pub fn load_model(&self, key: &SpeakerPair) -> Result<MixtureModel> {
        self.model_store.load(key)
    }

    pub fn save_model(&self, key: &SpeakerPair, model: &MixtureModel) -> Result<()> {
        self.model_store.save(key, model)
    }

    pub fn load_audio(&self, path: &Path) -> Result<AudioBuffer> {
        self.audio_io.load(path)
    }

    pub fn write_audio(&self, path: &Path, audio: &AudioBuffer) -> Result<()> {
        self.audio_io.write(path, audio)
    }

    fn fit(&self, joint: &JointDistribution) -> Result<MixtureModel> {
        MixtureTrainer::from_config(&self.config).fit(joint)
    }

    fn extractor(&self) -> Result<&dyn FeatureExtractor> {
        self.feature_extractor.as_deref().ok_or_else(|| {
            VcError::configuration("feature_extractor", "no feature extractor configured")
        })
    }

    fn check_sample_rate(&self, audio: &AudioBuffer) -> Result<()> {
        if audio.sample_rate_hz != self.config.sampling_rate_hz {
            return Err(VcError::invalid_input(
                "audio",
                format!(
                    "sample rate {} Hz does not match configured {} Hz",
                    audio.sample_rate_hz, self.config.sampling_rate_hz
                ),
            ));
        }
        Ok(())
    }

    fn drop_energy(&self, seq: &FeatureSequence) -> Result<FeatureSequence> {
        if !self.config.drop_energy_coefficient {
            return Ok(seq.clone());
        }
        if seq.dim() < 2 {
            return Err(VcError::invalid_input(
                "drop energy",
                format!("frames have {} coefficients, need at least 2", seq.dim()),
            ));
        }
        Ok(FeatureSequence::from_array(
            seq.frames().slice(s![.., 1..]).to_owned(),
        ))
    }

    /// Layout of prepared features for raw frames of `dim` coefficients.
    fn layout_for(&self, dim: usize) -> Result<FeatureLayout> {
        let static_dim = if self.config.drop_energy_coefficient {
            dim.checked_sub(1).filter(|&d| d > 0)
        } else {
            Some(dim).filter(|&d| d > 0)
        };
        static_dim.map(FeatureLayout::augmented).ok_or_else(|| {
            VcError::invalid_input("layout", format!("{dim} coefficients leave no static features"))
        })
    }

    fn build_corpus_with<F>(&self, count: usize, prepare: F) -> Result<Corpus>
    where
        F: Fn(usize) -> Result<AlignedPair>,
    {
        if count == 0 {
            return Err(VcError::invalid_input("build corpus", "no training pairs"));
        }

        let mut prepared = Vec::with_capacity(count);
        let mut report = CorpusReport::default();
        for index in 0..count {
            match prepare(index) {
                Ok(pair) => prepared.push(pair),
                Err(err) => match self.config.pair_failure_policy {
                    PairFailurePolicy::Abort => return Err(err),
                    PairFailurePolicy::Skip => {
                        tracing::warn!(
                            pair = index,
                            error = %err,
                            "pipeline: skipping training pair"
                        );
                        report.skipped.push(SkippedPair {
                            index,
                            reason: err.to_string(),
                        });
                    }
                },
            }
        }
        report.prepared = prepared.len();

        let Some(first) = prepared.first() else {
            return Err(VcError::fit_failure(format!(
                "all {count} training pairs failed to prepare"
            )));
        };
        let layout = FeatureLayout::augmented(first.dim() / 2);
        let joint = build_joint(&prepared, layout, self.frame_filter.as_ref())?;
        tracing::info!(
            prepared = report.prepared,
            skipped = report.skipped.len(),
            samples = joint.n_samples(),
            joint_dim = joint.joint_dim(),
            "pipeline: corpus built"
        );
        Ok(Corpus { joint, report })
    }
}
