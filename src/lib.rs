pub mod alignment;
pub mod config;
pub mod conversion;
pub mod error;
pub mod features;
pub mod mixture;
pub mod pipeline;
pub mod types;
pub mod vocoder;

pub use config::{PairFailurePolicy, VcConfig};
pub use conversion::ConversionEngine;
pub use error::{Result, VcError};
pub use mixture::{CovarianceKind, MixtureModel, MixtureTrainer};
pub use pipeline::builder::VoiceConversionBuilder;
pub use pipeline::runtime::{Corpus, CorpusReport, VoiceConversionPipeline};
pub use pipeline::traits::{
    AudioIo, FeatureExtractor, FrameFilter, ModelStore, SequenceAligner, Synthesizer,
};
pub use types::{
    AlignedPair, AudioBuffer, ConversionResult, FeatureLayout, FeatureSequence,
    JointDistribution, SpeakerPair,
};
pub use vocoder::CepstralVocoder;
