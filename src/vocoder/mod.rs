//! Cepstral envelope vocoder: the bundled [`FeatureExtractor`] and
//! [`Synthesizer`].
//!
//! Analysis takes a Hann-windowed FFT every hop and keeps the low-quefrency
//! real cepstrum; coefficient 0 is the frame's mean log magnitude, i.e. its
//! energy. Synthesis reuses the source's short-time spectra (phase and fine
//! structure) and swaps the source envelope for the converted one, then
//! overlap-adds.

mod cepstrum;

use std::sync::Arc;

use ndarray::Array2;
use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::error::{Result, VcError};
use crate::pipeline::traits::{FeatureExtractor, Synthesizer};
use crate::types::{AudioBuffer, FeatureSequence};

use cepstrum::{hann, log_envelope, real_cepstrum, windowed_frame};

pub const DEFAULT_ORDER: usize = 25;
pub const DEFAULT_FRAME_PERIOD_MS: f64 = 5.0;
const ANALYSIS_WINDOW_MS: f64 = 32.0;

pub struct CepstralVocoder {
    sample_rate_hz: u32,
    order: usize,
    hop: usize,
    window: Vec<f64>,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl CepstralVocoder {
    pub fn new(sample_rate_hz: u32) -> Result<Self> {
        Self::with_params(sample_rate_hz, DEFAULT_ORDER, DEFAULT_FRAME_PERIOD_MS)
    }

    /// `order` cepstral coefficients (energy included) every `frame_period_ms`.
    pub fn with_params(sample_rate_hz: u32, order: usize, frame_period_ms: f64) -> Result<Self> {
        if sample_rate_hz == 0 {
            return Err(VcError::configuration("sampling_rate_hz", "must be positive"));
        }
        let fft_len = ((sample_rate_hz as f64 * ANALYSIS_WINDOW_MS / 1000.0) as usize)
            .max(16)
            .next_power_of_two();
        if order == 0 || order > fft_len / 2 {
            return Err(VcError::configuration(
                "vocoder order",
                format!("must be in 1..={} for a {fft_len}-point FFT, got {order}", fft_len / 2),
            ));
        }
        let hop = (sample_rate_hz as f64 * frame_period_ms / 1000.0).round() as usize;
        if !(1..=fft_len / 2).contains(&hop) {
            return Err(VcError::configuration(
                "vocoder frame period",
                format!("{frame_period_ms} ms gives hop {hop}, expected 1..={}", fft_len / 2),
            ));
        }

        let mut planner = FftPlanner::new();
        Ok(Self {
            sample_rate_hz,
            order,
            hop,
            window: hann(fft_len),
            forward: planner.plan_fft_forward(fft_len),
            inverse: planner.plan_fft_inverse(fft_len),
        })
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn hop(&self) -> usize {
        self.hop
    }

    pub fn fft_len(&self) -> usize {
        self.window.len()
    }

    fn frame_count(&self, n_samples: usize) -> usize {
        n_samples / self.hop + 1
    }

    fn spectrum(&self, samples: &[f32], frame: usize) -> Vec<Complex<f64>> {
        let mut buf = windowed_frame(samples, frame * self.hop, &self.window);
        self.forward.process(&mut buf);
        buf
    }

    fn check_rate(&self, audio: &AudioBuffer) {
        if audio.sample_rate_hz != self.sample_rate_hz {
            tracing::warn!(
                expected_rate_hz = self.sample_rate_hz,
                actual_rate_hz = audio.sample_rate_hz,
                "vocoder configured for a different sample rate; envelopes will be skewed"
            );
        }
    }
}

impl FeatureExtractor for CepstralVocoder {
    fn extract(&self, audio: &AudioBuffer) -> Result<FeatureSequence> {
        self.check_rate(audio);
        let n_frames = self.frame_count(audio.samples.len());
        let mut frames = Array2::zeros((n_frames, self.order));
        for t in 0..n_frames {
            let spectrum = self.spectrum(&audio.samples, t);
            let cepstrum = real_cepstrum(&spectrum, self.order, &self.inverse);
            for (c, v) in cepstrum.into_iter().enumerate() {
                frames[(t, c)] = v;
            }
        }
        tracing::debug!(
            samples = audio.samples.len(),
            frames = n_frames,
            order = self.order,
            "vocoder: extracted cepstra"
        );
        FeatureSequence::new(frames)
    }

    fn expected_sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }
}

impl Synthesizer for CepstralVocoder {
    fn synthesize(&self, source: &AudioBuffer, converted: &FeatureSequence) -> Result<AudioBuffer> {
        self.check_rate(source);
        let n_frames = self.frame_count(source.samples.len());
        if converted.len() != n_frames || converted.dim() != self.order {
            return Err(VcError::invalid_input(
                "synthesize",
                format!(
                    "expected {n_frames} frames x {} coefficients for {} samples, got {} x {}",
                    self.order,
                    source.samples.len(),
                    converted.len(),
                    converted.dim()
                ),
            ));
        }

        let fft_len = self.fft_len();
        let half = fft_len / 2;
        let n = source.samples.len();
        let mut out = vec![0.0f64; n];
        let mut norm = vec![0.0f64; n];

        for t in 0..n_frames {
            let mut spectrum = self.spectrum(&source.samples, t);
            let source_cepstrum = real_cepstrum(&spectrum, self.order, &self.inverse);
            let source_env = log_envelope(&source_cepstrum, fft_len, &self.forward);
            let target_cepstrum = converted.frame(t).to_vec();
            let target_env = log_envelope(&target_cepstrum, fft_len, &self.forward);

            for ((bin, s), tg) in spectrum.iter_mut().zip(&source_env).zip(&target_env) {
                *bin *= (tg - s).exp();
            }
            self.inverse.process(&mut spectrum);

            let start = t * self.hop;
            for (i, (bin, &w)) in spectrum.iter().zip(&self.window).enumerate() {
                let Some(idx) = (start + i).checked_sub(half) else {
                    continue;
                };
                if idx >= n {
                    break;
                }
                out[idx] += w * bin.re / fft_len as f64;
                norm[idx] += w * w;
            }
        }

        let samples = out
            .iter()
            .zip(&norm)
            .map(|(&y, &w)| if w > 1e-8 { (y / w) as f32 } else { 0.0 })
            .collect();
        tracing::debug!(frames = n_frames, samples = n, "vocoder: resynthesized audio");
        Ok(AudioBuffer {
            sample_rate_hz: source.sample_rate_hz,
            samples,
        })
    }
}
