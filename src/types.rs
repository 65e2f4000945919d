use std::fmt;

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VcError};

/// Frame-major spectral features: one row per frame, constant dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSequence {
    frames: Array2<f64>,
}

impl FeatureSequence {
    pub fn new(frames: Array2<f64>) -> Result<Self> {
        if let Some((idx, value)) = frames.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            let dim = frames.ncols().max(1);
            return Err(VcError::invalid_input(
                "feature sequence",
                format!(
                    "non-finite value {value} at frame {} coefficient {}",
                    idx / dim,
                    idx % dim
                ),
            ));
        }
        Ok(Self { frames })
    }

    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let dim = rows.first().map(Vec::len).unwrap_or(0);
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dim) {
            return Err(VcError::invalid_input(
                "feature sequence",
                format!("frame {idx} has {} coefficients, expected {dim}", row.len()),
            ));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let frames = Array2::from_shape_vec((rows.len(), dim), flat)
            .map_err(|e| VcError::invalid_input("feature sequence", e.to_string()))?;
        Self::new(frames)
    }

    pub fn zeros(len: usize, dim: usize) -> Self {
        Self {
            frames: Array2::zeros((len, dim)),
        }
    }

    /// Wraps a matrix produced by crate arithmetic on already-validated input.
    pub(crate) fn from_array(frames: Array2<f64>) -> Self {
        debug_assert!(frames.iter().all(|v| v.is_finite()));
        Self { frames }
    }

    pub fn len(&self) -> usize {
        self.frames.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.nrows() == 0
    }

    pub fn dim(&self) -> usize {
        self.frames.ncols()
    }

    pub fn frames(&self) -> ArrayView2<'_, f64> {
        self.frames.view()
    }

    pub fn frame(&self, index: usize) -> ArrayView1<'_, f64> {
        self.frames.row(index)
    }

    pub fn into_inner(self) -> Array2<f64> {
        self.frames
    }
}

/// Shape of one side of a joint vector: static coefficients, optionally followed by deltas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureLayout {
    pub static_dim: usize,
    pub with_delta: bool,
}

impl FeatureLayout {
    pub fn augmented(static_dim: usize) -> Self {
        Self {
            static_dim,
            with_delta: true,
        }
    }

    pub fn static_only(static_dim: usize) -> Self {
        Self {
            static_dim,
            with_delta: false,
        }
    }

    /// Width of one side (source or target) of a joint vector.
    pub fn side_dim(&self) -> usize {
        if self.with_delta {
            2 * self.static_dim
        } else {
            self.static_dim
        }
    }

    pub fn joint_dim(&self) -> usize {
        2 * self.side_dim()
    }
}

/// Equal-length source/target sequences whose rows correspond frame by frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedPair {
    source: FeatureSequence,
    target: FeatureSequence,
    /// `(source_frame, target_frame)` per output row, as produced by the aligner.
    path: Vec<(usize, usize)>,
}

impl AlignedPair {
    pub fn new(
        source: FeatureSequence,
        target: FeatureSequence,
        path: Vec<(usize, usize)>,
    ) -> Result<Self> {
        if source.len() != target.len() {
            return Err(VcError::invalid_input(
                "aligned pair",
                format!(
                    "frame counts differ: source {} vs target {}",
                    source.len(),
                    target.len()
                ),
            ));
        }
        if source.dim() != target.dim() {
            return Err(VcError::invalid_input(
                "aligned pair",
                format!(
                    "dimensions differ: source {} vs target {}",
                    source.dim(),
                    target.dim()
                ),
            ));
        }
        Ok(Self {
            source,
            target,
            path,
        })
    }

    pub fn source(&self) -> &FeatureSequence {
        &self.source
    }

    pub fn target(&self) -> &FeatureSequence {
        &self.target
    }

    pub fn path(&self) -> &[(usize, usize)] {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.source.dim()
    }

    /// Applies the same frame-wise transform to both sides, keeping the warping path.
    pub fn map_sides<F>(self, f: F) -> Result<Self>
    where
        F: Fn(&FeatureSequence) -> Result<FeatureSequence>,
    {
        let source = f(&self.source)?;
        let target = f(&self.target)?;
        Self::new(source, target, self.path)
    }
}

/// Stacked `source ‖ target` rows of every training pair, degenerate frames removed.
#[derive(Debug, Clone, PartialEq)]
pub struct JointDistribution {
    samples: Array2<f64>,
    layout: FeatureLayout,
}

impl JointDistribution {
    pub(crate) fn from_parts(samples: Array2<f64>, layout: FeatureLayout) -> Self {
        debug_assert_eq!(samples.ncols(), layout.joint_dim());
        Self { samples, layout }
    }

    pub fn samples(&self) -> ArrayView2<'_, f64> {
        self.samples.view()
    }

    pub fn n_samples(&self) -> usize {
        self.samples.nrows()
    }

    pub fn joint_dim(&self) -> usize {
        self.samples.ncols()
    }

    pub fn layout(&self) -> FeatureLayout {
        self.layout
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConversionResult {
    /// Converted target static features, one row per input frame.
    pub features: FeatureSequence,
    /// Posterior `P(k | x)` per frame (rows) and component (columns).
    pub responsibilities: Array2<f64>,
}

/// Mono PCM audio in `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
}

impl AudioBuffer {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate_hz == 0 {
            return 0;
        }
        (self.samples.len() as u128 * 1000 / self.sample_rate_hz as u128) as u64
    }
}

/// Identifies the conversion a model was trained for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpeakerPair {
    pub source: String,
    pub target: String,
}

impl SpeakerPair {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    /// Inverse of the `source-target` rendering, split at the first `-`.
    pub fn parse(name: &str) -> Option<Self> {
        let (source, target) = name.split_once('-')?;
        if source.is_empty() || target.is_empty() {
            return None;
        }
        Some(Self::new(source, target))
    }
}

impl fmt::Display for SpeakerPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.target)
    }
}
