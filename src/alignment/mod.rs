pub mod fastdtw;

use ndarray::Axis;

use crate::error::{Result, VcError};
use crate::types::{AlignedPair, FeatureSequence};

/// Time-aligns two utterances with FastDTW over Euclidean frame distance.
///
/// Each output row pairs a source frame with the target frame the warping path
/// maps it to, so both sides come back with `path.len()` frames
/// (at most `source.len() + target.len() - 1`).
pub fn align(
    source: &FeatureSequence,
    target: &FeatureSequence,
    radius: usize,
) -> Result<AlignedPair> {
    if source.is_empty() || target.is_empty() {
        return Err(VcError::invalid_input(
            "align",
            format!(
                "cannot align empty sequence (source {} frames, target {} frames)",
                source.len(),
                target.len()
            ),
        ));
    }
    if source.dim() != target.dim() {
        return Err(VcError::invalid_input(
            "align",
            format!(
                "feature dimensions differ: source {} vs target {}",
                source.dim(),
                target.dim()
            ),
        ));
    }

    let (distance, path) = fastdtw::fastdtw(source.frames(), target.frames(), radius);
    let (source_idx, target_idx): (Vec<usize>, Vec<usize>) = path.iter().copied().unzip();

    tracing::debug!(
        source_frames = source.len(),
        target_frames = target.len(),
        path_len = path.len(),
        radius,
        distance,
        "align: fastdtw path"
    );

    let aligned_source = FeatureSequence::from_array(source.frames().select(Axis(0), &source_idx));
    let aligned_target = FeatureSequence::from_array(target.frames().select(Axis(0), &target_idx));
    AlignedPair::new(aligned_source, aligned_target, path)
}
