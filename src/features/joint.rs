use ndarray::{s, Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{Result, VcError};
use crate::pipeline::traits::FrameFilter;
use crate::types::{AlignedPair, FeatureLayout, JointDistribution};

/// Drops joint rows whose source half or target half is entirely zero.
///
/// Zero rows come from end padding (and digital silence); they carry no
/// speaker information and would pull a component onto the origin.
pub struct ZeroFrameFilter;

impl FrameFilter for ZeroFrameFilter {
    fn name(&self) -> &'static str {
        "zero-frame"
    }

    fn keep(&self, source: ArrayView1<'_, f64>, target: ArrayView1<'_, f64>) -> bool {
        !is_all_zero(source) && !is_all_zero(target)
    }
}

fn is_all_zero(frame: ArrayView1<'_, f64>) -> bool {
    frame.iter().all(|&v| v == 0.0)
}

/// Stacks `source ‖ target` rows of every pair, then applies `filter`.
///
/// Every pair must already be augmented to `layout.side_dim()` columns per side.
pub fn build_joint(
    pairs: &[AlignedPair],
    layout: FeatureLayout,
    filter: &dyn FrameFilter,
) -> Result<JointDistribution> {
    let side = layout.side_dim();
    if let Some((idx, pair)) = pairs.iter().enumerate().find(|(_, p)| p.dim() != side) {
        return Err(VcError::invalid_input(
            "joint distribution",
            format!(
                "pair {idx} has {} coefficients per side, layout expects {side}",
                pair.dim()
            ),
        ));
    }

    let total: usize = pairs.iter().map(AlignedPair::len).sum();
    let mut stacked = Array2::zeros((total, 2 * side));
    let mut row = 0usize;
    for pair in pairs {
        let len = pair.len();
        stacked
            .slice_mut(s![row..row + len, ..side])
            .assign(&pair.source().frames());
        stacked
            .slice_mut(s![row..row + len, side..])
            .assign(&pair.target().frames());
        row += len;
    }

    let samples = filter_frames(stacked.view(), side, filter);
    tracing::debug!(
        pairs = pairs.len(),
        stacked_rows = total,
        kept_rows = samples.nrows(),
        joint_dim = 2 * side,
        filter = filter.name(),
        "joint: built joint distribution"
    );
    Ok(JointDistribution::from_parts(samples, layout))
}

/// Keeps the rows of a `source ‖ target` matrix that `filter` accepts.
pub fn filter_frames(
    joint: ArrayView2<'_, f64>,
    side_dim: usize,
    filter: &dyn FrameFilter,
) -> Array2<f64> {
    let kept: Vec<usize> = joint
        .rows()
        .into_iter()
        .enumerate()
        .filter(|(_, r)| filter.keep(r.slice(s![..side_dim]), r.slice(s![side_dim..])))
        .map(|(i, _)| i)
        .collect();
    joint.select(Axis(0), &kept)
}
