use ndarray::{s, Array2, ArrayView2};

use crate::types::FeatureSequence;

/// Central-difference delta window applied to frames `t-1, t, t+1`.
pub const DELTA_WINDOW: [f64; 3] = [-0.5, 0.0, 0.5];

/// First-order delta with edge replication at both ends:
/// `Δx[t] = ½(x[min(t+1, n-1)] - x[max(t-1, 0)])`.
///
/// A single-frame sequence has a zero delta. The conversion engine's trajectory
/// solve uses the same operator, so the two must change together.
pub fn compute_delta(frames: ArrayView2<'_, f64>) -> Array2<f64> {
    let n = frames.nrows();
    let mut delta = Array2::zeros(frames.raw_dim());
    if n < 2 {
        return delta;
    }
    for (t, mut row) in delta.rows_mut().into_iter().enumerate() {
        let (prev, next) = delta_neighbors(t, n);
        let prev = frames.row(prev);
        let next = frames.row(next);
        for ((d, &p), &q) in row.iter_mut().zip(prev.iter()).zip(next.iter()) {
            *d = DELTA_WINDOW[0] * p + DELTA_WINDOW[2] * q;
        }
    }
    delta
}

/// Frames weighted by `DELTA_WINDOW[0]` and `DELTA_WINDOW[2]` at frame `t` of
/// an `n`-frame sequence, with edges replicated.
pub(crate) fn delta_neighbors(t: usize, n: usize) -> (usize, usize) {
    (t.saturating_sub(1), (t + 1).min(n.saturating_sub(1)))
}

/// Appends the delta of every coefficient, doubling the frame dimension.
/// The first `dim` columns of the result are the input, unchanged.
pub fn apply_delta(seq: &FeatureSequence) -> FeatureSequence {
    let frames = seq.frames();
    let dim = seq.dim();
    let mut augmented = Array2::zeros((seq.len(), 2 * dim));
    augmented.slice_mut(s![.., ..dim]).assign(&frames);
    augmented
        .slice_mut(s![.., dim..])
        .assign(&compute_delta(frames));
    FeatureSequence::from_array(augmented)
}
