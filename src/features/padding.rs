use ndarray::{s, Array2};

use crate::types::FeatureSequence;

/// Returns exactly `len` frames: the first `len` frames of `seq`, followed by
/// zero frames when `seq` is shorter.
pub fn pad_or_truncate(seq: &FeatureSequence, len: usize) -> FeatureSequence {
    let keep = seq.len().min(len);
    let mut out = Array2::zeros((len, seq.dim()));
    out.slice_mut(s![..keep, ..])
        .assign(&seq.frames().slice(s![..keep, ..]));
    FeatureSequence::from_array(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> FeatureSequence {
        FeatureSequence::new(Array2::from_shape_fn((len, 2), |(i, c)| (i * 2 + c + 1) as f64))
            .unwrap()
    }

    #[test]
    fn shorter_sequence_is_zero_padded_at_the_end() {
        let seq = ramp(3);
        let padded = pad_or_truncate(&seq, 5);
        assert_eq!(padded.len(), 5);
        assert_eq!(padded.frames().slice(s![..3, ..]), seq.frames());
        assert!(padded.frames().slice(s![3.., ..]).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn longer_sequence_keeps_its_first_frames() {
        let seq = ramp(8);
        let truncated = pad_or_truncate(&seq, 4);
        assert_eq!(truncated.len(), 4);
        assert_eq!(truncated.frames(), seq.frames().slice(s![..4, ..]));
    }

    #[test]
    fn exact_length_is_unchanged() {
        let seq = ramp(6);
        assert_eq!(pad_or_truncate(&seq, 6), seq);
    }

    #[test]
    fn output_length_is_always_the_budget() {
        for len in [0usize, 1, 7, 19] {
            for budget in [1usize, 5, 12] {
                let out = pad_or_truncate(&ramp(len), budget);
                assert_eq!(out.len(), budget);
                assert_eq!(out.dim(), 2);
            }
        }
    }
}
