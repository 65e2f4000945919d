pub mod delta;
pub mod joint;
pub mod padding;

pub use delta::{apply_delta, compute_delta, DELTA_WINDOW};
pub use joint::{build_joint, filter_frames, ZeroFrameFilter};
pub use padding::pad_or_truncate;
