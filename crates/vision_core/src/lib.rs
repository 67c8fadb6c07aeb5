//! vision_core: box geometry, anchors, target matching, post-processing and overlay
//! helpers shared by the petface dataset, training and inference crates.

pub mod anchors;
pub mod boxes;
pub mod coder;
pub mod interfaces;
pub mod matcher;
pub mod overlay;
pub mod postprocess;

pub mod prelude {
    pub use crate::anchors::{AnchorConfig, AnchorGenerator};
    pub use crate::boxes::{area, batched_nms, clip_box, iou, nms};
    pub use crate::coder::BoxCoder;
    pub use crate::interfaces::*;
    pub use crate::matcher::{AnchorMatch, Matcher};
    pub use crate::overlay::*;
    pub use crate::postprocess::{postprocess, unletterbox, DetectionParams};
}
