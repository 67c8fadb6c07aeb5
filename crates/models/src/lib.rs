//! Burn RetinaNet for pet-face detection.
//!
//! - `backbone`: ResNet-style basic-block backbone with GroupNorm.
//! - `fpn`: P3..P7 feature pyramid.
//! - `head`: shared classification / box-regression towers.
//! - `retinanet`: the assembled model and its serializable config.
//! - `checkpoint`: weights + JSON metadata on disk.
//!
//! These are pure Burn Modules with no awareness of the Detector trait. The `inference`
//! crate wraps them into Detector implementations for runtime use.

pub mod backbone;
pub mod checkpoint;
pub mod fpn;
pub mod head;
pub mod retinanet;

pub use checkpoint::{load_checkpoint, load_meta, save_checkpoint, CheckpointError, CheckpointMeta};
pub use fpn::PYRAMID_LEVELS;
pub use retinanet::{RetinaNet, RetinaNetConfig, RetinaOutput};

pub mod prelude {
    pub use super::{CheckpointMeta, RetinaNet, RetinaNetConfig, RetinaOutput};
}
