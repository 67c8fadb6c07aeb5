//! Annotation CSV loading, validation, augmentation and Burn batching for pet-face
//! detection.
//!
//! - `annotations`: CSV parsing into grouped `ImageRecord`s and the `FaceDataset` split
//! - `validation`: per-breed summaries and pass/warn/fail checks
//! - `aug`: resize/flip/jitter pipeline with boxes kept in pixel space
//! - `batch`: parallel loading into padded Burn tensors

pub mod annotations;
pub mod aug;
pub mod batch;
pub mod types;
pub mod validation;

pub use annotations::{file_size_mib, load_csv, resolve_image_path, FaceDataset};
pub use aug::{AugmentConfig, Resized, TransformPipeline, TransformPipelineBuilder};
pub use batch::{assemble, BatchConfig, BatchIter, FaceBatch, SampleMeta};
pub use types::*;
pub use validation::{summarize_records, summarize_with_thresholds, validate_summary};
