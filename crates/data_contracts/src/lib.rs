//! Shared data contracts: annotation rows, grouped image records, breed labels and
//! evaluation summaries.

pub mod annotation;
pub mod labels;
pub mod metrics;

pub use annotation::{group_rows, AnnotationRow, FaceBox, ImageRecord, ValidationError};
pub use labels::{LabelMap, Species, OXFORD_PET_BREEDS};
pub use metrics::CocoStats;
