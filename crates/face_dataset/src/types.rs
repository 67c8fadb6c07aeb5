//! Core types, error definitions, and data structures for face_dataset.

use data_contracts::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, FaceDatasetError>;

#[derive(Debug, Error)]
pub enum FaceDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv parse error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("invalid annotation at {path} row {row}: {source}")]
    Validation {
        path: PathBuf,
        /// 1-based data row, header excluded.
        row: usize,
        #[source]
        source: ValidationError,
    },
    #[error("image file missing: {path}")]
    MissingImage { path: PathBuf },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("{0}")]
    Other(String),
}

/// A transformed, network-ready image with its targets.
#[derive(Debug, Clone)]
pub struct DatasetSample {
    pub image_id: u64,
    /// Image in CHW layout, ImageNet-normalized.
    pub image_chw: Vec<f32>,
    pub width: u32,
    pub height: u32,
    /// Boxes in pixels of the transformed image.
    pub boxes: Vec<[f32; 4]>,
    pub labels: Vec<usize>,
    /// Size of the decoded source image.
    pub orig_size: (u32, u32),
    /// Per-axis factor from source to output pixels.
    pub scale: (f32, f32),
    /// Letterbox padding in output pixels (x, y).
    pub pad: (f32, f32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResizeMode {
    /// Stretch to fill the target dimensions.
    #[default]
    Force,
    /// Preserve aspect ratio; pad to target with zeros.
    Letterbox,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub source: PathBuf,
    pub images: usize,
    pub boxes: usize,
    pub empty_images: usize,
    pub missing_files: Vec<PathBuf>,
    pub per_breed: BTreeMap<String, usize>,
    pub per_species: BTreeMap<String, usize>,
}

impl DatasetSummary {
    pub fn missing(&self) -> usize {
        self.missing_files.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Warn,
    Fail,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Pass => "pass",
            ValidationOutcome::Warn => "warn",
            ValidationOutcome::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub max_missing: Option<usize>,
    pub max_empty: Option<usize>,
    pub max_missing_ratio: Option<f32>,
    pub max_empty_ratio: Option<f32>,
}

impl ValidationThresholds {
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok()?.parse().ok()
        }
        ValidationThresholds {
            max_missing: parse("PETFACE_DATASET_MAX_MISSING"),
            max_empty: parse("PETFACE_DATASET_MAX_EMPTY"),
            max_missing_ratio: parse("PETFACE_DATASET_MAX_MISSING_RATIO"),
            max_empty_ratio: parse("PETFACE_DATASET_MAX_EMPTY_RATIO"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub summary: DatasetSummary,
}
