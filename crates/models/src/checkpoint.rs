//! Weights plus a JSON sidecar describing how to rebuild and feed the model.

use crate::retinanet::{RetinaNet, RetinaNetConfig};
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid checkpoint metadata at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to record weights at {path}: {source}")]
    Record {
        path: PathBuf,
        #[source]
        source: RecorderError,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub model: RetinaNetConfig,
    /// Network input (width, height).
    pub input_size: (u32, u32),
    /// Aspect-preserving resize with padding instead of stretching.
    pub letterbox: bool,
    /// Class names in id order.
    pub labels: Vec<String>,
    pub epoch: usize,
    pub val_loss: Option<f32>,
}

/// `<weights>.json` next to `<weights>.bin`.
pub fn meta_path(weights: &Path) -> PathBuf {
    weights.with_extension("json")
}

pub fn save_checkpoint<B: Backend>(
    model: &RetinaNet<B>,
    meta: &CheckpointMeta,
    weights: &Path,
) -> Result<(), CheckpointError> {
    if let Some(parent) = weights.parent() {
        std::fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(weights, &recorder)
        .map_err(|source| CheckpointError::Record {
            path: weights.to_path_buf(),
            source,
        })?;
    let meta_file = meta_path(weights);
    let json = serde_json::to_string_pretty(meta).map_err(|source| CheckpointError::Json {
        path: meta_file.clone(),
        source,
    })?;
    std::fs::write(&meta_file, json).map_err(|source| CheckpointError::Io {
        path: meta_file,
        source,
    })
}

pub fn load_meta(weights: &Path) -> Result<CheckpointMeta, CheckpointError> {
    let meta_file = meta_path(weights);
    let raw = std::fs::read_to_string(&meta_file).map_err(|source| CheckpointError::Io {
        path: meta_file.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CheckpointError::Json {
        path: meta_file,
        source,
    })
}

pub fn load_checkpoint<B: Backend>(
    weights: &Path,
    device: &B::Device,
) -> Result<(RetinaNet<B>, CheckpointMeta), CheckpointError> {
    let meta = load_meta(weights)?;
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model = meta
        .model
        .init::<B>(device)
        .load_file(weights, &recorder, device)
        .map_err(|source| CheckpointError::Record {
            path: weights.to_path_buf(),
            source,
        })?;
    Ok((model, meta))
}
