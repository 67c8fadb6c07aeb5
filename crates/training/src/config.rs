//! TOML training configuration.

use crate::early_stopping::EarlyStoppingConfig;
use crate::loss::LossConfig;
use crate::schedule::SchedulerConfig;
use data_contracts::LabelMap;
use face_dataset::AugmentConfig;
use models::RetinaNetConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "configs/petface.toml";
pub const CONFIG_ENV: &str = "PETFACE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub train_csv: PathBuf,
    pub valid_csv: PathBuf,
    pub test_csv: PathBuf,
    /// Directory that CSV filenames are relative to.
    pub image_root: PathBuf,
    /// Class names in id order; the Oxford-IIIT breeds when absent.
    pub labels: Option<Vec<String>>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            train_csv: PathBuf::from("data/train.csv"),
            valid_csv: PathBuf::from("data/valid.csv"),
            test_csv: PathBuf::from("data/test.csv"),
            image_root: PathBuf::from("data/images"),
            labels: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Sgd,
    Adam,
}

impl OptimizerKind {
    pub fn name(&self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "SGD",
            OptimizerKind::Adam => "Adam",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub lr: f64,
    /// SGD only.
    pub momentum: f64,
    pub nesterov: bool,
    pub weight_decay: f32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Sgd,
            lr: 0.01,
            momentum: 0.9,
            nesterov: false,
            weight_decay: 1e-4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Validation batch size; `batch_size` when absent.
    pub valid_batch_size: Option<usize>,
    /// Test-split evaluation batch size; `batch_size` when absent.
    pub test_batch_size: Option<usize>,
    /// Optimizer steps between progress logs.
    pub log_every: usize,
    pub checkpoint_dir: PathBuf,
    /// One JSON line per epoch.
    pub metrics_log: PathBuf,
    pub seed: Option<u64>,
    pub drop_last: bool,
    /// Worker threads for image loading; rayon's default when absent.
    pub num_workers: Option<usize>,
    /// Evaluate the best checkpoint on the test split after training.
    pub evaluate_test: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 4,
            valid_batch_size: None,
            test_batch_size: None,
            log_every: 50,
            checkpoint_dir: PathBuf::from("checkpoints"),
            metrics_log: PathBuf::from("logs/metrics.jsonl"),
            seed: Some(42),
            drop_last: true,
            num_workers: None,
            evaluate_test: true,
        }
    }
}

impl TrainerConfig {
    pub fn valid_batch_size(&self) -> usize {
        self.valid_batch_size.unwrap_or(self.batch_size)
    }

    pub fn test_batch_size(&self) -> usize {
        self.test_batch_size.unwrap_or(self.batch_size)
    }
}

/// Thresholds for the `detect` binary and the exported detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub score_thresh: f32,
    pub iou_thresh: f32,
    pub detections_per_img: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            score_thresh: 0.5,
            iou_thresh: 0.2,
            detections_per_img: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub data: DataConfig,
    pub model: RetinaNetConfig,
    pub optimizer: OptimizerConfig,
    pub scheduler: SchedulerConfig,
    pub trainer: TrainerConfig,
    pub loss: LossConfig,
    pub early_stopping: EarlyStoppingConfig,
    pub augment: AugmentConfig,
    pub inference: InferenceConfig,
}

impl TrainConfig {
    /// An explicit `path` wins over `PETFACE_CONFIG`; a missing default file falls back
    /// to built-in defaults. The result is not validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, std::env::var(CONFIG_ENV).ok().as_deref())
    }

    fn load_with_env(path: Option<&Path>, env_path: Option<&str>) -> Result<Self, ConfigError> {
        match path.or(env_path.map(Path::new)) {
            Some(p) => Self::from_path(p),
            None => {
                let default = Path::new(DEFAULT_CONFIG_PATH);
                if default.exists() {
                    Self::from_path(default)
                } else {
                    warn!("no config at {DEFAULT_CONFIG_PATH}; using built-in defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if let Some(dir) = path.parent() {
            cfg.resolve_paths(dir);
        }
        Ok(cfg)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Rebase relative paths onto `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        rebase(&mut self.data.train_csv);
        rebase(&mut self.data.valid_csv);
        rebase(&mut self.data.test_csv);
        rebase(&mut self.data.image_root);
        rebase(&mut self.trainer.checkpoint_dir);
        rebase(&mut self.trainer.metrics_log);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trainer.epochs == 0 {
            return Err(ConfigError::Invalid("trainer.epochs must be > 0".into()));
        }
        if self.trainer.batch_size == 0
            || self.trainer.valid_batch_size() == 0
            || self.trainer.test_batch_size() == 0
        {
            return Err(ConfigError::Invalid("trainer batch sizes must be > 0".into()));
        }
        if self.model.num_classes == 0 {
            return Err(ConfigError::Invalid("model.num_classes must be > 0".into()));
        }
        let (w, h) = self.augment.target_size;
        if w == 0 || h == 0 {
            return Err(ConfigError::Invalid("augment.target_size must be non-zero".into()));
        }
        let labels = self.label_map();
        if labels.len() != self.model.num_classes {
            return Err(ConfigError::Invalid(format!(
                "model.num_classes = {} but the label map has {} names",
                self.model.num_classes,
                labels.len()
            )));
        }
        if !(0.0..1.0).contains(&self.model.prior_prob) || self.model.prior_prob == 0.0 {
            return Err(ConfigError::Invalid("model.prior_prob must be in (0, 1)".into()));
        }
        self.validate_anchors()?;
        if !(0.0..=1.0).contains(&self.loss.bg_iou) || !(0.0..=1.0).contains(&self.loss.fg_iou) {
            return Err(ConfigError::Invalid("loss.fg_iou and loss.bg_iou must be in [0, 1]".into()));
        }
        if self.loss.bg_iou > self.loss.fg_iou {
            return Err(ConfigError::Invalid(format!(
                "loss.bg_iou ({}) must not exceed loss.fg_iou ({})",
                self.loss.bg_iou, self.loss.fg_iou
            )));
        }
        Ok(())
    }

    /// The pyramid is fixed at P3..P7, so the anchor levels must match it exactly.
    fn validate_anchors(&self) -> Result<(), ConfigError> {
        let anchors = &self.model.anchors;
        if anchors.levels != models::PYRAMID_LEVELS {
            return Err(ConfigError::Invalid(format!(
                "model.anchors.levels must be {:?} to match the feature pyramid, got {:?}",
                models::PYRAMID_LEVELS,
                anchors.levels
            )));
        }
        if anchors.scales.is_empty() || anchors.aspect_ratios.is_empty() {
            return Err(ConfigError::Invalid(
                "model.anchors.scales and model.anchors.aspect_ratios must be non-empty".into(),
            ));
        }
        let positive = |v: f32| v.is_finite() && v > 0.0;
        if !positive(anchors.base_size)
            || !anchors.scales.iter().copied().all(positive)
            || !anchors.aspect_ratios.iter().copied().all(positive)
        {
            return Err(ConfigError::Invalid(
                "model.anchors sizes, scales and aspect ratios must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn label_map(&self) -> LabelMap {
        match &self.data.labels {
            Some(names) => LabelMap::from_names(names.iter().cloned()),
            None => LabelMap::oxford_pets(),
        }
    }
}
