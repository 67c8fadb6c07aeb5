#![recursion_limit = "256"]

pub mod coco;
pub mod config;
pub mod early_stopping;
pub mod eval;
pub mod loss;
pub mod schedule;
pub mod util;

pub use coco::{CocoAccumulation, CocoEvaluator};
pub use config::{ConfigError, TrainConfig};
pub use early_stopping::{EarlyStopping, EarlyStoppingConfig};
pub use eval::{evaluate, evaluate_checkpoint, AnchorCache};
pub use loss::{build_targets, retina_loss, AnchorTargets, LossConfig, LossOutput, LossValues};
pub use schedule::{LrSchedule, SchedulerConfig};
pub use util::{run_train, train_with_config, TrainArgs, TrainSummary};
/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
