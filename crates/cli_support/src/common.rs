use clap::Args;
use std::path::PathBuf;

/// Detection thresholds shared by inference tools.
#[derive(Debug, Clone, Copy, Args)]
pub struct ThresholdArgs {
    /// Minimum class score to keep a box.
    #[arg(long, default_value_t = 0.5)]
    pub score_thresh: f32,
    /// IoU above which overlapping boxes are suppressed.
    #[arg(long, default_value_t = 0.2)]
    pub iou_thresh: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdOpts {
    pub score_thresh: f32,
    pub iou_thresh: f32,
}

impl ThresholdOpts {
    pub fn new(score_thresh: f32, iou_thresh: f32) -> Self {
        Self {
            score_thresh,
            iou_thresh,
        }
    }
}

impl From<&ThresholdArgs> for ThresholdOpts {
    fn from(args: &ThresholdArgs) -> Self {
        ThresholdOpts::new(args.score_thresh, args.iou_thresh)
    }
}

/// Optional detector weights path.
#[derive(Debug, Clone, Args)]
pub struct WeightsArgs {
    /// RetinaNet checkpoint (.bin with a .json sidecar).
    #[arg(long)]
    pub weights: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct WeightsOpts {
    pub detector_weights: Option<PathBuf>,
}

impl WeightsOpts {
    pub fn new(detector_weights: Option<PathBuf>) -> Self {
        Self { detector_weights }
    }
}

impl From<&WeightsArgs> for WeightsOpts {
    fn from(args: &WeightsArgs) -> Self {
        WeightsOpts::new(args.weights.clone())
    }
}
