use crate::InferenceBackend;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use data_contracts::LabelMap;
use face_dataset::{ResizeMode, TransformPipeline};
use models::{CheckpointError, RetinaNet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};
use vision_core::anchors::AnchorGenerator;
use vision_core::coder::BoxCoder;
use vision_core::interfaces::{Detection, DetectionResult, Detector, Frame};
use vision_core::postprocess::{postprocess, unletterbox, DetectionParams};

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("checkpoint {0} does not exist")]
    MissingWeights(String),
    #[error("failed to read model output: {0}")]
    Tensor(String),
    #[error("anchor grid has {anchors} anchors but the model predicts {predicted}")]
    AnchorMismatch { anchors: usize, predicted: usize },
    #[error("detector model lock poisoned")]
    Poisoned,
}

/// Score and NMS thresholds applied after the forward pass.
#[derive(Debug, Clone, Copy)]
pub struct InferenceThresholds {
    pub score_thresh: f32,
    pub iou_thresh: f32,
    pub detections_per_img: usize,
}

impl Default for InferenceThresholds {
    fn default() -> Self {
        Self {
            score_thresh: 0.5,
            iou_thresh: 0.2,
            detections_per_img: 100,
        }
    }
}

impl InferenceThresholds {
    pub fn new(score_thresh: f32, iou_thresh: f32) -> Self {
        Self {
            score_thresh,
            iou_thresh,
            ..Default::default()
        }
    }

    fn params(&self) -> DetectionParams {
        DetectionParams {
            score_thresh: self.score_thresh,
            nms_thresh: self.iou_thresh,
            detections_per_img: self.detections_per_img,
            ..Default::default()
        }
    }
}

/// Used when no checkpoint could be loaded; never reports a face.
struct EmptyDetector;

impl Detector for EmptyDetector {
    fn detect(&mut self, frame: &Frame) -> DetectionResult {
        DetectionResult::empty(frame.id)
    }
}

pub struct RetinaNetDetector {
    model: Arc<Mutex<RetinaNet<InferenceBackend>>>,
    pipeline: TransformPipeline,
    anchors: AnchorGenerator,
    coder: BoxCoder,
    params: DetectionParams,
    labels: LabelMap,
}

impl RetinaNetDetector {
    pub fn load(weights: &Path, thresh: InferenceThresholds) -> Result<Self, InferenceError> {
        if !weights.exists() {
            return Err(InferenceError::MissingWeights(weights.display().to_string()));
        }
        let device = <InferenceBackend as Backend>::Device::default();
        let (model, meta) = models::load_checkpoint::<InferenceBackend>(weights, &device)?;
        let mode = if meta.letterbox {
            ResizeMode::Letterbox
        } else {
            ResizeMode::Force
        };
        info!(
            "loaded {} (epoch {}, {} classes, input {}x{})",
            weights.display(),
            meta.epoch,
            meta.labels.len(),
            meta.input_size.0,
            meta.input_size.1
        );
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            pipeline: TransformPipeline::eval(meta.input_size, mode),
            anchors: AnchorGenerator::new(meta.model.anchors.clone()),
            coder: BoxCoder::default(),
            params: thresh.params(),
            labels: LabelMap::from_names(meta.labels),
        })
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    /// Detections in the frame's own pixel coordinates, highest score first.
    pub fn run(&self, frame: &Frame) -> Result<Vec<Detection>, InferenceError> {
        let (chw, resized) = self.pipeline.prepare(&frame.image);
        let (w, h) = self.pipeline.target_size;
        let device = <InferenceBackend as Backend>::Device::default();
        let input = Tensor::<InferenceBackend, 4>::from_data(
            TensorData::new(chw, [1, 3, h as usize, w as usize]),
            &device,
        );

        let model = self.model.lock().map_err(|_| InferenceError::Poisoned)?;
        let output = model.forward(input);
        let num_classes = model.num_classes();
        drop(model);
        let predicted = output.cls_logits.dims()[1];

        let logits = output
            .cls_logits
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| InferenceError::Tensor(format!("{e:?}")))?;
        let deltas = output
            .box_deltas
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| InferenceError::Tensor(format!("{e:?}")))?;
        let per_level = self.anchors.generate(&output.level_sizes);
        let anchors = per_level.iter().map(Vec::len).sum::<usize>();
        if anchors != predicted {
            return Err(InferenceError::AnchorMismatch { anchors, predicted });
        }

        let mut dets = postprocess(
            &logits,
            &deltas,
            &per_level,
            num_classes,
            (w, h),
            &self.coder,
            &self.params,
        );
        unletterbox(&mut dets, resized.scale, resized.pad, frame.size());
        for det in dets.iter_mut() {
            det.label_name = self.labels.name(det.label).map(str::to_string);
        }
        debug!(frame = frame.id, detections = dets.len(), "retinanet detect");
        Ok(dets)
    }
}

impl Detector for RetinaNetDetector {
    fn detect(&mut self, frame: &Frame) -> DetectionResult {
        match self.run(frame) {
            Ok(detections) => DetectionResult {
                frame_id: frame.id,
                detections,
            },
            Err(err) => {
                warn!("detection failed on frame {}: {err}", frame.id);
                DetectionResult::empty(frame.id)
            }
        }
    }

    fn set_thresholds(&mut self, score: f32, iou: f32) {
        self.params.score_thresh = score;
        self.params.nms_thresh = iou;
    }
}

/// Builds a checkpoint-backed detector, or an empty one when the weights are unusable.
pub struct InferenceFactory;

impl InferenceFactory {
    pub fn build(
        &self,
        thresh: InferenceThresholds,
        weights: Option<&Path>,
    ) -> Box<dyn Detector + Send + Sync> {
        if let Some(det) = self.try_load_retinanet(thresh, weights) {
            return Box::new(det);
        }
        warn!("InferenceFactory: no valid checkpoint provided; detector will report no faces");
        Box::new(EmptyDetector)
    }

    fn try_load_retinanet(
        &self,
        thresh: InferenceThresholds,
        weights: Option<&Path>,
    ) -> Option<RetinaNetDetector> {
        let path = weights?;
        match RetinaNetDetector::load(path, thresh) {
            Ok(det) => Some(det),
            Err(err) => {
                warn!("failed to load detector checkpoint {}: {err}", path.display());
                None
            }
        }
    }
}
