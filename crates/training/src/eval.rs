//! COCO evaluation of a RetinaNet over a dataset split.

use crate::coco::CocoEvaluator;
use crate::config::TrainConfig;
use crate::TrainBackend;
use anyhow::Context;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use data_contracts::{CocoStats, LabelMap};
use face_dataset::{BatchConfig, BatchIter, FaceDataset, ResizeMode, TransformPipeline};
use models::RetinaNet;
use std::path::Path;
use tracing::{debug, info};
use vision_core::anchors::{AnchorConfig, AnchorGenerator};
use vision_core::coder::BoxCoder;
use vision_core::postprocess::{postprocess, unletterbox, DetectionParams};

/// Anchors for the last seen feature-map geometry. Batches share one input size, so this
/// is regenerated only when the size changes.
#[derive(Debug, Clone)]
pub struct AnchorCache {
    generator: AnchorGenerator,
    level_sizes: Vec<(usize, usize)>,
    per_level: Vec<Vec<[f32; 4]>>,
    flat: Vec<[f32; 4]>,
}

impl AnchorCache {
    pub fn new(cfg: AnchorConfig) -> Self {
        Self {
            generator: AnchorGenerator::new(cfg),
            level_sizes: Vec::new(),
            per_level: Vec::new(),
            flat: Vec::new(),
        }
    }

    fn refresh(&mut self, level_sizes: &[(usize, usize)]) {
        if self.level_sizes != level_sizes {
            debug!(?level_sizes, "regenerating anchors");
            self.per_level = self.generator.generate(level_sizes);
            self.flat = self.per_level.iter().flatten().copied().collect();
            self.level_sizes = level_sizes.to_vec();
        }
    }

    pub fn flat(&mut self, level_sizes: &[(usize, usize)]) -> &[[f32; 4]] {
        self.refresh(level_sizes);
        &self.flat
    }

    pub fn per_level(&mut self, level_sizes: &[(usize, usize)]) -> &[Vec<[f32; 4]>] {
        self.refresh(level_sizes);
        &self.per_level
    }
}

/// Errors when the anchor grid and the head disagree on the number of anchors.
pub(crate) fn ensure_anchor_count(anchors: usize, predicted: usize) -> anyhow::Result<()> {
    if anchors != predicted {
        anyhow::bail!(
            "anchor configuration yields {anchors} anchors but the model predicts {predicted}; \
             check model.anchors"
        );
    }
    Ok(())
}

pub(crate) fn tensor_values<B: Backend, const D: usize>(t: Tensor<B, D>) -> anyhow::Result<Vec<f32>> {
    t.into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("failed to read tensor data: {e:?}"))
}

/// An evaluator holding the ground truth of every record, so images the iterator
/// skips still count as missed faces.
pub(crate) fn ground_truth_evaluator(dataset: &FaceDataset) -> CocoEvaluator {
    let mut evaluator = CocoEvaluator::new();
    for record in dataset.records() {
        evaluator.update(record.image_id, &record.boxes, &[]);
    }
    evaluator
}

/// Run the model over every batch of `iter` and score it against the split's
/// ground truth in original image pixels.
pub fn evaluate<B: Backend>(
    model: &RetinaNet<B>,
    anchors: &AnchorConfig,
    iter: &mut BatchIter,
    params: &DetectionParams,
    device: &B::Device,
) -> anyhow::Result<CocoStats> {
    let label_map = iter.dataset().label_map().clone();
    let num_classes = model.num_classes();
    let coder = BoxCoder::default();
    let mut cache = AnchorCache::new(anchors.clone());
    let mut evaluator = ground_truth_evaluator(iter.dataset());

    while let Some(batch) = iter.next_batch::<B>(device)? {
        let [_, _, height, width] = batch.images.dims();
        let output = model.forward(batch.images);
        let n = output.cls_logits.dims()[1];
        ensure_anchor_count(cache.flat(&output.level_sizes).len(), n)?;
        let logits = tensor_values(output.cls_logits)?;
        let deltas = tensor_values(output.box_deltas)?;
        let per_level = cache.per_level(&output.level_sizes);

        for (i, meta) in batch.meta.iter().enumerate() {
            let mut dets = postprocess(
                &logits[i * n * num_classes..(i + 1) * n * num_classes],
                &deltas[i * n * 4..(i + 1) * n * 4],
                per_level,
                num_classes,
                (width as u32, height as u32),
                &coder,
                params,
            );
            unletterbox(&mut dets, meta.scale, meta.pad, meta.orig_size);
            for det in dets.iter_mut() {
                det.label_name = label_map.name(det.label).map(str::to_string);
            }
            evaluator.update(meta.image_id, &[], &dets);
        }
    }
    info!(
        images = evaluator.num_images(),
        categories = evaluator.categories().len(),
        "accumulating COCO evaluation"
    );
    Ok(evaluator.summarize())
}

/// Load `weights` and evaluate it on `csv` using the config's data and inference sections.
pub fn evaluate_checkpoint(
    cfg: &TrainConfig,
    weights: &Path,
    csv: &Path,
) -> anyhow::Result<CocoStats> {
    let device = <TrainBackend as Backend>::Device::default();
    let (model, meta) = models::load_checkpoint::<TrainBackend>(weights, &device)
        .with_context(|| format!("loading checkpoint {}", weights.display()))?;
    let label_map = LabelMap::from_names(meta.labels.iter().cloned());
    let dataset = FaceDataset::load(csv, &cfg.data.image_root, label_map)
        .with_context(|| format!("loading {}", csv.display()))?;
    let mode = if meta.letterbox {
        ResizeMode::Letterbox
    } else {
        ResizeMode::Force
    };
    let pipeline = TransformPipeline::eval(meta.input_size, mode);
    let batches = BatchConfig::eval(cfg.trainer.test_batch_size());
    let mut iter = BatchIter::new(dataset, pipeline, batches);
    let params = DetectionParams {
        detections_per_img: cfg.inference.detections_per_img,
        ..Default::default()
    };
    evaluate(&model, &meta.model.anchors, &mut iter, &params, &device)
}
