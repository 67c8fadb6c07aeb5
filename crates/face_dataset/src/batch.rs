//! Batch iteration for training, validation and evaluation.

use crate::annotations::{load_image, FaceDataset};
use crate::aug::TransformPipeline;
use crate::types::{DatasetResult, DatasetSample, FaceDatasetError};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub shuffle: bool,
    /// Seed for reproducible shuffling.
    pub seed: Option<u64>,
    /// Drop the last partial batch (training stability for small batches).
    pub drop_last: bool,
    /// Skip images whose boxes were all dropped by the transforms.
    pub skip_empty: bool,
    /// Skip unreadable images with a warning instead of failing.
    pub permissive: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 4,
            shuffle: true,
            seed: None,
            drop_last: false,
            skip_empty: false,
            permissive: permissive_from_env().unwrap_or(false),
        }
    }
}

impl BatchConfig {
    pub fn eval(batch_size: usize) -> Self {
        Self {
            batch_size,
            shuffle: false,
            drop_last: false,
            ..Default::default()
        }
    }
}

fn permissive_from_env() -> Option<bool> {
    std::env::var("PETFACE_DATASET_PERMISSIVE")
        .ok()
        .map(|v| v.trim().to_ascii_lowercase())
        .map(|v| !(v == "0" || v == "false" || v == "off"))
}

/// Per-sample bookkeeping kept on the CPU next to the tensors.
#[derive(Debug, Clone)]
pub struct SampleMeta {
    pub image_id: u64,
    pub orig_size: (u32, u32),
    pub scale: (f32, f32),
    pub pad: (f32, f32),
    /// Boxes in network-input pixels, unpadded.
    pub boxes: Vec<[f32; 4]>,
    pub labels: Vec<usize>,
}

impl SampleMeta {
    /// Map a box from network-input pixels back to the source image.
    pub fn to_original(&self, b: [f32; 4]) -> [f32; 4] {
        [
            (b[0] - self.pad.0) / self.scale.0,
            (b[1] - self.pad.1) / self.scale.1,
            (b[2] - self.pad.0) / self.scale.0,
            (b[3] - self.pad.1) / self.scale.1,
        ]
    }
}

pub struct FaceBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    /// Padded to `max_boxes`; see `box_mask`.
    pub boxes: Tensor<B, 3>,
    pub labels: Tensor<B, 2, Int>,
    pub box_mask: Tensor<B, 2>,
    pub image_ids: Tensor<B, 1, Int>,
    pub meta: Vec<SampleMeta>,
}

impl<B: Backend> FaceBatch<B> {
    pub fn len(&self) -> usize {
        self.meta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meta.is_empty()
    }
}

pub struct BatchIter {
    dataset: FaceDataset,
    pipeline: TransformPipeline,
    cfg: BatchConfig,
    order: Vec<usize>,
    cursor: usize,
    epoch: u64,
    rng: rand::rngs::StdRng,
    processed_samples: usize,
    processed_batches: usize,
    skipped_empty: usize,
    skipped_errors: usize,
    started: Instant,
    total_load_time: Duration,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
}

impl BatchIter {
    pub fn new(dataset: FaceDataset, pipeline: TransformPipeline, cfg: BatchConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
        };
        let log_every_samples = match std::env::var("PETFACE_DATASET_LOG_EVERY") {
            Ok(val) => {
                if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                    None
                } else {
                    val.parse::<usize>().ok().filter(|v| *v > 0)
                }
            }
            Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
        };
        let mut iter = Self {
            order: (0..dataset.len()).collect(),
            dataset,
            pipeline,
            cfg,
            cursor: 0,
            epoch: 0,
            rng,
            processed_samples: 0,
            processed_batches: 0,
            skipped_empty: 0,
            skipped_errors: 0,
            started: Instant::now(),
            total_load_time: Duration::ZERO,
            last_logged_samples: 0,
            log_every_samples,
        };
        if iter.cfg.shuffle {
            iter.order.shuffle(&mut iter.rng);
        }
        iter
    }

    pub fn dataset(&self) -> &FaceDataset {
        &self.dataset
    }

    pub fn pipeline(&self) -> &TransformPipeline {
        &self.pipeline
    }

    pub fn batch_size(&self) -> usize {
        self.cfg.batch_size.max(1)
    }

    /// Batches per epoch, ignoring skipped samples.
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        let bs = self.batch_size();
        if self.cfg.drop_last {
            n / bs
        } else {
            n.div_ceil(bs)
        }
    }

    pub fn skipped(&self) -> usize {
        self.skipped_empty + self.skipped_errors
    }

    /// Rewind for the next epoch, reshuffling when configured.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.epoch += 1;
        if self.cfg.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    fn load_sample(&self, idx: usize) -> DatasetResult<DatasetSample> {
        let record = &self.dataset.records()[idx];
        let path = self.dataset.image_path(record);
        let img = load_image(&path)?;
        Ok(self.pipeline.apply(img, record, self.epoch))
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<FaceBatch<B>>> {
        let batch_size = self.batch_size();
        let max_boxes = self.pipeline.max_boxes;
        loop {
            if self.cursor >= self.order.len() {
                return Ok(None);
            }
            let end = (self.cursor + batch_size).min(self.order.len());
            let slice = self.order[self.cursor..end].to_vec();
            self.cursor = end;

            let t_load = Instant::now();
            let loaded: Vec<(usize, DatasetResult<DatasetSample>)> = slice
                .par_iter()
                .map(|&idx| (idx, self.load_sample(idx)))
                .collect();
            self.total_load_time += t_load.elapsed();

            let mut samples = Vec::with_capacity(loaded.len());
            for (idx, res) in loaded {
                let sample = match res {
                    Ok(s) => s,
                    Err(e) if self.cfg.permissive => {
                        warn!(
                            "skipping {}: {e}",
                            self.dataset.records()[idx].filename
                        );
                        self.skipped_errors += 1;
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                if self.cfg.skip_empty && sample.boxes.is_empty() {
                    debug!(image_id = sample.image_id, "no boxes after transforms, skipping");
                    self.skipped_empty += 1;
                    continue;
                }
                samples.push(sample);
            }

            if samples.is_empty() {
                continue;
            }
            if self.cfg.drop_last && samples.len() < batch_size {
                if self.cursor >= self.order.len() {
                    return Ok(None);
                }
                continue;
            }

            let batch = assemble::<B>(samples, max_boxes, device)?;
            self.processed_samples += batch.len();
            self.processed_batches += 1;
            self.maybe_log_progress();
            return Ok(Some(batch));
        }
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.log_every_samples else {
            return;
        };
        if self.processed_samples.saturating_sub(self.last_logged_samples) < threshold {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let avg_load_ms = if self.processed_batches > 0 {
            (self.total_load_time.as_secs_f64() * 1000.0) / self.processed_batches as f64
        } else {
            0.0
        };
        debug!(
            batches = self.processed_batches,
            samples = self.processed_samples,
            skipped_empty = self.skipped_empty,
            skipped_errors = self.skipped_errors,
            rate = self.processed_samples as f32 / secs,
            avg_load_ms,
            "dataset progress"
        );
        self.last_logged_samples = self.processed_samples;
    }
}

/// Stack samples into padded tensors. All samples must share one size.
pub fn assemble<B: Backend>(
    samples: Vec<DatasetSample>,
    max_boxes: usize,
    device: &B::Device,
) -> DatasetResult<FaceBatch<B>> {
    let Some(first) = samples.first() else {
        return Err(FaceDatasetError::Other("cannot assemble an empty batch".into()));
    };
    let (width, height) = (first.width, first.height);
    let n = samples.len();

    let mut images = Vec::with_capacity(n * 3 * (width * height) as usize);
    let mut boxes = vec![0.0f32; n * max_boxes * 4];
    let mut labels = vec![0i64; n * max_boxes];
    let mut mask = vec![0.0f32; n * max_boxes];
    let mut ids = Vec::with_capacity(n);
    let mut meta = Vec::with_capacity(n);

    for (s_idx, sample) in samples.into_iter().enumerate() {
        if (sample.width, sample.height) != (width, height) {
            return Err(FaceDatasetError::Other(
                "batch contains varying image sizes; set a target_size to force consistency"
                    .to_string(),
            ));
        }
        images.extend_from_slice(&sample.image_chw);
        for (i, (b, &l)) in sample
            .boxes
            .iter()
            .zip(&sample.labels)
            .take(max_boxes)
            .enumerate()
        {
            let slot = s_idx * max_boxes + i;
            boxes[slot * 4..slot * 4 + 4].copy_from_slice(b);
            labels[slot] = l as i64;
            mask[slot] = 1.0;
        }
        ids.push(sample.image_id as i64);
        meta.push(SampleMeta {
            image_id: sample.image_id,
            orig_size: sample.orig_size,
            scale: sample.scale,
            pad: sample.pad,
            boxes: sample.boxes,
            labels: sample.labels,
        });
    }

    Ok(FaceBatch {
        images: Tensor::<B, 1>::from_floats(images.as_slice(), device).reshape([
            n,
            3,
            height as usize,
            width as usize,
        ]),
        boxes: Tensor::<B, 1>::from_floats(boxes.as_slice(), device).reshape([n, max_boxes, 4]),
        labels: Tensor::from_data(TensorData::new(labels, [n, max_boxes]), device),
        box_mask: Tensor::<B, 1>::from_floats(mask.as_slice(), device).reshape([n, max_boxes]),
        image_ids: Tensor::from_data(TensorData::new(ids, [n]), device),
        meta,
    })
}
