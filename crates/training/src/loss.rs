//! Focal classification loss and smooth-L1 box regression over the anchor grid.

use burn::tensor::{backend::Backend, ElementConversion, Tensor};
use face_dataset::SampleMeta;
use models::RetinaOutput;
use serde::{Deserialize, Serialize};
use vision_core::coder::BoxCoder;
use vision_core::matcher::{AnchorMatch, Matcher};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub focal_alpha: f32,
    pub focal_gamma: f32,
    /// 0 selects plain L1.
    pub smooth_l1_beta: f32,
    pub cls_weight: f32,
    pub box_weight: f32,
    pub fg_iou: f32,
    pub bg_iou: f32,
    pub allow_low_quality: bool,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            focal_alpha: 0.25,
            focal_gamma: 2.0,
            smooth_l1_beta: 0.0,
            cls_weight: 1.0,
            box_weight: 1.0,
            fg_iou: 0.5,
            bg_iou: 0.4,
            allow_low_quality: true,
        }
    }
}

impl LossConfig {
    pub fn matcher(&self) -> Matcher {
        Matcher {
            fg_iou: self.fg_iou,
            bg_iou: self.bg_iou,
            allow_low_quality: self.allow_low_quality,
        }
    }
}

/// Dense per-anchor targets for a batch, flattened row-major.
#[derive(Debug, Clone)]
pub struct AnchorTargets {
    pub batch: usize,
    pub num_anchors: usize,
    pub num_classes: usize,
    /// [B, N, C] one-hot; all zero for background.
    pub cls_target: Vec<f32>,
    /// [B, N]; 0 for ignored anchors.
    pub cls_valid: Vec<f32>,
    /// [B, N, 4] encoded deltas, zero off the foreground.
    pub box_target: Vec<f32>,
    /// [B, N]
    pub fg_mask: Vec<f32>,
    pub num_foreground: usize,
}

/// Match every image's boxes against the shared anchor set on the CPU.
pub fn build_targets(
    anchors: &[[f32; 4]],
    meta: &[SampleMeta],
    num_classes: usize,
    matcher: &Matcher,
    coder: &BoxCoder,
) -> AnchorTargets {
    let n = anchors.len();
    let b = meta.len();
    let mut t = AnchorTargets {
        batch: b,
        num_anchors: n,
        num_classes,
        cls_target: vec![0.0; b * n * num_classes],
        cls_valid: vec![1.0; b * n],
        box_target: vec![0.0; b * n * 4],
        fg_mask: vec![0.0; b * n],
        num_foreground: 0,
    };
    for (bi, sample) in meta.iter().enumerate() {
        let matches = matcher.assign(anchors, &sample.boxes);
        for (ai, m) in matches.into_iter().enumerate() {
            let row = bi * n + ai;
            match m {
                AnchorMatch::Foreground(g) => {
                    let label = sample.labels[g];
                    if label < num_classes {
                        t.cls_target[row * num_classes + label] = 1.0;
                    }
                    t.box_target[row * 4..row * 4 + 4]
                        .copy_from_slice(&coder.encode(anchors[ai], sample.boxes[g]));
                    t.fg_mask[row] = 1.0;
                    t.num_foreground += 1;
                }
                AnchorMatch::Ignore => t.cls_valid[row] = 0.0,
                AnchorMatch::Background => {}
            }
        }
    }
    t
}

#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
    pub classification: Tensor<B, 1>,
    pub regression: Tensor<B, 1>,
    pub total: Tensor<B, 1>,
}

/// Detached scalar values of a [`LossOutput`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossValues {
    pub classification: f32,
    pub regression: f32,
    pub total: f32,
}

impl<B: Backend> LossOutput<B> {
    pub fn values(&self) -> LossValues {
        LossValues {
            classification: scalar(self.classification.clone()),
            regression: scalar(self.regression.clone()),
            total: scalar(self.total.clone()),
        }
    }
}

pub fn scalar<B: Backend>(t: Tensor<B, 1>) -> f32 {
    t.into_scalar().elem::<f32>()
}

/// Sigmoid focal loss summed over non-ignored anchors.
pub fn sigmoid_focal_loss<B: Backend>(
    logits: Tensor<B, 3>,
    targets: Tensor<B, 3>,
    valid: Tensor<B, 3>,
    alpha: f32,
    gamma: f32,
) -> Tensor<B, 1> {
    let p = burn::tensor::activation::sigmoid(logits.clone());
    // Numerically stable BCE-with-logits: max(x, 0) - x*t + ln(1 + e^-|x|).
    let ce = logits.clone().clamp_min(0.0) - logits.clone() * targets.clone()
        + logits.abs().neg().exp().add_scalar(1.0).log();
    let one_minus_t = targets.clone().neg().add_scalar(1.0);
    let p_t = p.clone() * targets.clone() + p.neg().add_scalar(1.0) * one_minus_t.clone();
    let modulator = p_t.neg().add_scalar(1.0).powf_scalar(gamma);
    let alpha_t = targets * alpha + one_minus_t * (1.0 - alpha);
    (ce * modulator * alpha_t * valid).sum()
}

/// Smooth-L1 summed over masked rows; `beta == 0` is L1.
pub fn smooth_l1_loss<B: Backend>(
    pred: Tensor<B, 3>,
    target: Tensor<B, 3>,
    mask: Tensor<B, 3>,
    beta: f32,
) -> Tensor<B, 1> {
    let diff = (pred - target).abs();
    let per_elem = if beta < 1e-5 {
        diff
    } else {
        let quad = diff.clone().powf_scalar(2.0) * (0.5 / beta);
        let lin = diff.clone().sub_scalar(0.5 * beta);
        lin.mask_where(diff.lower_elem(beta), quad)
    };
    (per_elem * mask).sum()
}

pub fn retina_loss<B: Backend>(
    output: &RetinaOutput<B>,
    targets: &AnchorTargets,
    cfg: &LossConfig,
) -> LossOutput<B> {
    let device = output.cls_logits.device();
    let (b, n, c) = (targets.batch, targets.num_anchors, targets.num_classes);
    let cls_target =
        Tensor::<B, 1>::from_floats(targets.cls_target.as_slice(), &device).reshape([b, n, c]);
    let cls_valid =
        Tensor::<B, 1>::from_floats(targets.cls_valid.as_slice(), &device).reshape([b, n, 1]);
    let box_target =
        Tensor::<B, 1>::from_floats(targets.box_target.as_slice(), &device).reshape([b, n, 4]);
    let fg_mask =
        Tensor::<B, 1>::from_floats(targets.fg_mask.as_slice(), &device).reshape([b, n, 1]);

    let norm = targets.num_foreground.max(1) as f32;
    let classification = sigmoid_focal_loss(
        output.cls_logits.clone(),
        cls_target,
        cls_valid,
        cfg.focal_alpha,
        cfg.focal_gamma,
    ) / norm;
    let regression = smooth_l1_loss(
        output.box_deltas.clone(),
        box_target,
        fg_mask,
        cfg.smooth_l1_beta,
    ) / norm;
    let total = classification.clone() * cfg.cls_weight + regression.clone() * cfg.box_weight;
    LossOutput {
        classification,
        regression,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type B = NdArray<f32>;

    fn t3(values: &[f32], shape: [usize; 3]) -> Tensor<B, 3> {
        Tensor::<B, 1>::from_floats(values, &Default::default()).reshape(shape)
    }

    #[test]
    fn focal_matches_closed_form() {
        // logit 0 -> p = 0.5 for a positive: ce = ln 2, (1 - p_t)^2 = 0.25, alpha = 0.25.
        let loss = sigmoid_focal_loss(
            t3(&[0.0], [1, 1, 1]),
            t3(&[1.0], [1, 1, 1]),
            t3(&[1.0], [1, 1, 1]),
            0.25,
            2.0,
        );
        let expected = 2f32.ln() * 0.25 * 0.25;
        assert!((scalar(loss) - expected).abs() < 1e-5);
    }

    #[test]
    fn ignored_anchors_do_not_contribute() {
        let loss = sigmoid_focal_loss(
            t3(&[3.0, -3.0], [1, 2, 1]),
            t3(&[0.0, 0.0], [1, 2, 1]),
            t3(&[0.0, 1.0], [1, 2, 1]),
            0.25,
            2.0,
        );
        let only_second = sigmoid_focal_loss(
            t3(&[-3.0], [1, 1, 1]),
            t3(&[0.0], [1, 1, 1]),
            t3(&[1.0], [1, 1, 1]),
            0.25,
            2.0,
        );
        assert!((scalar(loss) - scalar(only_second)).abs() < 1e-6);
    }

    #[test]
    fn smooth_l1_switches_at_beta() {
        let pred = t3(&[0.5, 3.0], [1, 1, 2]);
        let target = t3(&[0.0, 0.0], [1, 1, 2]);
        let mask = t3(&[1.0], [1, 1, 1]);
        let l1 = scalar(smooth_l1_loss(pred.clone(), target.clone(), mask.clone(), 0.0));
        assert!((l1 - 3.5).abs() < 1e-6);
        let smooth = scalar(smooth_l1_loss(pred, target, mask, 1.0));
        assert!((smooth - (0.125 + 2.5)).abs() < 1e-6);
    }

    #[test]
    fn targets_mark_foreground_and_ignore() {
        let anchors = [
            [0.0, 0.0, 10.0, 10.0],
            [0.0, 0.0, 10.0, 4.5],
            [50.0, 50.0, 60.0, 60.0],
        ];
        let meta = vec![SampleMeta {
            image_id: 0,
            orig_size: (64, 64),
            scale: (1.0, 1.0),
            pad: (0.0, 0.0),
            boxes: vec![[0.0, 0.0, 10.0, 10.0]],
            labels: vec![2],
        }];
        let matcher = Matcher {
            allow_low_quality: false,
            ..Default::default()
        };
        let t = build_targets(&anchors, &meta, 3, &matcher, &BoxCoder::default());
        assert_eq!(t.num_foreground, 1);
        assert_eq!(t.fg_mask, vec![1.0, 0.0, 0.0]);
        assert_eq!(t.cls_valid, vec![1.0, 0.0, 1.0]);
        assert_eq!(&t.cls_target[0..3], &[0.0, 0.0, 1.0]);
        assert!(t.box_target[0..4].iter().all(|v| v.abs() < 1e-6));
    }
}
