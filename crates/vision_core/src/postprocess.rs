//! Dense head outputs -> final detections.

use crate::boxes::{batched_nms, clip_box};
use crate::coder::BoxCoder;
use crate::interfaces::Detection;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    pub score_thresh: f32,
    pub nms_thresh: f32,
    /// Candidates kept per pyramid level before NMS.
    pub topk_candidates: usize,
    pub detections_per_img: usize,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            score_thresh: 0.05,
            nms_thresh: 0.5,
            topk_candidates: 1000,
            detections_per_img: 100,
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Decode one image's head outputs.
///
/// `cls_logits` is `[N, num_classes]` and `deltas` is `[N, 4]`, both row-major and
/// ordered exactly like the concatenation of `anchors_per_level`.
pub fn postprocess(
    cls_logits: &[f32],
    deltas: &[f32],
    anchors_per_level: &[Vec<[f32; 4]>],
    num_classes: usize,
    image_size: (u32, u32),
    coder: &BoxCoder,
    params: &DetectionParams,
) -> Vec<Detection> {
    let mut boxes = Vec::new();
    let mut scores = Vec::new();
    let mut labels = Vec::new();

    let mut offset = 0usize;
    for anchors in anchors_per_level {
        let n = anchors.len();
        let level_logits = &cls_logits[offset * num_classes..(offset + n) * num_classes];

        let mut candidates: Vec<(usize, f32)> = level_logits
            .iter()
            .enumerate()
            .filter_map(|(i, &logit)| {
                let s = sigmoid(logit);
                (s > params.score_thresh).then_some((i, s))
            })
            .collect();
        candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        candidates.truncate(params.topk_candidates);

        for (flat, score) in candidates {
            let anchor_idx = flat / num_classes;
            let label = flat % num_classes;
            let d = (offset + anchor_idx) * 4;
            let delta = [deltas[d], deltas[d + 1], deltas[d + 2], deltas[d + 3]];
            let b = clip_box(coder.decode(anchors[anchor_idx], delta), image_size);
            boxes.push(b);
            scores.push(score);
            labels.push(label);
        }
        offset += n;
    }

    let mut keep = batched_nms(&boxes, &scores, &labels, params.nms_thresh);
    debug!(candidates = boxes.len(), kept = keep.len(), "postprocess nms");
    keep.truncate(params.detections_per_img);
    keep.into_iter()
        .map(|i| Detection {
            bbox_px: boxes[i],
            score: scores[i],
            label: labels[i],
            label_name: None,
        })
        .collect()
}

/// Map boxes from the network input back to the original image.
/// `scale` and `pad` describe the resize applied on the way in.
pub fn unletterbox(dets: &mut [Detection], scale: (f32, f32), pad: (f32, f32), orig: (u32, u32)) {
    for det in dets.iter_mut() {
        let b = det.bbox_px;
        det.bbox_px = clip_box(
            [
                (b[0] - pad.0) / scale.0,
                (b[1] - pad.1) / scale.1,
                (b[2] - pad.0) / scale.0,
                (b[3] - pad.1) / scale.1,
            ],
            orig,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confident_anchor_survives_and_decodes_in_place() {
        let anchors = vec![vec![[0.0, 0.0, 10.0, 10.0], [20.0, 20.0, 40.0, 40.0]]];
        // two classes per anchor
        let logits = [-10.0, -10.0, -10.0, 4.0];
        let deltas = [0.0; 8];
        let dets = postprocess(
            &logits,
            &deltas,
            &anchors,
            2,
            (64, 64),
            &BoxCoder::default(),
            &DetectionParams::default(),
        );
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].label, 1);
        assert_eq!(dets[0].bbox_px, [20.0, 20.0, 40.0, 40.0]);
        assert!(dets[0].score > 0.98);
    }

    #[test]
    fn boxes_are_clipped_and_capped() {
        let anchors = vec![vec![[-5.0, -5.0, 70.0, 70.0]; 4]];
        let logits = [3.0, 2.0, 1.0, 0.5];
        let params = DetectionParams {
            nms_thresh: 1.0,
            detections_per_img: 2,
            ..Default::default()
        };
        let dets = postprocess(
            &logits,
            &[0.0; 16],
            &anchors,
            1,
            (64, 64),
            &BoxCoder::default(),
            &params,
        );
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].bbox_px, [0.0, 0.0, 64.0, 64.0]);
        assert!(dets[0].score >= dets[1].score);
    }

    #[test]
    fn unletterbox_restores_original_coordinates() {
        let mut dets = vec![Detection {
            bbox_px: [16.0, 32.0, 48.0, 64.0],
            score: 1.0,
            label: 0,
            label_name: None,
        }];
        unletterbox(&mut dets, (0.5, 0.5), (0.0, 16.0), (200, 200));
        assert_eq!(dets[0].bbox_px, [32.0, 32.0, 96.0, 96.0]);
    }
}
