//! Axis-aligned box helpers in xyxy pixel coordinates.

use std::cmp::Ordering;

pub fn area(b: [f32; 4]) -> f32 {
    (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0)
}

pub fn iou(a: [f32; 4], b: [f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    let union = area(a) + area(b) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Clamp a box to `[0, w] x [0, h]`.
pub fn clip_box(b: [f32; 4], dims: (u32, u32)) -> [f32; 4] {
    let (w, h) = (dims.0 as f32, dims.1 as f32);
    [
        b[0].clamp(0.0, w),
        b[1].clamp(0.0, h),
        b[2].clamp(0.0, w),
        b[3].clamp(0.0, h),
    ]
}

fn by_score_desc(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&i, &j| scores[j].partial_cmp(&scores[i]).unwrap_or(Ordering::Equal));
    order
}

/// Greedy non-maximum suppression. Returns kept indices in descending score order.
pub fn nms(boxes: &[[f32; 4]], scores: &[f32], iou_thresh: f32) -> Vec<usize> {
    let order = by_score_desc(scores);
    let mut suppressed = vec![false; boxes.len()];
    let mut keep = Vec::new();
    for (pos, &i) in order.iter().enumerate() {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for &j in &order[pos + 1..] {
            if !suppressed[j] && iou(boxes[i], boxes[j]) > iou_thresh {
                suppressed[j] = true;
            }
        }
    }
    keep
}

/// NMS applied independently per label; boxes of different labels never suppress
/// each other. Result is sorted by descending score.
pub fn batched_nms(
    boxes: &[[f32; 4]],
    scores: &[f32],
    labels: &[usize],
    iou_thresh: f32,
) -> Vec<usize> {
    let mut per_label: std::collections::BTreeMap<usize, Vec<usize>> = Default::default();
    for (i, &label) in labels.iter().enumerate() {
        per_label.entry(label).or_default().push(i);
    }
    let mut keep = Vec::new();
    for members in per_label.values() {
        let sub_boxes: Vec<[f32; 4]> = members.iter().map(|&i| boxes[i]).collect();
        let sub_scores: Vec<f32> = members.iter().map(|&i| scores[i]).collect();
        keep.extend(
            nms(&sub_boxes, &sub_scores, iou_thresh)
                .into_iter()
                .map(|k| members[k]),
        );
    }
    keep.sort_by(|&i, &j| scores[j].partial_cmp(&scores[i]).unwrap_or(Ordering::Equal));
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert!((iou(a, a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(a, [20.0, 20.0, 30.0, 30.0]), 0.0);
        assert!((iou(a, [5.0, 0.0, 15.0, 10.0]) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(iou([0.0, 0.0, 0.0, 0.0], [0.0, 0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn nms_keeps_highest_scoring_overlap() {
        let boxes = [
            [0.0, 0.0, 10.0, 10.0],
            [1.0, 1.0, 11.0, 11.0],
            [50.0, 50.0, 60.0, 60.0],
        ];
        let keep = nms(&boxes, &[0.6, 0.9, 0.5], 0.5);
        assert_eq!(keep, vec![1, 2]);
    }

    #[test]
    fn batched_nms_separates_labels() {
        let boxes = [[0.0, 0.0, 10.0, 10.0], [1.0, 1.0, 11.0, 11.0]];
        let keep = batched_nms(&boxes, &[0.6, 0.9], &[0, 1], 0.5);
        assert_eq!(keep, vec![1, 0]);
        let keep = batched_nms(&boxes, &[0.6, 0.9], &[2, 2], 0.5);
        assert_eq!(keep, vec![1]);
    }
}
