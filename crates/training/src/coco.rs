//! COCO-style bbox evaluation (AP/AR over IoU 0.50:0.95, three area buckets and
//! 1/10/100 detections per image).

use data_contracts::{CocoStats, FaceBox};
use std::collections::{BTreeMap, BTreeSet};
use vision_core::interfaces::Detection;

const NUM_IOU_THRS: usize = 10;
const NUM_REC_THRS: usize = 101;
pub const MAX_DETS: [usize; 3] = [1, 10, 100];

/// (name, lo, hi) in squared pixels, inclusive.
pub const AREA_RANGES: [(&str, f64, f64); 4] = [
    ("all", 0.0, 1e10),
    ("small", 0.0, 32.0 * 32.0),
    ("medium", 32.0 * 32.0, 96.0 * 96.0),
    ("large", 96.0 * 96.0, 1e10),
];

pub fn iou_thresholds() -> [f64; NUM_IOU_THRS] {
    let step = (0.95 - 0.5) / (NUM_IOU_THRS - 1) as f64;
    std::array::from_fn(|i| 0.5 + i as f64 * step)
}

pub fn recall_thresholds() -> [f64; NUM_REC_THRS] {
    let step = 1.0 / (NUM_REC_THRS - 1) as f64;
    std::array::from_fn(|i| i as f64 * step)
}

fn box_area(b: [f32; 4]) -> f64 {
    ((b[2] - b[0]).max(0.0) as f64) * ((b[3] - b[1]).max(0.0) as f64)
}

fn iou(a: [f32; 4], b: [f32; 4]) -> f64 {
    let iw = (a[2].min(b[2]) as f64 - a[0].max(b[0]) as f64).max(0.0);
    let ih = (a[3].min(b[3]) as f64 - a[1].max(b[1]) as f64).max(0.0);
    let inter = iw * ih;
    let union = box_area(a) + box_area(b) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

#[derive(Debug, Clone, Default)]
struct ImageEntry {
    gts: Vec<([f32; 4], usize)>,
    dets: Vec<([f32; 4], f32, usize)>,
}

/// Matching outcome for one (image, category, area range).
#[derive(Debug, Clone)]
struct EvalImg {
    dt_scores: Vec<f32>,
    /// [T][D]
    dt_matched: Vec<Vec<bool>>,
    /// [T][D]
    dt_ignore: Vec<Vec<bool>>,
    gt_ignore: Vec<bool>,
}

fn stable_desc_by_score(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&i, &j| {
        scores[j]
            .partial_cmp(&scores[i])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

fn evaluate_img(
    gts: &[[f32; 4]],
    dets: &[([f32; 4], f32)],
    area: (f64, f64),
    max_det: usize,
    iou_thrs: &[f64],
) -> Option<EvalImg> {
    if gts.is_empty() && dets.is_empty() {
        return None;
    }
    let outside = |b: [f32; 4]| {
        let a = box_area(b);
        a < area.0 || a > area.1
    };

    // Non-ignored ground truth first, original order otherwise.
    let mut gt_order: Vec<usize> = (0..gts.len()).collect();
    gt_order.sort_by_key(|&g| outside(gts[g]));
    let gt_boxes: Vec<[f32; 4]> = gt_order.iter().map(|&g| gts[g]).collect();
    let gt_ignore: Vec<bool> = gt_boxes.iter().map(|&b| outside(b)).collect();

    let scores: Vec<f32> = dets.iter().map(|d| d.1).collect();
    let mut dt_order = stable_desc_by_score(&scores);
    dt_order.truncate(max_det);
    let dt_boxes: Vec<[f32; 4]> = dt_order.iter().map(|&d| dets[d].0).collect();
    let dt_scores: Vec<f32> = dt_order.iter().map(|&d| dets[d].1).collect();

    let ious: Vec<Vec<f64>> = dt_boxes
        .iter()
        .map(|&d| gt_boxes.iter().map(|&g| iou(d, g)).collect())
        .collect();

    let t_n = iou_thrs.len();
    let d_n = dt_boxes.len();
    let g_n = gt_boxes.len();
    let mut dt_matched = vec![vec![false; d_n]; t_n];
    let mut dt_ignore = vec![vec![false; d_n]; t_n];

    for (ti, &thr) in iou_thrs.iter().enumerate() {
        let mut gt_matched = vec![false; g_n];
        for d in 0..d_n {
            let mut best = thr.min(1.0 - 1e-10);
            let mut m: Option<usize> = None;
            for g in 0..g_n {
                if gt_matched[g] {
                    continue;
                }
                // Once matched to a real gt, ignored gts (sorted last) cannot win.
                if let Some(mi) = m {
                    if !gt_ignore[mi] && gt_ignore[g] {
                        break;
                    }
                }
                if ious[d][g] < best {
                    continue;
                }
                best = ious[d][g];
                m = Some(g);
            }
            if let Some(g) = m {
                dt_ignore[ti][d] = gt_ignore[g];
                dt_matched[ti][d] = true;
                gt_matched[g] = true;
            }
        }
        for d in 0..d_n {
            if !dt_matched[ti][d] && outside(dt_boxes[d]) {
                dt_ignore[ti][d] = true;
            }
        }
    }

    Some(EvalImg {
        dt_scores,
        dt_matched,
        dt_ignore,
        gt_ignore,
    })
}

/// Accumulated precision/recall tables.
#[derive(Debug, Clone)]
pub struct CocoAccumulation {
    pub num_categories: usize,
    /// [T, R, K, A, M], -1 where a category has no ground truth.
    pub precision: Vec<f64>,
    /// [T, K, A, M]
    pub recall: Vec<f64>,
}

impl CocoAccumulation {
    fn p_index(&self, t: usize, r: usize, k: usize, a: usize, m: usize) -> usize {
        let (kn, an, mn) = (self.num_categories, AREA_RANGES.len(), MAX_DETS.len());
        (((t * NUM_REC_THRS + r) * kn + k) * an + a) * mn + m
    }

    fn r_index(&self, t: usize, k: usize, a: usize, m: usize) -> usize {
        let (kn, an, mn) = (self.num_categories, AREA_RANGES.len(), MAX_DETS.len());
        ((t * kn + k) * an + a) * mn + m
    }

    fn mean_valid(values: impl Iterator<Item = f64>) -> f32 {
        let (sum, n) = values
            .filter(|v| *v > -1.0)
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        if n == 0 {
            -1.0
        } else {
            (sum / n as f64) as f32
        }
    }

    /// Mean precision; `iou` selects one threshold index or all of them.
    pub fn average_precision(&self, iou: Option<usize>, area: usize, max_det: usize) -> f32 {
        let ts: Vec<usize> = match iou {
            Some(t) => vec![t],
            None => (0..NUM_IOU_THRS).collect(),
        };
        let mut vals = Vec::new();
        for &t in &ts {
            for r in 0..NUM_REC_THRS {
                for k in 0..self.num_categories {
                    vals.push(self.precision[self.p_index(t, r, k, area, max_det)]);
                }
            }
        }
        Self::mean_valid(vals.into_iter())
    }

    pub fn average_recall(&self, area: usize, max_det: usize) -> f32 {
        let mut vals = Vec::new();
        for t in 0..NUM_IOU_THRS {
            for k in 0..self.num_categories {
                vals.push(self.recall[self.r_index(t, k, area, max_det)]);
            }
        }
        Self::mean_valid(vals.into_iter())
    }

    pub fn summarize(&self) -> CocoStats {
        let last = MAX_DETS.len() - 1;
        CocoStats::from_array([
            self.average_precision(None, 0, last),
            self.average_precision(Some(0), 0, last),
            self.average_precision(Some(5), 0, last),
            self.average_precision(None, 1, last),
            self.average_precision(None, 2, last),
            self.average_precision(None, 3, last),
            self.average_recall(0, 0),
            self.average_recall(0, 1),
            self.average_recall(0, 2),
            self.average_recall(1, last),
            self.average_recall(2, last),
            self.average_recall(3, last),
        ])
    }
}

/// Collects ground truth and detections per image and computes the COCO summary.
#[derive(Debug, Clone, Default)]
pub struct CocoEvaluator {
    images: BTreeMap<u64, ImageEntry>,
}

impl CocoEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one image. Calling again with the same id appends.
    pub fn update(&mut self, image_id: u64, gts: &[FaceBox], dets: &[Detection]) {
        let entry = self.images.entry(image_id).or_default();
        entry
            .gts
            .extend(gts.iter().map(|g| (g.bbox_px, g.label)));
        entry
            .dets
            .extend(dets.iter().map(|d| (d.bbox_px, d.score, d.label)));
    }

    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    /// Categories that appear in the ground truth, ascending.
    pub fn categories(&self) -> Vec<usize> {
        let set: BTreeSet<usize> = self
            .images
            .values()
            .flat_map(|e| e.gts.iter().map(|g| g.1))
            .collect();
        set.into_iter().collect()
    }

    pub fn accumulate(&self) -> CocoAccumulation {
        let iou_thrs = iou_thresholds();
        let rec_thrs = recall_thresholds();
        let cats = self.categories();
        let max_det_all = MAX_DETS[MAX_DETS.len() - 1];
        let (kn, an, mn) = (cats.len(), AREA_RANGES.len(), MAX_DETS.len());

        let mut acc = CocoAccumulation {
            num_categories: kn,
            precision: vec![-1.0; NUM_IOU_THRS * NUM_REC_THRS * kn * an * mn],
            recall: vec![-1.0; NUM_IOU_THRS * kn * an * mn],
        };

        for (k, &cat) in cats.iter().enumerate() {
            for (a, &(_, lo, hi)) in AREA_RANGES.iter().enumerate() {
                let evals: Vec<EvalImg> = self
                    .images
                    .values()
                    .filter_map(|e| {
                        let gts: Vec<[f32; 4]> =
                            e.gts.iter().filter(|g| g.1 == cat).map(|g| g.0).collect();
                        let dets: Vec<([f32; 4], f32)> = e
                            .dets
                            .iter()
                            .filter(|d| d.2 == cat)
                            .map(|d| (d.0, d.1))
                            .collect();
                        evaluate_img(&gts, &dets, (lo, hi), max_det_all, &iou_thrs)
                    })
                    .collect();
                if evals.is_empty() {
                    continue;
                }
                let npig = evals
                    .iter()
                    .flat_map(|e| e.gt_ignore.iter())
                    .filter(|ig| !**ig)
                    .count();
                if npig == 0 {
                    continue;
                }

                for (m, &max_det) in MAX_DETS.iter().enumerate() {
                    // Concatenate per-image prefixes, then a stable global score sort.
                    let mut scores = Vec::new();
                    let mut refs = Vec::new();
                    for (ei, e) in evals.iter().enumerate() {
                        let n = e.dt_scores.len().min(max_det);
                        for d in 0..n {
                            scores.push(e.dt_scores[d]);
                            refs.push((ei, d));
                        }
                    }
                    let order = stable_desc_by_score(&scores);

                    for t in 0..NUM_IOU_THRS {
                        let mut tp = 0.0f64;
                        let mut fp = 0.0f64;
                        let mut rc = Vec::with_capacity(order.len());
                        let mut pr = Vec::with_capacity(order.len());
                        for &o in &order {
                            let (ei, d) = refs[o];
                            let e = &evals[ei];
                            // Ignored detections still add a (flat) point to the curve.
                            if !e.dt_ignore[t][d] {
                                if e.dt_matched[t][d] {
                                    tp += 1.0;
                                } else {
                                    fp += 1.0;
                                }
                            }
                            rc.push(tp / npig as f64);
                            pr.push(tp / (tp + fp + f64::EPSILON));
                        }

                        let ri = acc.r_index(t, k, a, m);
                        acc.recall[ri] = rc.last().copied().unwrap_or(0.0);

                        for i in (1..pr.len()).rev() {
                            if pr[i] > pr[i - 1] {
                                pr[i - 1] = pr[i];
                            }
                        }
                        for (r, &thr) in rec_thrs.iter().enumerate() {
                            let pi = rc.partition_point(|&v| v < thr);
                            let q = pr.get(pi).copied().unwrap_or(0.0);
                            let idx = acc.p_index(t, r, k, a, m);
                            acc.precision[idx] = q;
                        }
                    }
                }
            }
        }
        acc
    }

    pub fn summarize(&self) -> CocoStats {
        self.accumulate().summarize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_match_reference_grid() {
        let t = iou_thresholds();
        assert!((t[0] - 0.5).abs() < 1e-12);
        assert!((t[5] - 0.75).abs() < 1e-12);
        assert!((t[9] - 0.95).abs() < 1e-12);
        let r = recall_thresholds();
        assert_eq!(r[0], 0.0);
        assert!((r[100] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn ignored_gt_is_not_matched_before_real_gt() {
        // Area range "small": the large gt is ignored and sorted last.
        let gts = [[0.0, 0.0, 200.0, 200.0], [0.0, 0.0, 20.0, 20.0]];
        let dets = [([0.0, 0.0, 20.0, 20.0], 0.9)];
        let e = evaluate_img(&gts, &dets, (0.0, 1024.0), 100, &[0.5]).expect("eval");
        assert_eq!(e.gt_ignore, vec![false, true]);
        assert!(e.dt_matched[0][0]);
        assert!(!e.dt_ignore[0][0]);
    }
}
