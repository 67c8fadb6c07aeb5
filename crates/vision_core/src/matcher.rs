use crate::boxes::iou;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorMatch {
    Foreground(usize),
    Background,
    /// IoU between the background and foreground thresholds; excluded from the loss.
    Ignore,
}

/// IoU-threshold anchor assignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matcher {
    pub fg_iou: f32,
    pub bg_iou: f32,
    /// Promote each ground truth's best anchors to foreground even below `fg_iou`.
    pub allow_low_quality: bool,
}

impl Default for Matcher {
    fn default() -> Self {
        Self {
            fg_iou: 0.5,
            bg_iou: 0.4,
            allow_low_quality: true,
        }
    }
}

impl Matcher {
    pub fn assign(&self, anchors: &[[f32; 4]], gts: &[[f32; 4]]) -> Vec<AnchorMatch> {
        if gts.is_empty() {
            return vec![AnchorMatch::Background; anchors.len()];
        }

        let mut best_gt = vec![(0usize, -1.0f32); anchors.len()];
        let mut best_for_gt = vec![0.0f32; gts.len()];
        for (a, anchor) in anchors.iter().enumerate() {
            for (g, gt) in gts.iter().enumerate() {
                let v = iou(*anchor, *gt);
                if v > best_gt[a].1 {
                    best_gt[a] = (g, v);
                }
                if v > best_for_gt[g] {
                    best_for_gt[g] = v;
                }
            }
        }

        let mut out: Vec<AnchorMatch> = best_gt
            .iter()
            .map(|&(g, v)| {
                if v >= self.fg_iou {
                    AnchorMatch::Foreground(g)
                } else if v < self.bg_iou {
                    AnchorMatch::Background
                } else {
                    AnchorMatch::Ignore
                }
            })
            .collect();

        if self.allow_low_quality {
            for (a, anchor) in anchors.iter().enumerate() {
                if matches!(out[a], AnchorMatch::Foreground(_)) {
                    continue;
                }
                for (g, gt) in gts.iter().enumerate() {
                    if best_for_gt[g] > 0.0 && iou(*anchor, *gt) == best_for_gt[g] {
                        // Keep the anchor's own best gt, as the reference matcher does.
                        out[a] = AnchorMatch::Foreground(best_gt[a].0);
                        break;
                    }
                }
            }
        }
        out
    }
}
