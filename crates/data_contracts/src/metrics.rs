use serde::{Deserialize, Serialize};
use std::fmt;

/// The twelve COCO bbox summary numbers. `-1.0` marks a bucket with no ground truth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CocoStats {
    pub ap: f32,
    pub ap50: f32,
    pub ap75: f32,
    pub ap_small: f32,
    pub ap_medium: f32,
    pub ap_large: f32,
    pub ar1: f32,
    pub ar10: f32,
    pub ar100: f32,
    pub ar_small: f32,
    pub ar_medium: f32,
    pub ar_large: f32,
}

impl Default for CocoStats {
    fn default() -> Self {
        Self::from_array([-1.0; 12])
    }
}

impl CocoStats {
    pub fn from_array(s: [f32; 12]) -> Self {
        Self {
            ap: s[0],
            ap50: s[1],
            ap75: s[2],
            ap_small: s[3],
            ap_medium: s[4],
            ap_large: s[5],
            ar1: s[6],
            ar10: s[7],
            ar100: s[8],
            ar_small: s[9],
            ar_medium: s[10],
            ar_large: s[11],
        }
    }

    pub fn to_array(&self) -> [f32; 12] {
        [
            self.ap,
            self.ap50,
            self.ap75,
            self.ap_small,
            self.ap_medium,
            self.ap_large,
            self.ar1,
            self.ar10,
            self.ar100,
            self.ar_small,
            self.ar_medium,
            self.ar_large,
        ]
    }
}

const REPORT_LINES: [(&str, &str, &str, u32); 12] = [
    ("Average Precision", "0.50:0.95", "all", 100),
    ("Average Precision", "0.50", "all", 100),
    ("Average Precision", "0.75", "all", 100),
    ("Average Precision", "0.50:0.95", "small", 100),
    ("Average Precision", "0.50:0.95", "medium", 100),
    ("Average Precision", "0.50:0.95", "large", 100),
    ("Average Recall", "0.50:0.95", "all", 1),
    ("Average Recall", "0.50:0.95", "all", 10),
    ("Average Recall", "0.50:0.95", "all", 100),
    ("Average Recall", "0.50:0.95", "small", 100),
    ("Average Recall", "0.50:0.95", "medium", 100),
    ("Average Recall", "0.50:0.95", "large", 100),
];

/// Renders the familiar pycocotools summary block.
impl fmt::Display for CocoStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for ((title, iou, area, max_dets), value) in REPORT_LINES.iter().zip(self.to_array()) {
            let kind = if title.starts_with("Average Precision") {
                "(AP)"
            } else {
                "(AR)"
            };
            writeln!(
                f,
                " {:<18} {} @[ IoU={:<9} | area={:>6} | maxDets={:>3} ] = {:.3}",
                title, kind, iou, area, max_dets, value
            )?;
        }
        Ok(())
    }
}
