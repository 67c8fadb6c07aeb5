use crate::labels::LabelMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Slack allowed when comparing box corners against the recorded image size.
const EDGE_TOLERANCE_PX: f32 = 1.0;

/// One line of the annotation CSV: a single face box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRow {
    pub filename: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default, rename = "class")]
    pub class_name: Option<String>,
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub labels: usize,
}

/// A face box in pixel coordinates of the original image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceBox {
    /// \[x0, y0, x1, y1\] in pixels.
    pub bbox_px: [f32; 4],
    pub label: usize,
}

impl FaceBox {
    pub fn area(&self) -> f32 {
        let [x0, y0, x1, y1] = self.bbox_px;
        (x1 - x0).max(0.0) * (y1 - y0).max(0.0)
    }
}

/// All boxes belonging to one image, grouped from consecutive or scattered CSV rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub image_id: u64,
    pub filename: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub boxes: Vec<FaceBox>,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("missing filename")]
    MissingFilename,
    #[error("box has non-finite or negative corner: {0:?}")]
    InvalidCorner([f32; 4]),
    #[error("box min >= max: {0:?}")]
    EmptyBox([f32; 4]),
    #[error("box {bbox:?} exceeds image size {width}x{height}")]
    OutOfBounds {
        bbox: [f32; 4],
        width: u32,
        height: u32,
    },
    #[error("label {label} out of range for {num_classes} classes")]
    LabelOutOfRange { label: usize, num_classes: usize },
    #[error("class name {name:?} does not match label {label} ({expected:?})")]
    ClassMismatch {
        name: String,
        label: usize,
        expected: String,
    },
}

impl AnnotationRow {
    pub fn bbox(&self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    pub fn validate(&self, labels: Option<&LabelMap>) -> Result<(), ValidationError> {
        if self.filename.trim().is_empty() {
            return Err(ValidationError::MissingFilename);
        }
        let b = self.bbox();
        if b.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(ValidationError::InvalidCorner(b));
        }
        if b[0] >= b[2] || b[1] >= b[3] {
            return Err(ValidationError::EmptyBox(b));
        }
        if let (Some(width), Some(height)) = (self.width, self.height) {
            if b[2] > width as f32 + EDGE_TOLERANCE_PX || b[3] > height as f32 + EDGE_TOLERANCE_PX
            {
                return Err(ValidationError::OutOfBounds {
                    bbox: b,
                    width,
                    height,
                });
            }
        }
        if let Some(map) = labels {
            let Some(expected) = map.name(self.labels) else {
                return Err(ValidationError::LabelOutOfRange {
                    label: self.labels,
                    num_classes: map.len(),
                });
            };
            if let Some(name) = &self.class_name {
                if map.id_of(name) != Some(self.labels) {
                    return Err(ValidationError::ClassMismatch {
                        name: name.clone(),
                        label: self.labels,
                        expected: expected.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn face_box(&self) -> FaceBox {
        FaceBox {
            bbox_px: self.bbox(),
            label: self.labels,
        }
    }
}

impl ImageRecord {
    pub fn labels(&self) -> impl Iterator<Item = usize> + '_ {
        self.boxes.iter().map(|b| b.label)
    }
}

/// Group validated rows by filename, preserving first-appearance order.
pub fn group_rows(rows: Vec<AnnotationRow>) -> Vec<ImageRecord> {
    let mut order: Vec<ImageRecord> = Vec::new();
    let mut index: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
    for row in rows {
        let face = row.face_box();
        match index.get(&row.filename) {
            Some(&i) => {
                let rec = &mut order[i];
                rec.width = rec.width.or(row.width);
                rec.height = rec.height.or(row.height);
                rec.boxes.push(face);
            }
            None => {
                index.insert(row.filename.clone(), order.len());
                order.push(ImageRecord {
                    image_id: order.len() as u64,
                    filename: row.filename,
                    width: row.width,
                    height: row.height,
                    boxes: vec![face],
                });
            }
        }
    }
    order
}
