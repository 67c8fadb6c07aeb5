use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// An RGB image handed to a detector.
#[derive(Debug, Clone)]
pub struct Frame {
    pub id: u64,
    pub image: image::RgbImage,
    /// Optional on-disk origin, for logging.
    pub path: Option<PathBuf>,
}

impl Frame {
    pub fn new(id: u64, image: image::RgbImage) -> Self {
        Self {
            id,
            image,
            path: None,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// One detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// \[x0, y0, x1, y1\] in pixels of the frame.
    pub bbox_px: [f32; 4],
    pub score: f32,
    pub label: usize,
    /// Breed name when a label map is known.
    pub label_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionResult {
    pub frame_id: u64,
    /// Sorted by descending score.
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn empty(frame_id: u64) -> Self {
        Self {
            frame_id,
            detections: Vec::new(),
        }
    }
}

/// Runs inference on a frame.
pub trait Detector {
    fn detect(&mut self, frame: &Frame) -> DetectionResult;
    /// Optional: adjust thresholds at runtime.
    fn set_thresholds(&mut self, _score: f32, _iou: f32) {}
}
