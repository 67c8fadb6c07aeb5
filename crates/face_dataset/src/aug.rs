//! Image augmentation and transformation pipeline. Boxes stay in pixel coordinates
//! of the current image at every stage.

use crate::types::{DatasetSample, ResizeMode};
use data_contracts::ImageRecord;
use image::imageops::FilterType;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::max;

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Boxes narrower or shorter than this after transforms are dropped.
const MIN_BOX_SIDE_PX: f32 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    /// Network input (width, height).
    pub target_size: (u32, u32),
    pub resize_mode: ResizeMode,
    pub flip_horizontal_prob: f32,
    /// Probability of a light brightness/contrast jitter.
    pub color_jitter_prob: f32,
    pub color_jitter_strength: f32,
    /// Probability of zooming in/out around the center.
    pub scale_jitter_prob: f32,
    pub scale_jitter_min: f32,
    pub scale_jitter_max: f32,
    pub noise_prob: f32,
    /// Max absolute noise added (0-1 range).
    pub noise_strength: f32,
    pub blur_prob: f32,
    pub blur_sigma: f32,
    /// Cap on boxes per image; extras are dropped.
    pub max_boxes: usize,
    pub seed: Option<u64>,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            target_size: (512, 512),
            resize_mode: ResizeMode::Force,
            flip_horizontal_prob: 0.5,
            color_jitter_prob: 0.3,
            color_jitter_strength: 0.2,
            scale_jitter_prob: 0.0,
            scale_jitter_min: 0.8,
            scale_jitter_max: 1.2,
            noise_prob: 0.0,
            noise_strength: 0.02,
            blur_prob: 0.0,
            blur_sigma: 1.0,
            max_boxes: 16,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    pub target_size: (u32, u32),
    pub resize_mode: ResizeMode,
    pub flip_horizontal_prob: f32,
    pub color_jitter_prob: f32,
    pub color_jitter_strength: f32,
    pub scale_jitter_prob: f32,
    pub scale_jitter_min: f32,
    pub scale_jitter_max: f32,
    pub noise_prob: f32,
    pub noise_strength: f32,
    pub blur_prob: f32,
    pub blur_sigma: f32,
    pub max_boxes: usize,
    pub seed: Option<u64>,
}

/// Result of resizing an image onto the network canvas.
#[derive(Debug, Clone)]
pub struct Resized {
    pub image: image::RgbImage,
    pub scale: (f32, f32),
    pub pad: (f32, f32),
}

impl TransformPipeline {
    pub fn from_config(cfg: &AugmentConfig) -> Self {
        Self {
            target_size: cfg.target_size,
            resize_mode: cfg.resize_mode,
            flip_horizontal_prob: cfg.flip_horizontal_prob,
            color_jitter_prob: cfg.color_jitter_prob,
            color_jitter_strength: cfg.color_jitter_strength,
            scale_jitter_prob: cfg.scale_jitter_prob,
            scale_jitter_min: cfg.scale_jitter_min,
            scale_jitter_max: cfg.scale_jitter_max,
            noise_prob: cfg.noise_prob,
            noise_strength: cfg.noise_strength,
            blur_prob: cfg.blur_prob,
            blur_sigma: cfg.blur_sigma,
            max_boxes: cfg.max_boxes,
            seed: cfg.seed,
        }
    }

    /// Resize + normalize only; used for validation, test and inference.
    pub fn eval(target_size: (u32, u32), resize_mode: ResizeMode) -> Self {
        TransformPipelineBuilder::new()
            .target_size(target_size)
            .resize_mode(resize_mode)
            .flip_horizontal_prob(0.0)
            .color_jitter(0.0, 0.0)
            .scale_jitter(0.0, 1.0, 1.0)
            .noise(0.0, 0.0)
            .blur(0.0, 0.0)
            .build()
    }

    /// Same geometry as `self` with every random augmentation disabled.
    pub fn without_augmentation(&self) -> Self {
        Self {
            max_boxes: self.max_boxes,
            seed: self.seed,
            ..Self::eval(self.target_size, self.resize_mode)
        }
    }

    /// Human-readable list of the enabled stages, in application order.
    pub fn augmentations(&self) -> Vec<String> {
        let (w, h) = self.target_size;
        let mut out = vec![format!("Resize({:?}, {w}x{h})", self.resize_mode)];
        if self.flip_horizontal_prob > 0.0 {
            out.push(format!("HorizontalFlip(p={:.2})", self.flip_horizontal_prob));
        }
        if self.color_jitter_prob > 0.0 && self.color_jitter_strength > 0.0 {
            out.push(format!(
                "ColorJitter(p={:.2}, strength={:.2})",
                self.color_jitter_prob, self.color_jitter_strength
            ));
        }
        if self.scale_jitter_prob > 0.0 {
            out.push(format!(
                "ScaleJitter(p={:.2}, range=[{:.2},{:.2}])",
                self.scale_jitter_prob, self.scale_jitter_min, self.scale_jitter_max
            ));
        }
        if self.noise_prob > 0.0 && self.noise_strength > 0.0 {
            out.push(format!(
                "Noise(p={:.2}, strength={:.3})",
                self.noise_prob, self.noise_strength
            ));
        }
        if self.blur_prob > 0.0 && self.blur_sigma > 0.0 {
            out.push(format!(
                "Blur(p={:.2}, sigma={:.2})",
                self.blur_prob, self.blur_sigma
            ));
        }
        out.push("Normalize(imagenet)".to_string());
        out
    }

    pub fn describe(&self) -> String {
        format!(
            "{} max_boxes={} seed={}",
            self.augmentations().join(" -> "),
            self.max_boxes,
            self.seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }

    pub fn resize(&self, img: &image::RgbImage) -> Resized {
        let (w, h) = self.target_size;
        let (ow, oh) = img.dimensions();
        match self.resize_mode {
            ResizeMode::Force => Resized {
                image: image::imageops::resize(img, w, h, FilterType::Triangle),
                scale: (w as f32 / ow as f32, h as f32 / oh as f32),
                pad: (0.0, 0.0),
            },
            ResizeMode::Letterbox => {
                let (image, scale, pad_w, pad_h) = letterbox_resize(img, w, h);
                Resized {
                    image,
                    scale: (scale, scale),
                    pad: (pad_w as f32, pad_h as f32),
                }
            }
        }
    }

    /// Deterministic resize + normalization for a frame without targets.
    pub fn prepare(&self, img: &image::RgbImage) -> (Vec<f32>, Resized) {
        let resized = self.resize(img);
        (to_normalized_chw(&resized.image), resized)
    }

    /// Transform one annotated image. `salt` varies the seeded augmentation stream
    /// (the batch iterator passes the epoch).
    pub fn apply(&self, img: image::RgbImage, record: &ImageRecord, salt: u64) -> DatasetSample {
        let mut rng_local;
        let mut seeded_rng;
        let rng: &mut dyn rand::RngCore = if let Some(seed) = self.seed {
            let mixed = seed ^ record.image_id.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ salt;
            seeded_rng = rand::rngs::StdRng::seed_from_u64(mixed);
            &mut seeded_rng
        } else {
            rng_local = rand::rng();
            &mut rng_local
        };

        let orig_size = img.dimensions();
        let Resized {
            image: mut canvas,
            scale,
            pad,
        } = self.resize(&img);
        let mut boxes: Vec<[f32; 4]> = record
            .boxes
            .iter()
            .map(|b| {
                let p = b.bbox_px;
                [
                    p[0] * scale.0 + pad.0,
                    p[1] * scale.1 + pad.1,
                    p[2] * scale.0 + pad.0,
                    p[3] * scale.1 + pad.1,
                ]
            })
            .collect();
        let mut labels: Vec<usize> = record.labels().collect();

        maybe_hflip(&mut canvas, &mut boxes, self.flip_horizontal_prob, rng);
        maybe_jitter(
            &mut canvas,
            self.color_jitter_prob,
            self.color_jitter_strength,
            rng,
        );
        maybe_scale_jitter(
            &mut canvas,
            &mut boxes,
            self.scale_jitter_prob,
            self.scale_jitter_min,
            self.scale_jitter_max,
            rng,
        );
        maybe_noise(&mut canvas, self.noise_prob, self.noise_strength, rng);
        maybe_blur(&mut canvas, self.blur_prob, self.blur_sigma, rng);

        let (w, h) = canvas.dimensions();
        clip_and_drop_degenerate(&mut boxes, &mut labels, (w, h));
        boxes.truncate(self.max_boxes);
        labels.truncate(self.max_boxes);

        DatasetSample {
            image_id: record.image_id,
            image_chw: to_normalized_chw(&canvas),
            width: w,
            height: h,
            boxes,
            labels,
            orig_size,
            scale,
            pad,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipelineBuilder {
    inner: TransformPipeline,
}

impl Default for TransformPipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self {
            inner: TransformPipeline::from_config(&AugmentConfig::default()),
        }
    }
    pub fn target_size(mut self, size: (u32, u32)) -> Self {
        self.inner.target_size = size;
        self
    }
    pub fn resize_mode(mut self, mode: ResizeMode) -> Self {
        self.inner.resize_mode = mode;
        self
    }
    pub fn flip_horizontal_prob(mut self, p: f32) -> Self {
        self.inner.flip_horizontal_prob = p;
        self
    }
    pub fn color_jitter(mut self, prob: f32, strength: f32) -> Self {
        self.inner.color_jitter_prob = prob;
        self.inner.color_jitter_strength = strength;
        self
    }
    pub fn scale_jitter(mut self, prob: f32, min: f32, max: f32) -> Self {
        self.inner.scale_jitter_prob = prob;
        self.inner.scale_jitter_min = min;
        self.inner.scale_jitter_max = max;
        self
    }
    pub fn noise(mut self, prob: f32, strength: f32) -> Self {
        self.inner.noise_prob = prob;
        self.inner.noise_strength = strength;
        self
    }
    pub fn blur(mut self, prob: f32, sigma: f32) -> Self {
        self.inner.blur_prob = prob;
        self.inner.blur_sigma = sigma;
        self
    }
    pub fn max_boxes(mut self, max_boxes: usize) -> Self {
        self.inner.max_boxes = max_boxes;
        self
    }
    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.inner.seed = seed;
        self
    }
    pub fn build(self) -> TransformPipeline {
        self.inner
    }
}

/// HWC u8 -> CHW f32 with ImageNet mean/std.
pub fn to_normalized_chw(img: &image::RgbImage) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * width + x) as usize;
        for c in 0..3 {
            chw[c * plane + base] = (pixel[c] as f32 / 255.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c];
        }
    }
    chw
}

fn letterbox_resize(
    img: &image::RgbImage,
    target_w: u32,
    target_h: u32,
) -> (image::RgbImage, f32, u32, u32) {
    let (w, h) = img.dimensions();
    let scale = f32::min(target_w as f32 / w as f32, target_h as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, target_w);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, target_h);
    let resized = image::imageops::resize(img, new_w, new_h, FilterType::Triangle);

    let pad_w = (target_w - new_w) / 2;
    let pad_h = (target_h - new_h) / 2;

    let mut canvas = image::RgbImage::new(target_w, target_h);
    image::imageops::replace(&mut canvas, &resized, pad_w.into(), pad_h.into());

    (canvas, scale, pad_w, pad_h)
}

fn clip_and_drop_degenerate(boxes: &mut Vec<[f32; 4]>, labels: &mut Vec<usize>, dims: (u32, u32)) {
    let (w, h) = (dims.0 as f32, dims.1 as f32);
    let mut kept_boxes = Vec::with_capacity(boxes.len());
    let mut kept_labels = Vec::with_capacity(labels.len());
    for (b, &l) in boxes.iter().zip(labels.iter()) {
        let c = [
            b[0].clamp(0.0, w),
            b[1].clamp(0.0, h),
            b[2].clamp(0.0, w),
            b[3].clamp(0.0, h),
        ];
        if c[2] - c[0] >= MIN_BOX_SIDE_PX && c[3] - c[1] >= MIN_BOX_SIDE_PX {
            kept_boxes.push(c);
            kept_labels.push(l);
        }
    }
    *boxes = kept_boxes;
    *labels = kept_labels;
}

pub(crate) fn maybe_hflip(
    img: &mut image::RgbImage,
    boxes: &mut [[f32; 4]],
    prob: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) < prob {
        image::imageops::flip_horizontal_in_place(img);
        let w = img.width() as f32;
        for b in boxes.iter_mut() {
            let x0 = b[0];
            let x1 = b[2];
            b[0] = w - x1;
            b[2] = w - x0;
        }
    }
}

pub(crate) fn maybe_jitter(
    img: &mut image::RgbImage,
    prob: f32,
    strength: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let bright = 1.0 + rng.random_range(-strength..strength);
    let contrast = 1.0 + rng.random_range(-strength..strength);
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            let mut v = (v - 0.5) * contrast + 0.5;
            v *= bright;
            pixel[c] = (v.clamp(0.0, 1.0) * 255.0) as u8;
        }
    }
}

pub(crate) fn maybe_noise(
    img: &mut image::RgbImage,
    prob: f32,
    strength: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 || strength <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    for pixel in img.pixels_mut() {
        for c in 0..3 {
            let noise = rng.random_range(-strength..strength);
            let v = (pixel[c] as f32 / 255.0 + noise).clamp(0.0, 1.0);
            pixel[c] = (v * 255.0) as u8;
        }
    }
}

pub(crate) fn maybe_scale_jitter(
    img: &mut image::RgbImage,
    boxes: &mut [[f32; 4]],
    prob: f32,
    min_scale: f32,
    max_scale: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 || min_scale <= 0.0 || max_scale <= min_scale {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    let scale = rng.random_range(min_scale..max_scale);
    let (w, h) = img.dimensions();
    let new_w = max(1, (w as f32 * scale).round() as u32);
    let new_h = max(1, (h as f32 * scale).round() as u32);

    let resized = image::imageops::resize(img, new_w, new_h, FilterType::Triangle);
    let mut canvas = image::RgbImage::new(w, h);

    // Offset of the resized image inside the canvas; negative when cropping.
    let off_x = (w as i64 - new_w as i64) / 2;
    let off_y = (h as i64 - new_h as i64) / 2;
    image::imageops::replace(&mut canvas, &resized, off_x, off_y);
    let sx = new_w as f32 / w as f32;
    let sy = new_h as f32 / h as f32;
    for b in boxes.iter_mut() {
        let px0 = (b[0] * sx + off_x as f32).clamp(0.0, w as f32);
        let py0 = (b[1] * sy + off_y as f32).clamp(0.0, h as f32);
        let px1 = (b[2] * sx + off_x as f32).clamp(px0, w as f32);
        let py1 = (b[3] * sy + off_y as f32).clamp(py0, h as f32);
        *b = [px0, py0, px1, py1];
    }

    *img = canvas;
}

pub(crate) fn maybe_blur(
    img: &mut image::RgbImage,
    prob: f32,
    sigma: f32,
    rng: &mut dyn rand::RngCore,
) {
    if prob <= 0.0 || sigma <= 0.0 {
        return;
    }
    if rng.random_range(0.0..1.0) >= prob {
        return;
    }
    *img = image::imageops::blur(img, sigma);
}

#[cfg(test)]
mod aug_tests {
    use super::*;
    use data_contracts::FaceBox;
    use rand::rng;

    fn record(boxes: &[[f32; 4]]) -> ImageRecord {
        ImageRecord {
            image_id: 3,
            filename: "a.jpg".into(),
            width: None,
            height: None,
            boxes: boxes
                .iter()
                .map(|&bbox_px| FaceBox { bbox_px, label: 1 })
                .collect(),
        }
    }

    #[test]
    fn hflip_boxes_mirror_in_pixels() {
        let mut img = image::RgbImage::new(100, 10);
        let mut boxes = vec![[10.0, 0.0, 30.0, 10.0]];
        let mut rng = rng();
        maybe_hflip(&mut img, &mut boxes, 1.0, &mut rng);
        assert_eq!(boxes[0], [70.0, 0.0, 90.0, 10.0]);
    }

    #[test]
    fn force_resize_scales_boxes_per_axis() {
        let pipeline = TransformPipeline::eval((50, 20), ResizeMode::Force);
        let img = image::RgbImage::new(100, 40);
        let s = pipeline.apply(img, &record(&[[10.0, 4.0, 60.0, 40.0]]), 0);
        assert_eq!((s.width, s.height), (50, 20));
        assert_eq!(s.scale, (0.5, 0.5));
        assert_eq!(s.boxes, vec![[5.0, 2.0, 30.0, 20.0]]);
        assert_eq!(s.labels, vec![1]);
        assert_eq!(s.image_chw.len(), 3 * 50 * 20);
    }

    #[test]
    fn letterbox_pads_short_axis() {
        let pipeline = TransformPipeline::eval((64, 64), ResizeMode::Letterbox);
        let img = image::RgbImage::new(128, 64);
        let s = pipeline.apply(img, &record(&[[0.0, 0.0, 128.0, 64.0]]), 0);
        assert_eq!(s.scale, (0.5, 0.5));
        assert_eq!(s.pad, (0.0, 16.0));
        assert_eq!(s.boxes, vec![[0.0, 16.0, 64.0, 48.0]]);
    }

    #[test]
    fn degenerate_boxes_are_dropped() {
        let pipeline = TransformPipeline::eval((10, 10), ResizeMode::Force);
        let img = image::RgbImage::new(100, 100);
        let s = pipeline.apply(
            img,
            &record(&[[0.0, 0.0, 5.0, 5.0], [0.0, 0.0, 50.0, 50.0]]),
            0,
        );
        assert_eq!(s.boxes, vec![[0.0, 0.0, 5.0, 5.0]]);
    }

    #[test]
    fn normalization_uses_imagenet_stats() {
        let img = image::RgbImage::from_pixel(1, 1, image::Rgb([255, 0, 0]));
        let chw = to_normalized_chw(&img);
        assert!((chw[0] - (1.0 - 0.485) / 0.229).abs() < 1e-5);
        assert!((chw[1] - (-0.456 / 0.224)).abs() < 1e-5);
    }
}
