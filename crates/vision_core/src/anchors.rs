//! Dense anchor grid for the P3..P7 feature pyramid.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorConfig {
    /// Pyramid levels; level `l` has stride `2^l`.
    pub levels: Vec<u32>,
    /// Anchor side length at the first level; doubles with each level.
    pub base_size: f32,
    pub scales: Vec<f32>,
    /// Height / width ratios.
    pub aspect_ratios: Vec<f32>,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            levels: vec![3, 4, 5, 6, 7],
            base_size: 32.0,
            scales: vec![1.0, 2f32.powf(1.0 / 3.0), 2f32.powf(2.0 / 3.0)],
            aspect_ratios: vec![0.5, 1.0, 2.0],
        }
    }
}

impl AnchorConfig {
    pub fn anchors_per_location(&self) -> usize {
        self.scales.len() * self.aspect_ratios.len()
    }
}

#[derive(Debug, Clone)]
pub struct AnchorGenerator {
    cfg: AnchorConfig,
    /// Centered (w, h) templates per level, ordered ratio-major then scale.
    templates: Vec<Vec<(f32, f32)>>,
}

impl AnchorGenerator {
    pub fn new(cfg: AnchorConfig) -> Self {
        let templates = cfg
            .levels
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let size = cfg.base_size * 2f32.powi(i as i32);
                let mut tpl = Vec::with_capacity(cfg.anchors_per_location());
                for &ratio in &cfg.aspect_ratios {
                    let r = ratio.sqrt();
                    for &scale in &cfg.scales {
                        let s = size * scale;
                        tpl.push((s / r, s * r));
                    }
                }
                tpl
            })
            .collect();
        Self { cfg, templates }
    }

    pub fn config(&self) -> &AnchorConfig {
        &self.cfg
    }

    pub fn strides(&self) -> Vec<u32> {
        self.cfg.levels.iter().map(|l| 1u32 << l).collect()
    }

    /// Anchors for each level's feature size `(h, w)`, flattened in
    /// (level, y, x, template) order. Returns one Vec per level.
    pub fn generate(&self, level_sizes: &[(usize, usize)]) -> Vec<Vec<[f32; 4]>> {
        level_sizes
            .iter()
            .zip(self.strides())
            .zip(&self.templates)
            .map(|((&(h, w), stride), tpl)| {
                let stride = stride as f32;
                let mut out = Vec::with_capacity(h * w * tpl.len());
                for y in 0..h {
                    let cy = (y as f32 + 0.5) * stride;
                    for x in 0..w {
                        let cx = (x as f32 + 0.5) * stride;
                        for &(aw, ah) in tpl {
                            out.push([cx - aw / 2.0, cy - ah / 2.0, cx + aw / 2.0, cy + ah / 2.0]);
                        }
                    }
                }
                out
            })
            .collect()
    }

    pub fn generate_flat(&self, level_sizes: &[(usize, usize)]) -> Vec<[f32; 4]> {
        self.generate(level_sizes).into_iter().flatten().collect()
    }

    /// Feature sizes the pyramid produces for an input of `(h, w)` with
    /// stride-2 padded convolutions.
    pub fn level_sizes_for_input(&self, input: (usize, usize)) -> Vec<(usize, usize)> {
        self.strides()
            .into_iter()
            .map(|s| {
                let s = s as usize;
                (input.0.div_ceil(s), input.1.div_ceil(s))
            })
            .collect()
    }
}

impl Default for AnchorGenerator {
    fn default() -> Self {
        Self::new(AnchorConfig::default())
    }
}
