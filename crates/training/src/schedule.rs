//! Learning-rate schedules.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Constant,
    /// Multiply by `gamma` every `step_size` units.
    Step,
    /// Cosine decay from the base rate to `min_lr`.
    Cosine,
    /// Linear warm-up for `warmup_iters` units, then cosine decay.
    WarmupCosine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interval {
    Step,
    Epoch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub kind: ScheduleKind,
    pub interval: Interval,
    pub step_size: usize,
    pub gamma: f64,
    pub min_lr: f64,
    pub warmup_iters: usize,
    /// LR multiplier at the first warm-up unit.
    pub warmup_factor: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kind: ScheduleKind::WarmupCosine,
            interval: Interval::Step,
            step_size: 10,
            gamma: 0.1,
            min_lr: 0.0,
            warmup_iters: 500,
            warmup_factor: 0.001,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LrSchedule {
    cfg: SchedulerConfig,
    base_lr: f64,
    /// Length of the schedule in `interval` units.
    total: usize,
}

impl LrSchedule {
    pub fn new(cfg: SchedulerConfig, base_lr: f64, total: usize) -> Self {
        Self {
            cfg,
            base_lr,
            total: total.max(1),
        }
    }

    pub fn name(&self) -> &'static str {
        match self.cfg.kind {
            ScheduleKind::Constant => "ConstantLR",
            ScheduleKind::Step => "StepLR",
            ScheduleKind::Cosine => "CosineAnnealingLR",
            ScheduleKind::WarmupCosine => "WarmupCosineLR",
        }
    }

    pub fn interval(&self) -> Interval {
        self.cfg.interval
    }

    fn cosine(&self, progress: f64) -> f64 {
        let p = progress.clamp(0.0, 1.0);
        self.cfg.min_lr + 0.5 * (self.base_lr - self.cfg.min_lr) * (1.0 + (PI * p).cos())
    }

    /// Rate for the `unit`-th step or epoch, 0-based.
    pub fn lr_at(&self, unit: usize) -> f64 {
        match self.cfg.kind {
            ScheduleKind::Constant => self.base_lr,
            ScheduleKind::Step => {
                let k = unit / self.cfg.step_size.max(1);
                self.base_lr * self.cfg.gamma.powi(k as i32)
            }
            ScheduleKind::Cosine => self.cosine(unit as f64 / self.total as f64),
            ScheduleKind::WarmupCosine => {
                let warmup = self.cfg.warmup_iters.min(self.total);
                if unit < warmup {
                    let alpha = unit as f64 / warmup as f64;
                    let factor = self.cfg.warmup_factor * (1.0 - alpha) + alpha;
                    self.base_lr * factor
                } else {
                    let span = (self.total - warmup).max(1) as f64;
                    self.cosine((unit - warmup) as f64 / span)
                }
            }
        }
    }
}
