use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStoppingConfig {
    pub enabled: bool,
    /// Epochs without improvement before stopping.
    pub patience: usize,
    pub min_delta: f32,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            patience: 5,
            min_delta: 0.0,
        }
    }
}

/// Tracks a monitored loss (lower is better).
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f32,
    pub best_loss: f32,
    counter: usize,
    pub stopped: bool,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f32) -> Self {
        Self {
            patience,
            min_delta,
            best_loss: f32::INFINITY,
            counter: 0,
            stopped: false,
        }
    }

    pub fn from_config(cfg: &EarlyStoppingConfig) -> Option<Self> {
        cfg.enabled
            .then(|| Self::new(cfg.patience.max(1), cfg.min_delta))
    }

    pub fn should_stop(&mut self, current_loss: f32) -> bool {
        if self.stopped {
            return true;
        }
        if current_loss < self.best_loss - self.min_delta {
            self.best_loss = current_loss;
            self.counter = 0;
            false
        } else {
            self.counter += 1;
            if self.counter >= self.patience {
                self.stopped = true;
                info!(
                    "Early stopping triggered: no val_loss improvement for {} epochs",
                    self.patience
                );
                true
            } else {
                false
            }
        }
    }

    pub fn reset(&mut self) {
        self.best_loss = f32::INFINITY;
        self.counter = 0;
        self.stopped = false;
    }
}
