use std::f64::consts::PI;

/// Cosine annealing from `base_lr` to `min_lr` over `total_steps`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CosineAnnealing {
    base_lr: f64,
    min_lr: f64,
    total_steps: usize,
}

impl CosineAnnealing {
    pub fn new(base_lr: f64, total_steps: usize) -> Self {
        Self {
            base_lr,
            min_lr: 0.0,
            total_steps: total_steps.max(1),
        }
    }

    pub fn with_min_lr(mut self, min_lr: f64) -> Self {
        self.min_lr = min_lr;
        self
    }

    /// Learning rate after `step` optimizer steps.
    pub fn lr_at(&self, step: usize) -> f64 {
        let progress = step.min(self.total_steps) as f64 / self.total_steps as f64;
        self.min_lr + (self.base_lr - self.min_lr) * (1.0 + (PI * progress).cos()) / 2.0
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }
}
