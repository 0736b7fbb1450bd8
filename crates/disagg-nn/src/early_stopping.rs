// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

/// Patience used when none is configured.
pub const DEFAULT_TOLERANCE: usize = 20;

/// Validation-loss tracker deciding when to checkpoint and when to stop.
///
/// A loss strictly above the best seen so far counts against the patience;
/// ties and improvements reset it and request a save. Once stopped, the
/// tracker stays stopped.
#[derive(Clone, Debug, PartialEq)]
pub struct EarlyStopping {
    tolerance: usize,
    loss_min: f32,
    counter: usize,
    should_stop: bool,
    should_save: bool,
}

impl Default for EarlyStopping {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}

impl EarlyStopping {
    pub fn new(tolerance: usize) -> Self {
        Self {
            tolerance,
            loss_min: f32::INFINITY,
            counter: 0,
            should_stop: false,
            should_save: false,
        }
    }

    pub fn observe(&mut self, loss: f32) {
        if loss > self.loss_min {
            self.counter += 1;
            self.should_save = false;
            if self.counter >= self.tolerance {
                self.should_stop = true;
            }
        } else {
            self.should_save = true;
            self.loss_min = loss;
            self.counter = 0;
        }
    }

    pub fn should_stop(&self) -> bool {
        self.should_stop
    }

    pub fn should_save(&self) -> bool {
        self.should_save
    }

    pub fn loss_min(&self) -> f32 {
        self.loss_min
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn tolerance(&self) -> usize {
        self.tolerance
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tracker_saves_the_first_loss() {
        let mut stopper = EarlyStopping::default();
        assert_eq!(stopper.tolerance(), 20);
        assert!(!stopper.should_save());
        stopper.observe(3.0);
        assert!(stopper.should_save());
        assert_eq!(stopper.loss_min(), 3.0);
    }

    #[test]
    fn equal_losses_count_as_improvements() {
        let mut stopper = EarlyStopping::new(1);
        stopper.observe(1.0);
        stopper.observe(1.0);
        assert!(stopper.should_save());
        assert_eq!(stopper.counter(), 0);
        assert!(!stopper.should_stop());
    }

    #[test]
    fn stop_is_sticky_after_recovery() {
        let mut stopper = EarlyStopping::new(2);
        for loss in [1.0, 2.0, 2.0] {
            stopper.observe(loss);
        }
        assert!(stopper.should_stop());
        stopper.observe(0.5);
        assert!(stopper.should_save());
        assert!(stopper.should_stop());
    }
}
