// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

mod mean_absolute_error;

use crate::{PureResult, Tensor};

pub use mean_absolute_error::MeanAbsoluteError;

/// Trait implemented by differentiable losses that operate directly on
/// tensors.
pub trait Loss {
    /// Computes the loss value for the given predictions and targets.
    fn forward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor>;

    /// Returns the gradient of the loss with respect to the predictions.
    fn backward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor>;

    /// Scalar convenience wrapper around [`Loss::forward`].
    fn value(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<f32> {
        Ok(self.forward(prediction, target)?.data()[0])
    }
}
