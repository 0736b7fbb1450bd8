// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use super::Loss;
use crate::{PureResult, Tensor, TensorError};

/// L1 loss with mean reduction; the criterion used for both the supervised
/// and the reconstruction terms.
#[derive(Debug, Default, Clone, Copy)]
pub struct MeanAbsoluteError;

impl MeanAbsoluteError {
    pub fn new() -> Self {
        Self
    }
}

impl Loss for MeanAbsoluteError {
    fn forward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor> {
        let mean = disagg_tensor::mean_absolute_error(prediction, target)?;
        Tensor::from_vec(1, 1, vec![mean])
    }

    fn backward(&mut self, prediction: &Tensor, target: &Tensor) -> PureResult<Tensor> {
        if prediction.shape() != target.shape() {
            return Err(TensorError::ShapeMismatch {
                left: prediction.shape(),
                right: target.shape(),
            });
        }
        let (rows, cols) = prediction.shape();
        let inv = 1.0f32 / (rows * cols) as f32;
        let data = prediction
            .data()
            .iter()
            .zip(target.data())
            .map(|(pred, tgt)| {
                let diff = pred - tgt;
                if diff > 0.0 {
                    inv
                } else if diff < 0.0 {
                    -inv
                } else {
                    0.0
                }
            })
            .collect();
        Tensor::from_vec(rows, cols, data)
    }
}
