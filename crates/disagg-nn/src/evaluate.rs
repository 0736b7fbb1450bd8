// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::dataset::{DisaggDataset, Normalizer};
use crate::error::ModelResult;
use crate::loss::Loss;
use crate::model::DisaggModel;
use crate::projector::GradMode;
use crate::{PureResult, Tensor, TensorError};

/// Aggregate loss over a whole split with the concatenated predictions and
/// targets it was computed from.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub predictions: Tensor,
    pub ground_truth: Tensor,
}

impl Evaluation {
    pub fn denormalized_loss(&self, normalizer: &Normalizer) -> f32 {
        normalizer.denormalize_value(self.loss)
    }

    pub fn denormalized_predictions(&self, normalizer: &Normalizer) -> PureResult<Tensor> {
        normalizer.denormalize(&self.predictions)
    }
}

/// Runs every batch in order without tracking gradients and scores the
/// concatenated top-level predictions once. A non-finite loss is an error.
pub fn evaluate<L: Loss>(
    model: &DisaggModel,
    dataset: &DisaggDataset,
    batch_size: usize,
    criterion: &mut L,
) -> ModelResult<Evaluation> {
    let mut predictions = Vec::new();
    let mut targets = Vec::new();
    for batch in dataset.batches(batch_size)? {
        let batch = batch?;
        let output = model.run(&batch.low, GradMode::Disabled)?;
        predictions.push(output.into_prediction());
        targets.push(batch.high);
    }
    let predictions = Tensor::cat_rows(&predictions)?;
    let ground_truth = Tensor::cat_rows(&targets)?;
    let loss = criterion.value(&predictions, &ground_truth)?;
    if !loss.is_finite() {
        return Err(TensorError::NonFiniteValue {
            label: "evaluation loss",
            value: loss,
        }
        .into());
    }
    Ok(Evaluation {
        loss,
        predictions,
        ground_truth,
    })
}
