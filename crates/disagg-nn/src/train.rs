// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use tracing::debug;

use crate::dataset::{Batch, DisaggDataset};
use crate::error::ModelResult;
use crate::loss::{Loss, MeanAbsoluteError};
use crate::model::DisaggModel;
use crate::module::Module;
use crate::objective::{CoherenceObjective, ObjectiveValue};
use crate::optim::Optimizer;
use crate::projector::GradMode;

/// What one pass over the training split touched. Losses are not kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EpochReport {
    pub batches: usize,
    pub samples: usize,
}

/// Drives forward, objective, backward and optimiser step per batch.
pub struct Trainer<L: Loss = MeanAbsoluteError> {
    optimizer: Box<dyn Optimizer>,
    objective: CoherenceObjective<L>,
    batch_size: usize,
}

impl Trainer<MeanAbsoluteError> {
    pub fn new(optimizer: Box<dyn Optimizer>, batch_size: usize) -> Self {
        Self::with_objective(optimizer, CoherenceObjective::default(), batch_size)
    }
}

impl<L: Loss> Trainer<L> {
    pub fn with_objective(
        optimizer: Box<dyn Optimizer>,
        objective: CoherenceObjective<L>,
        batch_size: usize,
    ) -> Self {
        Self {
            optimizer,
            objective,
            batch_size,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn learning_rate(&self) -> f32 {
        self.optimizer.learning_rate()
    }

    /// One optimisation step on `batch`.
    pub fn train_step(
        &mut self,
        model: &mut DisaggModel,
        batch: &Batch,
    ) -> ModelResult<ObjectiveValue> {
        let output = model.run(&batch.low, GradMode::Track)?;
        let value = self
            .objective
            .evaluate(&output, batch, model.chain().coarsest())?;
        model.zero_accumulators()?;
        model.backpropagate(&output, &value.gradients)?;
        self.optimizer.step(model)?;
        Ok(value)
    }

    /// Visits every batch of `dataset` once, in order.
    pub fn train_epoch(
        &mut self,
        model: &mut DisaggModel,
        dataset: &DisaggDataset,
    ) -> ModelResult<EpochReport> {
        let mut report = EpochReport::default();
        for batch in dataset.batches(self.batch_size)? {
            let batch = batch?;
            let value = self.train_step(model, &batch)?;
            debug!(
                batch = report.batches,
                total = value.total,
                supervised = value.supervised,
                reconstruction = value.reconstruction,
                "train step"
            );
            report.batches += 1;
            report.samples += batch.len();
        }
        Ok(report)
    }
}
