// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Weighted sum of the supervised top-level loss and the mean coherence loss
//! over every reconstruction.

use crate::dataset::Batch;
use crate::error::ModelResult;
use crate::hierarchy::Resolution;
use crate::loss::{Loss, MeanAbsoluteError};
use crate::model::{ModelOutput, OutputGradients};
use crate::{Tensor, TensorError};

pub const HIGH_WEIGHT: f32 = 2.0;
pub const RECONSTRUCTION_WEIGHT: f32 = 1.0;

/// Scalar objective of one batch with its gradients.
#[derive(Clone, Debug)]
pub struct ObjectiveValue {
    pub total: f32,
    pub supervised: f32,
    /// Mean over reconstruction terms; zero when the model emits none.
    pub reconstruction: f32,
    pub gradients: OutputGradients,
}

#[derive(Debug, Clone)]
pub struct CoherenceObjective<L: Loss = MeanAbsoluteError> {
    criterion: L,
    high_weight: f32,
    reconstruction_weight: f32,
}

impl Default for CoherenceObjective<MeanAbsoluteError> {
    fn default() -> Self {
        Self::new(MeanAbsoluteError::new())
    }
}

impl<L: Loss> CoherenceObjective<L> {
    pub fn new(criterion: L) -> Self {
        Self::with_weights(criterion, HIGH_WEIGHT, RECONSTRUCTION_WEIGHT)
    }

    pub fn with_weights(criterion: L, high_weight: f32, reconstruction_weight: f32) -> Self {
        Self {
            criterion,
            high_weight,
            reconstruction_weight,
        }
    }

    pub fn high_weight(&self) -> f32 {
        self.high_weight
    }

    pub fn reconstruction_weight(&self) -> f32 {
        self.reconstruction_weight
    }

    /// Scores `output` against `batch`. `input_level` is the resolution whose
    /// truth is the (normalised) input itself.
    pub fn evaluate(
        &mut self,
        output: &ModelOutput,
        batch: &Batch,
        input_level: Resolution,
    ) -> ModelResult<ObjectiveValue> {
        let supervised = self.criterion.value(output.prediction(), &batch.high)?;
        let grad_prediction = self
            .criterion
            .backward(output.prediction(), &batch.high)?
            .scale(self.high_weight)?;

        let reconstructions = output.reconstructions();
        let mut reconstruction = 0.0f32;
        let mut grad_reconstructions = Vec::with_capacity(reconstructions.len());
        if !reconstructions.is_empty() {
            let share = self.reconstruction_weight / reconstructions.len() as f32;
            for rec in reconstructions {
                let truth = batch.truth_for(rec.target, input_level)?;
                reconstruction += self.criterion.value(&rec.tensor, truth)?;
                grad_reconstructions.push(self.criterion.backward(&rec.tensor, truth)?.scale(share)?);
            }
            reconstruction /= reconstructions.len() as f32;
        }

        let total = self.high_weight * supervised + self.reconstruction_weight * reconstruction;
        if !total.is_finite() {
            return Err(TensorError::NonFiniteValue {
                label: "objective",
                value: total,
            }
            .into());
        }
        Ok(ObjectiveValue {
            total,
            supervised,
            reconstruction,
            gradients: OutputGradients {
                prediction: grad_prediction,
                reconstructions: grad_reconstructions,
            },
        })
    }

    /// Unweighted supervised loss, as reported by evaluation.
    pub fn supervised(&mut self, prediction: &Tensor, target: &Tensor) -> ModelResult<f32> {
        Ok(self.criterion.value(prediction, target)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DisaggDataset;
    use crate::error::ModelError;
    use crate::hierarchy::Depth;
    use crate::linkage::{Linkage, LinkageSet};
    use crate::model::{DisaggModel, ModelSpec};
    use crate::projector::{GradMode, StageKind};
    use crate::reconstruction::Wiring;

    fn three_level(wiring: Wiring) -> DisaggModel {
        let mut set = LinkageSet::new();
        set.insert(Linkage::from_membership(Resolution::Puma, Resolution::Nta, 2, &[0, 0, 1]).unwrap());
        set.insert(
            Linkage::from_membership(Resolution::Puma, Resolution::Tract, 2, &[0, 0, 1, 1]).unwrap(),
        );
        set.insert(
            Linkage::from_membership(Resolution::Nta, Resolution::Tract, 3, &[0, 1, 2, 2]).unwrap(),
        );
        let spec = ModelSpec::new(StageKind::FeedForward, Depth::Three, 2, 4, vec![3]).with_wiring(wiring);
        DisaggModel::new(spec, &set).unwrap()
    }

    fn batch(with_nta: bool) -> Batch {
        let low = Tensor::from_vec(2, 2, vec![0.2, 0.4, 0.6, 0.8]).unwrap();
        let high = Tensor::full(2, 4, 0.25).unwrap();
        let mut data = DisaggDataset::new(low, high).unwrap();
        if with_nta {
            data = data.with_level(Resolution::Nta, Tensor::full(2, 3, 0.3).unwrap()).unwrap();
        }
        data.batch(0, 2).unwrap()
    }

    #[test]
    fn total_combines_weighted_terms() {
        let model = three_level(Wiring::BottomUp);
        let batch = batch(true);
        let output = model.run(&batch.low, GradMode::Track).unwrap();
        let value = CoherenceObjective::default()
            .evaluate(&output, &batch, Resolution::Puma)
            .unwrap();
        let expected = 2.0 * value.supervised + value.reconstruction;
        assert!((value.total - expected).abs() < 1e-6);
        assert_eq!(value.gradients.reconstructions.len(), 2);

        let mut mae = MeanAbsoluteError::new();
        let by_hand: f32 = output
            .reconstructions()
            .iter()
            .map(|rec| {
                let truth = batch.truth_for(rec.target, Resolution::Puma).unwrap();
                mae.value(&rec.tensor, truth).unwrap()
            })
            .sum::<f32>()
            / 2.0;
        assert!((value.reconstruction - by_hand).abs() < 1e-6);
    }

    #[test]
    fn supervised_wiring_contributes_zero_reconstruction() {
        let model = three_level(Wiring::Supervised);
        let batch = batch(false);
        let output = model.run(&batch.low, GradMode::Track).unwrap();
        let value = CoherenceObjective::default()
            .evaluate(&output, &batch, Resolution::Puma)
            .unwrap();
        assert_eq!(value.reconstruction, 0.0);
        assert!(value.gradients.reconstructions.is_empty());
        assert!((value.total - 2.0 * value.supervised).abs() < 1e-6);
    }

    #[test]
    fn missing_intermediate_truth_is_an_error() {
        let model = three_level(Wiring::BottomUp);
        let batch = batch(false);
        let output = model.run(&batch.low, GradMode::Track).unwrap();
        let err = CoherenceObjective::default()
            .evaluate(&output, &batch, Resolution::Puma)
            .unwrap_err();
        assert_eq!(err, ModelError::MissingLevelTarget(Resolution::Nta));
    }

    #[test]
    fn non_finite_objective_is_fatal() {
        let model = three_level(Wiring::Supervised);
        let mut batch = batch(false);
        batch.high = Tensor::full(2, 4, f32::INFINITY).unwrap();
        let output = model.run(&batch.low, GradMode::Track).unwrap();
        let err = CoherenceObjective::default()
            .evaluate(&output, &batch, Resolution::Puma)
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::Tensor(TensorError::NonFiniteValue { .. })
        ));
    }
}
