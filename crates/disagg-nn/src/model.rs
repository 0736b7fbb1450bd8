// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Disaggregation models: a hierarchical projector paired with a
//! reconstruction head over one level chain.

use disagg_config::{DeterminismConfig, DEFAULT_SEED};

use crate::error::{ModelError, ModelResult};
use crate::hierarchy::{Depth, LevelChain};
use crate::linkage::LinkageSet;
use crate::module::{Module, Parameter};
use crate::projector::{GradMode, HierarchicalProjector, Projection, StageKind};
use crate::reconstruction::{Reconstruction, ReconstructionHead, Wiring};
use crate::{PureResult, Tensor};

/// Everything needed to build a model. There are no implicit widths.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSpec {
    pub kind: StageKind,
    pub chain: LevelChain,
    pub wiring: Wiring,
    pub low_size: usize,
    pub high_size: usize,
    pub hidden_sizes: Vec<usize>,
    pub seed: u64,
}

impl ModelSpec {
    /// Spec over the canonical chain of `depth` with the default wiring and
    /// seed.
    pub fn new(
        kind: StageKind,
        depth: Depth,
        low_size: usize,
        high_size: usize,
        hidden_sizes: Vec<usize>,
    ) -> Self {
        Self {
            kind,
            chain: depth.canonical_chain(),
            wiring: Wiring::default(),
            low_size,
            high_size,
            hidden_sizes,
            seed: DEFAULT_SEED,
        }
    }

    pub fn with_wiring(mut self, wiring: Wiring) -> Self {
        self.wiring = wiring;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_chain(mut self, chain: LevelChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn depth(&self) -> Depth {
        self.chain.depth()
    }
}

/// Gradients of a scalar objective with respect to a [`ModelOutput`].
#[derive(Clone, Debug)]
pub struct OutputGradients {
    pub prediction: Tensor,
    /// One entry per reconstruction, in output order.
    pub reconstructions: Vec<Tensor>,
}

#[derive(Clone, Debug)]
pub struct ModelOutput {
    projection: Projection,
    reconstructions: Vec<Reconstruction>,
}

impl ModelOutput {
    pub fn prediction(&self) -> &Tensor {
        self.projection.prediction()
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn reconstructions(&self) -> &[Reconstruction] {
        &self.reconstructions
    }

    pub fn into_prediction(self) -> Tensor {
        self.projection.into_prediction()
    }
}

#[derive(Debug)]
pub struct DisaggModel {
    spec: ModelSpec,
    projector: HierarchicalProjector,
    head: ReconstructionHead,
}

impl DisaggModel {
    pub fn new(spec: ModelSpec, linkages: &LinkageSet) -> ModelResult<Self> {
        let mut rng = DeterminismConfig::new(spec.seed).rng();
        let projector = HierarchicalProjector::new(
            spec.kind,
            spec.chain.clone(),
            spec.low_size,
            spec.high_size,
            &spec.hidden_sizes,
            &mut rng,
        )?;
        for linkage in linkages.iter() {
            let (Some(coarse), Some(fine)) = (
                projector.width_of(linkage.coarse()),
                projector.width_of(linkage.fine()),
            ) else {
                continue;
            };
            let got = linkage.matrix().shape();
            if got != (coarse, fine) {
                return Err(ModelError::LinkageShape {
                    coarse: linkage.coarse(),
                    fine: linkage.fine(),
                    expected: (coarse, fine),
                    got,
                });
            }
        }
        let head = ReconstructionHead::new(spec.wiring, spec.chain.clone(), linkages)?;
        Ok(Self {
            spec,
            projector,
            head,
        })
    }

    /// Builds a model from linkages listed in combination order over the
    /// chain: `(0,1), (0,2), …, (1,2), …`.
    pub fn from_ordered_linkages(spec: ModelSpec, linkages: Vec<Tensor>) -> ModelResult<Self> {
        let set = LinkageSet::from_ordered(&spec.chain, linkages)?;
        Self::new(spec, &set)
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn chain(&self) -> &LevelChain {
        &self.spec.chain
    }

    pub fn reconstruction_count(&self) -> usize {
        self.head.route_count()
    }

    pub fn run(&self, input: &Tensor, mode: GradMode) -> PureResult<ModelOutput> {
        let projection = self.projector.forward(input, mode)?;
        let reconstructions = self.head.reconstruct(&projection)?;
        Ok(ModelOutput {
            projection,
            reconstructions,
        })
    }

    /// Accumulates parameter gradients for a tracked output and returns the
    /// gradient with respect to the input.
    pub fn backpropagate(
        &mut self,
        output: &ModelOutput,
        grads: &OutputGradients,
    ) -> PureResult<Tensor> {
        let grad_levels = self.head.backward(&grads.reconstructions)?;
        self.projector
            .backward(&output.projection, Some(&grads.prediction), &grad_levels)
    }
}

impl Module for DisaggModel {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        Ok(self.run(input, GradMode::Disabled)?.into_prediction())
    }

    /// Supervises the top-level prediction only.
    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        let projection = self.projector.forward(input, GradMode::Track)?;
        let none = vec![None; self.spec.chain.len()];
        self.projector.backward(&projection, Some(grad_output), &none)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.projector.visit_parameters(visitor)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        self.projector.visit_parameters_mut(visitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::Resolution;
    use crate::linkage::Linkage;

    fn linkages_two() -> LinkageSet {
        let mut set = LinkageSet::new();
        let parents: Vec<usize> = (0..20).map(|unit| unit / 2).collect();
        set.insert(Linkage::from_membership(Resolution::Puma, Resolution::Nta, 10, &parents).unwrap());
        set
    }

    #[test]
    fn same_seed_builds_identical_models() {
        let spec = ModelSpec::new(StageKind::Recurrent, Depth::Two, 10, 20, vec![15]);
        let a = DisaggModel::new(spec.clone(), &linkages_two()).unwrap();
        let b = DisaggModel::new(spec.clone(), &linkages_two()).unwrap();
        assert_eq!(a.state_dict().unwrap(), b.state_dict().unwrap());
        let c = DisaggModel::new(spec.with_seed(7), &linkages_two()).unwrap();
        assert_ne!(a.state_dict().unwrap(), c.state_dict().unwrap());
    }

    #[test]
    fn linkage_shape_must_match_level_widths() {
        let spec = ModelSpec::new(StageKind::FeedForward, Depth::Two, 10, 21, vec![15]);
        let err = DisaggModel::new(spec, &linkages_two()).unwrap_err();
        assert_eq!(
            err,
            ModelError::LinkageShape {
                coarse: Resolution::Puma,
                fine: Resolution::Nta,
                expected: (10, 21),
                got: (10, 20),
            }
        );
    }

    #[test]
    fn supervised_wiring_needs_no_linkages() {
        let spec = ModelSpec::new(StageKind::FeedForward, Depth::Three, 4, 8, vec![6])
            .with_wiring(Wiring::Supervised);
        let model = DisaggModel::new(spec, &LinkageSet::new()).unwrap();
        assert_eq!(model.reconstruction_count(), 0);
        let output = model.run(&Tensor::zeros(2, 4).unwrap(), GradMode::Disabled).unwrap();
        assert!(output.reconstructions().is_empty());
        assert_eq!(output.prediction().shape(), (2, 8));
    }

    #[test]
    fn module_backward_fills_every_parameter_gradient() {
        let spec = ModelSpec::new(StageKind::FeedForward, Depth::Two, 10, 20, vec![15]);
        let mut model = DisaggModel::new(spec, &linkages_two()).unwrap();
        let input = Tensor::full(3, 10, 0.5).unwrap();
        let grad = Tensor::full(3, 20, 1.0).unwrap();
        model.backward(&input, &grad).unwrap();
        let mut touched = 0;
        model
            .visit_parameters(&mut |param| {
                assert!(param.gradient().is_some(), "{} has no gradient", param.name());
                touched += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(touched, 6);
    }
}
