// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Stage stack lifting a coarse attribute batch through one representation per
//! hierarchy level.
//!
//! A chain of `N` levels is served by `N + 1` stages. Stage 0 maps the input
//! onto itself and yields the coarsest level, stages `1..N-1` walk the widths
//! `[low, hidden..., high]` and stage `N` refines the finest width into the top
//! level. The output of stage `N-1` is an internal representation only. Every
//! stage after the first consumes the ReLU of its predecessor; the last stage
//! is left unconstrained.

use rand::rngs::StdRng;

pub use disagg_config::ProjectorKind as StageKind;

use crate::error::{ModelError, ModelResult};
use crate::hierarchy::{LevelChain, Resolution};
use crate::init;
use crate::layers::{Linear, Lstm, Relu};
use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};

/// Whether a forward pass keeps what the backward pass needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GradMode {
    Track,
    Disabled,
}

#[derive(Debug)]
enum Stage {
    Linear(Linear),
    Lstm(Lstm),
}

impl Stage {
    fn build(
        kind: StageKind,
        name: String,
        input: usize,
        output: usize,
        rng: &mut StdRng,
    ) -> PureResult<Self> {
        Ok(match kind {
            StageKind::FeedForward => {
                let mut layer = Linear::new(name, input, output)?;
                init::linear(&mut layer, rng)?;
                Stage::Linear(layer)
            }
            StageKind::Recurrent => {
                let mut layer = Lstm::new(name, input, output)?;
                init::lstm(&mut layer, rng)?;
                Stage::Lstm(layer)
            }
        })
    }

    fn run(&self, input: &Tensor, mode: GradMode) -> PureResult<Tensor> {
        match (self, mode) {
            (Stage::Linear(layer), _) => layer.forward(input),
            (Stage::Lstm(layer), GradMode::Track) => layer.forward(input),
            (Stage::Lstm(layer), GradMode::Disabled) => layer.infer(input),
        }
    }

    fn module(&self) -> &dyn Module {
        match self {
            Stage::Linear(layer) => layer,
            Stage::Lstm(layer) => layer,
        }
    }

    fn module_mut(&mut self) -> &mut dyn Module {
        match self {
            Stage::Linear(layer) => layer,
            Stage::Lstm(layer) => layer,
        }
    }
}

/// Representation produced for one hierarchy level.
#[derive(Clone, Debug, PartialEq)]
pub struct LevelRepresentation {
    pub resolution: Resolution,
    pub tensor: Tensor,
}

#[derive(Clone, Debug)]
struct StageTrace {
    inputs: Vec<Tensor>,
    outputs: Vec<Tensor>,
}

/// Result of one forward pass through the projector.
#[derive(Clone, Debug)]
pub struct Projection {
    levels: Vec<LevelRepresentation>,
    prediction: Tensor,
    trace: Option<StageTrace>,
}

impl Projection {
    /// Level representations, coarsest first, as consumed by reconstruction.
    pub fn levels(&self) -> &[LevelRepresentation] {
        &self.levels
    }

    pub fn level(&self, resolution: Resolution) -> Option<&Tensor> {
        self.levels
            .iter()
            .find(|level| level.resolution == resolution)
            .map(|level| &level.tensor)
    }

    /// Raw top-level output, the model's prediction.
    pub fn prediction(&self) -> &Tensor {
        &self.prediction
    }

    pub fn into_prediction(self) -> Tensor {
        self.prediction
    }

    pub fn is_tracked(&self) -> bool {
        self.trace.is_some()
    }
}

#[derive(Debug)]
pub struct HierarchicalProjector {
    kind: StageKind,
    chain: LevelChain,
    widths: Vec<usize>,
    stages: Vec<Stage>,
    relu: Relu,
}

impl HierarchicalProjector {
    /// Builds and initialises every stage from `rng`.
    pub fn new(
        kind: StageKind,
        chain: LevelChain,
        low_size: usize,
        high_size: usize,
        hidden_sizes: &[usize],
        rng: &mut StdRng,
    ) -> ModelResult<Self> {
        let depth = chain.depth();
        if hidden_sizes.len() != depth.hidden_arity() {
            return Err(ModelError::HiddenSizeArity {
                levels: chain.len(),
                expected: depth.hidden_arity(),
                got: hidden_sizes.len(),
            });
        }
        let consumed = &hidden_sizes[..depth.consumed_hidden()];
        if low_size == 0 || high_size == 0 || consumed.contains(&0) {
            return Err(ModelError::ZeroWidth);
        }

        let mut walk = Vec::with_capacity(chain.len());
        walk.push(low_size);
        walk.extend_from_slice(consumed);
        walk.push(high_size);

        let mut stages = Vec::with_capacity(chain.len() + 1);
        stages.push(Stage::build(kind, "stage0".into(), low_size, low_size, rng)?);
        for (idx, pair) in walk.windows(2).enumerate() {
            let name = format!("stage{}", idx + 1);
            stages.push(Stage::build(kind, name, pair[0], pair[1], rng)?);
        }
        let last = format!("stage{}", chain.len());
        stages.push(Stage::build(kind, last, high_size, high_size, rng)?);

        Ok(Self {
            kind,
            chain,
            widths: walk,
            stages,
            relu: Relu::new(),
        })
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn chain(&self) -> &LevelChain {
        &self.chain
    }

    /// Width of every level, coarsest first.
    pub fn level_widths(&self) -> &[usize] {
        &self.widths
    }

    pub fn width_of(&self, resolution: Resolution) -> Option<usize> {
        self.chain.position(resolution).map(|idx| self.widths[idx])
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    fn top_stage(&self) -> usize {
        self.stages.len() - 1
    }

    /// Stage whose output represents chain level `level`.
    fn stage_of_level(&self, level: usize) -> usize {
        if level + 1 == self.chain.len() {
            self.top_stage()
        } else {
            level
        }
    }

    pub fn forward(&self, input: &Tensor, mode: GradMode) -> PureResult<Projection> {
        if input.cols() != self.widths[0] {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: (input.rows(), self.widths[0]),
            });
        }
        let mut inputs = Vec::with_capacity(self.stages.len());
        let mut outputs: Vec<Tensor> = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let stage_input = match outputs.last() {
                Some(previous) => self.relu.forward(previous)?,
                None => input.clone(),
            };
            let output = stage.run(&stage_input, mode)?;
            inputs.push(stage_input);
            outputs.push(output);
        }

        let prediction = outputs[self.top_stage()].clone();
        let levels = self
            .chain
            .levels()
            .iter()
            .enumerate()
            .map(|(level, resolution)| {
                let stage = self.stage_of_level(level);
                let tensor = if stage == self.top_stage() && self.kind == StageKind::Recurrent {
                    outputs[stage].relu()
                } else {
                    outputs[stage].clone()
                };
                LevelRepresentation {
                    resolution: *resolution,
                    tensor,
                }
            })
            .collect();
        let trace = match mode {
            GradMode::Track => Some(StageTrace { inputs, outputs }),
            GradMode::Disabled => None,
        };
        Ok(Projection {
            levels,
            prediction,
            trace,
        })
    }

    /// Backpropagates through every stage of a tracked projection.
    ///
    /// `grad_prediction` targets the raw top output and `grad_levels` holds
    /// an optional gradient per chain level with respect to the
    /// representation returned in [`Projection::levels`]. Returns the
    /// gradient with respect to the projector input.
    pub fn backward(
        &mut self,
        projection: &Projection,
        grad_prediction: Option<&Tensor>,
        grad_levels: &[Option<Tensor>],
    ) -> PureResult<Tensor> {
        let trace = projection.trace.as_ref().ok_or(TensorError::InvalidValue {
            label: "projection was not tracked",
        })?;
        if grad_levels.len() != self.chain.len() {
            return Err(TensorError::DataLength {
                expected: self.chain.len(),
                got: grad_levels.len(),
            });
        }

        let mut grad_outputs: Vec<Option<Tensor>> = vec![None; self.stages.len()];
        let top = self.top_stage();
        for (level, grad) in grad_levels.iter().enumerate() {
            let Some(grad) = grad else { continue };
            let stage = self.stage_of_level(level);
            let grad = if stage == top && self.kind == StageKind::Recurrent {
                self.relu.backward(&trace.outputs[top], grad)?
            } else {
                grad.clone()
            };
            accumulate(&mut grad_outputs[stage], grad)?;
        }
        if let Some(grad) = grad_prediction {
            accumulate(&mut grad_outputs[top], grad.clone())?;
        }

        for idx in (1..self.stages.len()).rev() {
            let grad_output = take_or_zeros(&mut grad_outputs[idx], &trace.outputs[idx])?;
            let grad_stage_input = self.stages[idx]
                .module_mut()
                .backward(&trace.inputs[idx], &grad_output)?;
            let through_relu = self
                .relu
                .backward(&trace.outputs[idx - 1], &grad_stage_input)?;
            accumulate(&mut grad_outputs[idx - 1], through_relu)?;
        }
        let grad_output = take_or_zeros(&mut grad_outputs[0], &trace.outputs[0])?;
        self.stages[0]
            .module_mut()
            .backward(&trace.inputs[0], &grad_output)
    }

    pub fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for stage in &self.stages {
            stage.module().visit_parameters(visitor)?;
        }
        Ok(())
    }

    pub fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        for stage in &mut self.stages {
            stage.module_mut().visit_parameters_mut(visitor)?;
        }
        Ok(())
    }
}

fn take_or_zeros(slot: &mut Option<Tensor>, like: &Tensor) -> PureResult<Tensor> {
    match slot.take() {
        Some(grad) => Ok(grad),
        None => Tensor::zeros(like.rows(), like.cols()),
    }
}

fn accumulate(slot: &mut Option<Tensor>, grad: Tensor) -> PureResult<()> {
    match slot {
        Some(existing) => existing.add_scaled(&grad, 1.0),
        None => {
            *slot = Some(grad);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::Depth;
    use rand::SeedableRng;

    fn projector(kind: StageKind, depth: Depth, hidden: &[usize]) -> HierarchicalProjector {
        let mut rng = StdRng::seed_from_u64(100);
        HierarchicalProjector::new(kind, depth.canonical_chain(), 3, 6, hidden, &mut rng).unwrap()
    }

    #[test]
    fn stage_count_and_level_widths_follow_depth() {
        let two = projector(StageKind::FeedForward, Depth::Two, &[5]);
        assert_eq!(two.stage_count(), 3);
        assert_eq!(two.level_widths(), &[3, 6]);

        let five = projector(StageKind::FeedForward, Depth::Five, &[4, 5, 7]);
        assert_eq!(five.stage_count(), 6);
        assert_eq!(five.level_widths(), &[3, 4, 5, 7, 6]);
        assert_eq!(five.width_of(Resolution::Block), Some(7));
        assert_eq!(five.width_of(Resolution::Extreme), Some(6));
    }

    #[test]
    fn rejects_wrong_hidden_arity_and_zero_widths() {
        let mut rng = StdRng::seed_from_u64(1);
        let chain = Depth::Four.canonical_chain();
        let err = HierarchicalProjector::new(StageKind::FeedForward, chain.clone(), 3, 6, &[4], &mut rng)
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::HiddenSizeArity {
                levels: 4,
                expected: 2,
                got: 1
            }
        );
        let err = HierarchicalProjector::new(StageKind::Recurrent, chain, 3, 6, &[4, 0], &mut rng)
            .unwrap_err();
        assert_eq!(err, ModelError::ZeroWidth);
        let two = Depth::Two.canonical_chain();
        assert!(HierarchicalProjector::new(StageKind::FeedForward, two, 3, 6, &[], &mut rng).is_err());
    }

    #[test]
    fn levels_have_their_widths_and_batch_rows() {
        let projector = projector(StageKind::FeedForward, Depth::Three, &[4]);
        let input = Tensor::from_fn(5, 3, |r, c| (r + c) as f32 * 0.1).unwrap();
        let projection = projector.forward(&input, GradMode::Disabled).unwrap();
        let shapes: Vec<_> = projection.levels().iter().map(|l| l.tensor.shape()).collect();
        assert_eq!(shapes, vec![(5, 3), (5, 4), (5, 6)]);
        assert_eq!(projection.prediction().shape(), (5, 6));
        assert!(!projection.is_tracked());
        assert_eq!(projection.level(Resolution::Tract), Some(projection.prediction()));
    }

    #[test]
    fn recurrent_top_level_is_rectified_for_reconstruction_only() {
        let projector = projector(StageKind::Recurrent, Depth::Two, &[5]);
        let input = Tensor::from_fn(4, 3, |r, c| (r as f32 - c as f32) * 0.3).unwrap();
        let projection = projector.forward(&input, GradMode::Track).unwrap();
        let top = projection.level(Resolution::Nta).unwrap();
        assert_eq!(top, &projection.prediction().relu());
        assert!(top.data().iter().all(|v| *v >= 0.0));
    }

    #[test]
    fn untracked_projection_cannot_be_backpropagated() {
        let mut projector = projector(StageKind::FeedForward, Depth::Two, &[5]);
        let input = Tensor::zeros(2, 3).unwrap();
        let projection = projector.forward(&input, GradMode::Disabled).unwrap();
        let grad = Tensor::zeros(2, 6).unwrap();
        assert!(projector
            .backward(&projection, Some(&grad), &[None, None])
            .is_err());
    }

    #[test]
    fn prediction_gradient_matches_finite_differences() {
        for kind in [StageKind::FeedForward, StageKind::Recurrent] {
            let mut projector = projector(kind, Depth::Three, &[4]);
            let input = Tensor::from_fn(3, 3, |r, c| 0.2 + 0.1 * r as f32 - 0.05 * c as f32).unwrap();
            let projection = projector.forward(&input, GradMode::Track).unwrap();
            let ones = Tensor::full(3, 6, 1.0).unwrap();
            let grad = projector
                .backward(&projection, Some(&ones), &[None, None, None])
                .unwrap();

            let eps = 1e-3;
            for idx in [0usize, 4, 8] {
                let mut plus = input.clone();
                plus.data_mut()[idx] += eps;
                let mut minus = input.clone();
                minus.data_mut()[idx] -= eps;
                let sum = |t: &Tensor| -> f32 {
                    projector
                        .forward(t, GradMode::Disabled)
                        .unwrap()
                        .prediction()
                        .data()
                        .iter()
                        .sum()
                };
                let numeric = (sum(&plus) - sum(&minus)) / (2.0 * eps);
                let analytic = grad.data()[idx];
                assert!(
                    (numeric - analytic).abs() < 1e-3 + 0.05 * analytic.abs(),
                    "{kind:?} idx {idx}: numeric {numeric} analytic {analytic}"
                );
            }
        }
    }
}
