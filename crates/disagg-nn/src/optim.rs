// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::Module;
use crate::{PureResult, TensorError};
use disagg_config::OptimizerChoice;
use std::collections::HashMap;

/// Consumes the gradients accumulated on a module's parameters.
pub trait Optimizer {
    /// Applies one update and clears the consumed gradients.
    fn step(&mut self, module: &mut dyn Module) -> PureResult<()>;

    fn learning_rate(&self) -> f32;
}

fn guard_rate(rate: f32) -> PureResult<()> {
    if rate <= 0.0 || !rate.is_finite() {
        return Err(TensorError::NonPositiveLearningRate { rate });
    }
    Ok(())
}

/// Builds the optimiser named in an experiment configuration.
pub fn from_choice(choice: OptimizerChoice, learning_rate: f32) -> PureResult<Box<dyn Optimizer>> {
    Ok(match choice {
        OptimizerChoice::Adam => Box::new(Adam::new(learning_rate)?),
        OptimizerChoice::Sgd => Box::new(Sgd::new(learning_rate)?),
    })
}

/// Plain stochastic gradient descent.
#[derive(Debug, Clone, Copy)]
pub struct Sgd {
    learning_rate: f32,
}

impl Sgd {
    pub fn new(learning_rate: f32) -> PureResult<Self> {
        guard_rate(learning_rate)?;
        Ok(Self { learning_rate })
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, module: &mut dyn Module) -> PureResult<()> {
        module.apply_step(self.learning_rate)
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

#[derive(Debug, Clone)]
struct Moments {
    first: Vec<f32>,
    second: Vec<f32>,
}

/// Adam with bias-corrected first and second moments, keyed by parameter name.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    step: i32,
    moments: HashMap<String, Moments>,
}

impl Adam {
    pub fn new(learning_rate: f32) -> PureResult<Self> {
        Self::with_betas(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn with_betas(learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> PureResult<Self> {
        guard_rate(learning_rate)?;
        if !(0.0..1.0).contains(&beta1) || !(0.0..1.0).contains(&beta2) {
            return Err(TensorError::InvalidValue { label: "adam_betas" });
        }
        if epsilon <= 0.0 {
            return Err(TensorError::InvalidValue {
                label: "adam_epsilon",
            });
        }
        Ok(Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            step: 0,
            moments: HashMap::new(),
        })
    }

    /// Number of updates applied so far.
    pub fn steps(&self) -> i32 {
        self.step
    }
}

impl Optimizer for Adam {
    fn step(&mut self, module: &mut dyn Module) -> PureResult<()> {
        self.step += 1;
        let (beta1, beta2, eps, lr) = (self.beta1, self.beta2, self.epsilon, self.learning_rate);
        let correction1 = 1.0 - beta1.powi(self.step);
        let correction2 = 1.0 - beta2.powi(self.step);
        let moments = &mut self.moments;
        module.visit_parameters_mut(&mut |param| {
            let Some(grad) = param.gradient().cloned() else {
                return Ok(());
            };
            let len = grad.len();
            let entry = moments
                .entry(param.name().to_string())
                .or_insert_with(|| Moments {
                    first: vec![0.0; len],
                    second: vec![0.0; len],
                });
            if entry.first.len() != len {
                return Err(TensorError::DataLength {
                    expected: entry.first.len(),
                    got: len,
                });
            }
            let values = param.value_mut().data_mut();
            for (idx, g) in grad.data().iter().enumerate() {
                let m = &mut entry.first[idx];
                let v = &mut entry.second[idx];
                *m = beta1 * *m + (1.0 - beta1) * g;
                *v = beta2 * *v + (1.0 - beta2) * g * g;
                let m_hat = *m / correction1;
                let v_hat = *v / correction2;
                values[idx] -= lr * m_hat / (v_hat.sqrt() + eps);
            }
            param.zero_gradient();
            Ok(())
        })
    }

    fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::linear::Linear;
    use crate::loss::{Loss, MeanAbsoluteError};
    use crate::Tensor;

    fn l1_loss(layer: &Linear, input: &Tensor, target: &Tensor) -> f32 {
        let out = layer.forward(input).unwrap();
        MeanAbsoluteError::new().value(&out, target).unwrap()
    }

    fn descend(optimizer: &mut dyn Optimizer) -> (f32, f32) {
        let mut layer = Linear::new("fc", 2, 1).unwrap();
        let input = Tensor::from_vec(2, 2, vec![1.0, -1.0, 0.5, 2.0]).unwrap();
        let target = Tensor::from_vec(2, 1, vec![0.5, -0.25]).unwrap();
        let before = l1_loss(&layer, &input, &target);
        for _ in 0..5 {
            let out = layer.forward(&input).unwrap();
            let grad = MeanAbsoluteError::new().backward(&out, &target).unwrap();
            layer.backward(&input, &grad).unwrap();
            optimizer.step(&mut layer).unwrap();
        }
        (before, l1_loss(&layer, &input, &target))
    }

    #[test]
    fn sgd_and_adam_reduce_an_l1_fit() {
        let (before, after) = descend(&mut Sgd::new(0.1).unwrap());
        assert!(after < before);
        let mut adam = Adam::new(0.01).unwrap();
        let (before, after) = descend(&mut adam);
        assert!(after < before);
        assert_eq!(adam.steps(), 5);
    }

    #[test]
    fn rejects_non_positive_rates() {
        assert!(Sgd::new(0.0).is_err());
        assert!(Adam::new(-1.0).is_err());
        assert!(from_choice(OptimizerChoice::Adam, f32::NAN).is_err());
        assert_eq!(from_choice(OptimizerChoice::Sgd, 0.5).unwrap().learning_rate(), 0.5);
    }
}
