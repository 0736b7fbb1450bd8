// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Per-layer-kind parameter initialisers.
//!
//! Each layer kind has its own function; the projector picks one when it
//! builds a stage and feeds every call from the single seeded RNG owned by the
//! model under construction.

use crate::layers::linear::Linear;
use crate::layers::lstm::Lstm;
use crate::{PureResult, Tensor};
use rand::rngs::StdRng;

/// Standard deviation of affine weights.
pub const LINEAR_WEIGHT_STD: f32 = 0.01;
/// Constant bias of affine layers.
pub const LINEAR_BIAS: f32 = 0.01;

/// Weights drawn from `N(0, 0.01)`, biases fixed at `0.01`.
pub fn linear(layer: &mut Linear, rng: &mut StdRng) -> PureResult<()> {
    let (rows, cols) = layer.weight().value().shape();
    let weight = Tensor::random_normal(rows, cols, 0.0, LINEAR_WEIGHT_STD, rng)?;
    let bias = Tensor::full(1, cols, LINEAR_BIAS)?;
    layer.weight_mut().load_value(&weight)?;
    layer.bias_mut().load_value(&bias)
}

/// Every LSTM weight and bias drawn from `U(-1/√hidden, 1/√hidden)`.
pub fn lstm(layer: &mut Lstm, rng: &mut StdRng) -> PureResult<()> {
    let bound = 1.0 / (layer.hidden_dim() as f32).sqrt();
    for param in layer.parameters_mut() {
        let (rows, cols) = param.value().shape();
        let value = Tensor::random_uniform(rows, cols, -bound, bound, rng)?;
        param.load_value(&value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn linear_init_is_seeded_and_small() {
        let mut a = Linear::new("fc", 8, 6).unwrap();
        let mut b = Linear::new("fc", 8, 6).unwrap();
        linear(&mut a, &mut StdRng::seed_from_u64(100)).unwrap();
        linear(&mut b, &mut StdRng::seed_from_u64(100)).unwrap();
        assert_eq!(a.weight().value(), b.weight().value());
        assert!(a.weight().value().data().iter().all(|w| w.abs() < 0.1));
        assert!(a.bias().value().data().iter().all(|b| *b == LINEAR_BIAS));
    }

    #[test]
    fn lstm_init_respects_hidden_bound() {
        let mut layer = Lstm::new("rnn", 3, 4).unwrap();
        lstm(&mut layer, &mut StdRng::seed_from_u64(7)).unwrap();
        for param in layer.parameters_mut() {
            assert!(param.value().data().iter().all(|v| v.abs() <= 0.5));
        }
    }
}
