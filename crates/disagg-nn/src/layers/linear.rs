// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};

/// Fully-connected layer mapping the spatial-unit axis of a batch,
/// `(batch, input_dim) -> (batch, output_dim)`.
///
/// Parameters start at zero; [`crate::init::linear`] draws the real values.
#[derive(Debug)]
pub struct Linear {
    weight: Parameter,
    bias: Parameter,
}

impl Linear {
    pub fn new(name: impl Into<String>, input_dim: usize, output_dim: usize) -> PureResult<Self> {
        if input_dim == 0 || output_dim == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: input_dim,
                cols: output_dim,
            });
        }
        let name = name.into();
        Ok(Self {
            weight: Parameter::new(
                format!("{name}::weight"),
                Tensor::zeros(input_dim, output_dim)?,
            ),
            bias: Parameter::new(format!("{name}::bias"), Tensor::zeros(1, output_dim)?),
        })
    }

    pub fn input_dim(&self) -> usize {
        self.weight.value().rows()
    }

    pub fn output_dim(&self) -> usize {
        self.weight.value().cols()
    }

    /// Returns a reference to the weight parameter.
    pub fn weight(&self) -> &Parameter {
        &self.weight
    }

    /// Returns a reference to the bias parameter.
    pub fn bias(&self) -> &Parameter {
        &self.bias
    }

    pub fn weight_mut(&mut self) -> &mut Parameter {
        &mut self.weight
    }

    pub fn bias_mut(&mut self) -> &mut Parameter {
        &mut self.bias
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        if input.cols() != self.input_dim() {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: self.weight.value().shape(),
            });
        }
        let mut out = input.matmul(self.weight.value())?;
        out.add_row_inplace(self.bias.value().data())?;
        Ok(out)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        if input.rows() != grad_output.rows() || grad_output.cols() != self.output_dim() {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: grad_output.shape(),
            });
        }
        let grad_w = input.transpose().matmul(grad_output)?;
        self.weight.accumulate_euclidean(&grad_w)?;

        let summed = grad_output.sum_axis0();
        let grad_b = Tensor::from_vec(1, summed.len(), summed)?;
        self.bias.accumulate_euclidean(&grad_b)?;

        grad_output.matmul(&self.weight.value().transpose())
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.weight)?;
        visitor(&self.bias)?;
        Ok(())
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.weight)?;
        visitor(&mut self.bias)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seeded(input: usize, output: usize) -> Linear {
        let mut layer = Linear::new("fc", input, output).unwrap();
        init::linear(&mut layer, &mut StdRng::seed_from_u64(3)).unwrap();
        layer
    }

    #[test]
    fn linear_forward_matches_manual() {
        let layer = seeded(3, 2);
        let input = Tensor::from_vec(1, 3, vec![1.0, -2.0, 0.5]).unwrap();
        let output = layer.forward(&input).unwrap();
        let mut expected = input.matmul(layer.weight.value()).unwrap();
        expected.add_row_inplace(layer.bias.value().data()).unwrap();
        assert_eq!(output, expected);
    }

    #[test]
    fn linear_backward_matches_finite_differences() {
        let mut layer = seeded(3, 2);
        let input = Tensor::from_vec(2, 3, vec![0.1, 0.2, -0.3, 0.4, -0.5, 0.6]).unwrap();
        // loss = sum(output), so dL/doutput is all ones.
        let ones = Tensor::full(2, 2, 1.0).unwrap();
        let grad_input = layer.backward(&input, &ones).unwrap();
        let grad_w = layer.weight().gradient().unwrap().clone();

        let loss = |layer: &Linear, input: &Tensor| -> f32 {
            layer.forward(input).unwrap().data().iter().sum()
        };
        let eps = 1e-2;
        let base = loss(&layer, &input);

        let mut bumped = input.clone();
        bumped.data_mut()[1] += eps;
        let numeric = (loss(&layer, &bumped) - base) / eps;
        assert!((numeric - grad_input.data()[1]).abs() < 1e-3);

        let mut probe = seeded(3, 2);
        probe.weight_mut().value_mut().data_mut()[0] += eps;
        let numeric_w = (loss(&probe, &input) - base) / eps;
        assert!((numeric_w - grad_w.data()[0]).abs() < 1e-3);
    }

    #[test]
    fn linear_rejects_wrong_width() {
        let layer = seeded(4, 2);
        let input = Tensor::zeros(2, 3).unwrap();
        assert!(layer.forward(&input).is_err());
    }
}
