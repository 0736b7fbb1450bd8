// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::module::{Module, Parameter};
use crate::{PureResult, Tensor, TensorError};
use std::cell::RefCell;

fn sigmoid(value: f32) -> f32 {
    1.0 / (1.0 + (-value).exp())
}

/// Single-layer LSTM operating on sequences laid out along the batch axis.
///
/// Each row of the input is one timestep whose feature vector spans the
/// spatial units of a resolution level. Hidden and cell state start from zero
/// on every forward call. Gate blocks are ordered input, forget, cell, output.
#[derive(Debug)]
pub struct Lstm {
    input_dim: usize,
    hidden_dim: usize,
    weight_ih: Parameter,
    weight_hh: Parameter,
    bias_ih: Parameter,
    bias_hh: Parameter,
    cache: RefCell<Option<LstmCache>>,
}

#[derive(Debug, Clone)]
struct LstmCache {
    inputs: Vec<f32>,
    gates_i: Vec<f32>,
    gates_f: Vec<f32>,
    gates_g: Vec<f32>,
    gates_o: Vec<f32>,
    hidden_states: Vec<f32>,
    cell_states: Vec<f32>,
    timesteps: usize,
}

impl LstmCache {
    fn new(timesteps: usize, input_dim: usize, hidden_dim: usize) -> Self {
        Self {
            inputs: vec![0.0f32; timesteps * input_dim],
            gates_i: vec![0.0f32; timesteps * hidden_dim],
            gates_f: vec![0.0f32; timesteps * hidden_dim],
            gates_g: vec![0.0f32; timesteps * hidden_dim],
            gates_o: vec![0.0f32; timesteps * hidden_dim],
            hidden_states: vec![0.0f32; (timesteps + 1) * hidden_dim],
            cell_states: vec![0.0f32; (timesteps + 1) * hidden_dim],
            timesteps,
        }
    }
}

impl Lstm {
    /// Creates a new LSTM layer with zeroed parameters; see [`crate::init::lstm`].
    pub fn new(name: impl Into<String>, input_dim: usize, hidden_dim: usize) -> PureResult<Self> {
        if input_dim == 0 || hidden_dim == 0 {
            return Err(TensorError::InvalidDimensions {
                rows: input_dim,
                cols: hidden_dim,
            });
        }
        let name = name.into();
        Ok(Self {
            input_dim,
            hidden_dim,
            weight_ih: Parameter::new(
                format!("{name}::weight_ih"),
                Tensor::zeros(input_dim, 4 * hidden_dim)?,
            ),
            weight_hh: Parameter::new(
                format!("{name}::weight_hh"),
                Tensor::zeros(hidden_dim, 4 * hidden_dim)?,
            ),
            bias_ih: Parameter::new(format!("{name}::bias_ih"), Tensor::zeros(1, 4 * hidden_dim)?),
            bias_hh: Parameter::new(format!("{name}::bias_hh"), Tensor::zeros(1, 4 * hidden_dim)?),
            cache: RefCell::new(None),
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn hidden_dim(&self) -> usize {
        self.hidden_dim
    }

    pub(crate) fn parameters_mut(&mut self) -> [&mut Parameter; 4] {
        [
            &mut self.weight_ih,
            &mut self.weight_hh,
            &mut self.bias_ih,
            &mut self.bias_hh,
        ]
    }

    /// Forward pass that leaves no backward cache behind.
    pub fn infer(&self, input: &Tensor) -> PureResult<Tensor> {
        self.run(input, None)
    }

    /// Drops any cache left by a tracked forward pass.
    pub fn clear_cache(&self) {
        self.cache.borrow_mut().take();
    }

    fn guard_input(&self, input: &Tensor) -> PureResult<()> {
        let (rows, cols) = input.shape();
        if cols != self.input_dim {
            return Err(TensorError::ShapeMismatch {
                left: (rows, cols),
                right: (rows, self.input_dim),
            });
        }
        Ok(())
    }

    fn run(&self, input: &Tensor, mut cache: Option<&mut LstmCache>) -> PureResult<Tensor> {
        self.guard_input(input)?;
        let (timesteps, _) = input.shape();
        let hidden_dim = self.hidden_dim;
        let input_dim = self.input_dim;
        let gate_width = 4 * hidden_dim;
        let mut output = vec![0.0f32; timesteps * hidden_dim];
        let mut hidden_prev = vec![0.0f32; hidden_dim];
        let mut cell_prev = vec![0.0f32; hidden_dim];
        let weight_ih = self.weight_ih.value().data();
        let weight_hh = self.weight_hh.value().data();
        let bias_ih = self.bias_ih.value().data();
        let bias_hh = self.bias_hh.value().data();
        let mut gates = vec![0.0f32; gate_width];
        for t in 0..timesteps {
            let input_slice = input.row(t)?;
            for (gate, value) in gates.iter_mut().enumerate() {
                *value = bias_ih[gate] + bias_hh[gate];
            }
            for (idx, x) in input_slice.iter().enumerate() {
                let row = &weight_ih[idx * gate_width..(idx + 1) * gate_width];
                for (value, w) in gates.iter_mut().zip(row) {
                    *value += x * w;
                }
            }
            for (idx, h) in hidden_prev.iter().enumerate() {
                let row = &weight_hh[idx * gate_width..(idx + 1) * gate_width];
                for (value, w) in gates.iter_mut().zip(row) {
                    *value += h * w;
                }
            }
            for unit in 0..hidden_dim {
                let gi = sigmoid(gates[unit]);
                let gf = sigmoid(gates[hidden_dim + unit]);
                let gg = gates[2 * hidden_dim + unit].tanh();
                let go = sigmoid(gates[3 * hidden_dim + unit]);
                let cell = gf * cell_prev[unit] + gi * gg;
                let hidden = go * cell.tanh();
                if let Some(cache) = cache.as_deref_mut() {
                    cache.gates_i[t * hidden_dim + unit] = gi;
                    cache.gates_f[t * hidden_dim + unit] = gf;
                    cache.gates_g[t * hidden_dim + unit] = gg;
                    cache.gates_o[t * hidden_dim + unit] = go;
                    cache.cell_states[(t + 1) * hidden_dim + unit] = cell;
                    cache.hidden_states[(t + 1) * hidden_dim + unit] = hidden;
                }
                cell_prev[unit] = cell;
                hidden_prev[unit] = hidden;
                output[t * hidden_dim + unit] = hidden;
            }
            if let Some(cache) = cache.as_deref_mut() {
                cache.inputs[t * input_dim..(t + 1) * input_dim].copy_from_slice(input_slice);
            }
        }
        Tensor::from_vec(timesteps, hidden_dim, output)
    }
}

impl Module for Lstm {
    fn forward(&self, input: &Tensor) -> PureResult<Tensor> {
        let mut cache = LstmCache::new(input.rows(), self.input_dim, self.hidden_dim);
        let output = self.run(input, Some(&mut cache))?;
        *self.cache.borrow_mut() = Some(cache);
        Ok(output)
    }

    fn backward(&mut self, input: &Tensor, grad_output: &Tensor) -> PureResult<Tensor> {
        self.guard_input(input)?;
        if grad_output.rows() != input.rows() || grad_output.cols() != self.hidden_dim {
            return Err(TensorError::ShapeMismatch {
                left: grad_output.shape(),
                right: (input.rows(), self.hidden_dim),
            });
        }
        let cache = self
            .cache
            .borrow_mut()
            .take()
            .ok_or(TensorError::InvalidValue {
                label: "lstm_cache_missing",
            })?;
        if cache.timesteps != input.rows() {
            return Err(TensorError::ShapeMismatch {
                left: input.shape(),
                right: (cache.timesteps, self.input_dim),
            });
        }
        let timesteps = cache.timesteps;
        let input_dim = self.input_dim;
        let hidden_dim = self.hidden_dim;
        let gate_width = 4 * hidden_dim;
        let weight_ih = self.weight_ih.value().data();
        let weight_hh = self.weight_hh.value().data();
        let mut grad_input = vec![0.0f32; timesteps * input_dim];
        let mut grad_w_ih = vec![0.0f32; input_dim * gate_width];
        let mut grad_w_hh = vec![0.0f32; hidden_dim * gate_width];
        let mut grad_b = vec![0.0f32; gate_width];
        let mut grad_h_next = vec![0.0f32; hidden_dim];
        let mut grad_c_next = vec![0.0f32; hidden_dim];
        let mut gate_grad = vec![0.0f32; gate_width];
        for step in (0..timesteps).rev() {
            let grad_hidden_slice = grad_output.row(step)?;
            let prev_hidden = &cache.hidden_states[step * hidden_dim..(step + 1) * hidden_dim];
            let prev_cell = &cache.cell_states[step * hidden_dim..(step + 1) * hidden_dim];
            let curr_cell = &cache.cell_states[(step + 1) * hidden_dim..(step + 2) * hidden_dim];
            for unit in 0..hidden_dim {
                let dh = grad_hidden_slice[unit] + grad_h_next[unit];
                let o = cache.gates_o[step * hidden_dim + unit];
                let i = cache.gates_i[step * hidden_dim + unit];
                let f = cache.gates_f[step * hidden_dim + unit];
                let g = cache.gates_g[step * hidden_dim + unit];
                let tanh_c = curr_cell[unit].tanh();
                let do_gate = dh * tanh_c * o * (1.0 - o);
                let dc = dh * o * (1.0 - tanh_c * tanh_c) + grad_c_next[unit];
                let di = dc * g * i * (1.0 - i);
                let dg = dc * i * (1.0 - g * g);
                let df = dc * prev_cell[unit] * f * (1.0 - f);
                grad_c_next[unit] = dc * f;
                gate_grad[unit] = di;
                gate_grad[hidden_dim + unit] = df;
                gate_grad[2 * hidden_dim + unit] = dg;
                gate_grad[3 * hidden_dim + unit] = do_gate;
            }
            for (acc, g) in grad_b.iter_mut().zip(&gate_grad) {
                *acc += g;
            }
            let step_input = &cache.inputs[step * input_dim..(step + 1) * input_dim];
            for input_idx in 0..input_dim {
                let row = input_idx * gate_width;
                let mut acc = 0.0f32;
                for gate in 0..gate_width {
                    acc += gate_grad[gate] * weight_ih[row + gate];
                    grad_w_ih[row + gate] += step_input[input_idx] * gate_grad[gate];
                }
                grad_input[step * input_dim + input_idx] = acc;
            }
            for hidden_idx in 0..hidden_dim {
                let row = hidden_idx * gate_width;
                let mut acc = 0.0f32;
                for gate in 0..gate_width {
                    acc += gate_grad[gate] * weight_hh[row + gate];
                    grad_w_hh[row + gate] += prev_hidden[hidden_idx] * gate_grad[gate];
                }
                grad_h_next[hidden_idx] = acc;
            }
        }
        let grad_w_ih = Tensor::from_vec(input_dim, gate_width, grad_w_ih)?;
        let grad_w_hh = Tensor::from_vec(hidden_dim, gate_width, grad_w_hh)?;
        let grad_b = Tensor::from_vec(1, gate_width, grad_b)?;
        self.weight_ih.accumulate_euclidean(&grad_w_ih)?;
        self.weight_hh.accumulate_euclidean(&grad_w_hh)?;
        self.bias_ih.accumulate_euclidean(&grad_b)?;
        self.bias_hh.accumulate_euclidean(&grad_b)?;
        Tensor::from_vec(timesteps, input_dim, grad_input)
    }

    fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&self.weight_ih)?;
        visitor(&self.weight_hh)?;
        visitor(&self.bias_ih)?;
        visitor(&self.bias_hh)
    }

    fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> PureResult<()>,
    ) -> PureResult<()> {
        visitor(&mut self.weight_ih)?;
        visitor(&mut self.weight_hh)?;
        visitor(&mut self.bias_ih)?;
        visitor(&mut self.bias_hh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seeded(input: usize, hidden: usize) -> Lstm {
        let mut lstm = Lstm::new("lstm", input, hidden).unwrap();
        init::lstm(&mut lstm, &mut StdRng::seed_from_u64(11)).unwrap();
        lstm
    }

    #[test]
    fn lstm_forward_produces_hidden_sequence() {
        let lstm = seeded(2, 3);
        let input = Tensor::from_vec(4, 2, vec![0.1, 0.2, -0.3, 0.4, 0.5, -0.6, 0.7, 0.8]).unwrap();
        let output = lstm.forward(&input).unwrap();
        assert_eq!(output.shape(), (4, 3));
        assert!(output.is_finite());
    }

    #[test]
    fn lstm_state_resets_between_calls() {
        let lstm = seeded(2, 3);
        let input = Tensor::from_vec(2, 2, vec![0.3, -0.1, 0.9, 0.2]).unwrap();
        let first = lstm.forward(&input).unwrap();
        let second = lstm.forward(&input).unwrap();
        assert_eq!(first, second);
        assert_eq!(lstm.infer(&input).unwrap(), first);
    }

    #[test]
    fn lstm_backward_matches_finite_differences() {
        let mut lstm = seeded(3, 2);
        let input =
            Tensor::from_vec(3, 3, vec![0.2, -0.1, 0.3, 0.4, -0.5, 0.6, -0.2, 0.1, 0.7]).unwrap();
        let ones = Tensor::full(3, 2, 1.0).unwrap();
        let _ = lstm.forward(&input).unwrap();
        let grad_input = lstm.backward(&input, &ones).unwrap();
        assert_eq!(grad_input.shape(), (3, 3));
        assert!(lstm.weight_ih.gradient().is_some());
        assert!(lstm.bias_hh.gradient().is_some());

        let eps = 1e-3;
        let sum = |lstm: &Lstm, input: &Tensor| -> f32 {
            lstm.infer(input).unwrap().data().iter().sum()
        };
        let mut plus = input.clone();
        plus.data_mut()[4] += eps;
        let mut minus = input.clone();
        minus.data_mut()[4] -= eps;
        let numeric = (sum(&lstm, &plus) - sum(&lstm, &minus)) / (2.0 * eps);
        assert!((numeric - grad_input.data()[4]).abs() < 1e-2);
    }

    #[test]
    fn backward_without_forward_is_an_error() {
        let mut lstm = seeded(2, 2);
        let input = Tensor::zeros(1, 2).unwrap();
        let grad = Tensor::zeros(1, 2).unwrap();
        assert!(lstm.backward(&input, &grad).is_err());
    }
}
