// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Pure Rust row-major tensors.
//!
//! Attribute batches are laid out as `(samples, spatial units)`: the trailing
//! single-feature axis of the census attribute arrays is folded away, so every
//! hierarchy level, linkage matrix, and parameter fits in a 2-D tensor.

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use std::sync::Arc;

/// Result alias used throughout the tensor and model crates.
pub type PureResult<T> = Result<T, TensorError>;

/// Errors emitted by tensor utilities and the modules built on top of them.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TensorError {
    /// A tensor constructor received an invalid shape.
    #[error("invalid tensor dimensions ({rows} x {cols}); both axes must be non-zero")]
    InvalidDimensions { rows: usize, cols: usize },
    /// Data provided to a constructor or operator does not match the tensor shape.
    #[error("data length mismatch: expected {expected}, got {got}")]
    DataLength { expected: usize, got: usize },
    /// An operator was asked to combine tensors of incompatible shapes.
    #[error("shape mismatch: left={left:?}, right={right:?} cannot be combined")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },
    /// Learning rate must be positive for optimisers.
    #[error("learning rate must be positive, got {rate}")]
    NonPositiveLearningRate { rate: f32 },
    /// Computation received an empty input which would otherwise trigger a panic.
    #[error("{0} must not be empty for this computation")]
    EmptyInput(&'static str),
    /// Attempted to load or update a parameter that was missing from the state dict.
    #[error("parameter '{name}' is missing from the state dict")]
    MissingParameter { name: String },
    /// Wrapper around I/O failures when persisting or restoring tensors.
    #[error("i/o error: {message}")]
    IoError { message: String },
    /// Wrapper around serde failures when (de)serialising tensors.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
    /// Numeric guard detected a non-finite value that would otherwise propagate NaNs.
    #[error("{label} produced a non-finite value ({value})")]
    NonFiniteValue { label: &'static str, value: f32 },
    /// Generic configuration violation.
    #[error("invalid value for {label}")]
    InvalidValue { label: &'static str },
}

/// A simple 2D tensor backed by a reference-counted row-major buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor {
    data: Arc<Vec<f32>>,
    rows: usize,
    cols: usize,
}

impl Tensor {
    fn from_parts(rows: usize, cols: usize, data: Vec<f32>) -> PureResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        let expected = rows * cols;
        if expected != data.len() {
            return Err(TensorError::DataLength {
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            data: Arc::new(data),
            rows,
            cols,
        })
    }

    fn guard_same_shape(&self, other: &Tensor) -> PureResult<()> {
        if self.shape() != other.shape() {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        Ok(())
    }

    /// Create a tensor filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> PureResult<Self> {
        Self::from_parts(rows, cols, vec![0.0; rows * cols])
    }

    /// Create a tensor where every element equals `value`.
    pub fn full(rows: usize, cols: usize, value: f32) -> PureResult<Self> {
        Self::from_parts(rows, cols, vec![value; rows * cols])
    }

    /// Create a tensor from raw data. The provided vector must match
    /// `rows * cols` elements.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> PureResult<Self> {
        Self::from_parts(rows, cols, data)
    }

    /// Construct a tensor by sampling a uniform distribution in `[min, max)`.
    pub fn random_uniform(
        rows: usize,
        cols: usize,
        min: f32,
        max: f32,
        rng: &mut StdRng,
    ) -> PureResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        if !(min < max) {
            return Err(TensorError::InvalidValue {
                label: "random_uniform_bounds",
            });
        }
        let distribution = Uniform::new(min, max);
        let data = (0..rows * cols)
            .map(|_| distribution.sample(&mut *rng))
            .collect();
        Self::from_parts(rows, cols, data)
    }

    /// Construct a tensor by sampling a normal distribution with the provided
    /// mean and standard deviation.
    pub fn random_normal(
        rows: usize,
        cols: usize,
        mean: f32,
        std: f32,
        rng: &mut StdRng,
    ) -> PureResult<Self> {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        if std <= 0.0 || !std.is_finite() {
            return Err(TensorError::InvalidValue {
                label: "random_normal_std",
            });
        }
        let data = (0..rows * cols)
            .map(|_| {
                let sample: f64 = StandardNormal.sample(&mut *rng);
                mean + std * sample as f32
            })
            .collect();
        Self::from_parts(rows, cols, data)
    }

    /// Construct a tensor by applying a generator function to each coordinate.
    pub fn from_fn<F>(rows: usize, cols: usize, mut f: F) -> PureResult<Self>
    where
        F: FnMut(usize, usize) -> f32,
    {
        if rows == 0 || cols == 0 {
            return Err(TensorError::InvalidDimensions { rows, cols });
        }
        let mut data = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                data.push(f(r, c));
            }
        }
        Self::from_parts(rows, cols, data)
    }

    /// Returns the `(rows, cols)` pair of the tensor.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Number of rows (samples for attribute batches).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns (spatial units for attribute batches).
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Total number of elements stored in the tensor.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    /// Tensors are never empty; constructors reject zero-sized axes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Returns a read-only view of the row-major buffer.
    pub fn data(&self) -> &[f32] {
        self.data.as_slice()
    }

    /// Returns a mutable view of the row-major buffer, cloning it if shared.
    pub fn data_mut(&mut self) -> &mut [f32] {
        Arc::make_mut(&mut self.data).as_mut_slice()
    }

    /// Borrows a single row.
    pub fn row(&self, index: usize) -> PureResult<&[f32]> {
        if index >= self.rows {
            return Err(TensorError::ShapeMismatch {
                left: (index + 1, self.cols),
                right: self.shape(),
            });
        }
        let start = index * self.cols;
        Ok(&self.data[start..start + self.cols])
    }

    /// Matrix multiply (`self @ other`).
    pub fn matmul(&self, other: &Tensor) -> PureResult<Tensor> {
        if self.cols != other.rows {
            return Err(TensorError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        let (rows, inner, cols) = (self.rows, self.cols, other.cols);
        let mut out = vec![0.0f32; rows * cols];
        let lhs = self.data();
        let rhs = other.data();
        for r in 0..rows {
            let out_row = &mut out[r * cols..(r + 1) * cols];
            for k in 0..inner {
                let a = lhs[r * inner + k];
                if a == 0.0 {
                    continue;
                }
                let rhs_row = &rhs[k * cols..(k + 1) * cols];
                for (o, b) in out_row.iter_mut().zip(rhs_row) {
                    *o += a * b;
                }
            }
        }
        Tensor::from_parts(rows, cols, out)
    }

    /// Element-wise addition.
    pub fn add(&self, other: &Tensor) -> PureResult<Tensor> {
        self.guard_same_shape(other)?;
        let data = self.data.iter().zip(other.data.iter()).map(|(a, b)| a + b);
        Tensor::from_parts(self.rows, self.cols, data.collect())
    }

    /// Element-wise subtraction.
    pub fn sub(&self, other: &Tensor) -> PureResult<Tensor> {
        self.guard_same_shape(other)?;
        let data = self.data.iter().zip(other.data.iter()).map(|(a, b)| a - b);
        Tensor::from_parts(self.rows, self.cols, data.collect())
    }

    /// Returns a new tensor where every element is scaled by `value`.
    pub fn scale(&self, value: f32) -> PureResult<Tensor> {
        let data = self.data.iter().map(|a| a * value).collect();
        Tensor::from_parts(self.rows, self.cols, data)
    }

    /// Element-wise product (Hadamard) between two tensors of identical shape.
    pub fn hadamard(&self, other: &Tensor) -> PureResult<Tensor> {
        self.guard_same_shape(other)?;
        let data = self.data.iter().zip(other.data.iter()).map(|(a, b)| a * b);
        Tensor::from_parts(self.rows, self.cols, data.collect())
    }

    /// Add a scaled tensor to this tensor (`self += scale * other`).
    pub fn add_scaled(&mut self, other: &Tensor, scale: f32) -> PureResult<()> {
        self.guard_same_shape(other)?;
        let data = Arc::make_mut(&mut self.data);
        for (a, b) in data.iter_mut().zip(other.data.iter()) {
            *a += scale * b;
        }
        Ok(())
    }

    /// Add the provided row vector to every row (`self[row] += bias`).
    pub fn add_row_inplace(&mut self, bias: &[f32]) -> PureResult<()> {
        if bias.len() != self.cols {
            return Err(TensorError::DataLength {
                expected: self.cols,
                got: bias.len(),
            });
        }
        let cols = self.cols;
        let data = Arc::make_mut(&mut self.data);
        for row in data.chunks_mut(cols) {
            for (value, b) in row.iter_mut().zip(bias) {
                *value += b;
            }
        }
        Ok(())
    }

    /// Returns `max(self, 0)` element-wise.
    pub fn relu(&self) -> Tensor {
        let data = self.data.iter().map(|v| v.max(0.0)).collect();
        Tensor {
            data: Arc::new(data),
            rows: self.rows,
            cols: self.cols,
        }
    }

    /// Masks `grad_output` with the ReLU derivative evaluated at `self`.
    pub fn relu_backward(&self, grad_output: &Tensor) -> PureResult<Tensor> {
        self.guard_same_shape(grad_output)?;
        let data = self
            .data
            .iter()
            .zip(grad_output.data.iter())
            .map(|(z, g)| if *z > 0.0 { *g } else { 0.0 })
            .collect();
        Tensor::from_parts(self.rows, self.cols, data)
    }

    /// Returns the transpose of the tensor.
    pub fn transpose(&self) -> Tensor {
        let mut data = vec![0.0f32; self.len()];
        for r in 0..self.rows {
            for c in 0..self.cols {
                data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        Tensor {
            data: Arc::new(data),
            rows: self.cols,
            cols: self.rows,
        }
    }

    /// Returns the sum over rows for each column.
    pub fn sum_axis0(&self) -> Vec<f32> {
        let mut sums = vec![0.0; self.cols];
        for row in self.data.chunks(self.cols) {
            for (s, v) in sums.iter_mut().zip(row) {
                *s += v;
            }
        }
        sums
    }

    /// Largest element of the tensor.
    pub fn max_value(&self) -> f32 {
        self.data.iter().copied().fold(f32::NEG_INFINITY, f32::max)
    }

    /// Returns `true` when every element is finite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Computes the squared L2 norm of the tensor.
    pub fn squared_l2_norm(&self) -> f32 {
        self.data.iter().map(|v| v * v).sum()
    }

    /// Copies rows `start..end` into a new tensor.
    pub fn slice_rows(&self, start: usize, end: usize) -> PureResult<Tensor> {
        if start >= end || end > self.rows {
            return Err(TensorError::ShapeMismatch {
                left: (end.saturating_sub(start), self.cols),
                right: self.shape(),
            });
        }
        let data = self.data[start * self.cols..end * self.cols].to_vec();
        Tensor::from_parts(end - start, self.cols, data)
    }

    /// Gathers the listed rows, in order, into a new tensor.
    pub fn select_rows(&self, indices: &[usize]) -> PureResult<Tensor> {
        if indices.is_empty() {
            return Err(TensorError::EmptyInput("Tensor::select_rows"));
        }
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &index in indices {
            data.extend_from_slice(self.row(index)?);
        }
        Tensor::from_parts(indices.len(), self.cols, data)
    }

    /// Concatenates tensors row-wise producing a new tensor whose row count is the sum
    /// of the inputs while preserving the shared column dimension.
    pub fn cat_rows(tensors: &[Tensor]) -> PureResult<Tensor> {
        let Some(first) = tensors.first() else {
            return Err(TensorError::EmptyInput("Tensor::cat_rows"));
        };
        let cols = first.cols;
        let mut total_rows = 0usize;
        for tensor in tensors {
            if tensor.cols != cols {
                return Err(TensorError::ShapeMismatch {
                    left: tensor.shape(),
                    right: (tensor.rows, cols),
                });
            }
            total_rows += tensor.rows;
        }
        let mut data = Vec::with_capacity(total_rows * cols);
        for tensor in tensors {
            data.extend_from_slice(tensor.data());
        }
        Tensor::from_parts(total_rows, cols, data)
    }
}

/// Computes the mean absolute error between `predictions` and `targets`.
pub fn mean_absolute_error(predictions: &Tensor, targets: &Tensor) -> PureResult<f32> {
    predictions.guard_same_shape(targets)?;
    let sum: f32 = predictions
        .data()
        .iter()
        .zip(targets.data())
        .map(|(p, t)| (p - t).abs())
        .sum();
    Ok(sum / predictions.len() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn matmul_matches_manual_product() {
        let a = Tensor::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let b = Tensor::from_vec(3, 2, vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]).unwrap();
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.shape(), (2, 2));
        assert_eq!(c.data(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn matmul_rejects_mismatched_inner_dimension() {
        let a = Tensor::zeros(2, 3).unwrap();
        let b = Tensor::zeros(2, 3).unwrap();
        assert!(matches!(
            a.matmul(&b),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn transpose_swaps_axes() {
        let a = Tensor::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let t = a.transpose();
        assert_eq!(t.shape(), (3, 2));
        assert_eq!(t.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(t.transpose(), a);
    }

    #[test]
    fn relu_backward_masks_non_positive_inputs() {
        let z = Tensor::from_vec(1, 4, vec![-1.0, 0.0, 0.5, 2.0]).unwrap();
        let g = Tensor::from_vec(1, 4, vec![1.0, 1.0, 1.0, 1.0]).unwrap();
        assert_eq!(z.relu().data(), &[0.0, 0.0, 0.5, 2.0]);
        assert_eq!(z.relu_backward(&g).unwrap().data(), &[0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn cat_and_slice_preserve_row_order() {
        let a = Tensor::from_vec(1, 2, vec![1.0, 2.0]).unwrap();
        let b = Tensor::from_vec(2, 2, vec![3.0, 4.0, 5.0, 6.0]).unwrap();
        let joined = Tensor::cat_rows(&[a.clone(), b]).unwrap();
        assert_eq!(joined.shape(), (3, 2));
        assert_eq!(joined.slice_rows(0, 1).unwrap(), a);
        let picked = joined.select_rows(&[2, 0]).unwrap();
        assert_eq!(picked.data(), &[5.0, 6.0, 1.0, 2.0]);
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let mut first = StdRng::seed_from_u64(100);
        let mut second = StdRng::seed_from_u64(100);
        let a = Tensor::random_normal(3, 4, 0.0, 0.01, &mut first).unwrap();
        let b = Tensor::random_normal(3, 4, 0.0, 0.01, &mut second).unwrap();
        assert_eq!(a, b);
        let u = Tensor::random_uniform(3, 4, -0.5, 0.5, &mut first).unwrap();
        assert!(u.data().iter().all(|v| (-0.5..0.5).contains(v)));
    }

    #[test]
    fn absolute_error_reduces_to_the_mean() {
        let p = Tensor::from_vec(1, 2, vec![1.0, -1.0]).unwrap();
        let t = Tensor::from_vec(1, 2, vec![0.0, 0.0]).unwrap();
        assert!((mean_absolute_error(&p, &t).unwrap() - 1.0).abs() < 1e-6);
        let mismatched = Tensor::zeros(2, 1).unwrap();
        assert!(mean_absolute_error(&p, &mismatched).is_err());
    }
}
