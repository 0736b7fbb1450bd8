// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{seq::SliceRandom, SeedableRng};

use crate::error::{ModelError, ModelResult};
use crate::hierarchy::Resolution;
use crate::{PureResult, Tensor, TensorError};

/// Rows of every level for one contiguous slice of samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub low: Tensor,
    pub high: Tensor,
    levels: BTreeMap<Resolution, Tensor>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.low.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.low.rows() == 0
    }

    /// Ground truth of an intermediate level, when the split carries it.
    pub fn level(&self, resolution: Resolution) -> Option<&Tensor> {
        self.levels.get(&resolution)
    }

    /// Ground truth a reconstruction of `target` is scored against. The
    /// input level's truth is the input itself.
    pub fn truth_for(&self, target: Resolution, input_level: Resolution) -> ModelResult<&Tensor> {
        if target == input_level {
            return Ok(&self.low);
        }
        self.level(target)
            .ok_or(ModelError::MissingLevelTarget(target))
    }
}

/// Low-resolution inputs paired with the high-resolution target and any
/// intermediate-level targets. Rows are samples.
#[derive(Clone, Debug, PartialEq)]
pub struct DisaggDataset {
    low: Tensor,
    high: Tensor,
    levels: BTreeMap<Resolution, Tensor>,
}

/// Train/validation/test partitions of one dataset.
#[derive(Clone, Debug)]
pub struct DatasetSplits {
    pub train: DisaggDataset,
    pub val: DisaggDataset,
    pub test: DisaggDataset,
}

impl DisaggDataset {
    pub fn new(low: Tensor, high: Tensor) -> PureResult<Self> {
        if low.rows() != high.rows() {
            return Err(TensorError::ShapeMismatch {
                left: low.shape(),
                right: high.shape(),
            });
        }
        Ok(Self {
            low,
            high,
            levels: BTreeMap::new(),
        })
    }

    /// Attaches the ground truth of an intermediate level.
    pub fn with_level(mut self, resolution: Resolution, target: Tensor) -> PureResult<Self> {
        if target.rows() != self.low.rows() {
            return Err(TensorError::ShapeMismatch {
                left: self.low.shape(),
                right: target.shape(),
            });
        }
        self.levels.insert(resolution, target);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.low.rows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn low(&self) -> &Tensor {
        &self.low
    }

    pub fn high(&self) -> &Tensor {
        &self.high
    }

    pub fn level(&self, resolution: Resolution) -> Option<&Tensor> {
        self.levels.get(&resolution)
    }

    pub fn level_resolutions(&self) -> impl Iterator<Item = Resolution> + '_ {
        self.levels.keys().copied()
    }

    /// Samples `[start, end)` as one batch.
    pub fn batch(&self, start: usize, end: usize) -> PureResult<Batch> {
        let levels = self
            .levels
            .iter()
            .map(|(resolution, tensor)| Ok((*resolution, tensor.slice_rows(start, end)?)))
            .collect::<PureResult<BTreeMap<_, _>>>()?;
        Ok(Batch {
            low: self.low.slice_rows(start, end)?,
            high: self.high.slice_rows(start, end)?,
            levels,
        })
    }

    /// Non-overlapping batches in sample order; the last one may be short.
    pub fn batches(&self, batch_size: usize) -> PureResult<Batches<'_>> {
        if batch_size == 0 {
            return Err(TensorError::InvalidValue {
                label: "batch_size",
            });
        }
        Ok(Batches {
            dataset: self,
            batch_size,
            cursor: 0,
        })
    }

    pub fn select(&self, indices: &[usize]) -> PureResult<Self> {
        let levels = self
            .levels
            .iter()
            .map(|(resolution, tensor)| Ok((*resolution, tensor.select_rows(indices)?)))
            .collect::<PureResult<BTreeMap<_, _>>>()?;
        Ok(Self {
            low: self.low.select_rows(indices)?,
            high: self.high.select_rows(indices)?,
            levels,
        })
    }

    /// Shuffles with `seed`, then carves off the test and validation
    /// fractions (rounded up); the remainder trains.
    pub fn split(&self, test: f32, val: f32, seed: u64) -> PureResult<DatasetSplits> {
        let valid = |f: f32| f > 0.0 && f < 1.0;
        if !valid(test) || !valid(val) || test + val >= 1.0 {
            return Err(TensorError::InvalidValue {
                label: "split fractions",
            });
        }
        let total = self.len();
        let n_test = (total as f32 * test).ceil() as usize;
        let n_val = (total as f32 * val).ceil() as usize;
        if n_test + n_val >= total {
            return Err(TensorError::EmptyInput("training split"));
        }
        let mut order: Vec<usize> = (0..total).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        Ok(DatasetSplits {
            test: self.select(&order[..n_test])?,
            val: self.select(&order[n_test..n_test + n_val])?,
            train: self.select(&order[n_test + n_val..])?,
        })
    }

    /// Leading `fraction` of the samples, rounded up.
    pub fn portion(&self, fraction: f32) -> PureResult<Self> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(TensorError::InvalidValue {
                label: "supplement portion",
            });
        }
        let keep = ((self.len() as f32 * fraction).ceil() as usize).min(self.len());
        let indices: Vec<usize> = (0..keep).collect();
        self.select(&indices)
    }

    /// Scales every level by the normaliser.
    pub fn normalized(&self, normalizer: &Normalizer) -> PureResult<Self> {
        let levels = self
            .levels
            .iter()
            .map(|(resolution, tensor)| Ok((*resolution, normalizer.normalize(tensor)?)))
            .collect::<PureResult<BTreeMap<_, _>>>()?;
        Ok(Self {
            low: normalizer.normalize(&self.low)?,
            high: normalizer.normalize(&self.high)?,
            levels,
        })
    }
}

/// Iterator over [`DisaggDataset::batches`].
pub struct Batches<'a> {
    dataset: &'a DisaggDataset,
    batch_size: usize,
    cursor: usize,
}

impl Iterator for Batches<'_> {
    type Item = PureResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.dataset.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.dataset.len());
        let batch = self.dataset.batch(self.cursor, end);
        self.cursor = end;
        Some(batch)
    }
}

/// Global max scaling shared by every level of one experiment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Normalizer {
    max: f32,
}

impl Normalizer {
    pub fn new(max: f32) -> PureResult<Self> {
        if !max.is_finite() {
            return Err(TensorError::NonFiniteValue {
                label: "normalizer max",
                value: max,
            });
        }
        if max <= 0.0 {
            return Err(TensorError::InvalidValue {
                label: "normalizer max must be positive",
            });
        }
        Ok(Self { max })
    }

    /// Max over every supplied low-resolution split.
    pub fn fit(splits: &[&Tensor]) -> PureResult<Self> {
        let max = splits
            .iter()
            .map(|t| t.max_value())
            .fold(None, |acc: Option<f32>, v| Some(acc.map_or(v, |a| a.max(v))))
            .ok_or(TensorError::EmptyInput("normalizer splits"))?;
        Self::new(max)
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn normalize(&self, tensor: &Tensor) -> PureResult<Tensor> {
        tensor.scale(1.0 / self.max)
    }

    pub fn denormalize(&self, tensor: &Tensor) -> PureResult<Tensor> {
        tensor.scale(self.max)
    }

    pub fn denormalize_value(&self, value: f32) -> f32 {
        value * self.max
    }
}
