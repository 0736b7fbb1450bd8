// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Fixed membership matrices between nested resolutions.
//!
//! A linkage is laid out `(coarse units × fine units)`; row `c` marks (or
//! weights) the fine units that aggregate into coarse unit `c`. Linkages are
//! never trained or mutated and are shared through `Arc` by every model and
//! batch that needs them.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{ModelError, ModelResult};
use crate::hierarchy::{LevelChain, Resolution};
use crate::{PureResult, Tensor};

#[derive(Debug, Clone, PartialEq)]
pub struct Linkage {
    coarse: Resolution,
    fine: Resolution,
    matrix: Tensor,
    transpose: Tensor,
}

impl Linkage {
    pub fn new(coarse: Resolution, fine: Resolution, matrix: Tensor) -> ModelResult<Self> {
        if coarse >= fine {
            return Err(ModelError::InvalidLinkage {
                coarse,
                fine,
                reason: "the coarse level must precede the fine level".into(),
            });
        }
        if let Some(bad) = matrix.data().iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(ModelError::InvalidLinkage {
                coarse,
                fine,
                reason: format!("entries must be finite and non-negative, found {bad}"),
            });
        }
        let transpose = matrix.transpose();
        Ok(Self {
            coarse,
            fine,
            matrix,
            transpose,
        })
    }

    /// Binary linkage from a fine-unit → coarse-unit assignment.
    pub fn from_membership(
        coarse: Resolution,
        fine: Resolution,
        coarse_units: usize,
        parent_of: &[usize],
    ) -> ModelResult<Self> {
        if let Some(&bad) = parent_of.iter().find(|&&p| p >= coarse_units) {
            return Err(ModelError::InvalidLinkage {
                coarse,
                fine,
                reason: format!("parent index {bad} exceeds {coarse_units} coarse units"),
            });
        }
        let matrix = Tensor::from_fn(coarse_units, parent_of.len(), |row, col| {
            if parent_of[col] == row {
                1.0
            } else {
                0.0
            }
        })?;
        Self::new(coarse, fine, matrix)
    }

    /// Chains `coarse→mid` with `mid→fine` into `coarse→fine`.
    pub fn compose(&self, next: &Linkage) -> ModelResult<Linkage> {
        if self.fine != next.coarse {
            return Err(ModelError::InvalidLinkage {
                coarse: self.coarse,
                fine: next.fine,
                reason: format!("cannot compose through {} and {}", self.fine, next.coarse),
            });
        }
        Linkage::new(self.coarse, next.fine, self.matrix.matmul(&next.matrix)?)
    }

    pub fn coarse(&self) -> Resolution {
        self.coarse
    }

    pub fn fine(&self) -> Resolution {
        self.fine
    }

    pub fn coarse_units(&self) -> usize {
        self.matrix.rows()
    }

    pub fn fine_units(&self) -> usize {
        self.matrix.cols()
    }

    pub fn matrix(&self) -> &Tensor {
        &self.matrix
    }

    /// Whether every entry is 0 or 1.
    pub fn is_binary(&self) -> bool {
        self.matrix.data().iter().all(|v| *v == 0.0 || *v == 1.0)
    }

    /// Coarse estimate implied by a fine-level batch:
    /// `(batch, fine) × (fine, coarse) → (batch, coarse)`. Purely linear.
    pub fn reconstruct(&self, fine_repr: &Tensor) -> PureResult<Tensor> {
        fine_repr.matmul(&self.transpose)
    }

    /// Gradient of [`Linkage::reconstruct`] with respect to its fine input.
    pub fn backward(&self, grad_coarse: &Tensor) -> PureResult<Tensor> {
        grad_coarse.matmul(&self.matrix)
    }
}

/// Linkages keyed by their `(coarse, fine)` pair.
#[derive(Debug, Clone, Default)]
pub struct LinkageSet {
    links: BTreeMap<(Resolution, Resolution), Arc<Linkage>>,
}

impl LinkageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from matrices listed in [`LevelChain::pairs`] order.
    pub fn from_ordered(chain: &LevelChain, matrices: Vec<Tensor>) -> ModelResult<Self> {
        let pairs = chain.pairs();
        if pairs.len() != matrices.len() {
            return Err(ModelError::LinkageArity {
                levels: chain.len(),
                expected: pairs.len(),
                got: matrices.len(),
            });
        }
        let mut set = Self::new();
        for ((coarse, fine), matrix) in pairs.into_iter().zip(matrices) {
            set.insert(Linkage::new(coarse, fine, matrix)?);
        }
        Ok(set)
    }

    pub fn insert(&mut self, linkage: Linkage) -> Arc<Linkage> {
        self.insert_shared(Arc::new(linkage))
    }

    pub fn insert_shared(&mut self, linkage: Arc<Linkage>) -> Arc<Linkage> {
        self.links
            .insert((linkage.coarse(), linkage.fine()), Arc::clone(&linkage));
        linkage
    }

    pub fn get(&self, coarse: Resolution, fine: Resolution) -> Option<&Arc<Linkage>> {
        self.links.get(&(coarse, fine))
    }

    pub fn require(&self, coarse: Resolution, fine: Resolution) -> ModelResult<Arc<Linkage>> {
        self.get(coarse, fine)
            .cloned()
            .ok_or(ModelError::MissingLinkage { coarse, fine })
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Linkage>> {
        self.links.values()
    }
}
