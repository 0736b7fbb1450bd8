// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use crate::hierarchy::Resolution;
use crate::TensorError;

pub type ModelResult<T> = Result<T, ModelError>;

/// Construction and wiring failures of the disaggregation models.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("unknown resolution `{0}`")]
    UnknownResolution(String),
    #[error("hierarchies span 2 to 5 levels, got {levels}")]
    UnsupportedDepth { levels: usize },
    #[error("levels must be strictly coarse-to-fine, got {0:?}")]
    UnorderedChain(Vec<Resolution>),
    #[error("resolution {0} is not part of the chain")]
    ResolutionNotInChain(Resolution),
    #[error("a {levels}-level model needs {expected} hidden widths, got {got}")]
    HiddenSizeArity {
        levels: usize,
        expected: usize,
        got: usize,
    },
    #[error("layer widths must be non-zero")]
    ZeroWidth,
    #[error("a {levels}-level model needs {expected} linkage matrices, got {got}")]
    LinkageArity {
        levels: usize,
        expected: usize,
        got: usize,
    },
    #[error("missing {coarse}→{fine} linkage")]
    MissingLinkage {
        coarse: Resolution,
        fine: Resolution,
    },
    #[error("{coarse}→{fine} linkage has shape {got:?} but the levels need {expected:?}")]
    LinkageShape {
        coarse: Resolution,
        fine: Resolution,
        expected: (usize, usize),
        got: (usize, usize),
    },
    #[error("linkage {coarse}→{fine} is invalid: {reason}")]
    InvalidLinkage {
        coarse: Resolution,
        fine: Resolution,
        reason: String,
    },
    #[error("no ground truth for level {0} in this batch")]
    MissingLevelTarget(Resolution),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}
