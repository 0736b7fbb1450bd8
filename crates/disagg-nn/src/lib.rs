// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Hierarchical spatial disaggregation with coherence reconciliation.
//!
//! A coarse attribute batch is lifted level by level through a
//! [`HierarchicalProjector`] to the finest resolution, and the
//! [`ReconstructionHead`] folds fine representations back onto coarser levels
//! through fixed linkage matrices. Training minimises the supervised
//! top-level loss together with the mean coherence loss of every
//! reconstruction.

pub mod dataset;
pub mod early_stopping;
pub mod error;
pub mod evaluate;
pub mod experiment;
pub mod hierarchy;
pub mod init;
pub mod io;
pub mod layers;
pub mod linkage;
pub mod loader;
pub mod loss;
pub mod model;
pub mod module;
pub mod objective;
pub mod optim;
pub mod projector;
pub mod reconstruction;
pub mod train;

pub use dataset::{Batch, DatasetSplits, DisaggDataset, Normalizer};
pub use early_stopping::EarlyStopping;
pub use error::{ModelError, ModelResult};
pub use evaluate::{evaluate, Evaluation};
pub use experiment::{Device, ExperimentError, ExperimentRunner, InferenceTable, VariantReport};
pub use hierarchy::{Depth, LevelChain, Resolution};
pub use io::{load, load_bincode, load_json, save, save_bincode, save_json};
pub use layers::{Linear, Lstm, Relu};
pub use linkage::{Linkage, LinkageSet};
pub use loader::{load_chain, read_matrix, LoadError, LoadedData, SourceLayout, Split};
pub use loss::{Loss, MeanAbsoluteError};
pub use model::{DisaggModel, ModelOutput, ModelSpec, OutputGradients};
pub use module::{Module, Parameter};
pub use objective::{CoherenceObjective, ObjectiveValue};
pub use optim::{Adam, Optimizer, Sgd};
pub use projector::{GradMode, HierarchicalProjector, LevelRepresentation, Projection, StageKind};
pub use reconstruction::{Reconstruction, ReconstructionHead, Wiring};
pub use train::{EpochReport, Trainer};

pub use disagg_tensor::{PureResult, Tensor, TensorError};
