//! Ambient configuration shared by the disaggregation crates: explicit
//! seeding, tracing subscriber setup, and the JSON experiment description.

pub mod determinism;
pub mod experiment;
pub mod tracing;

pub use determinism::{DeterminismConfig, DEFAULT_SEED};
pub use experiment::{
    CheckpointFormat, ConfigError, DeviceSelection, ExperimentConfig, OptimizerChoice,
    ProjectorKind, ReconstructionWiring,
};
