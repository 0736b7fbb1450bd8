//! JSON experiment description consumed by the training and inference drivers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::determinism::DEFAULT_SEED;

/// Errors raised while reading or validating an experiment file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Transformation used by every projector stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectorKind {
    /// Affine stages with ReLU between them.
    #[default]
    FeedForward,
    /// Single-layer LSTM stages with ReLU between them.
    Recurrent,
}

/// Which reconstructions the model emits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionWiring {
    /// The finest level reconstructs every coarser level.
    #[default]
    BottomUp,
    /// Every level above the first reconstructs every coarser level.
    Full,
    /// Every level above the first reconstructs its direct parent.
    Bridge,
    /// No reconstructions; only the top-level prediction is supervised.
    Supervised,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceSelection {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerChoice {
    #[default]
    Adam,
    Sgd,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointFormat {
    Json,
    #[default]
    Bincode,
}

impl CheckpointFormat {
    /// File extension used for checkpoints in this format.
    pub fn extension(self) -> &'static str {
        match self {
            CheckpointFormat::Json => "json",
            CheckpointFormat::Bincode => "bin",
        }
    }
}

fn default_batch_size() -> usize {
    32
}

fn default_supplement_portions() -> Vec<f32> {
    vec![1.0]
}

fn default_epochs() -> usize {
    500
}

fn default_learning_rate() -> f32 {
    1e-3
}

fn default_tolerance() -> usize {
    20
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_levels() -> Vec<String> {
    vec!["puma".into(), "nta".into()]
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("model_state")
}

fn default_output_path() -> PathBuf {
    PathBuf::from("inferences/results.csv")
}

/// Experiment description loaded once per process.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Root holding `attributes/` and `linkages/`.
    pub source_path: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Fractions of the training split used for each trained variant.
    #[serde(default = "default_supplement_portions")]
    pub supplement_portions: Vec<f32>,
    #[serde(default)]
    pub device: DeviceSelection,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f32,
    #[serde(default)]
    pub optimizer: OptimizerChoice,
    /// Early-stopping tolerance in epochs.
    #[serde(default = "default_tolerance")]
    pub tolerance: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default)]
    pub kind: ProjectorKind,
    #[serde(default)]
    pub wiring: ReconstructionWiring,
    /// Resolution chain, coarsest first. The first entry is the model input.
    #[serde(default = "default_levels")]
    pub levels: Vec<String>,
    /// Hidden widths keyed by the target (finest) level of each variant.
    #[serde(default)]
    pub hidden_sizes: BTreeMap<String, Vec<usize>>,
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(default)]
    pub checkpoint_format: CheckpointFormat,
}

impl ExperimentConfig {
    /// Reads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parses and validates a configuration from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: ExperimentConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: "must be at least 1".into(),
            });
        }
        if self.supplement_portions.is_empty() {
            return Err(ConfigError::Invalid {
                field: "supplement_portions",
                reason: "at least one portion is required".into(),
            });
        }
        if let Some(bad) = self
            .supplement_portions
            .iter()
            .find(|p| !(**p > 0.0 && **p <= 1.0))
        {
            return Err(ConfigError::Invalid {
                field: "supplement_portions",
                reason: format!("{bad} is outside (0, 1]"),
            });
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ConfigError::Invalid {
                field: "learning_rate",
                reason: format!("{} is not a positive finite rate", self.learning_rate),
            });
        }
        if self.tolerance == 0 {
            return Err(ConfigError::Invalid {
                field: "tolerance",
                reason: "must be at least 1".into(),
            });
        }
        if self.levels.len() < 2 {
            return Err(ConfigError::Invalid {
                field: "levels",
                reason: "a coarse input level and at least one finer level are required".into(),
            });
        }
        Ok(())
    }

    /// Hidden widths configured for the variant whose finest level is `target`.
    pub fn hidden_sizes_for(&self, target: &str) -> Result<&[usize], ConfigError> {
        self.hidden_sizes
            .get(target)
            .map(Vec::as_slice)
            .ok_or_else(|| ConfigError::Invalid {
                field: "hidden_sizes",
                reason: format!("no hidden widths configured for target level `{target}`"),
            })
    }

    /// Checkpoint path for one `(coarse, fine, portion)` variant.
    pub fn checkpoint_path(&self, coarse: &str, fine: &str, portion: f32) -> PathBuf {
        self.model_dir.join(format!(
            "disagg_{coarse}_{fine}_{portion}.{}",
            self.checkpoint_format.extension()
        ))
    }
}
