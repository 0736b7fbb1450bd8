// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! End-to-end runs driven by an [`ExperimentConfig`]: one model per
//! `(coarsest, fine)` level pair and supplement portion, trained with
//! early-stopped checkpointing and scored on the test split.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use disagg_config::{ConfigError, DeterminismConfig, DeviceSelection, ExperimentConfig};
use tracing::{info, info_span, warn};

use crate::early_stopping::EarlyStopping;
use crate::error::ModelError;
use crate::evaluate::evaluate;
use crate::hierarchy::{LevelChain, Resolution};
use crate::io;
use crate::loader::{load_chain, LoadError, LoadedData, SourceLayout};
use crate::loss::MeanAbsoluteError;
use crate::model::{DisaggModel, ModelSpec};
use crate::module::Module;
use crate::optim;
use crate::train::Trainer;
use crate::TensorError;

#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<TensorError> for ExperimentError {
    fn from(err: TensorError) -> Self {
        ExperimentError::Model(ModelError::Tensor(err))
    }
}

/// Compute device the run executes on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    Cpu,
    Cuda,
}

/// Maps the configured device onto an available backend. Only the host
/// backend exists, so CUDA requests fall back to the CPU.
pub fn resolve_device(selection: DeviceSelection) -> Device {
    match selection {
        DeviceSelection::Auto | DeviceSelection::Cpu => Device::Cpu,
        DeviceSelection::Cuda => {
            warn!("CUDA requested but no accelerator backend is available; using the CPU");
            Device::Cpu
        }
    }
}

/// Outcome of training one variant.
#[derive(Clone, Debug, PartialEq)]
pub struct VariantReport {
    pub coarse: Resolution,
    pub fine: Resolution,
    pub portion: f32,
    pub epochs_run: usize,
    pub best_val_loss: f32,
    pub stopped_early: bool,
    pub checkpoint: PathBuf,
}

/// De-normalised test losses: one row per level pair, one column per
/// supplement portion.
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceTable {
    portions: Vec<f32>,
    rows: Vec<(String, Vec<f32>)>,
}

impl InferenceTable {
    pub fn new(portions: Vec<f32>) -> Self {
        Self {
            portions,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, label: impl Into<String>, losses: Vec<f32>) -> Result<(), TensorError> {
        if losses.len() != self.portions.len() {
            return Err(TensorError::DataLength {
                expected: self.portions.len(),
                got: losses.len(),
            });
        }
        self.rows.push((label.into(), losses));
        Ok(())
    }

    pub fn rows(&self) -> &[(String, Vec<f32>)] {
        &self.rows
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        for portion in &self.portions {
            let _ = write!(out, ",proportion_{portion}");
        }
        out.push('\n');
        for (label, losses) in &self.rows {
            out.push_str(label);
            for loss in losses {
                let _ = write!(out, ",{loss}");
            }
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<(), ExperimentError> {
        let io_err = |source: std::io::Error| ExperimentError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, self.to_csv()).map_err(io_err)
    }
}

pub struct ExperimentRunner {
    config: ExperimentConfig,
    chain: LevelChain,
    layout: SourceLayout,
    determinism: DeterminismConfig,
    device: Device,
}

impl ExperimentRunner {
    pub fn new(config: ExperimentConfig) -> Result<Self, ExperimentError> {
        config.validate()?;
        let chain = LevelChain::parse(&config.levels)?;
        let layout = SourceLayout::new(&config.source_path);
        let determinism = DeterminismConfig::from_env_or(config.seed);
        let device = resolve_device(config.device);
        Ok(Self {
            config,
            chain,
            layout,
            determinism,
            device,
        })
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Chain prefixes ending at each level finer than the input level.
    pub fn variants(&self) -> Result<Vec<LevelChain>, ExperimentError> {
        self.chain.levels()[1..]
            .iter()
            .map(|fine| self.chain.truncate_to(*fine).map_err(ExperimentError::from))
            .collect()
    }

    fn model_spec(&self, chain: &LevelChain, data: &LoadedData) -> Result<ModelSpec, ExperimentError> {
        let hidden = self.config.hidden_sizes_for(chain.finest().name())?.to_vec();
        Ok(ModelSpec {
            kind: self.config.kind,
            chain: chain.clone(),
            wiring: self.config.wiring,
            low_size: data.low_size(),
            high_size: data.high_size(),
            hidden_sizes: hidden,
            seed: self.determinism.base_seed,
        })
    }

    fn checkpoint_path(&self, chain: &LevelChain, portion: f32) -> PathBuf {
        self.config
            .checkpoint_path(chain.coarsest().name(), chain.finest().name(), portion)
    }

    /// Trains every variant and portion.
    pub fn train(&self) -> Result<Vec<VariantReport>, ExperimentError> {
        let mut reports = Vec::new();
        for chain in self.variants()? {
            let data = load_chain(
                &self.layout,
                &chain,
                self.config.wiring,
                self.determinism.base_seed,
            )?;
            for &portion in &self.config.supplement_portions {
                reports.push(self.train_variant(&chain, &data, portion)?);
            }
        }
        Ok(reports)
    }

    pub fn train_variant(
        &self,
        chain: &LevelChain,
        data: &LoadedData,
        portion: f32,
    ) -> Result<VariantReport, ExperimentError> {
        let span = info_span!("variant", chain = %chain, portion);
        let _enter = span.enter();

        let train = data.train.portion(portion)?;
        let mut model = DisaggModel::new(self.model_spec(chain, data)?, &data.linkages)?;
        let optimizer = optim::from_choice(self.config.optimizer, self.config.learning_rate)?;
        let mut trainer = Trainer::new(optimizer, self.config.batch_size);
        let mut stopper = EarlyStopping::new(self.config.tolerance);
        let mut criterion = MeanAbsoluteError::new();
        let checkpoint = self.checkpoint_path(chain, portion);
        info!(
            samples = train.len(),
            parameters = model.parameter_count()?,
            "training"
        );

        let mut epochs_run = 0;
        for epoch in 0..self.config.epochs {
            let report = trainer.train_epoch(&mut model, &train)?;
            let val = evaluate(&model, &data.val, self.config.batch_size, &mut criterion)?;
            epochs_run = epoch + 1;
            stopper.observe(val.loss);
            if stopper.should_save() {
                io::save(&model, &checkpoint, self.config.checkpoint_format)?;
            }
            info!(
                epoch,
                batches = report.batches,
                val_loss = val.loss,
                best = stopper.loss_min(),
                patience = stopper.counter(),
                "epoch"
            );
            if stopper.should_stop() {
                info!(epoch, "early stopping");
                break;
            }
        }

        Ok(VariantReport {
            coarse: chain.coarsest(),
            fine: chain.finest(),
            portion,
            epochs_run,
            best_val_loss: stopper.loss_min(),
            stopped_early: stopper.should_stop(),
            checkpoint,
        })
    }

    /// Reloads every checkpoint and tabulates de-normalised test losses.
    pub fn infer(&self) -> Result<InferenceTable, ExperimentError> {
        let mut table = InferenceTable::new(self.config.supplement_portions.clone());
        let mut criterion = MeanAbsoluteError::new();
        for chain in self.variants()? {
            let data = load_chain(
                &self.layout,
                &chain,
                self.config.wiring,
                self.determinism.base_seed,
            )?;
            let mut losses = Vec::with_capacity(self.config.supplement_portions.len());
            for &portion in &self.config.supplement_portions {
                let mut model = DisaggModel::new(self.model_spec(&chain, &data)?, &data.linkages)?;
                io::load(&mut model, self.checkpoint_path(&chain, portion), self.config.checkpoint_format)?;
                let eval = evaluate(&model, &data.test, self.config.batch_size, &mut criterion)?;
                let loss = eval.denormalized_loss(&data.normalizer);
                info!(chain = %chain, portion, test_loss = loss, "inference");
                losses.push(loss);
            }
            let label = format!("{}_{}", chain.coarsest(), chain.finest());
            table.push_row(label, losses)?;
        }
        Ok(table)
    }

    /// Runs [`ExperimentRunner::infer`] and writes the table to the
    /// configured output path.
    pub fn infer_to_csv(&self) -> Result<InferenceTable, ExperimentError> {
        let table = self.infer()?;
        table.write(&self.config.output_path)?;
        info!(path = %self.config.output_path.display(), "wrote inference table");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_has_one_column_per_portion() {
        let mut table = InferenceTable::new(vec![0.1, 0.5, 1.0]);
        table.push_row("puma_nta", vec![1.5, 1.25, 1.0]).unwrap();
        assert!(table.push_row("puma_tract", vec![1.0]).is_err());
        assert_eq!(
            table.to_csv(),
            ",proportion_0.1,proportion_0.5,proportion_1\npuma_nta,1.5,1.25,1\n"
        );
    }

    #[test]
    fn cuda_requests_fall_back_to_cpu() {
        assert_eq!(resolve_device(DeviceSelection::Cuda), Device::Cpu);
        assert_eq!(resolve_device(DeviceSelection::Auto), Device::Cpu);
    }

    #[test]
    fn variants_walk_every_finer_level() {
        let config = ExperimentConfig::from_json(
            r#"{ "source_path": "data", "levels": ["puma", "nta", "tract"] }"#,
        )
        .unwrap();
        let runner = ExperimentRunner::new(config).unwrap();
        let finest: Vec<_> = runner
            .variants()
            .unwrap()
            .iter()
            .map(|chain| chain.finest())
            .collect();
        assert_eq!(finest, vec![Resolution::Nta, Resolution::Tract]);
    }
}
