// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Parameter checkpoints as pretty JSON or bincode.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use disagg_config::CheckpointFormat;
use serde::{Deserialize, Serialize};

use crate::module::Module;
use crate::{PureResult, Tensor, TensorError};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct StoredTensor {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

/// On-disk layout: parameter name → tensor, sorted for stable diffs.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct Checkpoint {
    parameters: BTreeMap<String, StoredTensor>,
}

impl Checkpoint {
    fn capture<M: Module + ?Sized>(module: &M) -> PureResult<Self> {
        let parameters = module
            .state_dict()?
            .into_iter()
            .map(|(name, tensor)| {
                let (rows, cols) = tensor.shape();
                let stored = StoredTensor {
                    rows,
                    cols,
                    data: tensor.data().to_vec(),
                };
                (name, stored)
            })
            .collect();
        Ok(Self { parameters })
    }

    fn into_state(self) -> PureResult<HashMap<String, Tensor>> {
        self.parameters
            .into_iter()
            .map(|(name, stored)| Ok((name, Tensor::from_vec(stored.rows, stored.cols, stored.data)?)))
            .collect()
    }
}

fn io_error(err: std::io::Error) -> TensorError {
    TensorError::IoError {
        message: err.to_string(),
    }
}

fn serde_error(err: impl ToString) -> TensorError {
    TensorError::SerializationError {
        message: err.to_string(),
    }
}

fn create(path: &Path) -> PureResult<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    Ok(BufWriter::new(File::create(path).map_err(io_error)?))
}

fn open(path: &Path) -> PureResult<BufReader<File>> {
    Ok(BufReader::new(File::open(path).map_err(io_error)?))
}

/// Writes every parameter of `module` to `path`, creating parent directories.
pub fn save<M: Module + ?Sized>(
    module: &M,
    path: impl AsRef<Path>,
    format: CheckpointFormat,
) -> PureResult<()> {
    let checkpoint = Checkpoint::capture(module)?;
    let mut writer = create(path.as_ref())?;
    match format {
        CheckpointFormat::Json => {
            serde_json::to_writer_pretty(&mut writer, &checkpoint).map_err(serde_error)?
        }
        CheckpointFormat::Bincode => {
            bincode::serialize_into(&mut writer, &checkpoint).map_err(serde_error)?
        }
    }
    writer.flush().map_err(io_error)
}

/// Reads a checkpoint without applying it.
pub fn read_state(
    path: impl AsRef<Path>,
    format: CheckpointFormat,
) -> PureResult<HashMap<String, Tensor>> {
    let reader = open(path.as_ref())?;
    let checkpoint: Checkpoint = match format {
        CheckpointFormat::Json => serde_json::from_reader(reader).map_err(serde_error)?,
        CheckpointFormat::Bincode => bincode::deserialize_from(reader).map_err(serde_error)?,
    };
    checkpoint.into_state()
}

/// Restores `module` from `path`; every parameter must be present with its
/// current shape.
pub fn load<M: Module + ?Sized>(
    module: &mut M,
    path: impl AsRef<Path>,
    format: CheckpointFormat,
) -> PureResult<()> {
    let state = read_state(path, format)?;
    module.load_state_dict(&state)
}

pub fn save_json<M: Module + ?Sized>(module: &M, path: impl AsRef<Path>) -> PureResult<()> {
    save(module, path, CheckpointFormat::Json)
}

pub fn load_json<M: Module + ?Sized>(module: &mut M, path: impl AsRef<Path>) -> PureResult<()> {
    load(module, path, CheckpointFormat::Json)
}

pub fn save_bincode<M: Module + ?Sized>(module: &M, path: impl AsRef<Path>) -> PureResult<()> {
    save(module, path, CheckpointFormat::Bincode)
}

pub fn load_bincode<M: Module + ?Sized>(module: &mut M, path: impl AsRef<Path>) -> PureResult<()> {
    load(module, path, CheckpointFormat::Bincode)
}
