// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! `.npy` ingestion for attribute splits and linkage matrices.
//!
//! Layout under the source root:
//! `attributes/{level}_{split}.npy` (samples × units, optionally with a
//! trailing axis of width 1) and `linkages/{coarse}_{fine}.npy`
//! (coarse units × fine units). Both `f32` and `f64` payloads are accepted.
//! A source without split files may instead hold one `attributes/{level}.npy`
//! per level, which is shuffled and split at load time.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use ndarray::ArrayD;
use ndarray_npy::{read_npy, ReadNpyError};
use tracing::debug;

use crate::dataset::{DatasetSplits, DisaggDataset, Normalizer};
use crate::error::ModelError;
use crate::hierarchy::{LevelChain, Resolution};
use crate::linkage::{Linkage, LinkageSet};
use crate::reconstruction::{routes, Wiring};
use crate::{Tensor, TensorError};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Npy {
        path: PathBuf,
        #[source]
        source: ReadNpyError,
    },
    #[error("{path} has shape {shape:?}; expected samples × units")]
    Rank { path: PathBuf, shape: Vec<usize> },
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Val, Split::Test];

    pub fn name(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

fn decode_error(path: &Path, err: ReadNpyError) -> LoadError {
    match err {
        ReadNpyError::Io(source) => LoadError::Io {
            path: path.to_path_buf(),
            source,
        },
        source => LoadError::Npy {
            path: path.to_path_buf(),
            source,
        },
    }
}

/// Reads a 2-D matrix, folding a trailing unit axis.
pub fn read_matrix(path: impl AsRef<Path>) -> Result<Tensor, LoadError> {
    let path = path.as_ref();
    let array: ArrayD<f32> = match read_npy::<_, ArrayD<f32>>(path) {
        Ok(array) => array,
        Err(ReadNpyError::WrongDescriptor(_)) => read_npy::<_, ArrayD<f64>>(path)
            .map_err(|err| decode_error(path, err))?
            .mapv(|v| v as f32),
        Err(err) => return Err(decode_error(path, err)),
    };
    let (rows, cols) = match array.shape() {
        [rows, cols] => (*rows, *cols),
        [rows, cols, 1] => (*rows, *cols),
        shape => {
            return Err(LoadError::Rank {
                path: path.to_path_buf(),
                shape: shape.to_vec(),
            })
        }
    };
    Ok(Tensor::from_vec(rows, cols, array.iter().copied().collect())?)
}

/// Paths of one data source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceLayout {
    root: PathBuf,
}

impl SourceLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn attribute_path(&self, level: Resolution, split: Split) -> PathBuf {
        self.root
            .join("attributes")
            .join(format!("{}_{}.npy", level.name(), split.name()))
    }

    /// Unsplit attribute file, used when no split files exist.
    pub fn unsplit_path(&self, level: Resolution) -> PathBuf {
        self.root
            .join("attributes")
            .join(format!("{}.npy", level.name()))
    }

    pub fn linkage_path(&self, coarse: Resolution, fine: Resolution) -> PathBuf {
        self.root
            .join("linkages")
            .join(format!("{}_{}.npy", coarse.name(), fine.name()))
    }
}

/// Fraction of an unsplit source held out for testing.
pub const TEST_FRACTION: f32 = 0.2;
/// Fraction of an unsplit source held out for validation.
pub const VAL_FRACTION: f32 = 0.1;

/// Normalised splits and linkages for one level chain.
#[derive(Clone, Debug)]
pub struct LoadedData {
    pub train: DisaggDataset,
    pub val: DisaggDataset,
    pub test: DisaggDataset,
    pub normalizer: Normalizer,
    pub linkages: LinkageSet,
}

impl LoadedData {
    pub fn low_size(&self) -> usize {
        self.train.low().cols()
    }

    pub fn high_size(&self) -> usize {
        self.train.high().cols()
    }
}

/// Reads the chain's levels from `path_of`, skipping absent intermediate
/// levels that no reconstruction targets.
fn read_levels(
    chain: &LevelChain,
    needed_targets: &BTreeSet<Resolution>,
    path_of: impl Fn(Resolution) -> PathBuf,
) -> Result<DisaggDataset, LoadError> {
    let low = read_matrix(path_of(chain.coarsest()))?;
    let high = read_matrix(path_of(chain.finest()))?;
    let mut dataset = DisaggDataset::new(low, high)?;
    for &level in &chain.levels()[1..chain.len() - 1] {
        let path = path_of(level);
        if !path.exists() && !needed_targets.contains(&level) {
            debug!(path = %path.display(), "optional level target absent");
            continue;
        }
        dataset = dataset.with_level(level, read_matrix(&path)?)?;
    }
    Ok(dataset)
}

/// Loads the coarsest and finest levels of `chain` plus whatever
/// intermediate levels and linkages `wiring` needs. Optional files that are
/// absent are skipped; required ones fail the load.
///
/// When the source has no `train` file for the input level but does hold an
/// unsplit one, every level is read unsplit and divided with `seed`.
pub fn load_chain(
    layout: &SourceLayout,
    chain: &LevelChain,
    wiring: Wiring,
    seed: u64,
) -> Result<LoadedData, LoadError> {
    let needed = routes(wiring, chain);
    let needed_targets: BTreeSet<Resolution> = needed.iter().map(|(_, target)| *target).collect();

    let pre_split = layout.attribute_path(chain.coarsest(), Split::Train).exists();
    let raw = if !pre_split && layout.unsplit_path(chain.coarsest()).exists() {
        let whole = read_levels(chain, &needed_targets, |level| layout.unsplit_path(level))?;
        debug!(samples = whole.len(), seed, "splitting unsplit source");
        whole.split(TEST_FRACTION, VAL_FRACTION, seed)?
    } else {
        let read = |split: Split| {
            read_levels(chain, &needed_targets, |level| layout.attribute_path(level, split))
        };
        DatasetSplits {
            train: read(Split::Train)?,
            val: read(Split::Val)?,
            test: read(Split::Test)?,
        }
    };

    let normalizer = Normalizer::fit(&[raw.train.low(), raw.val.low(), raw.test.low()])?;
    let train = raw.train.normalized(&normalizer)?;
    let val = raw.val.normalized(&normalizer)?;
    let test = raw.test.normalized(&normalizer)?;

    let mut linkages = LinkageSet::new();
    for (coarse, fine) in chain.pairs() {
        let path = layout.linkage_path(coarse, fine);
        let required = needed.contains(&(fine, coarse));
        if !path.exists() && !required {
            continue;
        }
        linkages.insert(Linkage::new(coarse, fine, read_matrix(&path)?)?);
    }

    Ok(LoadedData {
        train,
        val,
        test,
        normalizer,
        linkages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};
    use ndarray_npy::write_npy;

    #[test]
    fn reads_f64_and_folds_trailing_axis() {
        let dir = tempfile::tempdir().unwrap();
        let flat = dir.path().join("flat.npy");
        write_npy(&flat, &Array2::<f64>::from_shape_fn((2, 3), |(r, c)| (r * 3 + c) as f64)).unwrap();
        let tensor = read_matrix(&flat).unwrap();
        assert_eq!(tensor.shape(), (2, 3));
        assert_eq!(tensor.data(), &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);

        let cube = dir.path().join("cube.npy");
        write_npy(&cube, &Array3::<f32>::from_elem((4, 2, 1), 0.5)).unwrap();
        assert_eq!(read_matrix(&cube).unwrap().shape(), (4, 2));

        let bad = dir.path().join("bad.npy");
        write_npy(&bad, &Array3::<f32>::zeros((2, 2, 2))).unwrap();
        assert!(matches!(read_matrix(&bad), Err(LoadError::Rank { .. })));
        assert!(matches!(
            read_matrix(dir.path().join("absent.npy")),
            Err(LoadError::Io { .. })
        ));
    }

    #[test]
    fn layout_paths_follow_level_names() {
        let layout = SourceLayout::new("data");
        assert_eq!(
            layout.attribute_path(Resolution::Nta, Split::Val),
            Path::new("data/attributes/nta_val.npy")
        );
        assert_eq!(
            layout.linkage_path(Resolution::Puma, Resolution::Tract),
            Path::new("data/linkages/puma_tract.npy")
        );
    }
}
