// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Nested census geographies and the depth variants built on them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Geographic resolution, coarsest first.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Puma,
    Nta,
    Tract,
    Block,
    Extreme,
}

impl Resolution {
    /// Every resolution, coarsest first.
    pub const ALL: [Resolution; 5] = [
        Resolution::Puma,
        Resolution::Nta,
        Resolution::Tract,
        Resolution::Block,
        Resolution::Extreme,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Resolution::Puma => "puma",
            Resolution::Nta => "nta",
            Resolution::Tract => "tract",
            Resolution::Block => "block",
            Resolution::Extreme => "extreme",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Resolution {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Resolution::ALL
            .into_iter()
            .find(|r| r.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ModelError::UnknownResolution(s.to_string()))
    }
}

/// Number of hierarchy levels a model projects through, named after the
/// deepest target resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Depth {
    /// puma → nta
    Two,
    /// puma → nta → tract
    Three,
    /// puma → nta → tract → block
    Four,
    /// puma → nta → tract → block → extreme
    Five,
}

impl Depth {
    pub fn levels(self) -> usize {
        match self {
            Depth::Two => 2,
            Depth::Three => 3,
            Depth::Four => 4,
            Depth::Five => 5,
        }
    }

    pub fn from_levels(levels: usize) -> Result<Self, ModelError> {
        match levels {
            2 => Ok(Depth::Two),
            3 => Ok(Depth::Three),
            4 => Ok(Depth::Four),
            5 => Ok(Depth::Five),
            other => Err(ModelError::UnsupportedDepth { levels: other }),
        }
    }

    /// Hidden widths a variant expects. The two-level variant has no
    /// intermediate level but still takes one width so every variant shares
    /// the same argument shape.
    pub fn hidden_arity(self) -> usize {
        self.levels().saturating_sub(2).max(1)
    }

    /// Hidden widths the variant actually consumes.
    pub fn consumed_hidden(self) -> usize {
        self.levels() - 2
    }

    /// The canonical census chain for this depth.
    pub fn canonical_chain(self) -> LevelChain {
        LevelChain {
            levels: Resolution::ALL[..self.levels()].to_vec(),
        }
    }
}

/// Ordered resolutions a model walks through, coarsest first.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LevelChain {
    levels: Vec<Resolution>,
}

impl LevelChain {
    /// Builds a chain, rejecting unsorted or duplicate levels and unsupported
    /// lengths.
    pub fn new(levels: Vec<Resolution>) -> Result<Self, ModelError> {
        Depth::from_levels(levels.len())?;
        if levels.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ModelError::UnorderedChain(levels));
        }
        Ok(Self { levels })
    }

    /// Parses level names such as `["puma", "nta", "tract"]`.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, ModelError> {
        let levels = names
            .iter()
            .map(|name| name.as_ref().parse())
            .collect::<Result<Vec<Resolution>, _>>()?;
        Self::new(levels)
    }

    /// Prefix of the chain ending at `target`.
    pub fn truncate_to(&self, target: Resolution) -> Result<Self, ModelError> {
        let position = self
            .position(target)
            .ok_or(ModelError::ResolutionNotInChain(target))?;
        Self::new(self.levels[..=position].to_vec())
    }

    pub fn depth(&self) -> Depth {
        match self.levels.len() {
            2 => Depth::Two,
            3 => Depth::Three,
            4 => Depth::Four,
            _ => Depth::Five,
        }
    }

    pub fn levels(&self) -> &[Resolution] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Input (coarsest) resolution.
    pub fn coarsest(&self) -> Resolution {
        self.levels[0]
    }

    /// Target (finest) resolution.
    pub fn finest(&self) -> Resolution {
        self.levels[self.levels.len() - 1]
    }

    pub fn position(&self, resolution: Resolution) -> Option<usize> {
        self.levels.iter().position(|r| *r == resolution)
    }

    /// Every `(coarse, fine)` pair in combination order:
    /// `(0,1), (0,2), …, (1,2), …`.
    pub fn pairs(&self) -> Vec<(Resolution, Resolution)> {
        let mut pairs = Vec::new();
        for (i, coarse) in self.levels.iter().enumerate() {
            for fine in &self.levels[i + 1..] {
                pairs.push((*coarse, *fine));
            }
        }
        pairs
    }
}

impl fmt::Display for LevelChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.levels.iter().map(|r| r.name()).collect();
        f.write_str(&names.join("→"))
    }
}
