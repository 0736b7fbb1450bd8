// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Maps fine level representations back onto coarser levels through the
//! fixed linkages so the objective can score hierarchical coherence.

use std::sync::Arc;

pub use disagg_config::ReconstructionWiring as Wiring;

use crate::error::{ModelError, ModelResult};
use crate::hierarchy::{LevelChain, Resolution};
use crate::linkage::{Linkage, LinkageSet};
use crate::projector::Projection;
use crate::{PureResult, Tensor, TensorError};

/// Coarse estimate derived from a finer representation.
#[derive(Clone, Debug, PartialEq)]
pub struct Reconstruction {
    /// Level whose representation was aggregated.
    pub source: Resolution,
    /// Coarser level the estimate is compared against.
    pub target: Resolution,
    pub tensor: Tensor,
}

/// `(source, target)` routes a wiring emits, in evaluation order.
pub fn routes(wiring: Wiring, chain: &LevelChain) -> Vec<(Resolution, Resolution)> {
    let levels = chain.levels();
    let finest = chain.finest();
    match wiring {
        Wiring::Supervised => Vec::new(),
        Wiring::BottomUp => levels[..levels.len() - 1]
            .iter()
            .map(|target| (finest, *target))
            .collect(),
        Wiring::Full => levels
            .iter()
            .enumerate()
            .skip(1)
            .flat_map(|(idx, source)| levels[..idx].iter().map(move |target| (*source, *target)))
            .collect(),
        Wiring::Bridge => levels
            .windows(2)
            .map(|pair| (pair[1], pair[0]))
            .collect(),
    }
}

#[derive(Debug, Clone)]
struct Route {
    source: usize,
    linkage: Arc<Linkage>,
}

#[derive(Debug, Clone)]
pub struct ReconstructionHead {
    wiring: Wiring,
    chain: LevelChain,
    routes: Vec<Route>,
}

impl ReconstructionHead {
    /// Resolves the linkage of every route the wiring needs.
    pub fn new(wiring: Wiring, chain: LevelChain, linkages: &LinkageSet) -> ModelResult<Self> {
        let mut resolved = Vec::new();
        for (source, target) in routes(wiring, &chain) {
            let linkage = linkages.require(target, source)?;
            let source = chain
                .position(source)
                .ok_or(ModelError::ResolutionNotInChain(source))?;
            resolved.push(Route { source, linkage });
        }
        Ok(Self {
            wiring,
            chain,
            routes: resolved,
        })
    }

    pub fn wiring(&self) -> Wiring {
        self.wiring
    }

    /// Number of reconstructions produced per forward pass.
    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn linkages(&self) -> impl Iterator<Item = &Arc<Linkage>> {
        self.routes.iter().map(|route| &route.linkage)
    }

    pub fn reconstruct(&self, projection: &Projection) -> PureResult<Vec<Reconstruction>> {
        let levels = projection.levels();
        self.routes
            .iter()
            .map(|route| {
                let source = &levels[route.source];
                Ok(Reconstruction {
                    source: source.resolution,
                    target: route.linkage.coarse(),
                    tensor: route.linkage.reconstruct(&source.tensor)?,
                })
            })
            .collect()
    }

    /// Gradients on each chain level's representation induced by the
    /// reconstruction gradients, one per route in [`routes`] order.
    pub fn backward(&self, grads: &[Tensor]) -> PureResult<Vec<Option<Tensor>>> {
        if grads.len() != self.routes.len() {
            return Err(TensorError::DataLength {
                expected: self.routes.len(),
                got: grads.len(),
            });
        }
        let mut per_level: Vec<Option<Tensor>> = vec![None; self.chain.len()];
        for (route, grad) in self.routes.iter().zip(grads) {
            let spread = route.linkage.backward(grad)?;
            match per_level[route.source].as_mut() {
                Some(existing) => existing.add_scaled(&spread, 1.0)?,
                None => per_level[route.source] = Some(spread),
            }
        }
        Ok(per_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hierarchy::Depth;

    #[test]
    fn wirings_enumerate_their_routes() {
        use Resolution::*;
        let chain = Depth::Four.canonical_chain();
        assert_eq!(
            routes(Wiring::BottomUp, &chain),
            vec![(Block, Puma), (Block, Nta), (Block, Tract)]
        );
        assert_eq!(
            routes(Wiring::Bridge, &chain),
            vec![(Nta, Puma), (Tract, Nta), (Block, Tract)]
        );
        assert_eq!(routes(Wiring::Full, &chain).len(), 6);
        assert!(routes(Wiring::Supervised, &chain).is_empty());
        let two = Depth::Two.canonical_chain();
        for wiring in [Wiring::BottomUp, Wiring::Full, Wiring::Bridge] {
            assert_eq!(routes(wiring, &two), vec![(Nta, Puma)]);
        }
    }

    #[test]
    fn missing_linkage_is_reported() {
        let chain = Depth::Three.canonical_chain();
        let mut set = LinkageSet::new();
        set.insert(
            Linkage::from_membership(Resolution::Puma, Resolution::Tract, 1, &[0, 0]).unwrap(),
        );
        let err = ReconstructionHead::new(Wiring::BottomUp, chain.clone(), &set).unwrap_err();
        assert_eq!(
            err,
            ModelError::MissingLinkage {
                coarse: Resolution::Nta,
                fine: Resolution::Tract
            }
        );
        let supervised = ReconstructionHead::new(Wiring::Supervised, chain, &set).unwrap();
        assert_eq!(supervised.route_count(), 0);
    }

    #[test]
    fn backward_sums_routes_sharing_a_source() {
        let chain = Depth::Three.canonical_chain();
        let mut set = LinkageSet::new();
        set.insert(Linkage::from_membership(Resolution::Puma, Resolution::Tract, 1, &[0, 0]).unwrap());
        set.insert(Linkage::from_membership(Resolution::Nta, Resolution::Tract, 2, &[0, 1]).unwrap());
        let head = ReconstructionHead::new(Wiring::BottomUp, chain, &set).unwrap();
        let grads = vec![
            Tensor::from_vec(1, 1, vec![1.0]).unwrap(),
            Tensor::from_vec(1, 2, vec![0.5, -0.5]).unwrap(),
        ];
        let per_level = head.backward(&grads).unwrap();
        assert!(per_level[0].is_none() && per_level[1].is_none());
        assert_eq!(per_level[2].as_ref().unwrap().data(), &[1.5, 0.5]);
        assert!(head.backward(&grads[..1]).is_err());
    }
}
