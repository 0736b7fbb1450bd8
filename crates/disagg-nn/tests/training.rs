// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use disagg_nn::{
    evaluate, CoherenceObjective, Depth, DisaggDataset, DisaggModel, EarlyStopping, GradMode,
    Linkage, LinkageSet, MeanAbsoluteError, ModelSpec, Normalizer, Resolution, Sgd, StageKind,
    Tensor, Trainer,
};

/// Nested chain puma(2) → nta(4) → tract(6) → block(8) with every pairwise
/// linkage and targets that aggregate exactly.
fn consistent_hierarchy() -> (LinkageSet, DisaggDataset) {
    let nta = Linkage::from_membership(Resolution::Puma, Resolution::Nta, 2, &[0, 0, 1, 1]).unwrap();
    let tract =
        Linkage::from_membership(Resolution::Nta, Resolution::Tract, 4, &[0, 1, 1, 2, 3, 3]).unwrap();
    let block = Linkage::from_membership(
        Resolution::Tract,
        Resolution::Block,
        6,
        &[0, 0, 1, 2, 3, 4, 5, 5],
    )
    .unwrap();
    let puma_tract = nta.compose(&tract).unwrap();
    let puma_block = puma_tract.compose(&block).unwrap();
    let nta_block = tract.compose(&block).unwrap();

    let blocks = Tensor::from_fn(8, 8, |r, c| 0.1 + 0.05 * ((r * 3 + c * 5) % 7) as f32).unwrap();
    let tracts = block.reconstruct(&blocks).unwrap();
    let ntas = nta_block.reconstruct(&blocks).unwrap();
    let pumas = puma_block.reconstruct(&blocks).unwrap();

    let normalizer = Normalizer::fit(&[&pumas]).unwrap();
    let dataset = DisaggDataset::new(pumas, blocks)
        .unwrap()
        .with_level(Resolution::Nta, ntas)
        .unwrap()
        .with_level(Resolution::Tract, tracts)
        .unwrap()
        .normalized(&normalizer)
        .unwrap();

    let mut set = LinkageSet::new();
    for linkage in [nta, puma_tract, puma_block, tract, nta_block, block] {
        set.insert(linkage);
    }
    (set, dataset)
}

#[test]
fn one_recurrent_step_lowers_the_objective() {
    let (linkages, dataset) = consistent_hierarchy();
    let spec = ModelSpec::new(StageKind::Recurrent, Depth::Four, 2, 8, vec![4, 6]);
    let mut model = DisaggModel::new(spec, &linkages).unwrap();
    assert_eq!(model.reconstruction_count(), 3);

    let batch = dataset.batch(0, 8).unwrap();
    let mut objective = CoherenceObjective::default();
    let score = |model: &DisaggModel, objective: &mut CoherenceObjective| {
        let output = model.run(&batch.low, GradMode::Disabled).unwrap();
        objective.evaluate(&output, &batch, Resolution::Puma).unwrap().total
    };
    let before = score(&model, &mut objective);

    let mut trainer = Trainer::new(Box::new(Sgd::new(0.01).unwrap()), 8);
    let value = trainer.train_step(&mut model, &batch).unwrap();
    assert!((value.total - before).abs() < 1e-5);

    let after = score(&model, &mut objective);
    assert!(after < before, "objective rose from {before} to {after}");
}

#[test]
fn evaluation_matches_a_single_full_batch() {
    let (linkages, dataset) = consistent_hierarchy();
    let spec = ModelSpec::new(StageKind::FeedForward, Depth::Four, 2, 8, vec![4, 6]);
    let model = DisaggModel::new(spec, &linkages).unwrap();
    let mut mae = MeanAbsoluteError::new();
    let chunked = evaluate(&model, &dataset, 3, &mut mae).unwrap();
    let whole = evaluate(&model, &dataset, 8, &mut mae).unwrap();
    assert_eq!(chunked.predictions, whole.predictions);
    assert!((chunked.loss - whole.loss).abs() < 1e-6);
}

#[test]
fn normalisation_round_trips() {
    let low = Tensor::from_vec(2, 3, vec![3.0, 9.0, 1.5, 0.0, 4.0, 7.0]).unwrap();
    let val = Tensor::from_vec(1, 3, vec![12.0, 2.0, 5.0]).unwrap();
    let normalizer = Normalizer::fit(&[&low, &val]).unwrap();
    assert_eq!(normalizer.max(), 12.0);
    let round = normalizer
        .denormalize(&normalizer.normalize(&low).unwrap())
        .unwrap();
    for (a, b) in round.data().iter().zip(low.data()) {
        assert!((a - b).abs() < 1e-5);
    }
}

#[test]
fn strictly_decreasing_losses_never_stop() {
    let mut stopper = EarlyStopping::new(3);
    for step in 0..50 {
        stopper.observe(10.0 - step as f32 * 0.1);
        assert!(stopper.should_save());
        assert!(!stopper.should_stop());
    }
}

#[test]
fn repeated_worse_losses_stop_at_the_tolerance() {
    let tolerance = 4;
    let mut stopper = EarlyStopping::new(tolerance);
    stopper.observe(1.0);
    for worse in 1..=tolerance {
        assert!(!stopper.should_stop());
        stopper.observe(2.0);
        assert!(!stopper.should_save());
        assert_eq!(stopper.counter(), worse);
    }
    assert!(stopper.should_stop());
}
