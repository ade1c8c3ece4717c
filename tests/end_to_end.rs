//! Full training runs on small graphs.

use gnae::prelude::*;
use std::collections::HashSet;

fn one_hot(n: usize) -> Vec<Vec<f32>> {
    (0..n)
        .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
        .collect()
}

/// Ring of `cliques` cliques with `size` nodes each
fn ring_of_cliques(cliques: usize, size: usize) -> Graph {
    let mut edges = Vec::new();
    for c in 0..cliques {
        let base = c * size;
        for i in 0..size {
            for j in (i + 1)..size {
                edges.push((base + i, base + j));
            }
        }
        edges.push((base + size - 1, ((c + 1) % cliques) * size));
    }
    Graph::new(one_hot(cliques * size), edges, &Device::Cpu).unwrap()
}

fn mean(values: &[f32]) -> f32 {
    values.iter().sum::<f32>() / values.len() as f32
}

#[test]
fn plain_model_on_path_graph() {
    let graph = Graph::new(one_hot(4), vec![(0, 1), (1, 2), (2, 3)], &Device::Cpu).unwrap();

    let mut config = TrainConfig::default();
    config.model = ModelKind::Plain;
    config.training_rate = 0.8;
    config.epochs = 50;
    config.channels = 8;

    let mut trainer = Trainer::new(config, graph).unwrap();
    let split = trainer.bundle().split.clone();
    assert_eq!(split.val_pos.len(), 1);
    assert_eq!(split.test_pos.len(), 1);
    assert_eq!(split.train_pos.len(), 1);

    let summary = trainer.run().unwrap();
    assert_eq!(summary.history.len(), 49);

    let losses: Vec<f32> = summary.history.iter().map(|r| r.loss).collect();
    for report in &summary.history {
        assert!(report.loss.is_finite());
        assert!((0.0..=1.0).contains(&report.auc));
        assert!((0.0..=1.0).contains(&report.ap));
    }
    assert!(mean(&losses[losses.len() - 10..]) <= mean(&losses[..10]) + 0.05);

    let best = summary.best.unwrap();
    assert!(losses.iter().all(|&l| best.loss <= l));
    assert_eq!(best.loss, summary.history[best.epoch - 1].loss);
}

#[test]
fn variational_model_learns_cliques() {
    let mut config = TrainConfig::default();
    config.model = ModelKind::Variational;
    config.epochs = 120;
    config.channels = 16;
    config.seed = 3;

    let mut trainer = Trainer::new(config, ring_of_cliques(6, 5)).unwrap();
    let summary = trainer.run().unwrap();

    let losses: Vec<f32> = summary.history.iter().map(|r| r.loss).collect();
    assert!(losses.iter().all(|l| l.is_finite()));
    assert!(mean(&losses[losses.len() - 10..]) < mean(&losses[..10]));

    let last = summary.history.last().unwrap();
    assert!(last.auc > 0.5, "final AUC {}", last.auc);
}

#[test]
fn training_uses_only_train_edges_for_diffusion() {
    let mut config = TrainConfig::default();
    config.model = ModelKind::Plain;
    config.epochs = 2;
    config.channels = 4;

    let trainer = Trainer::new(config, ring_of_cliques(4, 4)).unwrap();
    let split = &trainer.bundle().split;

    // Each train edge contributes two messages, each node one self-loop
    let expected = 2 * split.train_pos.len() + trainer.bundle().graph.num_nodes();
    assert_eq!(trainer.propagation().num_messages(), expected);

    let held_out: HashSet<_> = split.val_pos.iter().chain(split.test_pos.iter()).collect();
    assert!(split.train_pos.iter().all(|e| !held_out.contains(e)));
}

#[test]
fn saved_parameters_reproduce_predictions() {
    let mut config = TrainConfig::default();
    config.model = ModelKind::Variational;
    config.epochs = 5;
    config.channels = 4;

    let mut trainer = Trainer::new(config.clone(), ring_of_cliques(3, 4)).unwrap();
    trainer.run().unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vgnae.safetensors");
    trainer.model().save(&path).unwrap();

    let loaded = Autoencoder::load(&path, config.scaling_factor, config.max_logstd, &Device::Cpu)
        .unwrap();
    assert_eq!(loaded.kind(), ModelKind::Variational);

    let candidates = [(0, 1), (0, 5), (2, 11)];
    let expected = trainer.predict(&candidates).unwrap();
    let actual = loaded
        .predict(
            trainer.bundle().graph.features(),
            trainer.propagation(),
            &candidates,
        )
        .unwrap();

    for (a, b) in expected.iter().zip(actual.iter()) {
        assert!((a - b).abs() < 1e-6);
    }
}

#[test]
fn invalid_config_is_rejected_before_training() {
    let mut config = TrainConfig::default();
    config.training_rate = 1.0;
    assert!(matches!(
        Trainer::new(config, ring_of_cliques(3, 4)),
        Err(GnaeError::Config(_))
    ));

    let mut config = TrainConfig::default();
    config.epochs = 0;
    assert!(matches!(
        Trainer::new(config, ring_of_cliques(3, 4)),
        Err(GnaeError::Config(_))
    ));
}
