//! Training Infrastructure
//!
//! Optimizer, gradient checks, best-checkpoint tracking and the epoch loop.
//!
//! ## Overview
//!
//! Every epoch is one full-batch cycle:
//!
//! 1. Forward pass on the train positives (train phase), reconstruction loss
//!    against freshly sampled negatives, plus KL in variational mode
//! 2. Backward pass, gradient health check, one Adam step
//! 3. Eval-phase embedding over the same train structure, AUC / AP on the
//!    test (and validation) edges
//! 4. Best-checkpoint update
//!
//! The loop always runs the full epoch budget; there is no early stopping.
//!
//! ## Example
//!
//! ```ignore
//! use gnae::prelude::*;
//!
//! let mut trainer = Trainer::new(config, graph)?;
//! let summary = trainer.run_with(|report| println!("{}", report))?;
//! ```

use crate::config::{SelectionCriterion, TrainConfig};
use crate::graph::split::{EdgeSet, GraphBundle};
use crate::graph::Graph;
use crate::model::{Autoencoder, Phase};
use crate::primitives::Propagation;
use crate::{GnaeError, Result, Tensor};
use candle_core::backprop::GradStore;
use candle_core::Var;
use candle_nn::optim::Optimizer as CandleOptimizer;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

// =============================================================================
// Reports
// =============================================================================

/// What one epoch produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochReport {
    /// Epoch number, starting at 1
    pub epoch: usize,

    /// Training loss of this epoch's forward pass
    pub loss: f32,

    /// Test AUC after the step
    pub auc: f64,

    /// Test AP after the step
    pub ap: f64,

    /// Validation AUC after the step
    pub val_auc: f64,

    /// Validation AP after the step
    pub val_ap: f64,
}

impl std::fmt::Display for EpochReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Epoch: {:03}, LOSS: {:.4}, AUC: {:.4}, AP: {:.4}",
            self.epoch, self.loss, self.auc, self.ap
        )
    }
}

/// The epoch reported as best for the run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BestCheckpoint {
    pub epoch: usize,
    pub loss: f32,
    pub auc: f64,
    pub ap: f64,
}

impl From<&EpochReport> for BestCheckpoint {
    fn from(report: &EpochReport) -> Self {
        Self {
            epoch: report.epoch,
            loss: report.loss,
            auc: report.auc,
            ap: report.ap,
        }
    }
}

impl std::fmt::Display for BestCheckpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Epoch: {:03}, LOSS: {:.4}, AUC: {:.4}, AP: {:.4}",
            self.epoch, self.loss, self.auc, self.ap
        )
    }
}

/// Per-epoch history plus the selected best epoch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub history: Vec<EpochReport>,

    /// `None` only when the epoch budget allowed no epochs
    pub best: Option<BestCheckpoint>,
}

// =============================================================================
// Best-checkpoint tracking
// =============================================================================

/// Keeps the best epoch seen so far under a selection criterion
#[derive(Debug, Clone)]
pub struct CheckpointTracker {
    criterion: SelectionCriterion,
    best: Option<BestCheckpoint>,
    best_val_auc: f64,
}

impl CheckpointTracker {
    pub fn new(criterion: SelectionCriterion) -> Self {
        Self {
            criterion,
            best: None,
            best_val_auc: f64::NEG_INFINITY,
        }
    }

    /// Record an epoch; returns true if it became the new best
    pub fn record(&mut self, report: &EpochReport) -> bool {
        let improved = match (&self.best, self.criterion) {
            (None, _) => true,
            (Some(best), SelectionCriterion::TrainLoss) => report.loss < best.loss,
            (Some(_), SelectionCriterion::ValAuc) => report.val_auc > self.best_val_auc,
        };

        if improved {
            self.best = Some(BestCheckpoint::from(report));
            self.best_val_auc = report.val_auc;
        }
        improved
    }

    pub fn best(&self) -> Option<&BestCheckpoint> {
        self.best.as_ref()
    }

    pub fn criterion(&self) -> SelectionCriterion {
        self.criterion
    }
}

// =============================================================================
// Optimizer
// =============================================================================

/// Wrapper around candle-nn's AdamW optimizer with weight decay disabled
pub struct AdamOptimizer {
    inner: candle_nn::optim::AdamW,
}

impl AdamOptimizer {
    /// Plain Adam: default betas (0.9, 0.999), eps 1e-8, no weight decay
    pub fn new(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        let params = candle_nn::optim::ParamsAdamW {
            lr: learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };

        let inner = <candle_nn::optim::AdamW as CandleOptimizer>::new(vars, params)
            .map_err(|e| GnaeError::Tensor(format!("AdamW init failed: {}", e)))?;

        Ok(Self { inner })
    }

    /// Take a gradient step
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        CandleOptimizer::step(&mut self.inner, grads)
            .map_err(|e| GnaeError::Training(format!("Adam step failed: {}", e)))
    }

    /// Get the learning rate
    pub fn learning_rate(&self) -> f64 {
        CandleOptimizer::learning_rate(&self.inner)
    }

    /// Set the learning rate
    pub fn set_learning_rate(&mut self, lr: f64) {
        CandleOptimizer::set_learning_rate(&mut self.inner, lr)
    }
}

// =============================================================================
// Gradient Utilities
// =============================================================================

/// Compute the total L2 norm of all gradients
pub fn compute_grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f32> {
    let mut total_sq_norm = 0.0f32;

    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            let sq_norm = grad
                .sqr()
                .and_then(|t| t.sum_all())
                .and_then(|t| t.to_scalar::<f32>())
                .map_err(|e| GnaeError::Tensor(format!("grad norm failed: {}", e)))?;
            total_sq_norm += sq_norm;
        }
    }

    Ok(total_sq_norm.sqrt())
}

/// Check if any gradient contains NaN or Inf
///
/// Returns true if gradients are healthy (no NaN/Inf).
pub fn check_gradients_health(grads: &GradStore, vars: &[Var]) -> bool {
    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            if let Ok(vals) = grad.flatten_all().and_then(|t| t.to_vec1::<f32>()) {
                if vals.iter().any(|v| !v.is_finite()) {
                    return false;
                }
            }
        }
    }
    true
}

// =============================================================================
// Trainer
// =============================================================================

/// Owns the model, optimizer, split and RNG for one run
pub struct Trainer {
    config: TrainConfig,
    bundle: GraphBundle,
    model: Autoencoder,
    vars: Vec<Var>,
    optimizer: AdamOptimizer,
    propagation: Propagation,
    /// Train positives in both directions
    train_edges: EdgeSet,
    /// Canonical train positives, excluded from negative sampling
    train_exclude: HashSet<(usize, usize)>,
    rng: StdRng,
}

impl Trainer {
    /// Validate the config, split the graph's edges and build the model
    ///
    /// All randomness in the run (split, init, negatives, noise) comes from
    /// one `StdRng` seeded with `config.seed`.
    pub fn new(config: TrainConfig, graph: Graph) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let ratios = config.split_ratios()?;
        let bundle = GraphBundle::new(graph, &ratios, &mut rng)?;
        Self::from_bundle(config, bundle, rng)
    }

    /// Build from an existing split and RNG
    pub fn from_bundle(config: TrainConfig, bundle: GraphBundle, mut rng: StdRng) -> Result<Self> {
        config.validate()?;

        let graph = &bundle.graph;
        let split = &bundle.split;
        if split.num_nodes != graph.num_nodes() {
            return Err(GnaeError::Data(format!(
                "split covers {} nodes but graph has {}",
                split.num_nodes,
                graph.num_nodes()
            )));
        }
        if split.train_pos.is_empty() {
            return Err(GnaeError::Data("no training edges".into()));
        }

        let device = graph.device().clone();
        let model = Autoencoder::from_config(&config, graph.num_features(), &device, &mut rng)?;
        let vars = model.vars();
        let optimizer = AdamOptimizer::new(vars.clone(), config.learning_rate)?;

        let train_edges = split.train_pos_both_directions();
        let train_exclude = split.train_pos_set();
        let propagation = Propagation::new(graph.num_nodes(), &train_edges, &device)?;

        info!(
            model = %config.model,
            nodes = graph.num_nodes(),
            features = graph.num_features(),
            channels = config.channels,
            params = model.param_count(),
            "trainer ready"
        );

        Ok(Self {
            config,
            bundle,
            model,
            vars,
            optimizer,
            propagation,
            train_edges,
            train_exclude,
            rng,
        })
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn bundle(&self) -> &GraphBundle {
        &self.bundle
    }

    pub fn model(&self) -> &Autoencoder {
        &self.model
    }

    pub fn propagation(&self) -> &Propagation {
        &self.propagation
    }

    fn features(&self) -> &Tensor {
        self.bundle.graph.features()
    }

    /// One forward / backward / update cycle; returns the training loss
    pub fn train_epoch(&mut self) -> Result<f32> {
        // Gradients are rebuilt by every backward pass, nothing to zero
        let loss = self.model.loss(
            self.bundle.graph.features(),
            &self.propagation,
            &self.train_edges,
            &self.train_exclude,
            Phase::Train,
            &mut self.rng,
        )?;
        let value = Autoencoder::loss_value(&loss)?;

        let grads = loss
            .backward()
            .map_err(|e| GnaeError::Tensor(format!("backward failed: {}", e)))?;

        if !check_gradients_health(&grads, &self.vars) {
            return Err(GnaeError::Numerical(
                "NaN or Inf detected in gradients".into(),
            ));
        }
        let grad_norm = compute_grad_norm(&grads, &self.vars)?;
        debug!(loss = value, grad_norm, "backward done");

        self.optimizer.step(&grads)?;
        Ok(value)
    }

    /// Eval-phase embedding over the training structure
    pub fn embed(&self) -> Result<Tensor> {
        self.model.embed(self.features(), &self.propagation)
    }

    /// AUC / AP of the current parameters on the given labelled pairs
    pub fn evaluate(&self, positives: &[(usize, usize)], negatives: &[(usize, usize)]) -> Result<(f64, f64)> {
        let z = self.embed()?;
        self.model.test(&z, positives, negatives)
    }

    /// Edge probabilities for arbitrary pairs under the current parameters
    pub fn predict(&self, candidates: &[(usize, usize)]) -> Result<Vec<f32>> {
        self.model.predict(self.features(), &self.propagation, candidates)
    }

    /// Run the full epoch budget
    pub fn run(&mut self) -> Result<TrainingSummary> {
        self.run_with(|_| {})
    }

    /// Run the full epoch budget, calling `on_epoch` after every epoch
    pub fn run_with<F: FnMut(&EpochReport)>(&mut self, mut on_epoch: F) -> Result<TrainingSummary> {
        let mut tracker = CheckpointTracker::new(self.config.selection);
        let mut history = Vec::with_capacity(self.config.epochs.saturating_sub(1));

        for epoch in 1..self.config.epochs {
            let loss = self.train_epoch()?;

            let z = self.embed()?;
            let split = &self.bundle.split;
            let (auc, ap) = self.model.test(&z, &split.test_pos, &split.test_neg)?;
            let (val_auc, val_ap) = self.model.test(&z, &split.val_pos, &split.val_neg)?;

            let report = EpochReport {
                epoch,
                loss,
                auc,
                ap,
                val_auc,
                val_ap,
            };
            info!(epoch, loss, auc, ap, val_auc, val_ap, "epoch complete");

            if tracker.record(&report) {
                debug!(epoch, criterion = ?tracker.criterion(), "new best checkpoint");
            }
            on_epoch(&report);
            history.push(report);
        }

        let best = tracker.best().copied();
        if let Some(best) = &best {
            info!(
                epoch = best.epoch,
                loss = best.loss,
                auc = best.auc,
                ap = best.ap,
                "best checkpoint"
            );
        }

        Ok(TrainingSummary { history, best })
    }
}
