//! # gnae
//!
//! Graph-normalized autoencoders for link prediction: a propagation-based node
//! encoder, a dot-product edge decoder and the train/evaluate loop around them,
//! all on candle tensors with full gradient flow.
//!
//! ## Overview
//!
//! Given node features and a partially observed edge list, the crate
//!
//! - **Splits** the edges into train / validation / test positives plus
//!   equally sized negative (non-edge) sets
//! - **Encodes** nodes with one or two linear projections followed by a
//!   parameter-free diffusion over the training edges
//! - **Decodes** node pairs with `sigmoid(z_u · z_v)`
//! - **Trains** with a reconstruction loss (plus a KL term in variational mode)
//!   and reports AUC / AP on held-out edges every epoch
//!
//! Two model kinds are supported: plain (`GNAE`) and variational (`VGNAE`).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use gnae::prelude::*;
//!
//! let mut config = TrainConfig::default();
//! config.model = ModelKind::Plain;
//! config.epochs = 200;
//!
//! let device = config.device.resolve()?;
//! let graph = Graph::from_json_file("cora.json", &device)?;
//!
//! let mut trainer = Trainer::new(config, graph)?;
//! let summary = trainer.run()?;
//! if let Some(best) = summary.best {
//!     println!("Best: {}", best);
//! }
//! ```
//!
//! ## Feature Flags
//!
//! - `metal`: Apple Metal GPU acceleration
//! - `cuda`: NVIDIA CUDA GPU acceleration

pub mod config;
pub mod graph;
pub mod metrics;
pub mod model;
pub mod primitives;
pub mod training;

// Re-export candle types for convenience
pub use candle_core::{DType, Device, Tensor, Var};

/// Error types for graph autoencoder operations
#[derive(Debug, thiserror::Error)]
pub enum GnaeError {
    #[error("Tensor operation failed: {0}")]
    Tensor(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid graph data: {0}")]
    Data(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Metric undefined: {0}")]
    Metric(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for graph autoencoder operations
pub type Result<T> = std::result::Result<T, GnaeError>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DType, Device, Tensor, Var};
    pub use crate::{GnaeError, Result};

    // Configuration
    pub use crate::config::{
        ComputeTarget, ModelKind, SelectionCriterion, SplitRatios, TrainConfig,
    };

    // Graph data
    pub use crate::graph::split::{split_edges, EdgeSet, EdgeSplit, GraphBundle};
    pub use crate::graph::{normalize_features, Graph};

    // Primitives
    pub use crate::primitives::{normalize_rows, sigmoid, softplus, Propagation};

    // Model
    pub use crate::model::{Autoencoder, Latent, Phase, PropagationEncoder};

    // Evaluation
    pub use crate::metrics::{average_precision, roc_auc, score_metrics};

    // Training
    pub use crate::training::{
        check_gradients_health, compute_grad_norm, AdamOptimizer, BestCheckpoint, CheckpointTracker,
        EpochReport, Trainer, TrainingSummary,
    };
}
