//! Run configuration
//!
//! Parses and validates the options that drive a training run. Values can come
//! from a `gnae.toml` file, from the CLI, or be built in code; every path ends
//! in [`TrainConfig::validate`] before any tensor is allocated.
//!
//! ```toml
//! model = "vgnae"
//! epochs = 300
//! channels = 128
//! scaling_factor = 1.8
//! training_rate = 0.85
//! seed = 7
//! device = "auto"
//! ```

use crate::{Device, GnaeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Tolerance used when checking that split fractions sum to one
const RATIO_TOLERANCE: f64 = 1e-6;

// =============================================================================
// Model kind
// =============================================================================

/// Which autoencoder to train, fixed for the whole run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Deterministic encoder, reconstruction loss only (GNAE)
    #[serde(alias = "gnae")]
    Plain,

    /// Mean + log-std encoder, reparameterized sampling and KL term (VGNAE)
    #[serde(alias = "vgnae")]
    Variational,
}

impl ModelKind {
    /// Whether the model samples latents and carries a KL term
    pub fn is_variational(&self) -> bool {
        matches!(self, Self::Variational)
    }
}

impl FromStr for ModelKind {
    type Err = GnaeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "gnae" => Ok(Self::Plain),
            "variational" | "vgnae" => Ok(Self::Variational),
            other => Err(GnaeError::Config(format!(
                "unsupported model '{}' (expected plain/gnae or variational/vgnae)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "GNAE"),
            Self::Variational => write!(f, "VGNAE"),
        }
    }
}

// =============================================================================
// Compute target
// =============================================================================

/// Where tensor arithmetic runs
///
/// Resolved once per run; the training loop only ever sees the resulting
/// [`Device`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComputeTarget {
    /// Always the CPU
    #[default]
    Cpu,
    /// Metal, then CUDA, then CPU, depending on enabled features
    Auto,
    /// CUDA device 0 (requires the `cuda` feature)
    Cuda,
    /// Metal device 0 (requires the `metal` feature)
    Metal,
}

impl ComputeTarget {
    /// Turn the selector into a concrete device
    pub fn resolve(&self) -> Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Auto => Ok(crate::primitives::best_device()),
            Self::Cuda => Device::new_cuda(0)
                .map_err(|e| GnaeError::Config(format!("CUDA device unavailable: {}", e))),
            Self::Metal => Device::new_metal(0)
                .map_err(|e| GnaeError::Config(format!("Metal device unavailable: {}", e))),
        }
    }
}

impl FromStr for ComputeTarget {
    type Err = GnaeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "auto" => Ok(Self::Auto),
            "cuda" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            other => Err(GnaeError::Config(format!("unknown device '{}'", other))),
        }
    }
}

// =============================================================================
// Checkpoint selection
// =============================================================================

/// Signal used to decide which epoch is reported as best
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionCriterion {
    /// Strictly lower training loss wins
    #[default]
    TrainLoss,
    /// Strictly higher validation AUC wins
    ValAuc,
}

// =============================================================================
// Split ratios
// =============================================================================

/// Fractions of the positive edge set assigned to train / validation / test
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl SplitRatios {
    /// Explicit fractions; each must lie in `[0, 1]` and together sum to 1
    pub fn new(train: f64, val: f64, test: f64) -> Result<Self> {
        for (name, value) in [("train", train), ("val", val), ("test", test)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(GnaeError::Config(format!(
                    "{} ratio must be in [0, 1], got {}",
                    name, value
                )));
            }
        }

        let total = train + val + test;
        if (total - 1.0).abs() > RATIO_TOLERANCE {
            return Err(GnaeError::Config(format!(
                "split ratios must sum to 1.0, got {:.6}",
                total
            )));
        }

        Ok(Self { train, val, test })
    }

    /// Derive val/test from the training rate: the held-out remainder is split
    /// one third validation, two thirds test
    pub fn from_training_rate(training_rate: f64) -> Result<Self> {
        if !training_rate.is_finite() || training_rate <= 0.0 || training_rate >= 1.0 {
            return Err(GnaeError::Config(format!(
                "training_rate must be in (0, 1), got {}",
                training_rate
            )));
        }
        let held_out = 1.0 - training_rate;
        Self::new(training_rate, held_out / 3.0, held_out / 3.0 * 2.0)
    }
}

// =============================================================================
// Training configuration
// =============================================================================

/// Everything a training run needs besides the graph itself
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Plain or variational autoencoder
    #[serde(default = "default_model")]
    pub model: ModelKind,

    /// Epoch budget; the loop runs epochs `1..epochs`
    #[serde(default = "default_epochs")]
    pub epochs: usize,

    /// Embedding width
    #[serde(default = "default_channels")]
    pub channels: usize,

    /// Row norm of the projected features before diffusion
    #[serde(default = "default_scaling_factor")]
    pub scaling_factor: f64,

    /// Fraction of positive edges kept for training
    #[serde(default = "default_training_rate")]
    pub training_rate: f64,

    /// Adam learning rate
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    /// Seed for every random draw in the run
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Compute target
    #[serde(default)]
    pub device: ComputeTarget,

    /// How the best epoch is chosen
    #[serde(default)]
    pub selection: SelectionCriterion,

    /// Upper clamp for the variational log-std branch
    #[serde(default = "default_max_logstd")]
    pub max_logstd: f64,
}

fn default_model() -> ModelKind {
    ModelKind::Variational
}

fn default_epochs() -> usize {
    300
}

fn default_channels() -> usize {
    128
}

fn default_scaling_factor() -> f64 {
    1.8
}

fn default_training_rate() -> f64 {
    0.8
}

fn default_learning_rate() -> f64 {
    0.005
}

fn default_seed() -> u64 {
    42
}

fn default_max_logstd() -> f64 {
    10.0
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            epochs: default_epochs(),
            channels: default_channels(),
            scaling_factor: default_scaling_factor(),
            training_rate: default_training_rate(),
            learning_rate: default_learning_rate(),
            seed: default_seed(),
            device: ComputeTarget::default(),
            selection: SelectionCriterion::default(),
            max_logstd: default_max_logstd(),
        }
    }
}

impl TrainConfig {
    /// Load and validate a TOML config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(GnaeError::Io)?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.as_ref().display(), model = %config.model, "loaded config");
        Ok(config)
    }

    /// Parse and validate a TOML config string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| GnaeError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values before training starts
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(GnaeError::Config("epochs must be a positive integer".into()));
        }
        if self.channels == 0 {
            return Err(GnaeError::Config("channels must be a positive integer".into()));
        }
        if !self.scaling_factor.is_finite() || self.scaling_factor <= 0.0 {
            return Err(GnaeError::Config(format!(
                "scaling_factor must be a positive number, got {}",
                self.scaling_factor
            )));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(GnaeError::Config(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if !self.max_logstd.is_finite() {
            return Err(GnaeError::Config("max_logstd must be finite".into()));
        }
        self.split_ratios()?;
        Ok(())
    }

    /// Train/val/test fractions implied by `training_rate`
    pub fn split_ratios(&self) -> Result<SplitRatios> {
        SplitRatios::from_training_rate(self.training_rate)
    }
}
