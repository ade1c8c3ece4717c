//! Graph autoencoder
//!
//! Wraps a [`PropagationEncoder`] with the dot-product edge decoder and the
//! training objective:
//!
//! ```text
//! score(u, v) = σ(z_u · z_v)
//! recon       = mean_pos softplus(-z_u·z_v) + mean_neg softplus(z_u·z_v)
//! kl          = -½ · mean_nodes Σ_c (1 + 2·logstd − mu² − e^(2·logstd))
//! loss        = recon                      (plain)
//!             = recon + kl / N             (variational)
//! ```
//!
//! Negatives for the reconstruction term are drawn fresh on every call, as
//! many as there are positives, avoiding the training edges.

use super::encoder::{Latent, Projection, PropagationEncoder};
use super::Phase;
use crate::config::{ModelKind, TrainConfig};
use crate::graph::split::sample_negative_edges;
use crate::metrics::score_metrics;
use crate::primitives::{finite_scalar, pair_logits, sigmoid, softplus, Propagation};
use crate::{DType, Device, GnaeError, Result, Tensor, Var};
use rand::Rng;
use rand_distr::StandardNormal;
use safetensors::tensor::TensorView;
use safetensors::SafeTensors;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// Latents plus the embedding actually fed to the decoder
#[derive(Debug, Clone)]
pub struct Encoding {
    /// Decoder input: `z` (plain), a reparameterized sample (variational,
    /// train phase) or `mu` (variational, eval phase)
    pub z: Tensor,
    pub latent: Latent,
}

/// Plain or variational graph autoencoder
#[derive(Debug, Clone)]
pub struct Autoencoder {
    encoder: PropagationEncoder,
    device: Device,
}

impl Autoencoder {
    /// Fresh model with randomly initialized projections
    pub fn new<R: Rng + ?Sized>(
        kind: ModelKind,
        in_features: usize,
        channels: usize,
        scaling_factor: f64,
        max_logstd: f64,
        device: &Device,
        rng: &mut R,
    ) -> Result<Self> {
        let encoder = match kind {
            ModelKind::Plain => {
                PropagationEncoder::plain(in_features, channels, scaling_factor, device, rng)?
            }
            ModelKind::Variational => PropagationEncoder::variational(
                in_features,
                channels,
                scaling_factor,
                max_logstd,
                device,
                rng,
            )?,
        };

        debug!(%kind, in_features, channels, "initialized autoencoder");
        Ok(Self {
            encoder,
            device: device.clone(),
        })
    }

    /// Model sized by a run configuration
    pub fn from_config<R: Rng + ?Sized>(
        config: &TrainConfig,
        in_features: usize,
        device: &Device,
        rng: &mut R,
    ) -> Result<Self> {
        Self::new(
            config.model,
            in_features,
            config.channels,
            config.scaling_factor,
            config.max_logstd,
            device,
            rng,
        )
    }

    pub fn kind(&self) -> ModelKind {
        match self.encoder {
            PropagationEncoder::Plain { .. } => ModelKind::Plain,
            PropagationEncoder::Variational { .. } => ModelKind::Variational,
        }
    }

    pub fn encoder(&self) -> &PropagationEncoder {
        &self.encoder
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Trainable parameters, for the optimizer
    pub fn vars(&self) -> Vec<Var> {
        self.encoder.vars()
    }

    /// Total scalar parameter count
    pub fn param_count(&self) -> usize {
        self.vars().iter().map(|v| v.as_tensor().elem_count()).sum()
    }

    // =========================================================================
    // Forward
    // =========================================================================

    /// Encode features and pick the decoder input for `phase`
    pub fn encode<R: Rng + ?Sized>(
        &self,
        x: &Tensor,
        propagation: &Propagation,
        phase: Phase,
        rng: &mut R,
    ) -> Result<Encoding> {
        let latent = self.encoder.encode(x, propagation)?;

        let z = match (&latent, phase) {
            (Latent::Plain(z), _) => z.clone(),
            (Latent::Variational { mu, .. }, Phase::Eval) => mu.clone(),
            (Latent::Variational { mu, logstd }, Phase::Train) => {
                let (n, c) = mu.dims2()?;
                let noise: Vec<f32> = (0..n * c).map(|_| rng.sample(StandardNormal)).collect();
                let noise = Tensor::from_vec(noise, (n, c), mu.device())
                    .map_err(|e| GnaeError::Tensor(format!("noise upload failed: {}", e)))?;
                let std = logstd
                    .exp()
                    .map_err(|e| GnaeError::Tensor(format!("logstd exp failed: {}", e)))?;
                (mu + (noise * std)?)
                    .map_err(|e| GnaeError::Tensor(format!("reparameterize failed: {}", e)))?
            }
        };

        Ok(Encoding { z, latent })
    }

    /// Deterministic embedding with no gradient history
    pub fn embed(&self, x: &Tensor, propagation: &Propagation) -> Result<Tensor> {
        let latent = self.encoder.encode(x, propagation)?;
        Ok(latent.mean().detach())
    }

    /// Edge probabilities `σ(z_u · z_v)` for each pair, shape `[E]`
    pub fn decode(&self, z: &Tensor, edges: &[(usize, usize)]) -> Result<Tensor> {
        sigmoid(&pair_logits(z, edges)?)
    }

    // =========================================================================
    // Loss
    // =========================================================================

    /// Binary cross-entropy over `positives` and as many freshly sampled
    /// negatives; `exclude` holds canonical pairs the sampler must avoid
    pub fn recon_loss<R: Rng + ?Sized>(
        &self,
        z: &Tensor,
        positives: &[(usize, usize)],
        exclude: &HashSet<(usize, usize)>,
        rng: &mut R,
    ) -> Result<Tensor> {
        if positives.is_empty() {
            return Err(GnaeError::Data("reconstruction needs positive edges".into()));
        }
        let num_nodes = z.dims()[0];

        let pos_logits = pair_logits(z, positives)?;
        let pos_loss = softplus(&pos_logits.neg()?)?
            .mean_all()
            .map_err(|e| GnaeError::Tensor(format!("pos loss mean failed: {}", e)))?;

        let negatives = sample_negative_edges(num_nodes, exclude, positives.len(), rng)?;
        let neg_logits = pair_logits(z, &negatives)?;
        let neg_loss = softplus(&neg_logits)?
            .mean_all()
            .map_err(|e| GnaeError::Tensor(format!("neg loss mean failed: {}", e)))?;

        (pos_loss + neg_loss).map_err(|e| GnaeError::Tensor(format!("recon sum failed: {}", e)))
    }

    /// KL divergence of `N(mu, exp(logstd)²)` from the standard normal,
    /// averaged over nodes
    pub fn kl_loss(mu: &Tensor, logstd: &Tensor) -> Result<Tensor> {
        let two_logstd_plus_one = logstd
            .affine(2.0, 1.0)
            .map_err(|e| GnaeError::Tensor(format!("kl affine failed: {}", e)))?;
        let var = logstd
            .exp()
            .and_then(|t| t.sqr())
            .map_err(|e| GnaeError::Tensor(format!("kl variance failed: {}", e)))?;
        let mu_sq = mu
            .sqr()
            .map_err(|e| GnaeError::Tensor(format!("kl mu^2 failed: {}", e)))?;

        ((two_logstd_plus_one - mu_sq)? - var)?
            .sum(1)
            .and_then(|t| t.mean_all())
            .and_then(|t| t.affine(-0.5, 0.0))
            .map_err(|e| GnaeError::Tensor(format!("kl reduce failed: {}", e)))
    }

    /// Full objective for one forward pass
    ///
    /// Encodes in `phase`, reconstructs `positives`, and in variational mode
    /// adds `kl / num_nodes`.
    pub fn loss<R: Rng + ?Sized>(
        &self,
        x: &Tensor,
        propagation: &Propagation,
        positives: &[(usize, usize)],
        exclude: &HashSet<(usize, usize)>,
        phase: Phase,
        rng: &mut R,
    ) -> Result<Tensor> {
        let encoding = self.encode(x, propagation, phase, rng)?;
        let recon = self.recon_loss(&encoding.z, positives, exclude, rng)?;

        match &encoding.latent {
            Latent::Plain(_) => Ok(recon),
            Latent::Variational { mu, logstd } => {
                let num_nodes = mu.dims()[0] as f64;
                let kl = Self::kl_loss(mu, logstd)?
                    .affine(1.0 / num_nodes, 0.0)
                    .map_err(|e| GnaeError::Tensor(format!("kl scale failed: {}", e)))?;
                (recon + kl).map_err(|e| GnaeError::Tensor(format!("loss sum failed: {}", e)))
            }
        }
    }

    // =========================================================================
    // Evaluation
    // =========================================================================

    /// AUC and AP of the decoder on labelled held-out pairs
    pub fn test(
        &self,
        z: &Tensor,
        positives: &[(usize, usize)],
        negatives: &[(usize, usize)],
    ) -> Result<(f64, f64)> {
        let pos_scores: Vec<f32> = self.decode(z, positives)?.to_vec1()?;
        let neg_scores: Vec<f32> = self.decode(z, negatives)?.to_vec1()?;

        let mut scores = pos_scores;
        scores.extend(neg_scores);
        let mut labels = vec![true; positives.len()];
        labels.extend(std::iter::repeat(false).take(negatives.len()));

        score_metrics(&scores, &labels)
    }

    /// Edge probabilities for arbitrary candidate pairs, using the eval-phase
    /// embedding
    pub fn predict(
        &self,
        x: &Tensor,
        propagation: &Propagation,
        candidates: &[(usize, usize)],
    ) -> Result<Vec<f32>> {
        let z = self.embed(x, propagation)?;
        let scores: Vec<f32> = self.decode(&z, candidates)?.to_vec1()?;
        Ok(scores)
    }

    /// Scalar value of a loss tensor, failing on NaN / Inf
    pub fn loss_value(loss: &Tensor) -> Result<f32> {
        finite_scalar(loss, "loss")
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    /// Write all parameters to a safetensors file
    ///
    /// Keys: `linear1.weight`, `linear1.bias` and, for variational models,
    /// `linear2.weight`, `linear2.bias`.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut named: Vec<(String, Tensor)> = Vec::new();
        for (name, proj) in self.encoder.projections() {
            named.push((format!("{}.weight", name), proj.weight().as_tensor().clone()));
            named.push((format!("{}.bias", name), proj.bias().as_tensor().clone()));
        }

        let mut data_store: HashMap<String, (Vec<f32>, Vec<usize>)> = HashMap::new();
        for (name, tensor) in &named {
            let data: Vec<f32> = tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;
            data_store.insert(name.clone(), (data, tensor.dims().to_vec()));
        }

        let mut views: HashMap<String, TensorView> = HashMap::new();
        for (name, (data, shape)) in &data_store {
            let view = TensorView::new(
                safetensors::tensor::Dtype::F32,
                shape.clone(),
                bytemuck::cast_slice(data),
            )
            .map_err(|e| GnaeError::Serialization(e.to_string()))?;
            views.insert(name.clone(), view);
        }

        safetensors::serialize_to_file(views, &None, path.as_ref())
            .map_err(|e| GnaeError::Serialization(e.to_string()))?;

        info!(path = %path.as_ref().display(), kind = %self.kind(), "saved parameters");
        Ok(())
    }

    /// Rebuild a model from a file written by [`Autoencoder::save`]
    ///
    /// The model kind follows from the keys present: a `linear2` pair means
    /// variational.
    pub fn load(
        path: impl AsRef<Path>,
        scaling_factor: f64,
        max_logstd: f64,
        device: &Device,
    ) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref()).map_err(GnaeError::Io)?;
        let tensors = SafeTensors::deserialize(&bytes)
            .map_err(|e| GnaeError::Serialization(e.to_string()))?;

        let read = |name: &str| -> Result<Option<Tensor>> {
            let view = match tensors.tensor(name) {
                Ok(view) => view,
                Err(_) => return Ok(None),
            };
            if view.dtype() != safetensors::tensor::Dtype::F32 {
                return Err(GnaeError::Serialization(format!(
                    "{} has dtype {:?}, expected F32",
                    name,
                    view.dtype()
                )));
            }
            let data: Vec<f32> = bytemuck::pod_collect_to_vec(view.data());
            let tensor = Tensor::from_vec(data, view.shape(), device)
                .map_err(|e| GnaeError::Tensor(e.to_string()))?;
            Ok(Some(tensor))
        };

        let pair = |name: &str| -> Result<Option<Projection>> {
            let weight = read(&format!("{}.weight", name))?;
            let bias = read(&format!("{}.bias", name))?;
            match (weight, bias) {
                (Some(w), Some(b)) => Ok(Some(Projection::from_tensors(&w, &b)?)),
                (None, None) => Ok(None),
                _ => Err(GnaeError::Serialization(format!(
                    "{} is missing its weight or bias",
                    name
                ))),
            }
        };

        let linear1 = pair("linear1")?.ok_or_else(|| {
            GnaeError::Serialization("parameter file has no linear1 projection".into())
        })?;

        let encoder = match pair("linear2")? {
            None => PropagationEncoder::Plain {
                linear1,
                scaling_factor,
            },
            Some(linear2) => {
                if linear2.in_dim() != linear1.in_dim() || linear2.out_dim() != linear1.out_dim() {
                    return Err(GnaeError::Serialization(
                        "linear1 and linear2 shapes differ".into(),
                    ));
                }
                PropagationEncoder::Variational {
                    linear1,
                    linear2,
                    scaling_factor,
                    max_logstd,
                }
            }
        };

        let model = Self {
            encoder,
            device: device.clone(),
        };
        info!(path = %path.as_ref().display(), kind = %model.kind(), "loaded parameters");
        Ok(model)
    }
}
