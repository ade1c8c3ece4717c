//! Propagation encoder
//!
//! Learned linear projections followed by the parameter-free diffusion from
//! [`crate::primitives::Propagation`]:
//!
//! ```text
//! Plain:        z      = Â · (normalize_rows(x W₁ + b₁) · s)
//! Variational:  mu     = Â · (normalize_rows(x W₂ + b₂) · s)
//!               logstd = Â · (x W₁ + b₁)
//! ```
//!
//! Normalizing every projected row to the same norm `s` before diffusion keeps
//! high-degree nodes from dominating the dot-product decoder.

use crate::primitives::{normalize_rows, Propagation};
use crate::{Device, GnaeError, Result, Tensor, Var};
use rand::Rng;
use rand_distr::{Distribution, Uniform};

// =============================================================================
// Linear projection
// =============================================================================

/// Affine map `x W + b` with `W: [in, out]`, `b: [out]`
#[derive(Debug, Clone)]
pub struct Projection {
    weight: Var,
    bias: Var,
}

impl Projection {
    /// Initialize weight and bias from `U(-1/√in, 1/√in)`
    pub fn new<R: Rng + ?Sized>(
        in_dim: usize,
        out_dim: usize,
        device: &Device,
        rng: &mut R,
    ) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(GnaeError::Config(format!(
                "projection dims must be positive, got {} -> {}",
                in_dim, out_dim
            )));
        }

        let bound = 1.0 / (in_dim as f32).sqrt();
        let dist = Uniform::new_inclusive(-bound, bound);

        let weight: Vec<f32> = (0..in_dim * out_dim).map(|_| dist.sample(rng)).collect();
        let bias: Vec<f32> = (0..out_dim).map(|_| dist.sample(rng)).collect();

        let weight = Tensor::from_vec(weight, (in_dim, out_dim), device)
            .map_err(|e| GnaeError::Tensor(format!("projection weight init failed: {}", e)))?;
        let bias = Tensor::from_vec(bias, out_dim, device)
            .map_err(|e| GnaeError::Tensor(format!("projection bias init failed: {}", e)))?;

        Self::from_tensors(&weight, &bias)
    }

    /// Wrap existing tensors as trainable parameters
    pub fn from_tensors(weight: &Tensor, bias: &Tensor) -> Result<Self> {
        let (_, out_dim) = weight
            .dims2()
            .map_err(|e| GnaeError::Data(format!("projection weight must be 2-D: {}", e)))?;
        if bias.dims() != [out_dim] {
            return Err(GnaeError::Data(format!(
                "projection bias shape {:?} does not match output width {}",
                bias.dims(),
                out_dim
            )));
        }

        Ok(Self {
            weight: Var::from_tensor(weight)?,
            bias: Var::from_tensor(bias)?,
        })
    }

    /// `x @ W + b`
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        x.matmul(self.weight.as_tensor())
            .map_err(|e| GnaeError::Tensor(format!("projection matmul failed: {}", e)))?
            .broadcast_add(self.bias.as_tensor())
            .map_err(|e| GnaeError::Tensor(format!("projection bias failed: {}", e)))
    }

    pub fn in_dim(&self) -> usize {
        self.weight.as_tensor().dims()[0]
    }

    pub fn out_dim(&self) -> usize {
        self.weight.as_tensor().dims()[1]
    }

    pub fn weight(&self) -> &Var {
        &self.weight
    }

    pub fn bias(&self) -> &Var {
        &self.bias
    }

    /// Trainable variables: weight, then bias
    pub fn vars(&self) -> Vec<Var> {
        vec![self.weight.clone(), self.bias.clone()]
    }
}

// =============================================================================
// Latent output
// =============================================================================

/// Encoder output before any sampling
#[derive(Debug, Clone)]
pub enum Latent {
    /// Deterministic embedding `[N, C]`
    Plain(Tensor),
    /// Mean and log-standard-deviation, each `[N, C]`
    Variational { mu: Tensor, logstd: Tensor },
}

impl Latent {
    /// The deterministic signal: `z` for plain, `mu` for variational
    pub fn mean(&self) -> &Tensor {
        match self {
            Self::Plain(z) => z,
            Self::Variational { mu, .. } => mu,
        }
    }
}

// =============================================================================
// Encoder
// =============================================================================

/// Node encoder, one variant per model kind
#[derive(Debug, Clone)]
pub enum PropagationEncoder {
    Plain {
        linear1: Projection,
        scaling_factor: f64,
    },
    Variational {
        /// Log-std branch (no normalization)
        linear1: Projection,
        /// Mean branch (normalized and scaled)
        linear2: Projection,
        scaling_factor: f64,
        max_logstd: f64,
    },
}

impl PropagationEncoder {
    pub fn plain<R: Rng + ?Sized>(
        in_dim: usize,
        channels: usize,
        scaling_factor: f64,
        device: &Device,
        rng: &mut R,
    ) -> Result<Self> {
        Ok(Self::Plain {
            linear1: Projection::new(in_dim, channels, device, rng)?,
            scaling_factor,
        })
    }

    pub fn variational<R: Rng + ?Sized>(
        in_dim: usize,
        channels: usize,
        scaling_factor: f64,
        max_logstd: f64,
        device: &Device,
        rng: &mut R,
    ) -> Result<Self> {
        Ok(Self::Variational {
            linear1: Projection::new(in_dim, channels, device, rng)?,
            linear2: Projection::new(in_dim, channels, device, rng)?,
            scaling_factor,
            max_logstd,
        })
    }

    /// Map features `[N, F]` to latents, diffusing over `propagation`
    pub fn encode(&self, x: &Tensor, propagation: &Propagation) -> Result<Latent> {
        match self {
            Self::Plain {
                linear1,
                scaling_factor,
            } => {
                let h = normalize_rows(&linear1.forward(x)?, *scaling_factor)?;
                Ok(Latent::Plain(propagation.diffuse(&h)?))
            }
            Self::Variational {
                linear1,
                linear2,
                scaling_factor,
                max_logstd,
            } => {
                let logstd = propagation.diffuse(&linear1.forward(x)?)?;
                let logstd = logstd
                    .minimum(*max_logstd)
                    .map_err(|e| GnaeError::Tensor(format!("logstd clamp failed: {}", e)))?;

                let h = normalize_rows(&linear2.forward(x)?, *scaling_factor)?;
                let mu = propagation.diffuse(&h)?;

                Ok(Latent::Variational { mu, logstd })
            }
        }
    }

    /// Embedding width `C`
    pub fn channels(&self) -> usize {
        match self {
            Self::Plain { linear1, .. } | Self::Variational { linear1, .. } => linear1.out_dim(),
        }
    }

    /// Expected feature width `F`
    pub fn in_features(&self) -> usize {
        match self {
            Self::Plain { linear1, .. } | Self::Variational { linear1, .. } => linear1.in_dim(),
        }
    }

    /// Named projections, in parameter-file order
    pub fn projections(&self) -> Vec<(&'static str, &Projection)> {
        match self {
            Self::Plain { linear1, .. } => vec![("linear1", linear1)],
            Self::Variational {
                linear1, linear2, ..
            } => vec![("linear1", linear1), ("linear2", linear2)],
        }
    }

    /// All trainable variables
    pub fn vars(&self) -> Vec<Var> {
        self.projections()
            .into_iter()
            .flat_map(|(_, p)| p.vars())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn features() -> Tensor {
        Tensor::eye(4, candle_core::DType::F32, &Device::Cpu).unwrap()
    }

    #[test]
    fn test_projection_init_bounds() {
        let mut rng = StdRng::seed_from_u64(0);
        let proj = Projection::new(16, 8, &Device::Cpu, &mut rng).unwrap();
        assert_eq!(proj.weight().as_tensor().dims(), &[16, 8]);
        assert_eq!(proj.bias().as_tensor().dims(), &[8]);

        let w: Vec<f32> = proj.weight().as_tensor().flatten_all().unwrap().to_vec1().unwrap();
        for v in w {
            assert!(v.abs() <= 0.25 + 1e-6);
        }
    }

    #[test]
    fn test_projection_rejects_bad_bias() {
        let w = Tensor::zeros((3, 2), candle_core::DType::F32, &Device::Cpu).unwrap();
        let b = Tensor::zeros(3, candle_core::DType::F32, &Device::Cpu).unwrap();
        assert!(Projection::from_tensors(&w, &b).is_err());
    }

    #[test]
    fn test_plain_encoder_without_edges_has_scaled_rows() {
        let mut rng = StdRng::seed_from_u64(1);
        let encoder = PropagationEncoder::plain(4, 8, 1.8, &Device::Cpu, &mut rng).unwrap();
        let latent = encoder.encode(&features(), &Propagation::identity(4)).unwrap();

        let z = match latent {
            Latent::Plain(z) => z,
            _ => panic!("plain encoder returned a variational latent"),
        };
        assert_eq!(z.dims(), &[4, 8]);

        let norms: Vec<f32> = z.sqr().unwrap().sum(1).unwrap().sqrt().unwrap().to_vec1().unwrap();
        for n in norms {
            assert!((n - 1.8).abs() < 1e-4);
        }
    }

    #[test]
    fn test_variational_encoder_shapes_and_clamp() {
        let mut rng = StdRng::seed_from_u64(2);
        let encoder =
            PropagationEncoder::variational(4, 6, 1.8, 0.05, &Device::Cpu, &mut rng).unwrap();
        let prop = Propagation::new(4, &[(0, 1), (1, 2)], &Device::Cpu).unwrap();

        match encoder.encode(&features(), &prop).unwrap() {
            Latent::Variational { mu, logstd } => {
                assert_eq!(mu.dims(), &[4, 6]);
                assert_eq!(logstd.dims(), &[4, 6]);
                let vals: Vec<f32> = logstd.flatten_all().unwrap().to_vec1().unwrap();
                for v in vals {
                    assert!(v <= 0.05 + 1e-6);
                }
            }
            _ => panic!("variational encoder returned a plain latent"),
        }
        assert_eq!(encoder.vars().len(), 4);
        assert_eq!(encoder.channels(), 6);
        assert_eq!(encoder.in_features(), 4);
    }

    #[test]
    fn test_same_seed_same_parameters() {
        let a = PropagationEncoder::plain(4, 3, 1.0, &Device::Cpu, &mut StdRng::seed_from_u64(9))
            .unwrap();
        let b = PropagationEncoder::plain(4, 3, 1.0, &Device::Cpu, &mut StdRng::seed_from_u64(9))
            .unwrap();

        let wa: Vec<f32> = a.vars()[0].as_tensor().flatten_all().unwrap().to_vec1().unwrap();
        let wb: Vec<f32> = b.vars()[0].as_tensor().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(wa, wb);
    }
}
