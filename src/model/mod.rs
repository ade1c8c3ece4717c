//! Encoder / decoder model
//!
//! - [`encoder`]: linear projections + diffusion, plain and variational
//! - [`autoencoder`]: dot-product decoder, loss, evaluation, persistence

pub mod autoencoder;
pub mod encoder;

use serde::{Deserialize, Serialize};

pub use autoencoder::{Autoencoder, Encoding};
pub use encoder::{Latent, Projection, PropagationEncoder};

/// Forward-pass phase, passed explicitly to `encode` / `loss`
///
/// Only the variational model behaves differently: `Train` draws a
/// reparameterized sample, `Eval` uses the mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Train,
    Eval,
}
