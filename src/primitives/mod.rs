//! Tensor Primitives
//!
//! Building blocks shared by the encoder, decoder and loss.
//!
//! ## Submodules
//!
//! - [`tensor_ops`]: Device selection, row normalization, pair scoring
//! - [`activations`]: Sigmoid and softplus
//! - [`propagation`]: Sparse GCN-normalized diffusion

mod activations;
mod propagation;
mod tensor_ops;

// Re-export all primitives at module level
pub use activations::*;
pub use propagation::*;
pub use tensor_ops::*;
