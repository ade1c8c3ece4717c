//! Core Tensor Operations
//!
//! Device resolution and the small tensor helpers shared by the encoder,
//! the decoder and the loss.

use crate::{GnaeError, Result};
use candle_core::{DType, Device, Tensor};
use tracing::info;

// ============================================================================
// Device Selection
// ============================================================================

/// Get the best available device for tensor operations
///
/// Priority:
/// 1. Metal (Apple Silicon, `metal` feature)
/// 2. CUDA (NVIDIA GPUs, `cuda` feature)
/// 3. CPU (fallback)
///
/// Called once when a [`crate::config::ComputeTarget::Auto`] is resolved.
pub fn best_device() -> Device {
    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            info!("Using Metal device (Apple Silicon)");
            return device;
        }
    }

    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            info!("Using CUDA device (NVIDIA GPU)");
            return device;
        }
    }

    info!("Using CPU device");
    Device::Cpu
}

// ============================================================================
// Row normalization
// ============================================================================

/// Scale every row to unit L2 norm, then multiply by `scale`
///
/// `x / max(‖x‖₂, 1e-12) * scale`, so each non-zero row ends up with norm
/// exactly `scale`. All-zero rows stay zero.
pub fn normalize_rows(x: &Tensor, scale: f64) -> Result<Tensor> {
    let norm = x
        .sqr()
        .and_then(|t| t.sum_keepdim(1))
        .and_then(|t| t.sqrt())
        .map_err(|e| GnaeError::Tensor(format!("normalize_rows norm failed: {}", e)))?;

    let norm = norm
        .maximum(1e-12)
        .map_err(|e| GnaeError::Tensor(format!("normalize_rows clamp failed: {}", e)))?;

    x.broadcast_div(&norm)
        .and_then(|t| t.affine(scale, 0.0))
        .map_err(|e| GnaeError::Tensor(format!("normalize_rows scale failed: {}", e)))
}

// ============================================================================
// Edge helpers
// ============================================================================

/// Split `(source, target)` pairs into two `u32` index tensors
pub fn edge_index(edges: &[(usize, usize)], device: &Device) -> Result<(Tensor, Tensor)> {
    let mut src = Vec::with_capacity(edges.len());
    let mut dst = Vec::with_capacity(edges.len());
    for &(u, v) in edges {
        src.push(u as u32);
        dst.push(v as u32);
    }

    let src = Tensor::from_vec(src, edges.len(), device)
        .map_err(|e| GnaeError::Tensor(format!("edge_index src failed: {}", e)))?;
    let dst = Tensor::from_vec(dst, edges.len(), device)
        .map_err(|e| GnaeError::Tensor(format!("edge_index dst failed: {}", e)))?;
    Ok((src, dst))
}

/// Inner products `z_u · z_v` for every pair, shape `[E]`
pub fn pair_logits(z: &Tensor, edges: &[(usize, usize)]) -> Result<Tensor> {
    if edges.is_empty() {
        return Tensor::zeros(0, DType::F32, z.device())
            .map_err(|e| GnaeError::Tensor(format!("pair_logits empty failed: {}", e)));
    }

    let (src, dst) = edge_index(edges, z.device())?;
    let z_src = z
        .index_select(&src, 0)
        .map_err(|e| GnaeError::Tensor(format!("pair_logits gather src failed: {}", e)))?;
    let z_dst = z
        .index_select(&dst, 0)
        .map_err(|e| GnaeError::Tensor(format!("pair_logits gather dst failed: {}", e)))?;

    (z_src * z_dst)
        .and_then(|t| t.sum(1))
        .map_err(|e| GnaeError::Tensor(format!("pair_logits dot failed: {}", e)))
}

/// Read back a scalar and fail with [`GnaeError::Numerical`] on NaN / Inf
pub fn finite_scalar(tensor: &Tensor, what: &str) -> Result<f32> {
    let value = tensor
        .to_dtype(DType::F32)
        .and_then(|t| t.to_scalar::<f32>())
        .map_err(|e| GnaeError::Tensor(format!("{} readback failed: {}", what, e)))?;

    if value.is_finite() {
        Ok(value)
    } else {
        Err(GnaeError::Numerical(format!("{} evaluated to {}", what, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_device() {
        let device = best_device();
        assert!(matches!(
            device,
            Device::Cpu | Device::Metal(_) | Device::Cuda(_)
        ));
    }

    #[test]
    fn test_normalize_rows_norm_equals_scale() {
        let device = Device::Cpu;
        let x = Tensor::from_vec(
            vec![3.0f32, 4.0, 0.0, 1.0, 1.0, 1.0, -2.0, 0.5, 7.0],
            (3, 3),
            &device,
        )
        .unwrap();

        for scale in [1.0, 1.8, 5.0] {
            let y = normalize_rows(&x, scale).unwrap();
            let norms: Vec<f32> = y
                .sqr()
                .unwrap()
                .sum(1)
                .unwrap()
                .sqrt()
                .unwrap()
                .to_vec1()
                .unwrap();
            for n in norms {
                assert!((n as f64 - scale).abs() < 1e-5, "norm {} != {}", n, scale);
            }
        }
    }

    #[test]
    fn test_normalize_rows_zero_row_stays_zero() {
        let device = Device::Cpu;
        let x = Tensor::from_vec(vec![0.0f32, 0.0, 1.0, 0.0], (2, 2), &device).unwrap();
        let y = normalize_rows(&x, 1.8).unwrap().to_vec2::<f32>().unwrap();

        assert_eq!(y[0], vec![0.0, 0.0]);
        assert!((y[1][0] - 1.8).abs() < 1e-6);
    }

    #[test]
    fn test_pair_logits() {
        let device = Device::Cpu;
        let z = Tensor::from_vec(vec![1.0f32, 0.0, 0.0, 2.0, 1.0, 1.0], (3, 2), &device).unwrap();
        let logits = pair_logits(&z, &[(0, 1), (0, 2), (1, 2)])
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();

        assert_eq!(logits, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_pair_logits_empty() {
        let z = Tensor::ones((3, 2), DType::F32, &Device::Cpu).unwrap();
        let logits = pair_logits(&z, &[]).unwrap();
        assert_eq!(logits.dims(), &[0]);
    }

    #[test]
    fn test_finite_scalar() {
        let device = Device::Cpu;
        let ok = Tensor::new(0.25f32, &device).unwrap();
        assert!((finite_scalar(&ok, "loss").unwrap() - 0.25).abs() < 1e-9);

        let bad = Tensor::new(f32::NAN, &device).unwrap();
        assert!(matches!(
            finite_scalar(&bad, "loss"),
            Err(GnaeError::Numerical(_))
        ));
    }
}
