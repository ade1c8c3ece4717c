//! Activation Functions
//!
//! Pointwise maps used by the edge decoder and its loss.

use crate::{GnaeError, Result};
use candle_core::Tensor;

/// Sigmoid activation: σ(x) = 1 / (1 + e^(-x))
///
/// Turns decoder logits into edge probabilities. Saturates cleanly to 0 / 1
/// in the forward direction; use [`softplus`] inside losses instead of taking
/// `log` of this output.
pub fn sigmoid(tensor: &Tensor) -> Result<Tensor> {
    let neg = tensor
        .neg()
        .map_err(|e| GnaeError::Tensor(format!("sigmoid neg failed: {}", e)))?;
    let exp_neg = neg
        .exp()
        .map_err(|e| GnaeError::Tensor(format!("sigmoid exp failed: {}", e)))?;
    let one_plus = (exp_neg + 1.0)
        .map_err(|e| GnaeError::Tensor(format!("sigmoid add failed: {}", e)))?;
    one_plus
        .recip()
        .map_err(|e| GnaeError::Tensor(format!("sigmoid recip failed: {}", e)))
}

/// Softplus: log(1 + e^x), computed as `max(x, 0) + log(1 + e^(-|x|))`
///
/// `softplus(-x) = -log σ(x)` and `softplus(x) = -log(1 - σ(x))`, so this is
/// the negative log-likelihood of a positive / negative pair under the
/// sigmoid decoder. The exponent never exceeds zero, so neither the value nor
/// its gradient overflows for large logits. Always ≥ 0.
pub fn softplus(tensor: &Tensor) -> Result<Tensor> {
    let positive = tensor
        .relu()
        .map_err(|e| GnaeError::Tensor(format!("softplus relu failed: {}", e)))?;
    let neg_abs = tensor
        .abs()
        .and_then(|t| t.neg())
        .map_err(|e| GnaeError::Tensor(format!("softplus abs failed: {}", e)))?;
    let tail = neg_abs
        .exp()
        .and_then(|t| t + 1.0)
        .and_then(|t| t.log())
        .map_err(|e| GnaeError::Tensor(format!("softplus log1p failed: {}", e)))?;
    (positive + tail).map_err(|e| GnaeError::Tensor(format!("softplus add failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn device() -> Device {
        Device::Cpu
    }

    fn tensor(vals: &[f32]) -> Tensor {
        Tensor::from_vec(vals.to_vec(), vals.len(), &device()).unwrap()
    }

    #[test]
    fn test_sigmoid() {
        let t = tensor(&[0.0]);
        let s = sigmoid(&t).unwrap();
        let val = s.to_vec1::<f32>().unwrap()[0];

        // sigmoid(0) = 0.5
        assert!((val - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_sigmoid_extremes() {
        let t_large = tensor(&[100.0]);
        let val_large = sigmoid(&t_large).unwrap().to_vec1::<f32>().unwrap()[0];
        assert!((val_large - 1.0).abs() < 0.001);

        let t_small = tensor(&[-100.0]);
        let val_small = sigmoid(&t_small).unwrap().to_vec1::<f32>().unwrap()[0];
        assert!(val_small.abs() < 0.001);
    }

    #[test]
    fn test_softplus_matches_log_sigmoid() {
        let xs = [-3.0f32, -0.5, 0.0, 0.5, 3.0];
        let vals = softplus(&tensor(&xs)).unwrap().to_vec1::<f32>().unwrap();

        for (x, v) in xs.iter().zip(vals.iter()) {
            let expected = (1.0f32 + x.exp()).ln();
            assert!((v - expected).abs() < 1e-5, "softplus({}) = {}", x, v);
        }
    }

    #[test]
    fn test_softplus_large_logits() {
        let vals = softplus(&tensor(&[-200.0, 200.0])).unwrap().to_vec1::<f32>().unwrap();
        assert!(vals[0] >= 0.0 && vals[0] < 1e-6);
        assert!((vals[1] - 200.0).abs() < 1e-3);
    }

    #[test]
    fn test_softplus_gradient_finite() {
        let var = candle_core::Var::from_tensor(&tensor(&[-500.0, 0.0, 500.0])).unwrap();
        let loss = softplus(var.as_tensor()).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();
        let g = grads.get(var.as_tensor()).unwrap().to_vec1::<f32>().unwrap();

        for v in &g {
            assert!(v.is_finite());
        }
        // d/dx softplus(x) = σ(x)
        assert!(g[0].abs() < 1e-6);
        assert!((g[1] - 0.5).abs() < 1e-5);
        assert!((g[2] - 1.0).abs() < 1e-6);
    }
}
