//! Graph diffusion
//!
//! The parameter-free propagation step applied after the learned projections.
//! It is one round of personalized propagation with `K = 1` and teleport
//! `α = 0`, which reduces to a single multiplication by the GCN-normalized
//! adjacency:
//!
//! ```text
//! Â     = D⁻¹/² (A + I) D⁻¹/²   symmetric normalization with self-loops
//! h_out = Â @ h               one hop of smoothing, no restart term
//! ```
//!
//! `Â` is kept sparse: one gather (`index_select`) over edge sources, a
//! per-edge weight, and one scatter-sum (`index_add`) into edge targets. Both
//! ops are differentiable in candle, so gradients flow back into `h`.
//!
//! A node without edges has degree 1 (its self-loop), so its row comes out
//! unchanged. With no edges at all the step is the identity.

use crate::{GnaeError, Result};
use candle_core::{DType, Device, Tensor};
use std::collections::HashSet;
use tracing::debug;

/// Precomputed sparse structure for [`Propagation::diffuse`]
///
/// Built once per edge set and reused every epoch; the structure only depends
/// on the training edges, never on parameters.
#[derive(Debug, Clone)]
pub struct Propagation {
    num_nodes: usize,
    /// Directed messages including self-loops: `(src, dst, weight)`
    messages: Option<Messages>,
}

#[derive(Debug, Clone)]
struct Messages {
    src: Tensor,
    dst: Tensor,
    /// `[M, 1]` so it broadcasts over channels
    weight: Tensor,
    count: usize,
}

impl Propagation {
    /// Build the normalized adjacency for `num_nodes` nodes from `edges`
    ///
    /// Edges are treated as undirected: each pair contributes both
    /// directions, duplicates and self-loops in the input are collapsed, and
    /// one self-loop per node is added.
    pub fn new(num_nodes: usize, edges: &[(usize, usize)], device: &Device) -> Result<Self> {
        let mut directed: HashSet<(usize, usize)> = HashSet::with_capacity(edges.len() * 2);
        for &(u, v) in edges {
            if u >= num_nodes || v >= num_nodes {
                return Err(GnaeError::Data(format!(
                    "edge ({}, {}) out of range for {} nodes",
                    u, v, num_nodes
                )));
            }
            if u != v {
                directed.insert((u, v));
                directed.insert((v, u));
            }
        }

        if directed.is_empty() {
            return Ok(Self {
                num_nodes,
                messages: None,
            });
        }

        // Degree with self-loop: in-degree + 1
        let mut degree = vec![1.0f64; num_nodes];
        for &(_, v) in &directed {
            degree[v] += 1.0;
        }
        let inv_sqrt: Vec<f64> = degree.iter().map(|d| 1.0 / d.sqrt()).collect();

        let mut pairs: Vec<(usize, usize)> = directed.into_iter().collect();
        pairs.sort_unstable();

        let count = pairs.len() + num_nodes;
        let mut src = Vec::with_capacity(count);
        let mut dst = Vec::with_capacity(count);
        let mut weight = Vec::with_capacity(count);

        for (u, v) in pairs {
            src.push(u as u32);
            dst.push(v as u32);
            weight.push((inv_sqrt[u] * inv_sqrt[v]) as f32);
        }
        for (i, d) in degree.iter().enumerate() {
            src.push(i as u32);
            dst.push(i as u32);
            weight.push((1.0 / d) as f32);
        }

        debug!(num_nodes, messages = count, "built propagation structure");

        let src = Tensor::from_vec(src, count, device)
            .map_err(|e| GnaeError::Tensor(format!("propagation src failed: {}", e)))?;
        let dst = Tensor::from_vec(dst, count, device)
            .map_err(|e| GnaeError::Tensor(format!("propagation dst failed: {}", e)))?;
        let weight = Tensor::from_vec(weight, (count, 1), device)
            .map_err(|e| GnaeError::Tensor(format!("propagation weight failed: {}", e)))?;

        Ok(Self {
            num_nodes,
            messages: Some(Messages {
                src,
                dst,
                weight,
                count,
            }),
        })
    }

    /// Structure with no edges; diffusion is the identity
    pub fn identity(num_nodes: usize) -> Self {
        Self {
            num_nodes,
            messages: None,
        }
    }

    /// Number of nodes the structure was built for
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Number of weighted messages (directed edges plus self-loops)
    pub fn num_messages(&self) -> usize {
        self.messages.as_ref().map(|m| m.count).unwrap_or(0)
    }

    /// Apply `Â @ h`
    ///
    /// # Arguments
    /// - `h`: Node signals `[N, C]`
    ///
    /// # Returns
    /// Smoothed node signals `[N, C]`
    pub fn diffuse(&self, h: &Tensor) -> Result<Tensor> {
        let (n, channels) = h
            .dims2()
            .map_err(|e| GnaeError::Tensor(format!("diffuse dims2 failed: {}", e)))?;
        if n != self.num_nodes {
            return Err(GnaeError::Data(format!(
                "diffuse: signal has {} rows but graph has {} nodes",
                n, self.num_nodes
            )));
        }

        let messages = match &self.messages {
            Some(m) => m,
            None => return Ok(h.clone()),
        };

        // Gather source rows and weight them: [M, C]
        let gathered = h
            .index_select(&messages.src, 0)
            .map_err(|e| GnaeError::Tensor(format!("diffuse gather failed: {}", e)))?
            .broadcast_mul(&messages.weight)
            .map_err(|e| GnaeError::Tensor(format!("diffuse weight failed: {}", e)))?;

        // Scatter-sum into targets: [N, C]
        Tensor::zeros((n, channels), DType::F32, h.device())
            .map_err(|e| GnaeError::Tensor(format!("diffuse zeros failed: {}", e)))?
            .index_add(&messages.dst, &gathered, 0)
            .map_err(|e| GnaeError::Tensor(format!("diffuse scatter failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Var;

    fn device() -> Device {
        Device::Cpu
    }

    fn signal() -> Tensor {
        Tensor::from_vec(
            vec![1.0f32, 0.0, 0.0, 1.0, 2.0, 2.0, -1.0, 3.0],
            (4, 2),
            &device(),
        )
        .unwrap()
    }

    #[test]
    fn test_empty_edges_is_identity() {
        let h = signal();
        let prop = Propagation::new(4, &[], &device()).unwrap();
        assert_eq!(prop.num_messages(), 0);

        let out = prop.diffuse(&h).unwrap();
        assert_eq!(out.to_vec2::<f32>().unwrap(), h.to_vec2::<f32>().unwrap());
    }

    #[test]
    fn test_isolated_node_unchanged() {
        // Node 3 has no edges
        let h = signal();
        let prop = Propagation::new(4, &[(0, 1), (1, 2)], &device()).unwrap();
        let out = prop.diffuse(&h).unwrap().to_vec2::<f32>().unwrap();

        assert_eq!(out[3], vec![-1.0, 3.0]);
        for row in &out {
            for v in row {
                assert!(v.is_finite());
            }
        }
    }

    #[test]
    fn test_matches_dense_gcn_normalization() {
        // Path 0-1-2: degrees with self-loops are 2, 3, 2
        let h = signal().narrow(0, 0, 3).unwrap();
        let prop = Propagation::new(3, &[(0, 1), (2, 1)], &device()).unwrap();
        let out = prop.diffuse(&h).unwrap().to_vec2::<f32>().unwrap();

        let d = [2.0f32, 3.0, 2.0];
        let h_rows = h.to_vec2::<f32>().unwrap();
        let w = |i: usize, j: usize| 1.0 / (d[i] * d[j]).sqrt();

        for c in 0..2 {
            let e0 = h_rows[0][c] * w(0, 0) + h_rows[1][c] * w(0, 1);
            let e1 = h_rows[0][c] * w(1, 0) + h_rows[1][c] * w(1, 1) + h_rows[2][c] * w(1, 2);
            let e2 = h_rows[1][c] * w(2, 1) + h_rows[2][c] * w(2, 2);
            assert!((out[0][c] - e0).abs() < 1e-5);
            assert!((out[1][c] - e1).abs() < 1e-5);
            assert!((out[2][c] - e2).abs() < 1e-5);
        }
    }

    #[test]
    fn test_reverse_duplicates_collapse() {
        let a = Propagation::new(3, &[(0, 1), (1, 0), (0, 1)], &device()).unwrap();
        let b = Propagation::new(3, &[(0, 1)], &device()).unwrap();
        // 2 directed edges + 3 self-loops
        assert_eq!(a.num_messages(), 5);
        assert_eq!(b.num_messages(), 5);
    }

    #[test]
    fn test_out_of_range_edge_rejected() {
        let result = Propagation::new(3, &[(0, 3)], &device());
        assert!(matches!(result, Err(GnaeError::Data(_))));
    }

    #[test]
    fn test_row_count_mismatch_rejected() {
        let prop = Propagation::new(5, &[(0, 1)], &device()).unwrap();
        assert!(matches!(prop.diffuse(&signal()), Err(GnaeError::Data(_))));
    }

    #[test]
    fn test_gradient_flows_through_diffusion() {
        let h = Var::from_tensor(&signal()).unwrap();
        let prop = Propagation::new(4, &[(0, 1), (1, 2), (2, 3)], &device()).unwrap();
        let loss = prop.diffuse(h.as_tensor()).unwrap().sum_all().unwrap();
        let grads = loss.backward().unwrap();

        let g = grads.get(h.as_tensor()).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(g.len(), 4);
        for row in g {
            for v in row {
                assert!(v.is_finite());
                assert!(v > 0.0);
            }
        }
    }
}
