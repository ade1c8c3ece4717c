//! Graph data
//!
//! The input side of a run: a node feature matrix plus an edge list, as handed
//! over by whatever loaded the dataset. Validation happens here so the model
//! never sees an out-of-range node index or a ragged feature matrix.
//!
//! ## JSON source format
//!
//! ```json
//! {
//!   "features": [[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
//!   "edges": [[0, 1], [1, 2]]
//! }
//! ```

pub mod split;

use crate::{Device, GnaeError, Result, Tensor};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

pub use split::{split_edges, EdgeSet, EdgeSplit, GraphBundle};

// =============================================================================
// Feature normalization
// =============================================================================

/// Row-sum feature normalization
///
/// Divides each row by `max(row_sum, 1)`, so non-negative bag-of-words style
/// features sum to one per node and sparse rows are left alone.
pub fn normalize_features(features: &mut [Vec<f32>]) {
    for row in features.iter_mut() {
        let sum: f32 = row.iter().sum();
        let denom = sum.max(1.0);
        for v in row.iter_mut() {
            *v /= denom;
        }
    }
}

// =============================================================================
// Graph source
// =============================================================================

/// Raw graph as stored on disk, before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSource {
    /// One feature row per node
    pub features: Vec<Vec<f32>>,

    /// `[source, target]` node index pairs
    pub edges: Vec<[usize; 2]>,
}

impl GraphSource {
    /// Read a JSON graph source
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(GnaeError::Io)?;
        let source: Self = serde_json::from_str(&content)?;
        info!(
            path = %path.as_ref().display(),
            nodes = source.features.len(),
            edges = source.edges.len(),
            "loaded graph source"
        );
        Ok(source)
    }

    /// Apply [`normalize_features`] in place
    pub fn normalize_features(&mut self) {
        normalize_features(&mut self.features);
    }

    /// Validate and move onto a device
    pub fn into_graph(self, device: &Device) -> Result<Graph> {
        let edges = self.edges.iter().map(|e| (e[0], e[1])).collect();
        Graph::new(self.features, edges, device)
    }
}

// =============================================================================
// Graph
// =============================================================================

/// Validated node features `[N, F]` and edge list over `[0, N)`
#[derive(Debug, Clone)]
pub struct Graph {
    features: Tensor,
    edges: Vec<(usize, usize)>,
    num_nodes: usize,
    num_features: usize,
}

impl Graph {
    /// Build a graph from feature rows and an edge list
    ///
    /// Fails with [`GnaeError::Data`] for an empty or ragged feature matrix,
    /// non-finite features, an empty edge list, or an edge endpoint outside
    /// `[0, N)`.
    pub fn new(features: Vec<Vec<f32>>, edges: Vec<(usize, usize)>, device: &Device) -> Result<Self> {
        let num_nodes = features.len();
        if num_nodes == 0 {
            return Err(GnaeError::Data("feature matrix has no rows".into()));
        }

        let num_features = features[0].len();
        if num_features == 0 {
            return Err(GnaeError::Data("feature matrix has no columns".into()));
        }

        let mut flat = Vec::with_capacity(num_nodes * num_features);
        for (i, row) in features.iter().enumerate() {
            if row.len() != num_features {
                return Err(GnaeError::Data(format!(
                    "feature row {} has {} columns, expected {}",
                    i,
                    row.len(),
                    num_features
                )));
            }
            if row.iter().any(|v| !v.is_finite()) {
                return Err(GnaeError::Data(format!("feature row {} is not finite", i)));
            }
            flat.extend_from_slice(row);
        }

        let features = Tensor::from_vec(flat, (num_nodes, num_features), device)
            .map_err(|e| GnaeError::Tensor(format!("feature upload failed: {}", e)))?;

        Self::from_tensor(features, edges)
    }

    /// Build a graph from an existing `[N, F]` feature tensor
    pub fn from_tensor(features: Tensor, edges: Vec<(usize, usize)>) -> Result<Self> {
        let (num_nodes, num_features) = features
            .dims2()
            .map_err(|e| GnaeError::Data(format!("features must be a matrix: {}", e)))?;

        if num_nodes == 0 || num_features == 0 {
            return Err(GnaeError::Data(format!(
                "feature matrix is empty ({} x {})",
                num_nodes, num_features
            )));
        }
        if edges.is_empty() {
            return Err(GnaeError::Data("edge list is empty".into()));
        }
        if let Some(&(u, v)) = edges.iter().find(|&&(u, v)| u >= num_nodes || v >= num_nodes) {
            return Err(GnaeError::Data(format!(
                "edge ({}, {}) references a node outside [0, {})",
                u, v, num_nodes
            )));
        }

        let features = features
            .to_dtype(candle_core::DType::F32)
            .map_err(|e| GnaeError::Tensor(format!("feature cast failed: {}", e)))?;

        Ok(Self {
            features,
            edges,
            num_nodes,
            num_features,
        })
    }

    /// Load, validate and upload a JSON graph source without normalization
    pub fn from_json_file(path: impl AsRef<Path>, device: &Device) -> Result<Self> {
        GraphSource::load(path)?.into_graph(device)
    }

    /// Node feature matrix `[N, F]`
    pub fn features(&self) -> &Tensor {
        &self.features
    }

    /// Edge list as given
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Number of nodes `N`
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Feature width `F`
    pub fn num_features(&self) -> usize {
        self.num_features
    }

    /// Device the features live on
    pub fn device(&self) -> &Device {
        self.features.device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_rows(n: usize) -> Vec<Vec<f32>> {
        (0..n)
            .map(|i| (0..n).map(|j| if i == j { 1.0 } else { 0.0 }).collect())
            .collect()
    }

    #[test]
    fn test_graph_new() {
        let graph = Graph::new(identity_rows(4), vec![(0, 1), (1, 2), (2, 3)], &Device::Cpu).unwrap();
        assert_eq!(graph.num_nodes(), 4);
        assert_eq!(graph.num_features(), 4);
        assert_eq!(graph.edges().len(), 3);
        assert_eq!(graph.features().dims(), &[4, 4]);
    }

    #[test]
    fn test_graph_rejects_bad_input() {
        let device = Device::Cpu;

        assert!(matches!(
            Graph::new(vec![], vec![(0, 1)], &device),
            Err(GnaeError::Data(_))
        ));
        assert!(matches!(
            Graph::new(identity_rows(3), vec![], &device),
            Err(GnaeError::Data(_))
        ));
        assert!(matches!(
            Graph::new(identity_rows(3), vec![(0, 3)], &device),
            Err(GnaeError::Data(_))
        ));
        assert!(matches!(
            Graph::new(vec![vec![1.0, 0.0], vec![1.0]], vec![(0, 1)], &device),
            Err(GnaeError::Data(_))
        ));
        assert!(matches!(
            Graph::new(vec![vec![f32::NAN], vec![1.0]], vec![(0, 1)], &device),
            Err(GnaeError::Data(_))
        ));
    }

    #[test]
    fn test_normalize_features() {
        let mut rows = vec![vec![1.0, 1.0, 2.0], vec![0.5, 0.0, 0.0], vec![0.0, 0.0, 0.0]];
        normalize_features(&mut rows);

        assert_eq!(rows[0], vec![0.25, 0.25, 0.5]);
        // Row sums below one are left as is
        assert_eq!(rows[1], vec![0.5, 0.0, 0.0]);
        assert_eq!(rows[2], vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_json_source_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");
        std::fs::write(
            &path,
            r#"{"features": [[2.0, 2.0], [0.0, 1.0], [1.0, 0.0]], "edges": [[0, 1], [1, 2]]}"#,
        )
        .unwrap();

        let mut source = GraphSource::load(&path).unwrap();
        source.normalize_features();
        assert_eq!(source.features[0], vec![0.5, 0.5]);

        let graph = source.into_graph(&Device::Cpu).unwrap();
        assert_eq!(graph.num_nodes(), 3);
        assert_eq!(graph.edges(), &[(0, 1), (1, 2)]);
    }

    #[test]
    fn test_json_source_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, r#"{"features": [[1.0]], "edges": [[0]]}"#).unwrap();

        assert!(matches!(GraphSource::load(&path), Err(GnaeError::Json(_))));
    }
}
