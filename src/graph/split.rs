//! Edge split and negative sampling
//!
//! Partitions the positive edges of a graph into train / validation / test
//! sets and draws an equally sized set of non-edges for each held-out set.
//!
//! ```text
//! positives ──canonicalize──► shuffle ──► [ val | test | train ]
//!                                             │      │
//!                        non-edges ◄─sample───┴──────┘  (|neg| = |pos|)
//! ```
//!
//! Only the train positives are used for message passing, so held-out links
//! never leak into the diffusion structure.

use super::Graph;
use crate::config::SplitRatios;
use crate::{GnaeError, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

/// List of `(source, target)` node pairs
pub type EdgeSet = Vec<(usize, usize)>;

/// Attempts allowed per requested negative before sampling gives up
const ATTEMPTS_PER_SAMPLE: usize = 100;

/// Flat attempt allowance on top of the per-sample budget
const BASE_ATTEMPTS: usize = 1000;

/// Undirected canonical form: smaller index first
#[inline]
pub fn canonical(u: usize, v: usize) -> (usize, usize) {
    if u <= v {
        (u, v)
    } else {
        (v, u)
    }
}

// =============================================================================
// Split result
// =============================================================================

/// The five edge sets derived from a graph's positive edges
///
/// Positive sets hold canonical `(min, max)` pairs, one entry per undirected
/// edge. Negative sets hold canonical non-edges, sampled without replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSplit {
    pub train_pos: EdgeSet,
    pub val_pos: EdgeSet,
    pub val_neg: EdgeSet,
    pub test_pos: EdgeSet,
    pub test_neg: EdgeSet,

    /// Node count the split was drawn over
    pub num_nodes: usize,

    /// Input edges dropped as self-loops or (reverse-)duplicates
    pub dropped: usize,
}

impl EdgeSplit {
    /// Train positives in both directions, for diffusion and reconstruction
    pub fn train_pos_both_directions(&self) -> EdgeSet {
        let mut edges = Vec::with_capacity(self.train_pos.len() * 2);
        for &(u, v) in &self.train_pos {
            edges.push((u, v));
            edges.push((v, u));
        }
        edges
    }

    /// Canonical train positives as a lookup set
    pub fn train_pos_set(&self) -> HashSet<(usize, usize)> {
        self.train_pos.iter().map(|&(u, v)| canonical(u, v)).collect()
    }

    /// Total number of positive edges across the three sets
    pub fn num_positive(&self) -> usize {
        self.train_pos.len() + self.val_pos.len() + self.test_pos.len()
    }
}

/// A graph together with its edge split; produced once per run
#[derive(Debug, Clone)]
pub struct GraphBundle {
    pub graph: Graph,
    pub split: EdgeSplit,
}

impl GraphBundle {
    /// Split the graph's edges according to `ratios`
    pub fn new<R: Rng + ?Sized>(graph: Graph, ratios: &SplitRatios, rng: &mut R) -> Result<Self> {
        let split = split_edges(graph.num_nodes(), graph.edges(), ratios, rng)?;
        Ok(Self { graph, split })
    }
}

// =============================================================================
// Split procedure
// =============================================================================

/// Number of edges a non-zero ratio claims out of `m`; at least one
fn held_out_count(ratio: f64, m: usize) -> usize {
    if ratio <= 0.0 {
        0
    } else {
        ((ratio * m as f64).floor() as usize).max(1)
    }
}

/// Partition `edges` into train / val / test positives and sample negatives
///
/// # Errors
/// - [`GnaeError::Data`] if no valid positive edge remains after dropping
///   self-loops and duplicates, or if there are not enough non-edges for the
///   negative sets within the retry budget.
/// - [`GnaeError::Config`] if the ratios produce an empty train, validation
///   or test set.
pub fn split_edges<R: Rng + ?Sized>(
    num_nodes: usize,
    edges: &[(usize, usize)],
    ratios: &SplitRatios,
    rng: &mut R,
) -> Result<EdgeSplit> {
    if let Some(&(u, v)) = edges.iter().find(|&&(u, v)| u >= num_nodes || v >= num_nodes) {
        return Err(GnaeError::Data(format!(
            "edge ({}, {}) out of range for {} nodes",
            u, v, num_nodes
        )));
    }

    // Canonicalize while keeping first-seen order
    let mut seen: HashSet<(usize, usize)> = HashSet::with_capacity(edges.len());
    let mut positives: EdgeSet = Vec::with_capacity(edges.len());
    for &(u, v) in edges {
        if u == v {
            continue;
        }
        let pair = canonical(u, v);
        if seen.insert(pair) {
            positives.push(pair);
        }
    }

    let dropped = edges.len() - positives.len();
    if dropped > 0 {
        warn!(dropped, "dropped self-loops and duplicate edges before splitting");
    }

    let m = positives.len();
    if m == 0 {
        return Err(GnaeError::Data("no usable positive edges to split".into()));
    }

    let n_val = held_out_count(ratios.val, m);
    let n_test = held_out_count(ratios.test, m);
    if n_val == 0 || n_test == 0 {
        return Err(GnaeError::Config(format!(
            "ratios {:?} leave an empty validation or test set",
            ratios
        )));
    }
    if n_val + n_test >= m {
        return Err(GnaeError::Config(format!(
            "{} edges cannot be split into {} val + {} test with a non-empty train set",
            m, n_val, n_test
        )));
    }

    positives.shuffle(rng);
    let val_pos = positives[..n_val].to_vec();
    let test_pos = positives[n_val..n_val + n_test].to_vec();
    let train_pos = positives[n_val + n_test..].to_vec();

    let negatives = sample_distinct_non_edges(num_nodes, &seen, n_val + n_test, rng)?;
    let val_neg = negatives[..n_val].to_vec();
    let test_neg = negatives[n_val..].to_vec();

    info!(
        train = train_pos.len(),
        val = val_pos.len(),
        test = test_pos.len(),
        "split edges"
    );

    Ok(EdgeSplit {
        train_pos,
        val_pos,
        val_neg,
        test_pos,
        test_neg,
        num_nodes,
        dropped,
    })
}

// =============================================================================
// Negative sampling
// =============================================================================

/// Number of unordered non-self pairs not present in `positives`
fn available_non_edges(num_nodes: usize, positives: &HashSet<(usize, usize)>) -> usize {
    let all_pairs = num_nodes * num_nodes.saturating_sub(1) / 2;
    all_pairs.saturating_sub(positives.len())
}

/// Draw `count` distinct canonical non-edges (no replacement)
fn sample_distinct_non_edges<R: Rng + ?Sized>(
    num_nodes: usize,
    positives: &HashSet<(usize, usize)>,
    count: usize,
    rng: &mut R,
) -> Result<EdgeSet> {
    let available = available_non_edges(num_nodes, positives);
    if count > available {
        return Err(GnaeError::Data(format!(
            "need {} negative edges but only {} non-edges exist",
            count, available
        )));
    }

    let budget = count * ATTEMPTS_PER_SAMPLE + BASE_ATTEMPTS;
    let mut chosen: HashSet<(usize, usize)> = HashSet::with_capacity(count);
    let mut sampled = Vec::with_capacity(count);
    let mut attempts = 0;

    while sampled.len() < count {
        if attempts >= budget {
            return Err(GnaeError::Data(format!(
                "negative sampling exhausted after {} attempts ({} of {} found)",
                attempts,
                sampled.len(),
                count
            )));
        }
        attempts += 1;

        let u = rng.gen_range(0..num_nodes);
        let v = rng.gen_range(0..num_nodes);
        if u == v {
            continue;
        }
        let pair = canonical(u, v);
        if positives.contains(&pair) || !chosen.insert(pair) {
            continue;
        }
        sampled.push(pair);
    }

    Ok(sampled)
}

/// Draw `count` random non-edges with replacement
///
/// Used for the fresh negatives of every training step. Pairs are returned
/// in the orientation they were drawn; `exclude` holds canonical pairs and
/// is checked in both directions.
pub fn sample_negative_edges<R: Rng + ?Sized>(
    num_nodes: usize,
    exclude: &HashSet<(usize, usize)>,
    count: usize,
    rng: &mut R,
) -> Result<EdgeSet> {
    if count == 0 {
        return Ok(Vec::new());
    }
    if available_non_edges(num_nodes, exclude) == 0 {
        return Err(GnaeError::Data(format!(
            "no non-edges left to sample among {} nodes",
            num_nodes
        )));
    }

    let budget = count * ATTEMPTS_PER_SAMPLE + BASE_ATTEMPTS;
    let mut sampled = Vec::with_capacity(count);
    let mut attempts = 0;

    while sampled.len() < count {
        if attempts >= budget {
            return Err(GnaeError::Data(format!(
                "negative sampling exhausted after {} attempts ({} of {} found)",
                attempts,
                sampled.len(),
                count
            )));
        }
        attempts += 1;

        let u = rng.gen_range(0..num_nodes);
        let v = rng.gen_range(0..num_nodes);
        if u == v || exclude.contains(&canonical(u, v)) {
            continue;
        }
        sampled.push((u, v));
    }

    Ok(sampled)
}
