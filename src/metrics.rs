//! Ranking metrics for scored edge candidates
//!
//! | Metric | Range | Description |
//! |--------|-------|-------------|
//! | AUC | [0, 1] | P(score of a random positive > score of a random negative), ties count ½ |
//! | AP | [0, 1] | Area under the precision-recall curve, step interpolation |
//!
//! Both need at least one positive and one negative label; anything else is
//! reported as [`GnaeError::Metric`] instead of producing NaN. Tied scores are
//! grouped into a single threshold, so the result does not depend on input
//! order.

use crate::{GnaeError, Result};
use std::cmp::Ordering;

/// Label counts, failing unless both classes are present
fn class_counts(scores: &[f32], labels: &[bool]) -> Result<(usize, usize)> {
    if scores.len() != labels.len() {
        return Err(GnaeError::Metric(format!(
            "{} scores but {} labels",
            scores.len(),
            labels.len()
        )));
    }
    if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
        return Err(GnaeError::Numerical(format!("score evaluated to {}", bad)));
    }

    let n_pos = labels.iter().filter(|&&l| l).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(GnaeError::Metric(format!(
            "need both classes, got {} positive and {} negative",
            n_pos, n_neg
        )));
    }
    Ok((n_pos, n_neg))
}

/// Indices sorted by descending score
fn descending_order(scores: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));
    order
}

/// Area under the ROC curve (Mann-Whitney statistic with average ranks)
pub fn roc_auc(scores: &[f32], labels: &[bool]) -> Result<f64> {
    let (n_pos, n_neg) = class_counts(scores, labels)?;

    // Ascending ranks, ties share their average rank
    let mut order = descending_order(scores);
    order.reverse();

    let mut rank_sum_pos = 0.0f64;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // Ranks i+1 ..= j+1
        let avg_rank = (i + j + 2) as f64 / 2.0;
        for &idx in &order[i..=j] {
            if labels[idx] {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos_f = n_pos as f64;
    let u = rank_sum_pos - n_pos_f * (n_pos_f + 1.0) / 2.0;
    Ok(u / (n_pos_f * n_neg as f64))
}

/// Average precision: Σₖ (Rₖ − Rₖ₋₁) · Pₖ over distinct score thresholds
///
/// Without ties this is the mean of the precision at each positive's rank.
pub fn average_precision(scores: &[f32], labels: &[bool]) -> Result<f64> {
    let (n_pos, _) = class_counts(scores, labels)?;
    let order = descending_order(scores);

    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut prev_recall = 0.0f64;
    let mut ap = 0.0f64;

    let mut i = 0;
    while i < order.len() {
        // Consume the whole tie group at this threshold
        let threshold = scores[order[i]];
        while i < order.len() && scores[order[i]] == threshold {
            if labels[order[i]] {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }

        let recall = tp as f64 / n_pos as f64;
        let precision = tp as f64 / (tp + fp) as f64;
        ap += (recall - prev_recall) * precision;
        prev_recall = recall;
    }

    Ok(ap)
}

/// `(AUC, AP)` for a labelled score set
pub fn score_metrics(scores: &[f32], labels: &[bool]) -> Result<(f64, f64)> {
    Ok((roc_auc(scores, labels)?, average_precision(scores, labels)?))
}
