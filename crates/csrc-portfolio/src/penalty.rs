//! csrc-portfolio: covariance penalty
//!
//! penalty(w) = Σ_{i≠j} wᵢ · wⱼ · ρᵢⱼ
//!
//! Zero for a single-strategy book or an uncorrelated universe; positive when
//! weight sits on positively correlated pairs; negative when it sits on
//! hedging pairs. The diagonal never contributes.

use std::collections::BTreeMap;

use crate::correlation::CorrelationMatrix;

/// Penalty for dense weights in matrix order. No normalization; entries past
/// the matrix dimension are ignored.
pub fn covariance_penalty(weights: &[f64], corr: &CorrelationMatrix) -> f64 {
    let n = weights.len().min(corr.dim());
    let mut acc = 0.0;
    for i in 0..n {
        let wi = weights[i];
        if wi == 0.0 {
            continue;
        }
        let row = corr.row(i);
        for j in (i + 1)..n {
            acc += wi * weights[j] * row[j];
        }
    }
    2.0 * acc
}

/// Penalty for a keyed weight map.
///
/// `strategy_indices` maps ids to matrix rows; ids without an index (or with
/// an index outside the matrix) contribute nothing. Weights whose sum is
/// positive and not already 1 are normalized first.
pub fn calculate_covariance_penalty(
    weights: &BTreeMap<String, f64>,
    corr: &CorrelationMatrix,
    strategy_indices: &BTreeMap<String, usize>,
) -> f64 {
    let n = corr.dim();
    if n < 2 {
        return 0.0;
    }
    let mut dense = vec![0.0; n];
    for (id, w) in weights {
        if let Some(&i) = strategy_indices.get(id) {
            if i < n && w.is_finite() {
                dense[i] += *w;
            }
        }
    }
    let total: f64 = dense.iter().sum();
    if total > 0.0 && (total - 1.0).abs() > f64::EPSILON {
        for x in dense.iter_mut() {
            *x /= total;
        }
    }
    covariance_penalty(&dense, corr)
}
