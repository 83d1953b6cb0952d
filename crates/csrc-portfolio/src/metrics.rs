use serde::{Deserialize, Serialize};

use crate::correlation::CorrelationMatrix;

/// Portfolio-level concentration and correlation summary.
///
/// Recomputed by the tracker whenever asked; it is a pure function of the
/// weights and the current correlation matrix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMetrics {
    /// Σ wᵢ². 1/N for uniform weights, 1 for a single strategy.
    pub herfindahl_index: f64,
    /// Correlation-adjusted inverse concentration, in [1, N]. See
    /// [`effective_n`]; the plain count is [`inverse_herfindahl`].
    pub effective_n_strategies: f64,
    /// Largest |ρᵢⱼ| over i ≠ j.
    pub max_pairwise_correlation: f64,
    /// Mean ρᵢⱼ over i < j.
    pub avg_correlation: f64,
}

impl CorrelationMetrics {
    /// Metrics of a single-strategy (or not yet observed) book.
    pub fn trivial() -> Self {
        Self {
            herfindahl_index: 1.0,
            effective_n_strategies: 1.0,
            max_pairwise_correlation: 0.0,
            avg_correlation: 0.0,
        }
    }

    /// Largest absolute field-wise difference against `other`.
    pub fn max_abs_change(&self, other: &CorrelationMetrics) -> f64 {
        [
            (self.herfindahl_index - other.herfindahl_index).abs(),
            (self.effective_n_strategies - other.effective_n_strategies).abs(),
            (self.max_pairwise_correlation - other.max_pairwise_correlation).abs(),
            (self.avg_correlation - other.avg_correlation).abs(),
        ]
        .into_iter()
        .fold(0.0, f64::max)
    }
}

/// Σ wᵢ² over `weights` (assumed normalized).
pub fn herfindahl(weights: &[f64]) -> f64 {
    weights.iter().map(|w| w * w).sum()
}

/// `1 / Σ wᵢ²`, the effective count ignoring correlation. 1.0 for an empty
/// or zero book.
pub fn inverse_herfindahl(weights: &[f64]) -> f64 {
    let h = herfindahl(weights);
    if h > 0.0 && h.is_finite() {
        1.0 / h
    } else {
        1.0
    }
}

/// Effective number of independent strategies held.
///
/// `1 / (Σ wᵢ² + Σ_{i≠j} wᵢ wⱼ max(ρᵢⱼ, 0))`. Positive correlation shrinks
/// the count; negative correlation counts as independence, which keeps the
/// result inside [1, N] for any simplex weights. With no positive
/// correlation this is `1 / herfindahl`.
///
/// Reaching exactly N takes uniform weights and no *positive* correlation:
/// uniform weights over a negatively correlated book also report N.
pub fn effective_n(weights: &[f64], corr: &CorrelationMatrix) -> f64 {
    let n = weights.len();
    if n == 0 {
        return 1.0;
    }
    let mut concentration = herfindahl(weights);
    for i in 0..n {
        for j in (i + 1)..n {
            let rho = corr.get(i, j).max(0.0);
            concentration += 2.0 * weights[i] * weights[j] * rho;
        }
    }
    if concentration > 0.0 {
        (1.0 / concentration).clamp(1.0, n as f64)
    } else {
        1.0
    }
}

/// Full metrics for normalized `weights` against `corr`.
pub fn compute_metrics(weights: &[f64], corr: &CorrelationMatrix) -> CorrelationMetrics {
    let n = weights.len();
    if n < 2 {
        return CorrelationMetrics::trivial();
    }
    let mut max_abs = 0.0_f64;
    let mut sum = 0.0;
    let mut pairs = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            let rho = corr.get(i, j);
            max_abs = max_abs.max(rho.abs());
            sum += rho;
            pairs += 1;
        }
    }
    CorrelationMetrics {
        herfindahl_index: herfindahl(weights),
        effective_n_strategies: effective_n(weights, corr),
        max_pairwise_correlation: max_abs,
        avg_correlation: sum / pairs as f64,
    }
}
