//! csrc-portfolio: online correlation tracking
//!
//! `OnlineCorrelationMatrix` keeps exponentially-decayed means, variances and
//! pairwise covariances for a fixed strategy universe and turns them into a
//! shrunk, conditioned correlation matrix after every update.
//!
//! Matrix construction per update:
//! 1. raw ρᵢⱼ = covᵢⱼ / sqrt(varᵢ · varⱼ), clamped to [-1, 1]. Pairs with fewer
//!    than `min_samples` joint observations, or involving a zero-variance
//!    strategy, contribute 0.
//! 2. off-diagonals shrink toward 0: ρ' = (1 - shrinkage) · ρ.
//! 3. diagonal = 1 + epsilon.
//! 4. Cholesky check. On failure shrinkage is raised halfway to 1 for this
//!    update and the check retried once; if that also fails the conditioned
//!    identity is used.
//!
//! The tracker never allocates per update once constructed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::metrics::{compute_metrics, CorrelationMetrics};
use crate::types::{
    check_closed_unit, check_open_unit, check_positive, normalize_simplex, ConfigError,
    PortfolioError, Universe,
};

/// EMA variance below this is treated as zero (constant return stream).
pub const ZERO_VARIANCE_FLOOR: f64 = 1e-14;

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// EMA decay per update, in (0, 1). Higher = longer memory.
    pub decay: f64,
    /// Shrinkage toward identity, in [0, 1].
    pub shrinkage: f64,
    /// Joint observations required before a pair reports non-zero correlation.
    pub min_samples: u64,
    /// Diagonal conditioning term, > 0.
    pub epsilon: f64,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            decay: 0.99,
            shrinkage: 0.1,
            min_samples: 30,
            epsilon: 1e-6,
        }
    }
}

impl CorrelationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_open_unit("correlation.decay", self.decay)?;
        check_closed_unit("correlation.shrinkage", self.shrinkage)?;
        if self.min_samples == 0 {
            return Err(ConfigError::OutOfRange {
                field: "correlation.min_samples",
                value: 0.0,
                expected: ">= 1",
            });
        }
        check_positive("correlation.epsilon", self.epsilon)?;
        Ok(())
    }
}

// ─── CorrelationMatrix ───────────────────────────────────────────────────────

/// Dense symmetric N×N matrix, row-major.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    n: usize,
    data: Vec<f64>,
}

impl CorrelationMatrix {
    pub fn identity(n: usize) -> Self {
        Self::conditioned_identity(n, 0.0)
    }

    /// Identity with `1 + epsilon` on the diagonal.
    pub fn conditioned_identity(n: usize, epsilon: f64) -> Self {
        let mut data = vec![0.0; n * n];
        for i in 0..n {
            data[i * n + i] = 1.0 + epsilon;
        }
        Self { n, data }
    }

    /// Builds a matrix from explicit rows. Returns `None` unless the rows form
    /// a finite, square, symmetric matrix.
    pub fn from_rows(rows: &[Vec<f64>]) -> Option<Self> {
        let n = rows.len();
        if rows.iter().any(|r| r.len() != n) {
            return None;
        }
        let data: Vec<f64> = rows.iter().flatten().copied().collect();
        if data.iter().any(|x| !x.is_finite()) {
            return None;
        }
        for i in 0..n {
            for j in (i + 1)..n {
                if (data[i * n + j] - data[j * n + i]).abs() > 1e-12 {
                    return None;
                }
            }
        }
        Some(Self { n, data })
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n..(i + 1) * self.n]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Lower-triangular Cholesky factor (row-major), or `None` if any pivot
    /// is not strictly positive.
    pub fn cholesky(&self) -> Option<Vec<f64>> {
        let n = self.n;
        let mut l = vec![0.0; n * n];
        for j in 0..n {
            let mut pivot = self.get(j, j);
            for k in 0..j {
                pivot -= l[j * n + k] * l[j * n + k];
            }
            if !(pivot > 0.0 && pivot.is_finite()) {
                return None;
            }
            let d = pivot.sqrt();
            l[j * n + j] = d;
            for i in (j + 1)..n {
                let mut s = self.get(i, j);
                for k in 0..j {
                    s -= l[i * n + k] * l[j * n + k];
                }
                l[i * n + j] = s / d;
            }
        }
        Some(l)
    }
}

// ─── Conditioning ────────────────────────────────────────────────────────────

/// How the last matrix build was rescued, if it needed rescuing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NumericalFallback {
    None,
    /// Shrinkage was raised for the update; see `effective_shrinkage`.
    IncreasedShrinkage,
    /// Both attempts failed; the conditioned identity is in use.
    Identity,
}

struct Conditioned {
    matrix: CorrelationMatrix,
    fallback: NumericalFallback,
    shrinkage: f64,
}

fn shrunk(raw: &[f64], n: usize, shrinkage: f64, epsilon: f64) -> CorrelationMatrix {
    let mut data = vec![0.0; n * n];
    for i in 0..n {
        data[i * n + i] = 1.0 + epsilon;
        for j in (i + 1)..n {
            let v = (1.0 - shrinkage) * raw[i * n + j];
            data[i * n + j] = v;
            data[j * n + i] = v;
        }
    }
    CorrelationMatrix { n, data }
}

/// `raw` holds clamped correlations in its upper triangle.
fn condition(raw: &[f64], n: usize, shrinkage: f64, epsilon: f64) -> Conditioned {
    let first = shrunk(raw, n, shrinkage, epsilon);
    if first.cholesky().is_some() {
        return Conditioned {
            matrix: first,
            fallback: NumericalFallback::None,
            shrinkage,
        };
    }

    let raised = shrinkage + (1.0 - shrinkage) / 2.0;
    let second = shrunk(raw, n, raised, epsilon);
    if second.cholesky().is_some() {
        warn!(
            shrinkage,
            raised, "correlation matrix not PSD; shrinkage raised for this update"
        );
        return Conditioned {
            matrix: second,
            fallback: NumericalFallback::IncreasedShrinkage,
            shrinkage: raised,
        };
    }

    warn!(
        shrinkage,
        raised, "correlation matrix not PSD after retry; falling back to identity"
    );
    Conditioned {
        matrix: CorrelationMatrix::conditioned_identity(n, epsilon),
        fallback: NumericalFallback::Identity,
        shrinkage: 1.0,
    }
}

// ─── Tracker ─────────────────────────────────────────────────────────────────

/// Serializable tracker state. The conditioned matrix is derived, so it is
/// rebuilt on restore rather than stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CorrelationSnapshot {
    pub universe: Universe,
    pub means: Vec<f64>,
    pub variances: Vec<f64>,
    pub observations: Vec<u64>,
    pub covariances: Vec<f64>,
    pub pair_counts: Vec<u64>,
    pub n_updates: u64,
}

#[derive(Clone, Debug)]
pub struct OnlineCorrelationMatrix {
    cfg: CorrelationConfig,
    universe: Universe,
    means: Vec<f64>,
    variances: Vec<f64>,
    /// Per-strategy observation count.
    observations: Vec<u64>,
    /// Upper triangle used; row-major n×n.
    covariances: Vec<f64>,
    pair_counts: Vec<u64>,
    n_updates: u64,

    // derived / scratch
    current: CorrelationMatrix,
    fallback: NumericalFallback,
    effective_shrinkage: f64,
    present: Vec<bool>,
    deviations: Vec<f64>,
    raw: Vec<f64>,
}

impl OnlineCorrelationMatrix {
    pub fn new(universe: Universe, cfg: CorrelationConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let n = universe.len();
        let mut tracker = Self {
            cfg,
            universe,
            means: vec![0.0; n],
            variances: vec![0.0; n],
            observations: vec![0; n],
            covariances: vec![0.0; n * n],
            pair_counts: vec![0; n * n],
            n_updates: 0,
            current: CorrelationMatrix::conditioned_identity(n, cfg.epsilon),
            fallback: NumericalFallback::None,
            effective_shrinkage: cfg.shrinkage,
            present: vec![false; n],
            deviations: vec![0.0; n],
            raw: vec![0.0; n * n],
        };
        tracker.rebuild();
        Ok(tracker)
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.cfg
    }

    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    pub fn n_updates(&self) -> u64 {
        self.n_updates
    }

    pub fn fallback(&self) -> NumericalFallback {
        self.fallback
    }

    /// Shrinkage actually applied to the current matrix.
    pub fn effective_shrinkage(&self) -> f64 {
        self.effective_shrinkage
    }

    /// Joint observation count for a pair (0 for unknown ids).
    pub fn pair_observations(&self, a: &str, b: &str) -> u64 {
        match (self.universe.index_of(a), self.universe.index_of(b)) {
            (Some(i), Some(j)) if i == j => self.observations[i],
            (Some(i), Some(j)) => {
                let (lo, hi) = if i < j { (i, j) } else { (j, i) };
                self.pair_counts[lo * self.universe.len() + hi]
            }
            _ => 0,
        }
    }

    /// Folds one period of returns into the running statistics.
    ///
    /// `returns` may cover a subset of the universe; absent strategies keep
    /// their statistics and pair counters unchanged. Unknown ids and
    /// non-finite values reject the whole update with no state change.
    pub fn update(&mut self, returns: &BTreeMap<String, f64>) -> Result<(), PortfolioError> {
        self.universe.check_partial(returns)?;

        let n = self.universe.len();
        let d = self.cfg.decay;

        self.present.iter_mut().for_each(|p| *p = false);
        for (id, x) in returns {
            // check_partial guarantees the id is known.
            let Some(i) = self.universe.index_of(id) else {
                continue;
            };
            self.present[i] = true;
            if self.observations[i] == 0 {
                self.means[i] = *x;
                self.deviations[i] = 0.0;
            } else {
                self.means[i] = d * self.means[i] + (1.0 - d) * x;
                let dev = x - self.means[i];
                self.deviations[i] = dev;
                self.variances[i] = d * self.variances[i] + (1.0 - d) * dev * dev;
            }
            self.observations[i] += 1;
        }

        for i in 0..n {
            if !self.present[i] {
                continue;
            }
            for j in (i + 1)..n {
                if !self.present[j] {
                    continue;
                }
                let k = i * n + j;
                self.covariances[k] = d * self.covariances[k]
                    + (1.0 - d) * self.deviations[i] * self.deviations[j];
                self.pair_counts[k] += 1;
            }
        }

        self.n_updates += 1;
        self.rebuild();
        Ok(())
    }

    fn rebuild(&mut self) {
        let n = self.universe.len();
        for i in 0..n {
            for j in (i + 1)..n {
                let k = i * n + j;
                let vi = self.variances[i];
                let vj = self.variances[j];
                let usable = self.pair_counts[k] >= self.cfg.min_samples
                    && vi > ZERO_VARIANCE_FLOOR
                    && vj > ZERO_VARIANCE_FLOOR;
                let rho = if usable {
                    self.covariances[k] / (vi * vj).sqrt()
                } else {
                    0.0
                };
                self.raw[k] = if rho.is_finite() {
                    rho.clamp(-1.0, 1.0)
                } else {
                    0.0
                };
            }
        }
        let c = condition(&self.raw, n, self.cfg.shrinkage, self.cfg.epsilon);
        self.current = c.matrix;
        self.fallback = c.fallback;
        self.effective_shrinkage = c.shrinkage;
    }

    /// Current conditioned correlation matrix, in universe order.
    pub fn get_correlation_matrix(&self) -> &CorrelationMatrix {
        &self.current
    }

    /// Correlation between two strategies; `Some(1.0)` for `a == b`,
    /// `None` if either id is unknown.
    pub fn get_pairwise_correlation(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.universe.index_of(a)?;
        let j = self.universe.index_of(b)?;
        if i == j {
            return Some(1.0);
        }
        Some(self.current.get(i, j))
    }

    /// Metrics for `weights` (normalized internally; ids outside the
    /// universe are ignored). `None` means equal weights.
    pub fn get_metrics(&self, weights: Option<&BTreeMap<String, f64>>) -> CorrelationMetrics {
        let n = self.universe.len();
        let mut w = vec![0.0; n];
        match weights {
            Some(map) => {
                for (id, x) in map {
                    if let Some(i) = self.universe.index_of(id) {
                        w[i] = *x;
                    }
                }
            }
            None => w.iter_mut().for_each(|x| *x = 1.0),
        }
        normalize_simplex(&mut w);
        compute_metrics(&w, &self.current)
    }

    /// Metrics for dense weights already in universe order and normalized.
    pub fn metrics_for(&self, weights: &[f64]) -> CorrelationMetrics {
        compute_metrics(weights, &self.current)
    }

    pub fn snapshot(&self) -> CorrelationSnapshot {
        CorrelationSnapshot {
            universe: self.universe.clone(),
            means: self.means.clone(),
            variances: self.variances.clone(),
            observations: self.observations.clone(),
            covariances: self.covariances.clone(),
            pair_counts: self.pair_counts.clone(),
            n_updates: self.n_updates,
        }
    }

    /// Replaces the running statistics. The snapshot must come from a tracker
    /// over the same universe; otherwise nothing changes.
    pub fn restore(&mut self, snap: &CorrelationSnapshot) -> Result<(), PortfolioError> {
        let n = self.universe.len();
        if snap.universe != self.universe {
            return Err(PortfolioError::SnapshotMismatch {
                reason: format!(
                    "universe {:?} != {:?}",
                    snap.universe.ids(),
                    self.universe.ids()
                ),
            });
        }
        let shapes_ok = snap.means.len() == n
            && snap.variances.len() == n
            && snap.observations.len() == n
            && snap.covariances.len() == n * n
            && snap.pair_counts.len() == n * n;
        if !shapes_ok {
            return Err(PortfolioError::SnapshotMismatch {
                reason: "correlation buffer length mismatch".to_string(),
            });
        }
        self.means.copy_from_slice(&snap.means);
        self.variances.copy_from_slice(&snap.variances);
        self.observations.copy_from_slice(&snap.observations);
        self.covariances.copy_from_slice(&snap.covariances);
        self.pair_counts.copy_from_slice(&snap.pair_counts);
        self.n_updates = snap.n_updates;
        self.rebuild();
        Ok(())
    }
}
