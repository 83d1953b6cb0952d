//! csrc-portfolio
//!
//! Correlation-aware strategy allocation.
//! - Online EMA correlation tracking with shrinkage and PSD fallback
//! - Covariance penalty over pairwise correlations
//! - Particle-filter portfolio on the weight simplex
//! - Thompson-sampling ensemble and strategy selection
//! - Pure deterministic logic: no IO, no wall clock, seeded RNG only

mod metrics;
mod types;

pub mod correlation;
pub mod ensemble;
pub mod particle;
pub mod penalty;
pub mod sampling;

pub use correlation::{
    CorrelationConfig, CorrelationMatrix, CorrelationSnapshot, NumericalFallback,
    OnlineCorrelationMatrix, ZERO_VARIANCE_FLOOR,
};
pub use ensemble::{BayesianEnsemble, BetaPosterior, EnsembleConfig, EnsembleSnapshot};
pub use metrics::{
    compute_metrics, effective_n, herfindahl, inverse_herfindahl, CorrelationMetrics,
};
pub use particle::{ParticleConfig, ParticleDiagnostics, ParticlePortfolio, ParticleSnapshot};
pub use penalty::{calculate_covariance_penalty, covariance_penalty};
pub use types::{ConfigError, PortfolioError, PortfolioState, Universe};

use std::collections::BTreeMap;

/// Canonical per-period return map (strategy id -> realized return).
pub type ReturnMap = BTreeMap<String, f64>;

/// Helper to build a ReturnMap with minimal boilerplate.
pub fn returns<I, S>(items: I) -> ReturnMap
where
    I: IntoIterator<Item = (S, f64)>,
    S: Into<String>,
{
    let mut m = ReturnMap::new();
    for (id, r) in items {
        m.insert(id.into(), r);
    }
    m
}
