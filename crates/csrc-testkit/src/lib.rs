//! csrc-testkit
//!
//! Deterministic fixtures for cross-crate scenarios.
//! - `CorrelatedReturns`: seeded multivariate-normal return stream with a
//!   target correlation matrix
//! - `ScriptedStrategy`: `StrategyAdapter` replaying fixed returns/signals
//! - helpers to drive an engine or particle portfolio for N periods

use anyhow::{bail, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_distr::StandardNormal;

use csrc_engine::{AllocationEngine, EngineError, StrategyAdapter};
use csrc_portfolio::{CorrelationMatrix, ParticlePortfolio, PortfolioState, ReturnMap};

/// Seeded stream of jointly normal per-strategy returns.
///
/// `rᵢ = meanᵢ + vol · (L z)ᵢ` with `L` the Cholesky factor of the target
/// correlation matrix and `z` i.i.d. standard normal.
#[derive(Clone, Debug)]
pub struct CorrelatedReturns {
    ids: Vec<String>,
    factor: Vec<f64>,
    means: Vec<f64>,
    vol: f64,
    rng: ChaCha20Rng,
    z: Vec<f64>,
}

impl CorrelatedReturns {
    pub fn new<S: Into<String>>(
        ids: impl IntoIterator<Item = S>,
        correlation: &[Vec<f64>],
        vol: f64,
        seed: u64,
    ) -> Result<Self> {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        if correlation.len() != ids.len() {
            bail!(
                "correlation has {} rows for {} strategies",
                correlation.len(),
                ids.len()
            );
        }
        let Some(matrix) = CorrelationMatrix::from_rows(correlation) else {
            bail!("correlation rows are not a finite symmetric square matrix");
        };
        let Some(factor) = matrix.cholesky() else {
            bail!("target correlation is not positive definite");
        };
        if !(vol.is_finite() && vol >= 0.0) {
            bail!("vol must be finite and >= 0, got {vol}");
        }
        let n = ids.len();
        Ok(Self {
            ids,
            factor,
            means: vec![0.0; n],
            vol,
            rng: ChaCha20Rng::seed_from_u64(seed),
            z: vec![0.0; n],
        })
    }

    /// Per-strategy drift, in `ids` order.
    pub fn with_means(mut self, means: &[f64]) -> Result<Self> {
        if means.len() != self.ids.len() {
            bail!("{} means for {} strategies", means.len(), self.ids.len());
        }
        self.means.copy_from_slice(means);
        Ok(self)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn next_returns(&mut self) -> ReturnMap {
        let n = self.ids.len();
        for z in self.z.iter_mut() {
            *z = self.rng.sample::<f64, _>(StandardNormal);
        }
        let mut out = ReturnMap::new();
        for i in 0..n {
            let row = &self.factor[i * n..(i + 1) * n];
            let x: f64 = row.iter().zip(&self.z).map(|(l, z)| l * z).sum();
            out.insert(self.ids[i].clone(), self.means[i] + self.vol * x);
        }
        out
    }
}

/// Three strategies: A and B nearly duplicates (ρ = 0.9), C close to
/// independent of both (ρ = 0.1). Equal zero mean, 1% vol.
pub fn redundant_pair_with_diversifier(seed: u64) -> Result<CorrelatedReturns> {
    CorrelatedReturns::new(
        ["A", "B", "C"],
        &[
            vec![1.0, 0.9, 0.1],
            vec![0.9, 1.0, 0.1],
            vec![0.1, 0.1, 1.0],
        ],
        0.01,
        seed,
    )
}

/// Adapter replaying fixed per-period returns and signals. Past the end of
/// the script it reports 0.0 for both.
#[derive(Clone, Debug)]
pub struct ScriptedStrategy {
    id: String,
    returns: Vec<f64>,
    signals: Vec<f64>,
    period: usize,
    signal_calls: usize,
}

impl ScriptedStrategy {
    pub fn new(id: impl Into<String>, returns: Vec<f64>, signals: Vec<f64>) -> Self {
        Self {
            id: id.into(),
            returns,
            signals,
            period: 0,
            signal_calls: 0,
        }
    }

    /// How many times the engine asked this strategy for a signal.
    pub fn signal_calls(&self) -> usize {
        self.signal_calls
    }
}

impl StrategyAdapter for ScriptedStrategy {
    fn strategy_id(&self) -> &str {
        &self.id
    }

    fn get_signal(&mut self) -> f64 {
        self.signal_calls += 1;
        // The signal for the period whose return was just collected.
        self.period
            .checked_sub(1)
            .and_then(|p| self.signals.get(p))
            .copied()
            .unwrap_or(0.0)
    }

    fn get_realized_return(&mut self) -> f64 {
        let r = self.returns.get(self.period).copied().unwrap_or(0.0);
        self.period += 1;
        r
    }
}

/// Feeds `ticks` periods from `source` into `engine`.
pub fn drive_engine(
    engine: &mut AllocationEngine,
    source: &mut CorrelatedReturns,
    ticks: usize,
) -> Result<Vec<PortfolioState>, EngineError> {
    (0..ticks)
        .map(|_| engine.tick(&source.next_returns()))
        .collect()
}

/// Feeds `ticks` periods into a bare particle portfolio and returns the
/// mean of `f` over the final `tail` states.
pub fn tail_mean<F>(
    portfolio: &mut ParticlePortfolio,
    source: &mut CorrelatedReturns,
    ticks: usize,
    tail: usize,
    f: F,
) -> Result<f64>
where
    F: Fn(&PortfolioState) -> f64,
{
    if tail == 0 || tail > ticks {
        bail!("tail {tail} must be in 1..={ticks}");
    }
    let mut sum = 0.0;
    for t in 0..ticks {
        let state = portfolio.update(&source.next_returns())?;
        if t >= ticks - tail {
            sum += f(&state);
        }
    }
    Ok(sum / tail as f64)
}
