//! csrc-portfolio: Bayesian ensemble
//!
//! Wraps a `ParticlePortfolio` and adds a Thompson-sampling layer.
//!
//! Each strategy carries a Beta posterior over P(return > 0), updated by
//! conjugate counting after every period. Each period one sample is drawn per
//! strategy and blended with the correlation-aware particle weights:
//!
//!   bᵢ ∝ cwᵢ^(1 − β) · sᵢ^β
//!
//! β = 0 is the particle allocation alone, β = 1 is Thompson alone. Strategies
//! whose blended weight exceeds `selection_threshold`, or that rank within
//! `top_k`, are selected; the top-ranked strategy is always selected. Final
//! weights are the blended weights restricted to the selection and
//! renormalized.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};

use crate::correlation::{CorrelationConfig, OnlineCorrelationMatrix};
use crate::particle::{ParticleConfig, ParticlePortfolio, ParticleSnapshot};
use crate::sampling::beta_draw;
use crate::types::{
    check_closed_unit, check_half_open_unit, check_positive, normalize_simplex, ConfigError,
    PortfolioError, PortfolioState, Universe,
};

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Blend exponent β in [0, 1].
    pub blend_beta: f64,
    /// Minimum blended weight for selection, in [0, 1).
    pub selection_threshold: f64,
    /// Always select the K highest-weighted strategies.
    pub top_k: Option<usize>,
    /// Forgetting factor in (0, 1]; 1.0 is plain conjugate counting.
    pub posterior_decay: f64,
    pub prior_successes: f64,
    pub prior_failures: f64,
    pub seed: u64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            blend_beta: 0.5,
            selection_threshold: 0.05,
            top_k: None,
            posterior_decay: 1.0,
            prior_successes: 1.0,
            prior_failures: 1.0,
            seed: 0x7E0B_5EED,
        }
    }
}

impl EnsembleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_closed_unit("ensemble.blend_beta", self.blend_beta)?;
        if !(self.selection_threshold.is_finite()
            && self.selection_threshold >= 0.0
            && self.selection_threshold < 1.0)
        {
            return Err(ConfigError::OutOfRange {
                field: "ensemble.selection_threshold",
                value: self.selection_threshold,
                expected: "[0, 1)",
            });
        }
        if self.top_k == Some(0) {
            return Err(ConfigError::OutOfRange {
                field: "ensemble.top_k",
                value: 0.0,
                expected: ">= 1",
            });
        }
        check_half_open_unit("ensemble.posterior_decay", self.posterior_decay)?;
        check_positive("ensemble.prior_successes", self.prior_successes)?;
        check_positive("ensemble.prior_failures", self.prior_failures)?;
        Ok(())
    }
}

// ─── Posterior ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BetaPosterior {
    pub alpha: f64,
    pub beta: f64,
}

impl BetaPosterior {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    /// Conjugate update. With `decay < 1` accumulated evidence is first
    /// pulled back toward `prior`, so counts never drop below it.
    pub fn observe(&mut self, success: bool, decay: f64, prior: BetaPosterior) {
        self.alpha = prior.alpha + decay * (self.alpha - prior.alpha);
        self.beta = prior.beta + decay * (self.beta - prior.beta);
        if success {
            self.alpha += 1.0;
        } else {
            self.beta += 1.0;
        }
    }

    pub fn mean(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnsembleSnapshot {
    pub portfolio: ParticleSnapshot,
    pub posteriors: Vec<BetaPosterior>,
    pub scores: Vec<f64>,
    pub rng: ChaCha20Rng,
    pub state: PortfolioState,
}

// ─── BayesianEnsemble ────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct BayesianEnsemble {
    cfg: EnsembleConfig,
    portfolio: ParticlePortfolio,
    posteriors: Vec<BetaPosterior>,
    /// Thompson draws from the last update.
    scores: Vec<f64>,
    rng: ChaCha20Rng,
    state: PortfolioState,
    blended: Vec<f64>,
    order: Vec<usize>,
}

impl BayesianEnsemble {
    pub fn new(
        universe: Universe,
        correlation: CorrelationConfig,
        particles: ParticleConfig,
        cfg: EnsembleConfig,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let portfolio = ParticlePortfolio::new(universe, correlation, particles)?;
        let n = portfolio.universe().len();
        let prior = BetaPosterior::new(cfg.prior_successes, cfg.prior_failures);
        let state = portfolio.current_state();
        Ok(Self {
            cfg,
            portfolio,
            posteriors: vec![prior; n],
            scores: vec![prior.mean(); n],
            rng: ChaCha20Rng::seed_from_u64(cfg.seed),
            state,
            blended: vec![0.0; n],
            order: (0..n).collect(),
        })
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.cfg
    }

    pub fn portfolio(&self) -> &ParticlePortfolio {
        &self.portfolio
    }

    pub fn tracker(&self) -> &OnlineCorrelationMatrix {
        self.portfolio.tracker()
    }

    pub fn universe(&self) -> &Universe {
        self.portfolio.universe()
    }

    pub fn posteriors(&self) -> &[BetaPosterior] {
        &self.posteriors
    }

    pub fn thompson_scores(&self) -> &[f64] {
        &self.scores
    }

    pub fn state(&self) -> &PortfolioState {
        &self.state
    }

    /// One period: particle step, posterior update, Thompson draw, blend,
    /// select. A rejected input changes nothing.
    pub fn update(
        &mut self,
        returns: &BTreeMap<String, f64>,
    ) -> Result<PortfolioState, PortfolioError> {
        let particle_state = self.portfolio.update(returns)?;

        let prior = BetaPosterior::new(self.cfg.prior_successes, self.cfg.prior_failures);
        let ids = self.portfolio.universe().ids();
        for (post, id) in self.posteriors.iter_mut().zip(ids) {
            let r = returns.get(id).copied().unwrap_or(0.0);
            post.observe(r > 0.0, self.cfg.posterior_decay, prior);
        }
        for (s, post) in self.scores.iter_mut().zip(&self.posteriors) {
            *s = beta_draw(&mut self.rng, post.alpha, post.beta);
        }

        let b = self.cfg.blend_beta;
        let cw = self.portfolio.aggregate_weights();
        for ((out, w), s) in self.blended.iter_mut().zip(cw).zip(&self.scores) {
            *out = w.powf(1.0 - b) * s.powf(b);
        }
        let total: f64 = self.blended.iter().sum();
        if total > 0.0 && total.is_finite() {
            self.blended.iter_mut().for_each(|x| *x /= total);
        } else {
            self.blended.copy_from_slice(cw);
        }

        let selected = self.select();
        let mut weights: Vec<f64> = self
            .blended
            .iter()
            .zip(&selected)
            .map(|(w, keep)| if *keep { *w } else { 0.0 })
            .collect();
        normalize_simplex(&mut weights);

        let universe = self.portfolio.universe();
        self.state = PortfolioState {
            tick: particle_state.tick,
            weights: universe.to_map(&weights),
            selected_strategies: universe
                .ids()
                .iter()
                .zip(&selected)
                .filter(|(_, keep)| **keep)
                .map(|(id, _)| id.clone())
                .collect(),
            correlation_metrics: self.portfolio.tracker().metrics_for(&weights),
        };
        Ok(self.state.clone())
    }

    /// Selection mask over `blended`, in universe order.
    fn select(&mut self) -> Vec<bool> {
        let blended = &self.blended;
        self.order.sort_by(|&a, &b| {
            blended[b]
                .partial_cmp(&blended[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.cmp(&b))
        });
        let mut mask = vec![false; blended.len()];
        let top_k = self.cfg.top_k.unwrap_or(0);
        for (rank, &i) in self.order.iter().enumerate() {
            if rank == 0 || rank < top_k || blended[i] > self.cfg.selection_threshold {
                mask[i] = true;
            }
        }
        mask
    }

    /// Current weights and selected subset.
    pub fn get_allocation(&self) -> (BTreeMap<String, f64>, Vec<String>) {
        (
            self.state.weights.clone(),
            self.state.selected_strategies.clone(),
        )
    }

    /// Posterior mean of each strategy's positive-period probability.
    pub fn posterior_means(&self) -> BTreeMap<String, f64> {
        self.universe()
            .ids()
            .iter()
            .zip(&self.posteriors)
            .map(|(id, p)| (id.clone(), p.mean()))
            .collect()
    }

    /// `(strategy, weight, uncertainty)` ordered by weight, heaviest first.
    /// Uncertainty is the particle cloud's spread for that strategy; ties
    /// keep universe order.
    pub fn strategy_rankings(&self) -> Vec<(String, f64, f64)> {
        let spread = &self.portfolio.diagnostics().uncertainty;
        let mut out: Vec<(String, f64, f64)> = self
            .universe()
            .ids()
            .iter()
            .zip(spread)
            .map(|(id, u)| {
                let w = self.state.weights.get(id).copied().unwrap_or(0.0);
                (id.clone(), w, *u)
            })
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        out
    }

    pub fn snapshot(&self) -> EnsembleSnapshot {
        EnsembleSnapshot {
            portfolio: self.portfolio.snapshot(),
            posteriors: self.posteriors.clone(),
            scores: self.scores.clone(),
            rng: self.rng.clone(),
            state: self.state.clone(),
        }
    }

    /// Restores a snapshot from an ensemble with the same universe and
    /// particle count. On error nothing changes.
    pub fn restore(&mut self, snap: &EnsembleSnapshot) -> Result<(), PortfolioError> {
        let n = self.posteriors.len();
        if snap.posteriors.len() != n || snap.scores.len() != n {
            return Err(PortfolioError::SnapshotMismatch {
                reason: format!("posterior count {} != {}", snap.posteriors.len(), n),
            });
        }
        self.portfolio.restore(&snap.portfolio)?;
        self.posteriors.copy_from_slice(&snap.posteriors);
        self.scores.copy_from_slice(&snap.scores);
        self.rng = snap.rng.clone();
        self.state = snap.state.clone();
        Ok(())
    }
}
