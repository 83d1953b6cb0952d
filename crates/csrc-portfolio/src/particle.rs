//! csrc-portfolio: particle portfolio
//!
//! A cloud of candidate weight vectors on the probability simplex, evolved by
//! importance resampling.
//!
//! Per update:
//! 1. fold returns into the correlation tracker;
//! 2. fitnessₖ = wₖ·r − λ · (Σ wₖᵢ² + penalty(wₖ))   (skipped when λ = 0).
//!    The Herfindahl term charges concentration alongside correlation, so
//!    the penalized optimum is the most diversified point rather than a
//!    vertex of the simplex;
//! 3. pₖ = softmax(fitness / temperature);
//! 4. aggregate = Σ pₖ wₖ  (this is the published allocation);
//! 5. ESS = 1 / Σ pₖ². Below `ess_floor_ratio · n_particles` the whole cloud is
//!    redrawn from the Dirichlet prior; otherwise it is systematically
//!    resampled by p and every particle is jittered with
//!    Dirichlet(jitter_concentration · w + prior_concentration).
//!
//! Particles live in one contiguous `n_particles × n_strategies` buffer with a
//! same-sized scratch buffer for resampling, so an update does not allocate.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::correlation::{
    CorrelationConfig, CorrelationMatrix, CorrelationSnapshot, OnlineCorrelationMatrix,
};
use crate::metrics::herfindahl;
use crate::penalty::covariance_penalty;
use crate::sampling::dirichlet_into;
use crate::types::{
    check_non_negative, check_positive, normalize_simplex, ConfigError, PortfolioError,
    PortfolioState, Universe,
};

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleConfig {
    pub n_particles: usize,
    /// Weight of the covariance penalty in fitness. 0 disables it.
    pub lambda_penalty: f64,
    /// Softmax temperature over fitness.
    pub temperature: f64,
    /// Symmetric Dirichlet prior concentration (initial draw, redraw, and the
    /// floor added to jitter concentrations).
    pub prior_concentration: f64,
    /// Scale of the resampling jitter; larger = smaller moves.
    pub jitter_concentration: f64,
    /// Fraction of `n_particles` below which ESS triggers a prior redraw.
    pub ess_floor_ratio: f64,
    pub seed: u64,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            n_particles: 200,
            lambda_penalty: 1.0,
            temperature: 1.0,
            prior_concentration: 1.0,
            jitter_concentration: 30.0,
            ess_floor_ratio: 0.1,
            seed: 0x00C5_5EED,
        }
    }
}

impl ParticleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_particles < 2 {
            return Err(ConfigError::TooFewParticles {
                n_particles: self.n_particles,
            });
        }
        check_non_negative("particles.lambda_penalty", self.lambda_penalty)?;
        check_positive("particles.temperature", self.temperature)?;
        check_positive("particles.prior_concentration", self.prior_concentration)?;
        check_positive("particles.jitter_concentration", self.jitter_concentration)?;
        if !(self.ess_floor_ratio.is_finite()
            && self.ess_floor_ratio > 0.0
            && self.ess_floor_ratio <= 1.0)
        {
            return Err(ConfigError::OutOfRange {
                field: "particles.ess_floor_ratio",
                value: self.ess_floor_ratio,
                expected: "(0, 1]",
            });
        }
        Ok(())
    }
}

// ─── Diagnostics ─────────────────────────────────────────────────────────────

/// Cloud health after the most recent update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleDiagnostics {
    pub effective_sample_size: f64,
    /// True if the cloud was redrawn from the prior this update.
    pub diversity_recovered: bool,
    /// Fitness-weighted standard deviation of each strategy's weight.
    pub uncertainty: Vec<f64>,
    pub best_fitness: f64,
    /// Weights of the fittest particle, taken before resampling.
    pub best_particle: Vec<f64>,
}

impl ParticleDiagnostics {
    fn initial(n_particles: usize, n_strategies: usize) -> Self {
        Self {
            effective_sample_size: n_particles as f64,
            diversity_recovered: false,
            uncertainty: vec![0.0; n_strategies],
            best_fitness: 0.0,
            best_particle: vec![1.0 / n_strategies as f64; n_strategies],
        }
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticleSnapshot {
    pub correlation: CorrelationSnapshot,
    pub particles: Vec<f64>,
    pub aggregate: Vec<f64>,
    pub rng: ChaCha20Rng,
    pub tick: u64,
    pub diagnostics: ParticleDiagnostics,
}

// ─── ParticlePortfolio ───────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct ParticlePortfolio {
    cfg: ParticleConfig,
    tracker: OnlineCorrelationMatrix,
    n_strategies: usize,
    /// n_particles × n_strategies, row-major.
    particles: Vec<f64>,
    scratch: Vec<f64>,
    fitness: Vec<f64>,
    probs: Vec<f64>,
    returns: Vec<f64>,
    alphas: Vec<f64>,
    aggregate: Vec<f64>,
    rng: ChaCha20Rng,
    tick: u64,
    diagnostics: ParticleDiagnostics,
}

impl ParticlePortfolio {
    pub fn new(
        universe: Universe,
        correlation: CorrelationConfig,
        cfg: ParticleConfig,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let tracker = OnlineCorrelationMatrix::new(universe, correlation)?;
        let n = tracker.universe().len();
        let m = cfg.n_particles;
        let mut pf = Self {
            cfg,
            tracker,
            n_strategies: n,
            particles: vec![0.0; m * n],
            scratch: vec![0.0; m * n],
            fitness: vec![0.0; m],
            probs: vec![0.0; m],
            returns: vec![0.0; n],
            alphas: vec![0.0; n],
            aggregate: vec![1.0 / n as f64; n],
            rng: ChaCha20Rng::seed_from_u64(cfg.seed),
            tick: 0,
            diagnostics: ParticleDiagnostics::initial(m, n),
        };
        pf.redraw_from_prior();
        Ok(pf)
    }

    pub fn config(&self) -> &ParticleConfig {
        &self.cfg
    }

    pub fn tracker(&self) -> &OnlineCorrelationMatrix {
        &self.tracker
    }

    pub fn universe(&self) -> &Universe {
        self.tracker.universe()
    }

    pub fn diagnostics(&self) -> &ParticleDiagnostics {
        &self.diagnostics
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Last published allocation, dense in universe order.
    pub fn aggregate_weights(&self) -> &[f64] {
        &self.aggregate
    }

    pub fn particle(&self, k: usize) -> &[f64] {
        &self.particles[k * self.n_strategies..(k + 1) * self.n_strategies]
    }

    pub fn n_particles(&self) -> usize {
        self.cfg.n_particles
    }

    /// Weights of the fittest particle seen by the most recent update;
    /// equal weights before the first one.
    pub fn best_particle(&self) -> BTreeMap<String, f64> {
        self.universe().to_map(&self.diagnostics.best_particle)
    }

    /// Current allocation; equal weights before the first update.
    pub fn current_state(&self) -> PortfolioState {
        self.state_from_aggregate()
    }

    /// Runs one filter step. `returns` must cover exactly the universe.
    pub fn update(
        &mut self,
        returns: &BTreeMap<String, f64>,
    ) -> Result<PortfolioState, PortfolioError> {
        self.tracker.universe().check_returns(returns)?;
        self.tracker.update(returns)?;

        for (slot, id) in self.returns.iter_mut().zip(self.tracker.universe().ids()) {
            *slot = returns.get(id).copied().unwrap_or(0.0);
        }

        let corr = self.tracker.get_correlation_matrix();
        let (best_index, best) = evaluate_fitness(
            &self.particles,
            self.n_strategies,
            &self.returns,
            corr,
            self.cfg.lambda_penalty,
            &mut self.fitness,
        );
        let ess = softmax_into(&self.fitness, self.cfg.temperature, &mut self.probs);

        self.aggregate_cloud();
        let n = self.n_strategies;
        self.diagnostics
            .best_particle
            .copy_from_slice(&self.particles[best_index * n..(best_index + 1) * n]);

        let floor = self.cfg.ess_floor_ratio * self.cfg.n_particles as f64;
        let recovered = ess < floor;
        if recovered {
            warn!(
                ess,
                floor,
                tick = self.tick + 1,
                "particle ESS below floor; redrawing from prior"
            );
            self.redraw_from_prior();
        } else {
            self.systematic_resample();
            self.jitter();
        }

        self.tick += 1;
        self.diagnostics.effective_sample_size = ess;
        self.diagnostics.diversity_recovered = recovered;
        self.diagnostics.best_fitness = best;

        Ok(self.state_from_aggregate())
    }

    fn state_from_aggregate(&self) -> PortfolioState {
        let universe = self.tracker.universe();
        PortfolioState {
            tick: self.tick,
            weights: universe.to_map(&self.aggregate),
            selected_strategies: universe.ids().to_vec(),
            correlation_metrics: self.tracker.metrics_for(&self.aggregate),
        }
    }

    /// Fitness-weighted mean and spread of the cloud.
    fn aggregate_cloud(&mut self) {
        let n = self.n_strategies;
        self.aggregate.iter_mut().for_each(|x| *x = 0.0);
        for (k, p) in self.probs.iter().enumerate() {
            let row = &self.particles[k * n..(k + 1) * n];
            for (a, w) in self.aggregate.iter_mut().zip(row) {
                *a += p * w;
            }
        }
        normalize_simplex(&mut self.aggregate);

        self.diagnostics.uncertainty.iter_mut().for_each(|x| *x = 0.0);
        for (k, p) in self.probs.iter().enumerate() {
            let row = &self.particles[k * n..(k + 1) * n];
            for ((u, w), a) in self
                .diagnostics
                .uncertainty
                .iter_mut()
                .zip(row)
                .zip(&self.aggregate)
            {
                *u += p * (w - a) * (w - a);
            }
        }
        self.diagnostics
            .uncertainty
            .iter_mut()
            .for_each(|u| *u = u.sqrt());
    }

    fn redraw_from_prior(&mut self) {
        let n = self.n_strategies;
        self.alphas
            .iter_mut()
            .for_each(|a| *a = self.cfg.prior_concentration);
        for row in self.particles.chunks_exact_mut(n) {
            dirichlet_into(&mut self.rng, &self.alphas, row);
        }
    }

    /// One uniform offset, N evenly spaced pointers into the CDF of `probs`.
    fn systematic_resample(&mut self) {
        let n = self.n_strategies;
        let m = self.cfg.n_particles;
        let step = 1.0 / m as f64;
        let mut pointer = self.rng.gen::<f64>() * step;
        let mut cumulative = self.probs[0];
        let mut j = 0usize;
        for k in 0..m {
            while pointer >= cumulative && j + 1 < m {
                j += 1;
                cumulative += self.probs[j];
            }
            self.scratch[k * n..(k + 1) * n].copy_from_slice(&self.particles[j * n..(j + 1) * n]);
            pointer += step;
        }
        std::mem::swap(&mut self.particles, &mut self.scratch);
    }

    fn jitter(&mut self) {
        let n = self.n_strategies;
        let kappa = self.cfg.jitter_concentration;
        let floor = self.cfg.prior_concentration;
        for row in self.particles.chunks_exact_mut(n) {
            for (a, w) in self.alphas.iter_mut().zip(row.iter()) {
                *a = kappa * w + floor;
            }
            dirichlet_into(&mut self.rng, &self.alphas, row);
        }
    }

    pub fn snapshot(&self) -> ParticleSnapshot {
        ParticleSnapshot {
            correlation: self.tracker.snapshot(),
            particles: self.particles.clone(),
            aggregate: self.aggregate.clone(),
            rng: self.rng.clone(),
            tick: self.tick,
            diagnostics: self.diagnostics.clone(),
        }
    }

    /// Restores a snapshot taken from a portfolio with the same universe and
    /// particle count. On error nothing changes.
    pub fn restore(&mut self, snap: &ParticleSnapshot) -> Result<(), PortfolioError> {
        let n = self.n_strategies;
        if snap.particles.len() != self.particles.len()
            || snap.aggregate.len() != n
            || snap.diagnostics.uncertainty.len() != n
            || snap.diagnostics.best_particle.len() != n
        {
            return Err(PortfolioError::SnapshotMismatch {
                reason: format!(
                    "particle buffer {} != {}",
                    snap.particles.len(),
                    self.particles.len()
                ),
            });
        }
        self.tracker.restore(&snap.correlation)?;
        self.particles.copy_from_slice(&snap.particles);
        self.aggregate.copy_from_slice(&snap.aggregate);
        self.rng = snap.rng.clone();
        self.tick = snap.tick;
        self.diagnostics = snap.diagnostics.clone();
        Ok(())
    }
}

/// Writes per-particle fitness into `out`; returns the index and value of
/// the best particle (lowest index on ties).
fn evaluate_fitness(
    particles: &[f64],
    n: usize,
    returns: &[f64],
    corr: &CorrelationMatrix,
    lambda: f64,
    out: &mut [f64],
) -> (usize, f64) {
    let mut best = (0, f64::NEG_INFINITY);
    for (k, (f, w)) in out.iter_mut().zip(particles.chunks_exact(n)).enumerate() {
        let ret: f64 = w.iter().zip(returns).map(|(a, b)| a * b).sum();
        let cost = if lambda == 0.0 {
            0.0
        } else {
            herfindahl(w) + covariance_penalty(w, corr)
        };
        *f = ret - lambda * cost;
        if *f > best.1 {
            best = (k, *f);
        }
    }
    best
}

/// Max-shifted softmax of `fitness / temperature` into `out`; returns ESS.
fn softmax_into(fitness: &[f64], temperature: f64, out: &mut [f64]) -> f64 {
    let max = fitness.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for (p, f) in out.iter_mut().zip(fitness) {
        *p = ((f - max) / temperature).exp();
        total += *p;
    }
    let mut sum_sq = 0.0;
    for p in out.iter_mut() {
        *p /= total;
        sum_sq += *p * *p;
    }
    1.0 / sum_sq
}
