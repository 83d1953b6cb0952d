use std::collections::BTreeMap;

use serde_json::json;
use tracing::{debug, info, warn};

use csrc_audit::{
    AuditEmitter, BufferedEmitter, RISK_LIMIT_BREACH, SYS_CORRELATION_UPDATE,
    SYS_NUMERICAL_FALLBACK, SYS_RESAMPLING,
};
use csrc_config::{AuditConfig, EngineConfig};
use csrc_portfolio::{
    BayesianEnsemble, CorrelationMetrics, NumericalFallback, PortfolioError, PortfolioState,
};
use csrc_risk::{LimitBreach, LimitDecision, PositionSizer, RiskLimits};

use crate::adapter::{MarketContext, StrategyAdapter};
use crate::types::{EngineError, EngineSnapshot, EquityTracker, SizedOrder, TickOutput};

/// Explicit context object bundling configuration and every mutable
/// accumulator. There is no module-level state; two engines never interact.
#[derive(Clone, Debug)]
pub struct AllocationEngine {
    ensemble: BayesianEnsemble,
    sizer: PositionSizer,
    limits: RiskLimits,
    audit_cfg: AuditConfig,
    outbox: BufferedEmitter,
    last_emitted: Option<CorrelationMetrics>,
    equity: EquityTracker,
}

impl AllocationEngine {
    /// Validates the whole config once; nothing is re-checked per tick.
    pub fn new(cfg: &EngineConfig) -> Result<Self, EngineError> {
        cfg.validate()?;
        let ensemble = BayesianEnsemble::new(
            cfg.universe()?,
            cfg.correlation,
            cfg.particles,
            cfg.ensemble,
        )?;
        let sizer = PositionSizer::new(cfg.sizing)?;
        info!(
            strategies = cfg.strategies.len(),
            n_particles = cfg.particles.n_particles,
            lambda_penalty = cfg.particles.lambda_penalty,
            blend_beta = cfg.ensemble.blend_beta,
            "allocation engine constructed"
        );
        Ok(Self {
            ensemble,
            sizer,
            limits: cfg.risk_limits,
            audit_cfg: cfg.audit,
            outbox: BufferedEmitter::new(cfg.audit.buffer_capacity),
            last_emitted: None,
            equity: EquityTracker::default(),
        })
    }

    pub fn ensemble(&self) -> &BayesianEnsemble {
        &self.ensemble
    }

    pub fn sizer(&self) -> &PositionSizer {
        &self.sizer
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn state(&self) -> &PortfolioState {
        self.ensemble.state()
    }

    pub fn equity(&self) -> &EquityTracker {
        &self.equity
    }

    /// Events recorded but not yet flushed.
    pub fn outbox(&self) -> &BufferedEmitter {
        &self.outbox
    }

    /// Delivers pending audit events to `sink`; returns how many were sent.
    pub fn flush_audit(&mut self, sink: &mut dyn AuditEmitter) -> usize {
        self.outbox.flush_into(sink)
    }

    /// Allocation step for one period. `returns` must cover the universe
    /// exactly; otherwise the tick is rejected and nothing changes.
    pub fn tick(&mut self, returns: &BTreeMap<String, f64>) -> Result<PortfolioState, EngineError> {
        let prev_weights = self.ensemble.state().weights.clone();
        let state = self.ensemble.update(returns).map_err(|e| {
            if let PortfolioError::StrategySetMismatch { unknown, missing } = &e {
                warn!(?unknown, ?missing, "tick rejected: strategy set mismatch");
            }
            EngineError::from(e)
        })?;

        let period_return: f64 = prev_weights
            .iter()
            .map(|(id, w)| w * returns.get(id).copied().unwrap_or(0.0))
            .sum();
        self.equity.apply(period_return);

        self.record_tick_events(&state);

        let diag = self.ensemble.portfolio().diagnostics();
        debug!(
            tick = state.tick,
            ess = diag.effective_sample_size,
            effective_n = state.correlation_metrics.effective_n_strategies,
            selected = state.selected_strategies.len(),
            "tick complete"
        );
        Ok(state)
    }

    /// Full period: collect realized returns from every adapter, run the
    /// allocation step, then size each selected strategy against `market`.
    ///
    /// The tape EMA advances once per successful tick, however many
    /// strategies are sized.
    pub fn tick_adapters(
        &mut self,
        adapters: &mut [&mut dyn StrategyAdapter],
        market: MarketContext,
    ) -> Result<TickOutput, EngineError> {
        let mut returns = BTreeMap::new();
        for a in adapters.iter_mut() {
            let id = a.strategy_id().to_string();
            let r = a.get_realized_return();
            if returns.insert(id.clone(), r).is_some() {
                return Err(EngineError::DuplicateAdapter { strategy_id: id });
            }
        }

        let state = self.tick(&returns)?;

        // A rejected tape reading sizes every strategy to zero.
        let multiplier = self.sizer.observe_tape(market.tape_speed).unwrap_or(f64::NAN);

        let mut orders = Vec::with_capacity(state.selected_strategies.len());
        for id in &state.selected_strategies {
            let Some(adapter) = adapters.iter_mut().find(|a| a.strategy_id() == id.as_str()) else {
                continue;
            };
            let signal = adapter.get_signal();
            let breakdown = self
                .sizer
                .size_with_multiplier(signal, market.volatility, multiplier);
            let limit = self.limits.check_order(breakdown.size);
            orders.push(SizedOrder {
                strategy_id: id.clone(),
                weight: state.weights.get(id).copied().unwrap_or(0.0),
                signal,
                size: breakdown.size,
                breakdown,
                limit,
            });
        }

        let sizes: Vec<f64> = orders.iter().map(|o| o.size).collect();
        let gross = self.limits.check_gross(&sizes);
        let drawdown = self.limits.check_drawdown(self.equity.drawdown());

        for o in &orders {
            if let LimitDecision::Breach(b) = &o.limit {
                self.record_breach(state.tick, Some(o.strategy_id.as_str()), b);
            }
        }
        for d in [&gross, &drawdown] {
            if let LimitDecision::Breach(b) = d {
                self.record_breach(state.tick, None, b);
            }
        }

        Ok(TickOutput {
            state,
            orders,
            gross,
            drawdown,
        })
    }

    fn record_tick_events(&mut self, state: &PortfolioState) {
        let metrics = &state.correlation_metrics;
        let changed = match &self.last_emitted {
            None => true,
            Some(prev) => metrics.max_abs_change(prev) > self.audit_cfg.metrics_change_threshold,
        };
        if changed {
            self.outbox.emit(
                SYS_CORRELATION_UPDATE,
                json!({
                    "tick": state.tick,
                    "herfindahl_index": metrics.herfindahl_index,
                    "effective_n_strategies": metrics.effective_n_strategies,
                    "max_pairwise_correlation": metrics.max_pairwise_correlation,
                    "avg_correlation": metrics.avg_correlation,
                }),
            );
            self.last_emitted = Some(metrics.clone());
        }

        let diag = self.ensemble.portfolio().diagnostics();
        if diag.diversity_recovered {
            let ess = diag.effective_sample_size;
            self.outbox.emit(
                SYS_RESAMPLING,
                json!({
                    "tick": state.tick,
                    "effective_sample_size": ess,
                    "n_particles": self.ensemble.portfolio().n_particles(),
                }),
            );
        }

        let tracker = self.ensemble.tracker();
        let fallback = match tracker.fallback() {
            NumericalFallback::None => None,
            NumericalFallback::IncreasedShrinkage => Some("increased_shrinkage"),
            NumericalFallback::Identity => Some("identity"),
        };
        if let Some(kind) = fallback {
            let shrinkage = tracker.effective_shrinkage();
            self.outbox.emit(
                SYS_NUMERICAL_FALLBACK,
                json!({
                    "tick": state.tick,
                    "fallback": kind,
                    "effective_shrinkage": shrinkage,
                }),
            );
        }
    }

    fn record_breach(&mut self, tick: u64, strategy_id: Option<&str>, b: &LimitBreach) {
        warn!(
            tick,
            code = b.kind.code(),
            strategy_id,
            observed = b.observed,
            limit = b.limit,
            "risk limit breached"
        );
        self.outbox.emit(
            RISK_LIMIT_BREACH,
            json!({
                "tick": tick,
                "code": b.kind.code(),
                "strategy_id": strategy_id,
                "observed": finite_or_null(b.observed),
                "limit": finite_or_null(b.limit),
            }),
        );
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            ensemble: self.ensemble.snapshot(),
            tape: self.sizer.tape_snapshot(),
            last_emitted_metrics: self.last_emitted.clone(),
            equity: self.equity,
        }
    }

    /// Restores a snapshot taken from an engine with the same universe and
    /// particle count. On error nothing changes.
    pub fn restore(&mut self, snap: &EngineSnapshot) -> Result<(), EngineError> {
        self.ensemble.restore(&snap.ensemble)?;
        self.sizer.restore_tape(&snap.tape);
        self.last_emitted = snap.last_emitted_metrics.clone();
        self.equity = snap.equity;
        Ok(())
    }
}

fn finite_or_null(v: f64) -> serde_json::Value {
    if v.is_finite() {
        json!(v)
    } else {
        serde_json::Value::Null
    }
}
