use serde::{Deserialize, Serialize};

use csrc_config::ConfigValidationError;
use csrc_portfolio::{ConfigError, CorrelationMetrics, EnsembleSnapshot, PortfolioError, PortfolioState};
use csrc_risk::{LimitDecision, SizingBreakdown, SizingConfigError, TapeSnapshot};

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub enum EngineError {
    Config(ConfigError),
    Sizing(SizingConfigError),
    Portfolio(PortfolioError),
    /// Two adapters report the same strategy id in one tick.
    DuplicateAdapter { strategy_id: String },
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {e}"),
            Self::Sizing(e) => write!(f, "sizing configuration error: {e}"),
            Self::Portfolio(e) => write!(f, "{e}"),
            Self::DuplicateAdapter { strategy_id } => {
                write!(f, "duplicate adapter for strategy '{strategy_id}'")
            }
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Sizing(e) => Some(e),
            Self::Portfolio(e) => Some(e),
            Self::DuplicateAdapter { .. } => None,
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<SizingConfigError> for EngineError {
    fn from(e: SizingConfigError) -> Self {
        Self::Sizing(e)
    }
}

impl From<PortfolioError> for EngineError {
    fn from(e: PortfolioError) -> Self {
        match e {
            PortfolioError::Config(c) => Self::Config(c),
            other => Self::Portfolio(other),
        }
    }
}

impl From<ConfigValidationError> for EngineError {
    fn from(e: ConfigValidationError) -> Self {
        match e {
            ConfigValidationError::Portfolio(c) => Self::Config(c),
            ConfigValidationError::Sizing(s) => Self::Sizing(s),
        }
    }
}

// ─── Outputs ─────────────────────────────────────────────────────────────────

/// Sized position for one selected strategy.
///
/// `weight` is the capital share from the ensemble; `size` is the signed
/// position from the sizer. How the two combine into notional is the
/// execution layer's decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SizedOrder {
    pub strategy_id: String,
    pub weight: f64,
    pub signal: f64,
    pub size: f64,
    pub breakdown: SizingBreakdown,
    /// Per-order limit check. A breach is reported, never clamped away.
    pub limit: LimitDecision,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TickOutput {
    pub state: PortfolioState,
    /// Selected strategies only, in universe order.
    pub orders: Vec<SizedOrder>,
    /// Gross-size check across `orders`.
    pub gross: LimitDecision,
    /// Drawdown check against the tracked allocation equity.
    pub drawdown: LimitDecision,
}

impl TickOutput {
    /// First breach among orders, gross and drawdown, if any.
    pub fn first_breach(&self) -> Option<&LimitDecision> {
        self.orders
            .iter()
            .map(|o| &o.limit)
            .chain([&self.gross, &self.drawdown])
            .find(|d| d.is_breach())
    }
}

// ─── Equity ──────────────────────────────────────────────────────────────────

/// Compounded growth of the allocation, for drawdown checks.
///
/// Each period's return is the previous period's weights against the
/// returns realized since.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EquityTracker {
    pub equity: f64,
    pub peak: f64,
}

impl Default for EquityTracker {
    fn default() -> Self {
        Self {
            equity: 1.0,
            peak: 1.0,
        }
    }
}

impl EquityTracker {
    pub fn apply(&mut self, period_return: f64) {
        self.equity = (self.equity * (1.0 + period_return)).max(0.0);
        self.peak = self.peak.max(self.equity);
    }

    /// Peak-to-current loss as a fraction of peak, in [0, 1].
    pub fn drawdown(&self) -> f64 {
        if self.peak > 0.0 {
            (1.0 - self.equity / self.peak).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────────────

/// Full mutable engine state. Pending audit events are outbound data and are
/// not included.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub ensemble: EnsembleSnapshot,
    pub tape: TapeSnapshot,
    pub last_emitted_metrics: Option<CorrelationMetrics>,
    pub equity: EquityTracker,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drawdown_tracks_peak() {
        let mut e = EquityTracker::default();
        e.apply(0.10);
        e.apply(-0.10);
        assert!((e.peak - 1.1).abs() < 1e-12);
        assert!((e.drawdown() - 0.10).abs() < 1e-12);
        e.apply(0.5);
        assert_eq!(e.drawdown(), 0.0);
    }

    #[test]
    fn total_loss_floors_at_zero() {
        let mut e = EquityTracker::default();
        e.apply(-2.0);
        assert_eq!(e.equity, 0.0);
        assert_eq!(e.drawdown(), 1.0);
    }

    #[test]
    fn portfolio_config_error_unwraps_to_config() {
        let e: EngineError = PortfolioError::Config(ConfigError::EmptyUniverse).into();
        assert_eq!(e, EngineError::Config(ConfigError::EmptyUniverse));
    }
}
