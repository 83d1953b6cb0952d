use serde::{Deserialize, Serialize};

use crate::sizer::{require, SizingConfigError};

/// Hard limits checked by the caller before acting on a sizing result.
///
/// Each field is independently optional; `None` means unconstrained.
/// - `max_order_size`: |size| of any single strategy's position.
/// - `max_gross_size`: Σ |size| across all sized strategies in one period.
/// - `max_drawdown`: peak-to-current loss as a fraction of peak, in (0, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimits {
    pub max_order_size: Option<f64>,
    pub max_gross_size: Option<f64>,
    pub max_drawdown: Option<f64>,
}

/// Which limit tripped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LimitKind {
    OrderSize,
    GrossSize,
    Drawdown,
    /// A checked value was NaN or infinite.
    NonFiniteInput,
}

impl LimitKind {
    /// Stable code for logs and audit payloads.
    pub fn code(&self) -> &'static str {
        match self {
            LimitKind::OrderSize => "LIMIT_ORDER_SIZE",
            LimitKind::GrossSize => "LIMIT_GROSS_SIZE",
            LimitKind::Drawdown => "LIMIT_DRAWDOWN",
            LimitKind::NonFiniteInput => "LIMIT_NON_FINITE_INPUT",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LimitBreach {
    pub kind: LimitKind,
    pub observed: f64,
    pub limit: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum LimitDecision {
    Within,
    Breach(LimitBreach),
}

impl LimitDecision {
    pub fn is_breach(&self) -> bool {
        matches!(self, LimitDecision::Breach(_))
    }

    pub fn breach(&self) -> Option<&LimitBreach> {
        match self {
            LimitDecision::Breach(b) => Some(b),
            LimitDecision::Within => None,
        }
    }
}

fn exceeds(kind: LimitKind, observed: f64, limit: Option<f64>) -> LimitDecision {
    if !observed.is_finite() {
        return LimitDecision::Breach(LimitBreach {
            kind: LimitKind::NonFiniteInput,
            observed,
            limit: limit.unwrap_or(f64::NAN),
        });
    }
    match limit {
        Some(limit) if observed > limit => LimitDecision::Breach(LimitBreach {
            kind,
            observed,
            limit,
        }),
        _ => LimitDecision::Within,
    }
}

impl RiskLimits {
    pub fn unconstrained() -> Self {
        Self::default()
    }

    pub fn validate(&self) -> Result<(), SizingConfigError> {
        if let Some(v) = self.max_order_size {
            require(v > 0.0, "risk_limits.max_order_size", v, "> 0")?;
        }
        if let Some(v) = self.max_gross_size {
            require(v > 0.0, "risk_limits.max_gross_size", v, "> 0")?;
        }
        if let Some(v) = self.max_drawdown {
            require(v > 0.0 && v <= 1.0, "risk_limits.max_drawdown", v, "(0, 1]")?;
        }
        Ok(())
    }

    pub fn check_order(&self, size: f64) -> LimitDecision {
        exceeds(LimitKind::OrderSize, size.abs(), self.max_order_size)
    }

    pub fn check_gross(&self, sizes: &[f64]) -> LimitDecision {
        let gross: f64 = sizes.iter().map(|s| s.abs()).sum();
        exceeds(LimitKind::GrossSize, gross, self.max_gross_size)
    }

    pub fn check_drawdown(&self, drawdown: f64) -> LimitDecision {
        exceeds(LimitKind::Drawdown, drawdown, self.max_drawdown)
    }

    /// Per-order checks in order, then gross. Returns the first breach.
    pub fn check_book(&self, sizes: &[f64]) -> LimitDecision {
        for s in sizes {
            let d = self.check_order(*s);
            if d.is_breach() {
                return d;
            }
        }
        self.check_gross(sizes)
    }
}
