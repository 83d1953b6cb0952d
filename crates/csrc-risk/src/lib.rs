//! csrc-risk
//!
//! Position sizing and hard risk limits for allocated strategies.
//!
//! Goals:
//! - Four-stage sizing: SOPS tanh direction, Giller power-law magnitude,
//!   tape-speed EMA multiplier, hard clamp
//! - Typed limit breaches instead of ad hoc global constants
//!
//! Deterministic, pure logic. No IO, no time, no broker calls.

mod limits;
mod sizer;

pub use limits::{LimitBreach, LimitDecision, LimitKind, RiskLimits};
pub use sizer::{
    giller_magnitude, hard_clamp, sops_direction, steepness, PositionSizer, SizerConfig,
    SizingBreakdown, SizingConfigError, TapeSnapshot, TapeSpeedTracker,
};
