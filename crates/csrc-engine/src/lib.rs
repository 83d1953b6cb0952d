//! csrc-engine
//!
//! Caller-owned allocation context.
//!
//! Contract:
//! - One `tick` per period, strictly ordered: correlation → particles →
//!   ensemble → sizing. No internal threads or locks; a multi-threaded host
//!   serializes ticks itself.
//! - A tick either completes or fails atomically, leaving every accumulator
//!   and the previous `PortfolioState` untouched.
//! - Audit events are buffered during the tick and delivered by the host via
//!   `flush_audit` afterwards; emission never blocks the computation.
//! - All mutable state round-trips through `snapshot` / `restore`.

mod adapter;
mod engine;
mod types;

pub use adapter::{MarketContext, StrategyAdapter};
pub use engine::AllocationEngine;
pub use types::{EngineError, EngineSnapshot, EquityTracker, SizedOrder, TickOutput};
