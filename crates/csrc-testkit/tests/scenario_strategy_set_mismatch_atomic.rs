//! Rejected ticks leave every accumulator untouched.
//!
//! GREEN when:
//! - A returns map with an unknown strategy, a missing strategy, or a
//!   non-finite value is rejected with the matching typed error.
//! - Snapshot, visible state and audit outbox are unchanged after rejection.
//! - The next valid tick equals that of a twin engine that never saw the
//!   bad input.
//! - Duplicate or unknown adapters are rejected before the tape is observed.

use csrc_config::EngineConfig;
use csrc_engine::{AllocationEngine, EngineError, MarketContext, StrategyAdapter};
use csrc_portfolio::{returns, PortfolioError};
use csrc_testkit::{drive_engine, redundant_pair_with_diversifier, ScriptedStrategy};

fn config() -> EngineConfig {
    let mut cfg = EngineConfig::with_strategies(["A", "B", "C"]);
    cfg.particles.n_particles = 32;
    cfg
}

#[test]
fn bad_returns_rejected_without_side_effects() {
    let mut engine = AllocationEngine::new(&config()).unwrap();
    let mut twin = AllocationEngine::new(&config()).unwrap();
    drive_engine(&mut engine, &mut redundant_pair_with_diversifier(1).unwrap(), 15).unwrap();
    drive_engine(&mut twin, &mut redundant_pair_with_diversifier(1).unwrap(), 15).unwrap();

    let snap = engine.snapshot();
    let state = engine.state().clone();
    let pending = engine.outbox().len();

    let extra = returns([("A", 0.01), ("B", 0.0), ("C", 0.0), ("D", 0.02)]);
    match engine.tick(&extra) {
        Err(EngineError::Portfolio(PortfolioError::StrategySetMismatch { unknown, missing })) => {
            assert_eq!(unknown, vec!["D".to_string()]);
            assert!(missing.is_empty());
        }
        other => panic!("expected mismatch, got {other:?}"),
    }

    let short = returns([("A", 0.01), ("C", 0.0)]);
    match engine.tick(&short) {
        Err(EngineError::Portfolio(PortfolioError::StrategySetMismatch { unknown, missing })) => {
            assert!(unknown.is_empty());
            assert_eq!(missing, vec!["B".to_string()]);
        }
        other => panic!("expected mismatch, got {other:?}"),
    }

    let nan = returns([("A", 0.01), ("B", f64::NAN), ("C", 0.0)]);
    assert!(matches!(
        engine.tick(&nan),
        Err(EngineError::Portfolio(PortfolioError::NonFiniteReturn { .. }))
    ));

    assert_eq!(engine.snapshot(), snap);
    assert_eq!(engine.state(), &state);
    assert_eq!(engine.outbox().len(), pending);

    let good = returns([("A", 0.004), ("B", 0.003), ("C", -0.001)]);
    assert_eq!(engine.tick(&good).unwrap(), twin.tick(&good).unwrap());
    assert_eq!(engine.snapshot(), twin.snapshot());
}

#[test]
fn bad_adapter_sets_rejected_before_sizing() {
    let mut engine = AllocationEngine::new(&config()).unwrap();
    let market = MarketContext::new(0.01, 100.0);

    let mut a = ScriptedStrategy::new("A", vec![0.01], vec![1.0]);
    let mut b = ScriptedStrategy::new("B", vec![0.01], vec![1.0]);
    let mut b2 = ScriptedStrategy::new("B", vec![0.01], vec![1.0]);
    let mut c = ScriptedStrategy::new("C", vec![0.01], vec![1.0]);
    {
        let mut dup: Vec<&mut dyn StrategyAdapter> = vec![&mut a, &mut b, &mut b2, &mut c];
        assert_eq!(
            engine.tick_adapters(&mut dup, market).unwrap_err(),
            EngineError::DuplicateAdapter {
                strategy_id: "B".to_string()
            }
        );
    }

    let mut a = ScriptedStrategy::new("A", vec![0.01], vec![1.0]);
    let mut z = ScriptedStrategy::new("Z", vec![0.01], vec![1.0]);
    let mut c = ScriptedStrategy::new("C", vec![0.01], vec![1.0]);
    {
        let mut unknown: Vec<&mut dyn StrategyAdapter> = vec![&mut a, &mut z, &mut c];
        assert!(matches!(
            engine.tick_adapters(&mut unknown, market),
            Err(EngineError::Portfolio(PortfolioError::StrategySetMismatch { .. }))
        ));
    }
    assert_eq!(a.signal_calls() + z.signal_calls() + c.signal_calls(), 0);
    assert_eq!(engine.sizer().tape().ema(), None);
    assert_eq!(engine.state().tick, 0);
}
