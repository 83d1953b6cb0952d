//! Audit events at the engine boundary.
//!
//! GREEN when:
//! - The first tick always emits sys.correlation_update with the four metric
//!   fields; later ticks emit only when a metric moves past the threshold.
//! - Nothing reaches a sink until the host flushes.
//! - Diversity recovery emits sys.resampling.
//! - Flushed events land on a verifiable hash-chained audit log.
//! - Overflow drops the oldest pending events and counts them.

use csrc_audit::{
    verify_hash_chain, AuditWriter, PendingEvent, VerifyResult, SYS_CORRELATION_UPDATE,
    SYS_RESAMPLING,
};
use csrc_config::EngineConfig;
use csrc_engine::AllocationEngine;
use csrc_testkit::{drive_engine, redundant_pair_with_diversifier};
use uuid::Uuid;

fn config(threshold: f64) -> EngineConfig {
    let mut cfg = EngineConfig::with_strategies(["A", "B", "C"]);
    cfg.particles.n_particles = 32;
    cfg.audit.metrics_change_threshold = threshold;
    cfg
}

fn correlation_updates(events: &[PendingEvent]) -> Vec<&PendingEvent> {
    events
        .iter()
        .filter(|e| e.event_type == SYS_CORRELATION_UPDATE)
        .collect()
}

#[test]
fn high_threshold_emits_once() {
    let mut engine = AllocationEngine::new(&config(10.0)).unwrap();
    drive_engine(&mut engine, &mut redundant_pair_with_diversifier(3).unwrap(), 50).unwrap();

    let mut sink: Vec<PendingEvent> = Vec::new();
    engine.flush_audit(&mut sink);
    let updates = correlation_updates(&sink);
    assert_eq!(updates.len(), 1);

    let payload = updates[0].payload.as_object().unwrap();
    for key in [
        "herfindahl_index",
        "effective_n_strategies",
        "max_pairwise_correlation",
        "avg_correlation",
    ] {
        assert!(payload[key].is_f64(), "missing metric {key}");
    }
    assert_eq!(payload["tick"], 1);
}

#[test]
fn zero_threshold_tracks_every_change() {
    let mut engine = AllocationEngine::new(&config(0.0)).unwrap();
    drive_engine(&mut engine, &mut redundant_pair_with_diversifier(3).unwrap(), 50).unwrap();

    let mut sink: Vec<PendingEvent> = Vec::new();
    engine.flush_audit(&mut sink);
    let n = correlation_updates(&sink).len();
    assert!(n > 40, "only {n} updates over 50 moving ticks");
}

#[test]
fn nothing_delivered_until_flush() {
    let mut engine = AllocationEngine::new(&config(0.01)).unwrap();
    drive_engine(&mut engine, &mut redundant_pair_with_diversifier(3).unwrap(), 5).unwrap();
    let pending = engine.outbox().len();
    assert!(pending >= 1);

    let mut sink: Vec<PendingEvent> = Vec::new();
    assert_eq!(engine.flush_audit(&mut sink), pending);
    assert!(engine.outbox().is_empty());
    assert_eq!(engine.flush_audit(&mut sink), 0);
}

#[test]
fn collapsed_cloud_emits_resampling() {
    let mut cfg = config(0.01);
    cfg.particles.temperature = 1e-9;
    let mut engine = AllocationEngine::new(&cfg).unwrap();
    drive_engine(&mut engine, &mut redundant_pair_with_diversifier(8).unwrap(), 3).unwrap();

    let mut sink: Vec<PendingEvent> = Vec::new();
    engine.flush_audit(&mut sink);
    let resampling: Vec<_> = sink
        .iter()
        .filter(|e| e.event_type == SYS_RESAMPLING)
        .collect();
    assert!(!resampling.is_empty());
    assert!(resampling[0].payload["effective_sample_size"].as_f64().unwrap() < 3.2);
}

#[test]
fn flushed_events_form_valid_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("allocation_audit.jsonl");
    let mut writer = AuditWriter::new(&path, Uuid::new_v4(), true).unwrap();

    let mut engine = AllocationEngine::new(&config(0.0)).unwrap();
    let mut source = redundant_pair_with_diversifier(4).unwrap();
    let mut written = 0;
    for _ in 0..4 {
        drive_engine(&mut engine, &mut source, 5).unwrap();
        written += engine.flush_audit(&mut writer);
    }
    assert!(written > 0);
    assert_eq!(writer.seq() as usize, written);
    assert_eq!(
        verify_hash_chain(&path).unwrap(),
        VerifyResult::Valid { lines: written }
    );
}

#[test]
fn overflow_drops_oldest() {
    let mut cfg = config(0.0);
    cfg.audit.buffer_capacity = 4;
    let mut engine = AllocationEngine::new(&cfg).unwrap();
    drive_engine(&mut engine, &mut redundant_pair_with_diversifier(3).unwrap(), 30).unwrap();

    assert_eq!(engine.outbox().len(), 4);
    assert!(engine.outbox().dropped() > 0);
    let ticks: Vec<u64> = engine
        .outbox()
        .pending()
        .map(|e| e.payload["tick"].as_u64().unwrap())
        .collect();
    assert!(ticks.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(*ticks.last().unwrap(), 30);
}
