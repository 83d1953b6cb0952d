//! Audit hash chain integrity.
//!
//! GREEN when:
//! - Events appended with hash_chain=true verify cleanly with the right line count.
//! - Mutating line 3's payload is detected at line 3 (hash_self mismatch).
//! - Deleting a line is detected as a hash_prev break.
//! - Events delivered through the `AuditEmitter` trait land on the same chain.
//! - A resumed writer continues the chain where the previous one stopped, and
//!   refuses a log that no longer verifies.

use csrc_audit::{
    verify_hash_chain, AuditEmitter, AuditWriter, BufferedEmitter, VerifyResult,
    SYS_CORRELATION_UPDATE, SYS_RESAMPLING,
};
use serde_json::json;
use uuid::Uuid;

fn write_five(path: &std::path::Path) {
    let mut writer = AuditWriter::new(path, Uuid::new_v4(), true).unwrap();
    for i in 0..5 {
        writer
            .append(
                "allocation",
                &format!("TEST_EVENT_{i}"),
                json!({"index": i, "data": format!("payload_{i}")}),
            )
            .unwrap();
    }
    assert_eq!(writer.seq(), 5);
}

#[test]
fn untampered_chain_verifies_valid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    write_five(&path);

    let result = verify_hash_chain(&path).unwrap();
    assert_eq!(result, VerifyResult::Valid { lines: 5 });
}

#[test]
fn tampered_payload_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    write_five(&path);

    let content = std::fs::read_to_string(&path).unwrap();
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    let mut ev: serde_json::Value = serde_json::from_str(&lines[2]).unwrap();
    ev["payload"]["data"] = json!("TAMPERED_VALUE");
    lines[2] = serde_json::to_string(&ev).unwrap();
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();

    match verify_hash_chain(&path).unwrap() {
        VerifyResult::Broken { line, reason } => {
            assert_eq!(line, 3, "got line {line}: {reason}");
            assert!(reason.contains("hash_self mismatch"), "got: {reason}");
        }
        VerifyResult::Valid { lines } => {
            panic!("tampered chain verified as valid ({lines} lines)");
        }
    }
}

#[test]
fn deleted_line_detected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    write_five(&path);

    let content = std::fs::read_to_string(&path).unwrap();
    let kept: Vec<&str> = content
        .lines()
        .enumerate()
        .filter(|(i, _)| *i != 2)
        .map(|(_, l)| l)
        .collect();
    std::fs::write(&path, kept.join("\n") + "\n").unwrap();

    match verify_hash_chain(&path).unwrap() {
        VerifyResult::Broken { line, reason } => {
            assert_eq!(line, 3, "got line {line}: {reason}");
            assert!(reason.contains("hash_prev mismatch"), "got: {reason}");
        }
        VerifyResult::Valid { lines } => {
            panic!("chain with deleted line verified as valid ({lines} lines)");
        }
    }
}

#[test]
fn buffered_events_flush_onto_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("audit.jsonl");

    let mut buffer = BufferedEmitter::new(16);
    buffer.emit(SYS_CORRELATION_UPDATE, json!({"effective_n_strategies": 2.1}));
    buffer.emit(SYS_RESAMPLING, json!({"tick": 7}));

    let mut writer = AuditWriter::new(&path, Uuid::new_v4(), true).unwrap();
    assert_eq!(buffer.flush_into(&mut writer), 2);
    assert!(writer.last_hash().is_some());

    assert_eq!(
        verify_hash_chain(&path).unwrap(),
        VerifyResult::Valid { lines: 2 }
    );
    let content = std::fs::read_to_string(&path).unwrap();
    let first: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert_eq!(first["event_type"], "sys.correlation_update");
    assert_eq!(first["topic"], "allocation");
    assert!(first["hash_prev"].is_null());
}

#[test]
fn empty_log_is_valid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.jsonl");
    std::fs::write(&path, "").unwrap();
    assert_eq!(
        verify_hash_chain(&path).unwrap(),
        VerifyResult::Valid { lines: 0 }
    );
}

#[test]
fn resumed_writer_continues_chain() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    write_five(&path);
    let tail = std::fs::read_to_string(&path).unwrap();
    let last: serde_json::Value = serde_json::from_str(tail.lines().last().unwrap()).unwrap();

    let mut writer = AuditWriter::resume(&path, Uuid::new_v4(), true).unwrap();
    assert_eq!(writer.seq(), 5);
    assert_eq!(writer.last_hash().as_deref(), last["hash_self"].as_str());

    let ev = writer
        .append("allocation", "TEST_EVENT_5", json!({"index": 5}))
        .unwrap();
    assert_eq!(ev.seq, 5);
    assert_eq!(
        verify_hash_chain(&path).unwrap(),
        VerifyResult::Valid { lines: 6 }
    );
}

#[test]
fn resume_starts_fresh_without_a_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("audit.jsonl");
    let writer = AuditWriter::resume(&path, Uuid::new_v4(), true).unwrap();
    assert_eq!(writer.seq(), 0);
    assert!(writer.last_hash().is_none());
}

#[test]
fn resume_refuses_broken_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.jsonl");
    write_five(&path);
    let content = std::fs::read_to_string(&path).unwrap();
    let kept: Vec<&str> = content.lines().skip(1).collect();
    std::fs::write(&path, kept.join("\n") + "\n").unwrap();

    let err = AuditWriter::resume(&path, Uuid::new_v4(), true)
        .err()
        .expect("broken log must not resume");
    assert!(format!("{err:#}").contains("AUDIT_CHAIN_BROKEN"), "got: {err:#}");
}
