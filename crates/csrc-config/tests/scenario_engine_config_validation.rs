//! Engine config parsing, validation and the unused-key guard.
//!
//! GREEN when:
//! - A full YAML document parses into the typed sections with overrides applied.
//! - Out-of-range values are rejected with CONFIG_INVALID naming the field.
//! - Misspelled keys are reported under Warn and rejected under Fail.
//! - Keys under consumed sections are never flagged.

use csrc_config::{load_layered_yaml_from_strings, report_unused_keys, UnusedKeyPolicy};

const FULL_YAML: &str = r#"
engine:
  strategies: ["A", "B", "C"]
correlation:
  decay: 0.97
  min_samples: 10
particles:
  n_particles: 64
  lambda_penalty: 2.0
  seed: 42
ensemble:
  blend_beta: 0.25
  top_k: 2
sizing:
  base_size: 10.0
  max_size: 5.0
risk_limits:
  max_gross_size: 12.0
audit:
  metrics_change_threshold: 0.05
"#;

#[test]
fn full_document_parses_with_overrides() {
    let loaded = load_layered_yaml_from_strings(&[FULL_YAML]).unwrap();
    let cfg = loaded.engine_config(UnusedKeyPolicy::Fail).unwrap();

    assert_eq!(cfg.strategies, vec!["A", "B", "C"]);
    assert_eq!(cfg.correlation.decay, 0.97);
    assert_eq!(cfg.correlation.min_samples, 10);
    assert_eq!(cfg.correlation.shrinkage, 0.1);
    assert_eq!(cfg.particles.n_particles, 64);
    assert_eq!(cfg.particles.seed, 42);
    assert_eq!(cfg.ensemble.top_k, Some(2));
    assert_eq!(cfg.sizing.max_size, 5.0);
    assert_eq!(cfg.risk_limits.max_gross_size, Some(12.0));
    assert_eq!(cfg.risk_limits.max_order_size, None);
    assert_eq!(cfg.audit.metrics_change_threshold, 0.05);
    assert_eq!(cfg.audit.buffer_capacity, 1024);
}

#[test]
fn out_of_range_decay_is_config_invalid() {
    let overlay = "correlation:\n  decay: 1.0\n";
    let loaded = load_layered_yaml_from_strings(&[FULL_YAML, overlay]).unwrap();
    let err = loaded.engine_config(UnusedKeyPolicy::Fail).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("CONFIG_INVALID"), "got: {msg}");
    assert!(msg.contains("correlation.decay"), "got: {msg}");
}

#[test]
fn too_few_particles_is_config_invalid() {
    let overlay = "particles:\n  n_particles: 1\n";
    let loaded = load_layered_yaml_from_strings(&[FULL_YAML, overlay]).unwrap();
    let err = loaded.engine_config(UnusedKeyPolicy::Warn).unwrap_err();
    assert!(format!("{err:#}").contains("n_particles must be >= 2"));
}

#[test]
fn misspelled_key_warns_then_fails() {
    let typo = "sizing:\n  alpah: 0.9\n";
    let loaded = load_layered_yaml_from_strings(&[FULL_YAML, typo]).unwrap();

    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(report.unused_leaf_pointers, vec!["/sizing/alpah".to_string()]);
    assert!(loaded.engine_config(UnusedKeyPolicy::Warn).is_ok());

    let err = loaded.engine_config(UnusedKeyPolicy::Fail).unwrap_err();
    assert!(format!("{err:#}").contains("CONFIG_UNUSED_KEYS"));
}

#[test]
fn unused_pointers_are_sorted() {
    let yaml = "unused:\n  b: 2\n  a: 1\nengine:\n  strategies: [\"A\"]\n";
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn).unwrap();
    assert_eq!(
        report.unused_leaf_pointers,
        vec!["/unused/a".to_string(), "/unused/b".to_string()]
    );
}

#[test]
fn consumed_sections_are_clean() {
    let loaded = load_layered_yaml_from_strings(&[FULL_YAML]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail).unwrap();
    assert!(report.is_clean());
}
