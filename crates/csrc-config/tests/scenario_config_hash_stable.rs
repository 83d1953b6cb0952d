//! Config hash stability.
//!
//! GREEN when:
//! - Loading the same YAML twice yields the identical config_hash.
//! - Reordering keys within YAML does not change the hash.
//! - Different values produce different hashes.
//! - Overlay layers override the base and hash stably.
//! - Loading from files matches loading from strings.

use csrc_config::{load_layered_yaml, load_layered_yaml_from_strings};

const BASE_YAML: &str = r#"
engine:
  strategies: ["trend", "meanrev", "carry"]
correlation:
  decay: 0.99
  shrinkage: 0.1
particles:
  n_particles: 200
  lambda_penalty: 1.0
"#;

const BASE_YAML_REORDERED: &str = r#"
particles:
  lambda_penalty: 1.0
  n_particles: 200
correlation:
  shrinkage: 0.1
  decay: 0.99
engine:
  strategies: ["trend", "meanrev", "carry"]
"#;

const OVERLAY_YAML: &str = r#"
particles:
  lambda_penalty: 2.5
sizing:
  alpha: 0.7
"#;

#[test]
fn same_input_produces_identical_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);
    assert_eq!(a.canonical_json, b.canonical_json);
}

#[test]
fn reordered_keys_produce_same_hash() {
    let original = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let reordered = load_layered_yaml_from_strings(&[BASE_YAML_REORDERED]).unwrap();
    assert_eq!(original.config_hash, reordered.config_hash);
    assert_eq!(original.canonical_json, reordered.canonical_json);
}

#[test]
fn strategy_order_is_part_of_the_hash() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    let swapped = BASE_YAML.replace(
        r#"["trend", "meanrev", "carry"]"#,
        r#"["meanrev", "trend", "carry"]"#,
    );
    let b = load_layered_yaml_from_strings(&[swapped.as_str()]).unwrap();
    assert_ne!(a.config_hash, b.config_hash);
}

#[test]
fn overlay_overrides_and_hashes_stably() {
    let a = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    let b = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(a.config_hash, b.config_hash);

    let lambda = a
        .config_json
        .pointer("/particles/lambda_penalty")
        .and_then(|v| v.as_f64())
        .unwrap();
    assert!((lambda - 2.5).abs() < 1e-12);
    let n = a
        .config_json
        .pointer("/particles/n_particles")
        .and_then(|v| v.as_u64())
        .unwrap();
    assert_eq!(n, 200, "base sibling key must survive the overlay");
}

#[test]
fn hash_is_64_hex_chars() {
    let loaded = load_layered_yaml_from_strings(&[BASE_YAML]).unwrap();
    assert_eq!(loaded.config_hash.len(), 64);
    assert!(loaded.config_hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn files_match_strings() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.yaml");
    let overlay = dir.path().join("overlay.yaml");
    std::fs::write(&base, BASE_YAML).unwrap();
    std::fs::write(&overlay, OVERLAY_YAML).unwrap();

    let from_files = load_layered_yaml(&[&base, &overlay]).unwrap();
    let from_strings = load_layered_yaml_from_strings(&[BASE_YAML, OVERLAY_YAML]).unwrap();
    assert_eq!(from_files.config_hash, from_strings.config_hash);
}

#[test]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_layered_yaml(&[dir.path().join("nope.yaml")]).unwrap_err();
    assert!(format!("{err:#}").contains("failed to read yaml path"));
}
