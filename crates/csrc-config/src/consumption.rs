//! Unused-key guard.
//!
//! "Consumed pointers" are JSON Pointer prefixes. A leaf under any consumed
//! prefix is considered read by `EngineConfig::from_config_json`; any other
//! leaf is "unused" and usually a typo that would otherwise silently fall back
//! to a default.
//!
//! - "/particles" consumes "/particles/n_particles" and "/particles/seed"
//! - "/engine/strategies" consumes "/engine/strategies/0"

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::warn;

/// Sections read by `EngineConfig::from_config_json`.
///
/// Keep in lockstep with the struct: a section listed here but not read would
/// hide typos inside it.
pub const CONSUMED_POINTERS: &[&str] = &[
    "/engine/strategies",
    "/correlation/decay",
    "/correlation/shrinkage",
    "/correlation/min_samples",
    "/correlation/epsilon",
    "/particles/n_particles",
    "/particles/lambda_penalty",
    "/particles/temperature",
    "/particles/prior_concentration",
    "/particles/jitter_concentration",
    "/particles/ess_floor_ratio",
    "/particles/seed",
    "/ensemble/blend_beta",
    "/ensemble/selection_threshold",
    "/ensemble/top_k",
    "/ensemble/posterior_decay",
    "/ensemble/prior_successes",
    "/ensemble/prior_failures",
    "/ensemble/seed",
    "/sizing/base_size",
    "/sizing/alpha",
    "/sizing/steepness_basis",
    "/sizing/fallback_steepness",
    "/sizing/volatility_floor",
    "/sizing/tape_decay",
    "/sizing/tape_band_low",
    "/sizing/tape_band_high",
    "/sizing/tape_logistic_steepness",
    "/sizing/max_size",
    "/risk_limits/max_order_size",
    "/risk_limits/max_gross_size",
    "/risk_limits/max_drawdown",
    "/audit/metrics_change_threshold",
    "/audit/buffer_capacity",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    /// Consumed JSON-pointer prefixes used for this analysis (sorted, unique)
    pub consumed_prefixes: Vec<String>,
    /// Unused leaf pointers (sorted)
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// Produce an unused-key report for an engine config document.
/// `Fail` returns an error when unused keys exist; `Warn` logs them and
/// always returns Ok(report).
pub fn report_unused_keys(config_json: &Value, policy: UnusedKeyPolicy) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<String> = CONSUMED_POINTERS
        .iter()
        .map(|p| normalize_pointer(p))
        .collect();
    let consumed_prefixes: Vec<String> = consumed.into_iter().collect();

    let mut leaves: Vec<String> = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let mut unused: Vec<String> = leaves
        .into_iter()
        .filter(|lp| !consumed_prefixes.iter().any(|cp| is_prefix_pointer(cp, lp)))
        .collect();
    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        consumed_prefixes,
        unused_leaf_pointers: unused,
    };

    if !report.is_clean() {
        if policy == UnusedKeyPolicy::Fail {
            bail!(
                "CONFIG_UNUSED_KEYS: {} unused config leaf key(s) detected. \
                Remove them or fix their spelling. First few: {}",
                report.unused_leaf_pointers.len(),
                preview_list(&report.unused_leaf_pointers, 12)
            );
        }
        warn!(
            count = report.unused_leaf_pointers.len(),
            keys = %preview_list(&report.unused_leaf_pointers, 12),
            "config contains unused keys"
        );
    }

    Ok(report)
}

/// Leading "/", no trailing "/" unless root.
fn normalize_pointer(p: &str) -> String {
    let mut s = p.trim().to_string();
    if s.is_empty() {
        return "/".to_string();
    }
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    while s.ends_with('/') && s.len() > 1 {
        s.pop();
    }
    s
}

/// "/a/b" consumes "/a/b" and "/a/b/c" but NOT "/a/bc".
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    if prefix == "/" || leaf == prefix {
        return true;
    }
    leaf.strip_prefix(prefix)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

pub(crate) fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

fn preview_list(items: &[String], n: usize) -> String {
    let take = items.iter().take(n).cloned().collect::<Vec<_>>();
    format!("{:?}", take)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prefix_respects_token_boundary() {
        assert!(is_prefix_pointer("/sizing/alpha", "/sizing/alpha"));
        assert!(is_prefix_pointer("/engine/strategies", "/engine/strategies/3"));
        assert!(!is_prefix_pointer("/sizing/alpha", "/sizing/alphas"));
        assert!(is_prefix_pointer("/", "/anything"));
    }

    #[test]
    fn leaves_are_escaped() {
        let mut out = Vec::new();
        collect_leaf_pointers(&json!({"a/b": {"c~d": 1}, "l": [true]}), "", &mut out);
        out.sort();
        assert_eq!(out, vec!["/a~1b/c~0d".to_string(), "/l/0".to_string()]);
    }

    #[test]
    fn normalize_adds_leading_and_strips_trailing_slash() {
        assert_eq!(normalize_pointer("sizing/"), "/sizing");
        assert_eq!(normalize_pointer(""), "/");
    }
}
