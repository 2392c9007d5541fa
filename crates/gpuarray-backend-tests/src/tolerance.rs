//! Relative tolerance policy, overridable per backend and per operation from JSON.
//!
//! ```json
//! {
//!   "default": { "rtol": 1e-6 },
//!   "rules": [
//!     { "op": "gemm_batch", "rtol": 1e-5 },
//!     { "backend": "opencl*", "op": "gemm", "rtol": 5e-6 }
//!   ]
//! }
//! ```
//!
//! Rules matching only the backend apply first, then rules matching only the operation,
//! then rules matching both; later matches of the same kind win.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use gpuarray::env::conformance_config_path;
use serde::Deserialize;

pub const RTOL: f64 = 1e-6;
pub const BATCHED_RTOL: f64 = 1e-5;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConformanceConfig {
    #[serde(default)]
    default: Option<ToleranceConfig>,
    #[serde(default)]
    rules: Vec<ToleranceRule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ToleranceRule {
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    rtol: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct ToleranceConfig {
    #[serde(default)]
    rtol: Option<f64>,
}

fn default_config_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../configs/blas_conformance.json")
}

impl ConformanceConfig {
    /// Loads the rules named by `GPUARRAY_CONFORMANCE_CONFIG`, falling back to the
    /// workspace default. A missing default file yields the built-in tolerances.
    pub fn load() -> anyhow::Result<Self> {
        match conformance_config_path() {
            Some(path) => Self::from_path(&path),
            None => {
                let path = default_config_path();
                if path.exists() {
                    Self::from_path(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read conformance config {}", path.display()))?;
        Self::from_json(&contents)
            .with_context(|| format!("failed to parse conformance config {}", path.display()))
    }

    pub fn from_json(contents: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Relative tolerance for `op` on `backend`.
    pub fn rtol(&self, backend: &str, op: &str) -> f64 {
        let mut rtol = if op == "gemm_batch" {
            BATCHED_RTOL
        } else {
            RTOL
        };
        if let Some(value) = self.default.and_then(|defaults| defaults.rtol) {
            rtol = value;
        }

        let mut backend_rule = None;
        let mut op_rule = None;
        let mut backend_op_rule = None;
        for rule in &self.rules {
            let backend_match = rule
                .backend
                .as_deref()
                .map(|pattern| matches_pattern(backend, pattern))
                .unwrap_or(false);
            let op_match = rule
                .op
                .as_deref()
                .map(|pattern| matches_pattern(op, pattern))
                .unwrap_or(false);
            match (backend_match, op_match) {
                (true, true) => backend_op_rule = rule.rtol.or(backend_op_rule),
                (false, true) if rule.backend.is_none() => op_rule = rule.rtol.or(op_rule),
                (true, false) if rule.op.is_none() => backend_rule = rule.rtol.or(backend_rule),
                _ => {}
            }
        }
        for value in [backend_rule, op_rule, backend_op_rule].into_iter().flatten() {
            rtol = value;
        }
        rtol
    }
}

/// Glob match where `*` stands for any run of characters.
fn matches_pattern(value: &str, pattern: &str) -> bool {
    let mut segments = pattern.split('*');
    let head = segments.next().unwrap_or_default();
    let Some(mut rest) = value.strip_prefix(head) else {
        return false;
    };
    let tail: Vec<&str> = segments.collect();
    let Some((last, middle)) = tail.split_last() else {
        return rest.is_empty();
    };
    for segment in middle {
        match rest.find(segment) {
            Some(found) => rest = &rest[found + segment.len()..],
            None => return false,
        }
    }
    rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::{matches_pattern, ConformanceConfig, BATCHED_RTOL, RTOL};

    #[test]
    fn builtin_tolerances_relax_batched_gemm() {
        let config = ConformanceConfig::default();
        assert_eq!(config.rtol("faer", "gemm"), RTOL);
        assert_eq!(config.rtol("faer", "gemm_batch"), BATCHED_RTOL);
    }

    #[test]
    fn specific_rules_override_general_ones() {
        let config = ConformanceConfig::from_json(
            r#"{
                "default": { "rtol": 2e-6 },
                "rules": [
                    { "backend": "open*", "op": "gemv", "rtol": 1e-3 },
                    { "op": "gemv", "rtol": 1e-4 },
                    { "backend": "opencl", "rtol": 1e-5 }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(config.rtol("faer", "dot"), 2e-6);
        assert_eq!(config.rtol("faer", "gemv"), 1e-4);
        assert_eq!(config.rtol("opencl", "dot"), 1e-5);
        assert_eq!(config.rtol("opencl", "gemv"), 1e-3);
    }

    #[test]
    fn wildcard_patterns() {
        assert!(matches_pattern("gemm_batch", "gemm*"));
        assert!(matches_pattern("gemm_batch", "*batch"));
        assert!(matches_pattern("gemm_batch", "g*_*h"));
        assert!(!matches_pattern("gemv", "gemm*"));
        assert!(!matches_pattern("gemm", "*batch"));
    }

    #[test]
    fn patterns_without_wildcards_match_exactly() {
        assert!(matches_pattern("faer", "faer"));
        assert!(!matches_pattern("faer2", "faer"));
        assert!(matches_pattern("anything", "*"));
        assert!(matches_pattern("gemm", "gemm*"));
        // Head and tail may not share characters.
        assert!(!matches_pattern("ab", "ab*b"));
        assert!(matches_pattern("abb", "ab*b"));
        assert!(!matches_pattern("gemv", "g*m*m"));
    }

    #[test]
    fn workspace_config_parses() {
        let config = ConformanceConfig::from_path(&super::default_config_path()).unwrap();
        assert_eq!(config.rtol("faer", "ger"), RTOL);
        assert_eq!(config.rtol("faer", "gemm_batch"), BATCHED_RTOL);
    }
}
