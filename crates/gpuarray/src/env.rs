//! Environment configuration shared by the backends and the conformance harness.
//!
//! Flags are read once per process and cached, so a run sees a consistent view even if
//! the environment changes underneath it.

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Seed for the operand generator.
pub const TEST_SEED_VAR: &str = "GPUARRAY_TEST_SEED";
/// Path of the tolerance rules file.
pub const CONFORMANCE_CONFIG_VAR: &str = "GPUARRAY_CONFORMANCE_CONFIG";

const DEFAULT_TEST_SEED: u64 = 0x5eed_b1a5;

static TEST_SEED: OnceLock<u64> = OnceLock::new();
static CONFORMANCE_CONFIG: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Accepts `1`, `true`, `yes` and `on` (any case) as true.
pub fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Boolean flag from `name`, or `default` when unset or blank.
pub fn env_flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => default,
    }
}

/// Unsigned integer from `name`. Unparsable values fall back to `default` with a warning.
pub fn env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                tracing::warn!(var = name, value = %value, "ignoring non-numeric value");
                default
            }
        },
        _ => default,
    }
}

pub fn env_path(name: &str) -> Option<PathBuf> {
    env::var_os(name)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

pub fn test_seed() -> u64 {
    *TEST_SEED.get_or_init(|| env_u64(TEST_SEED_VAR, DEFAULT_TEST_SEED))
}

pub fn conformance_config_path() -> Option<PathBuf> {
    CONFORMANCE_CONFIG
        .get_or_init(|| env_path(CONFORMANCE_CONFIG_VAR))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::{env_flag, env_u64, parse_bool};

    #[test]
    fn parse_bool_accepts_common_tokens() {
        for token in ["1", "true", "YES", " on "] {
            assert!(parse_bool(token), "{token}");
        }
        for token in ["0", "false", "off", "", "2"] {
            assert!(!parse_bool(token), "{token}");
        }
    }

    #[test]
    fn unset_variables_use_defaults() {
        assert!(env_flag("GPUARRAY_TEST_UNSET_FLAG_7F3A", true));
        assert_eq!(env_u64("GPUARRAY_TEST_UNSET_U64_7F3A", 17), 17);
    }
}
