use std::fmt;
use std::sync::Arc;

use gpuarray::backend::spec::DeviceBackend;
use gpuarray::env::test_seed;
use gpuarray_backend_ref_cpu::ReferenceBlas;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::oracle::{CaseOutcome, OracleError};
use crate::tolerance::ConformanceConfig;

/// Installs a `RUST_LOG`-filtered subscriber writing through the test harness. Later
/// calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Per-case outcomes of one suite run.
#[derive(Debug)]
pub struct SuiteReport {
    suite: String,
    backend: String,
    passed: Vec<String>,
    skipped: Vec<(String, String)>,
    failures: Vec<(String, OracleError)>,
}

impl SuiteReport {
    pub fn new(suite: impl Into<String>, backend: impl Into<String>) -> Self {
        SuiteReport {
            suite: suite.into(),
            backend: backend.into(),
            passed: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, case: String, outcome: Result<CaseOutcome, OracleError>) {
        match outcome {
            Ok(CaseOutcome::Passed) => {
                debug!(suite = %self.suite, %case, "passed");
                self.passed.push(case);
            }
            Ok(CaseOutcome::Skipped { reason }) => {
                info!(suite = %self.suite, %case, %reason, "skipped");
                self.skipped.push((case, reason));
            }
            Err(err) => {
                error!(suite = %self.suite, %case, error = %err, "failed");
                self.failures.push((case, err));
            }
        }
    }

    pub fn suite(&self) -> &str {
        &self.suite
    }

    pub fn passed(&self) -> &[String] {
        &self.passed
    }

    pub fn skipped(&self) -> &[(String, String)] {
        &self.skipped
    }

    pub fn failures(&self) -> &[(String, OracleError)] {
        &self.failures
    }

    pub fn total(&self) -> usize {
        self.passed.len() + self.skipped.len() + self.failures.len()
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Panics with every failing case when the suite did not succeed.
    pub fn assert_success(&self) {
        if !self.is_success() {
            panic!("{self}");
        }
    }
}

impl fmt::Display for SuiteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {}: {} passed, {} skipped, {} failed",
            self.suite,
            self.backend,
            self.passed.len(),
            self.skipped.len(),
            self.failures.len()
        )?;
        for (case, err) in &self.failures {
            write!(f, "\n  {case}: {err}")?;
        }
        Ok(())
    }
}

/// Runs case tables for one device backend against the reference BLAS.
pub struct Conformance<B: DeviceBackend + 'static> {
    pub(crate) backend: Arc<B>,
    pub(crate) reference: ReferenceBlas,
    config: ConformanceConfig,
    seed: u64,
}

impl<B: DeviceBackend + 'static> Conformance<B> {
    /// Loads the tolerance rules and seed from the environment.
    pub fn new(backend: &Arc<B>) -> anyhow::Result<Self> {
        init_tracing();
        let config = ConformanceConfig::load()?;
        Ok(Self::with_config(backend, config, test_seed()))
    }

    pub fn with_config(backend: &Arc<B>, config: ConformanceConfig, seed: u64) -> Self {
        Conformance {
            backend: Arc::clone(backend),
            reference: ReferenceBlas::new(),
            config,
            seed,
        }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn rtol(&self, op: &str) -> f64 {
        self.config.rtol(self.backend.backend_name(), op)
    }

    /// Deterministic generator for case `index`.
    pub fn case_rng(&self, index: usize) -> StdRng {
        seeded_rng(self.seed.wrapping_add(index as u64))
    }

    pub fn run_suite<C, F>(&self, suite: &str, cases: &[C], mut run: F) -> SuiteReport
    where
        C: fmt::Display,
        F: FnMut(&C, &mut StdRng) -> Result<CaseOutcome, OracleError>,
    {
        let mut report = SuiteReport::new(suite, self.backend.backend_name());
        for (index, case) in cases.iter().enumerate() {
            let mut rng = self.case_rng(index);
            report.record(case.to_string(), run(case, &mut rng));
        }
        info!("{report}");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::SuiteReport;
    use crate::oracle::{CaseOutcome, OracleError};

    #[test]
    fn report_lists_every_failure() {
        let mut report = SuiteReport::new("gemm", "faer");
        report.record("a".into(), Ok(CaseOutcome::Passed));
        report.record(
            "b".into(),
            Ok(CaseOutcome::Skipped {
                reason: "no fp64".into(),
            }),
        );
        report.record("c".into(), Err(OracleError::generator("bad step")));
        report.record("d".into(), Err(OracleError::generator("bad shape")));
        assert_eq!(report.total(), 4);
        assert!(!report.is_success());
        let text = report.to_string();
        assert!(text.starts_with("gemm on faer: 1 passed, 1 skipped, 2 failed"));
        assert!(text.contains("c: operand generation failed: bad step"));
        assert!(text.contains("d: operand generation failed: bad shape"));
    }
}
