//! Outcome classification and numerical comparison for conformance cases.

use std::fmt;

use gpuarray::backend::spec::{BlasError, BlasResult, Unsupported};
use gpuarray::tensor::Shape;
use thiserror::Error;

/// Result of a case that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum CaseOutcome {
    Passed,
    /// The device lacks a capability the case needs.
    Skipped { reason: String },
}

/// Details of the worst disagreement between reference and device output.
#[derive(Debug, Clone, PartialEq)]
pub struct MismatchReport {
    pub case: String,
    /// Row-major index of the first element outside tolerance.
    pub index: usize,
    pub expected: f64,
    pub actual: f64,
    pub mismatches: usize,
    pub max_relative_deviation: f64,
    pub rtol: f64,
}

impl fmt::Display for MismatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} element(s) outside rtol {:e}; ",
            self.case, self.mismatches, self.rtol
        )?;
        write!(
            f,
            "first at index {} (reference {}, device {}); max relative deviation {:e}",
            self.index, self.expected, self.actual, self.max_relative_deviation
        )
    }
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("numerical mismatch in {0}")]
    Mismatch(MismatchReport),
    #[error("{case}: reference result has shape {expected} but device result has shape {actual}")]
    ShapeMismatch {
        case: String,
        expected: Shape,
        actual: Shape,
    },
    #[error("backend fault during {stage}: {source}")]
    Fault {
        stage: &'static str,
        #[source]
        source: BlasError,
    },
    #[error("{case}: returned output {} the supplied output", alias_violation(.expected_alias))]
    Aliasing { case: String, expected_alias: bool },
    #[error("{case}: supplied output changed although overwrite was not requested")]
    OutputClobbered { case: String },
    #[error("operand generation failed: {message}")]
    Generator { message: String },
}

fn alias_violation(expected_alias: &bool) -> &'static str {
    if *expected_alias {
        "does not alias"
    } else {
        "aliases"
    }
}

impl OracleError {
    pub fn generator(message: impl Into<String>) -> Self {
        OracleError::Generator {
            message: message.into(),
        }
    }
}

/// Early exit from a case body.
#[derive(Debug)]
pub enum Interrupt {
    Skip(Unsupported),
    Fail(OracleError),
}

impl From<OracleError> for Interrupt {
    fn from(err: OracleError) -> Self {
        Interrupt::Fail(err)
    }
}

/// Maps a device result: capability gaps become skips, everything else is a fault.
pub fn on_device<T>(stage: &'static str, result: BlasResult<T>) -> Result<T, Interrupt> {
    result.map_err(|err| match err {
        BlasError::Unsupported(unsupported) => Interrupt::Skip(unsupported),
        source => Interrupt::Fail(OracleError::Fault { stage, source }),
    })
}

/// Maps a reference result. The reference has no optional capabilities, so any error is
/// a fault.
pub fn on_reference<T>(result: BlasResult<T>) -> Result<T, Interrupt> {
    result.map_err(|source| {
        Interrupt::Fail(OracleError::Fault {
            stage: "reference",
            source,
        })
    })
}

pub fn finish(result: Result<(), Interrupt>) -> Result<CaseOutcome, OracleError> {
    match result {
        Ok(()) => Ok(CaseOutcome::Passed),
        Err(Interrupt::Skip(unsupported)) => Ok(CaseOutcome::Skipped {
            reason: unsupported.to_string(),
        }),
        Err(Interrupt::Fail(err)) => Err(err),
    }
}

/// Element-wise `|expected - actual| <= rtol * |actual|`; two NaNs compare equal.
pub fn compare(
    case: &str,
    expected: &[f64],
    actual: &[f64],
    rtol: f64,
) -> Result<(), OracleError> {
    let mut first: Option<(usize, f64, f64)> = None;
    let mut mismatches = 0usize;
    let mut max_relative_deviation = 0.0f64;
    for (index, (&e, &a)) in expected.iter().zip(actual.iter()).enumerate() {
        if e.is_nan() && a.is_nan() {
            continue;
        }
        if e == a {
            continue;
        }
        let diff = (e - a).abs();
        let relative = if a == 0.0 { f64::INFINITY } else { diff / a.abs() };
        if relative.is_nan() || relative > max_relative_deviation {
            max_relative_deviation = if relative.is_nan() {
                f64::INFINITY
            } else {
                relative
            };
        }
        if !(diff <= rtol * a.abs()) {
            mismatches += 1;
            first.get_or_insert((index, e, a));
        }
    }
    match first {
        None => Ok(()),
        Some((index, expected, actual)) => Err(OracleError::Mismatch(MismatchReport {
            case: case.to_string(),
            index,
            expected,
            actual,
            mismatches,
            max_relative_deviation,
            rtol,
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::{compare, finish, on_device, CaseOutcome, OracleError};
    use gpuarray::backend::spec::BlasError;
    use gpuarray::tensor::DType;

    #[test]
    fn compare_is_relative_to_the_device_value() {
        assert!(compare("c", &[1.0, 100.0], &[1.0, 100.00005], 1e-6).is_ok());
        let err = compare("c", &[1.0, 100.0], &[1.0, 100.001], 1e-6).unwrap_err();
        let OracleError::Mismatch(report) = err else {
            panic!("expected mismatch");
        };
        assert_eq!(report.index, 1);
        assert_eq!(report.mismatches, 1);
        assert!(report.max_relative_deviation > 9e-6);
    }

    #[test]
    fn nans_compare_equal_only_to_nans() {
        assert!(compare("c", &[f64::NAN], &[f64::NAN], 1e-6).is_ok());
        assert!(compare("c", &[f64::NAN], &[1.0], 1e-6).is_err());
        assert!(compare("c", &[1.0], &[f64::NAN], 1e-6).is_err());
        assert!(compare("c", &[1.0], &[0.0], 1e-6).is_err());
    }

    #[test]
    fn unsupported_becomes_skip_and_faults_fail() {
        let skipped = finish(on_device::<()>(
            "dot",
            Err(BlasError::unsupported_precision("dot", DType::F64)),
        ))
        .unwrap();
        assert!(matches!(skipped, CaseOutcome::Skipped { .. }));

        let failed = finish(on_device::<()>("dot", Err(BlasError::execution("lost device"))));
        assert!(matches!(
            failed,
            Err(OracleError::Fault { stage: "dot", .. })
        ));
    }
}
