//! Conformance oracle for the strided BLAS bindings.
//!
//! Every device backend runs the same case tables against the host reference and the
//! same cross-cutting property checks. Backends wire them up with
//! [`define_backend_tests!`].

pub mod cases;
pub mod conformance;
pub mod faulty_backend;
pub mod harness;
pub mod operands;
pub mod oracle;
pub mod properties;
pub mod smoke;
pub mod tolerance;

pub use faulty_backend::FaultyBackend;
pub use harness::{init_tracing, seeded_rng, Conformance, SuiteReport};
pub use operands::{generate, OperandPair, OperandSpec};
pub use oracle::{CaseOutcome, MismatchReport, OracleError};
pub use tolerance::{ConformanceConfig, BATCHED_RTOL, RTOL};

#[macro_export]
macro_rules! define_backend_tests {
    ($module:ident, $backend_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            use super::*;

            use $crate::{properties, smoke, CaseOutcome, Conformance};

            fn oracle<B: ::gpuarray::DeviceBackend + 'static>(
                backend: &::std::sync::Arc<B>,
            ) -> Conformance<B> {
                Conformance::new(backend).expect("failed to load conformance config")
            }

            #[test]
            fn smoke_gemm_matches_expected() {
                let backend = ($backend_ctor)();
                smoke::gemm_matches_expected(&backend);
            }

            #[test]
            fn smoke_dot_n256_f32() {
                let backend = ($backend_ctor)();
                assert_eq!(smoke::dot_n256_f32(&backend).unwrap(), CaseOutcome::Passed);
            }

            #[test]
            fn smoke_gemm_48x15x32_row_major() {
                let backend = ($backend_ctor)();
                assert_eq!(
                    smoke::gemm_48x15x32_row_major(&backend).unwrap(),
                    CaseOutcome::Passed
                );
            }

            #[test]
            fn smoke_ger_4x5_f64_column_major() {
                let backend = ($backend_ctor)();
                // Single precision devices may skip, but never fail.
                smoke::ger_4x5_f64_column_major(&backend).unwrap();
            }

            #[test]
            fn dot_suite() {
                let backend = ($backend_ctor)();
                oracle(&backend).dot_suite().assert_success();
            }

            #[test]
            fn gemv_suite() {
                let backend = ($backend_ctor)();
                oracle(&backend).gemv_suite().assert_success();
            }

            #[test]
            fn gemm_suite() {
                let backend = ($backend_ctor)();
                oracle(&backend).gemm_suite().assert_success();
            }

            #[test]
            fn ger_suite() {
                let backend = ($backend_ctor)();
                oracle(&backend).ger_suite().assert_success();
            }

            #[test]
            fn batched_gemm_suite() {
                let backend = ($backend_ctor)();
                oracle(&backend).batched_gemm_suite().assert_success();
            }

            #[test]
            fn alpha_zero_ignores_inputs() {
                let backend = ($backend_ctor)();
                properties::alpha_zero_ignores_inputs(&backend);
            }

            #[test]
            fn beta_zero_ignores_prior_output() {
                let backend = ($backend_ctor)();
                properties::beta_zero_ignores_prior_output(&backend);
            }

            #[test]
            fn overwrite_stays_inside_the_view() {
                let backend = ($backend_ctor)();
                properties::overwrite_stays_inside_the_view(&backend);
            }

            #[test]
            fn batched_matches_plain_gemm() {
                let backend = ($backend_ctor)();
                properties::batched_matches_plain_gemm(&backend);
            }

            #[test]
            fn device_faults_are_failures() {
                let backend = ($backend_ctor)();
                properties::device_faults_are_failures(&backend);
            }

            #[test]
            fn invalid_arguments_are_rejected() {
                let backend = ($backend_ctor)();
                properties::invalid_arguments_are_rejected(&backend);
            }
        }
    };
}
