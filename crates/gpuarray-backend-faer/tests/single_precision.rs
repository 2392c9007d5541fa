use std::sync::Arc;

use gpuarray::{blas, DType, DeviceArray, MemoryOrder};
use gpuarray_backend_faer::{FaerDevice, FaerDeviceConfig};
use gpuarray_backend_tests::{properties, smoke, CaseOutcome};

fn single_precision() -> Arc<FaerDevice> {
    Arc::new(FaerDevice::with_config(FaerDeviceConfig::single_precision()))
}

#[test]
fn f64_cases_are_skipped_not_failed() {
    properties::f64_cases_are_skipped(&single_precision());
}

#[test]
fn f64_ger_scenario_is_skipped() {
    let outcome = smoke::ger_4x5_f64_column_major(&single_precision()).unwrap();
    assert!(
        matches!(outcome, CaseOutcome::Skipped { .. }),
        "unexpected outcome {outcome:?}"
    );
}

#[test]
fn f32_still_runs() {
    let backend = single_precision();
    smoke::gemm_matches_expected(&backend);
    assert_eq!(smoke::dot_n256_f32(&backend).unwrap(), CaseOutcome::Passed);
}

#[test]
fn f64_allocation_reports_unsupported() {
    let err = DeviceArray::zeros(single_precision(), [2, 2], DType::F64, MemoryOrder::F)
        .unwrap_err();
    assert!(err.is_unsupported(), "{err}");
}

#[test]
fn batched_gemm_can_be_disabled() {
    let config = FaerDeviceConfig {
        batched_gemm: false,
        ..FaerDeviceConfig::default()
    };
    let backend = Arc::new(FaerDevice::with_config(config));
    let a = DeviceArray::zeros(Arc::clone(&backend), [2, 3, 4], DType::F32, MemoryOrder::C)
        .unwrap();
    let b = DeviceArray::zeros(Arc::clone(&backend), [2, 4, 5], DType::F32, MemoryOrder::C)
        .unwrap();
    let err = blas::gemm_batch_3d(1.0, &a, &b, 0.0, None, false, false, false).unwrap_err();
    assert!(err.is_unsupported(), "{err}");

    properties::batched_matches_plain_gemm(&backend);
}
