use std::sync::Arc;

use gpuarray::backend::spec::DeviceBackend;
use gpuarray::blas;
use gpuarray::tensor::{DType, DeviceArray, HostArray, MemoryOrder};

use crate::cases::{DotCase, GemmCase, GerCase};
use crate::harness::{seeded_rng, Conformance};
use crate::oracle::{CaseOutcome, OracleError};
use crate::tolerance::ConformanceConfig;

fn conformance<B: DeviceBackend + 'static>(backend: &Arc<B>) -> Conformance<B> {
    Conformance::with_config(backend, ConformanceConfig::default(), 42)
}

pub fn gemm_matches_expected<B: DeviceBackend + 'static>(backend: &Arc<B>) {
    let a = HostArray::from_values([2, 2], DType::F32, MemoryOrder::C, &[1.0, 2.0, 3.0, 4.0])
        .unwrap();
    let b = HostArray::from_values([2, 2], DType::F32, MemoryOrder::F, &[5.0, 6.0, 7.0, 8.0])
        .unwrap();
    let a_device = DeviceArray::from_host(Arc::clone(backend), &a).unwrap();
    let b_device = DeviceArray::from_host(Arc::clone(backend), &b).unwrap();

    let result = blas::gemm(1.0, &a_device, &b_device, 0.0, None, false, false, false).unwrap();
    assert_eq!(result.to_vec_f64().unwrap(), vec![19.0, 22.0, 43.0, 50.0]);
}

/// `dot` of 256 single precision values against a double precision reference.
pub fn dot_n256_f32<B: DeviceBackend + 'static>(
    backend: &Arc<B>,
) -> Result<CaseOutcome, OracleError> {
    let case = DotCase {
        n: 256,
        dtype: DType::F32,
        offseted: false,
        sliced: false,
        overwrite: true,
        init_z: false,
    };
    conformance(backend).run_dot(&case, &mut seeded_rng(256))
}

/// Row-major `48x32 * 32x15` with a fresh result.
pub fn gemm_48x15x32_row_major<B: DeviceBackend + 'static>(
    backend: &Arc<B>,
) -> Result<CaseOutcome, OracleError> {
    let case = GemmCase {
        m: 48,
        n: 15,
        k: 32,
        dtype: DType::F32,
        orders: [MemoryOrder::C; 3],
        trans_a: false,
        trans_b: false,
        offseted_outer: false,
        sliced: 1,
        overwrite: false,
        init_c: false,
        alpha: 1.0,
        beta: 0.0,
    };
    conformance(backend).run_gemm(&case, &mut seeded_rng(48))
}

/// Column-major double precision rank-1 update of a fresh `4x5` matrix.
pub fn ger_4x5_f64_column_major<B: DeviceBackend + 'static>(
    backend: &Arc<B>,
) -> Result<CaseOutcome, OracleError> {
    let case = GerCase {
        m: 4,
        n: 5,
        dtype: DType::F64,
        order: MemoryOrder::F,
        sliced_x: 1,
        sliced_y: 1,
        init_a: false,
        overwrite: false,
    };
    conformance(backend).run_ger(&case, &mut seeded_rng(4))
}
