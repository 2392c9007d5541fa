//! Cross-cutting properties of the BLAS bindings that the case tables do not isolate.

use std::collections::HashSet;
use std::sync::Arc;

use gpuarray::backend::spec::{BlasError, DeviceBackend, HostBlas};
use gpuarray::blas;
use gpuarray::tensor::{DType, DeviceArray, ElementBuffer, HostArray, MemoryOrder};

use crate::cases::{GemmCase, GemvCase};
use crate::faulty_backend::FaultyBackend;
use crate::harness::{seeded_rng, Conformance};
use crate::operands::{generate, OperandPair, OperandSpec};
use crate::oracle::{compare, CaseOutcome, Interrupt, OracleError};
use crate::tolerance::{ConformanceConfig, BATCHED_RTOL, RTOL};

const ORDERS: [MemoryOrder; 2] = [MemoryOrder::C, MemoryOrder::F];

fn conformance<B: DeviceBackend + 'static>(backend: &Arc<B>) -> Conformance<B> {
    Conformance::with_config(backend, ConformanceConfig::default(), 7)
}

fn pair<B: DeviceBackend + 'static>(backend: &Arc<B>, host: HostArray) -> OperandPair<B> {
    let device = DeviceArray::from_host(Arc::clone(backend), &host).unwrap();
    OperandPair { host, device }
}

fn nan_pair<B: DeviceBackend + 'static>(
    backend: &Arc<B>,
    dims: &[usize],
    order: MemoryOrder,
) -> OperandPair<B> {
    pair(backend, HostArray::full(dims.to_vec(), DType::F32, order, f64::NAN))
}

fn random_pair<B: DeviceBackend + 'static>(
    backend: &Arc<B>,
    spec: OperandSpec,
    seed: u64,
) -> OperandPair<B> {
    match generate(backend, &spec, &mut seeded_rng(seed)) {
        Ok(pair) => pair,
        Err(Interrupt::Skip(unsupported)) => panic!("{spec}: {unsupported}"),
        Err(Interrupt::Fail(err)) => panic!("{err}"),
    }
}

fn assert_matches(label: &str, expected: &[f64], actual: &[f64], rtol: f64) {
    if let Err(err) = compare(label, expected, actual, rtol) {
        panic!("{err}");
    }
    assert!(
        actual.iter().all(|value| value.is_finite()),
        "{label}: non-finite device output {actual:?}"
    );
}

/// With `alpha = 0` the inputs are never read: NaN operands leave only `beta * C`.
pub fn alpha_zero_ignores_inputs<B: DeviceBackend + 'static>(backend: &Arc<B>) {
    let oracle = conformance(backend);
    for overwrite in [false, true] {
        let a = nan_pair(backend, &[6, 4], MemoryOrder::F);
        let b = nan_pair(backend, &[4, 5], MemoryOrder::C);
        let c = random_pair(backend, OperandSpec::new([6, 5], DType::F32), 1);
        let expected = oracle
            .reference
            .gemm(0.0, &a.host, &b.host, 0.6, Some(c.host.clone()), false, false, overwrite)
            .unwrap();
        let result = blas::gemm(
            0.0,
            &a.device,
            &b.device,
            0.6,
            Some(&c.device),
            false,
            false,
            overwrite,
        )
        .unwrap();
        assert_matches(
            "gemm alpha=0",
            &expected.to_vec_f64(),
            &result.to_vec_f64().unwrap(),
            RTOL,
        );

        let x = nan_pair(backend, &[4], MemoryOrder::C);
        let y = random_pair(backend, OperandSpec::new([6], DType::F32), 2);
        let expected = oracle
            .reference
            .gemv(0.0, &a.host, &x.host, -1.0, Some(y.host.clone()), false, overwrite)
            .unwrap();
        let result = blas::gemv(0.0, &a.device, &x.device, -1.0, Some(&y.device), false, overwrite)
            .unwrap();
        assert_matches(
            "gemv alpha=0",
            &expected.to_vec_f64(),
            &result.to_vec_f64().unwrap(),
            RTOL,
        );

        let x = nan_pair(backend, &[3], MemoryOrder::C);
        let y = nan_pair(backend, &[2], MemoryOrder::C);
        let m = random_pair(backend, OperandSpec::new([3, 2], DType::F32), 3);
        let result = blas::ger(0.0, &x.device, &y.device, Some(&m.device), overwrite).unwrap();
        assert_matches(
            "ger alpha=0",
            &m.host.to_vec_f64(),
            &result.to_vec_f64().unwrap(),
            RTOL,
        );

        let a = nan_pair(backend, &[3, 6, 4], MemoryOrder::C);
        let b = nan_pair(backend, &[3, 4, 5], MemoryOrder::C);
        let c = random_pair(backend, OperandSpec::new([3, 6, 5], DType::F32), 4);
        let batched = blas::gemm_batch_3d(
            0.0,
            &a.device,
            &b.device,
            2.0,
            Some(&c.device),
            false,
            false,
            overwrite,
        );
        match batched {
            Ok(result) => {
                let expected: Vec<f64> = c.host.to_vec_f64().iter().map(|v| 2.0 * v).collect();
                assert_matches(
                    "gemm_batch alpha=0",
                    &expected,
                    &result.to_vec_f64().unwrap(),
                    BATCHED_RTOL,
                );
            }
            Err(err) if err.is_unsupported() => {}
            Err(err) => panic!("gemm_batch alpha=0: {err}"),
        }
    }
}

/// With `beta = 0` the prior output is never read: a NaN-filled output is replaced.
pub fn beta_zero_ignores_prior_output<B: DeviceBackend + 'static>(backend: &Arc<B>) {
    let oracle = conformance(backend);
    for overwrite in [false, true] {
        for order in ORDERS {
            let a = random_pair(backend, OperandSpec::new([5, 3], DType::F32).order(order), 5);
            let b = random_pair(backend, OperandSpec::new([3, 4], DType::F32), 6);
            let c = nan_pair(backend, &[5, 4], order);
            let expected = oracle
                .reference
                .gemm(1.5, &a.host, &b.host, 0.0, Some(c.host.clone()), false, false, overwrite)
                .unwrap();
            let result =
                blas::gemm(1.5, &a.device, &b.device, 0.0, Some(&c.device), false, false, overwrite)
                    .unwrap();
            assert_matches(
                "gemm beta=0",
                &expected.to_vec_f64(),
                &result.to_vec_f64().unwrap(),
                RTOL,
            );

            let x = random_pair(backend, OperandSpec::new([3], DType::F32), 7);
            let y = nan_pair(backend, &[5], order);
            let expected = oracle
                .reference
                .gemv(1.0, &a.host, &x.host, 0.0, Some(y.host.clone()), false, overwrite)
                .unwrap();
            let result =
                blas::gemv(1.0, &a.device, &x.device, 0.0, Some(&y.device), false, overwrite)
                    .unwrap();
            assert_matches(
                "gemv beta=0",
                &expected.to_vec_f64(),
                &result.to_vec_f64().unwrap(),
                RTOL,
            );
        }

        // A strided output forces the bindings through a temporary.
        let a = random_pair(backend, OperandSpec::new([2, 5, 3], DType::F32), 8);
        let b = random_pair(backend, OperandSpec::new([2, 3, 4], DType::F32), 9);
        let c = nan_pair(backend, &[4, 5, 4], MemoryOrder::F);
        let c_view = c.device.slice_step(0, -2).unwrap();
        let batched = blas::gemm_batch_3d(
            1.0,
            &a.device,
            &b.device,
            0.0,
            Some(&c_view),
            false,
            false,
            overwrite,
        );
        match batched {
            Ok(result) => {
                let mut expected = Vec::new();
                for index in 0..2 {
                    let slice = oracle
                        .reference
                        .gemm(
                            1.0,
                            &a.host.select(0, index).unwrap(),
                            &b.host.select(0, index).unwrap(),
                            0.0,
                            None,
                            false,
                            false,
                            false,
                        )
                        .unwrap();
                    expected.extend(slice.to_vec_f64());
                }
                assert_matches(
                    "gemm_batch beta=0",
                    &expected,
                    &result.to_vec_f64().unwrap(),
                    BATCHED_RTOL,
                );
            }
            Err(err) if err.is_unsupported() => {}
            Err(err) => panic!("gemm_batch beta=0: {err}"),
        }
    }
}

/// Checks an in-place result: `result` aliases `target`, the view holds `expected`, and
/// every element of the allocation outside the view still holds its old value.
fn assert_written_in_place<B: DeviceBackend + 'static>(
    label: &str,
    target: &DeviceArray<B>,
    storage_before: &ElementBuffer,
    result: &DeviceArray<B>,
    expected: &[f64],
) {
    assert!(result.shares_storage(target), "{label}: result is not aliased");
    assert_matches(label, expected, &target.to_vec_f64().unwrap(), RTOL);

    let storage_after = target.to_host().unwrap().storage().clone();
    let inside: HashSet<usize> = target.layout().offsets().collect();
    for offset in 0..storage_before.len() {
        if !inside.contains(&offset) {
            assert_eq!(
                storage_before.get(offset),
                storage_after.get(offset),
                "{label}: element {offset} outside the view changed"
            );
        }
    }
}

fn storage_of<B: DeviceBackend + 'static>(array: &DeviceArray<B>) -> ElementBuffer {
    array.to_host().unwrap().storage().clone()
}

/// Writes through an overwritten output land in the caller's view and nowhere else.
pub fn overwrite_stays_inside_the_view<B: DeviceBackend + 'static>(backend: &Arc<B>) {
    let oracle = conformance(backend);
    for order in ORDERS {
        for step in [2, -2, -1] {
            let spec = OperandSpec::new([6, 5], DType::F32)
                .order(order)
                .offseted_inner(true)
                .sliced(step);

            let c = random_pair(backend, spec.clone(), 10);
            let a = random_pair(backend, OperandSpec::new([6, 3], DType::F32).order(order), 11);
            let b = random_pair(backend, OperandSpec::new([3, 5], DType::F32), 12);
            let before = storage_of(&c.device);
            let expected = oracle
                .reference
                .gemm(1.0, &a.host, &b.host, 1.0, Some(c.host.clone()), false, false, true)
                .unwrap();
            let result =
                blas::gemm(1.0, &a.device, &b.device, 1.0, Some(&c.device), false, false, true)
                    .unwrap();
            assert_written_in_place(
                &format!("gemm overwrite {spec}"),
                &c.device,
                &before,
                &result,
                &expected.to_vec_f64(),
            );

            // Rank-1 updates read the output, so a copied-out target must carry A's values.
            let m = random_pair(backend, spec.clone(), 13);
            let x = random_pair(backend, OperandSpec::new([6], DType::F32).sliced(step), 14);
            let y = random_pair(backend, OperandSpec::new([5], DType::F32), 15);
            let before = storage_of(&m.device);
            let expected = oracle
                .reference
                .ger(1.0, &x.host, &y.host, Some(m.host.clone()), true)
                .unwrap();
            let result = blas::ger(1.0, &x.device, &y.device, Some(&m.device), true).unwrap();
            assert_written_in_place(
                &format!("ger overwrite {spec}"),
                &m.device,
                &before,
                &result,
                &expected.to_vec_f64(),
            );

            let y_spec = OperandSpec::new([6], DType::F32)
                .offseted_inner(true)
                .sliced(step);
            let y = random_pair(backend, y_spec.clone(), 16);
            let a = random_pair(backend, OperandSpec::new([6, 4], DType::F32).order(order), 17);
            let x = random_pair(backend, OperandSpec::new([4], DType::F32), 18);
            let before = storage_of(&y.device);
            let expected = oracle
                .reference
                .gemv(0.5, &a.host, &x.host, 1.0, Some(y.host.clone()), false, true)
                .unwrap();
            let result =
                blas::gemv(0.5, &a.device, &x.device, 1.0, Some(&y.device), false, true).unwrap();
            assert_written_in_place(
                &format!("gemv overwrite {y_spec} A={order}"),
                &y.device,
                &before,
                &result,
                &expected.to_vec_f64(),
            );
        }
    }

    // A scalar output addressed inside a larger allocation.
    let x = random_pair(backend, OperandSpec::new([7], DType::F32).sliced(-2), 19);
    let y = random_pair(backend, OperandSpec::new([7], DType::F32), 20);
    let buffer = random_pair(backend, OperandSpec::new([5], DType::F32), 21);
    for index in [0, 3, 4] {
        let z = buffer.device.select(0, index).unwrap();
        let before = storage_of(&z);
        let expected = oracle.reference.dot(&x.host, &y.host).unwrap();
        let result = blas::dot(&x.device, &y.device, Some(&z), true).unwrap();
        assert_written_in_place(
            &format!("dot overwrite Z=[{index}]"),
            &z,
            &before,
            &result,
            &[expected],
        );
    }
}

/// Batched gemm equals one plain gemm per batch index.
pub fn batched_matches_plain_gemm<B: DeviceBackend + 'static>(backend: &Arc<B>) {
    let (m, n, k) = (7, 5, 6);
    let transposes = [(false, false), (true, false), (false, true), (true, true)];
    let mut seed = 100;
    for batch in [1, 5, 16, 17, 31] {
        for a_order in ORDERS {
            for b_order in ORDERS {
                for (trans_a, trans_b) in transposes {
                    seed += 1;
                    let a_dims = if trans_a { [batch, k, m] } else { [batch, m, k] };
                    let b_dims = if trans_b { [batch, n, k] } else { [batch, k, n] };
                    let a_spec = OperandSpec::new(a_dims, DType::F32).order(a_order);
                    let b_spec = OperandSpec::new(b_dims, DType::F32).order(b_order);
                    let a = random_pair(backend, a_spec, seed);
                    let b = random_pair(backend, b_spec, seed + 1000);
                    let label = format!(
                        "batch={batch} orders={a_order}{b_order} trans={trans_a}/{trans_b}"
                    );

                    let batched = blas::gemm_batch_3d(
                        1.0, &a.device, &b.device, 0.0, None, trans_a, trans_b, false,
                    );
                    let batched = match batched {
                        Ok(result) => result.to_vec_f64().unwrap(),
                        Err(err) if err.is_unsupported() => return,
                        Err(err) => panic!("{label}: {err}"),
                    };
                    let mut plain = Vec::with_capacity(batched.len());
                    for index in 0..batch {
                        let a_i = a.device.select(0, index).unwrap();
                        let b_i = b.device.select(0, index).unwrap();
                        let c_i = blas::gemm(1.0, &a_i, &b_i, 0.0, None, trans_a, trans_b, false)
                            .unwrap();
                        plain.extend(c_i.to_vec_f64().unwrap());
                    }
                    assert_matches(&label, &plain, &batched, BATCHED_RTOL);
                }
            }
        }
    }
}

/// Runs every table on a device without double precision: all float64 cases skip.
pub fn f64_cases_are_skipped<B: DeviceBackend + 'static>(backend: &Arc<B>) {
    let oracle = conformance(backend);
    for report in oracle.all_suites() {
        report.assert_success();
        let f64_passed: Vec<&String> = report
            .passed()
            .iter()
            .filter(|case| case.contains("float64"))
            .collect();
        assert!(
            f64_passed.is_empty(),
            "{}: float64 cases passed on a single precision device: {f64_passed:?}",
            report.suite()
        );
        assert!(
            report.skipped().iter().any(|(case, _)| case.contains("float64")),
            "{}: no float64 case was skipped",
            report.suite()
        );
    }
}

/// A device fault is a failure, never a skip.
pub fn device_faults_are_failures<B: DeviceBackend + 'static>(backend: &Arc<B>) {
    let faulty = Arc::new(FaultyBackend::new(Arc::clone(backend), "gemm"));
    let oracle = conformance(&faulty);
    let case = GemmCase {
        m: 4,
        n: 3,
        k: 2,
        dtype: DType::F32,
        orders: [MemoryOrder::F; 3],
        trans_a: false,
        trans_b: false,
        offseted_outer: false,
        sliced: 1,
        overwrite: false,
        init_c: false,
        alpha: 1.0,
        beta: 0.0,
    };
    let outcome = oracle.run_gemm(&case, &mut seeded_rng(1));
    assert!(
        matches!(outcome, Err(OracleError::Fault { stage: "gemm", .. })),
        "unexpected outcome {outcome:?}"
    );

    let gemv = GemvCase {
        shape: (4, 3),
        dtype: DType::F32,
        order: MemoryOrder::F,
        trans: false,
        offseted: false,
        sliced: 1,
        overwrite: true,
        init_y: false,
        alpha: 1.0,
        beta: 0.0,
    };
    assert_eq!(oracle.run_gemv(&gemv, &mut seeded_rng(2)).unwrap(), CaseOutcome::Passed);
}

/// Malformed calls are invalid-argument faults, not capability gaps.
pub fn invalid_arguments_are_rejected<B: DeviceBackend + 'static>(backend: &Arc<B>) {
    let a = random_pair(backend, OperandSpec::new([4, 3], DType::F32), 20);
    let b = random_pair(backend, OperandSpec::new([4, 2], DType::F32), 21);
    let x = random_pair(backend, OperandSpec::new([3], DType::F32), 22);

    let err = blas::gemv(1.0, &a.device, &x.device, 1.0, None, false, false).unwrap_err();
    assert!(matches!(err, BlasError::InvalidArgument { .. }), "{err}");
    assert!(err.to_string().contains("Y not provided and beta != 0"));

    let err = blas::gemm(1.0, &a.device, &b.device, 0.0, None, false, false, false).unwrap_err();
    assert!(matches!(err, BlasError::InvalidArgument { .. }), "{err}");

    let wrong_shape = random_pair(backend, OperandSpec::new([4, 4], DType::F32), 23);
    let b = random_pair(backend, OperandSpec::new([3, 2], DType::F32), 24);
    let err = blas::gemm(
        1.0,
        &a.device,
        &b.device,
        0.0,
        Some(&wrong_shape.device),
        false,
        false,
        true,
    )
    .unwrap_err();
    assert!(matches!(err, BlasError::InvalidArgument { .. }), "{err}");

    let err = blas::dot(&x.device, &a.device, None, false).unwrap_err();
    assert!(!err.is_unsupported(), "{err}");
}
