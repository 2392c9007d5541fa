//! Case runners: build operands, call the reference and the device, check agreement and
//! the output handling contract.

use gpuarray::backend::spec::{DeviceBackend, HostBlas};
use gpuarray::blas;
use gpuarray::tensor::{DeviceArray, HostArray, Shape};
use rand::rngs::StdRng;

use crate::cases::{
    batched_gemm_cases, dot_cases, gemm_cases, gemv_cases, ger_cases, BatchedGemmCase, DotCase,
    GemmCase, GemvCase, GerCase,
};
use crate::harness::{Conformance, SuiteReport};
use crate::operands::{generate, OperandPair, OperandSpec};
use crate::oracle::{compare, finish, on_device, on_reference, CaseOutcome, Interrupt, OracleError};

/// Device output as the caller supplied it, with its values captured before the call.
struct SuppliedOutput<'a, B: DeviceBackend + 'static> {
    array: &'a DeviceArray<B>,
    before: Vec<f64>,
}

impl<'a, B: DeviceBackend + 'static> SuppliedOutput<'a, B> {
    fn capture(pair: Option<&'a OperandPair<B>>) -> Result<Option<Self>, Interrupt> {
        match pair {
            None => Ok(None),
            Some(pair) => Ok(Some(SuppliedOutput {
                array: &pair.device,
                before: on_device("readback", pair.device.to_vec_f64())?,
            })),
        }
    }
}

/// Checks the aliasing contract of a returned output against the supplied one.
fn check_output<B: DeviceBackend + 'static>(
    case: &str,
    supplied: Option<SuppliedOutput<'_, B>>,
    result: &DeviceArray<B>,
    overwrite: bool,
) -> Result<(), Interrupt> {
    let Some(supplied) = supplied else {
        return Ok(());
    };
    if result.shares_storage(supplied.array) != overwrite {
        return Err(OracleError::Aliasing {
            case: case.to_string(),
            expected_alias: overwrite,
        }
        .into());
    }
    let through_supplied = on_device("readback", supplied.array.to_vec_f64())?;
    if overwrite {
        let returned = on_device("readback", result.to_vec_f64())?;
        compare(case, &returned, &through_supplied, 0.0)?;
    } else if compare(case, &supplied.before, &through_supplied, 0.0).is_err() {
        return Err(OracleError::OutputClobbered {
            case: case.to_string(),
        }
        .into());
    }
    Ok(())
}

fn check_values<B: DeviceBackend + 'static>(
    case: &str,
    expected: &HostArray,
    actual: &DeviceArray<B>,
    rtol: f64,
) -> Result<(), Interrupt> {
    check_shape(case, expected.shape(), actual)?;
    let actual = on_device("readback", actual.to_vec_f64())?;
    compare(case, &expected.to_vec_f64(), &actual, rtol)?;
    Ok(())
}

fn check_shape<B: DeviceBackend + 'static>(
    case: &str,
    expected: &Shape,
    actual: &DeviceArray<B>,
) -> Result<(), Interrupt> {
    if expected != actual.shape() {
        return Err(OracleError::ShapeMismatch {
            case: case.to_string(),
            expected: expected.clone(),
            actual: actual.shape().clone(),
        }
        .into());
    }
    Ok(())
}

fn optional<B: DeviceBackend + 'static>(
    conformance: &Conformance<B>,
    present: bool,
    spec: OperandSpec,
    rng: &mut StdRng,
) -> Result<Option<OperandPair<B>>, Interrupt> {
    if present {
        Ok(Some(generate(&conformance.backend, &spec, rng)?))
    } else {
        Ok(None)
    }
}

impl<B: DeviceBackend + 'static> Conformance<B> {
    pub fn run_dot(&self, case: &DotCase, rng: &mut StdRng) -> Result<CaseOutcome, OracleError> {
        finish(self.dot_body(case, rng))
    }

    fn dot_body(&self, case: &DotCase, rng: &mut StdRng) -> Result<(), Interrupt> {
        let label = case.to_string();
        let vector = OperandSpec::new([case.n], case.dtype)
            .offseted_inner(case.offseted)
            .sliced(case.step());
        let x = generate(&self.backend, &vector, rng)?;
        let y = generate(&self.backend, &vector, rng)?;
        let z = optional(
            self,
            case.init_z,
            OperandSpec::new(Vec::<usize>::new(), case.dtype),
            rng,
        )?;

        // The reference always accumulates in double precision.
        let expected = on_reference(self.reference.dot(&x.host, &y.host))?;
        let supplied = SuppliedOutput::capture(z.as_ref())?;
        let result = on_device(
            "dot",
            blas::dot(
                &x.device,
                &y.device,
                z.as_ref().map(|z| &z.device),
                case.overwrite,
            ),
        )?;
        check_output(&label, supplied, &result, case.overwrite)?;
        check_shape(&label, &Shape::scalar(), &result)?;
        let actual = on_device("readback", result.to_vec_f64())?;
        compare(&label, &[expected], &actual, self.rtol("dot"))?;
        Ok(())
    }

    pub fn run_gemv(&self, case: &GemvCase, rng: &mut StdRng) -> Result<CaseOutcome, OracleError> {
        finish(self.gemv_body(case, rng))
    }

    fn gemv_body(&self, case: &GemvCase, rng: &mut StdRng) -> Result<(), Interrupt> {
        let label = case.to_string();
        let (x_len, y_len) = case.vector_lens();
        let a = generate(
            &self.backend,
            &OperandSpec::new([case.shape.0, case.shape.1], case.dtype)
                .order(case.order)
                .offseted_inner(case.offseted)
                .sliced(case.sliced),
            rng,
        )?;
        let x = generate(
            &self.backend,
            &OperandSpec::new([x_len], case.dtype)
                .offseted_inner(case.offseted)
                .sliced(case.sliced),
            rng,
        )?;
        let y = optional(self, case.init_y, OperandSpec::new([y_len], case.dtype), rng)?;

        let expected = on_reference(self.reference.gemv(
            case.alpha,
            &a.host,
            &x.host,
            case.beta,
            y.as_ref().map(|y| y.host.clone()),
            case.trans,
            case.overwrite,
        ))?;
        let supplied = SuppliedOutput::capture(y.as_ref())?;
        let result = on_device(
            "gemv",
            blas::gemv(
                case.alpha,
                &a.device,
                &x.device,
                case.beta,
                y.as_ref().map(|y| &y.device),
                case.trans,
                case.overwrite,
            ),
        )?;
        check_output(&label, supplied, &result, case.overwrite)?;
        check_values(&label, &expected, &result, self.rtol("gemv"))
    }

    pub fn run_gemm(&self, case: &GemmCase, rng: &mut StdRng) -> Result<CaseOutcome, OracleError> {
        finish(self.gemm_body(case, rng))
    }

    fn gemm_body(&self, case: &GemmCase, rng: &mut StdRng) -> Result<(), Interrupt> {
        let label = case.to_string();
        let (a_dims, b_dims) = case.input_dims();
        let a = generate(
            &self.backend,
            &OperandSpec::new(a_dims, case.dtype)
                .order(case.orders[0])
                .offseted_outer(case.offseted_outer)
                .sliced(case.sliced),
            rng,
        )?;
        let b = generate(
            &self.backend,
            &OperandSpec::new(b_dims, case.dtype)
                .order(case.orders[1])
                .offseted_outer(case.offseted_outer)
                .sliced(case.sliced),
            rng,
        )?;
        let c = optional(
            self,
            case.init_c,
            OperandSpec::new([case.m, case.n], case.dtype).order(case.orders[2]),
            rng,
        )?;

        let expected = on_reference(self.reference.gemm(
            case.alpha,
            &a.host,
            &b.host,
            case.beta,
            c.as_ref().map(|c| c.host.clone()),
            case.trans_a,
            case.trans_b,
            case.overwrite,
        ))?;
        let supplied = SuppliedOutput::capture(c.as_ref())?;
        let result = on_device(
            "gemm",
            blas::gemm(
                case.alpha,
                &a.device,
                &b.device,
                case.beta,
                c.as_ref().map(|c| &c.device),
                case.trans_a,
                case.trans_b,
                case.overwrite,
            ),
        )?;
        check_output(&label, supplied, &result, case.overwrite)?;
        check_values(&label, &expected, &result, self.rtol("gemm"))
    }

    pub fn run_ger(&self, case: &GerCase, rng: &mut StdRng) -> Result<CaseOutcome, OracleError> {
        finish(self.ger_body(case, rng))
    }

    fn ger_body(&self, case: &GerCase, rng: &mut StdRng) -> Result<(), Interrupt> {
        let label = case.to_string();
        let x = generate(
            &self.backend,
            &OperandSpec::new([case.m], case.dtype)
                .order(case.order)
                .sliced(case.sliced_x),
            rng,
        )?;
        let y = generate(
            &self.backend,
            &OperandSpec::new([case.n], case.dtype)
                .order(case.order)
                .sliced(case.sliced_y),
            rng,
        )?;
        let a = optional(
            self,
            case.init_a,
            OperandSpec::new([case.m, case.n], case.dtype).order(case.order),
            rng,
        )?;

        let expected = on_reference(self.reference.ger(
            1.0,
            &x.host,
            &y.host,
            a.as_ref().map(|a| a.host.clone()),
            case.overwrite,
        ))?;
        let supplied = SuppliedOutput::capture(a.as_ref())?;
        let result = on_device(
            "ger",
            blas::ger(
                1.0,
                &x.device,
                &y.device,
                a.as_ref().map(|a| &a.device),
                case.overwrite,
            ),
        )?;
        check_output(&label, supplied, &result, case.overwrite)?;
        check_values(&label, &expected, &result, self.rtol("ger"))
    }

    pub fn run_batched_gemm(
        &self,
        case: &BatchedGemmCase,
        rng: &mut StdRng,
    ) -> Result<CaseOutcome, OracleError> {
        finish(self.batched_gemm_body(case, rng))
    }

    fn batched_gemm_body(&self, case: &BatchedGemmCase, rng: &mut StdRng) -> Result<(), Interrupt> {
        let label = case.to_string();
        let gemm = &case.gemm;
        let (a_dims, b_dims) = case.input_dims();
        let a = generate(
            &self.backend,
            &OperandSpec::new(a_dims, gemm.dtype)
                .order(gemm.orders[0])
                .offseted_outer(gemm.offseted_outer)
                .sliced(gemm.sliced),
            rng,
        )?;
        let b = generate(
            &self.backend,
            &OperandSpec::new(b_dims, gemm.dtype)
                .order(gemm.orders[1])
                .offseted_outer(gemm.offseted_outer)
                .sliced(gemm.sliced),
            rng,
        )?;
        let c = optional(
            self,
            gemm.init_c,
            OperandSpec::new([case.batch, gemm.m, gemm.n], gemm.dtype).order(gemm.orders[2]),
            rng,
        )?;

        // One plain reference gemm per batch index.
        let mut expected = Vec::with_capacity(case.batch * gemm.m * gemm.n);
        for index in 0..case.batch {
            let a_i = on_reference(a.host.select(0, index))?;
            let b_i = on_reference(b.host.select(0, index))?;
            let c_i = match &c {
                Some(c) => Some(on_reference(c.host.select(0, index))?),
                None => None,
            };
            let slice = on_reference(self.reference.gemm(
                gemm.alpha,
                &a_i,
                &b_i,
                gemm.beta,
                c_i,
                gemm.trans_a,
                gemm.trans_b,
                gemm.overwrite,
            ))?;
            expected.extend(slice.to_vec_f64());
        }

        let supplied = SuppliedOutput::capture(c.as_ref())?;
        let result = on_device(
            "gemm_batch",
            blas::gemm_batch_3d(
                gemm.alpha,
                &a.device,
                &b.device,
                gemm.beta,
                c.as_ref().map(|c| &c.device),
                gemm.trans_a,
                gemm.trans_b,
                gemm.overwrite,
            ),
        )?;
        check_output(&label, supplied, &result, gemm.overwrite)?;
        check_shape(&label, &Shape::new([case.batch, gemm.m, gemm.n]), &result)?;
        let actual = on_device("readback", result.to_vec_f64())?;
        compare(&label, &expected, &actual, self.rtol("gemm_batch"))?;
        Ok(())
    }

    pub fn dot_suite(&self) -> SuiteReport {
        self.run_suite("dot", &dot_cases(), |case, rng| self.run_dot(case, rng))
    }

    pub fn gemv_suite(&self) -> SuiteReport {
        self.run_suite("gemv", &gemv_cases(), |case, rng| self.run_gemv(case, rng))
    }

    pub fn gemm_suite(&self) -> SuiteReport {
        self.run_suite("gemm", &gemm_cases(), |case, rng| self.run_gemm(case, rng))
    }

    pub fn ger_suite(&self) -> SuiteReport {
        self.run_suite("ger", &ger_cases(), |case, rng| self.run_ger(case, rng))
    }

    pub fn batched_gemm_suite(&self) -> SuiteReport {
        self.run_suite("gemm_batch", &batched_gemm_cases(), |case, rng| {
            self.run_batched_gemm(case, rng)
        })
    }

    /// Every table, one report per routine.
    pub fn all_suites(&self) -> Vec<SuiteReport> {
        vec![
            self.dot_suite(),
            self.gemv_suite(),
            self.gemm_suite(),
            self.ger_suite(),
            self.batched_gemm_suite(),
        ]
    }
}
