//! BLAS kernels over host-resident device buffers.
//!
//! Operands are gathered into `f64` faer matrices (so strided and transposed storage is
//! resolved once, up front) and read locks are dropped before the output is locked for
//! writing. A call whose output aliases one of its inputs therefore sees the inputs as
//! they were before the call.

use faer::linalg::matmul::matmul;
use faer::{Accum, Mat, Par};
use gpuarray::backend::spec::{
    BlasError, BlasResult, DotCall, GemmCall, GemvCall, GerCall, MatrixRef, Transpose, VectorRef,
};
use gpuarray::tensor::MemoryOrder;

use crate::FaerBuffer;

pub(crate) fn dot(call: &DotCall<'_, FaerBuffer>) -> BlasResult<()> {
    let n = call.n;
    let x = gather_vector(&call.x, n, "X")?;
    let y = gather_vector(&call.y, n, "Y")?;

    let mut acc = Mat::<f64>::zeros(1, 1);
    if n > 0 {
        let lhs = Mat::from_fn(1, n, |_, j| x[j]);
        let rhs = Mat::from_fn(n, 1, |i, _| y[i]);
        let mut out_view = acc.as_mut();
        matmul(&mut out_view, Accum::Replace, lhs.as_ref(), rhs.as_ref(), 1.0, Par::Seq);
    }

    let mut out = call.out.write()?;
    if call.out_offset >= out.len() {
        return Err(BlasError::execution(format!(
            "dot output offset {} outside buffer of {}",
            call.out_offset,
            out.len()
        )));
    }
    out.set(call.out_offset, acc[(0, 0)]);
    Ok(())
}

pub(crate) fn gemv(call: &GemvCall<'_, FaerBuffer>, par: Par) -> BlasResult<()> {
    let (rows, cols) = if call.trans.is_trans() {
        (call.n, call.m)
    } else {
        (call.m, call.n)
    };
    let product = if call.alpha != 0.0 && rows > 0 && cols > 0 {
        let a = gather_matrix(&call.a, call.order, call.m, call.n, call.trans, "A")?;
        let x = gather_vector(&call.x, cols, "X")?;
        Some((a, Mat::from_fn(cols, 1, |i, _| x[i])))
    } else {
        None
    };

    let mut out = call.y.buffer.write()?;
    check_vector(&call.y, rows, out.len(), "Y")?;
    let mut acc = if call.beta == 0.0 {
        Mat::<f64>::zeros(rows, 1)
    } else {
        Mat::from_fn(rows, 1, |i, _| call.beta * out.get(call.y.element(i) as usize))
    };
    if let Some((a, x)) = product {
        let accum = if call.beta == 0.0 {
            Accum::Replace
        } else {
            Accum::Add
        };
        let mut out_view = acc.as_mut();
        matmul(&mut out_view, accum, a.as_ref(), x.as_ref(), call.alpha, par);
    }
    for i in 0..rows {
        out.set(call.y.element(i) as usize, acc[(i, 0)]);
    }
    Ok(())
}

/// Runs one gemm with each operand's offset moved by the given number of elements.
pub(crate) fn gemm(
    call: &GemmCall<'_, FaerBuffer>,
    shift_a: isize,
    shift_b: isize,
    shift_c: isize,
    par: Par,
) -> BlasResult<()> {
    let (m, n, k) = (call.m, call.n, call.k);
    let a_ref = shifted(&call.a, shift_a, "A")?;
    let b_ref = shifted(&call.b, shift_b, "B")?;
    let c_ref = shifted(&call.c, shift_c, "C")?;

    let product = if call.alpha != 0.0 && m > 0 && n > 0 && k > 0 {
        let (a_rows, a_cols) = if call.trans_a.is_trans() { (k, m) } else { (m, k) };
        let (b_rows, b_cols) = if call.trans_b.is_trans() { (n, k) } else { (k, n) };
        let a = gather_matrix(&a_ref, call.order, a_rows, a_cols, call.trans_a, "A")?;
        let b = gather_matrix(&b_ref, call.order, b_rows, b_cols, call.trans_b, "B")?;
        Some((a, b))
    } else {
        None
    };

    let mut out = c_ref.buffer.write()?;
    check_matrix(&c_ref, call.order, m, n, out.len(), "C")?;
    let mut acc = if call.beta == 0.0 {
        Mat::<f64>::zeros(m, n)
    } else {
        Mat::from_fn(m, n, |i, j| {
            call.beta * out.get(c_ref.element(call.order, i, j))
        })
    };
    if let Some((a, b)) = product {
        let accum = if call.beta == 0.0 {
            Accum::Replace
        } else {
            Accum::Add
        };
        let mut out_view = acc.as_mut();
        matmul(&mut out_view, accum, a.as_ref(), b.as_ref(), call.alpha, par);
    }
    for j in 0..n {
        for i in 0..m {
            out.set(c_ref.element(call.order, i, j), acc[(i, j)]);
        }
    }
    Ok(())
}

pub(crate) fn ger(call: &GerCall<'_, FaerBuffer>, par: Par) -> BlasResult<()> {
    let (m, n) = (call.m, call.n);
    let update = if call.alpha != 0.0 && m > 0 && n > 0 {
        let x = gather_vector(&call.x, m, "X")?;
        let y = gather_vector(&call.y, n, "Y")?;
        Some((Mat::from_fn(m, 1, |i, _| x[i]), Mat::from_fn(1, n, |_, j| y[j])))
    } else {
        None
    };

    let mut out = call.a.buffer.write()?;
    check_matrix(&call.a, call.order, m, n, out.len(), "A")?;
    let Some((x, y)) = update else {
        return Ok(());
    };
    let mut acc = Mat::from_fn(m, n, |i, j| out.get(call.a.element(call.order, i, j)));
    let mut out_view = acc.as_mut();
    matmul(&mut out_view, Accum::Add, x.as_ref(), y.as_ref(), call.alpha, par);
    for j in 0..n {
        for i in 0..m {
            out.set(call.a.element(call.order, i, j), acc[(i, j)]);
        }
    }
    Ok(())
}

fn shifted<'a>(
    matrix: &MatrixRef<'a, FaerBuffer>,
    shift: isize,
    name: &str,
) -> BlasResult<MatrixRef<'a, FaerBuffer>> {
    let offset = matrix.offset as isize + shift;
    let offset = usize::try_from(offset).map_err(|_| {
        BlasError::execution(format!("{name} batch offset {offset} is negative"))
    })?;
    Ok(MatrixRef {
        buffer: matrix.buffer,
        offset,
        ld: matrix.ld,
    })
}

fn check_vector(
    vector: &VectorRef<'_, FaerBuffer>,
    n: usize,
    len: usize,
    name: &str,
) -> BlasResult<()> {
    if n == 0 {
        return Ok(());
    }
    if vector.inc == 0 {
        return Err(BlasError::execution(format!("{name} has zero increment")));
    }
    let first = vector.element(0);
    let last = vector.element(n - 1);
    if first.min(last) < 0 || first.max(last) >= len as isize {
        return Err(BlasError::execution(format!(
            "{name} spans elements {first}..={last} outside buffer of {len}"
        )));
    }
    Ok(())
}

fn check_matrix(
    matrix: &MatrixRef<'_, FaerBuffer>,
    order: MemoryOrder,
    rows: usize,
    cols: usize,
    len: usize,
    name: &str,
) -> BlasResult<()> {
    if rows == 0 || cols == 0 {
        return Ok(());
    }
    let inner = match order {
        MemoryOrder::C => cols,
        MemoryOrder::F => rows,
    };
    if matrix.ld < inner {
        return Err(BlasError::execution(format!(
            "{name} leading dimension {} is smaller than {inner}",
            matrix.ld
        )));
    }
    let last = matrix.element(order, rows - 1, cols - 1);
    if last >= len {
        return Err(BlasError::execution(format!(
            "{name} reaches element {last} outside buffer of {len}"
        )));
    }
    Ok(())
}

fn gather_vector(vector: &VectorRef<'_, FaerBuffer>, n: usize, name: &str) -> BlasResult<Vec<f64>> {
    let data = vector.buffer.read()?;
    check_vector(vector, n, data.len(), name)?;
    Ok((0..n)
        .map(|i| data.get(vector.element(i) as usize))
        .collect())
}

/// Gathers `op(M)` where `M` is stored as `rows x cols` in `order`.
fn gather_matrix(
    matrix: &MatrixRef<'_, FaerBuffer>,
    order: MemoryOrder,
    rows: usize,
    cols: usize,
    trans: Transpose,
    name: &str,
) -> BlasResult<Mat<f64>> {
    let data = matrix.buffer.read()?;
    check_matrix(matrix, order, rows, cols, data.len(), name)?;
    let gathered = if trans.is_trans() {
        Mat::from_fn(cols, rows, |i, j| data.get(matrix.element(order, j, i)))
    } else {
        Mat::from_fn(rows, cols, |i, j| data.get(matrix.element(order, i, j)))
    };
    Ok(gathered)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, RwLock};

    use super::{gemm, gemv};
    use crate::FaerBuffer;
    use faer::Par;
    use gpuarray::backend::spec::{GemmCall, GemvCall, MatrixRef, Transpose, VectorRef};
    use gpuarray::tensor::{DType, ElementBuffer, MemoryOrder};

    fn buffer(values: &[f64]) -> FaerBuffer {
        FaerBuffer {
            data: Arc::new(RwLock::new(ElementBuffer::from_f64(DType::F64, values))),
        }
    }

    fn contents(buffer: &FaerBuffer) -> Vec<f64> {
        let data = buffer.read().unwrap();
        (0..data.len()).map(|i| data.get(i)).collect()
    }

    #[test]
    fn gemm_honours_order_and_transpose() {
        // A stored row-major 2x3 at offset 1, used transposed.
        let a = buffer(&[99.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = buffer(&[1.0, 0.0, 0.0, 1.0]);
        let c = buffer(&[0.0; 6]);
        let call = GemmCall {
            dtype: DType::F64,
            order: MemoryOrder::C,
            trans_a: Transpose::Trans,
            trans_b: Transpose::NoTrans,
            m: 3,
            n: 2,
            k: 2,
            alpha: 1.0,
            a: MatrixRef { buffer: &a, offset: 1, ld: 3 },
            b: MatrixRef { buffer: &b, offset: 0, ld: 2 },
            beta: 0.0,
            c: MatrixRef { buffer: &c, offset: 0, ld: 2 },
        };
        gemm(&call, 0, 0, 0, Par::Seq).unwrap();
        assert_eq!(contents(&c), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn gemm_with_zero_beta_ignores_stale_output() {
        let a = buffer(&[2.0]);
        let c = buffer(&[f64::NAN]);
        let call = GemmCall {
            dtype: DType::F64,
            order: MemoryOrder::F,
            trans_a: Transpose::NoTrans,
            trans_b: Transpose::NoTrans,
            m: 1,
            n: 1,
            k: 1,
            alpha: 1.5,
            a: MatrixRef { buffer: &a, offset: 0, ld: 1 },
            b: MatrixRef { buffer: &a, offset: 0, ld: 1 },
            beta: 0.0,
            c: MatrixRef { buffer: &c, offset: 0, ld: 1 },
        };
        gemm(&call, 0, 0, 0, Par::Seq).unwrap();
        assert_eq!(contents(&c), vec![6.0]);
    }

    #[test]
    fn gemv_walks_negative_increments() {
        let a = buffer(&[1.0, 2.0, 3.0, 4.0]);
        let x = buffer(&[10.0, 1.0]);
        let y = buffer(&[1.0, 1.0]);
        let call = GemvCall {
            dtype: DType::F64,
            order: MemoryOrder::F,
            trans: Transpose::NoTrans,
            m: 2,
            n: 2,
            alpha: 1.0,
            a: MatrixRef { buffer: &a, offset: 0, ld: 2 },
            x: VectorRef { buffer: &x, offset: 1, inc: -1 },
            beta: 2.0,
            y: VectorRef { buffer: &y, offset: 0, inc: 1 },
        };
        gemv(&call, Par::Seq).unwrap();
        // A = [[1, 3], [2, 4]], x = [1, 10]
        assert_eq!(contents(&y), vec![33.0, 44.0]);
    }

    #[test]
    fn out_of_bounds_operands_are_faults() {
        let a = buffer(&[1.0, 2.0]);
        let c = buffer(&[0.0; 4]);
        let call = GemmCall {
            dtype: DType::F64,
            order: MemoryOrder::C,
            trans_a: Transpose::NoTrans,
            trans_b: Transpose::NoTrans,
            m: 2,
            n: 2,
            k: 2,
            alpha: 1.0,
            a: MatrixRef { buffer: &a, offset: 0, ld: 2 },
            b: MatrixRef { buffer: &a, offset: 0, ld: 2 },
            beta: 0.0,
            c: MatrixRef { buffer: &c, offset: 0, ld: 2 },
        };
        let err = gemm(&call, 0, 0, 0, Par::Seq).unwrap_err();
        assert!(!err.is_unsupported());
        assert!(err.to_string().contains("outside buffer"));
    }
}
