//! BLAS entry points over device arrays.
//!
//! Each routine validates its operands, resolves the output operand, legalises every
//! operand into a layout a BLAS call can express, and hands a call record to the device
//! backend. Output handling is shared by all routines:
//!
//! * no output supplied: a fresh zero-filled operand is allocated (and `beta` must be 0);
//! * output supplied with `overwrite`: results land in the caller's storage, and the
//!   returned array aliases it;
//! * output supplied without `overwrite`: the output is copied first and left untouched.

use std::sync::Arc;

use tracing::debug;

use crate::backend::spec::{
    BlasError, BlasResult, DeviceBackend, DotCall, GemmBatchCall, GemmCall, GemvCall, GerCall,
    MatrixRef, Transpose, VectorRef,
};
use crate::tensor::{DType, DeviceArray, Layout, MemoryOrder, Shape};

/// Scalar inner product `x . y`.
pub fn dot<B: DeviceBackend + 'static>(
    x: &DeviceArray<B>,
    y: &DeviceArray<B>,
    z: Option<&DeviceArray<B>>,
    overwrite_z: bool,
) -> BlasResult<DeviceArray<B>> {
    const OP: &str = "dot";
    expect_rank(OP, "X", x, 1)?;
    expect_rank(OP, "Y", y, 1)?;
    let dtype = common_dtype(OP, &[x, y])?;
    let n = x.dims()[0];
    if y.dims()[0] != n {
        return Err(BlasError::invalid(
            OP,
            format!("X has length {n} but Y has length {}", y.dims()[0]),
        ));
    }

    let out = resolve_output(
        OP,
        "Z",
        x.backend(),
        z,
        overwrite_z,
        0.0,
        &[],
        dtype,
        MemoryOrder::C,
    )?;
    x.backend().dot(&DotCall {
        dtype,
        n,
        x: vector_ref(x),
        y: vector_ref(y),
        out: out.buffer(),
        out_offset: out.layout().offset(),
    })?;
    Ok(out)
}

/// `alpha * op(A) * x + beta * y`.
#[allow(clippy::too_many_arguments)]
pub fn gemv<B: DeviceBackend + 'static>(
    alpha: f64,
    a: &DeviceArray<B>,
    x: &DeviceArray<B>,
    beta: f64,
    y: Option<&DeviceArray<B>>,
    trans_a: bool,
    overwrite_y: bool,
) -> BlasResult<DeviceArray<B>> {
    const OP: &str = "gemv";
    expect_rank(OP, "A", a, 2)?;
    expect_rank(OP, "X", x, 1)?;
    let dtype = common_dtype(OP, &[a, x])?;
    let (rows, cols) = (a.dims()[0], a.dims()[1]);
    let (out_len, in_len) = if trans_a { (cols, rows) } else { (rows, cols) };
    if x.dims()[0] != in_len {
        return Err(BlasError::invalid(
            OP,
            format!(
                "X has length {} but op(A) has {in_len} columns",
                x.dims()[0]
            ),
        ));
    }

    let out = resolve_output(
        OP,
        "Y",
        a.backend(),
        y,
        overwrite_y,
        beta,
        &[out_len],
        dtype,
        MemoryOrder::C,
    )?;
    let a = legalize_matrix(OP, "A", a, None)?;
    a.array.backend().gemv(&GemvCall {
        dtype,
        order: a.order,
        trans: Transpose::from_flag(trans_a),
        m: rows,
        n: cols,
        alpha,
        a: a.matrix_ref(),
        x: vector_ref(x),
        beta,
        y: vector_ref(&out),
    })?;
    Ok(out)
}

/// `alpha * op(A) * op(B) + beta * C`.
#[allow(clippy::too_many_arguments)]
pub fn gemm<B: DeviceBackend + 'static>(
    alpha: f64,
    a: &DeviceArray<B>,
    b: &DeviceArray<B>,
    beta: f64,
    c: Option<&DeviceArray<B>>,
    trans_a: bool,
    trans_b: bool,
    overwrite_c: bool,
) -> BlasResult<DeviceArray<B>> {
    const OP: &str = "gemm";
    expect_rank(OP, "A", a, 2)?;
    expect_rank(OP, "B", b, 2)?;
    let dtype = common_dtype(OP, &[a, b])?;
    let (m, n, k) = gemm_dims(OP, &a.dims()[..], &b.dims()[..], trans_a, trans_b)?;

    let out = resolve_output(
        OP,
        "C",
        a.backend(),
        c,
        overwrite_c,
        beta,
        &[m, n],
        dtype,
        MemoryOrder::F,
    )?;
    let target = OutputMatrix::prepare(OP, &out, beta)?;
    let order = target.matrix.order;
    let a = legalize_matrix(OP, "A", a, Some(order))?;
    let b = legalize_matrix(OP, "B", b, Some(order))?;

    out.backend().gemm(&GemmCall {
        dtype,
        order,
        trans_a: a.transpose_in(order, trans_a),
        trans_b: b.transpose_in(order, trans_b),
        m,
        n,
        k,
        alpha,
        a: a.matrix_ref(),
        b: b.matrix_ref(),
        beta,
        c: target.matrix.matrix_ref(),
    })?;
    target.finish(&out)?;
    Ok(out)
}

/// Rank-1 update `A + alpha * x * y^T`.
pub fn ger<B: DeviceBackend + 'static>(
    alpha: f64,
    x: &DeviceArray<B>,
    y: &DeviceArray<B>,
    a: Option<&DeviceArray<B>>,
    overwrite_a: bool,
) -> BlasResult<DeviceArray<B>> {
    const OP: &str = "ger";
    expect_rank(OP, "X", x, 1)?;
    expect_rank(OP, "Y", y, 1)?;
    let dtype = common_dtype(OP, &[x, y])?;
    let (m, n) = (x.dims()[0], y.dims()[0]);

    let out = resolve_output(
        OP,
        "A",
        x.backend(),
        a,
        overwrite_a,
        0.0,
        &[m, n],
        dtype,
        MemoryOrder::F,
    )?;
    // The update accumulates into A, so a legalised temporary must start from A's values.
    let target = OutputMatrix::prepare(OP, &out, 1.0)?;
    out.backend().ger(&GerCall {
        dtype,
        order: target.matrix.order,
        m,
        n,
        alpha,
        x: vector_ref(x),
        y: vector_ref(y),
        a: target.matrix.matrix_ref(),
    })?;
    target.finish(&out)?;
    Ok(out)
}

/// Batched `alpha * op(A[i]) * op(B[i]) + beta * C[i]` over the leading axis.
#[allow(clippy::too_many_arguments)]
pub fn gemm_batch_3d<B: DeviceBackend + 'static>(
    alpha: f64,
    a: &DeviceArray<B>,
    b: &DeviceArray<B>,
    beta: f64,
    c: Option<&DeviceArray<B>>,
    trans_a: bool,
    trans_b: bool,
    overwrite_c: bool,
) -> BlasResult<DeviceArray<B>> {
    const OP: &str = "gemm_batch_3d";
    expect_rank(OP, "A", a, 3)?;
    expect_rank(OP, "B", b, 3)?;
    let dtype = common_dtype(OP, &[a, b])?;
    let batch = a.dims()[0];
    if b.dims()[0] != batch {
        return Err(BlasError::invalid(
            OP,
            format!(
                "batch dimension mismatch: A has {batch} matrices, B has {}",
                b.dims()[0]
            ),
        ));
    }
    let (m, n, k) = gemm_dims(OP, &a.dims()[1..], &b.dims()[1..], trans_a, trans_b)?;

    let out = resolve_output(
        OP,
        "C",
        a.backend(),
        c,
        overwrite_c,
        beta,
        &[batch, m, n],
        dtype,
        MemoryOrder::C,
    )?;
    let target = OutputBatch::prepare(OP, &out, beta)?;
    let order = target.matrices.order;
    let a = legalize_batch(OP, "A", a, order)?;
    let b = legalize_batch(OP, "B", b, order)?;

    out.backend().gemm_batch(&GemmBatchCall {
        gemm: GemmCall {
            dtype,
            order,
            trans_a: a.transpose_in(order, trans_a),
            trans_b: b.transpose_in(order, trans_b),
            m,
            n,
            k,
            alpha,
            a: a.matrix_ref(),
            b: b.matrix_ref(),
            beta,
            c: target.matrices.matrix_ref(),
        },
        batch,
        stride_a: a.batch_stride,
        stride_b: b.batch_stride,
        stride_c: target.matrices.batch_stride,
    })?;
    target.finish(&out)?;
    Ok(out)
}

fn expect_rank<B: DeviceBackend + 'static>(
    op: &'static str,
    name: &str,
    array: &DeviceArray<B>,
    rank: usize,
) -> BlasResult<()> {
    if array.rank() != rank {
        return Err(BlasError::invalid(
            op,
            format!("{name} must have rank {rank}, got shape {}", array.shape()),
        ));
    }
    Ok(())
}

fn common_dtype<B: DeviceBackend + 'static>(
    op: &'static str,
    arrays: &[&DeviceArray<B>],
) -> BlasResult<DType> {
    let dtype = arrays[0].dtype();
    if let Some(other) = arrays.iter().find(|array| array.dtype() != dtype) {
        return Err(BlasError::invalid(
            op,
            format!("dtype mismatch: {dtype} vs {}", other.dtype()),
        ));
    }
    Ok(dtype)
}

fn gemm_dims(
    op: &'static str,
    a: &[usize],
    b: &[usize],
    trans_a: bool,
    trans_b: bool,
) -> BlasResult<(usize, usize, usize)> {
    let (m, ka) = if trans_a { (a[1], a[0]) } else { (a[0], a[1]) };
    let (kb, n) = if trans_b { (b[1], b[0]) } else { (b[0], b[1]) };
    if ka != kb {
        return Err(BlasError::invalid(
            op,
            format!("inner dimension mismatch: op(A) is {m}x{ka}, op(B) is {kb}x{n}"),
        ));
    }
    Ok((m, n, ka))
}

#[allow(clippy::too_many_arguments)]
fn resolve_output<B: DeviceBackend + 'static>(
    op: &'static str,
    name: &str,
    backend: &Arc<B>,
    supplied: Option<&DeviceArray<B>>,
    overwrite: bool,
    beta: f64,
    dims: &[usize],
    dtype: DType,
    order: MemoryOrder,
) -> BlasResult<DeviceArray<B>> {
    match supplied {
        Some(out) => {
            if out.dims() != dims {
                return Err(BlasError::invalid(
                    op,
                    format!(
                        "{name} has shape {} but {} is required",
                        out.shape(),
                        Shape::new(dims.to_vec())
                    ),
                ));
            }
            if out.dtype() != dtype {
                return Err(BlasError::invalid(
                    op,
                    format!("dtype mismatch: {dtype} vs {name} {}", out.dtype()),
                ));
            }
            if overwrite {
                Ok(out.clone())
            } else {
                out.copy(out.preferred_order())
            }
        }
        None => {
            if beta != 0.0 {
                return Err(BlasError::invalid(
                    op,
                    format!("{name} not provided and beta != 0"),
                ));
            }
            DeviceArray::zeros(Arc::clone(backend), dims.to_vec(), dtype, order)
        }
    }
}

fn vector_ref<B: DeviceBackend + 'static>(array: &DeviceArray<B>) -> VectorRef<'_, B::Buffer> {
    let layout = array.layout();
    let inc = match (layout.dims().first(), layout.strides().first()) {
        (Some(&len), Some(&stride)) if len > 1 => stride,
        _ => 1,
    };
    VectorRef {
        buffer: array.buffer(),
        offset: layout.offset(),
        inc,
    }
}

/// Storage order and leading dimension under which a 2-D view is a BLAS matrix.
fn blas_orders(dims: &[usize], strides: &[isize]) -> Vec<(MemoryOrder, usize)> {
    let (rows, cols) = (dims[0], dims[1]);
    let (row_stride, col_stride) = (strides[0], strides[1]);
    let mut orders = Vec::with_capacity(2);

    let row_major = (cols <= 1 || col_stride == 1)
        && (rows <= 1 || row_stride >= cols.max(1) as isize);
    if row_major {
        let ld = if rows <= 1 { cols.max(1) } else { row_stride as usize };
        orders.push((MemoryOrder::C, ld));
    }
    let col_major = (rows <= 1 || row_stride == 1)
        && (cols <= 1 || col_stride >= rows.max(1) as isize);
    if col_major {
        let ld = if cols <= 1 { rows.max(1) } else { col_stride as usize };
        orders.push((MemoryOrder::F, ld));
    }
    orders
}

fn pick_order(
    candidates: &[(MemoryOrder, usize)],
    prefer: Option<MemoryOrder>,
) -> Option<(MemoryOrder, usize)> {
    prefer
        .and_then(|order| candidates.iter().find(|(o, _)| *o == order))
        .or_else(|| candidates.first())
        .copied()
}

struct BlasMatrix<B: DeviceBackend + 'static> {
    array: DeviceArray<B>,
    order: MemoryOrder,
    ld: usize,
    batch_stride: isize,
}

impl<B: DeviceBackend + 'static> BlasMatrix<B> {
    fn matrix_ref(&self) -> MatrixRef<'_, B::Buffer> {
        MatrixRef {
            buffer: self.array.buffer(),
            offset: self.array.layout().offset(),
            ld: self.ld,
        }
    }

    /// A matrix stored in the other order reads as its own transpose.
    fn transpose_in(&self, order: MemoryOrder, trans: bool) -> Transpose {
        let trans = Transpose::from_flag(trans);
        if self.order == order {
            trans
        } else {
            trans.flip()
        }
    }
}

fn legalize_matrix<B: DeviceBackend + 'static>(
    op: &'static str,
    name: &'static str,
    array: &DeviceArray<B>,
    prefer: Option<MemoryOrder>,
) -> BlasResult<BlasMatrix<B>> {
    let layout = array.layout();
    if let Some((order, ld)) = pick_order(&blas_orders(layout.dims(), layout.strides()), prefer) {
        return Ok(BlasMatrix {
            array: array.clone(),
            order,
            ld,
            batch_stride: 0,
        });
    }
    let order = prefer.unwrap_or(MemoryOrder::C);
    debug!(
        op,
        operand = name,
        strides = ?layout.strides(),
        %order,
        "copying operand into a BLAS layout"
    );
    let copy = array.copy(order)?;
    let ld = match order {
        MemoryOrder::C => copy.dims()[1].max(1),
        MemoryOrder::F => copy.dims()[0].max(1),
    };
    Ok(BlasMatrix {
        array: copy,
        order,
        ld,
        batch_stride: 0,
    })
}

/// Dense layout of a `(batch, rows, cols)` stack whose matrices are each contiguous in
/// `order` and stored one after another.
fn stacked_layout(dims: &[usize], order: MemoryOrder) -> BlasResult<Layout> {
    let inner = Layout::contiguous(Shape::new(dims[1..].to_vec()), order);
    let matrix_len = (dims[1] * dims[2]).max(1) as isize;
    let mut strides = vec![matrix_len];
    strides.extend_from_slice(inner.strides());
    Ok(Layout::from_parts(Shape::new(dims.to_vec()), strides, 0)?)
}

fn legalize_batch<B: DeviceBackend + 'static>(
    op: &'static str,
    name: &'static str,
    array: &DeviceArray<B>,
    order: MemoryOrder,
) -> BlasResult<BlasMatrix<B>> {
    let layout = array.layout();
    let batch = layout.dims()[0];
    let batch_stride = if batch > 1 { layout.strides()[0] } else { 0 };
    let candidates = blas_orders(&layout.dims()[1..], &layout.strides()[1..]);
    if let Some((order, ld)) = pick_order(&candidates, Some(order)) {
        return Ok(BlasMatrix {
            array: array.clone(),
            order,
            ld,
            batch_stride,
        });
    }
    debug!(
        op,
        operand = name,
        strides = ?layout.strides(),
        %order,
        "copying batched operand into stacked BLAS layout"
    );
    let stacked = stacked_layout(layout.dims(), order)?;
    let batch_stride = stacked.strides()[0];
    let copy = array.copy_to_layout(stacked)?;
    let ld = match order {
        MemoryOrder::C => copy.dims()[2].max(1),
        MemoryOrder::F => copy.dims()[1].max(1),
    };
    Ok(BlasMatrix {
        array: copy,
        order,
        ld,
        batch_stride,
    })
}

/// Output matrix of a call, possibly redirected through a legalised temporary.
struct OutputMatrix<B: DeviceBackend + 'static> {
    matrix: BlasMatrix<B>,
    redirected: bool,
}

impl<B: DeviceBackend + 'static> OutputMatrix<B> {
    /// `beta == 0` means the call never reads the output, so a temporary starts zeroed.
    fn prepare(op: &'static str, out: &DeviceArray<B>, beta: f64) -> BlasResult<Self> {
        let layout = out.layout();
        if let Some((order, ld)) = pick_order(&blas_orders(layout.dims(), layout.strides()), None)
        {
            return Ok(OutputMatrix {
                matrix: BlasMatrix {
                    array: out.clone(),
                    order,
                    ld,
                    batch_stride: 0,
                },
                redirected: false,
            });
        }
        debug!(op, strides = ?layout.strides(), "computing into a temporary output");
        let temp = if beta != 0.0 {
            out.copy(MemoryOrder::F)?
        } else {
            DeviceArray::zeros(
                Arc::clone(out.backend()),
                out.shape().clone(),
                out.dtype(),
                MemoryOrder::F,
            )?
        };
        let ld = temp.dims()[0].max(1);
        Ok(OutputMatrix {
            matrix: BlasMatrix {
                array: temp,
                order: MemoryOrder::F,
                ld,
                batch_stride: 0,
            },
            redirected: true,
        })
    }

    fn finish(self, out: &DeviceArray<B>) -> BlasResult<()> {
        if self.redirected {
            out.assign_from(&self.matrix.array)?;
        }
        Ok(())
    }
}

struct OutputBatch<B: DeviceBackend + 'static> {
    matrices: BlasMatrix<B>,
    redirected: bool,
}

impl<B: DeviceBackend + 'static> OutputBatch<B> {
    fn prepare(op: &'static str, out: &DeviceArray<B>, beta: f64) -> BlasResult<Self> {
        let layout = out.layout();
        let batch = layout.dims()[0];
        let candidates = blas_orders(&layout.dims()[1..], &layout.strides()[1..]);
        if let Some((order, ld)) = pick_order(&candidates, None) {
            let batch_stride = if batch > 1 { layout.strides()[0] } else { 0 };
            return Ok(OutputBatch {
                matrices: BlasMatrix {
                    array: out.clone(),
                    order,
                    ld,
                    batch_stride,
                },
                redirected: false,
            });
        }
        debug!(op, strides = ?layout.strides(), "computing batched result into a temporary");
        let stacked = stacked_layout(layout.dims(), MemoryOrder::C)?;
        let batch_stride = stacked.strides()[0];
        let temp = if beta != 0.0 {
            out.copy_to_layout(stacked)?
        } else {
            DeviceArray::with_layout(Arc::clone(out.backend()), out.dtype(), stacked)?
        };
        let ld = temp.dims()[2].max(1);
        Ok(OutputBatch {
            matrices: BlasMatrix {
                array: temp,
                order: MemoryOrder::C,
                ld,
                batch_stride,
            },
            redirected: true,
        })
    }

    fn finish(self, out: &DeviceArray<B>) -> BlasResult<()> {
        if self.redirected {
            out.assign_from(&self.matrices.array)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{blas_orders, stacked_layout};
    use crate::tensor::{Layout, MemoryOrder, Shape};

    #[test]
    fn dense_matrices_are_blas_compatible() {
        let c = Layout::contiguous(Shape::new([4, 3]), MemoryOrder::C);
        assert_eq!(blas_orders(c.dims(), c.strides()), vec![(MemoryOrder::C, 3)]);
        let f = Layout::contiguous(Shape::new([4, 3]), MemoryOrder::F);
        assert_eq!(blas_orders(f.dims(), f.strides()), vec![(MemoryOrder::F, 4)]);
    }

    #[test]
    fn row_slices_keep_a_leading_dimension() {
        let base = Layout::contiguous(Shape::new([8, 3]), MemoryOrder::C);
        let sliced = base.slice_step(0, 2).unwrap();
        assert_eq!(
            blas_orders(sliced.dims(), sliced.strides()),
            vec![(MemoryOrder::C, 6)]
        );
    }

    #[test]
    fn reversed_and_doubly_strided_views_need_a_copy() {
        let base = Layout::contiguous(Shape::new([8, 3]), MemoryOrder::F);
        let sliced = base.slice_step(0, 2).unwrap();
        assert!(blas_orders(sliced.dims(), sliced.strides()).is_empty());
        let reversed = Layout::contiguous(Shape::new([4, 3]), MemoryOrder::C)
            .slice_step(0, -1)
            .unwrap();
        assert!(blas_orders(reversed.dims(), reversed.strides()).is_empty());
    }

    #[test]
    fn degenerate_matrices_accept_both_orders() {
        let row = Layout::contiguous(Shape::new([1, 5]), MemoryOrder::C);
        let orders = blas_orders(row.dims(), row.strides());
        assert_eq!(orders, vec![(MemoryOrder::C, 5), (MemoryOrder::F, 1)]);
    }

    #[test]
    fn stacked_layout_keeps_each_matrix_dense() {
        let layout = stacked_layout(&[3, 4, 2], MemoryOrder::F).unwrap();
        assert_eq!(layout.strides(), &[8, 1, 4]);
        let first = layout.select(0, 1).unwrap();
        assert!(first.is_contiguous(MemoryOrder::F));
        assert_eq!(first.offset(), 8);
    }
}
