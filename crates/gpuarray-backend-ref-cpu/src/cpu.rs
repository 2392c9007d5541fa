use gpuarray::backend::spec::{BlasError, BlasResult, HostBlas};
use gpuarray::tensor::{DType, HostArray, MemoryOrder};

/// Straightforward host BLAS used as ground truth.
///
/// Every routine walks its operands through their layouts, so any stride (negative
/// included) and any offset is accepted as-is. Products are accumulated in `f64` and
/// rounded once when stored into the output dtype.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceBlas;

impl ReferenceBlas {
    pub fn new() -> Self {
        ReferenceBlas
    }
}

impl HostBlas for ReferenceBlas {
    fn backend_name(&self) -> &str {
        "ref-cpu"
    }

    fn dot(&self, x: &HostArray, y: &HostArray) -> BlasResult<f64> {
        expect_rank("dot", "X", x, 1)?;
        expect_rank("dot", "Y", y, 1)?;
        if x.dims() != y.dims() {
            return Err(BlasError::invalid(
                "dot",
                format!("X has shape {} but Y has shape {}", x.shape(), y.shape()),
            ));
        }
        let x = x.to_vec_f64();
        let y = y.to_vec_f64();
        Ok(x.iter().zip(y.iter()).map(|(a, b)| a * b).sum())
    }

    fn gemv(
        &self,
        alpha: f64,
        a: &HostArray,
        x: &HostArray,
        beta: f64,
        y: Option<HostArray>,
        trans_a: bool,
        overwrite_y: bool,
    ) -> BlasResult<HostArray> {
        expect_rank("gemv", "A", a, 2)?;
        expect_rank("gemv", "X", x, 1)?;
        same_dtype("gemv", a, x)?;
        let (rows, cols) = op_dims(a, trans_a);
        if x.dims()[0] != cols {
            return Err(BlasError::invalid(
                "gemv",
                format!("X has length {} but op(A) has {cols} columns", x.dims()[0]),
            ));
        }
        let mut out = resolve_output("gemv", "Y", y, overwrite_y, &[rows], a.dtype())?;

        let product = if alpha == 0.0 {
            vec![0.0; rows]
        } else {
            let xs = x.to_vec_f64();
            (0..rows)
                .map(|i| {
                    let sum: f64 = (0..cols)
                        .map(|j| op_get(a, trans_a, i, j) * xs[j])
                        .sum();
                    alpha * sum
                })
                .collect()
        };
        accumulate(&mut out, &product, beta);
        Ok(out)
    }

    fn gemm(
        &self,
        alpha: f64,
        a: &HostArray,
        b: &HostArray,
        beta: f64,
        c: Option<HostArray>,
        trans_a: bool,
        trans_b: bool,
        overwrite_c: bool,
    ) -> BlasResult<HostArray> {
        expect_rank("gemm", "A", a, 2)?;
        expect_rank("gemm", "B", b, 2)?;
        same_dtype("gemm", a, b)?;
        let (m, k) = op_dims(a, trans_a);
        let (kb, n) = op_dims(b, trans_b);
        if k != kb {
            return Err(BlasError::invalid(
                "gemm",
                format!("inner dimension mismatch: op(A) is {m}x{k}, op(B) is {kb}x{n}"),
            ));
        }
        let mut out = resolve_output("gemm", "C", c, overwrite_c, &[m, n], a.dtype())?;

        let mut product = vec![0.0; m * n];
        if alpha != 0.0 {
            for i in 0..m {
                for j in 0..n {
                    let sum: f64 = (0..k)
                        .map(|l| op_get(a, trans_a, i, l) * op_get(b, trans_b, l, j))
                        .sum();
                    product[i * n + j] = alpha * sum;
                }
            }
        }
        accumulate(&mut out, &product, beta);
        Ok(out)
    }

    fn ger(
        &self,
        alpha: f64,
        x: &HostArray,
        y: &HostArray,
        a: Option<HostArray>,
        overwrite_a: bool,
    ) -> BlasResult<HostArray> {
        expect_rank("ger", "X", x, 1)?;
        expect_rank("ger", "Y", y, 1)?;
        same_dtype("ger", x, y)?;
        let (m, n) = (x.dims()[0], y.dims()[0]);
        let mut out = resolve_output("ger", "A", a, overwrite_a, &[m, n], x.dtype())?;

        let mut update = vec![0.0; m * n];
        if alpha != 0.0 {
            let xs = x.to_vec_f64();
            let ys = y.to_vec_f64();
            for (i, xi) in xs.iter().enumerate() {
                for (j, yj) in ys.iter().enumerate() {
                    update[i * n + j] = alpha * xi * yj;
                }
            }
        }
        accumulate(&mut out, &update, 1.0);
        Ok(out)
    }
}

fn expect_rank(op: &'static str, name: &str, array: &HostArray, rank: usize) -> BlasResult<()> {
    if array.rank() != rank {
        return Err(BlasError::invalid(
            op,
            format!("{name} must have rank {rank}, got shape {}", array.shape()),
        ));
    }
    Ok(())
}

fn same_dtype(op: &'static str, lhs: &HostArray, rhs: &HostArray) -> BlasResult<()> {
    if lhs.dtype() != rhs.dtype() {
        return Err(BlasError::invalid(
            op,
            format!("dtype mismatch: {} vs {}", lhs.dtype(), rhs.dtype()),
        ));
    }
    Ok(())
}

fn op_dims(array: &HostArray, trans: bool) -> (usize, usize) {
    let dims = array.dims();
    if trans {
        (dims[1], dims[0])
    } else {
        (dims[0], dims[1])
    }
}

#[inline]
fn op_get(array: &HostArray, trans: bool, row: usize, col: usize) -> f64 {
    if trans {
        array.get(&[col, row])
    } else {
        array.get(&[row, col])
    }
}

/// Absent outputs start as zeros in column-major order; a supplied output is copied
/// unless the caller allows it to be overwritten.
fn resolve_output(
    op: &'static str,
    name: &str,
    supplied: Option<HostArray>,
    overwrite: bool,
    dims: &[usize],
    dtype: DType,
) -> BlasResult<HostArray> {
    match supplied {
        Some(out) if out.dims() != dims => Err(BlasError::invalid(
            op,
            format!("{name} has shape {} but {dims:?} is required", out.shape()),
        )),
        Some(out) if out.dtype() != dtype => Err(BlasError::invalid(
            op,
            format!("dtype mismatch: {dtype} vs {name} {}", out.dtype()),
        )),
        Some(out) if overwrite => Ok(out),
        Some(out) => Ok(out.to_contiguous(MemoryOrder::F)),
        None => Ok(HostArray::zeros(dims.to_vec(), dtype, MemoryOrder::F)),
    }
}

/// `out = values + beta * out`, with `values` in row-major logical order. The prior
/// contents are not read when `beta` is zero.
fn accumulate(out: &mut HostArray, values: &[f64], beta: f64) {
    let layout = out.layout().clone();
    let storage = out.storage_mut();
    for (offset, &value) in layout.offsets().zip(values.iter()) {
        let prior = if beta == 0.0 {
            0.0
        } else {
            beta * storage.get(offset)
        };
        storage.set(offset, value + prior);
    }
}

#[cfg(test)]
mod tests {
    use super::ReferenceBlas;
    use gpuarray::backend::spec::HostBlas;
    use gpuarray::tensor::{DType, HostArray, MemoryOrder};

    fn array(dims: &[usize], order: MemoryOrder, values: &[f64]) -> HostArray {
        HostArray::from_values(dims.to_vec(), DType::F64, order, values).unwrap()
    }

    #[test]
    fn dot_walks_reversed_views() {
        let x = array(&[3], MemoryOrder::C, &[1.0, 2.0, 3.0]);
        let y = array(&[3], MemoryOrder::C, &[4.0, 5.0, 6.0])
            .slice_step(0, -1)
            .unwrap();
        assert_eq!(ReferenceBlas.dot(&x, &y).unwrap(), 1.0 * 6.0 + 2.0 * 5.0 + 3.0 * 4.0);
    }

    #[test]
    fn gemv_transposes_and_scales() {
        let a = array(&[2, 3], MemoryOrder::F, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let x = array(&[2], MemoryOrder::C, &[1.0, -1.0]);
        let y = array(&[3], MemoryOrder::C, &[10.0, 20.0, 30.0]);
        let out = ReferenceBlas
            .gemv(2.0, &a, &x, 0.5, Some(y), true, false)
            .unwrap();
        assert_eq!(out.to_vec_f64(), vec![-1.0, 4.0, 9.0]);
    }

    #[test]
    fn gemm_matches_hand_computation() {
        let a = array(&[2, 2], MemoryOrder::C, &[1.0, 2.0, 3.0, 4.0]);
        let b = array(&[2, 2], MemoryOrder::F, &[5.0, 6.0, 7.0, 8.0]);
        let out = ReferenceBlas
            .gemm(1.0, &a, &b, 0.0, None, false, false, false)
            .unwrap();
        assert_eq!(out.to_vec_f64(), vec![19.0, 22.0, 43.0, 50.0]);
        assert!(out.layout().is_contiguous(MemoryOrder::F));
    }

    #[test]
    fn zero_coefficients_do_not_read_operands() {
        let a = HostArray::full([2, 2], DType::F64, MemoryOrder::C, f64::NAN);
        let c = HostArray::full([2, 2], DType::F64, MemoryOrder::C, 3.0);
        let out = ReferenceBlas
            .gemm(0.0, &a, &a, 2.0, Some(c), false, false, true)
            .unwrap();
        assert_eq!(out.to_vec_f64(), vec![6.0; 4]);

        let b = array(&[2, 2], MemoryOrder::C, &[1.0, 0.0, 0.0, 1.0]);
        let stale = HostArray::full([2, 2], DType::F64, MemoryOrder::C, f64::NAN);
        let out = ReferenceBlas
            .gemm(1.0, &b, &b, 0.0, Some(stale), false, false, true)
            .unwrap();
        assert_eq!(out.to_vec_f64(), vec![1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn ger_accumulates_into_supplied_matrix() {
        let x = array(&[2], MemoryOrder::C, &[1.0, 2.0]);
        let y = array(&[3], MemoryOrder::C, &[1.0, 0.0, -1.0]);
        let a = HostArray::full([2, 3], DType::F64, MemoryOrder::F, 1.0);
        let out = ReferenceBlas.ger(1.0, &x, &y, Some(a), false).unwrap();
        assert_eq!(out.to_vec_f64(), vec![2.0, 1.0, 0.0, 3.0, 1.0, -1.0]);
    }

    #[test]
    fn shape_mismatches_are_rejected() {
        let a = array(&[2, 3], MemoryOrder::C, &[0.0; 6]);
        let x = array(&[2], MemoryOrder::C, &[0.0; 2]);
        let err = ReferenceBlas
            .gemv(1.0, &a, &x, 0.0, None, false, false)
            .unwrap_err();
        assert!(err.to_string().contains("op(A) has 3 columns"));
    }
}
