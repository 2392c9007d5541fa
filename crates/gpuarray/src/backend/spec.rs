use std::fmt;

use thiserror::Error;

use crate::tensor::{DType, ElementBuffer, HostArray, Layout, LayoutError, MemoryOrder};

/// Capability gap reported by a device backend.
///
/// This is a structured status, distinct from genuine faults: consumers are expected to
/// treat it as "not applicable on this device" rather than as a numerical failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Unsupported {
    #[error("{op} does not support {dtype} precision on this device")]
    Precision { op: &'static str, dtype: DType },
    #[error("{op} is not supported on this device: {reason}")]
    Operation { op: &'static str, reason: String },
}

/// Error surfaced by BLAS bindings and backends.
#[derive(Debug, Error)]
pub enum BlasError {
    #[error(transparent)]
    Unsupported(#[from] Unsupported),
    #[error("invalid argument to {op}: {message}")]
    InvalidArgument { op: &'static str, message: String },
    #[error("invalid layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("device execution failure: {message}")]
    Execution { message: String },
}

impl BlasError {
    pub fn unsupported_precision(op: &'static str, dtype: DType) -> Self {
        BlasError::Unsupported(Unsupported::Precision { op, dtype })
    }

    pub fn unsupported_operation(op: &'static str, reason: impl Into<String>) -> Self {
        BlasError::Unsupported(Unsupported::Operation {
            op,
            reason: reason.into(),
        })
    }

    pub fn invalid(op: &'static str, message: impl Into<String>) -> Self {
        BlasError::InvalidArgument {
            op,
            message: message.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BlasError::Execution {
            message: message.into(),
        }
    }

    /// Returns the capability gap when this error is one.
    pub fn as_unsupported(&self) -> Option<&Unsupported> {
        match self {
            BlasError::Unsupported(unsupported) => Some(unsupported),
            _ => None,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        self.as_unsupported().is_some()
    }
}

/// Convenience alias for results returned by BLAS routines.
pub type BlasResult<T> = Result<T, BlasError>;

/// Transpose flag of a BLAS matrix operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transpose {
    NoTrans,
    Trans,
}

impl Transpose {
    pub fn from_flag(trans: bool) -> Self {
        if trans {
            Transpose::Trans
        } else {
            Transpose::NoTrans
        }
    }

    pub fn is_trans(self) -> bool {
        self == Transpose::Trans
    }

    pub fn flip(self) -> Self {
        match self {
            Transpose::NoTrans => Transpose::Trans,
            Transpose::Trans => Transpose::NoTrans,
        }
    }
}

impl fmt::Display for Transpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transpose::NoTrans => f.write_str("N"),
            Transpose::Trans => f.write_str("T"),
        }
    }
}

/// Strided vector inside a device buffer.
///
/// Logical element `i` lives at `offset + i * inc`; `inc` may be negative, in which case
/// `offset` addresses the logical first element, not the lowest address.
#[derive(Debug)]
pub struct VectorRef<'a, H> {
    pub buffer: &'a H,
    pub offset: usize,
    pub inc: isize,
}

impl<H> VectorRef<'_, H> {
    #[inline]
    pub fn element(&self, i: usize) -> isize {
        self.offset as isize + i as isize * self.inc
    }
}

/// Dense matrix inside a device buffer, addressed with a leading dimension.
#[derive(Debug)]
pub struct MatrixRef<'a, H> {
    pub buffer: &'a H,
    pub offset: usize,
    pub ld: usize,
}

impl<H> MatrixRef<'_, H> {
    /// Offset of stored element `(row, col)` when the matrix is laid out in `order`.
    #[inline]
    pub fn element(&self, order: MemoryOrder, row: usize, col: usize) -> usize {
        match order {
            MemoryOrder::C => self.offset + row * self.ld + col,
            MemoryOrder::F => self.offset + row + col * self.ld,
        }
    }
}

/// `out = x . y`
#[derive(Debug)]
pub struct DotCall<'a, H> {
    pub dtype: DType,
    pub n: usize,
    pub x: VectorRef<'a, H>,
    pub y: VectorRef<'a, H>,
    pub out: &'a H,
    pub out_offset: usize,
}

/// `y = alpha * op(A) * x + beta * y`, where `A` is stored as `m x n` in `order`.
#[derive(Debug)]
pub struct GemvCall<'a, H> {
    pub dtype: DType,
    pub order: MemoryOrder,
    pub trans: Transpose,
    pub m: usize,
    pub n: usize,
    pub alpha: f64,
    pub a: MatrixRef<'a, H>,
    pub x: VectorRef<'a, H>,
    pub beta: f64,
    pub y: VectorRef<'a, H>,
}

/// `C = alpha * op(A) * op(B) + beta * C` with `C` of shape `m x n` and inner size `k`.
#[derive(Debug)]
pub struct GemmCall<'a, H> {
    pub dtype: DType,
    pub order: MemoryOrder,
    pub trans_a: Transpose,
    pub trans_b: Transpose,
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub alpha: f64,
    pub a: MatrixRef<'a, H>,
    pub b: MatrixRef<'a, H>,
    pub beta: f64,
    pub c: MatrixRef<'a, H>,
}

/// `A = A + alpha * x * y^T` with `A` of shape `m x n`.
#[derive(Debug)]
pub struct GerCall<'a, H> {
    pub dtype: DType,
    pub order: MemoryOrder,
    pub m: usize,
    pub n: usize,
    pub alpha: f64,
    pub x: VectorRef<'a, H>,
    pub y: VectorRef<'a, H>,
    pub a: MatrixRef<'a, H>,
}

/// `batch` independent gemm calls. The offsets in `gemm` address batch 0 and batch `i`
/// is shifted by `i * stride_*` elements for each operand.
#[derive(Debug)]
pub struct GemmBatchCall<'a, H> {
    pub gemm: GemmCall<'a, H>,
    pub batch: usize,
    pub stride_a: isize,
    pub stride_b: isize,
    pub stride_c: isize,
}

/// Device backend contract consumed by the BLAS bindings.
///
/// The backend value doubles as the device context: it is created once, shared through
/// an `Arc`, and handed to every allocation and call.
pub trait DeviceBackend: Send + Sync {
    type Buffer: Clone + Send + Sync + 'static;

    /// Returns a human-readable backend identifier (e.g., `"faer"`, `"opencl"`).
    fn backend_name(&self) -> &str;

    /// Allocates a zero-filled buffer of `len` elements.
    fn alloc(&self, dtype: DType, len: usize) -> BlasResult<Self::Buffer>;

    /// Copies host elements into `dst` starting at element `offset`.
    fn write(&self, dst: &Self::Buffer, offset: usize, src: &ElementBuffer) -> BlasResult<()>;

    /// Reads `len` elements starting at element `offset`.
    fn read(&self, src: &Self::Buffer, offset: usize, len: usize) -> BlasResult<ElementBuffer>;

    /// Copies the elements of a strided view into another strided view of the same shape,
    /// converting between dtypes when the buffers differ.
    fn copy_strided(
        &self,
        dst: &Self::Buffer,
        dst_layout: &Layout,
        src: &Self::Buffer,
        src_layout: &Layout,
    ) -> BlasResult<()>;

    /// Returns true when the two handles refer to the same device memory.
    fn share(&self, a: &Self::Buffer, b: &Self::Buffer) -> bool;

    fn dot(&self, call: &DotCall<'_, Self::Buffer>) -> BlasResult<()>;

    fn gemv(&self, call: &GemvCall<'_, Self::Buffer>) -> BlasResult<()>;

    fn gemm(&self, call: &GemmCall<'_, Self::Buffer>) -> BlasResult<()>;

    fn ger(&self, call: &GerCall<'_, Self::Buffer>) -> BlasResult<()>;

    fn gemm_batch(&self, _call: &GemmBatchCall<'_, Self::Buffer>) -> BlasResult<()> {
        Err(BlasError::unsupported_operation(
            "gemm_batch",
            format!("backend {} has no batched gemm", self.backend_name()),
        ))
    }
}

/// Host-memory BLAS used as the trusted reference.
///
/// Outputs follow SciPy `fblas` conventions: an absent output is zero-initialised, and a
/// supplied output is written in place only when the matching `overwrite` flag is set.
pub trait HostBlas {
    fn backend_name(&self) -> &str;

    /// Inner product accumulated and returned in double precision.
    fn dot(&self, x: &HostArray, y: &HostArray) -> BlasResult<f64>;

    #[allow(clippy::too_many_arguments)]
    fn gemv(
        &self,
        alpha: f64,
        a: &HostArray,
        x: &HostArray,
        beta: f64,
        y: Option<HostArray>,
        trans_a: bool,
        overwrite_y: bool,
    ) -> BlasResult<HostArray>;

    #[allow(clippy::too_many_arguments)]
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
    ) -> BlasResult<HostArray>;

    fn ger(
        &self,
        alpha: f64,
        x: &HostArray,
        y: &HostArray,
        a: Option<HostArray>,
        overwrite_a: bool,
    ) -> BlasResult<HostArray>;
}

#[cfg(test)]
mod tests {
    use super::{BlasError, MatrixRef, Transpose, VectorRef};
    use crate::tensor::{DType, LayoutError, MemoryOrder};

    #[test]
    fn unsupported_is_classified_structurally() {
        let err = BlasError::unsupported_precision("gemm", DType::F64);
        assert!(err.is_unsupported());
        assert_eq!(
            err.to_string(),
            "gemm does not support float64 precision on this device"
        );

        // A fault whose text mentions precision is still a fault.
        let fault = BlasError::execution("does not support double precision");
        assert!(!fault.is_unsupported());
        let layout: BlasError = LayoutError::ZeroStep.into();
        assert!(!layout.is_unsupported());
    }

    #[test]
    fn refs_address_elements() {
        let buffer = ();
        let v = VectorRef {
            buffer: &buffer,
            offset: 6,
            inc: -2,
        };
        assert_eq!(v.element(3), 0);
        let m = MatrixRef {
            buffer: &buffer,
            offset: 1,
            ld: 5,
        };
        assert_eq!(m.element(MemoryOrder::C, 2, 3), 14);
        assert_eq!(m.element(MemoryOrder::F, 2, 3), 18);
        assert_eq!(Transpose::from_flag(true).flip(), Transpose::NoTrans);
    }
}
