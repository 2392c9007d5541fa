use std::sync::Arc;

use gpuarray::backend::spec::{
    BlasError, BlasResult, DeviceBackend, DotCall, GemmBatchCall, GemmCall, GemvCall, GerCall,
};
use gpuarray::tensor::{DType, ElementBuffer, Layout};

/// Test-only backend that forwards to `inner` but fails one kernel with an execution
/// fault.
pub struct FaultyBackend<B> {
    inner: Arc<B>,
    failing_op: &'static str,
}

impl<B: DeviceBackend> FaultyBackend<B> {
    /// `failing_op` is one of `dot`, `gemv`, `gemm`, `ger` or `gemm_batch`.
    pub fn new(inner: Arc<B>, failing_op: &'static str) -> Self {
        FaultyBackend { inner, failing_op }
    }

    fn check(&self, op: &'static str) -> BlasResult<()> {
        if op == self.failing_op {
            return Err(BlasError::execution(format!("injected fault in {op}")));
        }
        Ok(())
    }
}

impl<B: DeviceBackend> DeviceBackend for FaultyBackend<B> {
    type Buffer = B::Buffer;

    fn backend_name(&self) -> &str {
        "faulty"
    }

    fn alloc(&self, dtype: DType, len: usize) -> BlasResult<Self::Buffer> {
        self.inner.alloc(dtype, len)
    }

    fn write(&self, dst: &Self::Buffer, offset: usize, src: &ElementBuffer) -> BlasResult<()> {
        self.inner.write(dst, offset, src)
    }

    fn read(&self, src: &Self::Buffer, offset: usize, len: usize) -> BlasResult<ElementBuffer> {
        self.inner.read(src, offset, len)
    }

    fn copy_strided(
        &self,
        dst: &Self::Buffer,
        dst_layout: &Layout,
        src: &Self::Buffer,
        src_layout: &Layout,
    ) -> BlasResult<()> {
        self.inner.copy_strided(dst, dst_layout, src, src_layout)
    }

    fn share(&self, a: &Self::Buffer, b: &Self::Buffer) -> bool {
        self.inner.share(a, b)
    }

    fn dot(&self, call: &DotCall<'_, Self::Buffer>) -> BlasResult<()> {
        self.check("dot")?;
        self.inner.dot(call)
    }

    fn gemv(&self, call: &GemvCall<'_, Self::Buffer>) -> BlasResult<()> {
        self.check("gemv")?;
        self.inner.gemv(call)
    }

    fn gemm(&self, call: &GemmCall<'_, Self::Buffer>) -> BlasResult<()> {
        self.check("gemm")?;
        self.inner.gemm(call)
    }

    fn ger(&self, call: &GerCall<'_, Self::Buffer>) -> BlasResult<()> {
        self.check("ger")?;
        self.inner.ger(call)
    }

    fn gemm_batch(&self, call: &GemmBatchCall<'_, Self::Buffer>) -> BlasResult<()> {
        self.check("gemm_batch")?;
        self.inner.gemm_batch(call)
    }
}
