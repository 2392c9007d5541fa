use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use faer::Par;
use gpuarray::backend::spec::{
    BlasError, BlasResult, DeviceBackend, DotCall, GemmBatchCall, GemmCall, GemvCall, GerCall,
};
use gpuarray::env::env_flag;
use gpuarray::tensor::{DType, ElementBuffer, Layout};
use tracing::debug;

mod kernels;

/// Enables float64 kernels (default on).
pub const FP64_VAR: &str = "GPUARRAY_FAER_FP64";
/// Enables batched gemm (default on).
pub const BATCHED_GEMM_VAR: &str = "GPUARRAY_FAER_BATCHED_GEMM";

fn faer_parallelism() -> Par {
    let par = faer::get_global_parallelism();
    if par.degree() == 1 {
        Par::Seq
    } else {
        par
    }
}

/// Capabilities advertised by a [`FaerDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaerDeviceConfig {
    pub fp64: bool,
    pub batched_gemm: bool,
}

impl Default for FaerDeviceConfig {
    fn default() -> Self {
        FaerDeviceConfig {
            fp64: true,
            batched_gemm: true,
        }
    }
}

impl FaerDeviceConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        FaerDeviceConfig {
            fp64: env_flag(FP64_VAR, defaults.fp64),
            batched_gemm: env_flag(BATCHED_GEMM_VAR, defaults.batched_gemm),
        }
    }

    /// A device without double precision support.
    pub fn single_precision() -> Self {
        FaerDeviceConfig {
            fp64: false,
            ..Self::default()
        }
    }
}

/// Handle to a device allocation. Clones refer to the same memory.
#[derive(Clone)]
pub struct FaerBuffer {
    data: Arc<RwLock<ElementBuffer>>,
}

impl FaerBuffer {
    fn read(&self) -> BlasResult<RwLockReadGuard<'_, ElementBuffer>> {
        self.data
            .read()
            .map_err(|_| BlasError::execution("device buffer lock poisoned"))
    }

    fn write(&self) -> BlasResult<RwLockWriteGuard<'_, ElementBuffer>> {
        self.data
            .write()
            .map_err(|_| BlasError::execution("device buffer lock poisoned"))
    }
}

impl fmt::Debug for FaerBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data.try_read() {
            Ok(data) => f
                .debug_struct("FaerBuffer")
                .field("dtype", &data.dtype())
                .field("len", &data.len())
                .finish(),
            Err(_) => f.write_str("FaerBuffer(<locked>)"),
        }
    }
}

/// Device backend whose memory lives on the host and whose BLAS kernels run on faer.
///
/// Kernels gather their operands through the call record's offsets and leading
/// dimensions, accumulate in double precision and round once on store.
#[derive(Debug, Clone, Default)]
pub struct FaerDevice {
    config: FaerDeviceConfig,
}

impl FaerDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: FaerDeviceConfig) -> Self {
        FaerDevice { config }
    }

    pub fn from_env() -> Self {
        Self::with_config(FaerDeviceConfig::from_env())
    }

    pub fn config(&self) -> FaerDeviceConfig {
        self.config
    }

    fn check_precision(&self, op: &'static str, dtype: DType) -> BlasResult<()> {
        if dtype == DType::F64 && !self.config.fp64 {
            return Err(BlasError::unsupported_precision(op, dtype));
        }
        Ok(())
    }
}

impl DeviceBackend for FaerDevice {
    type Buffer = FaerBuffer;

    fn backend_name(&self) -> &str {
        "faer"
    }

    fn alloc(&self, dtype: DType, len: usize) -> BlasResult<FaerBuffer> {
        self.check_precision("alloc", dtype)?;
        Ok(FaerBuffer {
            data: Arc::new(RwLock::new(ElementBuffer::zeros(dtype, len))),
        })
    }

    fn write(&self, dst: &FaerBuffer, offset: usize, src: &ElementBuffer) -> BlasResult<()> {
        let mut data = dst.write()?;
        let len = data.len();
        if !data.copy_range(offset, src, 0, src.len()) {
            return Err(BlasError::execution(format!(
                "write of {} elements at offset {offset} overruns buffer of {len}",
                src.len()
            )));
        }
        Ok(())
    }

    fn read(&self, src: &FaerBuffer, offset: usize, len: usize) -> BlasResult<ElementBuffer> {
        let data = src.read()?;
        let mut out = ElementBuffer::zeros(data.dtype(), len);
        if !out.copy_range(0, &data, offset, len) {
            return Err(BlasError::execution(format!(
                "read of {len} elements at offset {offset} overruns buffer of {}",
                data.len()
            )));
        }
        Ok(out)
    }

    fn copy_strided(
        &self,
        dst: &FaerBuffer,
        dst_layout: &Layout,
        src: &FaerBuffer,
        src_layout: &Layout,
    ) -> BlasResult<()> {
        if dst_layout.dims() != src_layout.dims() {
            return Err(BlasError::invalid(
                "copy",
                format!(
                    "shape mismatch: {} vs {}",
                    dst_layout.shape(),
                    src_layout.shape()
                ),
            ));
        }
        // Gather first so that overlapping views of one buffer copy correctly.
        let values: Vec<f64> = {
            let data = src.read()?;
            src_layout.validate(data.len())?;
            src_layout.offsets().map(|offset| data.get(offset)).collect()
        };
        let mut data = dst.write()?;
        dst_layout.validate(data.len())?;
        for (offset, value) in dst_layout.offsets().zip(values) {
            data.set(offset, value);
        }
        Ok(())
    }

    fn share(&self, a: &FaerBuffer, b: &FaerBuffer) -> bool {
        Arc::ptr_eq(&a.data, &b.data)
    }

    fn dot(&self, call: &DotCall<'_, FaerBuffer>) -> BlasResult<()> {
        self.check_precision("dot", call.dtype)?;
        debug!(n = call.n, dtype = %call.dtype, "faer dot");
        kernels::dot(call)
    }

    fn gemv(&self, call: &GemvCall<'_, FaerBuffer>) -> BlasResult<()> {
        self.check_precision("gemv", call.dtype)?;
        debug!(
            order = %call.order,
            trans = %call.trans,
            m = call.m,
            n = call.n,
            dtype = %call.dtype,
            "faer gemv"
        );
        kernels::gemv(call, faer_parallelism())
    }

    fn gemm(&self, call: &GemmCall<'_, FaerBuffer>) -> BlasResult<()> {
        self.check_precision("gemm", call.dtype)?;
        debug!(
            order = %call.order,
            trans_a = %call.trans_a,
            trans_b = %call.trans_b,
            m = call.m,
            n = call.n,
            k = call.k,
            dtype = %call.dtype,
            "faer gemm"
        );
        kernels::gemm(call, 0, 0, 0, faer_parallelism())
    }

    fn ger(&self, call: &GerCall<'_, FaerBuffer>) -> BlasResult<()> {
        self.check_precision("ger", call.dtype)?;
        debug!(order = %call.order, m = call.m, n = call.n, dtype = %call.dtype, "faer ger");
        kernels::ger(call, faer_parallelism())
    }

    fn gemm_batch(&self, call: &GemmBatchCall<'_, FaerBuffer>) -> BlasResult<()> {
        if !self.config.batched_gemm {
            return Err(BlasError::unsupported_operation(
                "gemm_batch",
                "batched gemm disabled for this device",
            ));
        }
        self.check_precision("gemm_batch", call.gemm.dtype)?;
        debug!(
            batch = call.batch,
            m = call.gemm.m,
            n = call.gemm.n,
            k = call.gemm.k,
            dtype = %call.gemm.dtype,
            "faer gemm_batch"
        );
        let par = faer_parallelism();
        for index in 0..call.batch {
            let index = index as isize;
            kernels::gemm(
                &call.gemm,
                index * call.stride_a,
                index * call.stride_b,
                index * call.stride_c,
                par,
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{FaerDevice, FaerDeviceConfig};
    use gpuarray::backend::spec::DeviceBackend;
    use gpuarray::tensor::{DType, ElementBuffer, Layout, MemoryOrder, Shape};

    #[test]
    fn single_precision_device_rejects_f64_buffers() {
        let device = FaerDevice::with_config(FaerDeviceConfig::single_precision());
        let err = device.alloc(DType::F64, 4).unwrap_err();
        assert!(err.is_unsupported());
        assert!(device.alloc(DType::F32, 4).is_ok());
    }

    #[test]
    fn strided_copy_reverses_in_place() {
        let device = FaerDevice::new();
        let buffer = device.alloc(DType::F32, 4).unwrap();
        device
            .write(&buffer, 0, &ElementBuffer::from_f64(DType::F32, &[1.0, 2.0, 3.0, 4.0]))
            .unwrap();
        let dense = Layout::contiguous(Shape::new([4]), MemoryOrder::C);
        let reversed = dense.slice_step(0, -1).unwrap();
        device
            .copy_strided(&buffer, &dense, &buffer, &reversed)
            .unwrap();
        let out = device.read(&buffer, 0, 4).unwrap();
        assert_eq!(out, ElementBuffer::F32(vec![4.0, 3.0, 2.0, 1.0]));
    }

    #[test]
    fn out_of_range_reads_fail_as_faults() {
        let device = FaerDevice::new();
        let buffer = device.alloc(DType::F32, 2).unwrap();
        let err = device.read(&buffer, 1, 2).unwrap_err();
        assert!(!err.is_unsupported());
        assert!(device.share(&buffer, &buffer.clone()));
        assert!(!device.share(&buffer, &device.alloc(DType::F32, 2).unwrap()));
    }
}
