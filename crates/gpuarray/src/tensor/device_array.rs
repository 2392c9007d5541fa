//! Device-side array wrapper that tracks a backend buffer and its strided view.

use std::fmt;
use std::sync::Arc;

use super::{DType, HostArray, Layout, MemoryOrder, Shape};
use crate::backend::spec::{BlasResult, DeviceBackend};

/// Strided view over a device buffer.
///
/// Cloning is cheap and yields another handle to the same device memory; use
/// [`DeviceArray::copy`] for an independent allocation.
pub struct DeviceArray<B: DeviceBackend + 'static> {
    backend: Arc<B>,
    buffer: B::Buffer,
    dtype: DType,
    capacity: usize,
    layout: Layout,
}

impl<B: DeviceBackend + 'static> Clone for DeviceArray<B> {
    fn clone(&self) -> Self {
        DeviceArray {
            backend: Arc::clone(&self.backend),
            buffer: self.buffer.clone(),
            dtype: self.dtype,
            capacity: self.capacity,
            layout: self.layout.clone(),
        }
    }
}

impl<B: DeviceBackend + 'static> fmt::Debug for DeviceArray<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceArray")
            .field("backend", &self.backend.backend_name())
            .field("dtype", &self.dtype)
            .field("capacity", &self.capacity)
            .field("layout", &self.layout)
            .finish()
    }
}

impl<B: DeviceBackend + 'static> DeviceArray<B> {
    /// Allocates a zero-filled buffer sized for `layout`'s reachable elements.
    pub fn with_layout(backend: Arc<B>, dtype: DType, layout: Layout) -> BlasResult<Self> {
        let capacity = match layout.extent() {
            Some((_, high)) => high as usize + 1,
            None => 0,
        };
        layout.validate(capacity)?;
        let buffer = backend.alloc(dtype, capacity)?;
        Ok(DeviceArray {
            backend,
            buffer,
            dtype,
            capacity,
            layout,
        })
    }

    /// Zero-filled dense array in `order`.
    pub fn zeros(
        backend: Arc<B>,
        shape: impl Into<Shape>,
        dtype: DType,
        order: MemoryOrder,
    ) -> BlasResult<Self> {
        Self::with_layout(backend, dtype, Layout::contiguous(shape.into(), order))
    }

    /// Uploads the full storage of `host` into a fresh device buffer and keeps its layout,
    /// so the device view reaches the same logical elements as the host view.
    pub fn from_host(backend: Arc<B>, host: &HostArray) -> BlasResult<Self> {
        let storage = host.storage();
        let buffer = backend.alloc(host.dtype(), storage.len())?;
        backend.write(&buffer, 0, storage)?;
        Ok(DeviceArray {
            backend,
            buffer,
            dtype: host.dtype(),
            capacity: storage.len(),
            layout: host.layout().clone(),
        })
    }

    /// Reads the buffer back and wraps it in a host array with the same view.
    pub fn to_host(&self) -> BlasResult<HostArray> {
        let storage = self.backend.read(&self.buffer, 0, self.capacity)?;
        HostArray::from_parts(storage, self.layout.clone())
    }

    /// Logical values in row-major order, widened to `f64`.
    pub fn to_vec_f64(&self) -> BlasResult<Vec<f64>> {
        Ok(self.to_host()?.to_vec_f64())
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn buffer(&self) -> &B::Buffer {
        &self.buffer
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    pub fn rank(&self) -> usize {
        self.layout.rank()
    }

    /// True when both arrays live in the same device memory.
    pub fn shares_storage(&self, other: &DeviceArray<B>) -> bool {
        self.backend.share(&self.buffer, &other.buffer)
    }

    /// Order a copy of this array should use to keep its storage order.
    pub fn preferred_order(&self) -> MemoryOrder {
        if self.layout.is_contiguous(MemoryOrder::F) && !self.layout.is_contiguous(MemoryOrder::C)
        {
            MemoryOrder::F
        } else {
            MemoryOrder::C
        }
    }

    /// Independent dense copy in `order`.
    pub fn copy(&self, order: MemoryOrder) -> BlasResult<Self> {
        let layout = Layout::contiguous(self.shape().clone(), order);
        self.copy_to_layout(layout)
    }

    /// Independent copy whose view is described by `layout` (same shape, fresh buffer).
    pub fn copy_to_layout(&self, layout: Layout) -> BlasResult<Self> {
        let out = Self::with_layout(Arc::clone(&self.backend), self.dtype, layout)?;
        out.assign_from(self)?;
        Ok(out)
    }

    /// Writes the elements of `src` into this view.
    pub fn assign_from(&self, src: &DeviceArray<B>) -> BlasResult<()> {
        self.backend
            .copy_strided(&self.buffer, &self.layout, &src.buffer, &src.layout)
    }

    fn with_view(&self, layout: Layout) -> BlasResult<Self> {
        layout.validate(self.capacity)?;
        Ok(DeviceArray {
            backend: Arc::clone(&self.backend),
            buffer: self.buffer.clone(),
            dtype: self.dtype,
            capacity: self.capacity,
            layout,
        })
    }

    pub fn slice_step(&self, axis: usize, step: isize) -> BlasResult<Self> {
        self.with_view(self.layout.slice_step(axis, step)?)
    }

    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> BlasResult<Self> {
        self.with_view(self.layout.narrow(axis, start, len)?)
    }

    pub fn select(&self, axis: usize, index: usize) -> BlasResult<Self> {
        self.with_view(self.layout.select(axis, index)?)
    }

    pub fn swap_axes(&self, a: usize, b: usize) -> BlasResult<Self> {
        self.with_view(self.layout.swap_axes(a, b)?)
    }
}
