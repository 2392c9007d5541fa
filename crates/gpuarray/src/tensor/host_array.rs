//! Host-backed strided array used by the reference backend and for readbacks.

use std::sync::Arc;

use super::buffer::ElementBuffer;
use super::dtype::DType;
use super::layout::{Layout, MemoryOrder};
use super::shape::Shape;
use crate::backend::spec::{BlasError, BlasResult};

/// Strided view over copy-on-write host storage.
///
/// Views produced by [`HostArray::slice_step`] and friends share storage with their parent
/// until one of them is written, at which point the writer gets its own copy.
#[derive(Debug, Clone)]
pub struct HostArray {
    data: Arc<ElementBuffer>,
    layout: Layout,
}

impl HostArray {
    /// Wraps existing storage, validating that the layout stays inside it.
    pub fn from_parts(data: ElementBuffer, layout: Layout) -> BlasResult<Self> {
        layout.validate(data.len())?;
        Ok(HostArray {
            data: Arc::new(data),
            layout,
        })
    }

    /// Builds a dense array from values given in row-major logical order, stored in `order`.
    pub fn from_values(
        shape: impl Into<Shape>,
        dtype: DType,
        order: MemoryOrder,
        values: &[f64],
    ) -> BlasResult<Self> {
        let shape = shape.into();
        if values.len() != shape.num_elements() {
            return Err(BlasError::invalid(
                "array",
                format!(
                    "{} values do not fill shape {shape}",
                    values.len()
                ),
            ));
        }
        let layout = Layout::contiguous(shape, order);
        let mut data = ElementBuffer::zeros(dtype, values.len());
        for (offset, &value) in layout.offsets().zip(values.iter()) {
            data.set(offset, value);
        }
        Self::from_parts(data, layout)
    }

    pub fn zeros(shape: impl Into<Shape>, dtype: DType, order: MemoryOrder) -> Self {
        let layout = Layout::contiguous(shape.into(), order);
        HostArray {
            data: Arc::new(ElementBuffer::zeros(dtype, layout.num_elements())),
            layout,
        }
    }

    pub fn full(shape: impl Into<Shape>, dtype: DType, order: MemoryOrder, value: f64) -> Self {
        let mut array = Self::zeros(shape, dtype, order);
        array.fill(value);
        array
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

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn num_elements(&self) -> usize {
        self.layout.num_elements()
    }

    /// Borrows the whole backing storage, including elements outside this view.
    pub fn storage(&self) -> &ElementBuffer {
        &self.data
    }

    /// Mutable access to the backing storage, detaching it from other views first.
    pub fn storage_mut(&mut self) -> &mut ElementBuffer {
        Arc::make_mut(&mut self.data)
    }

    /// True when both arrays are views of the same allocation.
    pub fn shares_storage(&self, other: &HostArray) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    pub fn get(&self, index: &[usize]) -> f64 {
        self.data.get(self.layout.offset_of(index) as usize)
    }

    pub fn set(&mut self, index: &[usize], value: f64) {
        let offset = self.layout.offset_of(index) as usize;
        self.storage_mut().set(offset, value);
    }

    /// Overwrites every element of the view with `value`.
    pub fn fill(&mut self, value: f64) {
        let layout = self.layout.clone();
        let storage = self.storage_mut();
        for offset in layout.offsets() {
            storage.set(offset, value);
        }
    }

    /// Logical values in row-major order, widened to `f64`.
    pub fn to_vec_f64(&self) -> Vec<f64> {
        self.layout
            .offsets()
            .map(|offset| self.data.get(offset))
            .collect()
    }

    /// Fresh dense copy of the view in `order`.
    pub fn to_contiguous(&self, order: MemoryOrder) -> HostArray {
        let layout = Layout::contiguous(self.shape().clone(), order);
        let mut data = ElementBuffer::zeros(self.dtype(), layout.num_elements());
        for (dst, src) in layout.offsets().zip(self.layout.offsets()) {
            data.set(dst, self.data.get(src));
        }
        HostArray {
            data: Arc::new(data),
            layout,
        }
    }

    fn with_layout(&self, layout: Layout) -> BlasResult<Self> {
        layout.validate(self.data.len())?;
        Ok(HostArray {
            data: Arc::clone(&self.data),
            layout,
        })
    }

    pub fn slice_step(&self, axis: usize, step: isize) -> BlasResult<Self> {
        self.with_layout(self.layout.slice_step(axis, step)?)
    }

    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> BlasResult<Self> {
        self.with_layout(self.layout.narrow(axis, start, len)?)
    }

    pub fn select(&self, axis: usize, index: usize) -> BlasResult<Self> {
        self.with_layout(self.layout.select(axis, index)?)
    }

    pub fn swap_axes(&self, a: usize, b: usize) -> BlasResult<Self> {
        self.with_layout(self.layout.swap_axes(a, b)?)
    }
}

#[cfg(test)]
mod tests {
    use super::HostArray;
    use crate::tensor::{DType, MemoryOrder, Shape};

    #[test]
    fn from_values_respects_order() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let c = HostArray::from_values([2, 3], DType::F64, MemoryOrder::C, &values).unwrap();
        let f = HostArray::from_values([2, 3], DType::F64, MemoryOrder::F, &values).unwrap();
        assert_eq!(c.to_vec_f64(), values.to_vec());
        assert_eq!(f.to_vec_f64(), values.to_vec());
        assert_eq!(f.get(&[1, 0]), 4.0);
        assert_eq!(f.storage().get(1), 4.0);
    }

    #[test]
    fn views_share_until_written() {
        let base = HostArray::from_values([4], DType::F32, MemoryOrder::C, &[1.0, 2.0, 3.0, 4.0])
            .unwrap();
        let mut view = base.slice_step(0, -1).unwrap();
        assert!(view.shares_storage(&base));
        assert_eq!(view.to_vec_f64(), vec![4.0, 3.0, 2.0, 1.0]);

        view.set(&[0], 9.0);
        assert!(!view.shares_storage(&base));
        assert_eq!(base.get(&[3]), 4.0);
        assert_eq!(view.get(&[0]), 9.0);
    }

    #[test]
    fn from_values_rejects_wrong_length() {
        let err = HostArray::from_values(Shape::new([2, 2]), DType::F32, MemoryOrder::C, &[1.0])
            .unwrap_err();
        assert!(err.to_string().contains("do not fill shape (2, 2)"));
    }

    #[test]
    fn to_contiguous_copies_strided_view() {
        let values: Vec<f64> = (0..12).map(f64::from).collect();
        let base = HostArray::from_values([4, 3], DType::F64, MemoryOrder::C, &values).unwrap();
        let view = base.slice_step(0, 2).unwrap().narrow(1, 1, 2).unwrap();
        let dense = view.to_contiguous(MemoryOrder::F);
        assert!(dense.layout().is_contiguous(MemoryOrder::F));
        assert_eq!(dense.to_vec_f64(), vec![1.0, 2.0, 7.0, 8.0]);
        assert!(!dense.shares_storage(&base));
    }
}
