//! Flat typed element storage used by host arrays and host-resident device buffers.

use super::dtype::DType;

/// Dense element storage tagged with its dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementBuffer {
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl ElementBuffer {
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::F32 => ElementBuffer::F32(vec![0.0; len]),
            DType::F64 => ElementBuffer::F64(vec![0.0; len]),
        }
    }

    /// Builds a buffer of `dtype` from `f64` values, rounding each one on the way in.
    pub fn from_f64(dtype: DType, values: &[f64]) -> Self {
        match dtype {
            DType::F32 => ElementBuffer::F32(values.iter().map(|&v| v as f32).collect()),
            DType::F64 => ElementBuffer::F64(values.to_vec()),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            ElementBuffer::F32(_) => DType::F32,
            ElementBuffer::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ElementBuffer::F32(values) => values.len(),
            ElementBuffer::F64(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads element `index` widened to `f64`. Panics when out of range.
    #[inline]
    pub fn get(&self, index: usize) -> f64 {
        match self {
            ElementBuffer::F32(values) => values[index] as f64,
            ElementBuffer::F64(values) => values[index],
        }
    }

    /// Stores `value` at `index`, rounding to the buffer dtype. Panics when out of range.
    #[inline]
    pub fn set(&mut self, index: usize, value: f64) {
        match self {
            ElementBuffer::F32(values) => values[index] = value as f32,
            ElementBuffer::F64(values) => values[index] = value,
        }
    }

    /// Copies `len` elements from `src[src_offset..]` into `self[dst_offset..]`.
    /// Returns `false` when either range is out of bounds.
    pub fn copy_range(
        &mut self,
        dst_offset: usize,
        src: &ElementBuffer,
        src_offset: usize,
        len: usize,
    ) -> bool {
        let (Some(dst_end), Some(src_end)) =
            (dst_offset.checked_add(len), src_offset.checked_add(len))
        else {
            return false;
        };
        if dst_end > self.len() || src_end > src.len() {
            return false;
        }
        match (self, src) {
            (ElementBuffer::F32(dst), ElementBuffer::F32(src)) => {
                dst[dst_offset..dst_end].copy_from_slice(&src[src_offset..src_end]);
            }
            (ElementBuffer::F64(dst), ElementBuffer::F64(src)) => {
                dst[dst_offset..dst_end].copy_from_slice(&src[src_offset..src_end]);
            }
            (dst, src) => {
                for i in 0..len {
                    dst.set(dst_offset + i, src.get(src_offset + i));
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::ElementBuffer;
    use crate::tensor::DType;

    #[test]
    fn set_rounds_to_buffer_precision() {
        let mut buffer = ElementBuffer::zeros(DType::F32, 2);
        buffer.set(1, 0.1);
        assert_eq!(buffer.get(1), 0.1f32 as f64);
    }

    #[test]
    fn copy_range_converts_and_bounds_checks() {
        let src = ElementBuffer::from_f64(DType::F64, &[1.0, 2.0, 3.0]);
        let mut dst = ElementBuffer::zeros(DType::F32, 4);
        assert!(dst.copy_range(1, &src, 0, 3));
        assert_eq!(dst, ElementBuffer::F32(vec![0.0, 1.0, 2.0, 3.0]));
        assert!(!dst.copy_range(2, &src, 0, 3));
    }
}
