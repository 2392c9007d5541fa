//! Strided element layouts shared by host arrays and device arrays.
//!
//! A layout maps a logical index to an element offset inside a flat storage:
//! `offset + sum(index[i] * strides[i])`. Strides are counted in elements and may be
//! negative, which is how reversed views are expressed. Every view operation returns a
//! new layout; callers validate it against their storage length before use.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::shape::Shape;

/// Storage order of a freshly allocated operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryOrder {
    /// Row-major: the last axis is contiguous.
    #[serde(rename = "c")]
    C,
    /// Column-major: the first axis is contiguous.
    #[serde(rename = "f")]
    F,
}

impl MemoryOrder {
    pub fn flag(self) -> char {
        match self {
            MemoryOrder::C => 'c',
            MemoryOrder::F => 'f',
        }
    }

    pub fn other(self) -> Self {
        match self {
            MemoryOrder::C => MemoryOrder::F,
            MemoryOrder::F => MemoryOrder::C,
        }
    }
}

impl fmt::Display for MemoryOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.flag())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("stride count {strides} does not match rank {rank}")]
    RankMismatch { rank: usize, strides: usize },
    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },
    #[error("slice step must be non-zero")]
    ZeroStep,
    #[error("range {start}..{end} out of bounds for axis {axis} of length {len}")]
    RangeOutOfBounds {
        axis: usize,
        start: usize,
        end: usize,
        len: usize,
    },
    #[error("index {index} out of bounds for axis {axis} of length {len}")]
    IndexOutOfBounds {
        axis: usize,
        index: usize,
        len: usize,
    },
    #[error("view reaches element offset {offset} outside a storage of {len} elements")]
    OutOfStorage { offset: isize, len: usize },
}

/// Shape, per-axis element strides and the offset of the first logical element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    strides: Vec<isize>,
    offset: usize,
}

impl Layout {
    /// Dense layout of `shape` in the requested order, starting at element 0.
    pub fn contiguous(shape: Shape, order: MemoryOrder) -> Self {
        let dims = shape.dims();
        let mut strides = vec![0isize; dims.len()];
        let mut stride = 1isize;
        match order {
            MemoryOrder::C => {
                for (axis, &dim) in dims.iter().enumerate().rev() {
                    strides[axis] = stride;
                    stride *= dim.max(1) as isize;
                }
            }
            MemoryOrder::F => {
                for (axis, &dim) in dims.iter().enumerate() {
                    strides[axis] = stride;
                    stride *= dim.max(1) as isize;
                }
            }
        }
        Layout {
            shape,
            strides,
            offset: 0,
        }
    }

    pub fn from_parts(
        shape: Shape,
        strides: Vec<isize>,
        offset: usize,
    ) -> Result<Self, LayoutError> {
        if shape.rank() != strides.len() {
            return Err(LayoutError::RankMismatch {
                rank: shape.rank(),
                strides: strides.len(),
            });
        }
        Ok(Layout {
            shape,
            strides,
            offset,
        })
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn num_elements(&self) -> usize {
        self.shape.num_elements()
    }

    /// Returns true when the layout is dense in `order` starting at its offset.
    /// Axes of length one are ignored since their stride is never used.
    pub fn is_contiguous(&self, order: MemoryOrder) -> bool {
        let expected = Layout::contiguous(self.shape.clone(), order);
        self.dims()
            .iter()
            .zip(self.strides.iter().zip(expected.strides.iter()))
            .all(|(&dim, (&actual, &wanted))| dim <= 1 || actual == wanted)
    }

    /// Element offset of a logical index. The index must be in range.
    pub fn offset_of(&self, index: &[usize]) -> isize {
        index
            .iter()
            .zip(self.strides.iter())
            .fold(self.offset as isize, |acc, (&i, &stride)| acc + i as isize * stride)
    }

    /// Smallest and largest reachable element offsets, or `None` for an empty view.
    pub fn extent(&self) -> Option<(isize, isize)> {
        if self.dims().contains(&0) {
            return None;
        }
        let mut low = self.offset as isize;
        let mut high = self.offset as isize;
        for (&dim, &stride) in self.dims().iter().zip(self.strides.iter()) {
            let span = (dim as isize - 1) * stride;
            if span < 0 {
                low += span;
            } else {
                high += span;
            }
        }
        Some((low, high))
    }

    /// Checks that every reachable element lies inside a storage of `len` elements.
    pub fn validate(&self, len: usize) -> Result<(), LayoutError> {
        match self.extent() {
            None => Ok(()),
            Some((low, _)) if low < 0 => Err(LayoutError::OutOfStorage { offset: low, len }),
            Some((_, high)) if high >= len as isize => {
                Err(LayoutError::OutOfStorage { offset: high, len })
            }
            Some(_) => Ok(()),
        }
    }

    fn check_axis(&self, axis: usize) -> Result<(), LayoutError> {
        if axis >= self.rank() {
            return Err(LayoutError::AxisOutOfRange {
                axis,
                rank: self.rank(),
            });
        }
        Ok(())
    }

    /// View taking every `step`-th element along `axis`; a negative step walks the axis
    /// backwards from its last element.
    pub fn slice_step(&self, axis: usize, step: isize) -> Result<Self, LayoutError> {
        self.check_axis(axis)?;
        if step == 0 {
            return Err(LayoutError::ZeroStep);
        }
        let len = self.dims()[axis];
        let magnitude = step.unsigned_abs();
        let new_len = len.div_ceil(magnitude);
        let mut offset = self.offset as isize;
        if step < 0 && len > 0 {
            offset += (len as isize - 1) * self.strides[axis];
        }
        let offset = usize::try_from(offset).map_err(|_| LayoutError::OutOfStorage {
            offset,
            len: 0,
        })?;

        let mut dims = self.dims().to_vec();
        dims[axis] = new_len;
        let mut strides = self.strides.clone();
        strides[axis] *= step;
        Ok(Layout {
            shape: Shape::new(dims),
            strides,
            offset,
        })
    }

    /// View of `len` elements along `axis` starting at `start`.
    pub fn narrow(&self, axis: usize, start: usize, len: usize) -> Result<Self, LayoutError> {
        self.check_axis(axis)?;
        let axis_len = self.dims()[axis];
        let end = start.saturating_add(len);
        if end > axis_len {
            return Err(LayoutError::RangeOutOfBounds {
                axis,
                start,
                end,
                len: axis_len,
            });
        }
        let mut offset = self.offset as isize;
        if len > 0 {
            offset += start as isize * self.strides[axis];
        }
        let offset = usize::try_from(offset).map_err(|_| LayoutError::OutOfStorage {
            offset,
            len: 0,
        })?;
        let mut dims = self.dims().to_vec();
        dims[axis] = len;
        Ok(Layout {
            shape: Shape::new(dims),
            strides: self.strides.clone(),
            offset,
        })
    }

    /// Drops `axis` by fixing it to `index`.
    pub fn select(&self, axis: usize, index: usize) -> Result<Self, LayoutError> {
        self.check_axis(axis)?;
        let len = self.dims()[axis];
        if index >= len {
            return Err(LayoutError::IndexOutOfBounds { axis, index, len });
        }
        let offset = self.offset as isize + index as isize * self.strides[axis];
        let offset = usize::try_from(offset).map_err(|_| LayoutError::OutOfStorage {
            offset,
            len: 0,
        })?;
        let mut dims = self.dims().to_vec();
        dims.remove(axis);
        let mut strides = self.strides.clone();
        strides.remove(axis);
        Ok(Layout {
            shape: Shape::new(dims),
            strides,
            offset,
        })
    }

    /// Exchanges two axes without touching storage.
    pub fn swap_axes(&self, a: usize, b: usize) -> Result<Self, LayoutError> {
        self.check_axis(a)?;
        self.check_axis(b)?;
        let mut dims = self.dims().to_vec();
        dims.swap(a, b);
        let mut strides = self.strides.clone();
        strides.swap(a, b);
        Ok(Layout {
            shape: Shape::new(dims),
            strides,
            offset: self.offset,
        })
    }

    /// Iterates element offsets in row-major logical order.
    ///
    /// The layout must already be validated against its storage, so every yielded offset
    /// is non-negative.
    pub fn offsets(&self) -> Offsets<'_> {
        let done = self.dims().contains(&0);
        Offsets {
            layout: self,
            index: vec![0; self.rank()],
            current: self.offset as isize,
            done,
        }
    }
}

/// Row-major walk over the element offsets of a [`Layout`].
pub struct Offsets<'a> {
    layout: &'a Layout,
    index: Vec<usize>,
    current: isize,
    done: bool,
}

impl Iterator for Offsets<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.done {
            return None;
        }
        debug_assert!(self.current >= 0, "layout walked before element 0");
        let out = self.current as usize;

        let dims = self.layout.dims();
        let strides = self.layout.strides();
        let mut axis = dims.len();
        loop {
            if axis == 0 {
                self.done = true;
                break;
            }
            axis -= 1;
            self.index[axis] += 1;
            self.current += strides[axis];
            if self.index[axis] < dims[axis] {
                break;
            }
            self.current -= strides[axis] * dims[axis] as isize;
            self.index[axis] = 0;
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::{Layout, LayoutError, MemoryOrder};
    use crate::tensor::Shape;

    #[test]
    fn contiguous_strides_c_and_f_orders() {
        let c = Layout::contiguous(Shape::new([2, 3, 4]), MemoryOrder::C);
        let f = Layout::contiguous(Shape::new([2, 3, 4]), MemoryOrder::F);
        assert_eq!(c.strides(), &[12, 4, 1]);
        assert_eq!(f.strides(), &[1, 2, 6]);
        assert!(c.is_contiguous(MemoryOrder::C));
        assert!(!c.is_contiguous(MemoryOrder::F));
        assert!(f.is_contiguous(MemoryOrder::F));
    }

    #[test]
    fn offsets_walk_row_major() {
        let f = Layout::contiguous(Shape::new([2, 3]), MemoryOrder::F);
        let offsets: Vec<usize> = f.offsets().collect();
        assert_eq!(offsets, vec![0, 2, 4, 1, 3, 5]);
    }

    #[test]
    fn scalar_layout_yields_single_offset() {
        let scalar = Layout::contiguous(Shape::scalar(), MemoryOrder::C);
        assert_eq!(scalar.offsets().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn negative_step_reverses_axis() {
        let base = Layout::contiguous(Shape::new([6]), MemoryOrder::C);
        let view = base.slice_step(0, -2).expect("slice");
        assert_eq!(view.dims(), &[3]);
        assert_eq!(view.offsets().collect::<Vec<_>>(), vec![5, 3, 1]);
        view.validate(6).expect("in bounds");
    }

    #[test]
    fn odd_length_slices_round_up() {
        let base = Layout::contiguous(Shape::new([9, 2]), MemoryOrder::C);
        let view = base.slice_step(0, 2).expect("slice");
        assert_eq!(view.dims(), &[5, 2]);
        let view = view.narrow(0, 1, 4).expect("narrow");
        assert_eq!(view.offset(), 4);
        view.validate(18).expect("in bounds");
    }

    #[test]
    fn select_drops_axis() {
        let base = Layout::contiguous(Shape::new([3, 4, 5]), MemoryOrder::F);
        let slice = base.select(0, 2).expect("select");
        assert_eq!(slice.dims(), &[4, 5]);
        assert_eq!(slice.strides(), &[3, 12]);
        assert_eq!(slice.offset(), 2);
    }

    #[test]
    fn validate_rejects_views_outside_storage() {
        let base = Layout::contiguous(Shape::new([4, 4]), MemoryOrder::C);
        let err = base.validate(15).expect_err("too small");
        assert!(matches!(err, LayoutError::OutOfStorage { offset: 15, .. }));
        assert!(matches!(base.slice_step(0, 0), Err(LayoutError::ZeroStep)));
        assert!(matches!(
            base.narrow(1, 2, 3),
            Err(LayoutError::RangeOutOfBounds { .. })
        ));
    }
}
