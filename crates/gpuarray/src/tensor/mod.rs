//! Array operands shared by the bindings and the backends.
//!
//! The tensor module defines dtypes, shapes, strided layouts, flat element storage, and
//! the host and device array wrappers that BLAS routines consume.

pub mod buffer;
mod device_array;
pub mod dtype;
mod host_array;
pub mod layout;
pub mod shape;

pub use buffer::ElementBuffer;
pub use device_array::DeviceArray;
pub use dtype::DType;
pub use host_array::HostArray;
pub use layout::{Layout, LayoutError, MemoryOrder};
pub use shape::Shape;
