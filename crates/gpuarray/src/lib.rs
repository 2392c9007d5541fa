//! Strided device arrays and the BLAS routines that operate on them.
//!
//! The crate is backend-agnostic: a [`DeviceBackend`] provides memory and kernels, and
//! [`blas`] lowers each routine to BLAS-style call records for it. A [`HostBlas`]
//! implementation serves as the trusted reference.

pub mod backend;
pub mod blas;
pub mod env;
pub mod tensor;

pub use backend::spec::{BlasError, BlasResult, DeviceBackend, HostBlas, Transpose, Unsupported};
pub use tensor::{DType, DeviceArray, ElementBuffer, HostArray, Layout, MemoryOrder, Shape};
