//! Backend contracts: the error taxonomy, BLAS call records, and the device and
//! reference backend traits.

pub mod spec;

pub use spec::{
    BlasError, BlasResult, DeviceBackend, DotCall, GemmBatchCall, GemmCall, GemvCall, GerCall,
    HostBlas, MatrixRef, Transpose, Unsupported, VectorRef,
};
