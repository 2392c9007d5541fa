use std::sync::Arc;

use gpuarray_backend_faer::FaerDevice;
use gpuarray_backend_tests::define_backend_tests;

define_backend_tests!(faer, || Arc::new(FaerDevice::from_env()));
