//! CUDA execution layer.
//!
//! Layout:
//! - [`context`]: device handle, stream pool, pooled cuBLAS handles
//! - [`memory`]: stream-ordered allocation and host/device transfers
//! - [`blas`]: typed cuBLAS call surface
//! - [`ops`]: the tile arithmetic kernels
//!
//! Everything here takes an explicit [`DeviceContext`]; the crate holds no
//! global device state.

pub mod blas;
pub mod context;
pub mod memory;
pub mod ops;

pub use blas::BlasScalar;
pub use context::{BoundHandle, ContextOptions, DeviceContext, HandlePool};
pub use memory::{make_device_storage, read_to_host, to_execution_space};

/// Whether a usable CUDA device is present.
pub fn is_available() -> bool {
    cudarc::driver::CudaDevice::new(0).is_ok()
}
