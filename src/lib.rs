//! # tilark
//!
//! Device-memory-aware tile tensor arithmetic kernels.
//!
//! A tile is a dense multi-dimensional value: a [`Range`] (bounds, extents,
//! volume, flattening offset) plus a [`Storage`] buffer that is resident in
//! exactly one [`MemorySpace`]. The kernels in [`cuda::ops`] (contraction,
//! clone, scale, add, subtract, squared-norm) accept host- or
//! device-resident tiles, move data to the device when needed, and issue
//! every vendor-library call on a stream selected deterministically from
//! the result tile's range, so chained operations on one logical output
//! serialize onto a single stream.
//!
//! Linear algebra is delegated to cuBLAS through a pooled handle that is
//! rebound to the selected stream immediately before each call; nothing in
//! this crate reimplements BLAS. All CUDA support sits behind the `cuda`
//! cargo feature; the shape/metadata layer builds and tests everywhere.

pub mod error;
pub mod gemm;
pub mod range;
pub mod space;
pub mod storage;
pub mod stream;
pub mod tensor;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use error::TilarkError;
pub use gemm::{BlasOp, GemmHelper};
pub use range::Range;
pub use space::MemorySpace;
pub use storage::Storage;
pub use tensor::Tensor;

pub type Result<T> = std::result::Result<T, TilarkError>;
