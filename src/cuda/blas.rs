//! Vendor-library call surface.
//!
//! [`BlasScalar`] maps each supported element type onto its cuBLAS entry
//! points (gemm plus the level-1 vector calls the kernels use: copy, scal,
//! axpy, dot). Every raw status is checked immediately; a non-success
//! status is fatal to the operation and never retried.

use std::os::raw::c_int;

use cudarc::cublas::sys::{self, cublasHandle_t, cublasOperation_t, cublasStatus_t};
use cudarc::driver::sys::{CUdeviceptr, CUstream};
use cudarc::driver::DeviceRepr;
use num_traits::{One, Zero};

use crate::gemm::BlasOp;
use crate::{Result, TilarkError};

/// Map a transpose orientation onto the cuBLAS operation enum.
pub(crate) fn to_cublas_op(op: BlasOp) -> cublasOperation_t {
    match op {
        BlasOp::NoTrans => cublasOperation_t::CUBLAS_OP_N,
        BlasOp::Trans => cublasOperation_t::CUBLAS_OP_T,
        BlasOp::ConjTrans => cublasOperation_t::CUBLAS_OP_C,
    }
}

fn check(status: cublasStatus_t, what: &'static str) -> Result<()> {
    if status == cublasStatus_t::CUBLAS_STATUS_SUCCESS {
        Ok(())
    } else {
        Err(TilarkError::Blas(format!("{what}: {status:?}")))
    }
}

/// Rebind a cuBLAS handle to a stream.
///
/// Must be issued immediately before any call made through the handle;
/// the caller serializes rebind-then-launch per handle.
///
/// # Safety
/// `handle` must be a live cuBLAS handle and `stream` a live stream on the
/// handle's device.
pub(crate) unsafe fn set_stream(handle: cublasHandle_t, stream: CUstream) -> Result<()> {
    check(sys::cublasSetStream_v2(handle, stream as _), "cublasSetStream")
}

/// Element types the vendor library can operate on.
///
/// Each method issues exactly one cuBLAS call on device pointers and
/// checks its status.
///
/// # Safety contract (all methods)
/// Pointers must reference live device allocations of at least `n`
/// elements on the device the handle was created for, and the handle must
/// already be bound to the stream carrying any pending writes to them.
pub trait BlasScalar:
    DeviceRepr + Copy + Zero + One + std::ops::Neg<Output = Self> + Send + Sync + 'static
{
    /// `c = alpha * op(a) @ op(b) + beta * c` (column-major).
    #[allow(clippy::too_many_arguments)]
    unsafe fn gemm(
        handle: cublasHandle_t,
        transa: cublasOperation_t,
        transb: cublasOperation_t,
        m: c_int,
        n: c_int,
        k: c_int,
        alpha: Self,
        a: CUdeviceptr,
        lda: c_int,
        b: CUdeviceptr,
        ldb: c_int,
        beta: Self,
        c: CUdeviceptr,
        ldc: c_int,
    ) -> Result<()>;

    /// `y[i] = x[i]`
    unsafe fn copy(handle: cublasHandle_t, n: c_int, x: CUdeviceptr, y: CUdeviceptr)
        -> Result<()>;

    /// `x[i] *= alpha`
    unsafe fn scal(handle: cublasHandle_t, n: c_int, alpha: Self, x: CUdeviceptr) -> Result<()>;

    /// `y[i] += alpha * x[i]`
    unsafe fn axpy(
        handle: cublasHandle_t,
        n: c_int,
        alpha: Self,
        x: CUdeviceptr,
        y: CUdeviceptr,
    ) -> Result<()>;

    /// `sum(x[i] * y[i])`, written to a host scalar (blocking per the
    /// vendor's host pointer mode).
    unsafe fn dot(handle: cublasHandle_t, n: c_int, x: CUdeviceptr, y: CUdeviceptr)
        -> Result<Self>;
}

impl BlasScalar for f32 {
    unsafe fn gemm(
        handle: cublasHandle_t,
        transa: cublasOperation_t,
        transb: cublasOperation_t,
        m: c_int,
        n: c_int,
        k: c_int,
        alpha: Self,
        a: CUdeviceptr,
        lda: c_int,
        b: CUdeviceptr,
        ldb: c_int,
        beta: Self,
        c: CUdeviceptr,
        ldc: c_int,
    ) -> Result<()> {
        check(
            sys::cublasSgemm_v2(
                handle,
                transa,
                transb,
                m,
                n,
                k,
                &alpha,
                a as *const f32,
                lda,
                b as *const f32,
                ldb,
                &beta,
                c as *mut f32,
                ldc,
            ),
            "cublasSgemm",
        )
    }

    unsafe fn copy(
        handle: cublasHandle_t,
        n: c_int,
        x: CUdeviceptr,
        y: CUdeviceptr,
    ) -> Result<()> {
        check(
            sys::cublasScopy_v2(handle, n, x as *const f32, 1, y as *mut f32, 1),
            "cublasScopy",
        )
    }

    unsafe fn scal(handle: cublasHandle_t, n: c_int, alpha: Self, x: CUdeviceptr) -> Result<()> {
        check(
            sys::cublasSscal_v2(handle, n, &alpha, x as *mut f32, 1),
            "cublasSscal",
        )
    }

    unsafe fn axpy(
        handle: cublasHandle_t,
        n: c_int,
        alpha: Self,
        x: CUdeviceptr,
        y: CUdeviceptr,
    ) -> Result<()> {
        check(
            sys::cublasSaxpy_v2(handle, n, &alpha, x as *const f32, 1, y as *mut f32, 1),
            "cublasSaxpy",
        )
    }

    unsafe fn dot(
        handle: cublasHandle_t,
        n: c_int,
        x: CUdeviceptr,
        y: CUdeviceptr,
    ) -> Result<Self> {
        let mut out = 0.0f32;
        check(
            sys::cublasSdot_v2(handle, n, x as *const f32, 1, y as *const f32, 1, &mut out),
            "cublasSdot",
        )?;
        Ok(out)
    }
}

impl BlasScalar for f64 {
    unsafe fn gemm(
        handle: cublasHandle_t,
        transa: cublasOperation_t,
        transb: cublasOperation_t,
        m: c_int,
        n: c_int,
        k: c_int,
        alpha: Self,
        a: CUdeviceptr,
        lda: c_int,
        b: CUdeviceptr,
        ldb: c_int,
        beta: Self,
        c: CUdeviceptr,
        ldc: c_int,
    ) -> Result<()> {
        check(
            sys::cublasDgemm_v2(
                handle,
                transa,
                transb,
                m,
                n,
                k,
                &alpha,
                a as *const f64,
                lda,
                b as *const f64,
                ldb,
                &beta,
                c as *mut f64,
                ldc,
            ),
            "cublasDgemm",
        )
    }

    unsafe fn copy(
        handle: cublasHandle_t,
        n: c_int,
        x: CUdeviceptr,
        y: CUdeviceptr,
    ) -> Result<()> {
        check(
            sys::cublasDcopy_v2(handle, n, x as *const f64, 1, y as *mut f64, 1),
            "cublasDcopy",
        )
    }

    unsafe fn scal(handle: cublasHandle_t, n: c_int, alpha: Self, x: CUdeviceptr) -> Result<()> {
        check(
            sys::cublasDscal_v2(handle, n, &alpha, x as *mut f64, 1),
            "cublasDscal",
        )
    }

    unsafe fn axpy(
        handle: cublasHandle_t,
        n: c_int,
        alpha: Self,
        x: CUdeviceptr,
        y: CUdeviceptr,
    ) -> Result<()> {
        check(
            sys::cublasDaxpy_v2(handle, n, &alpha, x as *const f64, 1, y as *mut f64, 1),
            "cublasDaxpy",
        )
    }

    unsafe fn dot(
        handle: cublasHandle_t,
        n: c_int,
        x: CUdeviceptr,
        y: CUdeviceptr,
    ) -> Result<Self> {
        let mut out = 0.0f64;
        check(
            sys::cublasDdot_v2(handle, n, x as *const f64, 1, y as *const f64, 1, &mut out),
            "cublasDdot",
        )?;
        Ok(out)
    }
}
