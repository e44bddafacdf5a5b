//! Tile arithmetic kernels backed by cuBLAS.
//!
//! Every kernel follows the same shape:
//! - validate operands (spaces, emptiness, ranks) before touching the
//!   device,
//! - pick the stream from the governing tile's range offset,
//! - allocate the result (when allocating) and move operands into device
//!   space on that stream,
//! - acquire a pooled handle bound to the stream and issue exactly one
//!   vendor call per device operation.
//!
//! Allocating kernels return a new device-resident tile and enqueue
//! without blocking; `squared_norm` is the one blocking call (the vendor
//! writes its scalar to host memory). In-place kernels with a
//! host-resident destination are not implemented and report
//! [`TilarkError::Unimplemented`].

use log::trace;

use crate::cuda::blas::{self, BlasScalar};
use crate::cuda::context::DeviceContext;
use crate::cuda::memory::{make_device_storage, to_execution_space};
use crate::gemm::GemmHelper;
use crate::range::Range;
use crate::space::MemorySpace;
use crate::tensor::Tensor;
use crate::{Result, TilarkError};

// ============================================================================
// Validation
// ============================================================================

fn check_not_empty<T>(tensor: &Tensor<T>, role: &'static str) -> Result<()> {
    if tensor.is_empty() {
        return Err(TilarkError::EmptyTensor { role });
    }
    Ok(())
}

fn check_rank<T>(tensor: &Tensor<T>, expected: usize, role: &'static str) -> Result<()> {
    if tensor.range().rank() != expected {
        return Err(TilarkError::RankMismatch {
            role,
            expected,
            actual: tensor.range().rank(),
        });
    }
    Ok(())
}

fn check_same_space<T>(a: &Tensor<T>, b: &Tensor<T>) -> Result<()> {
    if !a.space().overlaps(b.space()) {
        return Err(TilarkError::MemorySpaceMismatch {
            left: a.space(),
            right: b.space(),
        });
    }
    Ok(())
}

fn check_conforms<T>(
    a: &Tensor<T>,
    b: &Tensor<T>,
    left: &'static str,
    right: &'static str,
) -> Result<()> {
    if !a.range().conforms(b.range()) {
        return Err(TilarkError::Incongruent {
            left,
            right,
            dims: "extent",
        });
    }
    Ok(())
}

fn congruent_on(
    left: &Range,
    right: &Range,
    test: impl Fn(&[usize], &[usize]) -> bool,
) -> bool {
    test(left.lobound(), right.lobound())
        && test(left.upbound(), right.upbound())
        && test(&left.extent(), &right.extent())
}

fn check_left_right<T>(helper: &GemmHelper, left: &Tensor<T>, right: &Tensor<T>) -> Result<()> {
    if !congruent_on(left.range(), right.range(), |a, b| {
        helper.left_right_congruent(a, b)
    }) {
        return Err(TilarkError::Incongruent {
            left: "left",
            right: "right",
            dims: "contracted",
        });
    }
    Ok(())
}

fn check_against_result<T>(
    helper: &GemmHelper,
    left: &Tensor<T>,
    right: &Tensor<T>,
    result: &Range,
) -> Result<()> {
    if !congruent_on(left.range(), result, |a, b| {
        helper.left_result_congruent(a, b)
    }) {
        return Err(TilarkError::Incongruent {
            left: "left",
            right: "result",
            dims: "free",
        });
    }
    if !congruent_on(right.range(), result, |a, b| {
        helper.right_result_congruent(a, b)
    }) {
        return Err(TilarkError::Incongruent {
            left: "right",
            right: "result",
            dims: "free",
        });
    }
    Ok(())
}

fn device_ptr_of<T>(
    tensor: &Tensor<T>,
    op: &'static str,
) -> Result<cudarc::driver::sys::CUdeviceptr> {
    tensor
        .storage()
        .device_ptr()
        .ok_or(TilarkError::Unimplemented(op))
}

// ============================================================================
// Contraction
// ============================================================================

/// Contract `left` and `right` into a freshly allocated device tile,
/// scaled by `factor`.
///
/// Operands are moved into device space as a side effect. The launch is
/// asynchronous on the result tile's stream.
pub fn gemm<T: BlasScalar>(
    ctx: &DeviceContext,
    left: &mut Tensor<T>,
    right: &mut Tensor<T>,
    factor: T,
    helper: &GemmHelper,
) -> Result<Tensor<T>> {
    check_same_space(left, right)?;
    check_not_empty(left, "left")?;
    check_rank(left, helper.left_rank(), "left")?;
    check_not_empty(right, "right")?;
    check_rank(right, helper.right_rank(), "right")?;

    let result_range = helper.make_result_range(left.range(), right.range());
    let stream = ctx.stream_for(&result_range);
    let result_storage = make_device_storage::<T>(ctx, result_range.volume(), stream)?;

    to_execution_space(left.storage_mut(), MemorySpace::Device, ctx, stream)?;
    to_execution_space(right.storage_mut(), MemorySpace::Device, ctx, stream)?;

    check_left_right(helper, left, right)?;

    let (m, n, k) = helper.compute_matrix_sizes(left.range(), right.range());
    let lda = if helper.left_op().is_no_trans() { k } else { m };
    let ldb = if helper.right_op().is_no_trans() { n } else { k };
    trace!("gemm m={m} n={n} k={k} on stream of offset {}", result_range.offset());

    let left_ptr = device_ptr_of(left, "gemm")?;
    let right_ptr = device_ptr_of(right, "gemm")?;
    let result_ptr = result_storage
        .device_ptr()
        .ok_or(TilarkError::Unimplemented("gemm"))?;

    let handle = ctx.handles().bind(stream)?;
    // cuBLAS is column-major; swapping the operands and the m/n roles
    // computes the row-major product without an explicit transpose.
    unsafe {
        T::gemm(
            handle.raw(),
            blas::to_cublas_op(helper.right_op()),
            blas::to_cublas_op(helper.left_op()),
            n as i32,
            m as i32,
            k as i32,
            factor,
            right_ptr,
            ldb as i32,
            left_ptr,
            lda as i32,
            T::zero(),
            result_ptr,
            n as i32,
        )?;
    }
    drop(handle);

    Tensor::new(result_range, result_storage)
}

/// Contract `left` and `right` and accumulate into `result`:
/// `result += factor * left . right`.
///
/// All three tiles must be device resident; a host destination is
/// unimplemented.
pub fn gemm_into<T: BlasScalar>(
    ctx: &DeviceContext,
    result: &mut Tensor<T>,
    left: &mut Tensor<T>,
    right: &mut Tensor<T>,
    factor: T,
    helper: &GemmHelper,
) -> Result<()> {
    check_same_space(result, left)?;
    check_same_space(result, right)?;
    if !result.space().is_device() {
        return Err(TilarkError::Unimplemented("gemm_into"));
    }
    check_not_empty(result, "result")?;
    check_rank(result, helper.result_rank(), "result")?;
    check_not_empty(left, "left")?;
    check_rank(left, helper.left_rank(), "left")?;
    check_not_empty(right, "right")?;
    check_rank(right, helper.right_rank(), "right")?;

    check_against_result(helper, left, right, result.range())?;
    check_left_right(helper, left, right)?;

    let stream = ctx.stream_for(result.range());
    to_execution_space(left.storage_mut(), MemorySpace::Device, ctx, stream)?;
    to_execution_space(right.storage_mut(), MemorySpace::Device, ctx, stream)?;

    let (m, n, k) = helper.compute_matrix_sizes(left.range(), right.range());
    let lda = if helper.left_op().is_no_trans() { k } else { m };
    let ldb = if helper.right_op().is_no_trans() { n } else { k };

    let left_ptr = device_ptr_of(left, "gemm_into")?;
    let right_ptr = device_ptr_of(right, "gemm_into")?;
    let result_ptr = device_ptr_of(result, "gemm_into")?;

    let handle = ctx.handles().bind(stream)?;
    unsafe {
        T::gemm(
            handle.raw(),
            blas::to_cublas_op(helper.right_op()),
            blas::to_cublas_op(helper.left_op()),
            n as i32,
            m as i32,
            k as i32,
            factor,
            right_ptr,
            ldb as i32,
            left_ptr,
            lda as i32,
            T::one(),
            result_ptr,
            n as i32,
        )?;
    }
    Ok(())
}

// ============================================================================
// Copy / scale
// ============================================================================

/// Duplicate `arg` into a new device tile with the same range.
///
/// A host-resident source is moved to the device first.
pub fn clone<T: BlasScalar>(ctx: &DeviceContext, arg: &mut Tensor<T>) -> Result<Tensor<T>> {
    check_not_empty(arg, "source")?;
    let stream = ctx.stream_for(arg.range());
    let result_storage = make_device_storage::<T>(ctx, arg.size(), stream)?;
    to_execution_space(arg.storage_mut(), MemorySpace::Device, ctx, stream)?;

    let src = device_ptr_of(arg, "clone")?;
    let dst = result_storage
        .device_ptr()
        .ok_or(TilarkError::Unimplemented("clone"))?;

    let handle = ctx.handles().bind(stream)?;
    unsafe { T::copy(handle.raw(), arg.size() as i32, src, dst)? };
    drop(handle);

    Tensor::new(arg.range().clone(), result_storage)
}

/// `a * arg` as a new device tile. Clone and scale run on the same stream,
/// so the scale observes the completed copy.
pub fn scale<T: BlasScalar>(ctx: &DeviceContext, arg: &mut Tensor<T>, a: T) -> Result<Tensor<T>> {
    let mut result = clone(ctx, arg)?;
    scale_into(ctx, &mut result, a)?;
    Ok(result)
}

/// Scale `result` in place by `a`. Host destinations are unimplemented.
pub fn scale_into<T: BlasScalar>(ctx: &DeviceContext, result: &mut Tensor<T>, a: T) -> Result<()> {
    check_not_empty(result, "result")?;
    let stream = ctx.stream_for(result.range());
    let ptr = device_ptr_of(result, "scale_into")?;
    let handle = ctx.handles().bind(stream)?;
    unsafe { T::scal(handle.raw(), result.size() as i32, a, ptr)? };
    Ok(())
}

// ============================================================================
// Add / subtract
// ============================================================================

/// Allocating subtraction kernel.
///
/// `arg2` is validated for shape and residency but its values never reach
/// the vendor calls: the result is `(a - 1) * arg1`, from scaling `arg1`
/// by -1 and then accumulating `a * arg1` onto it.
// TODO: decide whether the formula should read arg2 (a * arg1 - arg2) and
// fix both this kernel and the pinning test together.
pub fn sub<T: BlasScalar>(
    ctx: &DeviceContext,
    arg1: &mut Tensor<T>,
    arg2: &Tensor<T>,
    a: T,
) -> Result<Tensor<T>> {
    check_same_space(arg1, arg2)?;
    check_not_empty(arg1, "arg1")?;
    check_not_empty(arg2, "arg2")?;
    check_conforms(arg1, arg2, "arg1", "arg2")?;

    let result = scale(ctx, arg1, -T::one())?;
    let stream = ctx.stream_for(result.range());

    let x = device_ptr_of(arg1, "sub")?;
    let y = device_ptr_of(&result, "sub")?;
    let handle = ctx.handles().bind(stream)?;
    unsafe { T::axpy(handle.raw(), result.size() as i32, a, x, y)? };
    drop(handle);

    Ok(result)
}

/// In-place subtraction: `result -= a * arg`, realized as an axpy of a
/// negated device clone of `arg`. Host destinations are unimplemented.
pub fn sub_into<T: BlasScalar>(
    ctx: &DeviceContext,
    result: &mut Tensor<T>,
    arg: &mut Tensor<T>,
    a: T,
) -> Result<()> {
    check_not_empty(result, "result")?;
    check_not_empty(arg, "arg")?;
    check_conforms(result, arg, "result", "arg")?;

    let negated = scale(ctx, arg, -T::one())?;
    let stream = ctx.stream_for(result.range());

    let x = device_ptr_of(&negated, "sub_into")?;
    let y = device_ptr_of(result, "sub_into")?;
    let handle = ctx.handles().bind(stream)?;
    unsafe { T::axpy(handle.raw(), result.size() as i32, a, x, y)? };
    drop(handle);

    // the temporary backs an in-flight read on this stream
    ctx.synchronize()?;
    drop(negated);
    Ok(())
}

/// `a * arg1 + arg2` as a new device tile.
pub fn add<T: BlasScalar>(
    ctx: &DeviceContext,
    arg1: &mut Tensor<T>,
    arg2: &mut Tensor<T>,
    a: T,
) -> Result<Tensor<T>> {
    check_same_space(arg1, arg2)?;
    check_not_empty(arg1, "arg1")?;
    check_not_empty(arg2, "arg2")?;
    check_conforms(arg1, arg2, "arg1", "arg2")?;

    let result = scale(ctx, arg2, T::one())?;
    let stream = ctx.stream_for(result.range());
    to_execution_space(arg1.storage_mut(), MemorySpace::Device, ctx, stream)?;

    let x = device_ptr_of(arg1, "add")?;
    let y = device_ptr_of(&result, "add")?;
    let handle = ctx.handles().bind(stream)?;
    unsafe { T::axpy(handle.raw(), result.size() as i32, a, x, y)? };
    drop(handle);

    Ok(result)
}

/// In-place addition: `result += a * arg`. Both tiles must share a memory
/// space; host destinations are unimplemented.
pub fn add_into<T: BlasScalar>(
    ctx: &DeviceContext,
    result: &mut Tensor<T>,
    arg: &Tensor<T>,
    a: T,
) -> Result<()> {
    check_same_space(result, arg)?;
    check_not_empty(result, "result")?;
    check_not_empty(arg, "arg")?;
    check_conforms(result, arg, "result", "arg")?;

    let stream = ctx.stream_for(result.range());
    let y = device_ptr_of(result, "add_into")?;
    let x = device_ptr_of(arg, "add_into")?;
    let handle = ctx.handles().bind(stream)?;
    unsafe { T::axpy(handle.raw(), result.size() as i32, a, x, y)? };
    Ok(())
}

// ============================================================================
// Reductions
// ============================================================================

/// Sum of squared elements. Blocks until the scalar is available. Host
/// sources are unimplemented.
pub fn squared_norm<T: BlasScalar>(ctx: &DeviceContext, arg: &Tensor<T>) -> Result<T> {
    check_not_empty(arg, "arg")?;
    let stream = ctx.stream_for(arg.range());
    let x = device_ptr_of(arg, "squared_norm")?;
    let handle = ctx.handles().bind(stream)?;
    unsafe { T::dot(handle.raw(), arg.size() as i32, x, x) }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::cuda::context::{ContextOptions, DeviceContext};
    use crate::cuda::memory::read_to_host;
    use crate::gemm::BlasOp;
    use crate::range::Range;

    fn context() -> Option<DeviceContext> {
        DeviceContext::new(ContextOptions::default()).ok()
    }

    fn host_tile(extents: &[usize], data: Vec<f32>) -> Tensor<f32> {
        Tensor::from_host(Range::from_extents(extents), data).unwrap()
    }

    #[test]
    fn test_clone_moves_source_to_device() {
        let Some(ctx) = context() else { return };
        let mut src = host_tile(&[4], vec![1.0, 2.0, 3.0, 4.0]);
        let copy = clone(&ctx, &mut src).unwrap();

        assert_eq!(src.space(), MemorySpace::Device);
        assert_eq!(copy.space(), MemorySpace::Device);
        assert_eq!(read_to_host(&ctx, &copy).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_scale_round_trip() {
        let Some(ctx) = context() else { return };
        let mut src = host_tile(&[3], vec![1.5, -2.0, 4.0]);
        let mut scaled = scale(&ctx, &mut src, 2.0).unwrap();
        scale_into(&ctx, &mut scaled, 0.5).unwrap();

        let got = read_to_host(&ctx, &scaled).unwrap();
        for (g, e) in got.iter().zip([1.5f32, -2.0, 4.0]) {
            assert_relative_eq!(*g, e, max_relative = 1e-6);
        }
    }

    #[test]
    fn test_gemm_2x3_3x2() {
        let Some(ctx) = context() else { return };
        let helper = GemmHelper::new(BlasOp::NoTrans, BlasOp::NoTrans, 2, 2, 2).unwrap();
        let mut left = host_tile(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let mut right = host_tile(&[3, 2], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        let result = gemm(&ctx, &mut left, &mut right, 1.0, &helper).unwrap();
        assert_eq!(result.range().extent().as_slice(), &[2, 2]);
        assert_eq!(
            read_to_host(&ctx, &result).unwrap(),
            vec![22.0, 28.0, 49.0, 64.0]
        );
    }

    #[test]
    fn test_gemm_into_accumulates() {
        let Some(ctx) = context() else { return };
        let helper = GemmHelper::new(BlasOp::NoTrans, BlasOp::NoTrans, 2, 2, 2).unwrap();
        let mut left = host_tile(&[2, 2], vec![1.0, 0.0, 0.0, 1.0]);
        let mut right = host_tile(&[2, 2], vec![5.0, 6.0, 7.0, 8.0]);

        // seed the destination on the device with ones
        let mut seed = host_tile(&[2, 2], vec![1.0; 4]);
        let mut result = clone(&ctx, &mut seed).unwrap();

        gemm_into(&ctx, &mut result, &mut left, &mut right, 1.0, &helper).unwrap();
        assert_eq!(
            read_to_host(&ctx, &result).unwrap(),
            vec![6.0, 7.0, 8.0, 9.0]
        );
    }

    #[test]
    fn test_gemm_rejects_incongruent_inner() {
        let Some(ctx) = context() else { return };
        let helper = GemmHelper::new(BlasOp::NoTrans, BlasOp::NoTrans, 2, 2, 2).unwrap();
        let mut left = host_tile(&[2, 3], vec![0.0; 6]);
        let mut right = host_tile(&[4, 2], vec![0.0; 8]);
        let err = gemm(&ctx, &mut left, &mut right, 1.0f32, &helper).unwrap_err();
        assert!(matches!(err, TilarkError::Incongruent { .. }));
    }

    #[test]
    fn test_add_and_add_into() {
        let Some(ctx) = context() else { return };
        let mut a = host_tile(&[3], vec![1.0, 2.0, 3.0]);
        let mut b = host_tile(&[3], vec![10.0, 20.0, 30.0]);

        // 2*a + b
        let sum = add(&ctx, &mut a, &mut b, 2.0).unwrap();
        assert_eq!(read_to_host(&ctx, &sum).unwrap(), vec![12.0, 24.0, 36.0]);

        // sum += 1*a
        let mut dest = sum;
        add_into(&ctx, &mut dest, &a, 1.0).unwrap();
        assert_eq!(read_to_host(&ctx, &dest).unwrap(), vec![13.0, 26.0, 39.0]);
    }

    #[test]
    fn test_sub_ignores_second_operand() {
        let Some(ctx) = context() else { return };
        let mut arg1 = host_tile(&[3], vec![2.0, 2.0, 2.0]);
        let mut other = host_tile(&[3], vec![1.0, 1.0, 1.0]);
        let arg2 = clone(&ctx, &mut other).unwrap();
        // move arg1 to the device so the operands share a space
        to_execution_space(arg1.storage_mut(), MemorySpace::Device, &ctx, ctx.stream(0)).unwrap();

        // result is (a - 1) * arg1 regardless of arg2's values
        let result = sub(&ctx, &mut arg1, &arg2, 3.0).unwrap();
        assert_eq!(read_to_host(&ctx, &result).unwrap(), vec![4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_sub_into() {
        let Some(ctx) = context() else { return };
        let mut seed = host_tile(&[3], vec![10.0, 10.0, 10.0]);
        let mut result = clone(&ctx, &mut seed).unwrap();
        let mut arg = host_tile(&[3], vec![1.0, 2.0, 3.0]);

        // result -= 2 * arg
        sub_into(&ctx, &mut result, &mut arg, 2.0).unwrap();
        assert_eq!(read_to_host(&ctx, &result).unwrap(), vec![8.0, 6.0, 4.0]);
    }

    #[test]
    fn test_squared_norm() {
        let Some(ctx) = context() else { return };
        let mut src = host_tile(&[4], vec![1.0, 2.0, 3.0, 4.0]);
        let arg = clone(&ctx, &mut src).unwrap();
        let norm = squared_norm(&ctx, &arg).unwrap();
        assert_relative_eq!(norm, 30.0f32, max_relative = 1e-6);
    }

    #[test]
    fn test_squared_norm_host_is_unimplemented() {
        let Some(ctx) = context() else { return };
        let arg = host_tile(&[2], vec![1.0, 2.0]);
        assert!(matches!(
            squared_norm(&ctx, &arg),
            Err(TilarkError::Unimplemented(_))
        ));
    }

    #[test]
    fn test_empty_operand_is_rejected() {
        let Some(ctx) = context() else { return };
        let helper = GemmHelper::new(BlasOp::NoTrans, BlasOp::NoTrans, 2, 2, 2).unwrap();
        let mut empty = Tensor::from_host(
            Range::new(&[0, 0], &[0, 3]).unwrap(),
            Vec::<f32>::new(),
        )
        .unwrap();
        let mut right = host_tile(&[3, 2], vec![0.0; 6]);
        let err = gemm(&ctx, &mut empty, &mut right, 1.0, &helper).unwrap_err();
        assert!(matches!(err, TilarkError::EmptyTensor { role: "left" }));
    }

    #[test]
    fn test_f64_path() {
        let Some(ctx) = context() else { return };
        let mut src = Tensor::from_host(Range::from_extents(&[3]), vec![1.0f64, 2.0, 2.0]).unwrap();
        let arg = clone(&ctx, &mut src).unwrap();
        assert_relative_eq!(squared_norm(&ctx, &arg).unwrap(), 9.0f64);
    }
}
