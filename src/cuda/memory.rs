//! Device allocation and host/device transfers.
//!
//! Allocation and H2D transfer are stream-ordered and asynchronous on the
//! tile's stream; the host source of an in-flight upload stays alive
//! inside the [`DeviceBuffer`] until the buffer is dropped. D2H goes
//! through a device synchronize first, so the returned host vector is
//! always complete.

use cudarc::driver::{result as driver, CudaStream, DeviceRepr};
use log::trace;

use crate::cuda::context::DeviceContext;
use crate::space::MemorySpace;
use crate::storage::{DeviceBuffer, Storage};
use crate::tensor::Tensor;
use crate::{Result, TilarkError};

fn alloc_async<T: DeviceRepr>(
    ctx: &DeviceContext,
    volume: usize,
    stream: &CudaStream,
) -> Result<DeviceBuffer<T>> {
    let bytes = volume * std::mem::size_of::<T>();
    let ptr = unsafe { driver::malloc_async(stream.stream, bytes) }
        .map_err(|e| TilarkError::Device(format!("malloc_async({bytes} bytes): {e}")))?;
    let slice = unsafe { ctx.device().upgrade_device_ptr::<T>(ptr, volume) };
    Ok(DeviceBuffer::new(slice))
}

/// Allocate uninitialized device storage for `volume` elements, ordered on
/// `stream`. The buffer must be fully written before any read.
pub fn make_device_storage<T: DeviceRepr>(
    ctx: &DeviceContext,
    volume: usize,
    stream: &CudaStream,
) -> Result<Storage<T>> {
    let buf = alloc_async(ctx, volume, stream)?;
    trace!("allocated {volume} elements on device {}", ctx.ordinal());
    Ok(Storage::Device(buf))
}

/// Move `storage` so it is addressable from `target`.
///
/// No-op when the current residency already overlaps `target` (unified
/// storage satisfies every target). Host to device enqueues an
/// asynchronous copy on `stream`; device to host synchronizes the device
/// first and copies back blocking.
pub fn to_execution_space<T: DeviceRepr>(
    storage: &mut Storage<T>,
    target: MemorySpace,
    ctx: &DeviceContext,
    stream: &CudaStream,
) -> Result<()> {
    if storage.resides_in(target) {
        return Ok(());
    }
    match target {
        MemorySpace::Device => {
            let host = match std::mem::replace(storage, Storage::Host(Vec::new())) {
                Storage::Host(v) => v,
                other => {
                    *storage = other;
                    return Ok(());
                }
            };
            let volume = host.len();
            let mut buf = alloc_async::<T>(ctx, volume, stream)?;
            unsafe { driver::memcpy_htod_async(buf.device_ptr(), &host, stream.stream) }
                .map_err(|e| TilarkError::Device(format!("H2D copy: {e}")))?;
            // the source vector backs the in-flight copy
            buf.staging = Some(host);
            trace!("enqueued H2D copy of {volume} elements");
            *storage = Storage::Device(buf);
            Ok(())
        }
        MemorySpace::Host => {
            let Storage::Device(buf) = &*storage else {
                return Ok(());
            };
            ctx.synchronize()?;
            let host = ctx
                .device()
                .dtoh_sync_copy(buf.slice())
                .map_err(|e| TilarkError::Device(format!("D2H copy: {e}")))?;
            trace!("copied {} elements back to host", host.len());
            *storage = Storage::Host(host);
            Ok(())
        }
        // unified memory is addressable from anywhere
        MemorySpace::Unified => Ok(()),
    }
}

/// Complete pending device work and read a tile's elements into a host
/// vector, leaving the tile where it is.
pub fn read_to_host<T: DeviceRepr + Clone>(ctx: &DeviceContext, tensor: &Tensor<T>) -> Result<Vec<T>> {
    match tensor.storage() {
        Storage::Host(v) => Ok(v.clone()),
        Storage::Device(buf) => {
            ctx.synchronize()?;
            ctx.device()
                .dtoh_sync_copy(buf.slice())
                .map_err(|e| TilarkError::Device(format!("D2H copy: {e}")))
        }
    }
}
