//! Device context: one CUDA device, its stream pool, and its cuBLAS
//! handle pool.
//!
//! A [`DeviceContext`] is built explicitly and passed to every kernel;
//! there is no process-global state. Streams are created once at context
//! construction and live for the lifetime of the context. cuBLAS handles
//! are pooled behind mutexes: a caller acquires one through
//! [`HandlePool::bind`], which rebinds it to the caller's stream and holds
//! the lock until the launch has been issued, so rebind and launch are a
//! single critical section per handle.

use std::sync::Arc;

use cudarc::cublas::CudaBlas;
use cudarc::driver::{CudaDevice, CudaStream};
use log::debug;
use parking_lot::{Mutex, MutexGuard};

use crate::cuda::blas;
use crate::range::Range;
use crate::stream::stream_index_for;
use crate::{Result, TilarkError};

// ============================================================================
// Options
// ============================================================================

/// Construction parameters for a [`DeviceContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    /// CUDA device ordinal.
    pub ordinal: usize,
    /// Number of streams in the round-robin pool.
    pub num_streams: usize,
    /// Number of pooled cuBLAS handles.
    pub num_handles: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            ordinal: 0,
            num_streams: 3,
            num_handles: 1,
        }
    }
}

impl ContextOptions {
    /// Defaults overridden by `TILARK_DEVICE`, `TILARK_NUM_STREAMS` and
    /// `TILARK_NUM_HANDLES`. Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ordinal: env_usize("TILARK_DEVICE").unwrap_or(defaults.ordinal),
            num_streams: env_usize("TILARK_NUM_STREAMS")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.num_streams),
            num_handles: env_usize("TILARK_NUM_HANDLES")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.num_handles),
        }
    }
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}

// ============================================================================
// Handle pool
// ============================================================================

/// Pool of cuBLAS handles shared by all kernels on one device.
pub struct HandlePool {
    handles: Vec<Mutex<CudaBlas>>,
}

impl HandlePool {
    fn new(device: &Arc<CudaDevice>, num_handles: usize) -> Result<Self> {
        let mut handles = Vec::with_capacity(num_handles);
        for _ in 0..num_handles {
            let blas = CudaBlas::new(Arc::clone(device))
                .map_err(|e| TilarkError::Blas(format!("cublasCreate: {e}")))?;
            handles.push(Mutex::new(blas));
        }
        Ok(Self { handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Acquire a handle and rebind it to `stream`.
    ///
    /// Prefers an uncontended handle, otherwise blocks on the first. The
    /// returned guard keeps the handle locked; drop it only after the
    /// launch has been issued, since the next acquirer rebinds the handle
    /// to a different stream.
    pub fn bind<'a>(&'a self, stream: &CudaStream) -> Result<BoundHandle<'a>> {
        let guard = self
            .handles
            .iter()
            .find_map(|h| h.try_lock())
            .unwrap_or_else(|| self.handles[0].lock());
        unsafe { blas::set_stream(*guard.handle(), stream.stream)? };
        Ok(BoundHandle { guard })
    }
}

/// A locked cuBLAS handle bound to one stream.
pub struct BoundHandle<'a> {
    guard: MutexGuard<'a, CudaBlas>,
}

impl BoundHandle<'_> {
    /// Raw handle for vendor calls issued while the guard is held.
    pub fn raw(&self) -> cudarc::cublas::sys::cublasHandle_t {
        *self.guard.handle()
    }
}

// ============================================================================
// Device context
// ============================================================================

/// Execution context for one CUDA device.
pub struct DeviceContext {
    device: Arc<CudaDevice>,
    streams: Vec<CudaStream>,
    handles: HandlePool,
    ordinal: usize,
}

impl DeviceContext {
    /// Initialize the device, its stream pool, and its handle pool.
    pub fn new(options: ContextOptions) -> Result<Self> {
        let device = CudaDevice::new(options.ordinal)
            .map_err(|e| TilarkError::Device(format!("device {}: {e}", options.ordinal)))?;
        let mut streams = Vec::with_capacity(options.num_streams);
        for _ in 0..options.num_streams.max(1) {
            let stream = device
                .fork_default_stream()
                .map_err(|e| TilarkError::Device(format!("stream creation: {e}")))?;
            streams.push(stream);
        }
        let handles = HandlePool::new(&device, options.num_handles.max(1))?;
        debug!(
            "initialized device {} with {} streams, {} cublas handles",
            options.ordinal,
            streams.len(),
            handles.len()
        );
        Ok(Self {
            device,
            streams,
            handles,
            ordinal: options.ordinal,
        })
    }

    /// Context on device 0 with default pool sizes.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ContextOptions::default())
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    pub fn device(&self) -> &Arc<CudaDevice> {
        &self.device
    }

    pub fn num_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn handles(&self) -> &HandlePool {
        &self.handles
    }

    /// Stream at a pool index.
    pub fn stream(&self, index: usize) -> &CudaStream {
        &self.streams[index % self.streams.len()]
    }

    /// Stream a tile's work is issued on, keyed by its range offset.
    pub fn stream_for(&self, range: &Range) -> &CudaStream {
        &self.streams[stream_index_for(range, self.streams.len())]
    }

    /// Block until all device work has completed.
    pub fn synchronize(&self) -> Result<()> {
        self.device
            .synchronize()
            .map_err(|e| TilarkError::Device(format!("synchronize: {e}")))
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("ordinal", &self.ordinal)
            .field("num_streams", &self.streams.len())
            .field("num_handles", &self.handles.len())
            .finish()
    }
}
