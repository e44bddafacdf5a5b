use crate::space::MemorySpace;

#[cfg(feature = "cuda")]
use cudarc::driver::{CudaSlice, DevicePtr, DeviceSlice};

/// Device-resident buffer.
///
/// Owns the device allocation outright (tiles are value types; duplicating
/// a tile duplicates its storage through the clone kernel, not through
/// reference counting). `staging` keeps the host source of an in-flight
/// asynchronous H2D copy alive until the buffer itself is dropped, so the
/// copy never reads freed memory.
#[cfg(feature = "cuda")]
pub struct DeviceBuffer<T> {
    pub(crate) slice: CudaSlice<T>,
    pub(crate) staging: Option<Vec<T>>,
}

#[cfg(feature = "cuda")]
impl<T> std::fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &self.device_ptr())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(feature = "cuda")]
impl<T> DeviceBuffer<T> {
    pub(crate) fn new(slice: CudaSlice<T>) -> Self {
        Self {
            slice,
            staging: None,
        }
    }

    /// Raw device pointer for vendor-library calls.
    pub fn device_ptr(&self) -> cudarc::driver::sys::CUdeviceptr {
        *self.slice.device_ptr()
    }

    pub fn len(&self) -> usize {
        self.slice.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slice.len() == 0
    }

    pub fn slice(&self) -> &CudaSlice<T> {
        &self.slice
    }
}

/// Backing storage for a tile, tagged with its memory-space residency.
#[derive(Debug)]
pub enum Storage<T> {
    /// Host heap storage.
    Host(Vec<T>),
    /// Device storage.
    #[cfg(feature = "cuda")]
    Device(DeviceBuffer<T>),
}

impl<T> Storage<T> {
    /// Number of elements.
    pub fn size(&self) -> usize {
        match self {
            Storage::Host(v) => v.len(),
            #[cfg(feature = "cuda")]
            Storage::Device(buf) => buf.len(),
        }
    }

    /// Memory space this storage currently occupies.
    pub fn space(&self) -> MemorySpace {
        match self {
            Storage::Host(_) => MemorySpace::Host,
            #[cfg(feature = "cuda")]
            Storage::Device(_) => MemorySpace::Device,
        }
    }

    /// Whether this storage is addressable from `space`.
    ///
    /// The classifier gate for every kernel precondition; never mutates.
    pub fn resides_in(&self, space: MemorySpace) -> bool {
        self.space().overlaps(space)
    }

    /// Host slice, when host-resident.
    pub fn as_host(&self) -> Option<&[T]> {
        match self {
            Storage::Host(v) => Some(v),
            #[cfg(feature = "cuda")]
            _ => None,
        }
    }

    /// Mutable host slice, when host-resident.
    pub fn as_host_mut(&mut self) -> Option<&mut [T]> {
        match self {
            Storage::Host(v) => Some(v),
            #[cfg(feature = "cuda")]
            _ => None,
        }
    }

    /// Device buffer, when device-resident.
    #[cfg(feature = "cuda")]
    pub fn as_device(&self) -> Option<&DeviceBuffer<T>> {
        match self {
            Storage::Device(buf) => Some(buf),
            _ => None,
        }
    }

    /// Raw device pointer, when device-resident.
    #[cfg(feature = "cuda")]
    pub fn device_ptr(&self) -> Option<cudarc::driver::sys::CUdeviceptr> {
        self.as_device().map(|buf| buf.device_ptr())
    }
}

impl<T> From<Vec<T>> for Storage<T> {
    fn from(v: Vec<T>) -> Self {
        Storage::Host(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_storage() {
        let s: Storage<f64> = vec![1.0, 2.0, 3.0].into();
        assert_eq!(s.size(), 3);
        assert_eq!(s.space(), MemorySpace::Host);
        assert_eq!(s.as_host(), Some(&[1.0, 2.0, 3.0][..]));
    }

    #[test]
    fn test_residency_classifier() {
        let s: Storage<f32> = vec![0.0f32; 4].into();
        assert!(s.resides_in(MemorySpace::Host));
        assert!(!s.resides_in(MemorySpace::Device));
        // unified is addressable from anywhere
        assert!(s.resides_in(MemorySpace::Unified));
    }

    #[test]
    fn test_host_mutation() {
        let mut s: Storage<f32> = vec![1.0f32, 2.0].into();
        s.as_host_mut().unwrap()[0] = 9.0;
        assert_eq!(s.as_host(), Some(&[9.0f32, 2.0][..]));
    }
}
