use crate::range::Range;
use crate::space::MemorySpace;
use crate::storage::Storage;
use crate::{Result, TilarkError};

/// A dense tile: a [`Range`] describing its logical shape plus a
/// [`Storage`] buffer holding exactly `range.volume()` elements.
///
/// Tiles are value types: moving one transfers storage ownership, and
/// duplication goes through the clone kernel rather than `Clone`. The
/// shape is immutable for the life of the tile.
#[derive(Debug)]
pub struct Tensor<T> {
    range: Range,
    storage: Storage<T>,
}

impl<T> Tensor<T> {
    /// Assemble a tile, enforcing `storage.size() == range.volume()`.
    pub fn new(range: Range, storage: Storage<T>) -> Result<Self> {
        if storage.size() != range.volume() {
            return Err(TilarkError::StorageSizeMismatch {
                size: storage.size(),
                volume: range.volume(),
            });
        }
        Ok(Self { range, storage })
    }

    /// Host-resident tile from a range and element vector.
    pub fn from_host(range: Range, data: Vec<T>) -> Result<Self> {
        Self::new(range, Storage::Host(data))
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    pub fn storage(&self) -> &Storage<T> {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut Storage<T> {
        &mut self.storage
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.storage.size()
    }

    /// Whether the tile holds no elements.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Memory space the tile's storage currently occupies.
    pub fn space(&self) -> MemorySpace {
        self.storage.space()
    }

    pub fn into_parts(self) -> (Range, Storage<T>) {
        (self.range, self.storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_volume_invariant() {
        let range = Range::from_extents(&[2, 3]);
        assert!(Tensor::from_host(range.clone(), vec![0.0f64; 6]).is_ok());

        // a zero-size buffer under a non-empty range must be rejected
        let err = Tensor::from_host(range.clone(), Vec::<f64>::new()).unwrap_err();
        assert!(matches!(
            err,
            TilarkError::StorageSizeMismatch { size: 0, volume: 6 }
        ));

        assert!(Tensor::from_host(range, vec![0.0f64; 5]).is_err());
    }

    #[test]
    fn test_empty_tile() {
        let range = Range::new(&[1, 1], &[1, 4]).unwrap();
        let t = Tensor::from_host(range, Vec::<f32>::new()).unwrap();
        assert!(t.is_empty());
        assert_eq!(t.size(), 0);
    }

    #[test]
    fn test_accessors() {
        let t = Tensor::from_host(Range::from_extents(&[4]), vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t.range().rank(), 1);
        assert_eq!(t.space(), MemorySpace::Host);
        assert_eq!(t.storage().as_host().unwrap()[3], 4.0);

        let (range, storage) = t.into_parts();
        assert_eq!(range.volume(), storage.size());
    }
}
