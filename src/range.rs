use smallvec::SmallVec;
use std::fmt;

use crate::{Result, TilarkError};

type Dims = SmallVec<[usize; 4]>;

/// Shape descriptor for a tile: per-dimension lower/upper bounds.
///
/// Immutable once constructed. Besides rank/extents/volume it provides a
/// stable row-major ordinal [`offset`](Range::offset) used to key stream
/// selection, and an index-flattening function [`ord`](Range::ord).
///
/// Stack-allocated for rank ≤ 4; contractions rarely exceed that.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Range {
    lobound: Dims,
    upbound: Dims,
}

impl Range {
    /// Create a range from per-dimension `[lobound, upbound)` pairs.
    pub fn new(lobound: &[usize], upbound: &[usize]) -> Result<Self> {
        if lobound.len() != upbound.len() {
            return Err(TilarkError::InvalidRange(format!(
                "lobound rank {} != upbound rank {}",
                lobound.len(),
                upbound.len()
            )));
        }
        for (d, (&lo, &up)) in lobound.iter().zip(upbound).enumerate() {
            if lo > up {
                return Err(TilarkError::InvalidRange(format!(
                    "dimension {d}: lobound {lo} exceeds upbound {up}"
                )));
            }
        }
        Ok(Self {
            lobound: SmallVec::from_slice(lobound),
            upbound: SmallVec::from_slice(upbound),
        })
    }

    /// Range with zero lower bounds and the given extents.
    pub fn from_extents(extents: &[usize]) -> Self {
        Self {
            lobound: SmallVec::from_elem(0, extents.len()),
            upbound: SmallVec::from_slice(extents),
        }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.lobound.len()
    }

    /// Per-dimension lower bounds.
    pub fn lobound(&self) -> &[usize] {
        &self.lobound
    }

    /// Per-dimension upper bounds (exclusive).
    pub fn upbound(&self) -> &[usize] {
        &self.upbound
    }

    /// Per-dimension extents (`upbound - lobound`).
    pub fn extent(&self) -> Dims {
        self.lobound
            .iter()
            .zip(&self.upbound)
            .map(|(&lo, &up)| up - lo)
            .collect()
    }

    /// Total number of elements.
    pub fn volume(&self) -> usize {
        self.extent().iter().product()
    }

    /// Whether the range contains no elements.
    pub fn is_empty(&self) -> bool {
        self.volume() == 0
    }

    /// Row-major strides over this range's extents.
    fn strides(&self) -> Dims {
        let rank = self.rank();
        let mut strides = SmallVec::from_elem(0usize, rank);
        if rank == 0 {
            return strides;
        }
        let extent = self.extent();
        strides[rank - 1] = 1;
        for i in (0..rank - 1).rev() {
            strides[i] = strides[i + 1] * extent[i + 1];
        }
        strides
    }

    /// Row-major ordinal of the lower-bound corner.
    ///
    /// Stable and order-preserving for a fixed shape, which makes it the
    /// stream-selection key: the same tile always maps to the same stream,
    /// and tiles at different corners of a tiled space tend to spread
    /// across streams.
    pub fn offset(&self) -> usize {
        self.lobound
            .iter()
            .zip(self.strides())
            .map(|(&lo, s)| lo * s)
            .sum()
    }

    /// Flatten a multi-index into a linear ordinal, or `None` when the
    /// index lies outside the range.
    pub fn ord(&self, index: &[usize]) -> Option<usize> {
        if index.len() != self.rank() {
            return None;
        }
        let in_bounds = index
            .iter()
            .zip(self.lobound.iter().zip(&self.upbound))
            .all(|(&i, (&lo, &up))| i >= lo && i < up);
        if !in_bounds {
            return None;
        }
        Some(
            index
                .iter()
                .zip(&self.lobound)
                .zip(self.strides())
                .map(|((&i, &lo), s)| (i - lo) * s)
                .sum(),
        )
    }

    /// Whether two ranges have identical extents (elementwise-compatible).
    pub fn conforms(&self, other: &Range) -> bool {
        self.extent() == other.extent()
    }
}

impl fmt::Debug for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Range({:?}..{:?})",
            self.lobound.as_slice(),
            self.upbound.as_slice()
        )
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, (&lo, &up)) in self.lobound.iter().zip(&self.upbound).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{lo}..{up}")?;
        }
        write!(f, "]")
    }
}
