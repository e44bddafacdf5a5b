//! Deterministic stream selection.
//!
//! Device work for a tile is always issued on the stream at
//! `stream_index(range.offset(), pool_size)`. Keying on the range offset
//! spreads independent tiles across streams without any per-tile
//! bookkeeping, while the same tile (same range) consistently lands on the
//! same stream, so the allocate/transfer/compute sequence of one operation
//! is ordered by stream semantics alone.
//!
//! Two unrelated tiles may collide on a stream; that costs concurrency,
//! never correctness.

use crate::range::Range;

/// Stream pool index for a given range ordinal offset.
///
/// Pure: identical inputs always select the same index.
pub fn stream_index(offset: usize, num_streams: usize) -> usize {
    debug_assert!(num_streams > 0, "stream pool must be non-empty");
    offset % num_streams
}

/// Stream pool index for a tile's range.
pub fn stream_index_for(range: &Range, num_streams: usize) -> usize {
    stream_index(range.offset(), num_streams)
}
