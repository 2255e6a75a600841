//! Layout and size-rounding utilities.

use std::alloc::Layout;

/// Align a size up to the given alignment (a power of two).
#[inline]
pub const fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Layout for a raw block of `size` bytes. Zero sizes are bumped to one byte
/// so the system allocator always hands back a real, unique address.
pub fn block_layout(size: usize, align: usize) -> Option<Layout> {
    Layout::from_size_align(size.max(1), align).ok()
}

/// Round a request to its caching bucket.
///
/// Requests up to `small_limit` round to the next power of two (at least
/// `min_block`); larger requests round to a multiple of `granularity`.
pub fn bucket_size(size: usize, min_block: usize, small_limit: usize, granularity: usize) -> usize {
    let size = size.max(min_block);
    if size <= small_limit {
        size.next_power_of_two()
    } else {
        align_up(size, granularity)
    }
}
