//! Allocation backends and strategies.
//!
//! This module contains the strategy implementations the facade chains
//! together per place. **These are the only modules that should contain
//! `unsafe` code.**

pub(crate) mod backend;
pub(crate) mod caching;
pub(crate) mod deferred;
pub(crate) mod host;
pub(crate) mod retry;
pub(crate) mod stream_safe;

use std::ptr::NonNull;

use crate::api::allocation::AllocationId;
use crate::api::error::Result;
use crate::api::place::Place;
use crate::api::stream::Stream;

/// A raw memory region travelling between strategies.
///
/// Blocks are plain data with no `Drop`; a block that is never handed back
/// to its strategy leaks its region.
#[derive(Debug)]
pub(crate) struct Block {
    id: AllocationId,
    ptr: NonNull<u8>,
    size: usize,
    capacity: usize,
    place: Place,
    stream: Stream,
}

// SAFETY: a block is an exclusive claim on its region; moving it across
// threads moves that claim.
unsafe impl Send for Block {}
unsafe impl Sync for Block {}

impl Block {
    /// Wrap a region handed out for a request of `size` bytes.
    pub fn new(ptr: NonNull<u8>, size: usize, capacity: usize, place: Place) -> Self {
        Self {
            id: AllocationId::next(),
            ptr,
            size,
            capacity,
            place,
            stream: Stream::Default,
        }
    }

    /// Tag the block with the stream it was allocated for.
    pub fn on_stream(mut self, stream: Stream) -> Self {
        self.stream = stream;
        self
    }

    /// Move the region out, leaving an empty husk with the same id behind.
    pub fn take(&mut self) -> Block {
        let husk = Block {
            id: self.id,
            ptr: NonNull::dangling(),
            size: 0,
            capacity: 0,
            place: self.place,
            stream: self.stream,
        };
        std::mem::replace(self, husk)
    }

    pub fn id(&self) -> AllocationId {
        self.id
    }

    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn place(&self) -> Place {
        self.place
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }
}

/// Counters every strategy reports.
#[derive(Debug, Clone, Default)]
pub struct StrategyStats {
    /// Strategy name (outermost layer).
    pub name: &'static str,
    /// Blocks handed out.
    pub allocation_count: u64,
    /// Blocks returned to the pool.
    pub deallocation_count: u64,
    /// Requests served from the free pool without touching the backend.
    pub cache_hits: u64,
    /// Bytes of capacity currently handed out.
    pub in_use_bytes: usize,
    /// Bytes sitting in free pools, reclaimable by `release`.
    pub cached_bytes: usize,
    /// Dropped blocks still waiting on recorded streams.
    pub deferred_blocks: usize,
    /// Capacity of those blocks.
    pub deferred_bytes: usize,
    /// Frees that had to wait on a recorded stream.
    pub deferred_frees: u64,
    /// Out-of-memory recovery passes run.
    pub retries: u64,
}

impl StrategyStats {
    /// Blocks handed out and not yet handed back.
    pub fn live_blocks(&self) -> u64 {
        self.allocation_count.saturating_sub(self.deallocation_count)
    }

    /// Fold another strategy's counters into this one.
    pub fn merge(&mut self, other: &StrategyStats) {
        self.allocation_count += other.allocation_count;
        self.deallocation_count += other.deallocation_count;
        self.cache_hits += other.cache_hits;
        self.in_use_bytes += other.in_use_bytes;
        self.cached_bytes += other.cached_bytes;
        self.deferred_blocks += other.deferred_blocks;
        self.deferred_bytes += other.deferred_bytes;
        self.deferred_frees += other.deferred_frees;
        self.retries += other.retries;
    }
}

/// Uniform contract of a per-place allocation strategy.
///
/// Stream hooks default to the synchronous behaviour: nothing is tracked and
/// recording reports `false`.
pub(crate) trait MemoryStrategy: Send + Sync {
    /// Short name for stats and diagnostics.
    fn name(&self) -> &'static str;

    /// Place this strategy serves.
    fn place(&self) -> Place;

    /// Hand out a block of at least `size` bytes.
    fn allocate(&self, size: usize) -> Result<Block>;

    /// Take a block back.
    fn deallocate(&self, block: Block);

    /// Return every free cached byte to the backend. Returns bytes reclaimed.
    fn release(&self) -> usize;

    /// Note that `stream` will access the block `id` asynchronously.
    fn record_stream(&self, _id: AllocationId, _stream: Stream) -> bool {
        false
    }

    /// Note that `stream` finished with the block `id`.
    fn erase_stream(&self, _id: AllocationId, _stream: Stream) {}

    /// Erase `stream` from every block tracked here. Returns blocks recycled.
    fn drain_stream(&self, _stream: Stream) -> usize {
        0
    }

    /// Current counters.
    fn stats(&self) -> StrategyStats;
}

/// Overwrite freed memory with the poison pattern in `debug` builds.
#[inline]
pub(crate) fn poison_freed(enabled: bool, ptr: NonNull<u8>, len: usize) {
    #[cfg(feature = "debug")]
    if enabled {
        // SAFETY: callers pass a region they exclusively own.
        unsafe { crate::debug::poison::poison_freed(ptr.as_ptr(), len) }
    }
    #[cfg(not(feature = "debug"))]
    let _ = (enabled, ptr, len);
}
