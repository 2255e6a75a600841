//! Owned and shared allocation handles.
//!
//! An [`Allocation`] is the exclusive owner of one region. Dropping it hands
//! the region back to the strategy that produced it, which recycles it at
//! once or parks it until every recorded stream has been erased.
//! [`SharedAllocation`] adds atomically counted shared ownership on top; the
//! region goes back exactly once, when the last owner drops.

use std::fmt;
use std::ops::Deref;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::allocators::{Block, MemoryStrategy};
use crate::api::place::Place;
use crate::api::stream::Stream;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationId(u64);

impl AllocationId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AllocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Copyable reference to an allocation that stays valid after it drops.
///
/// Used to erase a stream from an allocation whose last owner is already
/// gone; see [`AllocatorFacade::erase_stream_by_key`].
///
/// [`AllocatorFacade::erase_stream_by_key`]: crate::AllocatorFacade::erase_stream_by_key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationKey {
    /// Place of the allocation.
    pub place: Place,
    /// Stream the allocation was created on.
    pub stream: Stream,
    /// Allocation id.
    pub id: AllocationId,
}

/// Exclusive owner of an allocated region.
///
/// The region is at least [`size`](Self::size) bytes long and aligned to the
/// configured alignment. Memory on accelerator places must only be touched
/// by device work, so no safe slice access is offered.
pub struct Allocation {
    block: Block,
    origin: Arc<dyn MemoryStrategy>,
}

impl Allocation {
    pub(crate) fn new(block: Block, origin: Arc<dyn MemoryStrategy>) -> Self {
        Self { block, origin }
    }

    pub(crate) fn origin(&self) -> &Arc<dyn MemoryStrategy> {
        &self.origin
    }

    /// Unique id of this allocation.
    pub fn id(&self) -> AllocationId {
        self.block.id()
    }

    /// Key for stream bookkeeping after this allocation drops.
    pub fn key(&self) -> AllocationKey {
        AllocationKey {
            place: self.place(),
            stream: self.stream(),
            id: self.id(),
        }
    }

    /// Base pointer of the region.
    pub fn ptr(&self) -> NonNull<u8> {
        self.block.ptr()
    }

    /// Base pointer of the region as a raw pointer.
    pub fn as_ptr(&self) -> *mut u8 {
        self.block.ptr().as_ptr()
    }

    /// Requested size in bytes.
    pub fn size(&self) -> usize {
        self.block.size()
    }

    /// Reserved size in bytes, never less than [`size`](Self::size).
    pub fn capacity(&self) -> usize {
        self.block.capacity()
    }

    /// Place the region lives on.
    pub fn place(&self) -> Place {
        self.block.place()
    }

    /// Stream the allocation was created on.
    pub fn stream(&self) -> Stream {
        self.block.stream()
    }

    /// Whether `[ptr, ptr + size)` of the two allocations intersect.
    pub fn overlaps(&self, other: &Allocation) -> bool {
        let (a, b) = (self.as_ptr() as usize, other.as_ptr() as usize);
        a < b + other.size().max(1) && b < a + self.size().max(1)
    }

    /// Convert into a shared allocation.
    pub fn into_shared(self) -> SharedAllocation {
        SharedAllocation(Arc::new(self))
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        self.origin.deallocate(self.block.take());
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Allocation")
            .field("id", &self.id())
            .field("ptr", &self.ptr())
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .field("place", &self.place())
            .field("stream", &self.stream())
            .finish()
    }
}

/// Shared owner of an allocated region.
///
/// Clones share one region; the region is handed back when the last clone
/// drops, from whichever thread that happens on.
#[derive(Clone)]
pub struct SharedAllocation(Arc<Allocation>);

impl SharedAllocation {
    /// Number of live owners.
    pub fn owner_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Recover exclusive ownership if this is the only owner.
    pub fn try_unwrap(self) -> Result<Allocation, Self> {
        Arc::try_unwrap(self.0).map_err(SharedAllocation)
    }

    /// Whether two handles share one region.
    pub fn ptr_eq(&self, other: &SharedAllocation) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for SharedAllocation {
    type Target = Allocation;

    fn deref(&self) -> &Allocation {
        &self.0
    }
}

impl From<Allocation> for SharedAllocation {
    fn from(allocation: Allocation) -> Self {
        allocation.into_shared()
    }
}

impl fmt::Debug for SharedAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedAllocation").field(&*self.0).finish()
    }
}
