//! Pooled allocator for pageable host memory.
//!
//! Small requests round up to a size class and are served from per-class
//! free lists; larger requests round to the host page size and are kept in
//! an exact-size free list. Freed blocks go straight back to their list, so
//! deallocation is synchronous and never touches the system allocator.

use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::allocators::backend::DeviceBackend;
use crate::allocators::{poison_freed, Block, MemoryStrategy, StrategyStats};
use crate::api::config::AllocConfig;
use crate::api::error::{AllocError, Result};
use crate::api::place::Place;
use crate::diagnostics::macros::trace_event;
use crate::sync::atomics::{AtomicCounter, ByteGauge};
use crate::sync::mutex::Mutex;
use crate::util::layout::align_up;

/// A single size class.
struct SizeClass {
    /// Object size for this class
    size: usize,

    /// Free blocks of exactly `size` bytes
    free: Mutex<Vec<NonNull<u8>>>,
}

/// Host pool strategy.
pub struct HostPool {
    place: Place,
    backend: Arc<dyn DeviceBackend>,

    /// Ascending size classes
    classes: Vec<SizeClass>,

    /// Rounding for requests above the largest class
    page_size: usize,

    /// Free large blocks keyed by capacity
    large: Mutex<BTreeMap<usize, Vec<NonNull<u8>>>>,

    in_use: ByteGauge,
    cached: ByteGauge,
    allocations: AtomicCounter,
    deallocations: AtomicCounter,
    cache_hits: AtomicCounter,
    poison: bool,
}

impl HostPool {
    /// Create a pool over `backend` using the host settings of `config`.
    pub fn new(backend: Arc<dyn DeviceBackend>, config: &AllocConfig) -> Self {
        let classes = config
            .host_size_classes
            .iter()
            .map(|&size| SizeClass {
                size,
                free: Mutex::new(Vec::new()),
            })
            .collect();

        Self {
            place: backend.place(),
            backend,
            classes,
            page_size: config.host_page_size,
            large: Mutex::new(BTreeMap::new()),
            in_use: ByteGauge::new(),
            cached: ByteGauge::new(),
            allocations: AtomicCounter::new(0),
            deallocations: AtomicCounter::new(0),
            cache_hits: AtomicCounter::new(0),
            poison: config.debug_mode,
        }
    }

    /// Find the size class for a given size.
    fn class_index(&self, size: usize) -> Option<usize> {
        self.classes.iter().position(|c| c.size >= size)
    }

    /// Capacity a request of `size` bytes is served with.
    fn capacity_for(&self, size: usize) -> usize {
        match self.class_index(size.max(1)) {
            Some(idx) => self.classes[idx].size,
            None => align_up(size, self.page_size),
        }
    }

    /// Pop a free block. The cached gauge moves under the list lock.
    fn pop_free(&self, capacity: usize) -> Option<NonNull<u8>> {
        let ptr = match self.class_index(capacity) {
            Some(idx) => {
                let mut free = self.classes[idx].free.lock();
                let ptr = free.pop()?;
                self.cached.sub(capacity);
                ptr
            }
            None => {
                let mut large = self.large.lock();
                let list = large.get_mut(&capacity)?;
                let ptr = list.pop()?;
                if list.is_empty() {
                    large.remove(&capacity);
                }
                self.cached.sub(capacity);
                ptr
            }
        };
        Some(ptr)
    }

    /// Push a free block. The cached gauge moves under the list lock.
    fn push_free(&self, ptr: NonNull<u8>, capacity: usize) {
        match self.class_index(capacity) {
            Some(idx) => {
                let mut free = self.classes[idx].free.lock();
                self.cached.add(capacity);
                free.push(ptr);
            }
            None => {
                let mut large = self.large.lock();
                self.cached.add(capacity);
                large.entry(capacity).or_default().push(ptr);
            }
        }
    }
}

impl MemoryStrategy for HostPool {
    fn name(&self) -> &'static str {
        "host-pool"
    }

    fn place(&self) -> Place {
        self.place
    }

    fn allocate(&self, size: usize) -> Result<Block> {
        if size > isize::MAX as usize - self.page_size {
            return Err(AllocError::OutOfMemory {
                place: self.place,
                requested: size,
            });
        }
        let capacity = self.capacity_for(size);

        let ptr = match self.pop_free(capacity) {
            Some(ptr) => {
                self.cache_hits.increment();
                ptr
            }
            None => self.backend.allocate(capacity).ok_or(AllocError::OutOfMemory {
                place: self.place,
                requested: size,
            })?,
        };

        self.in_use.add(capacity);
        self.allocations.increment();
        Ok(Block::new(ptr, size, capacity, self.place))
    }

    fn deallocate(&self, block: Block) {
        let capacity = block.capacity();
        poison_freed(self.poison, block.ptr(), capacity);

        self.in_use.sub(capacity);
        self.push_free(block.ptr(), capacity);
        self.deallocations.increment();
    }

    fn release(&self) -> usize {
        let mut freed = Vec::new();
        for class in &self.classes {
            let mut free = class.free.lock();
            self.cached.sub(class.size * free.len());
            freed.extend(free.drain(..).map(|ptr| (ptr, class.size)));
        }
        {
            let mut large = self.large.lock();
            for (capacity, blocks) in std::mem::take(&mut *large) {
                self.cached.sub(capacity * blocks.len());
                freed.extend(blocks.into_iter().map(|ptr| (ptr, capacity)));
            }
        }

        let mut reclaimed = 0;
        for (ptr, capacity) in freed {
            // SAFETY: every pooled pointer came from this backend with this capacity.
            unsafe { self.backend.free(ptr, capacity) };
            reclaimed += capacity;
        }
        if reclaimed > 0 {
            trace_event!("{}: released {} bytes", self.place, reclaimed);
        }
        reclaimed
    }

    fn stats(&self) -> StrategyStats {
        StrategyStats {
            name: self.name(),
            allocation_count: self.allocations.get(),
            deallocation_count: self.deallocations.get(),
            cache_hits: self.cache_hits.get(),
            in_use_bytes: self.in_use.get(),
            cached_bytes: self.cached.get(),
            ..Default::default()
        }
    }
}

impl Drop for HostPool {
    fn drop(&mut self) {
        self.release();
    }
}

// SAFETY: the raw pointers in the free lists are only touched under their locks.
unsafe impl Send for HostPool {}
unsafe impl Sync for HostPool {}
