//! Best-fit caching allocator for device and pinned memory.
//!
//! Requests are rounded to a bucket and served from a pool of previously
//! freed blocks when one of capacity `[bucket, 2 * bucket]` is available.
//! Freed blocks are never returned to the driver until [`release`] is
//! called, so steady-state workloads make no driver calls at all.
//!
//! [`release`]: MemoryStrategy::release

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
use crate::util::layout::bucket_size;

/// Caching strategy over one device backend.
pub struct CachingAllocator {
    place: Place,
    backend: Arc<dyn DeviceBackend>,
    min_block: usize,
    small_limit: usize,
    granularity: usize,

    /// Free blocks keyed by capacity
    pool: Mutex<BTreeMap<usize, Vec<NonNull<u8>>>>,

    in_use: ByteGauge,
    cached: ByteGauge,
    allocations: AtomicCounter,
    deallocations: AtomicCounter,
    cache_hits: AtomicCounter,
    poison: bool,
}

impl CachingAllocator {
    /// Create a caching allocator over `backend` with the bucket settings
    /// of `config`.
    pub fn new(backend: Arc<dyn DeviceBackend>, config: &AllocConfig) -> Self {
        Self {
            place: backend.place(),
            backend,
            min_block: config.min_block_size,
            small_limit: config.small_bucket_limit,
            granularity: config.large_bucket_granularity,
            pool: Mutex::new(BTreeMap::new()),
            in_use: ByteGauge::new(),
            cached: ByteGauge::new(),
            allocations: AtomicCounter::new(0),
            deallocations: AtomicCounter::new(0),
            cache_hits: AtomicCounter::new(0),
            poison: config.debug_mode,
        }
    }

    /// Bucket a request of `size` bytes is rounded to.
    pub fn bucket_for(&self, size: usize) -> usize {
        bucket_size(size, self.min_block, self.small_limit, self.granularity)
    }

    /// Smallest pooled block with capacity in `[bucket, 2 * bucket]`.
    ///
    /// The cached gauge moves under the pool lock so it never runs ahead of
    /// the pool contents.
    fn take_cached(&self, bucket: usize) -> Option<(NonNull<u8>, usize)> {
        let mut pool = self.pool.lock();
        let upper = bucket.saturating_mul(2);
        let (&capacity, list) = pool.range_mut(bucket..=upper).next()?;
        let ptr = list.pop()?;
        if list.is_empty() {
            pool.remove(&capacity);
        }
        self.cached.sub(capacity);
        Some((ptr, capacity))
    }
}

impl MemoryStrategy for CachingAllocator {
    fn name(&self) -> &'static str {
        "caching"
    }

    fn place(&self) -> Place {
        self.place
    }

    fn allocate(&self, size: usize) -> Result<Block> {
        let oom = || AllocError::OutOfMemory {
            place: self.place,
            requested: size,
        };
        if size > isize::MAX as usize - self.granularity {
            return Err(oom());
        }
        let bucket = self.bucket_for(size);

        let (ptr, capacity) = match self.take_cached(bucket) {
            Some(hit) => {
                self.cache_hits.increment();
                hit
            }
            None => (self.backend.allocate(bucket).ok_or_else(oom)?, bucket),
        };

        self.in_use.add(capacity);
        self.allocations.increment();
        Ok(Block::new(ptr, size, capacity, self.place))
    }

    fn deallocate(&self, block: Block) {
        let capacity = block.capacity();
        poison_freed(self.poison, block.ptr(), capacity);

        self.in_use.sub(capacity);
        {
            let mut pool = self.pool.lock();
            self.cached.add(capacity);
            pool.entry(capacity).or_default().push(block.ptr());
        }
        self.deallocations.increment();
    }

    fn release(&self) -> usize {
        let pool = {
            let mut guard = self.pool.lock();
            let taken = std::mem::take(&mut *guard);
            let bytes: usize = taken.iter().map(|(cap, list)| cap * list.len()).sum();
            self.cached.sub(bytes);
            taken
        };

        let mut reclaimed = 0;
        for (capacity, blocks) in pool {
            for ptr in blocks {
                // SAFETY: pooled pointers came from this backend with this capacity.
                unsafe { self.backend.free(ptr, capacity) };
                reclaimed += capacity;
            }
        }
        if reclaimed > 0 {
            trace_event!("{}: released {} cached bytes", self.place, reclaimed);
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

impl Drop for CachingAllocator {
    fn drop(&mut self) {
        self.release();
    }
}

// SAFETY: pooled pointers are only touched under the pool lock.
unsafe impl Send for CachingAllocator {}
unsafe impl Sync for CachingAllocator {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::backend::SystemMemory;
    use crate::util::size::kb;

    fn caching(capacity: usize) -> (CachingAllocator, Arc<SystemMemory>) {
        let backend = Arc::new(SystemMemory::new(Place::Accelerator(0), capacity, 64));
        let allocator = CachingAllocator::new(backend.clone(), &AllocConfig::minimal());
        (allocator, backend)
    }

    #[test]
    fn test_bucket_rounding() {
        let (allocator, _) = caching(0);
        assert_eq!(allocator.bucket_for(0), 64);
        assert_eq!(allocator.bucket_for(100), 128);
        assert_eq!(allocator.bucket_for(kb(256)), kb(256));
        assert_eq!(allocator.bucket_for(kb(300)), kb(512));
        assert_eq!(allocator.bucket_for(kb(600)), kb(1024));
    }

    #[test]
    fn test_freed_block_is_reused_without_driver_call() {
        let (allocator, backend) = caching(0);

        let block = allocator.allocate(1000).unwrap();
        let ptr = block.ptr();
        allocator.deallocate(block);

        let again = allocator.allocate(1000).unwrap();
        assert_eq!(again.ptr(), ptr);
        assert_eq!(backend.stats().alloc_calls, 1);
        assert_eq!(allocator.stats().cache_hits, 1);
        allocator.deallocate(again);
    }

    #[test]
    fn test_best_fit_window() {
        let (allocator, backend) = caching(0);

        // A 1024-byte block may serve a 512 bucket but not a 256 bucket.
        let big = allocator.allocate(1024).unwrap();
        allocator.deallocate(big);

        let small = allocator.allocate(200).unwrap();
        assert_eq!(small.capacity(), 256);
        assert_eq!(backend.stats().alloc_calls, 2);

        let mid = allocator.allocate(500).unwrap();
        assert_eq!(mid.capacity(), 1024);
        assert_eq!(backend.stats().alloc_calls, 2);

        allocator.deallocate(small);
        allocator.deallocate(mid);
    }

    #[test]
    fn test_release_frees_only_cached_blocks() {
        let (allocator, backend) = caching(0);

        let a = allocator.allocate(1024).unwrap();
        let b = allocator.allocate(1024).unwrap();
        let live = allocator.allocate(4096).unwrap();
        allocator.deallocate(a);
        allocator.deallocate(b);

        assert_eq!(allocator.release(), 2048);
        assert_eq!(allocator.release(), 0);
        assert_eq!(backend.stats().in_use, 4096);

        let stats = allocator.stats();
        assert_eq!(stats.in_use_bytes, 4096);
        assert_eq!(stats.cached_bytes, 0);
        allocator.deallocate(live);
    }

    #[test]
    fn test_gauges_under_same_bucket_contention() {
        let (allocator, _) = caching(0);
        let allocator = Arc::new(allocator);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = allocator.clone();
                std::thread::spawn(move || {
                    for _ in 0..5_000 {
                        let block = allocator.allocate(1000).unwrap();
                        allocator.deallocate(block);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stats = allocator.stats();
        assert_eq!(stats.in_use_bytes, 0);
        assert!(stats.cached_bytes <= 8 * 1024);
        assert_eq!(stats.cached_bytes % 1024, 0);
        assert_eq!(allocator.release(), stats.cached_bytes);
        assert_eq!(allocator.stats().cached_bytes, 0);
    }

    #[test]
    fn test_out_of_memory() {
        let (allocator, _) = caching(kb(4));

        let block = allocator.allocate(kb(4)).unwrap();
        let err = allocator.allocate(64).unwrap_err();
        assert!(err.is_recoverable());
        allocator.deallocate(block);

        assert!(allocator.allocate(64).is_err());
        allocator.release();
        let again = allocator.allocate(64).unwrap();
        allocator.deallocate(again);
    }
}
