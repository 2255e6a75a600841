//! Stream-safety tracking for stream-capable places.
//!
//! Every block carries the set of streams that may still access it. A block
//! whose owner is dropped while that set is non-empty is parked as
//! pending-free and is handed back to the pool only once the last stream is
//! erased:
//!
//! ```text
//! allocate        -> InUse({creation stream}) or InUse({})
//! record_stream s -> InUse(S + s)
//! erase_stream s  -> InUse(S - s), recycled if empty and pending
//! deallocate      -> recycled if S is empty, pending otherwise
//! ```
//!
//! Recycled blocks go through a lock-free queue and reach the inner pool
//! outside the tracker lock.

use std::collections::{HashMap, HashSet};

use crate::allocators::deferred::DeferredFreeQueue;
use crate::allocators::{Block, MemoryStrategy, StrategyStats};
use crate::api::allocation::AllocationId;
use crate::api::error::Result;
use crate::api::place::Place;
use crate::api::stream::Stream;
use crate::diagnostics::macros::trace_event;
use crate::sync::atomics::AtomicCounter;
use crate::sync::mutex::Mutex;

/// Tracker state of one live or pending block.
#[derive(Default)]
struct TrackedBlock {
    streams: HashSet<Stream>,
    /// Set once the owner dropped the block while streams were outstanding.
    pending: Option<Block>,
}

/// Outcome of an erase, reported after the tracker lock is released.
enum EraseOutcome {
    Untracked,
    NotRecorded,
    Erased,
    Recycled,
}

/// Stream-aware wrapper around the allocator of one `(place, stream)`.
pub struct StreamSafeAllocator {
    place: Place,
    stream: Stream,
    inner: Box<dyn MemoryStrategy>,
    tracked: Mutex<HashMap<AllocationId, TrackedBlock>>,
    recycled: DeferredFreeQueue,
    deferred_frees: AtomicCounter,
}

impl StreamSafeAllocator {
    pub(crate) fn new(inner: Box<dyn MemoryStrategy>, stream: Stream) -> Self {
        Self {
            place: inner.place(),
            stream,
            inner,
            tracked: Mutex::new(HashMap::new()),
            recycled: DeferredFreeQueue::new(),
            deferred_frees: AtomicCounter::new(0),
        }
    }

    /// Hand recycled blocks back to the inner pool.
    fn drain_recycled(&self) -> usize {
        self.recycled.drain(|block| self.inner.deallocate(block))
    }
}

impl MemoryStrategy for StreamSafeAllocator {
    fn name(&self) -> &'static str {
        "stream-safe"
    }

    fn place(&self) -> Place {
        self.place
    }

    fn allocate(&self, size: usize) -> Result<Block> {
        self.drain_recycled();

        let block = self.inner.allocate(size)?.on_stream(self.stream);
        if !self.stream.is_default() {
            let mut tracked = self.tracked.lock();
            tracked.entry(block.id()).or_default().streams.insert(self.stream);
        }
        Ok(block)
    }

    fn deallocate(&self, block: Block) {
        {
            let mut tracked = self.tracked.lock();
            if let Some(entry) = tracked.get_mut(&block.id()) {
                if !entry.streams.is_empty() {
                    trace_event!(
                        "{}: block {:?} deferred on {} stream(s)",
                        self.place,
                        block.id(),
                        entry.streams.len()
                    );
                    entry.pending = Some(block);
                    self.deferred_frees.increment();
                    return;
                }
                tracked.remove(&block.id());
            }
        }
        self.inner.deallocate(block);
    }

    fn release(&self) -> usize {
        self.drain_recycled();
        self.inner.release()
    }

    fn record_stream(&self, id: AllocationId, stream: Stream) -> bool {
        if stream.is_default() {
            return true;
        }
        let mut tracked = self.tracked.lock();
        tracked.entry(id).or_default().streams.insert(stream);
        true
    }

    fn erase_stream(&self, id: AllocationId, stream: Stream) {
        let outcome = {
            let mut tracked = self.tracked.lock();
            match tracked.get_mut(&id) {
                None => EraseOutcome::Untracked,
                Some(entry) => {
                    if !entry.streams.remove(&stream) {
                        EraseOutcome::NotRecorded
                    } else if !entry.streams.is_empty() {
                        EraseOutcome::Erased
                    } else {
                        match tracked.remove(&id).and_then(|entry| entry.pending) {
                            Some(block) => {
                                self.recycled.push(block);
                                EraseOutcome::Recycled
                            }
                            None => EraseOutcome::Erased,
                        }
                    }
                }
            }
        };

        match outcome {
            EraseOutcome::Untracked | EraseOutcome::NotRecorded => {
                if !stream.is_default() {
                    crate::pa_emit!(PA101, "allocation={:?} stream={}", id, stream);
                }
            }
            EraseOutcome::Recycled => {
                trace_event!("{}: block {:?} recycled after erasing {}", self.place, id, stream);
            }
            EraseOutcome::Erased => {}
        }
        self.drain_recycled();
    }

    fn drain_stream(&self, stream: Stream) -> usize {
        let mut recycled = 0;
        {
            let mut tracked = self.tracked.lock();
            tracked.retain(|_, entry| {
                entry.streams.remove(&stream);
                if !entry.streams.is_empty() {
                    return true;
                }
                match entry.pending.take() {
                    Some(block) => {
                        self.recycled.push(block);
                        recycled += 1;
                        false
                    }
                    None => false,
                }
            });
        }
        self.drain_recycled();
        recycled
    }

    fn stats(&self) -> StrategyStats {
        let (deferred_blocks, deferred_bytes) = {
            let tracked = self.tracked.lock();
            tracked
                .values()
                .filter_map(|entry| entry.pending.as_ref())
                .fold((0, 0), |(count, bytes), block| (count + 1, bytes + block.capacity()))
        };
        StrategyStats {
            name: self.name(),
            deferred_blocks,
            deferred_bytes,
            deferred_frees: self.deferred_frees.get(),
            ..self.inner.stats()
        }
    }
}

impl Drop for StreamSafeAllocator {
    fn drop(&mut self) {
        // Nothing can erase streams any more; pending blocks go back as is.
        let tracked = std::mem::take(&mut *self.tracked.lock());
        for block in tracked.into_values().filter_map(|entry| entry.pending) {
            self.inner.deallocate(block);
        }
        self.drain_recycled();
    }
}
