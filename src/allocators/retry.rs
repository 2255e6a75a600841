//! Out-of-memory recovery wrapper.

use std::sync::Arc;

use crate::allocators::{Block, MemoryStrategy, StrategyStats};
use crate::api::error::{AllocError, Result};
use crate::api::place::Place;
use crate::diagnostics::macros::trace_event;
use crate::sync::atomics::AtomicCounter;

/// Releases memory held elsewhere on the same place. Returns bytes reclaimed.
pub(crate) type PressureHook = Arc<dyn Fn() -> usize + Send + Sync>;

/// Retries a failed allocation once after freeing cached memory.
///
/// The recovery pass releases the wrapped strategy and, when a pressure hook
/// is installed, every sibling strategy of the same place. Only a failure of
/// the second attempt reaches the caller.
pub struct RetryAllocator {
    inner: Box<dyn MemoryStrategy>,
    pressure: Option<PressureHook>,
    retries: AtomicCounter,
}

impl RetryAllocator {
    pub(crate) fn new(inner: Box<dyn MemoryStrategy>, pressure: Option<PressureHook>) -> Self {
        Self {
            inner,
            pressure,
            retries: AtomicCounter::new(0),
        }
    }

    fn recover(&self) -> usize {
        self.retries.increment();
        let mut reclaimed = self.inner.release();
        if let Some(hook) = &self.pressure {
            reclaimed += hook();
        }
        trace_event!("{}: out of memory, reclaimed {} bytes before retry", self.place(), reclaimed);
        reclaimed
    }
}

impl MemoryStrategy for RetryAllocator {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn place(&self) -> Place {
        self.inner.place()
    }

    fn allocate(&self, size: usize) -> Result<Block> {
        match self.inner.allocate(size) {
            Err(AllocError::OutOfMemory { .. }) => {
                self.recover();
                self.inner.allocate(size).map_err(|err| {
                    if let AllocError::OutOfMemory { place, requested } = &err {
                        crate::pa_emit!(PA001, "place={} requested={}", place, requested);
                    }
                    err
                })
            }
            result => result,
        }
    }

    fn deallocate(&self, block: Block) {
        self.inner.deallocate(block);
    }

    fn release(&self) -> usize {
        self.inner.release()
    }

    fn stats(&self) -> StrategyStats {
        StrategyStats {
            name: self.name(),
            retries: self.retries.get(),
            ..self.inner.stats()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocators::backend::{DeviceBackend, SystemMemory};
    use crate::allocators::caching::CachingAllocator;
    use crate::api::config::AllocConfig;
    use crate::diagnostics::{CollectingSink, SinkGuard};
    use crate::util::size::kb;

    fn retrying(
        backend: &Arc<SystemMemory>,
        pressure: Option<PressureHook>,
    ) -> RetryAllocator {
        let backend: Arc<dyn DeviceBackend> = backend.clone();
        let caching = CachingAllocator::new(backend, &AllocConfig::minimal());
        RetryAllocator::new(Box::new(caching), pressure)
    }

    #[test]
    fn test_retry_reclaims_own_cache() {
        let backend = Arc::new(SystemMemory::new(Place::Accelerator(0), kb(8), 64));
        let retry = retrying(&backend, None);

        let a = retry.allocate(kb(4)).unwrap();
        let b = retry.allocate(kb(4)).unwrap();
        retry.deallocate(a);
        retry.deallocate(b);

        // The 8K bucket cannot be served from two cached 4K blocks.
        let big = retry.allocate(kb(8)).unwrap();
        assert_eq!(retry.stats().retries, 1);
        assert_eq!(retry.stats().name, "retry");
        retry.deallocate(big);
    }

    #[test]
    fn test_retry_uses_pressure_hook() {
        let backend = Arc::new(SystemMemory::new(Place::Accelerator(0), kb(8), 64));
        let sibling = Arc::new(retrying(&backend, None));
        let hook_target = sibling.clone();
        let hook: PressureHook = Arc::new(move || hook_target.release());
        let retry = retrying(&backend, Some(hook));

        let held = sibling.allocate(kb(8)).unwrap();
        sibling.deallocate(held);

        let block = retry.allocate(kb(4)).unwrap();
        assert_eq!(retry.stats().retries, 1);
        assert_eq!(sibling.stats().cached_bytes, 0);
        retry.deallocate(block);
    }

    #[test]
    fn test_exhausted_retry_surfaces_out_of_memory() {
        let sink = Arc::new(CollectingSink::new());
        let _guard = SinkGuard::install(sink.clone());

        let backend = Arc::new(SystemMemory::new(Place::Accelerator(0), kb(4), 64));
        let retry = retrying(&backend, None);

        let err = retry.allocate(kb(64)).unwrap_err();
        assert_eq!(
            err,
            AllocError::OutOfMemory {
                place: Place::Accelerator(0),
                requested: kb(64)
            }
        );
        assert_eq!(sink.codes(), vec!["PA001"]);
    }
}
