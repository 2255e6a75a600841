//! The allocation facade.

use std::sync::Arc;

use crate::allocators::backend::{BackendProvider, SimulatedTopology};
use crate::allocators::StrategyStats;
use crate::api::allocation::{Allocation, AllocationKey, SharedAllocation};
use crate::api::config::AllocConfig;
use crate::api::error::{AllocError, Result};
use crate::api::place::Place;
use crate::api::stats::{AllocStats, PlaceStats};
use crate::api::stream::Stream;
use crate::core::registry::Registry;

/// Single entry point for place- and stream-aware allocation.
///
/// The facade resolves a strategy chain per `(place, stream)` on first use
/// and hands out [`Allocation`]s that return themselves to that chain when
/// dropped. It is cheap to clone (internally uses `Arc`) and thread-safe;
/// clones share all pools.
///
/// # Example
///
/// ```rust
/// use placealloc::{AllocConfig, AllocatorFacade, Place, Stream};
///
/// let facade = AllocatorFacade::new(AllocConfig::minimal());
/// let gpu = Place::Accelerator(0);
/// let copy_stream = Stream::ordered(gpu, 1);
///
/// let buffer = facade.alloc(gpu, 4096).unwrap();
/// assert!(facade.record_stream(&buffer, copy_stream));
/// let key = buffer.key();
/// drop(buffer); // parked until the copy stream is done
///
/// facade.erase_stream_by_key(key, copy_stream);
/// assert!(facade.release(gpu) >= 4096);
/// ```
#[derive(Clone)]
pub struct AllocatorFacade {
    registry: Arc<Registry>,
}

impl AllocatorFacade {
    /// Create a facade over the simulated topology described by `config`.
    ///
    /// # Panics
    ///
    /// Panics if `config` fails [`AllocConfig::validate`]; use
    /// [`try_new`](Self::try_new) to handle that case.
    pub fn new(config: AllocConfig) -> Self {
        match Self::try_new(config) {
            Ok(facade) => facade,
            Err(err) => panic!("invalid allocator configuration: {}", err),
        }
    }

    /// Create a facade with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(AllocConfig::default())
    }

    /// Create a facade over the simulated topology described by `config`.
    pub fn try_new(config: AllocConfig) -> Result<Self> {
        let topology = SimulatedTopology::new(config.clone());
        Self::with_provider(config, topology)
    }

    /// Create a facade whose backends come from `provider`.
    pub fn with_provider(config: AllocConfig, provider: impl BackendProvider + 'static) -> Result<Self> {
        config.validate().map_err(AllocError::InvalidArgument)?;
        Ok(Self {
            registry: Registry::new(config, Box::new(provider)),
        })
    }

    /// The configuration in effect.
    pub fn config(&self) -> &AllocConfig {
        self.registry.config()
    }

    // ==================== Allocation ====================

    /// Allocate `size` bytes on `place` for synchronous use.
    pub fn alloc(&self, place: Place, size: usize) -> Result<Allocation> {
        self.alloc_on(place, size, Stream::Default)
    }

    /// Allocate `size` bytes on `place` for use by `stream`.
    ///
    /// An ordered stream is recorded on the allocation at creation, so work
    /// queued on it right away is safe. Dropping the allocation defers reuse
    /// until that stream is erased or [`release_stream`] runs.
    ///
    /// # Errors
    ///
    /// [`AllocError::InvalidPlace`] if the place is unsupported or the
    /// stream belongs elsewhere; [`AllocError::OutOfMemory`] once the
    /// recovery pass has failed.
    ///
    /// [`release_stream`]: Self::release_stream
    pub fn alloc_on(&self, place: Place, size: usize, stream: Stream) -> Result<Allocation> {
        let strategy = self.registry.strategy(place, stream)?;
        let block = strategy.allocate(size)?;
        Ok(Allocation::new(block, strategy))
    }

    /// Shared variant of [`alloc`](Self::alloc).
    pub fn alloc_shared(&self, place: Place, size: usize) -> Result<SharedAllocation> {
        self.alloc(place, size).map(Allocation::into_shared)
    }

    /// Shared variant of [`alloc_on`](Self::alloc_on).
    pub fn alloc_shared_on(&self, place: Place, size: usize, stream: Stream) -> Result<SharedAllocation> {
        self.alloc_on(place, size, stream).map(Allocation::into_shared)
    }

    // ==================== Reclaim ====================

    /// Return every cached, unused byte on `place` to its backend.
    ///
    /// Never fails; a place that was never used reclaims 0.
    pub fn release(&self, place: Place) -> usize {
        self.registry.release_place(place)
    }

    /// Treat `stream` as drained, then reclaim the cache of `(place, stream)`.
    ///
    /// `stream` is erased from every allocation on `place`; parked ones are
    /// recycled before the release.
    pub fn release_stream(&self, place: Place, stream: Stream) -> usize {
        if !stream.fits(place) {
            crate::pa_emit!(PA103, "place={} stream={}", place, stream);
            return 0;
        }
        self.registry.release_stream(place, stream)
    }

    // ==================== Stream protocol ====================

    /// Whether `allocation` was created on `stream`.
    pub fn in_same_stream(&self, allocation: &Allocation, stream: Stream) -> bool {
        allocation.stream() == stream
    }

    /// Base pointer of `allocation`.
    pub fn base_ptr(&self, allocation: &Allocation) -> *mut u8 {
        allocation.as_ptr()
    }

    /// Stream `allocation` was created on.
    pub fn stream_of(&self, allocation: &Allocation) -> Stream {
        allocation.stream()
    }

    /// Note that `stream` will access `allocation` asynchronously.
    ///
    /// Until the stream is erased, dropping the allocation does not make its
    /// memory reusable. Returns `false`, tracking nothing, if the place is
    /// synchronous or `stream` belongs to another place.
    pub fn record_stream(&self, allocation: &Allocation, stream: Stream) -> bool {
        let place = allocation.place();
        if !place.is_stream_capable() {
            crate::pa_emit!(PA102, "place={} stream={}", place, stream);
            return false;
        }
        if !stream.fits(place) {
            crate::pa_emit!(PA103, "place={} stream={}", place, stream);
            return false;
        }
        allocation.origin().record_stream(allocation.id(), stream)
    }

    /// Note that `stream` finished with `allocation`.
    ///
    /// The caller must have synchronized with the stream first. Erasing a
    /// stream that was never recorded is a no-op.
    pub fn erase_stream(&self, allocation: &Allocation, stream: Stream) {
        if allocation.place().is_stream_capable() {
            allocation.origin().erase_stream(allocation.id(), stream);
        }
    }

    /// [`erase_stream`](Self::erase_stream) for an allocation that may
    /// already have been dropped.
    pub fn erase_stream_by_key(&self, key: AllocationKey, stream: Stream) {
        if !key.place.is_stream_capable() {
            return;
        }
        match self.registry.existing(key.place, key.stream) {
            Some(strategy) => strategy.erase_stream(key.id, stream),
            None => crate::pa_emit!(PA101, "allocation={} stream={}", key.id, stream),
        }
    }

    // ==================== Statistics ====================

    /// Counters of every touched place.
    pub fn stats(&self) -> AllocStats {
        let mut stats = AllocStats::new();
        for place in self.registry.places() {
            if let Some(place_stats) = self.place_stats(place) {
                stats.places.push(place_stats);
            }
        }
        stats
    }

    /// Counters of one place, `None` if it was never used.
    pub fn place_stats(&self, place: Place) -> Option<PlaceStats> {
        let backend = self.registry.backend_stats(place)?;

        let mut strategies = StrategyStats::default();
        let mut strategy_count = 0;
        for ((p, stream), stats) in self.registry.strategy_stats() {
            if p == place {
                // Every chain of a place has the same shape; prefer the
                // default-stream one for the reported name.
                if stream == Stream::Default || strategies.name.is_empty() {
                    strategies.name = stats.name;
                }
                strategies.merge(&stats);
                strategy_count += 1;
            }
        }

        Some(PlaceStats {
            place,
            backend,
            strategies,
            strategy_count,
        })
    }

    /// Number of `(place, stream)` strategies created so far.
    pub fn registered_strategies(&self) -> usize {
        self.registry.len()
    }

    // ==================== Shutdown ====================

    /// Release every cache, report what is still outstanding and drop every
    /// registry entry.
    ///
    /// Allocations still alive keep their strategies alive and remain valid;
    /// they are reported as `PA202`, and parked blocks still waiting on a
    /// stream as `PA201`. Other clones of the facade see an empty registry
    /// afterwards. Returns the bytes reclaimed.
    pub fn teardown(self) -> usize {
        let reclaimed = self.registry.release_all();

        let stats = self.stats();
        let deferred = stats.deferred_blocks();
        if deferred > 0 {
            crate::pa_emit!(PA201, "{} block(s) still wait on recorded streams", deferred);
        }
        let live = stats.active_allocations().saturating_sub(deferred as u64);
        if live > 0 {
            crate::pa_emit!(PA202, "{} allocation(s) still alive", live);
        }
        self.registry.clear();
        reclaimed
    }
}

impl Default for AllocatorFacade {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for AllocatorFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AllocatorFacade")
            .field("places", &self.registry.places())
            .field("strategies", &self.registry.len())
            .finish()
    }
}

