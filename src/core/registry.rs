//! Shared registry of backends and strategy chains.
//!
//! Strategies are created lazily on first use of a `(place, stream)` pair
//! and live until the registry is cleared or dropped. Lookups take a read lock; a miss
//! builds the chain and inserts it under the write lock, keeping whichever
//! instance got there first.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::allocators::backend::{BackendProvider, BackendStats, DeviceBackend};
use crate::allocators::caching::CachingAllocator;
use crate::allocators::host::HostPool;
use crate::allocators::retry::{PressureHook, RetryAllocator};
use crate::allocators::stream_safe::StreamSafeAllocator;
use crate::allocators::{MemoryStrategy, StrategyStats};
use crate::api::config::AllocConfig;
use crate::api::error::{AllocError, Result};
use crate::api::place::Place;
use crate::api::stream::Stream;
use crate::diagnostics::macros::trace_event;
use crate::sync::mutex::{Mutex, RwLock};

type StrategyKey = (Place, Stream);

/// Registry state shared by the facade and the pressure hooks.
pub(crate) struct Registry {
    config: AllocConfig,
    provider: Box<dyn BackendProvider>,

    /// One backend per place, created on first touch
    backends: Mutex<HashMap<Place, Arc<dyn DeviceBackend>>>,

    /// Authoritative strategy per `(place, stream)`
    strategies: RwLock<HashMap<StrategyKey, Arc<dyn MemoryStrategy>>>,

    this: Weak<Registry>,
}

impl Registry {
    pub fn new(config: AllocConfig, provider: Box<dyn BackendProvider>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            provider,
            backends: Mutex::new(HashMap::new()),
            strategies: RwLock::new(HashMap::new()),
            this: this.clone(),
        })
    }

    pub fn config(&self) -> &AllocConfig {
        &self.config
    }

    /// Strategy serving `(place, stream)`, created on first use.
    pub fn strategy(&self, place: Place, stream: Stream) -> Result<Arc<dyn MemoryStrategy>> {
        if !stream.fits(place) {
            crate::pa_emit!(PA002, "place={} stream={}", place, stream);
            return Err(AllocError::InvalidPlace { place, stream });
        }
        let key = (place, stream);

        if let Some(strategy) = self.strategies.read().get(&key) {
            return Ok(strategy.clone());
        }

        let backend = self.backend(place)?;
        let mut strategies = self.strategies.write();
        let strategy = strategies
            .entry(key)
            .or_insert_with(|| {
                trace_event!("registering strategy for {} on {}", place, stream);
                self.build(place, stream, backend)
            })
            .clone();
        Ok(strategy)
    }

    /// Strategy for `(place, stream)` if it was ever created.
    pub fn existing(&self, place: Place, stream: Stream) -> Option<Arc<dyn MemoryStrategy>> {
        self.strategies.read().get(&(place, stream)).cloned()
    }

    fn backend(&self, place: Place) -> Result<Arc<dyn DeviceBackend>> {
        let mut backends = self.backends.lock();
        if let Some(backend) = backends.get(&place) {
            return Ok(backend.clone());
        }
        match self.provider.backend_for(place) {
            Some(backend) if backend.place() != place => {
                drop(backends);
                crate::pa_emit!(PA901, "provider returned a {} backend for {}", backend.place(), place);
                Err(AllocError::InvalidPlace {
                    place,
                    stream: Stream::Default,
                })
            }
            Some(backend) => {
                backends.insert(place, backend.clone());
                Ok(backend)
            }
            None => {
                drop(backends);
                crate::pa_emit!(PA002, "place={}", place);
                Err(AllocError::InvalidPlace {
                    place,
                    stream: Stream::Default,
                })
            }
        }
    }

    fn build(
        &self,
        place: Place,
        stream: Stream,
        backend: Arc<dyn DeviceBackend>,
    ) -> Arc<dyn MemoryStrategy> {
        match place {
            Place::Host => {
                let pool = Box::new(HostPool::new(backend, &self.config));
                self.with_retry(place, pool).into()
            }
            Place::PinnedHost => self.cached_with_retry(place, backend).into(),
            Place::Accelerator(_) | Place::CustomDevice { .. } => Arc::new(StreamSafeAllocator::new(
                self.cached_with_retry(place, backend),
                stream,
            )),
        }
    }

    fn cached_with_retry(&self, place: Place, backend: Arc<dyn DeviceBackend>) -> Box<dyn MemoryStrategy> {
        let caching = Box::new(CachingAllocator::new(backend, &self.config));
        self.with_retry(place, caching)
    }

    /// Wrap `inner` in a [`RetryAllocator`] when retry is enabled.
    ///
    /// Host has a single strategy, so its recovery pass releases only the
    /// pool itself and gets no pressure hook.
    fn with_retry(&self, place: Place, inner: Box<dyn MemoryStrategy>) -> Box<dyn MemoryStrategy> {
        if !self.config.retry_on_oom {
            return inner;
        }

        let siblings = self.config.release_siblings_on_oom && place != Place::Host;
        let pressure = siblings.then(|| {
            let registry = self.this.clone();
            let hook: PressureHook = Arc::new(move || {
                registry
                    .upgrade()
                    .map_or(0, |registry| registry.release_place(place))
            });
            hook
        });
        Box::new(RetryAllocator::new(inner, pressure))
    }

    /// Every registered strategy of `place`.
    fn strategies_of(&self, place: Place) -> Vec<Arc<dyn MemoryStrategy>> {
        self.strategies
            .read()
            .iter()
            .filter(|((p, _), _)| *p == place)
            .map(|(_, strategy)| strategy.clone())
            .collect()
    }

    /// Release cached memory of every strategy on `place`.
    pub fn release_place(&self, place: Place) -> usize {
        self.strategies_of(place)
            .iter()
            .map(|strategy| strategy.release())
            .sum()
    }

    /// Treat `stream` as drained on `place`, then release its strategy.
    pub fn release_stream(&self, place: Place, stream: Stream) -> usize {
        let recycled: usize = self
            .strategies_of(place)
            .iter()
            .map(|strategy| strategy.drain_stream(stream))
            .sum();
        if recycled > 0 {
            trace_event!("{}: {} block(s) recycled draining {}", place, recycled, stream);
        }
        self.existing(place, stream)
            .map_or(0, |strategy| strategy.release())
    }

    /// Release everything on every place.
    pub fn release_all(&self) -> usize {
        let strategies: Vec<_> = self.strategies.read().values().cloned().collect();
        strategies.iter().map(|strategy| strategy.release()).sum()
    }

    /// Drop every strategy and backend. Returns the number of strategies
    /// removed.
    ///
    /// Allocations still alive hold their own strategy, which stays valid
    /// until the last of them is dropped. Later lookups build fresh chains.
    pub fn clear(&self) -> usize {
        let strategies = std::mem::take(&mut *self.strategies.write());
        let backends = std::mem::take(&mut *self.backends.lock());
        let removed = strategies.len();
        trace_event!("registry cleared: {} strategies, {} backends", removed, backends.len());
        drop(strategies);
        drop(backends);
        removed
    }

    /// Snapshot of every strategy's counters, keyed by `(place, stream)`.
    pub fn strategy_stats(&self) -> Vec<(StrategyKey, StrategyStats)> {
        let strategies: Vec<_> = self
            .strategies
            .read()
            .iter()
            .map(|(key, strategy)| (*key, strategy.clone()))
            .collect();
        strategies
            .into_iter()
            .map(|(key, strategy)| (key, strategy.stats()))
            .collect()
    }

    /// Driver counters of `place`, if its backend exists.
    pub fn backend_stats(&self, place: Place) -> Option<BackendStats> {
        self.backends.lock().get(&place).map(|backend| backend.stats())
    }

    /// Places with a backend.
    pub fn places(&self) -> Vec<Place> {
        let mut places: Vec<_> = self.backends.lock().keys().copied().collect();
        places.sort();
        places
    }

    /// Number of registered strategies.
    pub fn len(&self) -> usize {
        self.strategies.read().len()
    }
}
