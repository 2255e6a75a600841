//! Device backends: where strategies get raw memory from.
//!
//! A backend stands in for a device driver (`cudaMalloc`/`cudaFree` and
//! friends). Every call into a backend is a "driver call"; strategies exist
//! to make those rare.

use std::alloc::{alloc, dealloc};
use std::ptr::NonNull;
use std::sync::Arc;

use crate::api::config::AllocConfig;
use crate::api::place::Place;
use crate::sync::atomics::{AtomicCounter, ByteGauge};
use crate::util::layout::block_layout;

/// Driver-level counters of one backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Capacity in bytes (0 = unlimited).
    pub capacity: usize,
    /// Bytes currently obtained from the driver.
    pub in_use: usize,
    /// Highest `in_use` observed.
    pub peak: usize,
    /// Successful allocation calls.
    pub alloc_calls: u64,
    /// Free calls.
    pub free_calls: u64,
    /// Allocation calls the driver refused.
    pub failed_calls: u64,
}

/// Raw memory source for one place.
pub trait DeviceBackend: Send + Sync {
    /// Place whose memory this backend manages.
    fn place(&self) -> Place;

    /// Obtain `size` bytes from the driver. `None` means out of memory.
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// Return a region to the driver.
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this backend with the same `size`
    /// and must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, size: usize);

    /// Driver-level counters.
    fn stats(&self) -> BackendStats;
}

/// Backend over the system allocator with an optional capacity.
///
/// Used for host and pinned memory, and as a simulated accelerator when
/// given a capacity.
pub struct SystemMemory {
    place: Place,
    capacity: usize,
    alignment: usize,
    in_use: ByteGauge,
    alloc_calls: AtomicCounter,
    free_calls: AtomicCounter,
    failed_calls: AtomicCounter,
}

impl SystemMemory {
    /// Create a backend for `place`. A `capacity` of 0 means unlimited.
    pub fn new(place: Place, capacity: usize, alignment: usize) -> Self {
        Self {
            place,
            capacity,
            alignment,
            in_use: ByteGauge::new(),
            alloc_calls: AtomicCounter::new(0),
            free_calls: AtomicCounter::new(0),
            failed_calls: AtomicCounter::new(0),
        }
    }
}

impl DeviceBackend for SystemMemory {
    fn place(&self) -> Place {
        self.place
    }

    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let Some(layout) = block_layout(size, self.alignment) else {
            self.failed_calls.increment();
            return None;
        };
        if !self.in_use.try_add(size, self.capacity) {
            self.failed_calls.increment();
            return None;
        }

        // SAFETY: layout has a non-zero size.
        let ptr = unsafe { alloc(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => {
                self.alloc_calls.increment();
                Some(ptr)
            }
            None => {
                self.in_use.sub(size);
                self.failed_calls.increment();
                None
            }
        }
    }

    unsafe fn free(&self, ptr: NonNull<u8>, size: usize) {
        if let Some(layout) = block_layout(size, self.alignment) {
            dealloc(ptr.as_ptr(), layout);
            self.in_use.sub(size);
            self.free_calls.increment();
        }
    }

    fn stats(&self) -> BackendStats {
        BackendStats {
            capacity: self.capacity,
            in_use: self.in_use.get(),
            peak: self.in_use.peak(),
            alloc_calls: self.alloc_calls.get(),
            free_calls: self.free_calls.get(),
            failed_calls: self.failed_calls.get(),
        }
    }
}

/// Decides which places exist and creates their backends.
///
/// Places without a backend are rejected with `InvalidPlace`; a build
/// without accelerators simply provides none.
pub trait BackendProvider: Send + Sync {
    /// Backend for `place`, or `None` if the place is not supported.
    fn backend_for(&self, place: Place) -> Option<Arc<dyn DeviceBackend>>;
}

impl<F> BackendProvider for F
where
    F: Fn(Place) -> Option<Arc<dyn DeviceBackend>> + Send + Sync,
{
    fn backend_for(&self, place: Place) -> Option<Arc<dyn DeviceBackend>> {
        self(place)
    }
}

/// Default provider: host memory plus capacity-limited simulated devices as
/// described by an [`AllocConfig`].
#[derive(Debug, Clone)]
pub struct SimulatedTopology {
    config: AllocConfig,
}

impl SimulatedTopology {
    /// Topology described by `config`.
    pub fn new(config: AllocConfig) -> Self {
        Self { config }
    }

    /// Whether `place` exists in this topology.
    pub fn supports(&self, place: Place) -> bool {
        match place {
            Place::Host | Place::PinnedHost => true,
            Place::Accelerator(index) => index < self.config.accelerator_count,
            Place::CustomDevice { kind, index } => self
                .config
                .custom_devices
                .iter()
                .any(|&(k, count)| k == kind && index < count),
        }
    }
}

impl BackendProvider for SimulatedTopology {
    fn backend_for(&self, place: Place) -> Option<Arc<dyn DeviceBackend>> {
        if !self.supports(place) {
            return None;
        }
        let capacity = match place {
            Place::Host => self.config.host_memory_limit,
            Place::PinnedHost => self.config.pinned_memory_limit,
            Place::Accelerator(_) | Place::CustomDevice { .. } => self.config.device_capacity,
        };
        Some(Arc::new(SystemMemory::new(place, capacity, self.config.alignment)))
    }
}
