//! # placealloc
//!
//! Place- and stream-aware memory allocation for tensor runtimes.
//!
//! ## Features
//!
//! - One facade for host, pinned-host, accelerator and custom-device memory
//! - Per-place strategies: size-class host pool, bucketed caching allocator
//! - Out-of-memory recovery that releases caches of the whole place
//! - Stream safety: memory dropped while a stream still uses it is parked
//!   until that stream is erased
//! - Exclusive ([`Allocation`]) and shared ([`SharedAllocation`]) ownership
//! - Pluggable device backends through [`BackendProvider`]
//! - Coded diagnostics with strict mode
//!
//! ## Quick Start
//!
//! ```rust
//! use placealloc::{AllocConfig, AllocatorFacade, Place, Stream};
//!
//! let facade = AllocatorFacade::new(AllocConfig::minimal());
//!
//! let host = facade.alloc(Place::Host, 256).unwrap();
//! assert_eq!(host.size(), 256);
//!
//! let gpu = Place::Accelerator(0);
//! let compute = Stream::ordered(gpu, 0);
//! let activations = facade.alloc_on(gpu, 1 << 20, compute).unwrap();
//! assert!(facade.in_same_stream(&activations, compute));
//!
//! drop(activations);
//! facade.release_stream(gpu, compute);
//! ```
//!
//! ## Cargo Features
//!
//! - `parking_lot`: faster locks
//! - `log`: route diagnostics and internal events to the `log` crate
//! - `diagnostics`: print diagnostics to stderr in release builds
//! - `debug`: poison freed memory

pub mod api;
pub mod diagnostics;

mod allocators;
mod core;
mod sync;
mod util;

#[cfg(feature = "debug")]
pub mod debug;

// Re-export public API at crate root for convenience
pub use api::allocation::{Allocation, AllocationId, AllocationKey, SharedAllocation};
pub use api::config::AllocConfig;
pub use api::error::{AllocError, Result};
pub use api::facade::AllocatorFacade;
pub use api::place::Place;
pub use api::stats::{AllocStats, PlaceStats};
pub use api::stream::Stream;

// LoD reset
pub use api::lod::{lod_reset, lod_reset_grad, LodTensor, TargetLod};

// Backends
pub use allocators::backend::{BackendProvider, BackendStats, DeviceBackend, SimulatedTopology, SystemMemory};
pub use allocators::StrategyStats;

// Diagnostics - Core types and predefined codes
pub use diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink, CollectingSink, SinkGuard};
pub use diagnostics::{StrictMode, set_strict_mode, StrictModeGuard};
pub use diagnostics::{PA001, PA002, PA101, PA102, PA103, PA201, PA202, PA901};

// Size helpers
pub use util::size::{format_bytes, gb, kb, mb, parse_size};
