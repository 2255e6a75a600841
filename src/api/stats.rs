//! Allocation statistics.

use std::fmt;

use crate::allocators::backend::BackendStats;
use crate::allocators::StrategyStats;
use crate::api::place::Place;
use crate::util::size::format_bytes;

/// Counters of one place: its backend plus all of its strategies combined.
#[derive(Debug, Clone)]
pub struct PlaceStats {
    /// The place.
    pub place: Place,

    /// Driver-level counters.
    pub backend: BackendStats,

    /// Sum over every `(place, stream)` strategy of this place.
    pub strategies: StrategyStats,

    /// Number of registered strategies.
    pub strategy_count: usize,
}

impl PlaceStats {
    /// Allocations handed out and not yet returned to a pool.
    pub fn active_allocations(&self) -> u64 {
        self.strategies.live_blocks()
    }

    /// Fraction of driver memory sitting idle in caches.
    pub fn cache_ratio(&self) -> f64 {
        if self.backend.in_use == 0 {
            return 0.0;
        }
        self.strategies.cached_bytes as f64 / self.backend.in_use as f64
    }
}

/// Aggregated allocation statistics across all places.
#[derive(Debug, Clone, Default)]
pub struct AllocStats {
    /// Per-place counters, ordered by place.
    pub places: Vec<PlaceStats>,
}

impl AllocStats {
    /// Create empty stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters of `place`, if it has been touched.
    pub fn place(&self, place: Place) -> Option<&PlaceStats> {
        self.places.iter().find(|stats| stats.place == place)
    }

    /// Bytes handed out to callers, summed over all places.
    pub fn in_use_bytes(&self) -> usize {
        self.places.iter().map(|p| p.strategies.in_use_bytes).sum()
    }

    /// Bytes cached in free pools, summed over all places.
    pub fn cached_bytes(&self) -> usize {
        self.places.iter().map(|p| p.strategies.cached_bytes).sum()
    }

    /// Bytes currently obtained from drivers.
    pub fn reserved_bytes(&self) -> usize {
        self.places.iter().map(|p| p.backend.in_use).sum()
    }

    /// Allocation calls made into drivers.
    pub fn driver_allocations(&self) -> u64 {
        self.places.iter().map(|p| p.backend.alloc_calls).sum()
    }

    /// Blocks waiting on recorded streams.
    pub fn deferred_blocks(&self) -> usize {
        self.places.iter().map(|p| p.strategies.deferred_blocks).sum()
    }

    /// Allocations handed out and not yet returned to a pool.
    pub fn active_allocations(&self) -> u64 {
        self.places.iter().map(PlaceStats::active_allocations).sum()
    }
}

impl fmt::Display for AllocStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Allocation Statistics:")?;
        writeln!(f, "  In use:   {}", format_bytes(self.in_use_bytes()))?;
        writeln!(f, "  Cached:   {}", format_bytes(self.cached_bytes()))?;
        writeln!(f, "  Reserved: {}", format_bytes(self.reserved_bytes()))?;
        writeln!(f, "  Active:   {}", self.active_allocations())?;
        writeln!(f, "  Deferred: {}", self.deferred_blocks())?;
        for place in &self.places {
            writeln!(
                f,
                "  {}: {} in use, {} cached, peak {}, {} driver allocs, {} strategies",
                place.place,
                format_bytes(place.strategies.in_use_bytes),
                format_bytes(place.strategies.cached_bytes),
                format_bytes(place.backend.peak),
                place.backend.alloc_calls,
                place.strategy_count
            )?;
        }
        Ok(())
    }
}
