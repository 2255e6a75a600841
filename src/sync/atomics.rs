//! Atomic helpers for statistics and counters.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// An atomic counter for statistics.
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    /// Create a new counter.
    pub const fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    /// Increment the counter.
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for AtomicCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

/// A byte gauge with a high-water mark.
pub struct ByteGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ByteGauge {
    /// Create an empty gauge.
    pub const fn new() -> Self {
        Self {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Add bytes, raising the peak if needed. Returns the new value.
    pub fn add(&self, bytes: usize) -> usize {
        let now = self.current.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let mut peak = self.peak.load(Ordering::Relaxed);
        while now > peak {
            match self
                .peak
                .compare_exchange_weak(peak, now, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(p) => peak = p,
            }
        }
        now
    }

    /// Add bytes only if the result stays within `limit` (0 = unlimited).
    pub fn try_add(&self, bytes: usize, limit: usize) -> bool {
        if limit == 0 {
            self.add(bytes);
            return true;
        }
        let mut current = self.current.load(Ordering::Relaxed);
        loop {
            let next = match current.checked_add(bytes) {
                Some(next) if next <= limit => next,
                _ => return false,
            };
            match self
                .current
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => {
                    self.peak.fetch_max(next, Ordering::Relaxed);
                    return true;
                }
                Err(c) => current = c,
            }
        }
    }

    /// Subtract bytes. Returns the new value.
    pub fn sub(&self, bytes: usize) -> usize {
        self.current.fetch_sub(bytes, Ordering::Relaxed) - bytes
    }

    /// Current value.
    pub fn get(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Highest value observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

impl Default for ByteGauge {
    fn default() -> Self {
        Self::new()
    }
}
