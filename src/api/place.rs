//! Memory places.

use std::fmt;

/// A memory domain an allocation lives in.
///
/// Places are small `Copy` values; equality selects the allocator strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Place {
    /// Pageable host memory.
    Host,
    /// Memory of the accelerator with the given device index.
    Accelerator(usize),
    /// Page-locked host memory used for staging transfers.
    PinnedHost,
    /// Memory of a plug-in device type.
    CustomDevice {
        /// Device type name, e.g. `"npu"`.
        kind: &'static str,
        /// Device index within that type.
        index: usize,
    },
}

impl Place {
    /// Shorthand for [`Place::CustomDevice`].
    pub const fn custom(kind: &'static str, index: usize) -> Self {
        Place::CustomDevice { kind, index }
    }

    /// Whether allocations on this place may be accessed asynchronously by
    /// ordered streams and therefore need stream-safety tracking.
    pub const fn is_stream_capable(&self) -> bool {
        matches!(self, Place::Accelerator(_) | Place::CustomDevice { .. })
    }

    /// Whether this place is backed by host memory.
    pub const fn is_host(&self) -> bool {
        matches!(self, Place::Host | Place::PinnedHost)
    }

    /// Device index, if the place names a device.
    pub const fn device_index(&self) -> Option<usize> {
        match self {
            Place::Accelerator(index) | Place::CustomDevice { index, .. } => Some(*index),
            Place::Host | Place::PinnedHost => None,
        }
    }
}

impl Default for Place {
    fn default() -> Self {
        Place::Host
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Place::Host => write!(f, "Host"),
            Place::Accelerator(index) => write!(f, "Accelerator({})", index),
            Place::PinnedHost => write!(f, "PinnedHost"),
            Place::CustomDevice { kind, index } => write!(f, "{}:{}", kind, index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_stream_capability() {
        assert!(!Place::Host.is_stream_capable());
        assert!(!Place::PinnedHost.is_stream_capable());
        assert!(Place::Accelerator(0).is_stream_capable());
        assert!(Place::custom("npu", 1).is_stream_capable());
    }

    #[test]
    fn test_places_hash_by_value() {
        let mut set = HashSet::new();
        set.insert(Place::Accelerator(0));
        set.insert(Place::Accelerator(0));
        set.insert(Place::Accelerator(1));
        set.insert(Place::custom("npu", 0));
        set.insert(Place::custom("mlu", 0));
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_display() {
        assert_eq!(Place::Accelerator(3).to_string(), "Accelerator(3)");
        assert_eq!(Place::custom("npu", 2).to_string(), "npu:2");
        assert_eq!(Place::Host.device_index(), None);
        assert_eq!(Place::custom("npu", 2).device_index(), Some(2));
    }
}
