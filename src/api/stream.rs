//! Execution stream identifiers.

use std::fmt;

use crate::api::place::Place;

/// An ordered execution queue, or the synchronous default stream.
///
/// An ordered stream carries the place of its device, so streams of two
/// devices never compare equal even when their queue ids match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Stream {
    /// The null stream: synchronous with the issuing host thread.
    #[default]
    Default,
    /// A device-side ordered queue.
    Ordered {
        /// Device that owns the queue.
        place: Place,
        /// Driver-level queue id.
        queue: u64,
    },
}

impl Stream {
    /// An ordered stream on `place`.
    pub const fn ordered(place: Place, queue: u64) -> Self {
        Stream::Ordered { place, queue }
    }

    /// Whether this is the synchronous default stream.
    pub const fn is_default(&self) -> bool {
        matches!(self, Stream::Default)
    }

    /// The place owning this stream, `None` for the default stream.
    pub const fn place(&self) -> Option<Place> {
        match self {
            Stream::Default => None,
            Stream::Ordered { place, .. } => Some(*place),
        }
    }

    /// Whether this stream may be used with memory on `place`.
    ///
    /// The default stream fits every place; ordered streams only fit their
    /// own stream-capable device.
    pub fn fits(&self, place: Place) -> bool {
        match self {
            Stream::Default => true,
            Stream::Ordered { place: own, .. } => *own == place && place.is_stream_capable(),
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stream::Default => write!(f, "default-stream"),
            Stream::Ordered { place, queue } => write!(f, "{}#{}", place, queue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams_of_different_devices_differ() {
        let a = Stream::ordered(Place::Accelerator(0), 7);
        let b = Stream::ordered(Place::Accelerator(1), 7);
        assert_ne!(a, b);
        assert_eq!(a, Stream::ordered(Place::Accelerator(0), 7));
    }

    #[test]
    fn test_fits() {
        let gpu0 = Place::Accelerator(0);
        let s = Stream::ordered(gpu0, 1);
        assert!(s.fits(gpu0));
        assert!(!s.fits(Place::Accelerator(1)));
        assert!(Stream::Default.fits(Place::Host));
        assert!(!Stream::ordered(Place::Host, 0).fits(Place::Host));
    }
}
