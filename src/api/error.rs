//! Allocation errors.

use std::fmt;

use crate::api::place::Place;
use crate::api::stream::Stream;
use crate::util::size::format_bytes;

/// Errors surfaced by the allocation facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// The request could not be satisfied, even after releasing cached
    /// memory and retrying.
    OutOfMemory {
        /// Place the request was made for.
        place: Place,
        /// Requested size in bytes.
        requested: usize,
    },
    /// The place, or the place/stream combination, is not served.
    InvalidPlace {
        /// Place named by the caller.
        place: Place,
        /// Stream named by the caller.
        stream: Stream,
    },
    /// Malformed caller input.
    InvalidArgument(String),
}

impl AllocError {
    /// Whether the caller may reasonably retry (possibly elsewhere).
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AllocError::OutOfMemory { .. })
    }
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::OutOfMemory { place, requested } => write!(
                f,
                "out of memory on {}: requested {} ({} bytes)",
                place,
                format_bytes(*requested),
                requested
            ),
            AllocError::InvalidPlace { place, stream } => {
                write!(f, "invalid place: {} is not served with {}", place, stream)
            }
            AllocError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
        }
    }
}

impl std::error::Error for AllocError {}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AllocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = AllocError::OutOfMemory {
            place: Place::Accelerator(1),
            requested: 2048,
        };
        let text = err.to_string();
        assert!(text.contains("Accelerator(1)"));
        assert!(text.contains("2048 bytes"));
        assert!(err.is_recoverable());

        let err = AllocError::InvalidPlace {
            place: Place::Host,
            stream: Stream::ordered(Place::Accelerator(0), 4),
        };
        assert!(err.to_string().contains("Accelerator(0)#4"));
        assert!(!err.is_recoverable());
    }
}
