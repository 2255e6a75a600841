//! Debug utilities.
//!
//! Only compiled when the `debug` feature is enabled.

pub mod poison;
