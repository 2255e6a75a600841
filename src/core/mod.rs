//! Shared state behind the facade.

pub(crate) mod registry;
