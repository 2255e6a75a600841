//! Small helpers shared by the allocators.

pub(crate) mod layout;
pub(crate) mod size;
