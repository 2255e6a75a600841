//! Public API for placealloc.
//!
//! This module contains all user-facing types and functions.
//! Most users should only interact with [`AllocatorFacade`](facade::AllocatorFacade)
//! and the handles it returns.

pub mod allocation;
pub mod config;
pub mod error;
pub mod facade;
pub mod lod;
pub mod place;
pub mod stats;
pub mod stream;
