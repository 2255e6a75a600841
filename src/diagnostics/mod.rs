//! Coded runtime diagnostics.
//!
//! This module provides:
//! - **Runtime diagnostics**: Allocator-aware messages with codes
//! - **Sinks**: Capture diagnostics on a thread (tests, tooling)
//! - **Strict mode**: Optional panic-on-error for CI
//!
//! ## Diagnostic Codes
//!
//! | Code  | Meaning                        |
//! |-------|--------------------------------|
//! | PA0xx | Allocation issues              |
//! | PA1xx | Stream tracking issues         |
//! | PA2xx | Registry and teardown issues   |
//! | PA9xx | Internal errors                |

pub mod emit;
#[macro_use]
pub mod macros;
pub mod kind;
pub mod strict;

pub use emit::{emit, emit_with_context, suppress_diagnostics, CollectingSink, DiagnosticSink, SinkGuard};
pub use kind::{Diagnostic, DiagnosticKind};
pub use strict::{init_from_env, set_strict_mode, strict_mode, StrictMode, StrictModeGuard};

pub use kind::{PA001, PA002, PA101, PA102, PA103, PA201, PA202, PA901};
