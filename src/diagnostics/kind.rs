//! Diagnostic kinds, the diagnostic type and the predefined codes.
//!
//! Mirrors rustc's diagnostic levels for familiar UX.

/// The severity level of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A hard error - something is definitely wrong.
    Error,
    /// A warning - something is probably wrong or suboptimal.
    Warning,
    /// Informational context, never fatal.
    Note,
}

impl DiagnosticKind {
    /// Get the display prefix for this kind.
    pub fn prefix(&self) -> &'static str {
        match self {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Warning => "warning",
            DiagnosticKind::Note => "note",
        }
    }
}

/// A diagnostic message with code, message, and optional context.
///
/// Diagnostic codes follow the pattern:
/// - `PA0xx` - Allocation issues
/// - `PA1xx` - Stream tracking issues
/// - `PA2xx` - Registry and teardown issues
/// - `PA9xx` - Internal errors
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// Severity level.
    pub kind: DiagnosticKind,
    /// Diagnostic code (e.g., "PA001").
    pub code: &'static str,
    /// Primary message.
    pub message: &'static str,
    /// Optional additional context.
    pub note: Option<&'static str>,
    /// Optional fix suggestion.
    pub help: Option<&'static str>,
}

impl Diagnostic {
    /// Create a new error diagnostic.
    pub const fn error(code: &'static str, message: &'static str) -> Self {
        Self::with_kind(DiagnosticKind::Error, code, message)
    }

    /// Create a new warning diagnostic.
    pub const fn warning(code: &'static str, message: &'static str) -> Self {
        Self::with_kind(DiagnosticKind::Warning, code, message)
    }

    /// Create a new note diagnostic.
    pub const fn note(code: &'static str, message: &'static str) -> Self {
        Self::with_kind(DiagnosticKind::Note, code, message)
    }

    const fn with_kind(kind: DiagnosticKind, code: &'static str, message: &'static str) -> Self {
        Self {
            kind,
            code,
            message,
            note: None,
            help: None,
        }
    }

    /// Add a note to this diagnostic.
    pub const fn with_note(mut self, note: &'static str) -> Self {
        self.note = Some(note);
        self
    }

    /// Add a help message to this diagnostic.
    pub const fn with_help(mut self, help: &'static str) -> Self {
        self.help = Some(help);
        self
    }
}

// =============================================================================
// Predefined diagnostics (PA0xx - Allocation)
// =============================================================================

/// PA001: Allocation failed even after cached memory was released.
pub const PA001: Diagnostic = Diagnostic::warning(
    "PA001",
    "out of memory after releasing cached blocks"
).with_note("the place's backend refused the request and the recovery pass reclaimed too little")
 .with_help("free long-lived allocations, call release() on sibling places, or raise the device capacity");

/// PA002: Allocation requested on a place nobody serves.
pub const PA002: Diagnostic = Diagnostic::error(
    "PA002",
    "allocation requested on an unsupported place or place/stream pair"
).with_note("the backend provider has no backend for this place, or the stream belongs to another place")
 .with_help("check AllocConfig::accelerator_count / custom_devices, and pass streams created for the same place");

// =============================================================================
// Predefined diagnostics (PA1xx - Stream tracking)
// =============================================================================

/// PA101: EraseStream for a stream that was never recorded.
pub const PA101: Diagnostic = Diagnostic::note(
    "PA101",
    "erase_stream called for a stream that is not recorded on this allocation"
).with_note("the call is ignored and the recorded set is left unchanged");

/// PA102: RecordStream on a synchronous place.
pub const PA102: Diagnostic = Diagnostic::note(
    "PA102",
    "record_stream on a place without stream support"
).with_note("host and pinned-host memory is released synchronously; nothing is tracked")
 .with_help("synchronize the consuming stream before dropping the allocation");

/// PA103: RecordStream with a stream owned by another place.
pub const PA103: Diagnostic = Diagnostic::warning(
    "PA103",
    "record_stream with a stream that belongs to a different place"
).with_note("streams are only meaningful on the device that created them")
 .with_help("copy the data to the stream's device instead of sharing the allocation");

// =============================================================================
// Predefined diagnostics (PA2xx - Registry / teardown)
// =============================================================================

/// PA201: Teardown with stream-deferred frees still pending.
pub const PA201: Diagnostic = Diagnostic::warning(
    "PA201",
    "teardown with stream-deferred allocations still pending"
).with_note("these allocations were dropped but some recorded stream was never erased")
 .with_help("call erase_stream() or release_stream() once each stream has drained");

/// PA202: Teardown while allocations are still alive.
pub const PA202: Diagnostic = Diagnostic::warning(
    "PA202",
    "teardown with live allocations outstanding"
).with_note("their memory is returned when the last owner drops")
 .with_help("drop every Allocation/SharedAllocation before tearing the facade down");

// =============================================================================
// Predefined diagnostics (PA9xx - Internal)
// =============================================================================

/// PA901: Internal allocator error.
pub const PA901: Diagnostic = Diagnostic::error(
    "PA901",
    "internal allocator error"
).with_note("the backend provider returned a backend for a different place than requested")
 .with_help("please report this issue at the placealloc repository");
