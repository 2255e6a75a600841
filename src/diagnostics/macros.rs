//! Diagnostic macros.

/// Emit a predefined diagnostic, optionally with formatted context.
///
/// # Example
///
/// ```rust,ignore
/// pa_emit!(PA202);
/// pa_emit!(PA001, "place={} requested={}", place, size);
/// ```
#[macro_export]
macro_rules! pa_emit {
    ($code:ident) => {{
        $crate::diagnostics::emit::emit(&$crate::diagnostics::$code);
    }};
    ($code:ident, $($arg:tt)+) => {{
        $crate::diagnostics::emit::emit_with_context(
            &$crate::diagnostics::$code,
            &::std::format!($($arg)+),
        );
    }};
}

/// Internal event tracing. Forwards to `log::debug!` with the `log`
/// feature and compiles to nothing otherwise.
macro_rules! trace_event {
    ($($arg:tt)+) => {{
        #[cfg(feature = "log")]
        {
            log::debug!(target: "placealloc", $($arg)+);
        }
    }};
}

pub(crate) use trace_event;
