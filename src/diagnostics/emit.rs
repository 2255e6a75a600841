//! Diagnostic emission backend.
//!
//! Handles outputting diagnostics to stderr, the `log` crate, or a
//! thread-scoped custom sink.

use std::cell::RefCell;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::kind::{Diagnostic, DiagnosticKind};
use super::strict::{should_panic, should_panic_on_warning};

/// Global flag to suppress diagnostic output (for testing).
static DIAGNOSTICS_SUPPRESSED: AtomicBool = AtomicBool::new(false);

thread_local! {
    static SINK: RefCell<Option<Arc<dyn DiagnosticSink>>> = const { RefCell::new(None) };
}

/// Suppress all diagnostic output.
pub fn suppress_diagnostics(suppress: bool) {
    DIAGNOSTICS_SUPPRESSED.store(suppress, Ordering::Relaxed);
}

/// Check if diagnostics are suppressed.
pub fn is_suppressed() -> bool {
    DIAGNOSTICS_SUPPRESSED.load(Ordering::Relaxed)
}

/// Emit a diagnostic.
///
/// A sink installed on the current thread always receives it. Otherwise the
/// diagnostic goes to the `log` crate when the `log` feature is on, or to
/// stderr in debug builds and with the `diagnostics` feature.
pub fn emit(diag: &Diagnostic) {
    emit_inner(diag, None);
}

/// Emit a diagnostic with additional runtime context.
pub fn emit_with_context(diag: &Diagnostic, context: &str) {
    emit_inner(diag, Some(context));
}

fn emit_inner(diag: &Diagnostic, context: Option<&str>) {
    let delivered = SINK.with(|sink| match sink.borrow().as_ref() {
        Some(sink) => {
            sink.emit(diag, context);
            true
        }
        None => false,
    });

    if !delivered && !is_suppressed() {
        #[cfg(feature = "log")]
        emit_to_log(diag, context);

        #[cfg(all(not(feature = "log"), any(debug_assertions, feature = "diagnostics")))]
        emit_to_stderr(diag, context);
    }

    let fatal = match diag.kind {
        DiagnosticKind::Error => should_panic(),
        DiagnosticKind::Warning => should_panic_on_warning(),
        DiagnosticKind::Note => false,
    };
    if fatal {
        panic!(
            "[placealloc][{}] {}\nContext: {}\nStrict mode enabled - diagnostics are fatal.",
            diag.code,
            diag.message,
            context.unwrap_or("none")
        );
    }
}

/// Internal: emit to stderr.
#[cfg(all(not(feature = "log"), any(debug_assertions, feature = "diagnostics")))]
fn emit_to_stderr(diag: &Diagnostic, context: Option<&str>) {
    let mut stderr = std::io::stderr().lock();

    let _ = writeln!(
        stderr,
        "[placealloc][{}] {}: {}",
        diag.code,
        diag.kind.prefix(),
        diag.message
    );
    if let Some(context) = context {
        let _ = writeln!(stderr, "  context: {}", context);
    }
    if let Some(note) = diag.note {
        let _ = writeln!(stderr, "  note: {}", note);
    }
    if let Some(help) = diag.help {
        let _ = writeln!(stderr, "  help: {}", help);
    }
    let _ = writeln!(stderr);
}

/// Emit a diagnostic using the log crate.
#[cfg(feature = "log")]
fn emit_to_log(diag: &Diagnostic, context: Option<&str>) {
    let context = context.unwrap_or("-");
    match diag.kind {
        DiagnosticKind::Error => log::error!("[{}] {} ({})", diag.code, diag.message, context),
        DiagnosticKind::Warning => log::warn!("[{}] {} ({})", diag.code, diag.message, context),
        DiagnosticKind::Note => log::info!("[{}] {} ({})", diag.code, diag.message, context),
    }
    if let Some(note) = diag.note {
        log::debug!("  note: {}", note);
    }
    if let Some(help) = diag.help {
        log::debug!("  help: {}", help);
    }
}

/// A diagnostic sink trait for custom output.
pub trait DiagnosticSink: Send + Sync {
    /// Handle a diagnostic and its runtime context, if any.
    fn emit(&self, diag: &Diagnostic, context: Option<&str>);
}

/// Routes diagnostics emitted on the current thread to `sink` until dropped.
pub struct SinkGuard {
    previous: Option<Arc<dyn DiagnosticSink>>,
}

impl SinkGuard {
    /// Install `sink` for the current thread.
    pub fn install(sink: Arc<dyn DiagnosticSink>) -> Self {
        let previous = SINK.with(|slot| slot.borrow_mut().replace(sink));
        Self { previous }
    }
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        SINK.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// A simple sink that collects diagnostic codes and their context.
#[derive(Default)]
pub struct CollectingSink {
    diagnostics: std::sync::Mutex<Vec<(Diagnostic, Option<String>)>>,
}

impl CollectingSink {
    /// Create a new collecting sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected diagnostics.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.entries().into_iter().map(|(d, _)| d).collect()
    }

    /// Get all collected diagnostics with their runtime context.
    pub fn entries(&self) -> Vec<(Diagnostic, Option<String>)> {
        match self.diagnostics.lock() {
            Ok(list) => list.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Codes of every collected diagnostic, in emission order.
    pub fn codes(&self) -> Vec<&'static str> {
        self.diagnostics().iter().map(|d| d.code).collect()
    }

    /// Clear collected diagnostics.
    pub fn clear(&self) {
        if let Ok(mut list) = self.diagnostics.lock() {
            list.clear();
        }
    }

    /// Check if any errors were collected.
    pub fn has_errors(&self) -> bool {
        self.diagnostics()
            .iter()
            .any(|d| d.kind == DiagnosticKind::Error)
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diag: &Diagnostic, context: Option<&str>) {
        if let Ok(mut list) = self.diagnostics.lock() {
            list.push((diag.clone(), context.map(str::to_owned)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::kind::{PA101, PA102};

    #[test]
    fn test_collecting_sink() {
        let sink = Arc::new(CollectingSink::new());
        {
            let _guard = SinkGuard::install(sink.clone());
            emit(&PA102);
            emit_with_context(&PA101, "stream 3");
        }
        // Not collected: the guard is gone.
        emit(&PA101);

        assert_eq!(sink.codes(), vec!["PA102", "PA101"]);
        assert!(!sink.has_errors());
        assert_eq!(sink.entries()[1].1.as_deref(), Some("stream 3"));

        sink.clear();
        assert!(sink.diagnostics().is_empty());
    }

    #[test]
    fn test_suppression() {
        suppress_diagnostics(true);
        assert!(is_suppressed());
        suppress_diagnostics(false);
        assert!(!is_suppressed());
    }
}
