// clasper-server/src/diagnostics.rs
// ============================================================================
// Module: Process Diagnostics
// Description: Structured, process-local logging of request handling, as
// distinct from the tenant-scoped, hash-chained audit log owned by
// clasper-core's AuditLogService.
// Purpose: Give operators stderr/file visibility into request outcomes and
// latency without conflating that with the tamper-evident tenant audit
// trail, which only ever records governance events (decisions, approvals,
// telemetry ingests).
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! [`DiagnosticEvent`] is a single request's outcome summary. [`DiagnosticSink`]
//! is implemented by [`StderrDiagnosticSink`], [`FileDiagnosticSink`], and
//! [`NoopDiagnosticSink`], mirroring a stderr/file/no-op trio so deployments
//! can route process diagnostics to whichever pipeline they already run,
//! without requiring a full logging framework dependency.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::Serialize;

// ============================================================================
// SECTION: Event
// ============================================================================

/// One request's outcome, emitted after the handler completes.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEvent {
    /// Request path, e.g. `/v1/decisions`.
    pub route: &'static str,
    /// HTTP method.
    pub method: &'static str,
    /// Authenticated tenant, when known.
    pub tenant_id: Option<String>,
    /// Resulting HTTP status code.
    pub status: u16,
    /// Stable error kind, when the request failed.
    pub error_kind: Option<&'static str>,
    /// Request handling latency in milliseconds.
    pub latency_ms: u64,
}

// ============================================================================
// SECTION: Sink Trait
// ============================================================================

/// Destination for [`DiagnosticEvent`]s.
pub trait DiagnosticSink: Send + Sync {
    /// Records one request's outcome.
    fn record(&self, event: &DiagnosticEvent);
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Writes one JSON line per event to stderr.
pub struct StderrDiagnosticSink;

impl DiagnosticSink for StderrDiagnosticSink {
    fn record(&self, event: &DiagnosticEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(std::io::stderr(), "{payload}");
        }
    }
}

/// Writes one JSON line per event, appended to a file.
pub struct FileDiagnosticSink {
    /// Append-mode file handle, guarded so concurrent handlers serialize writes.
    file: Mutex<std::fs::File>,
}

impl FileDiagnosticSink {
    /// Opens `path` for append, creating it if necessary.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened for append.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file: Mutex::new(file) })
    }
}

impl DiagnosticSink for FileDiagnosticSink {
    fn record(&self, event: &DiagnosticEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// Discards every event.
pub struct NoopDiagnosticSink;

impl DiagnosticSink for NoopDiagnosticSink {
    fn record(&self, _event: &DiagnosticEvent) {}
}
