// clasper-core/src/runtime/mod.rs
// ============================================================================
// Module: Clasper Runtime
// Description: Orchestration services composing core:: data/logic with
// interfaces:: stores into the operations every API surface calls.
// Purpose: Each submodule owns exactly one of the product's components
// (C3, C6, C7, C8, C9, C10), so policy/role/chain rules are enforced in one
// place rather than re-derived at every caller.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! `runtime` is the composition layer: it never invents its own data model
//! (that lives in `core`) or storage contract (that lives in `interfaces`).
//! Each service here wires a handful of stores together behind the one
//! entry point its component exposes, so the HTTP server, CLI, and tests
//! all call through the same decision/approval/audit/trace/token/ingest
//! logic.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod approval_queue;
pub mod audit_log;
pub mod decision_orchestrator;
pub mod telemetry_ingest;
pub mod tool_token_service;
pub mod trace_store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use approval_queue::ApprovalQueueService;
pub use approval_queue::ApprovalServiceError;
pub use audit_log::AuditLogService;
pub use audit_log::AuditServiceError;
pub use decision_orchestrator::DecisionError;
pub use decision_orchestrator::DecisionOrchestrator;
pub use decision_orchestrator::DecisionOrchestratorConfig;
pub use telemetry_ingest::EnforcementMode;
pub use telemetry_ingest::TelemetryIngestError;
pub use telemetry_ingest::TelemetryIngestService;
pub use telemetry_ingest::TelemetrySinkError;
pub use telemetry_ingest::TelemetrySinks;
pub use tool_token_service::ToolTokenService;
pub use tool_token_service::ToolTokenServiceError;
pub use trace_store::TraceServiceError;
pub use trace_store::TraceStoreService;
