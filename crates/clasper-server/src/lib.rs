// clasper-server/src/lib.rs
// ============================================================================
// Module: Clasper Server Library
// Description: Public API surface for the Clasper HTTP server binary (C14).
// Purpose: Wire C1-C11 (clasper-core), identity/webhook providers
// (clasper-providers), and the SQLite store (clasper-store-sqlite) behind
// handler functions for the six External Interfaces API groups.
// Dependencies: clasper-core, clasper-config, clasper-providers,
// clasper-store-sqlite, axum, axum-server, tokio
// ============================================================================

//! ## Overview
//! `clasper-server` is the deployable binary crate for Clasper: it does not
//! invent governance logic (that lives in `clasper-core`) but composes it
//! behind an HTTP surface, owning TLS/mTLS termination, per-tenant
//! concurrency limits, and process-local diagnostic logging.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod api;
pub mod concurrency;
pub mod diagnostics;
pub mod error;
pub mod server;
pub mod state;
pub mod tls;
pub mod tokens;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use error::ApiError;
pub use server::ClasperServer;
pub use state::AppState;
