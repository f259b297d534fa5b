// clasper-store-sqlite/src/lib.rs
// ============================================================================
// Module: Clasper SQLite Store
// Description: Durable storage backend using SQLite WAL.
// Purpose: Provide production-grade persistence for every clasper-core
// interfaces:: contract behind a single connection.
// Dependencies: clasper-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a `SQLite`-backed implementation of every storage
//! contract in `clasper_core::interfaces`, plus the runtime's
//! `TelemetrySinks` trait. All tables live in one database file guarded by
//! one connection, so the per-tenant audit sequence lock and the tool-token/
//! decision compare-and-swap transitions share the same critical section
//! discipline.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::ClasperSqliteStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
