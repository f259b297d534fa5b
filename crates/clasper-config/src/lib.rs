// clasper-config/src/lib.rs
// ============================================================================
// Module: Clasper Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for Clasper's environment and overlay-file
// configuration semantics.
// Dependencies: clasper-store-sqlite, serde, toml, thiserror
// ============================================================================

//! ## Overview
//! `clasper-config` defines [`config::ClasperConfig`], assembled from
//! environment variables with an optional non-secret TOML overlay file.
//! Validation happens once at startup and reports every problem found, not
//! just the first.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ClasperConfig;
pub use config::ConfigError;
pub use config::DevConfig;
pub use config::EnforcementMode;
pub use config::IdentityConfig;
pub use config::TlsConfig;
pub use examples::config_toml_example;
