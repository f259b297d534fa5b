// clasper-core/src/core/hashing.rs
// ============================================================================
// Module: Clasper Stable Hash Primitives
// Description: Canonical JSON serialization and SHA-256 hashing (C2).
// Purpose: Provide the single source of truth every integrity chain and
// signature in Clasper builds on.
// Dependencies: serde, serde_jcs, sha2, hex
// ============================================================================

//! ## Overview
//! Every chain in Clasper (audit entries, trace steps, telemetry envelopes,
//! tool token scopes) agrees on one canonicalization rule: RFC 8785-style
//! canonical JSON (object keys sorted at every depth, no insignificant
//! whitespace) hashed with SHA-256. This module is the only place that
//! performs either operation; nothing downstream re-implements hashing.
//!
//! Security posture: hashing underlies every integrity chain; see
//! `Docs/security/threat_model.md`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while canonicalizing a value for hashing.
#[derive(Debug, Error)]
pub enum HashError {
    /// JSON canonicalization failed.
    #[error("failed to canonicalize json: {0}")]
    Canonicalization(String),
}

// ============================================================================
// SECTION: Canonical JSON
// ============================================================================

/// Serializes `value` to canonical JSON bytes per RFC 8785: object keys
/// sorted lexicographically at every depth, no insignificant whitespace,
/// numbers in shortest decimal form, strings per RFC 8259. Arrays preserve
/// order.
///
/// # Errors
/// Returns [`HashError::Canonicalization`] if `value` cannot be serialized.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, HashError> {
    serde_jcs::to_vec(value).map_err(|err| HashError::Canonicalization(err.to_string()))
}

// ============================================================================
// SECTION: SHA-256
// ============================================================================

/// Returns the lowercase hex-encoded SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Canonicalizes `value` and returns the lowercase hex-encoded SHA-256 digest.
///
/// # Errors
/// Returns [`HashError::Canonicalization`] if `value` cannot be canonicalized.
pub fn sha256_json<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    let bytes = canonical_json(value)?;
    Ok(sha256_hex(&bytes))
}

/// Prefixes a hex digest with its algorithm tag: `"sha256:<hex>"`.
#[must_use]
pub fn format_hash(hex_digest: &str) -> String {
    format!("sha256:{hex_digest}")
}

/// Canonicalizes and hashes `value`, returning the `"sha256:<hex>"` form used
/// in every persisted chain field (`entry_hash`, `step_hash`, `payload_hash`).
///
/// # Errors
/// Returns [`HashError::Canonicalization`] if `value` cannot be canonicalized.
pub fn formatted_sha256_json<T: Serialize + ?Sized>(value: &T) -> Result<String, HashError> {
    sha256_json(value).map(|hex_digest| format_hash(&hex_digest))
}
