// clasper-core/src/core/adapter.rs
// ============================================================================
// Module: Clasper Adapter Registry Data Model
// Description: Registered adapters, risk classes, and telemetry keys (C11).
// Purpose: Define the data Clasper trusts about each external execution
// runtime, independent of how it is persisted.
// Dependencies: crate::core::{ids, time}, serde
// ============================================================================

//! ## Overview
//! An [`AdapterRegistration`] is the root of trust for everything an adapter
//! later claims: its declared capability set bounds C6's subset check, its
//! risk class feeds C5's base score, and its telemetry key is what C10
//! verifies signed envelopes against.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::ids::AdapterId;
use crate::core::ids::KeyId;
use crate::core::ids::TenantId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Risk Class
// ============================================================================

/// Coarse risk classification assigned to an adapter at registration time.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    /// Low-risk adapter, e.g. a pure LLM caller with no tool access.
    Low,
    /// Medium-risk adapter.
    Medium,
    /// High-risk adapter, e.g. one with filesystem or network tools.
    High,
    /// Critical-risk adapter, e.g. one with credential access.
    Critical,
}

impl RiskClass {
    /// Returns the base risk score contribution for this class per the
    /// additive scoring model (C5): 0 / 15 / 35 / 60.
    #[must_use]
    pub const fn base_score(self) -> u32 {
        match self {
            Self::Low => 0,
            Self::Medium => 15,
            Self::High => 35,
            Self::Critical => 60,
        }
    }
}

// ============================================================================
// SECTION: Telemetry Signature Algorithm
// ============================================================================

/// Signature algorithm declared by a telemetry key.
///
/// # Invariants
/// - Variants are stable for serialization and contract matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum SignatureAlgorithm {
    /// Pure Ed25519 (RFC 8032).
    Ed25519,
    /// ECDSA over P-256 with SHA-256 (ES256, RFC 7518 §3.4).
    Es256,
}

// ============================================================================
// SECTION: Telemetry Key
// ============================================================================

/// A telemetry signing key declared by an adapter at a given version.
///
/// # Invariants
/// - `revoked_at` transitions from `None` to `Some` exactly once.
/// - At most one non-revoked key exists per `(tenant_id, adapter_id, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryKey {
    /// Signature algorithm this key is used with.
    pub algorithm: SignatureAlgorithm,
    /// Public key material in JWK form.
    pub public_jwk: serde_json::Value,
    /// Optional caller-supplied key identifier.
    pub key_id: Option<KeyId>,
    /// When the key was registered.
    pub created_at: Timestamp,
    /// When the key was revoked, if it has been.
    pub revoked_at: Option<Timestamp>,
}

impl TelemetryKey {
    /// Returns whether this key is currently usable for verification.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

// ============================================================================
// SECTION: Adapter Registration
// ============================================================================

/// A tenant's enrollment of a single adapter version.
///
/// # Invariants
/// - `capabilities` bounds every execution request's `requested_capabilities`
///   for this adapter (C6 rejects supersets with `capability_not_declared`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterRegistration {
    /// Tenant that registered this adapter.
    pub tenant_id: TenantId,
    /// Adapter identifier.
    pub adapter_id: AdapterId,
    /// Adapter version string.
    pub version: String,
    /// Human-readable display name.
    pub display_name: String,
    /// Coarse risk classification.
    pub risk_class: RiskClass,
    /// Declared capability set this adapter may be granted from.
    pub capabilities: Vec<String>,
    /// Whether the adapter is currently allowed to request executions.
    pub enabled: bool,
    /// The currently active (non-revoked) telemetry key, if any.
    pub active_key: Option<TelemetryKey>,
}

impl AdapterRegistration {
    /// Returns whether `requested` is a subset of this adapter's declared
    /// capabilities.
    #[must_use]
    pub fn declares_all(&self, requested: &[String]) -> bool {
        requested
            .iter()
            .all(|capability| self.capabilities.contains(capability))
    }
}

#[cfg(test)]
mod tests {
    use super::RiskClass;

    #[test]
    fn base_scores_match_the_additive_model() {
        assert_eq!(RiskClass::Low.base_score(), 0);
        assert_eq!(RiskClass::Medium.base_score(), 15);
        assert_eq!(RiskClass::High.base_score(), 35);
        assert_eq!(RiskClass::Critical.base_score(), 60);
    }
}
