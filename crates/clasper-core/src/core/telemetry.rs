// clasper-core/src/core/telemetry.rs
// ============================================================================
// Module: Clasper Signed Telemetry Envelope Data Model & Verification
// Description: Wire-form envelope shape plus the pure signature/freshness/
// payload-hash verification pipeline (C10).
// Purpose: Everything an adapter posts after execution — traces, audit
// events, cost, metrics, violations — arrives wrapped in one of these
// envelopes; this module defines the shape and the checks independent of
// where the verified payload is ultimately dispatched.
// Dependencies: crate::core::{adapter, hashing, ids, time}, ed25519-dalek,
// p256, base64, serde
// ============================================================================

//! ## Overview
//! [`verify_envelope`] runs the five ordered checks from the product
//! specification: schema/shape (handled by deserialization itself),
//! key lookup (the caller supplies the active [`TelemetryKey`]), payload
//! hash recomputation, timestamp skew, and signature verification. It does
//! not short-circuit key lookup into this module — the caller resolves the
//! key from the adapter registry and passes it in, keeping this module a
//! pure function of its inputs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::Signature as EdSignature;
use ed25519_dalek::Verifier as _;
use ed25519_dalek::VerifyingKey as EdVerifyingKey;
use p256::ecdsa::Signature as EsSignature;
use p256::ecdsa::VerifyingKey as EsVerifyingKey;
use p256::ecdsa::signature::Verifier as _;
use serde::Deserialize;
use serde::Serialize;

use crate::core::adapter::SignatureAlgorithm;
use crate::core::adapter::TelemetryKey;
use crate::core::hashing::canonical_json;
use crate::core::hashing::formatted_sha256_json;
use crate::core::ids::AdapterId;
use crate::core::ids::ExecutionId;
use crate::core::ids::TraceId;
use crate::core::time::Timestamp;

/// The only envelope wire-format version this crate understands.
pub const ENVELOPE_VERSION: &str = "v1";

/// Default maximum allowed clock skew between `issued_at` and server time,
/// in seconds.
pub const DEFAULT_MAX_SKEW_SECONDS: i64 = 300;

// ============================================================================
// SECTION: Payload Type
// ============================================================================

/// What kind of payload a [`SignedTelemetryEnvelope`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadType {
    /// An execution trace (C9).
    Trace,
    /// An audit event (C8), recorded with `actor = "adapter:<adapter_id>"`.
    Audit,
    /// A cost report.
    Cost,
    /// A metrics report.
    Metrics,
    /// A reported policy or safety violation.
    Violations,
}

// ============================================================================
// SECTION: Envelope
// ============================================================================

/// The wire form of a signed telemetry submission.
///
/// # Invariants
/// - `envelope_version` is always [`ENVELOPE_VERSION`].
/// - `payload_hash` equals `format_hash(sha256(canonical_json(payload)))`.
/// - `signature` is over the canonical JSON of every field except `payload`
///   and `signature` itself (see [`signing_input`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTelemetryEnvelope {
    /// Wire format version; must equal [`ENVELOPE_VERSION`].
    pub envelope_version: String,
    /// Adapter that produced this envelope.
    pub adapter_id: AdapterId,
    /// Adapter version that produced this envelope.
    pub adapter_version: String,
    /// When the adapter signed this envelope.
    pub issued_at: Timestamp,
    /// Execution this telemetry concerns.
    pub execution_id: ExecutionId,
    /// Trace this telemetry concerns.
    pub trace_id: TraceId,
    /// What kind of payload this envelope carries.
    pub payload_type: PayloadType,
    /// The payload itself.
    pub payload: serde_json::Value,
    /// `"sha256:" || hex(SHA-256(canonical_json(payload)))`.
    pub payload_hash: String,
    /// Base64url (no padding) signature over [`signing_input`].
    pub signature: String,
}

/// The canonical projection that gets signed: every envelope field except
/// `payload` and `signature`.
#[derive(Debug, Clone, Serialize)]
struct SigningInput<'a> {
    envelope_version: &'a str,
    adapter_id: &'a AdapterId,
    adapter_version: &'a str,
    issued_at: Timestamp,
    execution_id: &'a ExecutionId,
    trace_id: &'a TraceId,
    payload_type: PayloadType,
    payload_hash: &'a str,
}

/// Builds the exact byte sequence a telemetry key signs over.
///
/// # Errors
/// Returns [`TelemetryError::Hashing`] if canonicalization fails.
pub fn signing_input(envelope: &SignedTelemetryEnvelope) -> Result<Vec<u8>, TelemetryError> {
    let input = SigningInput {
        envelope_version: &envelope.envelope_version,
        adapter_id: &envelope.adapter_id,
        adapter_version: &envelope.adapter_version,
        issued_at: envelope.issued_at,
        execution_id: &envelope.execution_id,
        trace_id: &envelope.trace_id,
        payload_type: envelope.payload_type,
        payload_hash: &envelope.payload_hash,
    };
    canonical_json(&input).map_err(TelemetryError::Hashing)
}

// ============================================================================
// SECTION: Verification
// ============================================================================

/// Why [`verify_envelope`] rejected an envelope.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// `envelope_version` was not [`ENVELOPE_VERSION`].
    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(String),
    /// Canonicalization or hashing of `payload` or the signing input failed.
    #[error("hashing failed: {0}")]
    Hashing(#[from] crate::core::hashing::HashError),
    /// Recomputed `payload_hash` did not match the declared one.
    #[error("payload hash mismatch")]
    PayloadHashMismatch,
    /// `|now - issued_at|` exceeded the configured maximum skew.
    #[error("timestamp skew exceeds maximum")]
    TimestampSkew,
    /// The telemetry key passed in is revoked.
    #[error("telemetry key is revoked")]
    KeyRevoked,
    /// The key's declared algorithm does not match the envelope context.
    #[error("signature algorithm mismatch")]
    AlgorithmMismatch,
    /// The key's `public_jwk` could not be decoded into key material.
    #[error("malformed telemetry public key: {0}")]
    MalformedKey(String),
    /// The signature field was not valid base64url.
    #[error("malformed signature encoding")]
    MalformedSignature,
    /// Cryptographic signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
}

/// Runs every check from the product's ordered verification pipeline except
/// key lookup, which the caller performs via the adapter registry.
///
/// Order: version check, payload hash recomputation, timestamp skew, then
/// signature verification under the key's declared algorithm.
///
/// # Errors
/// Returns the first [`TelemetryError`] encountered, following the ordering
/// above.
pub fn verify_envelope(
    envelope: &SignedTelemetryEnvelope,
    key: &TelemetryKey,
    now: Timestamp,
    max_skew_seconds: i64,
) -> Result<(), TelemetryError> {
    if envelope.envelope_version != ENVELOPE_VERSION {
        return Err(TelemetryError::UnsupportedVersion(envelope.envelope_version.clone()));
    }
    if !key.is_active() {
        return Err(TelemetryError::KeyRevoked);
    }

    let recomputed_hash = formatted_sha256_json(&envelope.payload)?;
    if recomputed_hash != envelope.payload_hash {
        return Err(TelemetryError::PayloadHashMismatch);
    }

    if now.abs_diff_seconds(envelope.issued_at) > max_skew_seconds {
        return Err(TelemetryError::TimestampSkew);
    }

    let message = signing_input(envelope)?;
    let signature_bytes = URL_SAFE_NO_PAD
        .decode(envelope.signature.as_bytes())
        .map_err(|_| TelemetryError::MalformedSignature)?;

    match key.algorithm {
        SignatureAlgorithm::Ed25519 => verify_ed25519(&key.public_jwk, &message, &signature_bytes),
        SignatureAlgorithm::Es256 => verify_es256(&key.public_jwk, &message, &signature_bytes),
    }
}

/// Decodes an OKP Ed25519 JWK (`crv: "Ed25519"`, `x: base64url`) and verifies.
fn verify_ed25519(jwk: &serde_json::Value, message: &[u8], signature_bytes: &[u8]) -> Result<(), TelemetryError> {
    let x = jwk_str_field(jwk, "x")?;
    let raw = URL_SAFE_NO_PAD
        .decode(x)
        .map_err(|e| TelemetryError::MalformedKey(e.to_string()))?;
    let key_array: [u8; 32] = raw
        .try_into()
        .map_err(|_| TelemetryError::MalformedKey("ed25519 x must be 32 bytes".to_string()))?;
    let verifying_key =
        EdVerifyingKey::from_bytes(&key_array).map_err(|e| TelemetryError::MalformedKey(e.to_string()))?;

    let sig_array: [u8; 64] = signature_bytes
        .try_into()
        .map_err(|_| TelemetryError::MalformedSignature)?;
    let signature = EdSignature::from_bytes(&sig_array);

    verifying_key
        .verify(message, &signature)
        .map_err(|_| TelemetryError::InvalidSignature)
}

/// Decodes an EC P-256 JWK (`crv: "P-256"`, `x`/`y`: base64url) and verifies
/// an ECDSA-SHA256 (ES256) signature in fixed-width r||s form.
fn verify_es256(jwk: &serde_json::Value, message: &[u8], signature_bytes: &[u8]) -> Result<(), TelemetryError> {
    let x = jwk_str_field(jwk, "x")?;
    let y = jwk_str_field(jwk, "y")?;
    let x_bytes = URL_SAFE_NO_PAD
        .decode(x)
        .map_err(|e| TelemetryError::MalformedKey(e.to_string()))?;
    let y_bytes = URL_SAFE_NO_PAD
        .decode(y)
        .map_err(|e| TelemetryError::MalformedKey(e.to_string()))?;

    let mut sec1 = Vec::with_capacity(65);
    sec1.push(0x04);
    sec1.extend_from_slice(&x_bytes);
    sec1.extend_from_slice(&y_bytes);

    let verifying_key =
        EsVerifyingKey::from_sec1_bytes(&sec1).map_err(|e| TelemetryError::MalformedKey(e.to_string()))?;
    let signature =
        EsSignature::from_slice(signature_bytes).map_err(|_| TelemetryError::MalformedSignature)?;

    verifying_key
        .verify(message, &signature)
        .map_err(|_| TelemetryError::InvalidSignature)
}

/// Reads a required string field out of a JWK JSON object.
fn jwk_str_field<'a>(jwk: &'a serde_json::Value, field: &str) -> Result<&'a str, TelemetryError> {
    jwk.get(field)
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| TelemetryError::MalformedKey(format!("missing field '{field}'")))
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use ed25519_dalek::Signer as _;
    use ed25519_dalek::SigningKey;
    use serde_json::json;

    use super::ENVELOPE_VERSION;
    use super::PayloadType;
    use super::SignedTelemetryEnvelope;
    use super::TelemetryError;
    use super::signing_input;
    use super::verify_envelope;
    use crate::core::adapter::SignatureAlgorithm;
    use crate::core::adapter::TelemetryKey;
    use crate::core::hashing::formatted_sha256_json;
    use crate::core::ids::AdapterId;
    use crate::core::ids::ExecutionId;
    use crate::core::ids::TraceId;
    use crate::core::time::Timestamp;

    fn signed_envelope(signing_key: &SigningKey, payload: serde_json::Value, issued_at: Timestamp) -> SignedTelemetryEnvelope {
        let payload_hash = formatted_sha256_json(&payload).expect("hash payload");
        let mut envelope = SignedTelemetryEnvelope {
            envelope_version: ENVELOPE_VERSION.to_string(),
            adapter_id: AdapterId::new("a1"),
            adapter_version: "1.0.0".to_string(),
            issued_at,
            execution_id: ExecutionId::new("e1"),
            trace_id: TraceId::new("tr1"),
            payload_type: PayloadType::Trace,
            payload,
            payload_hash,
            signature: String::new(),
        };
        let message = signing_input(&envelope).expect("signing input");
        let signature = signing_key.sign(&message);
        envelope.signature = URL_SAFE_NO_PAD.encode(signature.to_bytes());
        envelope
    }

    fn ed25519_key(signing_key: &SigningKey, now: Timestamp) -> TelemetryKey {
        let verifying_key = signing_key.verifying_key();
        let x = URL_SAFE_NO_PAD.encode(verifying_key.to_bytes());
        TelemetryKey {
            algorithm: SignatureAlgorithm::Ed25519,
            public_jwk: json!({"kty": "OKP", "crv": "Ed25519", "x": x}),
            key_id: None,
            created_at: now,
            revoked_at: None,
        }
    }

    #[test]
    fn valid_ed25519_envelope_verifies() {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let now = Timestamp::now();
        let key = ed25519_key(&signing_key, now);
        let envelope = signed_envelope(&signing_key, json!({"steps": []}), now);

        verify_envelope(&envelope, &key, now, 300).expect("verification succeeds");
    }

    #[test]
    fn tampered_payload_fails_hash_check() {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let now = Timestamp::now();
        let key = ed25519_key(&signing_key, now);
        let mut envelope = signed_envelope(&signing_key, json!({"steps": []}), now);
        envelope.payload = json!({"steps": ["tampered"]});

        let err = verify_envelope(&envelope, &key, now, 300).expect_err("should fail");
        assert!(matches!(err, TelemetryError::PayloadHashMismatch));
    }

    #[test]
    fn revoked_key_is_rejected() {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let now = Timestamp::now();
        let mut key = ed25519_key(&signing_key, now);
        key.revoked_at = Some(now);
        let envelope = signed_envelope(&signing_key, json!({"steps": []}), now);

        let err = verify_envelope(&envelope, &key, now, 300).expect_err("should fail");
        assert!(matches!(err, TelemetryError::KeyRevoked));
    }

    #[test]
    fn stale_timestamp_fails_skew_check() {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let issued_at = Timestamp::now();
        let key = ed25519_key(&signing_key, issued_at);
        let envelope = signed_envelope(&signing_key, json!({"steps": []}), issued_at);
        let later = issued_at.checked_add_seconds(1_000).expect("add seconds");

        let err = verify_envelope(&envelope, &key, later, 300).expect_err("should fail");
        assert!(matches!(err, TelemetryError::TimestampSkew));
    }
}
