// clasper-core/src/runtime/tool_token_service.rs
// ============================================================================
// Module: Tool Token Service
// Description: Issue, verify, and consume single-use scope-bound tool tokens
// (C3), signing bearer tokens with the server's own Ed25519 key.
// Purpose: Compose the pure data model in core::tooltoken with
// interfaces::ToolTokenStore and a signing key, so a compromised store read
// alone cannot forge a token an adapter would accept.
// Dependencies: crate::{core, interfaces}, ed25519-dalek, base64, uuid
// ============================================================================

//! ## Overview
//! A tool token is a signed, two-part bearer string: base64url(canonical
//! JSON claims) `.` base64url(Ed25519 signature over those same bytes).
//! `issue` inserts the backing row before returning the token (C3 invariant);
//! `verify` checks the signature and expiry before ever touching the store,
//! then cross-checks the claims against the persisted row; `consume` is a
//! thin pass-through to the store's atomic conditional update.

// ============================================================================
// SECTION: Imports
// ============================================================================

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::Signature;
use ed25519_dalek::Signer as _;
use ed25519_dalek::SigningKey;
use ed25519_dalek::Verifier as _;
use thiserror::Error;

use crate::core::AdapterId;
use crate::core::ExecutionId;
use crate::core::HashError;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::TokenId;
use crate::core::ToolTokenClaims;
use crate::core::ToolTokenIssued;
use crate::core::ToolTokenRequest;
use crate::core::ToolTokenRow;
use crate::core::canonical_json;
use crate::core::formatted_sha256_json;
use crate::interfaces::ToolTokenStore;
use crate::interfaces::ToolTokenStoreError;

// ============================================================================
// SECTION: Tool Token Service
// ============================================================================

/// Orchestrates issuance, verification, and consumption of tool tokens over
/// a [`ToolTokenStore`], signing with the server's own key.
pub struct ToolTokenService<S> {
    /// Backing store for single-use tracking.
    store: S,
    /// Server's Ed25519 signing key for minted tokens.
    signing_key: SigningKey,
}

impl<S> ToolTokenService<S>
where
    S: ToolTokenStore,
{
    /// Creates a new tool token service over `store`, signing with
    /// `signing_key`.
    #[must_use]
    pub const fn new(store: S, signing_key: SigningKey) -> Self {
        Self { store, signing_key }
    }

    /// Mints a new tool token for `request`, inserting its row before
    /// returning.
    ///
    /// # Errors
    /// Returns [`ToolTokenServiceError::Hashing`] if `scope` fails
    /// canonicalization, [`ToolTokenServiceError::ClockOverflow`] if
    /// `ttl_seconds` overflows the expiry computation, or propagates the
    /// store error.
    pub fn issue(&self, request: ToolTokenRequest, now: Timestamp) -> Result<ToolTokenIssued, ToolTokenServiceError> {
        let scope_hash = formatted_sha256_json(&request.scope)?;
        let ttl_seconds = i64::try_from(request.ttl_seconds).map_err(|_| ToolTokenServiceError::ClockOverflow)?;
        let expires_at = now.checked_add_seconds(ttl_seconds).map_err(|_| ToolTokenServiceError::ClockOverflow)?;
        let jti = TokenId::new(uuid::Uuid::now_v7().to_string());

        let claims = ToolTokenClaims {
            jti: jti.clone(),
            tenant_id: request.tenant_id.clone(),
            adapter_id: request.adapter_id.clone(),
            execution_id: request.execution_id.clone(),
            tool: request.tool.clone(),
            scope_hash: scope_hash.clone(),
            expires_at,
        };
        let token = self.sign(&claims)?;

        let row = ToolTokenRow {
            jti: jti.clone(),
            tenant_id: request.tenant_id,
            adapter_id: request.adapter_id,
            execution_id: request.execution_id,
            tool: request.tool,
            scope_hash: scope_hash.clone(),
            issued_at: now,
            expires_at,
            used_at: None,
        };
        self.store.insert(row)?;

        Ok(ToolTokenIssued { token, jti, expires_at, scope_hash })
    }

    /// Verifies `token`'s signature and expiry, then cross-checks it against
    /// the persisted row, returning the full claim set.
    ///
    /// # Errors
    /// Returns [`ToolTokenServiceError::MalformedToken`] or
    /// [`ToolTokenServiceError::InvalidSignature`] if the token cannot be
    /// authenticated, [`ToolTokenServiceError::Expired`] if `now` is past
    /// `expires_at`, [`ToolTokenServiceError::ScopeMismatch`] if the signed
    /// claims no longer match the persisted row, or propagates the store
    /// error (including not-found).
    pub fn verify(&self, token: &str, now: Timestamp) -> Result<ToolTokenClaims, ToolTokenServiceError> {
        let claims = self.decode_and_authenticate(token)?;
        if claims.expires_at.is_before(now) {
            return Err(ToolTokenServiceError::Expired);
        }

        let row_claims = self
            .store
            .lookup(&claims.jti)?
            .ok_or(ToolTokenServiceError::Store(ToolTokenStoreError::NotFound(claims.jti.clone())))?;
        if row_claims.scope_hash != claims.scope_hash {
            return Err(ToolTokenServiceError::ScopeMismatch);
        }

        Ok(claims)
    }

    /// Atomically marks `jti` used. Returns `true` iff this call performed
    /// the transition.
    ///
    /// # Errors
    /// Propagates the store error.
    pub fn consume(&self, jti: &TokenId, used_at: Timestamp) -> Result<bool, ToolTokenServiceError> {
        Ok(self.store.consume(jti, used_at)?)
    }

    /// Signs `claims` and returns the two-part bearer token.
    fn sign(&self, claims: &ToolTokenClaims) -> Result<String, ToolTokenServiceError> {
        let message = canonical_json(claims)?;
        let signature = self.signing_key.sign(&message);
        Ok(format!("{}.{}", URL_SAFE_NO_PAD.encode(&message), URL_SAFE_NO_PAD.encode(signature.to_bytes())))
    }

    /// Decodes a bearer token and verifies its signature, without consulting
    /// the store.
    fn decode_and_authenticate(&self, token: &str) -> Result<ToolTokenClaims, ToolTokenServiceError> {
        let (claims_part, signature_part) = token.split_once('.').ok_or(ToolTokenServiceError::MalformedToken)?;
        let message = URL_SAFE_NO_PAD.decode(claims_part).map_err(|_| ToolTokenServiceError::MalformedToken)?;
        let signature_bytes = URL_SAFE_NO_PAD.decode(signature_part).map_err(|_| ToolTokenServiceError::MalformedToken)?;
        let signature_array: [u8; 64] = signature_bytes.try_into().map_err(|_| ToolTokenServiceError::MalformedToken)?;
        let signature = Signature::from_bytes(&signature_array);

        self.signing_key
            .verifying_key()
            .verify(&message, &signature)
            .map_err(|_| ToolTokenServiceError::InvalidSignature)?;

        serde_json::from_slice(&message).map_err(|_| ToolTokenServiceError::MalformedToken)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors the tool token service can return.
#[derive(Debug, Error)]
pub enum ToolTokenServiceError {
    /// Canonicalization or hashing failed.
    #[error(transparent)]
    Hashing(#[from] HashError),
    /// The requested TTL overflowed the expiry computation.
    #[error("ttl overflowed the expiry computation")]
    ClockOverflow,
    /// The token string was not well-formed (`claims.signature`, valid
    /// base64url, or valid JSON).
    #[error("malformed tool token")]
    MalformedToken,
    /// The token's signature did not verify against the server's key.
    #[error("invalid tool token signature")]
    InvalidSignature,
    /// The token's `expires_at` has passed.
    #[error("tool token expired")]
    Expired,
    /// The signed claims no longer match the persisted row.
    #[error("tool token scope no longer matches the persisted row")]
    ScopeMismatch,
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] ToolTokenStoreError),
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use ed25519_dalek::SigningKey;

    use super::*;

    #[derive(Default)]
    struct FakeStore(RefCell<HashMap<String, ToolTokenRow>>);

    impl ToolTokenStore for FakeStore {
        fn insert(&self, row: ToolTokenRow) -> Result<(), ToolTokenStoreError> {
            self.0.borrow_mut().insert(row.jti.to_string(), row);
            Ok(())
        }

        fn lookup(&self, jti: &TokenId) -> Result<Option<ToolTokenClaims>, ToolTokenStoreError> {
            Ok(self.0.borrow().get(jti.as_str()).map(|row| ToolTokenClaims {
                jti: row.jti.clone(),
                tenant_id: row.tenant_id.clone(),
                adapter_id: row.adapter_id.clone(),
                execution_id: row.execution_id.clone(),
                tool: row.tool.clone(),
                scope_hash: row.scope_hash.clone(),
                expires_at: row.expires_at,
            }))
        }

        fn consume(&self, jti: &TokenId, used_at: Timestamp) -> Result<bool, ToolTokenStoreError> {
            let mut rows = self.0.borrow_mut();
            let row = rows.get_mut(jti.as_str()).ok_or_else(|| ToolTokenStoreError::NotFound(jti.clone()))?;
            if row.used_at.is_some() {
                return Ok(false);
            }
            row.used_at = Some(used_at);
            Ok(true)
        }
    }

    fn request(ttl_seconds: u64) -> ToolTokenRequest {
        ToolTokenRequest {
            tenant_id: TenantId::new("t1"),
            workspace_id: crate::core::WorkspaceId::new("w1"),
            adapter_id: AdapterId::new("a1"),
            execution_id: ExecutionId::new("e1"),
            tool: "shell.exec".to_string(),
            scope: serde_json::json!({"path": "/tmp"}),
            ttl_seconds,
        }
    }

    fn service() -> ToolTokenService<FakeStore> {
        ToolTokenService::new(FakeStore::default(), SigningKey::generate(&mut rand::rngs::OsRng))
    }

    #[test]
    fn issue_then_verify_returns_matching_claims() {
        let service = service();
        let now = Timestamp::now();
        let issued = service.issue(request(60), now).expect("issue");
        let claims = service.verify(&issued.token, now).expect("verify");
        assert_eq!(claims.jti, issued.jti);
        assert_eq!(claims.scope_hash, issued.scope_hash);
    }

    #[test]
    fn verify_rejects_an_expired_token() {
        let service = service();
        let now = Timestamp::now();
        let issued = service.issue(request(1), now).expect("issue");
        let later = now.checked_add_seconds(2).expect("add seconds");
        let err = service.verify(&issued.token, later).unwrap_err();
        assert!(matches!(err, ToolTokenServiceError::Expired));
    }

    #[test]
    fn verify_rejects_a_tampered_token() {
        let service = service();
        let now = Timestamp::now();
        let issued = service.issue(request(60), now).expect("issue");
        let mut tampered = issued.token.clone();
        tampered.push('x');
        let err = service.verify(&tampered, now).unwrap_err();
        assert!(matches!(err, ToolTokenServiceError::InvalidSignature | ToolTokenServiceError::MalformedToken));
    }

    #[test]
    fn consume_is_single_use() {
        let service = service();
        let now = Timestamp::now();
        let issued = service.issue(request(60), now).expect("issue");
        assert!(service.consume(&issued.jti, now).expect("first consume"));
        assert!(!service.consume(&issued.jti, now).expect("second consume"));
    }
}
