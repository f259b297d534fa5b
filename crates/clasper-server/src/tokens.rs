// clasper-server/src/tokens.rs
// ============================================================================
// Module: Server-Side Token Schemes
// Description: Decision-token HMAC signing/verification and derivation of
// the tool-token Ed25519 signing key from its configured secret.
// Purpose: clasper-core's DecisionOrchestrator returns an unsigned decision
// id as a placeholder token; this module turns that into the HMAC-signed
// bearer token the Decision API actually hands back to callers, and turns
// the configured tool-token secret into the signing key ToolTokenService
// needs.
// Dependencies: clasper-core, hmac, sha2, subtle, hex, ed25519-dalek
// ============================================================================

//! ## Overview
//! Two unrelated token schemes live here because both reduce a server-held
//! secret string to a cryptographic key: [`DecisionTokenSigner`] turns
//! `decision_token_secret` into an HMAC-SHA256 key over a [`DecisionId`];
//! [`derive_tool_signing_key`] turns `tool_token_secret` into an
//! `ed25519_dalek::SigningKey` by hashing it to 32 bytes first.

// ============================================================================
// SECTION: Imports
// ============================================================================

use clasper_core::ClasperError;
use clasper_core::DecisionId;
use ed25519_dalek::SigningKey;
use hmac::Hmac;
use hmac::Mac;
use sha2::Digest;
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// HMAC-SHA256 keyed on the decision-token secret.
type HmacSha256 = Hmac<Sha256>;

// ============================================================================
// SECTION: Decision Token Signer
// ============================================================================

/// Signs and verifies the bearer token returned alongside a
/// `requires_approval` decision.
///
/// The token is `hex(HMAC-SHA256(secret, decision_id))`: a caller who knows
/// only the decision id (e.g. from an audit export) cannot forge a valid
/// bearer token for it, but Clasper itself can always re-derive the
/// signature from the id and the shared secret without persisting tokens.
#[derive(Clone)]
pub struct DecisionTokenSigner {
    /// Raw bytes of `decision_token_secret`.
    secret: Vec<u8>,
}

impl DecisionTokenSigner {
    /// Builds a signer from the configured `decision_token_secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Computes the bearer token for `decision_id`.
    ///
    /// # Errors
    /// Returns [`ClasperError::Internal`] only if HMAC key initialization
    /// fails, which cannot happen for `HmacSha256` (it accepts any key
    /// length) but is propagated rather than unwrapped.
    pub fn sign(&self, decision_id: &DecisionId) -> Result<String, ClasperError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| ClasperError::Internal(format!("decision token key init failed: {e}")))?;
        mac.update(decision_id.as_str().as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Verifies `token` against `decision_id` in constant time.
    ///
    /// # Errors
    /// Returns [`ClasperError::InvalidSignature`] if the token does not
    /// match, or [`ClasperError::Internal`] if the token is not valid hex.
    pub fn verify(&self, decision_id: &DecisionId, token: &str) -> Result<(), ClasperError> {
        let presented = hex::decode(token).map_err(|_| ClasperError::InvalidSignature)?;
        let expected = self.sign(decision_id)?;
        let expected_bytes = hex::decode(&expected)
            .map_err(|e| ClasperError::Internal(format!("expected token hex decode failed: {e}")))?;
        if presented.ct_eq(&expected_bytes).into() {
            Ok(())
        } else {
            Err(ClasperError::InvalidSignature)
        }
    }
}

// ============================================================================
// SECTION: Tool Token Signing Key
// ============================================================================

/// Derives the Ed25519 signing key `ToolTokenService` uses from the
/// configured `tool_token_secret`.
///
/// The secret is an operator-chosen string of arbitrary length; Ed25519
/// requires exactly 32 seed bytes, so the secret is reduced via SHA-256
/// rather than truncated or padded.
#[must_use]
pub fn derive_tool_signing_key(secret: &str) -> SigningKey {
    let digest = Sha256::digest(secret.as_bytes());
    SigningKey::from_bytes(&digest.into())
}

#[cfg(test)]
mod tests {
    use super::DecisionTokenSigner;
    use super::derive_tool_signing_key;
    use clasper_core::DecisionId;

    #[test]
    fn a_token_verifies_against_the_decision_it_was_signed_for() {
        let signer = DecisionTokenSigner::new("top-secret");
        let decision_id = DecisionId::new("d-1");
        let token = signer.sign(&decision_id).expect("sign");
        signer.verify(&decision_id, &token).expect("verify");
    }

    #[test]
    fn a_token_signed_for_one_decision_does_not_verify_for_another() {
        let signer = DecisionTokenSigner::new("top-secret");
        let token = signer.sign(&DecisionId::new("d-1")).expect("sign");
        let result = signer.verify(&DecisionId::new("d-2"), &token);
        assert!(result.is_err());
    }

    #[test]
    fn a_token_signed_with_a_different_secret_does_not_verify() {
        let signed = DecisionTokenSigner::new("secret-a");
        let verified = DecisionTokenSigner::new("secret-b");
        let decision_id = DecisionId::new("d-1");
        let token = signed.sign(&decision_id).expect("sign");
        assert!(verified.verify(&decision_id, &token).is_err());
    }

    #[test]
    fn deriving_a_tool_signing_key_is_deterministic_for_the_same_secret() {
        let a = derive_tool_signing_key("tool-secret");
        let b = derive_tool_signing_key("tool-secret");
        assert_eq!(a.to_bytes(), b.to_bytes());
    }

    #[test]
    fn deriving_a_tool_signing_key_differs_across_secrets() {
        let a = derive_tool_signing_key("tool-secret-a");
        let b = derive_tool_signing_key("tool-secret-b");
        assert_ne!(a.to_bytes(), b.to_bytes());
    }
}
