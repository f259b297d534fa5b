// clasper-core/src/core/tooltoken.rs
// ============================================================================
// Module: Clasper Tool Token Data Model
// Description: Single-use, scope-bound tool authorization tokens (C3).
// Purpose: Define the persisted row and claim set; issuance/verification/
// consumption logic lives in `runtime::tool_token_service` against
// `interfaces::ToolTokenStore`.
// Dependencies: crate::core::{hashing, ids, time}, serde
// ============================================================================

//! ## Overview
//! A [`ToolTokenRow`] is inserted atomically before its token is returned to
//! the caller (C3 invariant: issue never returns before the row exists). The
//! `consume` operation is a single conditional update, not modeled here —
//! this module only defines the data that update operates on.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::ids::AdapterId;
use crate::core::ids::ExecutionId;
use crate::core::ids::TenantId;
use crate::core::ids::TokenId;
use crate::core::ids::WorkspaceId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Scope Parameters
// ============================================================================

/// The bounded scope a tool token authorizes. Opaque to everything except
/// the hashing layer: its canonical-JSON SHA-256 is `scope_hash`.
pub type ScopeParameters = serde_json::Value;

// ============================================================================
// SECTION: Issue Request / Response
// ============================================================================

/// Parameters for minting a new tool token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTokenRequest {
    /// Tenant the token is scoped to.
    pub tenant_id: TenantId,
    /// Workspace the token is scoped to.
    pub workspace_id: WorkspaceId,
    /// Adapter the token is issued to.
    pub adapter_id: AdapterId,
    /// Execution this tool call belongs to.
    pub execution_id: ExecutionId,
    /// Tool name the token authorizes.
    pub tool: String,
    /// Scope parameters bound to this token.
    pub scope: ScopeParameters,
    /// Time-to-live, in seconds, from issuance.
    pub ttl_seconds: u64,
}

/// The response returned to the caller after a successful issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTokenIssued {
    /// The signed token envelope (opaque bearer string).
    pub token: String,
    /// The token's unique identifier.
    pub jti: TokenId,
    /// When the token expires.
    pub expires_at: Timestamp,
    /// Canonical-JSON SHA-256 of `scope`.
    pub scope_hash: String,
}

// ============================================================================
// SECTION: Persisted Row
// ============================================================================

/// The persisted row backing a tool token's single-use guarantee.
///
/// # Invariants
/// - At most one row exists per `jti`.
/// - `used_at` transitions from `None` to `Some` exactly once, via a single
///   atomic conditional update keyed on `jti` (`UPDATE ... WHERE used_at IS
///   NULL`), never read-then-write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTokenRow {
    /// Unique token identifier (a UUIDv7 string).
    pub jti: TokenId,
    /// Tenant this token is scoped to.
    pub tenant_id: TenantId,
    /// Adapter this token was issued to.
    pub adapter_id: AdapterId,
    /// Execution this token belongs to.
    pub execution_id: ExecutionId,
    /// Tool name this token authorizes.
    pub tool: String,
    /// Canonical-JSON SHA-256 of the bound scope parameters.
    pub scope_hash: String,
    /// When the token was issued.
    pub issued_at: Timestamp,
    /// When the token expires.
    pub expires_at: Timestamp,
    /// When the token was consumed, if it has been.
    pub used_at: Option<Timestamp>,
}

impl ToolTokenRow {
    /// Returns whether the token is expired relative to `now`, regardless of
    /// whether it has been used.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_before(now)
    }
}

/// The full claim set returned to a caller on `verify`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolTokenClaims {
    /// Unique token identifier.
    pub jti: TokenId,
    /// Tenant this token is scoped to.
    pub tenant_id: TenantId,
    /// Adapter this token was issued to.
    pub adapter_id: AdapterId,
    /// Execution this token belongs to.
    pub execution_id: ExecutionId,
    /// Tool name this token authorizes.
    pub tool: String,
    /// Canonical-JSON SHA-256 of the bound scope parameters.
    pub scope_hash: String,
    /// When the token expires.
    pub expires_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::ToolTokenRow;
    use crate::core::ids::AdapterId;
    use crate::core::ids::ExecutionId;
    use crate::core::ids::TenantId;
    use crate::core::ids::TokenId;
    use crate::core::time::Timestamp;

    #[test]
    fn expired_token_is_flagged_regardless_of_use() {
        let now = Timestamp::now();
        let issued_at = now;
        let expires_at = now;
        let row = ToolTokenRow {
            jti: TokenId::new("01HXYZ"),
            tenant_id: TenantId::new("t1"),
            adapter_id: AdapterId::new("a1"),
            execution_id: ExecutionId::new("e1"),
            tool: "shell.exec".to_string(),
            scope_hash: "sha256:deadbeef".to_string(),
            issued_at,
            expires_at,
            used_at: None,
        };
        let later = now.checked_add_seconds(1).expect("add seconds");
        assert!(row.is_expired(later));
    }
}
