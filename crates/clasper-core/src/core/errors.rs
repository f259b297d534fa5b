// clasper-core/src/core/errors.rs
// ============================================================================
// Module: Clasper Error Taxonomy
// Description: The single closed error sum type shared across every component.
// Purpose: Give every caller one enum to match on instead of per-module
// ad-hoc strings; the HTTP layer maps each variant to a status code exactly once.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Clasper's error taxonomy is a single closed `enum`, not per-component
//! strings. Narrower component error types (e.g. a store's `rusqlite::Error`)
//! convert into [`ClasperError`] at the boundary via `#[from]` so the
//! taxonomy stays exhaustive from the outside even as storage details change.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::ids::DecisionId;
use crate::core::ids::TokenId;
use crate::core::telemetry::TelemetryError;
use crate::interfaces::AdapterRegistryError;
use crate::interfaces::ApprovalQueueError;
use crate::interfaces::AuditLogError;
use crate::interfaces::IdentityError;
use crate::interfaces::PolicyStoreError;
use crate::interfaces::TenantBudgetError;
use crate::interfaces::ToolTokenStoreError;
use crate::interfaces::TraceStoreError;
use crate::runtime::approval_queue::ApprovalServiceError;
use crate::runtime::audit_log::AuditServiceError;
use crate::runtime::decision_orchestrator::DecisionError;
use crate::runtime::telemetry_ingest::TelemetryIngestError;
use crate::runtime::tool_token_service::ToolTokenServiceError;
use crate::runtime::trace_store::TraceServiceError;

// ============================================================================
// SECTION: Error Taxonomy
// ============================================================================

/// The closed error taxonomy for all of Clasper.
///
/// # Invariants
/// - No handler may map a variant here back into a successful `allow`
///   decision; a component that cannot evaluate its input must refuse.
#[derive(Debug, Error)]
pub enum ClasperError {
    // -- Authentication --------------------------------------------------
    /// No credential was presented where one is required.
    #[error("missing authentication token")]
    MissingToken,
    /// The presented token's `exp` claim is in the past.
    #[error("authentication token expired")]
    TokenExpired,
    /// The presented token's signature did not verify.
    #[error("invalid token signature")]
    InvalidSignature,
    /// The token verified but carried no `tenant_id` claim.
    #[error("token is missing a tenant_id claim")]
    MissingTenant,
    /// The authenticated identity lacks permission for the requested action.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    // -- Validation --------------------------------------------------------
    /// The payload failed schema validation.
    #[error("schema validation failed: {0}")]
    SchemaInvalid(String),
    /// The payload exceeded the configured size limit.
    #[error("payload exceeds the configured size limit")]
    PayloadTooLarge,
    /// The declared signature algorithm is not one Clasper supports.
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    // -- Decision ------------------------------------------------------------
    /// The adapter named in the request is not registered for this tenant.
    #[error("adapter is not registered for this tenant")]
    AdapterUnknown,
    /// The adapter is registered but disabled.
    #[error("adapter is disabled")]
    AdapterDisabled,
    /// A requested capability is not in the adapter's declared capability set.
    #[error("capability not declared by adapter: {0}")]
    CapabilityNotDeclared(String),
    /// Policy evaluation yielded `deny`.
    #[error("blocked by policy: {0}")]
    BlockedByPolicy(String),
    /// Policy or risk requires human approval before granting scope.
    #[error("decision requires approval: {0}")]
    RequiresApproval(DecisionId),
    /// The tenant's remaining budget cannot cover the requested cost.
    #[error("tenant budget exceeded")]
    BudgetExceeded,

    // -- Approval ----------------------------------------------------------
    /// No decision exists with the given id for this tenant.
    #[error("decision not found")]
    DecisionNotFound,
    /// The decision has already transitioned out of `pending`/`approved`.
    #[error("decision already resolved")]
    AlreadyResolved,
    /// The approver identity lacks the role required to resolve this decision.
    #[error("approver lacks the required role")]
    RoleInsufficient,
    /// The supplied justification is shorter than the minimum length.
    #[error("justification must be at least 10 characters")]
    JustificationTooShort,
    /// The decision's `expires_at` has passed.
    #[error("decision expired")]
    DecisionExpired,

    // -- Token ---------------------------------------------------------------
    /// The tool token failed signature or claim verification.
    #[error("invalid tool token")]
    InvalidToolToken,
    /// The tool token's `expires_at` has passed.
    #[error("tool token expired")]
    ToolTokenExpired,
    /// The tool token has already been consumed.
    #[error("tool token already used: {0}")]
    ToolTokenUsed(TokenId),

    // -- Integrity -----------------------------------------------------------
    /// The recomputed payload hash did not match the declared `payload_hash`.
    #[error("payload hash mismatch")]
    PayloadHashMismatch,
    /// `|now - issued_at|` exceeded the configured skew tolerance.
    #[error("timestamp skew exceeds tolerance")]
    TimestampSkew,
    /// No active telemetry key exists for the adapter.
    #[error("no active telemetry key for adapter")]
    MissingKey,
    /// The telemetry key used to sign the envelope has been revoked.
    #[error("telemetry key has been revoked")]
    KeyRevoked,

    // -- Infrastructure ------------------------------------------------------
    /// A storage write lost a race with a concurrent writer; retryable.
    #[error("store conflict, retry")]
    StoreConflict,
    /// The operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,
    /// The backing store could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    /// A referenced policy, adapter, or tool token row does not exist.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),
    /// An internal invariant failed (clock overflow, snapshot serialization,
    /// hash recomputation) in a way no caller input could have triggered.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClasperError {
    /// Returns the stable, lowercase `snake_case` error kind string used in
    /// API responses and audit entries, matching the taxonomy in the product
    /// specification verbatim.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::TokenExpired => "token_expired",
            Self::InvalidSignature => "invalid_signature",
            Self::MissingTenant => "missing_tenant",
            Self::PermissionDenied(_) => "permission_denied",
            Self::SchemaInvalid(_) => "schema_invalid",
            Self::PayloadTooLarge => "payload_too_large",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::AdapterUnknown => "adapter_unknown",
            Self::AdapterDisabled => "adapter_disabled",
            Self::CapabilityNotDeclared(_) => "capability_not_declared",
            Self::BlockedByPolicy(_) => "blocked_by_policy",
            Self::RequiresApproval(_) => "requires_approval",
            Self::BudgetExceeded => "budget_exceeded",
            Self::DecisionNotFound => "decision_not_found",
            Self::AlreadyResolved => "already_resolved",
            Self::RoleInsufficient => "role_insufficient",
            Self::JustificationTooShort => "justification_too_short",
            Self::DecisionExpired => "decision_expired",
            Self::InvalidToolToken => "invalid_tool_token",
            Self::ToolTokenExpired => "tool_token_expired",
            Self::ToolTokenUsed(_) => "tool_token_used",
            Self::PayloadHashMismatch => "payload_hash_mismatch",
            Self::TimestampSkew => "timestamp_skew",
            Self::MissingKey => "missing_key",
            Self::KeyRevoked => "key_revoked",
            Self::StoreConflict => "store_conflict",
            Self::Timeout => "timeout",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::ResourceNotFound(_) => "resource_not_found",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Returns whether the infrastructure-layer caller should retry the
    /// operation automatically (only `store_conflict`, per the propagation
    /// policy; `timeout` is never retried automatically).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreConflict)
    }
}

// ============================================================================
// SECTION: Component Conversions
// ============================================================================
//
// Every narrower error type a caller might see converts into ClasperError
// here, so the HTTP layer's status-code map only ever matches on
// ClasperError and stays exhaustive as components evolve.

impl From<IdentityError> for ClasperError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::MissingToken => Self::MissingToken,
            IdentityError::TokenExpired => Self::TokenExpired,
            IdentityError::InvalidSignature => Self::InvalidSignature,
            IdentityError::MissingTenant => Self::MissingTenant,
            IdentityError::Provider(msg) => Self::StoreUnavailable(msg),
        }
    }
}

impl From<PolicyStoreError> for ClasperError {
    fn from(err: PolicyStoreError) -> Self {
        match err {
            PolicyStoreError::Io(msg) => Self::StoreUnavailable(msg),
            PolicyStoreError::NotFound(id) => Self::ResourceNotFound(format!("policy {id}")),
        }
    }
}

impl From<AdapterRegistryError> for ClasperError {
    fn from(err: AdapterRegistryError) -> Self {
        match err {
            AdapterRegistryError::Io(msg) => Self::StoreUnavailable(msg),
            AdapterRegistryError::NotFound(_) => Self::AdapterUnknown,
        }
    }
}

impl From<ToolTokenStoreError> for ClasperError {
    fn from(err: ToolTokenStoreError) -> Self {
        match err {
            ToolTokenStoreError::Io(msg) => Self::StoreUnavailable(msg),
            ToolTokenStoreError::NotFound(_) => Self::InvalidToolToken,
        }
    }
}

impl From<ApprovalQueueError> for ClasperError {
    fn from(err: ApprovalQueueError) -> Self {
        match err {
            ApprovalQueueError::Io(msg) => Self::StoreUnavailable(msg),
            ApprovalQueueError::NotFound(_) => Self::DecisionNotFound,
            ApprovalQueueError::AlreadyResolved(_) => Self::AlreadyResolved,
            ApprovalQueueError::Expired(_) => Self::DecisionExpired,
        }
    }
}

impl From<AuditLogError> for ClasperError {
    fn from(err: AuditLogError) -> Self {
        match err {
            AuditLogError::Io(msg) => Self::StoreUnavailable(msg),
        }
    }
}

impl From<TraceStoreError> for ClasperError {
    fn from(err: TraceStoreError) -> Self {
        match err {
            TraceStoreError::Io(msg) => Self::StoreUnavailable(msg),
        }
    }
}

impl From<TenantBudgetError> for ClasperError {
    fn from(err: TenantBudgetError) -> Self {
        match err {
            TenantBudgetError::Io(msg) => Self::StoreUnavailable(msg),
        }
    }
}

impl From<TelemetryError> for ClasperError {
    fn from(err: TelemetryError) -> Self {
        match err {
            TelemetryError::UnsupportedVersion(v) => Self::SchemaInvalid(format!("unsupported envelope version: {v}")),
            TelemetryError::Hashing(e) => Self::Internal(e.to_string()),
            TelemetryError::PayloadHashMismatch => Self::PayloadHashMismatch,
            TelemetryError::TimestampSkew => Self::TimestampSkew,
            TelemetryError::KeyRevoked => Self::KeyRevoked,
            TelemetryError::AlgorithmMismatch => Self::UnsupportedAlgorithm("telemetry key algorithm mismatch".to_string()),
            TelemetryError::MalformedKey(msg) => Self::SchemaInvalid(msg),
            TelemetryError::MalformedSignature | TelemetryError::InvalidSignature => Self::InvalidSignature,
        }
    }
}

impl From<DecisionError> for ClasperError {
    fn from(err: DecisionError) -> Self {
        match err {
            DecisionError::TenantMismatch => {
                Self::PermissionDenied("request tenant does not match the authenticated tenant".to_string())
            }
            DecisionError::AdapterUnknown => Self::AdapterUnknown,
            DecisionError::AdapterDisabled => Self::AdapterDisabled,
            DecisionError::CapabilityNotDeclared => {
                Self::CapabilityNotDeclared("requested capability".to_string())
            }
            DecisionError::BudgetExceeded => Self::BudgetExceeded,
            DecisionError::ClockOverflow => Self::Internal("clock overflow computing an expiry".to_string()),
            DecisionError::Snapshot(msg) => Self::Internal(msg),
            DecisionError::AdapterRegistry(e) => e.into(),
            DecisionError::PolicyStore(e) => e.into(),
            DecisionError::ApprovalQueue(e) => e.into(),
            DecisionError::TenantBudget(e) => e.into(),
            DecisionError::AuditLog(e) => e.into(),
        }
    }
}

impl From<ApprovalServiceError> for ClasperError {
    fn from(err: ApprovalServiceError) -> Self {
        match err {
            ApprovalServiceError::NotFound => Self::DecisionNotFound,
            ApprovalServiceError::JustificationTooShort => Self::JustificationTooShort,
            ApprovalServiceError::RoleInsufficient => Self::RoleInsufficient,
            ApprovalServiceError::DecisionExpired => Self::DecisionExpired,
            ApprovalServiceError::Store(e) => e.into(),
        }
    }
}

impl From<AuditServiceError> for ClasperError {
    fn from(err: AuditServiceError) -> Self {
        match err {
            AuditServiceError::Store(e) => e.into(),
            AuditServiceError::Hash(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<TraceServiceError> for ClasperError {
    fn from(err: TraceServiceError) -> Self {
        match err {
            TraceServiceError::Store(e) => e.into(),
            TraceServiceError::Hash(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<ToolTokenServiceError> for ClasperError {
    fn from(err: ToolTokenServiceError) -> Self {
        match err {
            ToolTokenServiceError::Hashing(e) => Self::Internal(e.to_string()),
            ToolTokenServiceError::ClockOverflow => Self::Internal("ttl overflowed the expiry computation".to_string()),
            ToolTokenServiceError::MalformedToken
            | ToolTokenServiceError::InvalidSignature
            | ToolTokenServiceError::ScopeMismatch => Self::InvalidToolToken,
            ToolTokenServiceError::Expired => Self::ToolTokenExpired,
            ToolTokenServiceError::Store(e) => e.into(),
        }
    }
}

impl From<TelemetryIngestError> for ClasperError {
    fn from(err: TelemetryIngestError) -> Self {
        match err {
            TelemetryIngestError::AdapterUnknown(_) => Self::AdapterUnknown,
            TelemetryIngestError::MissingKey(_) => Self::MissingKey,
            TelemetryIngestError::Verification(e) => e.into(),
            TelemetryIngestError::MalformedPayload(msg) => Self::SchemaInvalid(msg),
            TelemetryIngestError::AdapterRegistry(e) => e.into(),
            TelemetryIngestError::AuditLog(e) => e.into(),
            TelemetryIngestError::TraceStore(e) => e.into(),
            TelemetryIngestError::Sink(crate::runtime::telemetry_ingest::TelemetrySinkError::Io(msg)) => {
                Self::StoreUnavailable(msg)
            }
        }
    }
}
