// clasper-core/src/interfaces/mod.rs
// ============================================================================
// Module: Clasper Interfaces
// Description: Backend-agnostic storage and identity-verification contracts.
// Purpose: Define the contract surfaces `crate::runtime` composes over,
// independent of the concrete store (`clasper-store-sqlite`) or identity
// provider (`clasper-providers`).
// Dependencies: crate::core
// ============================================================================

//! ## Overview
//! Every trait here is synchronous: implementations that need to suspend on
//! I/O (SQLite access, an HTTP call to a JWKS endpoint) are expected to be
//! driven from async call sites via a blocking-safe adapter (e.g.
//! `tokio::task::spawn_blocking`), the same split the corpus uses between
//! its synchronous core-store traits and its async server-layer traits.
//! Implementations must fail closed: a store that cannot determine an
//! answer returns an error, never a default permissive value.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::AdapterId;
use crate::core::AdapterRegistration;
use crate::core::AuditEntry;
use crate::core::AuthContext;
use crate::core::Decision;
use crate::core::DecisionId;
use crate::core::ExecutionId;
use crate::core::Policy;
use crate::core::PolicyId;
use crate::core::ReasonCode;
use crate::core::SignatureAlgorithm;
use crate::core::TelemetryKey;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::TokenId;
use crate::core::ToolTokenClaims;
use crate::core::ToolTokenRow;
use crate::core::TraceStep;
use crate::core::TraceStepKind;

// ============================================================================
// SECTION: Identity Verification
// ============================================================================

/// Errors raised while verifying an inbound credential (C1).
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No bearer token was present on the request.
    #[error("missing token")]
    MissingToken,
    /// The token's `exp` claim is in the past.
    #[error("token expired")]
    TokenExpired,
    /// The token's signature did not verify.
    #[error("invalid signature")]
    InvalidSignature,
    /// The token had no `tenant_id` claim.
    #[error("missing tenant")]
    MissingTenant,
    /// A JWKS fetch or parse failed.
    #[error("identity provider error: {0}")]
    Provider(String),
}

/// Verifies a bearer credential and produces the authenticated context it
/// carries.
///
/// # Invariants
/// - A development-bypass implementation must only ever be reachable when
///   the deployment is non-production, no external identity provider is
///   configured, and an explicit flag is set; any other path that would
///   otherwise fall through must fail with [`IdentityError::MissingToken`]
///   rather than silently granting access.
pub trait IdentityVerifier {
    /// Verifies `bearer_token` and returns the context it authenticates.
    ///
    /// # Errors
    /// Returns [`IdentityError`] for any verification failure.
    fn verify(&self, bearer_token: &str) -> Result<AuthContext, IdentityError>;
}

// ============================================================================
// SECTION: Policy Store
// ============================================================================

/// Errors raised by [`PolicyStore`] operations.
#[derive(Debug, Error)]
pub enum PolicyStoreError {
    /// Underlying storage I/O failed.
    #[error("policy store io error: {0}")]
    Io(String),
    /// No policy exists with the given identifier.
    #[error("policy not found: {0}")]
    NotFound(PolicyId),
}

/// Tenant-scoped policy storage with an in-memory cache discipline left to
/// the implementation: upserts must invalidate any cached view before this
/// call returns, so the very next `load` reflects the change.
pub trait PolicyStore {
    /// Loads every enabled policy for `tenant_id`.
    ///
    /// # Errors
    /// Returns [`PolicyStoreError`] if the underlying store cannot be read.
    fn load(&self, tenant_id: &TenantId) -> Result<Vec<Policy>, PolicyStoreError>;

    /// Inserts or replaces a policy.
    ///
    /// # Errors
    /// Returns [`PolicyStoreError`] if the write fails.
    fn upsert(&self, policy: Policy) -> Result<(), PolicyStoreError>;
}

// ============================================================================
// SECTION: Adapter Registry Store
// ============================================================================

/// Errors raised by [`AdapterRegistryStore`] operations.
#[derive(Debug, Error)]
pub enum AdapterRegistryError {
    /// Underlying storage I/O failed.
    #[error("adapter registry io error: {0}")]
    Io(String),
    /// No adapter exists with the given identifier for the tenant.
    #[error("adapter not registered: {0}")]
    NotFound(AdapterId),
}

/// Per-tenant adapter enrollment storage (C11).
pub trait AdapterRegistryStore {
    /// Inserts or replaces an adapter registration.
    ///
    /// # Errors
    /// Returns [`AdapterRegistryError`] if the write fails.
    fn upsert(&self, registration: AdapterRegistration) -> Result<(), AdapterRegistryError>;

    /// Fetches the registration for `adapter_id` under `tenant_id`, if any.
    ///
    /// # Errors
    /// Returns [`AdapterRegistryError`] if the read fails.
    fn get(
        &self,
        tenant_id: &TenantId,
        adapter_id: &AdapterId,
    ) -> Result<Option<AdapterRegistration>, AdapterRegistryError>;

    /// Lists every adapter registered for `tenant_id`.
    ///
    /// # Errors
    /// Returns [`AdapterRegistryError`] if the read fails.
    fn list(&self, tenant_id: &TenantId) -> Result<Vec<AdapterRegistration>, AdapterRegistryError>;

    /// Marks an adapter disabled; it must then fail every later capability
    /// check with `adapter_disabled`.
    ///
    /// # Errors
    /// Returns [`AdapterRegistryError`] if the write fails, or
    /// [`AdapterRegistryError::NotFound`] if no such adapter is registered.
    fn disable(&self, tenant_id: &TenantId, adapter_id: &AdapterId) -> Result<(), AdapterRegistryError>;

    /// Sets a new active telemetry key, without revoking any prior key.
    ///
    /// # Errors
    /// Returns [`AdapterRegistryError`] if the write fails.
    fn set_key(
        &self,
        tenant_id: &TenantId,
        adapter_id: &AdapterId,
        algorithm: SignatureAlgorithm,
        public_jwk: serde_json::Value,
    ) -> Result<TelemetryKey, AdapterRegistryError>;

    /// Revokes the active key so subsequent active-key lookups skip it.
    ///
    /// # Errors
    /// Returns [`AdapterRegistryError`] if the write fails.
    fn revoke_key(
        &self,
        tenant_id: &TenantId,
        adapter_id: &AdapterId,
    ) -> Result<(), AdapterRegistryError>;
}

// ============================================================================
// SECTION: Tool Token Store
// ============================================================================

/// Errors raised by [`ToolTokenStore`] operations.
#[derive(Debug, Error)]
pub enum ToolTokenStoreError {
    /// Underlying storage I/O failed.
    #[error("tool token store io error: {0}")]
    Io(String),
    /// No row exists for the given `jti`.
    #[error("tool token not found: {0}")]
    NotFound(TokenId),
}

/// Single-use tool token persistence (C3).
///
/// # Invariants
/// - `consume` is a single atomic conditional update
///   (`used_at` transitions `NULL -> now()` keyed on `jti`), never a
///   read-then-write; it returns `false`, not an error, on a second call.
pub trait ToolTokenStore {
    /// Inserts a freshly issued token row. Must complete before the caller
    /// returns the token to the adapter.
    ///
    /// # Errors
    /// Returns [`ToolTokenStoreError`] if the insert fails.
    fn insert(&self, row: ToolTokenRow) -> Result<(), ToolTokenStoreError>;

    /// Looks up the full claim set for `jti`.
    ///
    /// # Errors
    /// Returns [`ToolTokenStoreError`] if the read fails.
    fn lookup(&self, jti: &TokenId) -> Result<Option<ToolTokenClaims>, ToolTokenStoreError>;

    /// Atomically marks `jti` used. Returns `true` iff this call performed
    /// the transition; `false` if it was already used.
    ///
    /// # Errors
    /// Returns [`ToolTokenStoreError`] if the underlying update fails.
    fn consume(&self, jti: &TokenId, used_at: Timestamp) -> Result<bool, ToolTokenStoreError>;
}

// ============================================================================
// SECTION: Approval Queue Store
// ============================================================================

/// Errors raised by [`ApprovalQueueStore`] operations.
#[derive(Debug, Error)]
pub enum ApprovalQueueError {
    /// Underlying storage I/O failed.
    #[error("approval queue io error: {0}")]
    Io(String),
    /// No decision exists with the given identifier.
    #[error("decision not found: {0}")]
    NotFound(DecisionId),
    /// The decision is no longer `pending`/`approved` (already resolved or
    /// consumed) and cannot be transitioned again.
    #[error("decision already resolved: {0}")]
    AlreadyResolved(DecisionId),
    /// The decision has transitioned to `expired` and cannot be resolved or
    /// consumed.
    #[error("decision expired: {0}")]
    Expired(DecisionId),
}

/// Pending-decision persistence with atomic terminal-state transitions (C7).
pub trait ApprovalQueueStore {
    /// Persists a freshly created `pending` decision.
    ///
    /// # Errors
    /// Returns [`ApprovalQueueError`] if the insert fails.
    fn create(&self, decision: Decision) -> Result<(), ApprovalQueueError>;

    /// Fetches a decision by id.
    ///
    /// # Errors
    /// Returns [`ApprovalQueueError`] if the read fails.
    fn get(&self, decision_id: &DecisionId) -> Result<Option<Decision>, ApprovalQueueError>;

    /// Atomically transitions a `pending` decision to `approved` or
    /// `denied`, recording the resolver, reason code, and justification.
    ///
    /// # Errors
    /// Returns [`ApprovalQueueError::AlreadyResolved`] if the decision is no
    /// longer pending, or [`ApprovalQueueError::NotFound`] if it does not
    /// exist.
    #[allow(clippy::too_many_arguments)]
    fn resolve(
        &self,
        decision_id: &DecisionId,
        approved: bool,
        resolved_by: &str,
        reason_code: ReasonCode,
        justification: &str,
        resolved_at: Timestamp,
    ) -> Result<Decision, ApprovalQueueError>;

    /// Atomically transitions an `approved` decision to `consumed`.
    ///
    /// # Errors
    /// Returns [`ApprovalQueueError::Expired`] if the decision has
    /// transitioned to `expired`, or [`ApprovalQueueError::AlreadyResolved`]
    /// if it is in any other state but `approved`.
    fn consume(&self, decision_id: &DecisionId) -> Result<Decision, ApprovalQueueError>;

    /// Sweeps every overdue `pending` decision for `tenant_id` to `expired`,
    /// returning the ids transitioned.
    ///
    /// # Errors
    /// Returns [`ApprovalQueueError`] if the sweep fails.
    fn sweep_expired(
        &self,
        tenant_id: &TenantId,
        now: Timestamp,
    ) -> Result<Vec<DecisionId>, ApprovalQueueError>;
}

// ============================================================================
// SECTION: Audit Log Store
// ============================================================================

/// Errors raised by [`AuditLogStore`] operations.
#[derive(Debug, Error)]
pub enum AuditLogError {
    /// Underlying storage I/O failed.
    #[error("audit log io error: {0}")]
    Io(String),
}

/// Per-tenant append-only audit storage (C8).
///
/// # Invariants
/// - Two concurrent appenders for the same tenant must serialize so `seq`
///   stays dense and strictly increasing; cross-tenant appends are
///   independent. The implementation owns this serialization (a per-tenant
///   mutex, or `INSERT ... SELECT max(seq)+1` under a serializable
///   transaction) and the entry-hash computation that depends on it — the
///   caller only supplies the unsequenced record fields.
pub trait AuditLogStore {
    /// Reads the current `(max_seq, last_hash)` for `tenant_id`, assigns the
    /// next `seq`, builds and hashes the canonical record, and inserts it —
    /// all within one critical section.
    ///
    /// # Errors
    /// Returns [`AuditLogError`] if the read, hash, or insert fails.
    fn append(
        &self,
        tenant_id: &TenantId,
        event_type: &str,
        occurred_at: Timestamp,
        actor: &str,
        target_id: Option<String>,
        event_data: serde_json::Value,
    ) -> Result<AuditEntry, AuditLogError>;

    /// Returns every entry for `tenant_id`, ordered ascending by `seq`.
    ///
    /// # Errors
    /// Returns [`AuditLogError`] if the read fails.
    fn export(&self, tenant_id: &TenantId) -> Result<Vec<AuditEntry>, AuditLogError>;
}

// ============================================================================
// SECTION: Trace Store
// ============================================================================

/// Errors raised by [`TraceStore`] operations.
#[derive(Debug, Error)]
pub enum TraceStoreError {
    /// Underlying storage I/O failed.
    #[error("trace store io error: {0}")]
    Io(String),
}

/// Execution trace step storage (C9).
///
/// Mirrors [`AuditLogStore`]'s split: the caller supplies unsequenced step
/// data, the implementation owns `seq`/`step_hash` assignment under its own
/// per-execution critical section.
pub trait TraceStore {
    /// Assigns the next `seq` for `execution_id`, builds and hashes the
    /// step, and inserts it.
    ///
    /// # Errors
    /// Returns [`TraceStoreError`] if the write fails.
    fn append_step(
        &self,
        execution_id: &ExecutionId,
        detail: TraceStepKind,
        occurred_at: Timestamp,
    ) -> Result<TraceStep, TraceStoreError>;

    /// Returns every step for `execution_id`, ordered ascending by `seq`.
    ///
    /// # Errors
    /// Returns [`TraceStoreError`] if the read fails.
    fn steps_for_execution(&self, execution_id: &ExecutionId) -> Result<Vec<TraceStep>, TraceStoreError>;
}

// ============================================================================
// SECTION: Tenant Budget Store
// ============================================================================

/// Errors raised by [`TenantBudgetStore`] operations.
#[derive(Debug, Error)]
pub enum TenantBudgetError {
    /// Underlying storage I/O failed.
    #[error("tenant budget io error: {0}")]
    Io(String),
}

/// Per-tenant remaining-budget lookup, consulted by C5/C6 when an
/// authenticated identity does not itself carry a `budget_remaining` claim.
pub trait TenantBudgetStore {
    /// Returns the remaining budget for `tenant_id`, if tracked.
    ///
    /// # Errors
    /// Returns [`TenantBudgetError`] if the read fails.
    fn remaining_budget(&self, tenant_id: &TenantId) -> Result<Option<f64>, TenantBudgetError>;
}
