// clasper-core/src/runtime/approval_queue.rs
// ============================================================================
// Module: Async Approval Queue Orchestration
// Description: Role- and justification-checked resolution of pending
// decisions, plus the expiry sweeper (C7).
// Purpose: Keep the state-machine invariants (terminal states, one
// resolution, role enforcement) in one place rather than re-checked at every
// API surface that can call `resolve`/`consume`.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! The compare-and-swap semantics of `pending -> {approved, denied}` live in
//! [`interfaces::ApprovalQueueStore`]; this module is the layer above it that
//! enforces the *business* rules a store should never be trusted to check on
//! its own: minimum justification length, `required_role` possession, and
//! that a decision has not already expired out from under the approver.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::AuthContext;
use crate::core::Decision;
use crate::core::DecisionId;
use crate::core::ReasonCode;
use crate::core::ResolveAction;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::justification_is_valid;
use crate::interfaces::ApprovalQueueError;
use crate::interfaces::ApprovalQueueStore;

// ============================================================================
// SECTION: Approval Queue Service
// ============================================================================

/// Orchestrates resolution of pending [`Decision`]s over an
/// [`ApprovalQueueStore`], enforcing role and justification rules the store
/// itself does not know about.
pub struct ApprovalQueueService<Q> {
    /// Backing store.
    store: Q,
}

impl<Q> ApprovalQueueService<Q>
where
    Q: ApprovalQueueStore,
{
    /// Creates a new approval queue service over `store`.
    #[must_use]
    pub const fn new(store: Q) -> Self {
        Self { store }
    }

    /// Returns the decision with the given id.
    ///
    /// # Errors
    /// Returns [`ApprovalServiceError::NotFound`] if no decision exists, or
    /// propagates the store error otherwise.
    pub fn get(&self, decision_id: &DecisionId) -> Result<Decision, ApprovalServiceError> {
        self.store
            .get(decision_id)?
            .ok_or(ApprovalServiceError::NotFound)
    }

    /// Resolves a pending decision as `approve` or `deny` on behalf of
    /// `approver`.
    ///
    /// # Errors
    /// Returns [`ApprovalServiceError::JustificationTooShort`] if
    /// `justification` is under [`crate::core::MIN_JUSTIFICATION_LEN`] bytes,
    /// [`ApprovalServiceError::RoleInsufficient`] if the decision names a
    /// `required_role` the approver does not hold,
    /// [`ApprovalServiceError::DecisionExpired`] if `now` is past the
    /// decision's `expires_at`, or propagates the store error (including
    /// `already_resolved` for a decision no longer `pending`).
    pub fn resolve(
        &self,
        decision_id: &DecisionId,
        approver: &AuthContext,
        action: ResolveAction,
        reason_code: ReasonCode,
        justification: &str,
        now: Timestamp,
    ) -> Result<Decision, ApprovalServiceError> {
        if !justification_is_valid(justification) {
            return Err(ApprovalServiceError::JustificationTooShort);
        }

        let decision = self.get(decision_id)?;
        if let Some(required_role) = &decision.required_role {
            if !approver.permissions.has_role(required_role) {
                return Err(ApprovalServiceError::RoleInsufficient);
            }
        }
        if decision.is_overdue(now) {
            return Err(ApprovalServiceError::DecisionExpired);
        }

        let resolved_by = approver.user_id.clone().unwrap_or_else(|| approver.tenant_id.to_string());
        let approved = matches!(action, ResolveAction::Approve);
        Ok(self.store.resolve(decision_id, approved, &resolved_by, reason_code, justification, now)?)
    }

    /// Consumes an approved decision, transitioning it to `consumed` and
    /// returning the record holding its granted scope.
    ///
    /// # Errors
    /// Propagates the store error: `decision_not_found` if no such decision
    /// exists, `decision_expired` if the sweeper has already transitioned it
    /// to `expired`, or `already_resolved` for any other state but
    /// `approved`.
    pub fn consume(&self, decision_id: &DecisionId) -> Result<Decision, ApprovalServiceError> {
        Ok(self.store.consume(decision_id)?)
    }

    /// Sweeps overdue `pending` decisions for `tenant_id` into `expired`,
    /// returning the ids transitioned.
    ///
    /// # Errors
    /// Propagates the store error.
    pub fn sweep_expired(&self, tenant_id: &TenantId, now: Timestamp) -> Result<Vec<DecisionId>, ApprovalServiceError> {
        Ok(self.store.sweep_expired(tenant_id, now)?)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors the approval queue service can return.
#[derive(Debug, Error)]
pub enum ApprovalServiceError {
    /// No decision exists with the given id.
    #[error("decision not found")]
    NotFound,
    /// The supplied justification is shorter than the minimum length.
    #[error("justification must be at least {} characters", crate::core::MIN_JUSTIFICATION_LEN)]
    JustificationTooShort,
    /// The approver lacks the role the decision requires.
    #[error("approver lacks the required role")]
    RoleInsufficient,
    /// The decision's `expires_at` has passed.
    #[error("decision expired")]
    DecisionExpired,
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] ApprovalQueueError),
}
