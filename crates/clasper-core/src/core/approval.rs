// clasper-core/src/core/approval.rs
// ============================================================================
// Module: Clasper Async Approval Queue Data Model
// Description: Pending/resolved/consumed decisions and resolution reason
// codes (C7).
// Purpose: Define the decision lifecycle state machine's data; the store
// (`interfaces::ApprovalQueueStore`) owns atomic transitions.
// Dependencies: crate::core::{execution, ids, time}, serde
// ============================================================================

//! ## Overview
//! A [`Decision`] is created in `pending` by C6 and moves through a small
//! terminal-state machine. `denied`, `expired`, and `consumed` are terminal:
//! Testable Property 4 requires that no transition is possible out of those
//! states. This module defines the data and the pure transition-validity
//! predicate; the actual compare-and-swap lives in the store.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::execution::DecisionSnapshot;
use crate::core::ids::AdapterId;
use crate::core::ids::DecisionId;
use crate::core::ids::ExecutionId;
use crate::core::ids::TenantId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Decision State
// ============================================================================

/// The lifecycle state of a [`Decision`].
///
/// # Invariants
/// - `denied`, `expired`, and `consumed` are terminal: no further transition
///   is valid from any of them (Testable Property 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionState {
    /// Awaiting approver action.
    Pending,
    /// Approved by an identity holding `required_role`; awaiting consume.
    Approved,
    /// Denied by an identity holding `required_role`. Terminal.
    Denied,
    /// Passed `expires_at` before resolution. Terminal.
    Expired,
    /// Consumed by the adapter via its decision token. Terminal.
    Consumed,
}

impl DecisionState {
    /// Returns whether this state permits no further transition.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Denied | Self::Expired | Self::Consumed)
    }
}

// ============================================================================
// SECTION: Reason Codes
// ============================================================================

/// Stable reason codes an approver attaches when resolving a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// An operator is overriding normal policy for operational reasons.
    OpsOverride,
    /// The approver is granting a documented policy exception.
    PolicyException,
    /// The approval unblocks an active incident.
    EmergencyUnblock,
    /// The approval exists purely to exercise the approval path in a test.
    TestApproval,
}

/// Minimum length, in bytes, a resolution justification must have.
pub const MIN_JUSTIFICATION_LEN: usize = 10;

/// Returns whether `justification` meets the minimum length requirement.
#[must_use]
pub fn justification_is_valid(justification: &str) -> bool {
    justification.len() >= MIN_JUSTIFICATION_LEN
}

/// The approver's action when resolving a pending decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveAction {
    /// Transition `pending -> approved`.
    Approve,
    /// Transition `pending -> denied`.
    Deny,
}

// ============================================================================
// SECTION: Decision
// ============================================================================

/// A persisted approval-queue record.
///
/// # Invariants
/// - `required_role` must be held by the identity calling `resolve`.
/// - `resolved_at`/`resolved_by`/`reason_code`/`justification` are set
///   together, exactly once, on the `pending -> {approved, denied}` transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Server-chosen decision identifier.
    pub decision_id: DecisionId,
    /// Tenant this decision belongs to.
    pub tenant_id: TenantId,
    /// Execution this decision was raised for.
    pub execution_id: ExecutionId,
    /// Adapter that made the originating request.
    pub adapter_id: AdapterId,
    /// Current lifecycle state.
    pub state: DecisionState,
    /// Full snapshot of the originating request, risk, and matched policies.
    pub request_snapshot: DecisionSnapshot,
    /// Role an approver must hold to resolve this decision.
    pub required_role: Option<String>,
    /// When this decision was created.
    pub created_at: Timestamp,
    /// When this decision expires if left unresolved.
    pub expires_at: Timestamp,
    /// When this decision was resolved, if it has been.
    pub resolved_at: Option<Timestamp>,
    /// Identity that resolved this decision, if it has been.
    pub resolved_by: Option<String>,
    /// Reason code attached at resolution.
    pub reason_code: Option<ReasonCode>,
    /// Free-text justification attached at resolution.
    pub justification: Option<String>,
}

impl Decision {
    /// Returns whether this decision has passed its expiry but has not yet
    /// been swept into the `expired` state.
    #[must_use]
    pub fn is_overdue(&self, now: Timestamp) -> bool {
        self.state == DecisionState::Pending && self.expires_at.is_before(now)
    }
}

#[cfg(test)]
mod tests {
    use super::DecisionState;
    use super::justification_is_valid;

    #[test]
    fn terminal_states_are_marked() {
        assert!(DecisionState::Denied.is_terminal());
        assert!(DecisionState::Expired.is_terminal());
        assert!(DecisionState::Consumed.is_terminal());
        assert!(!DecisionState::Pending.is_terminal());
        assert!(!DecisionState::Approved.is_terminal());
    }

    #[test]
    fn justification_minimum_length_is_enforced() {
        assert!(!justification_is_valid("too short"));
        assert!(justification_is_valid("this is long enough"));
    }
}
