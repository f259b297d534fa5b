// clasper-core/src/core/execution.rs
// ============================================================================
// Module: Clasper Execution Request & Decision Data Model
// Description: The transient request and its possible decisions (C6 inputs
// and outputs).
// Purpose: Define the shape C6's decide() consumes and produces, independent
// of how policy/risk/approval are computed.
// Dependencies: crate::core::{ids, policy, risk, time}, serde
// ============================================================================

//! ## Overview
//! [`ExecutionRequest`] is transient — it is never persisted as-is, only
//! embedded in a [`Decision`]'s `request_snapshot` or an audit entry's
//! `event_data`. `tool_count` is optional and, per the product specification,
//! defaults to `requested_capabilities.len()` when absent rather than being
//! required at every call site.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::ids::AdapterId;
use crate::core::ids::DecisionId;
use crate::core::ids::ExecutionId;
use crate::core::ids::PolicyId;
use crate::core::ids::SkillId;
use crate::core::ids::TenantId;
use crate::core::ids::WorkspaceId;
use crate::core::policy::ContextConditions;
use crate::core::policy::ProvenanceConditions;
use crate::core::risk::RiskScore;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Execution Request
// ============================================================================

/// A transient request to execute with some set of capabilities.
///
/// # Invariants
/// - `tenant_id` must match the authenticated identity (checked by C6 step 1,
///   not by this type).
/// - `adapter_id` must name a registered adapter for that tenant (checked by
///   C6 step 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Execution identifier, chosen by the caller for idempotency.
    pub execution_id: ExecutionId,
    /// Adapter making the request.
    pub adapter_id: AdapterId,
    /// Authenticated tenant.
    pub tenant_id: TenantId,
    /// Workspace scope.
    pub workspace_id: WorkspaceId,
    /// Skill involved, if any.
    pub skill_id: Option<SkillId>,
    /// Capabilities requested for this execution.
    pub requested_capabilities: Vec<String>,
    /// Short verb-phrase describing intent.
    pub intent: Option<String>,
    /// Declared execution-context flags.
    pub context: Option<ContextConditions>,
    /// Declared provenance of the code/skill being executed.
    pub provenance: Option<ProvenanceConditions>,
    /// Estimated cost of the execution in the tenant's cost unit.
    pub estimated_cost: Option<f64>,
    /// Declared tool count; defaults to `requested_capabilities.len()` when absent.
    pub tool_count: Option<u32>,
    /// Deployment environment.
    pub environment: Option<String>,
}

impl ExecutionRequest {
    /// Returns the effective tool count: the declared value, or
    /// `requested_capabilities.len()` when not declared.
    #[must_use]
    pub fn effective_tool_count(&self) -> u32 {
        self.tool_count
            .unwrap_or_else(|| u32::try_from(self.requested_capabilities.len()).unwrap_or(u32::MAX))
    }
}

// ============================================================================
// SECTION: Execution Scope (Grant)
// ============================================================================

/// A bounded grant of capabilities issued by C6 on an `allow` decision.
///
/// # Invariants
/// - `capabilities` is a subset of the originating request's
///   `requested_capabilities` (Testable Property 5).
/// - `expires_at` is strictly in the future at issuance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionScope {
    /// Granted capability set.
    pub capabilities: Vec<String>,
    /// Maximum execution steps permitted under this scope.
    pub max_steps: u32,
    /// Maximum cost permitted under this scope.
    pub max_cost: f64,
    /// When this grant expires.
    pub expires_at: Timestamp,
}

// ============================================================================
// SECTION: Execution Decision
// ============================================================================

/// The stable reason code recorded when a request is blocked by policy.
pub const BLOCKED_BY_POLICY_REASON: &str = "blocked_by_policy";

/// C6's verdict on an [`ExecutionRequest`].
///
/// # Invariants
/// - Exactly one of the three shapes is produced per request; a
///   `requires_approval` decision always carries a `decision_id` pointing at
///   a freshly created C7 record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionDecision {
    /// The request is granted a bounded scope immediately.
    Granted {
        /// The bounded scope granted.
        granted_scope: ExecutionScope,
    },
    /// The request is blocked outright.
    Blocked {
        /// Stable reason code for the block.
        blocked_reason: String,
    },
    /// The request is deferred to the async approval queue.
    PendingApproval {
        /// Identifier of the newly created pending decision.
        decision_id: DecisionId,
        /// Single-use decision token for the adapter to present on consume.
        decision_token: String,
    },
}

/// The full snapshot recorded in an `execution_decision` audit entry and in
/// a pending [`Decision`]'s `request_snapshot`, so the decision is
/// reproducible even after policy changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSnapshot {
    /// The original request.
    pub request: ExecutionRequest,
    /// The computed risk score and breakdown.
    pub risk: RiskScore,
    /// Every policy that matched during evaluation.
    pub matched_policies: Vec<PolicyId>,
    /// The decision produced.
    pub decision: ExecutionDecision,
}

#[cfg(test)]
mod tests {
    use super::ExecutionRequest;
    use crate::core::ids::AdapterId;
    use crate::core::ids::ExecutionId;
    use crate::core::ids::TenantId;
    use crate::core::ids::WorkspaceId;

    fn request(capabilities: Vec<&str>, tool_count: Option<u32>) -> ExecutionRequest {
        ExecutionRequest {
            execution_id: ExecutionId::new("e1"),
            adapter_id: AdapterId::new("a1"),
            tenant_id: TenantId::new("t1"),
            workspace_id: WorkspaceId::new("w1"),
            skill_id: None,
            requested_capabilities: capabilities.into_iter().map(str::to_string).collect(),
            intent: None,
            context: None,
            provenance: None,
            estimated_cost: None,
            tool_count,
            environment: None,
        }
    }

    #[test]
    fn tool_count_defaults_to_capability_length_when_absent() {
        let req = request(vec!["llm", "shell.exec"], None);
        assert_eq!(req.effective_tool_count(), 2);
    }

    #[test]
    fn declared_tool_count_is_honored_over_capability_length() {
        let req = request(vec!["llm"], Some(5));
        assert_eq!(req.effective_tool_count(), 5);
    }
}
