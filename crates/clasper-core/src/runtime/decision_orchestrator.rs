// clasper-core/src/runtime/decision_orchestrator.rs
// ============================================================================
// Module: Execution Decision Orchestrator
// Description: Composes adapter resolution, risk scoring, and policy
// evaluation into a single granted/blocked/pending verdict (C6).
// Purpose: Provide the one canonical decision path every API surface calls
// into, so the same request always produces the same decision and audit trail.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! [`DecisionOrchestrator::decide`] is the single canonical execution path for
//! C6. Every branch — granted, blocked, or pending — writes exactly one
//! `execution_decision` audit entry before returning, so the audit log is
//! always a faithful record of every decision ever made, not just the
//! successful ones.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::AuthContext;
use crate::core::Decision;
use crate::core::DecisionId;
use crate::core::DecisionSnapshot;
use crate::core::DecisionState;
use crate::core::Effect;
use crate::core::ExecutionDecision;
use crate::core::ExecutionRequest;
use crate::core::ExecutionScope;
use crate::core::PolicyContext;
use crate::core::evaluate;
use crate::core::risk::RiskClassInput;
use crate::core::risk::RiskInput;
use crate::core::Timestamp;
use crate::core::score;
use crate::interfaces::AdapterRegistryError;
use crate::interfaces::AdapterRegistryStore;
use crate::interfaces::ApprovalQueueError;
use crate::interfaces::ApprovalQueueStore;
use crate::interfaces::AuditLogError;
use crate::interfaces::AuditLogStore;
use crate::interfaces::PolicyStore;
use crate::interfaces::PolicyStoreError;
use crate::interfaces::TenantBudgetError;
use crate::interfaces::TenantBudgetStore;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Tenant-independent knobs governing grant sizing and decision lifetimes.
///
/// # Invariants
/// - `safety_factor` is typically `>= 1.0`; it inflates the estimated cost to
///   leave headroom for the execution's own overage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionOrchestratorConfig {
    /// Maximum execution steps granted under an `allow` decision.
    pub max_steps: u32,
    /// Multiplier applied to `estimated_cost` when sizing a granted scope's
    /// `max_cost`.
    pub safety_factor: f64,
    /// Lifetime, in seconds, of a granted [`ExecutionScope`].
    pub grant_ttl_seconds: i64,
    /// Lifetime, in seconds, of a pending [`Decision`] before it is eligible
    /// for the approval sweeper.
    pub approval_ttl_seconds: i64,
}

impl Default for DecisionOrchestratorConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            safety_factor: 1.2,
            grant_ttl_seconds: 900,
            approval_ttl_seconds: 3_600,
        }
    }
}

// ============================================================================
// SECTION: Orchestrator
// ============================================================================

/// Composes C11 (adapter resolution), C5 (risk scoring), C4 (policy
/// evaluation), C7 (approval creation), and C8 (audit logging) into the
/// single `decide()` call every execution request passes through.
pub struct DecisionOrchestrator<A, Pol, Q, B, L> {
    /// Adapter registry store.
    adapters: A,
    /// Policy store.
    policies: Pol,
    /// Approval queue store.
    approvals: Q,
    /// Tenant budget store.
    budgets: B,
    /// Audit log store.
    audit: L,
    /// Grant sizing and lifetime configuration.
    config: DecisionOrchestratorConfig,
}

impl<A, Pol, Q, B, L> DecisionOrchestrator<A, Pol, Q, B, L>
where
    A: AdapterRegistryStore,
    Pol: PolicyStore,
    Q: ApprovalQueueStore,
    B: TenantBudgetStore,
    L: AuditLogStore,
{
    /// Creates a new decision orchestrator over the given stores.
    #[must_use]
    pub fn new(
        adapters: A,
        policies: Pol,
        approvals: Q,
        budgets: B,
        audit: L,
        config: DecisionOrchestratorConfig,
    ) -> Self {
        Self {
            adapters,
            policies,
            approvals,
            budgets,
            audit,
            config,
        }
    }

    /// Decides an [`ExecutionRequest`] on behalf of `caller`.
    ///
    /// Implements the fixed six-step algorithm: validate the tenant, resolve
    /// the adapter, score risk, evaluate policy, apply the decision rule, and
    /// write exactly one `execution_decision` audit entry regardless of which
    /// branch is taken.
    ///
    /// # Errors
    /// Returns [`DecisionError`] if the caller's tenant does not match the
    /// request's, the adapter cannot be resolved, or a backing store fails.
    /// A `deny`/`require_approval` outcome is never an `Err` — those are
    /// `Ok(ExecutionDecision::Blocked)` / `Ok(ExecutionDecision::PendingApproval)`.
    pub fn decide(
        &self,
        caller: &AuthContext,
        request: ExecutionRequest,
        now: Timestamp,
    ) -> Result<ExecutionDecision, DecisionError> {
        if caller.tenant_id != request.tenant_id {
            return Err(DecisionError::TenantMismatch);
        }

        let registration = self
            .adapters
            .get(&request.tenant_id, &request.adapter_id)?
            .ok_or(DecisionError::AdapterUnknown)?;
        if !registration.enabled {
            return Err(DecisionError::AdapterDisabled);
        }
        if !registration.declares_all(&request.requested_capabilities) {
            return Err(DecisionError::CapabilityNotDeclared);
        }

        let risk = score(&RiskInput {
            requested_capabilities: request.requested_capabilities.clone(),
            adapter_risk_class: RiskClassInput(registration.risk_class),
            skill_state: None,
            temperature: None,
            data_sensitivity: None,
            external_network: request.context.as_ref().and_then(|ctx| ctx.external_network),
            elevated_privileges: request.context.as_ref().and_then(|ctx| ctx.elevated_privileges),
            provenance_source: request.provenance.as_ref().and_then(|prov| prov.source.clone()),
        });

        let policy_context = PolicyContext {
            tenant_id: Some(request.tenant_id.clone()),
            workspace_id: Some(request.workspace_id.clone()),
            environment: request.environment.clone(),
            tool: None,
            adapter_id: Some(request.adapter_id.clone()),
            adapter_risk_class: Some(registration.risk_class),
            skill_state: None,
            risk_level: Some(risk.bucket),
            estimated_cost: request.estimated_cost,
            requested_capabilities: request.requested_capabilities.clone(),
            intent: request.intent.clone(),
            context: request.context.clone(),
            provenance: request.provenance.clone(),
        };
        let policies = self.policies.load(&request.tenant_id)?;
        let evaluation = evaluate(&policies, &policy_context);

        let decision = match evaluation.effect {
            Effect::Deny => ExecutionDecision::Blocked {
                blocked_reason: crate::core::BLOCKED_BY_POLICY_REASON.to_string(),
            },
            Effect::RequireApproval => {
                self.raise_approval(&request, &risk, &evaluation, now)?
            }
            Effect::Allow if risk.bucket.forces_approval() => {
                self.raise_approval(&request, &risk, &evaluation, now)?
            }
            Effect::Allow => self.grant(&request, now)?,
        };

        let snapshot = DecisionSnapshot {
            request: request.clone(),
            risk,
            matched_policies: evaluation.matched_policies,
            decision: decision.clone(),
        };
        self.audit.append(
            &request.tenant_id,
            "execution_decision",
            now,
            request.adapter_id.as_str(),
            Some(request.execution_id.to_string()),
            serde_json::to_value(&snapshot).map_err(|err| DecisionError::Snapshot(err.to_string()))?,
        )?;

        Ok(decision)
    }

    fn raise_approval(
        &self,
        request: &ExecutionRequest,
        risk: &crate::core::RiskScore,
        evaluation: &crate::core::PolicyEvaluation,
        now: Timestamp,
    ) -> Result<ExecutionDecision, DecisionError> {
        let expires_at = now
            .checked_add_seconds(self.config.approval_ttl_seconds)
            .map_err(|_| DecisionError::ClockOverflow)?;
        let decision_id = DecisionId::new(uuid::Uuid::now_v7().to_string());
        let record = Decision {
            decision_id: decision_id.clone(),
            tenant_id: request.tenant_id.clone(),
            execution_id: request.execution_id.clone(),
            adapter_id: request.adapter_id.clone(),
            state: DecisionState::Pending,
            request_snapshot: DecisionSnapshot {
                request: request.clone(),
                risk: risk.clone(),
                matched_policies: evaluation.matched_policies.clone(),
                decision: ExecutionDecision::PendingApproval {
                    decision_id: decision_id.clone(),
                    decision_token: String::new(),
                },
            },
            required_role: evaluation.required_role.clone(),
            created_at: now,
            expires_at,
            resolved_at: None,
            resolved_by: None,
            reason_code: None,
            justification: None,
        };
        self.approvals.create(record)?;

        Ok(ExecutionDecision::PendingApproval {
            decision_token: decision_id.to_string(),
            decision_id,
        })
    }

    fn grant(&self, request: &ExecutionRequest, now: Timestamp) -> Result<ExecutionDecision, DecisionError> {
        let estimated_cost = request.estimated_cost.unwrap_or(0.0);
        let requested_cost = estimated_cost * self.config.safety_factor;
        let remaining = self.budgets.remaining_budget(&request.tenant_id)?;
        let max_cost = match remaining {
            Some(remaining) if remaining < requested_cost => {
                return Err(DecisionError::BudgetExceeded);
            }
            Some(remaining) => requested_cost.min(remaining),
            None => requested_cost,
        };
        let expires_at = now
            .checked_add_seconds(self.config.grant_ttl_seconds)
            .map_err(|_| DecisionError::ClockOverflow)?;

        Ok(ExecutionDecision::Granted {
            granted_scope: ExecutionScope {
                capabilities: request.requested_capabilities.clone(),
                max_steps: self.config.max_steps,
                max_cost,
                expires_at,
            },
        })
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors `decide()` can return. `deny` and `require_approval` policy
/// outcomes are not errors; see [`DecisionOrchestrator::decide`].
#[derive(Debug, Error)]
pub enum DecisionError {
    /// The caller's authenticated tenant does not match the request's.
    #[error("request tenant does not match the authenticated tenant")]
    TenantMismatch,
    /// No adapter registration exists for this tenant/adapter pair.
    #[error("adapter is not registered for this tenant")]
    AdapterUnknown,
    /// The adapter registration exists but is disabled.
    #[error("adapter is disabled")]
    AdapterDisabled,
    /// A requested capability is not in the adapter's declared set.
    #[error("requested capability is not declared by the adapter")]
    CapabilityNotDeclared,
    /// The tenant's remaining budget cannot cover the requested cost.
    #[error("tenant budget exceeded")]
    BudgetExceeded,
    /// A grant or approval expiry computation overflowed the clock.
    #[error("clock overflow computing an expiry")]
    ClockOverflow,
    /// The decision snapshot could not be serialized for the audit entry.
    #[error("failed to serialize decision snapshot: {0}")]
    Snapshot(String),
    /// The adapter registry store failed.
    #[error(transparent)]
    AdapterRegistry(#[from] AdapterRegistryError),
    /// The policy store failed.
    #[error(transparent)]
    PolicyStore(#[from] PolicyStoreError),
    /// The approval queue store failed.
    #[error(transparent)]
    ApprovalQueue(#[from] ApprovalQueueError),
    /// The tenant budget store failed.
    #[error(transparent)]
    TenantBudget(#[from] TenantBudgetError),
    /// The audit log store failed.
    #[error(transparent)]
    AuditLog(#[from] AuditLogError),
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;
    use crate::core::AdapterId;
    use crate::core::AdapterRegistration;
    use crate::core::Policy;
    use crate::core::PolicyConditions;
    use crate::core::PolicyScope;
    use crate::core::PolicySubject;
    use crate::core::RiskClass;
    use crate::core::SubjectType;
    use crate::core::TenantId;
    use crate::core::WorkspaceId;
    use crate::core::ReasonCode;
    use crate::core::ids::ExecutionId;
    use crate::core::ids::PolicyId;

    struct FakeAdapters(Option<AdapterRegistration>);
    impl AdapterRegistryStore for FakeAdapters {
        fn upsert(&self, _registration: AdapterRegistration) -> Result<(), AdapterRegistryError> {
            Ok(())
        }
        fn get(
            &self,
            _tenant_id: &TenantId,
            _adapter_id: &AdapterId,
        ) -> Result<Option<AdapterRegistration>, AdapterRegistryError> {
            Ok(self.0.clone())
        }
        fn list(&self, _tenant_id: &TenantId) -> Result<Vec<AdapterRegistration>, AdapterRegistryError> {
            Ok(self.0.iter().cloned().collect())
        }
        fn disable(&self, _tenant_id: &TenantId, _adapter_id: &AdapterId) -> Result<(), AdapterRegistryError> {
            Ok(())
        }
        fn set_key(
            &self,
            _tenant_id: &TenantId,
            _adapter_id: &AdapterId,
            _algorithm: crate::core::SignatureAlgorithm,
            _public_jwk: serde_json::Value,
        ) -> Result<crate::core::TelemetryKey, AdapterRegistryError> {
            unimplemented!("not exercised in these tests")
        }
        fn revoke_key(&self, _tenant_id: &TenantId, _adapter_id: &AdapterId) -> Result<(), AdapterRegistryError> {
            Ok(())
        }
    }

    struct FakePolicies(Vec<Policy>);
    impl PolicyStore for FakePolicies {
        fn load(&self, _tenant_id: &TenantId) -> Result<Vec<Policy>, PolicyStoreError> {
            Ok(self.0.clone())
        }
        fn upsert(&self, _policy: Policy) -> Result<(), PolicyStoreError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeApprovals(RefCell<Vec<Decision>>);
    impl ApprovalQueueStore for FakeApprovals {
        fn create(&self, decision: Decision) -> Result<(), ApprovalQueueError> {
            self.0.borrow_mut().push(decision);
            Ok(())
        }
        fn get(&self, decision_id: &DecisionId) -> Result<Option<Decision>, ApprovalQueueError> {
            Ok(self.0.borrow().iter().find(|d| &d.decision_id == decision_id).cloned())
        }
        fn resolve(
            &self,
            _decision_id: &DecisionId,
            _approved: bool,
            _resolved_by: &str,
            _reason_code: ReasonCode,
            _justification: &str,
            _resolved_at: Timestamp,
        ) -> Result<Decision, ApprovalQueueError> {
            unimplemented!("not exercised in these tests")
        }
        fn consume(&self, _decision_id: &DecisionId) -> Result<Decision, ApprovalQueueError> {
            unimplemented!("not exercised in these tests")
        }
        fn sweep_expired(&self, _tenant_id: &TenantId, _now: Timestamp) -> Result<Vec<DecisionId>, ApprovalQueueError> {
            Ok(Vec::new())
        }
    }

    struct FakeBudgets(Option<f64>);
    impl TenantBudgetStore for FakeBudgets {
        fn remaining_budget(&self, _tenant_id: &TenantId) -> Result<Option<f64>, TenantBudgetError> {
            Ok(self.0)
        }
    }

    #[derive(Default)]
    struct FakeAudit(RefCell<HashMap<String, u64>>);
    impl AuditLogStore for FakeAudit {
        fn append(
            &self,
            tenant_id: &TenantId,
            event_type: &str,
            occurred_at: Timestamp,
            actor: &str,
            target_id: Option<String>,
            event_data: serde_json::Value,
        ) -> Result<crate::core::AuditEntry, AuditLogError> {
            let mut seqs = self.0.borrow_mut();
            let seq = seqs.entry(tenant_id.to_string()).or_insert(0);
            *seq += 1;
            crate::core::AuditEntry::build(
                tenant_id.clone(),
                *seq,
                event_type.to_string(),
                occurred_at,
                actor.to_string(),
                target_id,
                event_data,
                crate::core::GENESIS_HASH.to_string(),
            )
            .map_err(|err| AuditLogError::Io(err.to_string()))
        }
        fn export(&self, _tenant_id: &TenantId) -> Result<Vec<crate::core::AuditEntry>, AuditLogError> {
            Ok(Vec::new())
        }
    }

    fn adapter(risk_class: RiskClass) -> AdapterRegistration {
        AdapterRegistration {
            tenant_id: TenantId::new("t1"),
            adapter_id: AdapterId::new("a1"),
            version: "1.0.0".to_string(),
            display_name: "Test Adapter".to_string(),
            risk_class,
            capabilities: vec!["llm".to_string(), "shell.exec".to_string()],
            enabled: true,
            active_key: None,
        }
    }

    fn request(capabilities: Vec<&str>) -> ExecutionRequest {
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
            estimated_cost: Some(1.0),
            tool_count: None,
            environment: None,
        }
    }

    fn caller() -> AuthContext {
        AuthContext {
            kind: crate::core::CredentialKind::Adapter,
            tenant_id: TenantId::new("t1"),
            workspace_id: None,
            user_id: None,
            agent_role: None,
            permissions: crate::core::Permissions::default(),
        }
    }

    fn orchestrator(
        registration: Option<AdapterRegistration>,
        policies: Vec<Policy>,
    ) -> DecisionOrchestrator<FakeAdapters, FakePolicies, FakeApprovals, FakeBudgets, FakeAudit> {
        DecisionOrchestrator::new(
            FakeAdapters(registration),
            FakePolicies(policies),
            FakeApprovals::default(),
            FakeBudgets(Some(1_000.0)),
            FakeAudit::default(),
            DecisionOrchestratorConfig::default(),
        )
    }

    #[test]
    fn low_risk_allow_grants_a_bounded_scope() {
        let orch = orchestrator(Some(adapter(RiskClass::Low)), Vec::new());
        let decision = orch.decide(&caller(), request(vec!["llm"]), Timestamp::now()).expect("decide");
        match decision {
            ExecutionDecision::Granted { granted_scope } => {
                assert_eq!(granted_scope.capabilities, vec!["llm".to_string()]);
                assert!(granted_scope.max_cost > 0.0);
            }
            other => panic!("expected granted decision, got {other:?}"),
        }
    }

    #[test]
    fn high_risk_allow_is_escalated_to_approval() {
        let orch = orchestrator(Some(adapter(RiskClass::Critical)), Vec::new());
        let decision = orch
            .decide(&caller(), request(vec!["shell.exec"]), Timestamp::now())
            .expect("decide");
        assert!(matches!(decision, ExecutionDecision::PendingApproval { .. }));
    }

    #[test]
    fn deny_policy_blocks_the_request() {
        let deny_all = Policy {
            policy_id: PolicyId::new("p1"),
            scope: PolicyScope {
                tenant_id: TenantId::new("t1"),
                workspace_id: None,
                environment: None,
            },
            subject: PolicySubject {
                subject_type: SubjectType::Adapter,
                name: None,
            },
            conditions: PolicyConditions::default(),
            effect: Effect::Deny,
            required_role: None,
            enabled: true,
        };
        let orch = orchestrator(Some(adapter(RiskClass::Low)), vec![deny_all]);
        let decision = orch.decide(&caller(), request(vec!["llm"]), Timestamp::now()).expect("decide");
        assert!(matches!(decision, ExecutionDecision::Blocked { .. }));
    }

    #[test]
    fn unregistered_adapter_is_rejected() {
        let orch = orchestrator(None, Vec::new());
        let err = orch.decide(&caller(), request(vec!["llm"]), Timestamp::now()).unwrap_err();
        assert!(matches!(err, DecisionError::AdapterUnknown));
    }

    #[test]
    fn undeclared_capability_is_rejected() {
        let orch = orchestrator(Some(adapter(RiskClass::Low)), Vec::new());
        let err = orch
            .decide(&caller(), request(vec!["network.egress"]), Timestamp::now())
            .unwrap_err();
        assert!(matches!(err, DecisionError::CapabilityNotDeclared));
    }

    #[test]
    fn tenant_mismatch_is_rejected_before_touching_any_store() {
        let orch = orchestrator(Some(adapter(RiskClass::Low)), Vec::new());
        let mut mismatched_caller = caller();
        mismatched_caller.tenant_id = TenantId::new("other-tenant");
        let err = orch.decide(&mismatched_caller, request(vec!["llm"]), Timestamp::now()).unwrap_err();
        assert!(matches!(err, DecisionError::TenantMismatch));
    }

    #[test]
    fn budget_exceeded_blocks_an_otherwise_allowed_grant() {
        let orch = DecisionOrchestrator::new(
            FakeAdapters(Some(adapter(RiskClass::Low))),
            FakePolicies(Vec::new()),
            FakeApprovals::default(),
            FakeBudgets(Some(0.0)),
            FakeAudit::default(),
            DecisionOrchestratorConfig::default(),
        );
        let err = orch.decide(&caller(), request(vec!["llm"]), Timestamp::now()).unwrap_err();
        assert!(matches!(err, DecisionError::BudgetExceeded));
    }
}
