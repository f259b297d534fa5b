// clasper-core/src/core/policy.rs
// ============================================================================
// Module: Clasper Policy Data Model & Matcher
// Description: Tenant-scoped policy rules and the pure condition-matching
// algorithm that evaluates a request against them (C4).
// Purpose: Keep matching a total, deterministic, side-effect-free function so
// that C6's decisions are reproducible given the same policy set and request.
// Dependencies: crate::core::ids, serde
// ============================================================================

//! ## Overview
//! Policy storage (load/upsert/cache) is an I/O concern handled by
//! `interfaces::PolicyStore`; this module only defines the data and the pure
//! `evaluate` function. Missing context fields are *unknown* and never
//! satisfy a condition — this is the load-bearing rule behind Testable
//! Property 7 (policy unknown semantics).

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::adapter::RiskClass;
use crate::core::ids::AdapterId;
use crate::core::ids::PolicyId;
use crate::core::ids::TenantId;
use crate::core::ids::WorkspaceId;
use crate::core::risk::RiskBucket;

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Subject kind a policy rule targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    /// The rule targets a specific tool name.
    Tool,
    /// The rule targets a specific adapter.
    Adapter,
    /// The rule targets a specific skill.
    Skill,
}

/// The subject a policy rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySubject {
    /// Subject kind.
    #[serde(rename = "type")]
    pub subject_type: SubjectType,
    /// Optional exact name the subject must match.
    pub name: Option<String>,
}

/// The effect a matching policy rule produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    /// Permit the request outright.
    Allow,
    /// Reject the request.
    Deny,
    /// Defer the request to the async approval queue.
    RequireApproval,
}

impl Effect {
    /// Returns this effect's precedence rank; higher wins when multiple
    /// rules match: `deny` > `require_approval` > `allow`.
    const fn precedence(self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::RequireApproval => 1,
            Self::Deny => 2,
        }
    }
}

/// The scope a policy rule is confined to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyScope {
    /// Tenant this rule belongs to; must equal the evaluating context's tenant.
    pub tenant_id: TenantId,
    /// Optional workspace restriction.
    pub workspace_id: Option<WorkspaceId>,
    /// Optional environment restriction (e.g. `"production"`).
    pub environment: Option<String>,
}

/// Nested execution-context conditions a policy rule may pin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConditions {
    /// Require (or forbid) outbound network access.
    pub external_network: Option<bool>,
    /// Require (or forbid) filesystem writes.
    pub writes_files: Option<bool>,
    /// Require (or forbid) elevated privileges.
    pub elevated_privileges: Option<bool>,
    /// Require (or forbid) package manager usage.
    pub package_manager: Option<bool>,
    /// Required subset of target identifiers the request must touch.
    pub targets: Option<Vec<String>>,
}

/// Nested provenance conditions a policy rule may pin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceConditions {
    /// Required provenance source (`marketplace`, `internal`, `git`, `unknown`).
    pub source: Option<String>,
    /// Required publisher name.
    pub publisher: Option<String>,
    /// Required artifact content hash.
    pub artifact_hash: Option<String>,
}

/// Flat and nested conditions a policy rule must satisfy to match.
///
/// # Invariants
/// - Every field is optional; an unset field imposes no constraint. A set
///   field whose corresponding context value is absent never matches
///   (unknown ≠ any specific value, including `false`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConditions {
    /// Required tool name.
    pub tool: Option<String>,
    /// Required adapter risk class.
    pub adapter_risk_class: Option<RiskClass>,
    /// Required skill maturity state.
    pub skill_state: Option<String>,
    /// Required risk bucket.
    pub risk_level: Option<RiskBucket>,
    /// Minimum estimated cost (inclusive) the request must have.
    pub min_cost: Option<f64>,
    /// Maximum estimated cost (inclusive) the request must have.
    pub max_cost: Option<f64>,
    /// A capability that must be present in `requested_capabilities`.
    pub capability: Option<String>,
    /// Nested execution-context conditions.
    pub context: Option<ContextConditions>,
    /// Nested provenance conditions.
    pub provenance: Option<ProvenanceConditions>,
}

/// A single tenant-scoped policy rule.
///
/// # Invariants
/// - `policy_id` is unique per tenant.
/// - Never mutated mid-evaluation; evaluation reads an immutable snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Policy identifier, unique per tenant.
    pub policy_id: PolicyId,
    /// Scope this rule is confined to.
    pub scope: PolicyScope,
    /// Subject this rule targets.
    pub subject: PolicySubject,
    /// Conditions that must all be satisfied to match.
    pub conditions: PolicyConditions,
    /// Effect produced when this rule matches.
    pub effect: Effect,
    /// Role required to resolve an approval raised by this rule, if `effect`
    /// is `require_approval`.
    pub required_role: Option<String>,
    /// Whether this rule currently participates in evaluation.
    pub enabled: bool,
}

// ============================================================================
// SECTION: Policy Context
// ============================================================================

/// The enriched request context evaluated against a tenant's policy set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyContext {
    /// Authenticated tenant.
    pub tenant_id: Option<TenantId>,
    /// Workspace scope, if any.
    pub workspace_id: Option<WorkspaceId>,
    /// Deployment environment, if declared.
    pub environment: Option<String>,
    /// Tool name being authorized, if this evaluation is tool-scoped.
    pub tool: Option<String>,
    /// Adapter making the request.
    pub adapter_id: Option<AdapterId>,
    /// Adapter's risk class.
    pub adapter_risk_class: Option<RiskClass>,
    /// Skill maturity state.
    pub skill_state: Option<String>,
    /// Computed risk bucket (set after C5 runs).
    pub risk_level: Option<RiskBucket>,
    /// Estimated cost of the execution.
    pub estimated_cost: Option<f64>,
    /// Requested capability set.
    pub requested_capabilities: Vec<String>,
    /// Declared intent phrase.
    pub intent: Option<String>,
    /// Declared execution-context flags.
    pub context: Option<ContextConditions>,
    /// Declared provenance.
    pub provenance: Option<ProvenanceConditions>,
}

// ============================================================================
// SECTION: Evaluation
// ============================================================================

/// The result of evaluating a [`PolicyContext`] against a policy set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    /// Winning effect after precedence resolution. Defaults to `Allow` when
    /// no rule matches (the default-allow posture fixed at C4; see C6 for
    /// how unmatched high/critical risk is separately escalated).
    pub effect: Effect,
    /// Every rule that matched, in the order they were evaluated.
    pub matched_policies: Vec<PolicyId>,
    /// The `required_role` carried by the winning rule, if it is
    /// `require_approval`.
    pub required_role: Option<String>,
}

/// Evaluates `context` against `policies`, returning the winning effect and
/// every matched policy id.
///
/// Match algorithm, in order, for each enabled policy:
/// 1. Scope filter: rule's `tenant_id` must equal the context's; an optional
///    `workspace_id`/`environment` must match if the rule specifies one.
/// 2. Subject filter: `type` must match; `name`, if specified, must equal the
///    corresponding context field (`tool` or `adapter_id`, by subject type).
/// 3. Condition filter: every specified condition must be satisfied. A
///    context field that is absent never satisfies a condition that names it.
///
/// Multiple rules may match; the highest-precedence effect wins:
/// `deny` > `require_approval` > `allow`. No match yields `allow`.
#[must_use]
pub fn evaluate(policies: &[Policy], context: &PolicyContext) -> PolicyEvaluation {
    let mut matched_policies = Vec::new();
    let mut winner: Option<&Policy> = None;

    for policy in policies.iter().filter(|policy| policy.enabled) {
        if !scope_matches(policy, context) {
            continue;
        }
        if !subject_matches(policy, context) {
            continue;
        }
        if !conditions_match(policy, context) {
            continue;
        }

        matched_policies.push(policy.policy_id.clone());
        winner = match winner {
            Some(current) if current.effect.precedence() >= policy.effect.precedence() => {
                Some(current)
            }
            _ => Some(policy),
        };
    }

    match winner {
        Some(policy) => PolicyEvaluation {
            effect: policy.effect,
            matched_policies,
            required_role: policy.required_role.clone(),
        },
        None => PolicyEvaluation {
            effect: Effect::Allow,
            matched_policies,
            required_role: None,
        },
    }
}

fn scope_matches(policy: &Policy, context: &PolicyContext) -> bool {
    if context.tenant_id.as_ref() != Some(&policy.scope.tenant_id) {
        return false;
    }
    if let Some(workspace_id) = &policy.scope.workspace_id {
        if context.workspace_id.as_ref() != Some(workspace_id) {
            return false;
        }
    }
    if let Some(environment) = &policy.scope.environment {
        if context.environment.as_deref() != Some(environment.as_str()) {
            return false;
        }
    }
    true
}

fn subject_matches(policy: &Policy, context: &PolicyContext) -> bool {
    let name_field = match policy.subject.subject_type {
        SubjectType::Tool => context.tool.as_deref(),
        SubjectType::Adapter => context.adapter_id.as_ref().map(|id| id.as_str()),
        SubjectType::Skill => context.skill_state.as_deref(),
    };
    match &policy.subject.name {
        Some(expected) => name_field == Some(expected.as_str()),
        None => true,
    }
}

fn conditions_match(policy: &Policy, context: &PolicyContext) -> bool {
    let conditions = &policy.conditions;

    if let Some(tool) = &conditions.tool {
        if context.tool.as_deref() != Some(tool.as_str()) {
            return false;
        }
    }
    if let Some(risk_class) = conditions.adapter_risk_class {
        if context.adapter_risk_class != Some(risk_class) {
            return false;
        }
    }
    if let Some(skill_state) = &conditions.skill_state {
        if context.skill_state.as_deref() != Some(skill_state.as_str()) {
            return false;
        }
    }
    if let Some(risk_level) = conditions.risk_level {
        if context.risk_level != Some(risk_level) {
            return false;
        }
    }
    if let Some(min_cost) = conditions.min_cost {
        match context.estimated_cost {
            Some(cost) if cost >= min_cost => {}
            _ => return false,
        }
    }
    if let Some(max_cost) = conditions.max_cost {
        match context.estimated_cost {
            Some(cost) if cost <= max_cost => {}
            _ => return false,
        }
    }
    if let Some(capability) = &conditions.capability {
        if !context.requested_capabilities.iter().any(|c| c == capability) {
            return false;
        }
    }
    if let Some(required_context) = &conditions.context {
        match &context.context {
            Some(ctx) => {
                if !context_subset_matches(required_context, ctx) {
                    return false;
                }
            }
            None => return false,
        }
    }
    if let Some(required_provenance) = &conditions.provenance {
        match &context.provenance {
            Some(provenance) => {
                if !provenance_subset_matches(required_provenance, provenance) {
                    return false;
                }
            }
            None => return false,
        }
    }

    true
}

fn context_subset_matches(required: &ContextConditions, actual: &ContextConditions) -> bool {
    if let Some(value) = required.external_network {
        if actual.external_network != Some(value) {
            return false;
        }
    }
    if let Some(value) = required.writes_files {
        if actual.writes_files != Some(value) {
            return false;
        }
    }
    if let Some(value) = required.elevated_privileges {
        if actual.elevated_privileges != Some(value) {
            return false;
        }
    }
    if let Some(value) = required.package_manager {
        if actual.package_manager != Some(value) {
            return false;
        }
    }
    if let Some(required_targets) = &required.targets {
        match &actual.targets {
            Some(actual_targets) => {
                if !required_targets.iter().all(|target| actual_targets.contains(target)) {
                    return false;
                }
            }
            None => return false,
        }
    }
    true
}

fn provenance_subset_matches(required: &ProvenanceConditions, actual: &ProvenanceConditions) -> bool {
    if let Some(source) = &required.source {
        if actual.source.as_deref() != Some(source.as_str()) {
            return false;
        }
    }
    if let Some(publisher) = &required.publisher {
        if actual.publisher.as_deref() != Some(publisher.as_str()) {
            return false;
        }
    }
    if let Some(artifact_hash) = &required.artifact_hash {
        if actual.artifact_hash.as_deref() != Some(artifact_hash.as_str()) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(effect: Effect, conditions: PolicyConditions, tenant: &str) -> Policy {
        Policy {
            policy_id: PolicyId::new("p1"),
            scope: PolicyScope {
                tenant_id: TenantId::new(tenant),
                workspace_id: None,
                environment: None,
            },
            subject: PolicySubject {
                subject_type: SubjectType::Adapter,
                name: None,
            },
            conditions,
            effect,
            required_role: None,
            enabled: true,
        }
    }

    #[test]
    fn no_matching_rule_defaults_to_allow() {
        let result = evaluate(&[], &PolicyContext::default());
        assert_eq!(result.effect, Effect::Allow);
        assert!(result.matched_policies.is_empty());
    }

    #[test]
    fn unknown_context_field_never_matches_a_condition_naming_it() {
        let conditions = PolicyConditions {
            context: Some(ContextConditions {
                external_network: Some(true),
                ..ContextConditions::default()
            }),
            ..PolicyConditions::default()
        };
        let rule = policy(Effect::Deny, conditions, "t1");
        let context = PolicyContext {
            tenant_id: Some(TenantId::new("t1")),
            context: None,
            ..PolicyContext::default()
        };
        let result = evaluate(&[rule], &context);
        assert_eq!(result.effect, Effect::Allow);
        assert!(result.matched_policies.is_empty());
    }

    #[test]
    fn deny_outranks_require_approval_and_allow() {
        let deny = policy(Effect::Deny, PolicyConditions::default(), "t1");
        let mut approval = policy(Effect::RequireApproval, PolicyConditions::default(), "t1");
        approval.policy_id = PolicyId::new("p2");
        let context = PolicyContext {
            tenant_id: Some(TenantId::new("t1")),
            ..PolicyContext::default()
        };
        let result = evaluate(&[approval, deny], &context);
        assert_eq!(result.effect, Effect::Deny);
        assert_eq!(result.matched_policies.len(), 2);
    }

    #[test]
    fn marketplace_shell_exec_scenario_matches_when_context_declared() {
        let conditions = PolicyConditions {
            capability: Some("shell.exec".to_string()),
            context: Some(ContextConditions {
                external_network: Some(true),
                ..ContextConditions::default()
            }),
            provenance: Some(ProvenanceConditions {
                source: Some("marketplace".to_string()),
                ..ProvenanceConditions::default()
            }),
            ..PolicyConditions::default()
        };
        let rule = policy(Effect::Deny, conditions, "t1");
        let context = PolicyContext {
            tenant_id: Some(TenantId::new("t1")),
            requested_capabilities: vec!["shell.exec".to_string()],
            context: Some(ContextConditions {
                external_network: Some(true),
                ..ContextConditions::default()
            }),
            provenance: Some(ProvenanceConditions {
                source: Some("marketplace".to_string()),
                ..ProvenanceConditions::default()
            }),
            ..PolicyContext::default()
        };
        let result = evaluate(&[rule], &context);
        assert_eq!(result.effect, Effect::Deny);
    }

    #[test]
    fn targets_condition_matches_when_required_targets_are_a_subset() {
        let conditions = PolicyConditions {
            context: Some(ContextConditions {
                targets: Some(vec!["prod-db".to_string()]),
                ..ContextConditions::default()
            }),
            ..PolicyConditions::default()
        };
        let rule = policy(Effect::Deny, conditions, "t1");
        let context = PolicyContext {
            tenant_id: Some(TenantId::new("t1")),
            context: Some(ContextConditions {
                targets: Some(vec!["prod-db".to_string(), "staging-db".to_string()]),
                ..ContextConditions::default()
            }),
            ..PolicyContext::default()
        };
        let result = evaluate(&[rule], &context);
        assert_eq!(result.effect, Effect::Deny);
    }

    #[test]
    fn targets_condition_never_matches_when_declared_targets_are_absent() {
        let conditions = PolicyConditions {
            context: Some(ContextConditions {
                targets: Some(vec!["prod-db".to_string()]),
                ..ContextConditions::default()
            }),
            ..PolicyConditions::default()
        };
        let rule = policy(Effect::Deny, conditions, "t1");
        let context = PolicyContext {
            tenant_id: Some(TenantId::new("t1")),
            context: Some(ContextConditions::default()),
            ..PolicyContext::default()
        };
        let result = evaluate(&[rule], &context);
        assert_eq!(result.effect, Effect::Allow);
    }
}
