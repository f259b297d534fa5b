// clasper-server/src/api/policy.rs
// ============================================================================
// Module: Policy API
// Description: Admin upsert and list of a tenant's policy set, plus two
// read-only introspection endpoints: evaluate (pure rule matching) and
// dry-run (the full decision preview, without granting or raising an
// approval) (C4).
// Purpose: Let operators author and debug policies against real request
// shapes without the side effects `DecisionOrchestrator::decide` always
// performs (audit append, approval creation, budget reservation).
// Dependencies: clasper-core, axum
// ============================================================================

//! ## Overview
//! [`evaluate`] is the bare rule matcher: given a [`PolicyContext`] and the
//! caller's tenant policy set, it returns the winning [`PolicyEvaluation`]
//! with no risk scoring involved. [`dry_run`] goes one step further and
//! mirrors [`clasper_core::DecisionOrchestrator::decide`]'s read path against
//! an [`ExecutionRequest`] — adapter lookup, risk scoring, policy evaluation
//! — to report what decision *would* be made, but stops short of calling the
//! orchestrator: `grant`/`raise_approval` are private and `decide` always
//! appends an audit entry, neither of which a dry run may do.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use clasper_core::ClasperError;
use clasper_core::Effect;
use clasper_core::ExecutionRequest;
use clasper_core::Policy;
use clasper_core::PolicyContext;
use clasper_core::PolicyEvaluation;
use clasper_core::RiskScore;
use clasper_core::core::risk::RiskClassInput;
use clasper_core::core::risk::RiskInput;
use clasper_core::evaluate;
use clasper_core::score;
use serde::Serialize;

use crate::api::authenticate;
use crate::api::guard_concurrency;
use crate::api::with_diagnostics;
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// SECTION: Response
// ============================================================================

/// Response to `POST /v1/policies/dry-run`: what `decide` would return,
/// without having run it.
#[derive(Debug, Serialize)]
pub struct DryRunResponse {
    /// The risk score computed for this request.
    pub risk: RiskScore,
    /// The winning policy evaluation.
    pub evaluation: PolicyEvaluation,
    /// Whether the request would be granted immediately.
    pub would_allow: bool,
    /// Whether the request would be deferred to the approval queue, either
    /// because a rule requires it or because the risk bucket forces it.
    pub would_require_approval: bool,
    /// Whether the request would be denied outright.
    pub would_block: bool,
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// `GET /v1/policies`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails or the backing store fails.
pub async fn list(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<Policy>>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/policies", "GET", Some(&caller.tenant_id), || {
        use clasper_core::PolicyStore;
        Ok(state.store.load(&caller.tenant_id).map_err(ClasperError::from)?)
    })
    .map(Json)
}

/// `PUT /v1/policies`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails, the policy's declared
/// `scope.tenant_id` does not match the caller's tenant, or the write fails.
pub async fn upsert(State(state): State<AppState>, headers: HeaderMap, Json(policy): Json<Policy>) -> Result<Json<Policy>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/policies", "PUT", Some(&caller.tenant_id), || {
        if policy.scope.tenant_id != caller.tenant_id {
            return Err(ClasperError::PermissionDenied("policy scope tenant does not match caller".to_string()).into());
        }
        use clasper_core::PolicyStore;
        state.store.upsert(policy.clone()).map_err(ClasperError::from)?;
        Ok(policy)
    })
    .map(Json)
}

/// `POST /v1/policies/evaluate`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails or the backing store fails.
pub async fn evaluate_context(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(context): Json<PolicyContext>,
) -> Result<Json<PolicyEvaluation>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/policies/evaluate", "POST", Some(&caller.tenant_id), || {
        use clasper_core::PolicyStore;
        let policies = state.store.load(&caller.tenant_id).map_err(ClasperError::from)?;
        Ok(evaluate(&policies, &context))
    })
    .map(Json)
}

/// `POST /v1/policies/dry-run`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails, the request's tenant does
/// not match the caller, the adapter is unregistered, disabled, or does not
/// declare every requested capability, or the backing store fails.
pub async fn dry_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ExecutionRequest>,
) -> Result<Json<DryRunResponse>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/policies/dry-run", "POST", Some(&caller.tenant_id), || {
        if request.tenant_id != caller.tenant_id {
            return Err(ClasperError::PermissionDenied("request tenant does not match the authenticated tenant".to_string()).into());
        }

        use clasper_core::AdapterRegistryStore;
        use clasper_core::PolicyStore;
        let registration = state
            .store
            .get(&request.tenant_id, &request.adapter_id)
            .map_err(ClasperError::from)?
            .ok_or(ClasperError::AdapterUnknown)?;
        if !registration.enabled {
            return Err(ClasperError::AdapterDisabled.into());
        }
        if !registration.declares_all(&request.requested_capabilities) {
            return Err(ClasperError::CapabilityNotDeclared("requested capability".to_string()).into());
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
        let policies = state.store.load(&request.tenant_id).map_err(ClasperError::from)?;
        let evaluation = evaluate(&policies, &policy_context);

        let would_block = matches!(evaluation.effect, Effect::Deny);
        let would_require_approval = !would_block
            && (matches!(evaluation.effect, Effect::RequireApproval) || risk.bucket.forces_approval());
        let would_allow = !would_block && !would_require_approval;

        Ok(DryRunResponse { risk, evaluation, would_allow, would_require_approval, would_block })
    })
    .map(Json)
}
