// clasper-server/src/api/execution.rs
// ============================================================================
// Module: Execution Decision API
// Description: The single endpoint every adapter calls before taking an
// action: submit an ExecutionRequest, receive a granted/blocked/pending
// verdict (C6).
// Purpose: Translate the orchestrator's internal ExecutionDecision into the
// flattened response shape external callers expect, signing the real
// decision token in place of the orchestrator's placeholder.
// Dependencies: clasper-core, axum
// ============================================================================

//! ## Overview
//! [`decide`] does no governance logic of its own: it authenticates the
//! caller, calls [`clasper_core::DecisionOrchestrator::decide`], and reshapes
//! the result. The orchestrator returns `decision_token` as the bare
//! decision id (it has no signing key of its own); this handler replaces
//! that placeholder with an HMAC token from [`crate::tokens::DecisionTokenSigner`]
//! before it ever reaches a caller.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use clasper_core::ClasperError;
use clasper_core::DecisionId;
use clasper_core::ExecutionDecision;
use clasper_core::ExecutionRequest;
use clasper_core::ExecutionScope;
use clasper_core::Timestamp;
use serde::Serialize;

use crate::api::authenticate;
use crate::api::guard_concurrency;
use crate::api::with_diagnostics;
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// SECTION: Response
// ============================================================================

/// Flattened decision response: exactly one of `granted_scope`,
/// `blocked_reason`, or `decision_id`/`decision_token` is set, matching
/// which variant of [`ExecutionDecision`] the orchestrator returned.
#[derive(Debug, Serialize)]
pub struct ExecutionDecisionResponse {
    /// Whether the execution may proceed immediately.
    pub allowed: bool,
    /// Set when `allowed` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_scope: Option<ExecutionScope>,
    /// Set when the request was denied outright.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    /// Set when the request was deferred to the approval queue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires_approval: Option<bool>,
    /// The raised decision's id, when `requires_approval` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<DecisionId>,
    /// A signed token an approver presents to resolve the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_token: Option<String>,
}

impl ExecutionDecisionResponse {
    fn from_decision(decision: ExecutionDecision, state: &AppState) -> Result<Self, ApiError> {
        match decision {
            ExecutionDecision::Granted { granted_scope } => Ok(Self {
                allowed: true,
                granted_scope: Some(granted_scope),
                blocked_reason: None,
                requires_approval: None,
                decision_id: None,
                decision_token: None,
            }),
            ExecutionDecision::Blocked { blocked_reason } => Ok(Self {
                allowed: false,
                granted_scope: None,
                blocked_reason: Some(blocked_reason),
                requires_approval: None,
                decision_id: None,
                decision_token: None,
            }),
            ExecutionDecision::PendingApproval { decision_id, .. } => {
                let decision_token = state.decision_tokens.sign(&decision_id)?;
                Ok(Self {
                    allowed: false,
                    granted_scope: None,
                    blocked_reason: None,
                    requires_approval: Some(true),
                    decision_id: Some(decision_id),
                    decision_token: Some(decision_token),
                })
            }
        }
    }
}

// ============================================================================
// SECTION: Handler
// ============================================================================

/// `POST /v1/executions/decide`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails, the tenant's concurrency
/// budget is exhausted, or [`clasper_core::DecisionOrchestrator::decide`]
/// itself errors (unregistered/disabled adapter, undeclared capability,
/// tenant mismatch, budget exceeded, or a backing store failure).
pub async fn decide(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ExecutionRequest>,
) -> Result<Json<ExecutionDecisionResponse>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;
    let tenant_id = caller.tenant_id.clone();

    with_diagnostics(&state, "/v1/executions/decide", "POST", Some(&tenant_id), || {
        let decision = state.orchestrator.decide(&caller, request, Timestamp::now()).map_err(ClasperError::from)?;
        ExecutionDecisionResponse::from_decision(decision, &state)
    })
    .map(Json)
}
