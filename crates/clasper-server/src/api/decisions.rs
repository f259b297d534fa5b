// clasper-server/src/api/decisions.rs
// ============================================================================
// Module: Decision API
// Description: Get-by-id, role-gated resolve, and token-gated consume for
// pending approval-queue decisions (C7).
// Purpose: Enforce tenant ownership at the API boundary, since
// ApprovalQueueService's signatures are not themselves tenant-scoped.
// Dependencies: clasper-core, axum
// ============================================================================

//! ## Overview
//! [`ApprovalQueueStore::get`]/[`ApprovalQueueService::resolve`] accept a
//! bare [`DecisionId`] with no tenant parameter, so every handler here
//! fetches the decision first and checks `decision.tenant_id` against the
//! caller's authenticated tenant before acting on it, reporting
//! `decision_not_found` rather than `permission_denied` on a mismatch so a
//! caller cannot use this endpoint to learn that a decision id belonging to
//! another tenant exists.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use clasper_core::ClasperError;
use clasper_core::Decision;
use clasper_core::DecisionId;
use clasper_core::ReasonCode;
use clasper_core::ResolveAction;
use clasper_core::Timestamp;
use serde::Deserialize;

use crate::api::authenticate;
use crate::api::guard_concurrency;
use crate::api::with_diagnostics;
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Body of `POST /v1/decisions/{decision_id}/resolve`.
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    /// `approve` or `deny`.
    pub action: ResolveAction,
    /// Stable reason code for the resolution.
    pub reason_code: ReasonCode,
    /// Free-text justification; must be at least
    /// [`clasper_core::MIN_JUSTIFICATION_LEN`] bytes.
    pub justification: String,
}

/// Body of `POST /v1/decisions/{decision_id}/consume`.
#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    /// The signed decision token returned alongside the original
    /// `requires_approval` response.
    pub decision_token: String,
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// `GET /v1/decisions/{decision_id}`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails or the decision does not
/// exist for the caller's tenant.
pub async fn get(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(decision_id): Path<DecisionId>,
) -> Result<Json<Decision>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/decisions/{decision_id}", "GET", Some(&caller.tenant_id), || {
        let decision = state.approvals.get(&decision_id).map_err(ClasperError::from)?;
        require_same_tenant(&decision, &caller.tenant_id)?;
        Ok(decision)
    })
    .map(Json)
}

/// `POST /v1/decisions/{decision_id}/resolve`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails, the decision does not
/// exist for the caller's tenant, the justification is too short, the
/// caller lacks the decision's `required_role`, or the decision has already
/// expired or been resolved.
pub async fn resolve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(decision_id): Path<DecisionId>,
    Json(body): Json<ResolveRequest>,
) -> Result<Json<Decision>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/decisions/{decision_id}/resolve", "POST", Some(&caller.tenant_id), || {
        let existing = state.approvals.get(&decision_id).map_err(ClasperError::from)?;
        require_same_tenant(&existing, &caller.tenant_id)?;
        let resolved = state
            .approvals
            .resolve(&decision_id, &caller, body.action, body.reason_code, &body.justification, Timestamp::now())
            .map_err(ClasperError::from)?;
        Ok(resolved)
    })
    .map(Json)
}

/// `POST /v1/decisions/{decision_id}/consume`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails, the decision does not
/// exist for the caller's tenant, `decision_token` does not verify against
/// `decision_id`, or the decision is not currently `approved`.
pub async fn consume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(decision_id): Path<DecisionId>,
    Json(body): Json<ConsumeRequest>,
) -> Result<Json<Decision>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/decisions/{decision_id}/consume", "POST", Some(&caller.tenant_id), || {
        let existing = state.approvals.get(&decision_id).map_err(ClasperError::from)?;
        require_same_tenant(&existing, &caller.tenant_id)?;
        state.decision_tokens.verify(&decision_id, &body.decision_token)?;
        let consumed = state.approvals.consume(&decision_id).map_err(ClasperError::from)?;
        Ok(consumed)
    })
    .map(Json)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns `decision_not_found` rather than `permission_denied` when the
/// decision belongs to a different tenant, so the endpoint does not confirm
/// the existence of another tenant's decision id.
fn require_same_tenant(decision: &Decision, tenant_id: &clasper_core::TenantId) -> Result<(), ApiError> {
    if &decision.tenant_id == tenant_id {
        Ok(())
    } else {
        Err(ClasperError::DecisionNotFound.into())
    }
}
