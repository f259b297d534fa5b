// clasper-server/src/api/tool_tokens.rs
// ============================================================================
// Module: Tool Authorization API
// Description: Mint single-use tool tokens and let an adapter consume one
// immediately before executing the tool call it authorizes (C3).
// Purpose: There is no generic tool-execution proxy in this system (that
// logic lives in the adapter); consume is exposed as its own endpoint the
// adapter calls in the instant before it runs the tool, which is the
// closest a bounded HTTP API gets to "implicit on use".
// Dependencies: clasper-core, axum
// ============================================================================

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use clasper_core::ClasperError;
use clasper_core::ToolTokenIssued;
use clasper_core::ToolTokenRequest;
use clasper_core::Timestamp;
use serde::Deserialize;
use serde::Serialize;

use crate::api::authenticate;
use crate::api::guard_concurrency;
use crate::api::with_diagnostics;
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// SECTION: Requests / Responses
// ============================================================================

/// Body of `POST /v1/tool-tokens/consume`.
#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    /// The bearer token string returned from `issue`.
    pub token: String,
}

/// Response to a successful consume.
#[derive(Debug, Serialize)]
pub struct ConsumeResponse {
    /// Whether this call performed the single-use transition. `false` means
    /// the token had already been consumed by an earlier call.
    pub consumed: bool,
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// `POST /v1/tool-tokens`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails, the caller's tenant does
/// not match the requested token's tenant, or issuance itself fails
/// (scope hashing, clock overflow, or a backing store failure).
pub async fn issue(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ToolTokenRequest>,
) -> Result<Json<ToolTokenIssued>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/tool-tokens", "POST", Some(&caller.tenant_id), || {
        if request.tenant_id != caller.tenant_id {
            return Err(ClasperError::PermissionDenied("tool token tenant does not match caller".to_string()).into());
        }
        let issued = state.tool_tokens.issue(request, Timestamp::now()).map_err(ClasperError::from)?;
        Ok(issued)
    })
    .map(Json)
}

/// `POST /v1/tool-tokens/consume`
///
/// Takes the full signed bearer token rather than a bare `jti`: verifying
/// the signature recovers the token's claimed `tenant_id`, which is checked
/// against the caller's authenticated tenant before the single-use
/// transition runs, so a token minted for one tenant cannot be consumed by
/// a caller authenticated for another.
///
/// # Errors
/// Returns [`ApiError`] if authentication fails, the token is malformed,
/// expired, or tenant-mismatched, or the backing store fails.
pub async fn consume(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ConsumeRequest>,
) -> Result<Json<ConsumeResponse>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/tool-tokens/consume", "POST", Some(&caller.tenant_id), || {
        let now = Timestamp::now();
        let claims = state.tool_tokens.verify(&body.token, now).map_err(ClasperError::from)?;
        if claims.tenant_id != caller.tenant_id {
            return Err(ClasperError::PermissionDenied("tool token tenant does not match caller".to_string()).into());
        }
        let consumed = state.tool_tokens.consume(&claims.jti, now).map_err(ClasperError::from)?;
        Ok(ConsumeResponse { consumed })
    })
    .map(Json)
}
