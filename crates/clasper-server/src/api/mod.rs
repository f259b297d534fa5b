// clasper-server/src/api/mod.rs
// ============================================================================
// Module: HTTP API
// Description: Route table and cross-cutting request helpers (bearer
// authentication, per-tenant concurrency, diagnostics) for the six External
// Interfaces API groups (C1, C3, C4, C6, C7, C8, C10, C11).
// Purpose: One place that turns AppState into an axum Router; each group's
// handlers live in their own submodule and never construct their own
// collaborators.
// Dependencies: clasper-core, axum
// ============================================================================

//! ## Overview
//! Every handler follows the same shape: authenticate the bearer token,
//! acquire a per-tenant concurrency permit, call straight into a
//! `clasper-core` runtime service or store trait, and return
//! `Result<Json<_>, ApiError>`. `ClasperError` is the only error type a
//! handler needs to produce — every collaborator's error converts into it,
//! and [`crate::error::ApiError`] converts that into the HTTP response.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod adapters;
pub mod audit;
pub mod decisions;
pub mod execution;
pub mod policy;
pub mod telemetry;
pub mod tool_tokens;

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Router;
use axum::http::HeaderMap;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use clasper_core::AuthContext;
use clasper_core::ClasperError;
use clasper_core::TenantId;
use tokio::sync::OwnedSemaphorePermit;

use crate::diagnostics::DiagnosticEvent;
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// SECTION: Router
// ============================================================================

/// Builds the full `/v1` route table over `state`.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/executions/decide", post(execution::decide))
        .route("/v1/decisions/{decision_id}", get(decisions::get))
        .route("/v1/decisions/{decision_id}/resolve", post(decisions::resolve))
        .route("/v1/decisions/{decision_id}/consume", post(decisions::consume))
        .route("/v1/tool-tokens", post(tool_tokens::issue))
        .route("/v1/tool-tokens/consume", post(tool_tokens::consume))
        .route("/v1/telemetry", post(telemetry::ingest))
        .route("/v1/audit", get(audit::export))
        .route("/v1/policies", get(policy::list).put(policy::upsert))
        .route("/v1/policies/evaluate", post(policy::evaluate_context))
        .route("/v1/policies/dry-run", post(policy::dry_run))
        .route("/v1/adapters", get(adapters::list).put(adapters::enroll))
        .route("/v1/adapters/{adapter_id}/disable", post(adapters::disable))
        .route("/v1/adapters/{adapter_id}/key", put(adapters::set_key))
        .route("/v1/adapters/{adapter_id}/key/revoke", post(adapters::revoke_key))
        .with_state(state)
}

// ============================================================================
// SECTION: Authentication
// ============================================================================

/// Extracts and verifies the bearer token carried in `headers`.
///
/// # Errors
/// Returns [`ApiError`] wrapping [`ClasperError::MissingToken`] if no
/// well-formed `Authorization: Bearer <token>` header is present, or
/// whatever [`clasper_core::IdentityVerifier`] itself rejects the token
/// with.
pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, ApiError> {
    let token = bearer_token(headers)?;
    Ok(state.identity.verify(token).map_err(ClasperError::from)?)
}

/// Pulls the bearer token out of `headers`, without verifying it.
fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(ClasperError::MissingToken)?;
    let token = value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer ")).ok_or(ClasperError::MissingToken)?;
    if token.is_empty() {
        return Err(ClasperError::MissingToken.into());
    }
    Ok(token)
}

// ============================================================================
// SECTION: Per-Tenant Concurrency
// ============================================================================

/// Acquires a per-tenant inflight permit, rejecting the request rather than
/// queuing it when the tenant's budget is exhausted.
///
/// # Errors
/// Returns [`ApiError`] wrapping [`ClasperError::StoreUnavailable`] when
/// `tenant_id` has no free permit.
pub fn guard_concurrency(state: &AppState, tenant_id: &TenantId) -> Result<OwnedSemaphorePermit, ApiError> {
    state
        .concurrency
        .try_acquire(tenant_id)
        .ok_or_else(|| ClasperError::StoreUnavailable("tenant inflight request limit exceeded".to_string()).into())
}

// ============================================================================
// SECTION: Diagnostics
// ============================================================================

/// Records one request's outcome against `state`'s diagnostics sink.
pub fn record_diagnostics(
    state: &AppState,
    route: &'static str,
    method: &'static str,
    tenant_id: Option<&TenantId>,
    status: u16,
    error_kind: Option<&'static str>,
    latency_ms: u64,
) {
    state.diagnostics.record(&DiagnosticEvent {
        route,
        method,
        tenant_id: tenant_id.map(ToString::to_string),
        status,
        error_kind,
        latency_ms,
    });
}

/// Convenience wrapper: times `f`, records a diagnostic event under `route`
/// tagged with `tenant_id` (once known), and returns `f`'s result unchanged.
pub fn with_diagnostics<T>(
    state: &AppState,
    route: &'static str,
    method: &'static str,
    tenant_id: Option<&TenantId>,
    f: impl FnOnce() -> Result<T, ApiError>,
) -> Result<T, ApiError> {
    let start = std::time::Instant::now();
    let result = f();
    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    match &result {
        Ok(_) => record_diagnostics(state, route, method, tenant_id, 200, None, latency_ms),
        Err(err) => record_diagnostics(state, route, method, tenant_id, err.status_code().as_u16(), Some(err.0.kind()), latency_ms),
    }
    result
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderMap;
    use axum::http::HeaderValue;
    use axum::http::header::AUTHORIZATION;
    use clasper_core::ClasperError;

    use super::bearer_token;

    #[test]
    fn missing_header_is_missing_token() {
        let headers = HeaderMap::new();
        let err = bearer_token(&headers).unwrap_err();
        assert!(matches!(err.0, ClasperError::MissingToken));
    }

    #[test]
    fn well_formed_bearer_header_yields_the_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers).expect("token"), "abc123");
    }

    #[test]
    fn non_bearer_scheme_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        let err = bearer_token(&headers).unwrap_err();
        assert!(matches!(err.0, ClasperError::MissingToken));
    }
}
