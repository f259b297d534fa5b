// clasper-server/src/api/adapters.rs
// ============================================================================
// Module: Adapter Registry API
// Description: Enroll, list, disable an adapter, and rotate or revoke its
// active telemetry key (C2).
// Purpose: Expose AdapterRegistryStore directly; there is no runtime service
// layer over it beyond the store trait itself.
// Dependencies: clasper-core, axum
// ============================================================================

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use clasper_core::AdapterId;
use clasper_core::AdapterRegistration;
use clasper_core::AdapterRegistryStore;
use clasper_core::ClasperError;
use clasper_core::SignatureAlgorithm;
use clasper_core::TelemetryKey;
use serde::Deserialize;

use crate::api::authenticate;
use crate::api::guard_concurrency;
use crate::api::with_diagnostics;
use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// SECTION: Requests
// ============================================================================

/// Body of `PUT /v1/adapters/{adapter_id}/key`.
#[derive(Debug, Deserialize)]
pub struct SetKeyRequest {
    /// Signature algorithm the new key is used with.
    pub algorithm: SignatureAlgorithm,
    /// Public key material in JWK form.
    pub public_jwk: serde_json::Value,
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// `GET /v1/adapters`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails or the backing store fails.
pub async fn list(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Vec<AdapterRegistration>>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/adapters", "GET", Some(&caller.tenant_id), || {
        Ok(state.store.list(&caller.tenant_id).map_err(ClasperError::from)?)
    })
    .map(Json)
}

/// `PUT /v1/adapters`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails, the registration's declared
/// `tenant_id` does not match the caller's tenant, or the write fails.
pub async fn enroll(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(registration): Json<AdapterRegistration>,
) -> Result<Json<AdapterRegistration>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/adapters", "PUT", Some(&caller.tenant_id), || {
        if registration.tenant_id != caller.tenant_id {
            return Err(ClasperError::PermissionDenied("adapter registration tenant does not match caller".to_string()).into());
        }
        state.store.upsert(registration.clone()).map_err(ClasperError::from)?;
        Ok(registration)
    })
    .map(Json)
}

/// `POST /v1/adapters/{adapter_id}/disable`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails or no such adapter is
/// registered for the caller's tenant.
pub async fn disable(State(state): State<AppState>, headers: HeaderMap, Path(adapter_id): Path<AdapterId>) -> Result<Json<()>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/adapters/{adapter_id}/disable", "POST", Some(&caller.tenant_id), || {
        state.store.disable(&caller.tenant_id, &adapter_id).map_err(ClasperError::from)?;
        Ok(())
    })
    .map(Json)
}

/// `PUT /v1/adapters/{adapter_id}/key`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails or the write fails.
pub async fn set_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(adapter_id): Path<AdapterId>,
    Json(body): Json<SetKeyRequest>,
) -> Result<Json<TelemetryKey>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/adapters/{adapter_id}/key", "PUT", Some(&caller.tenant_id), || {
        let key = state
            .store
            .set_key(&caller.tenant_id, &adapter_id, body.algorithm, body.public_jwk)
            .map_err(ClasperError::from)?;
        Ok(key)
    })
    .map(Json)
}

/// `POST /v1/adapters/{adapter_id}/key/revoke`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails or the write fails.
pub async fn revoke_key(State(state): State<AppState>, headers: HeaderMap, Path(adapter_id): Path<AdapterId>) -> Result<Json<()>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/adapters/{adapter_id}/key/revoke", "POST", Some(&caller.tenant_id), || {
        state.store.revoke_key(&caller.tenant_id, &adapter_id).map_err(ClasperError::from)?;
        Ok(())
    })
    .map(Json)
}
