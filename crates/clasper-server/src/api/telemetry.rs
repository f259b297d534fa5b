// clasper-server/src/api/telemetry.rs
// ============================================================================
// Module: Telemetry Ingest API
// Description: Accepts a signed telemetry envelope from an adapter and runs
// it through the ingest pipeline under the tenant's configured enforcement
// mode (C10).
// Purpose: Translate between clasper-config's `EnforcementMode` (the
// deployment-time setting) and clasper-core's own `EnforcementMode` (the
// pipeline parameter), and report a verified/accepted verdict distinct from
// whether the envelope was ultimately dispatched.
// Dependencies: clasper-core, clasper-config, axum
// ============================================================================

//! ## Overview
//! Two distinct `EnforcementMode` types exist: [`clasper_config::EnforcementMode`]
//! is what operators configure, [`clasper_core::EnforcementMode`] is what
//! [`clasper_core::TelemetryIngestService::ingest`] takes. [`to_core_mode`]
//! is the one place that bridges them. Under `warn`, a failed verification is
//! still accepted and dispatched (recorded as a violation); this handler
//! reports that distinction to the caller via `verified` separately from
//! `accepted`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use clasper_core::ClasperError;
use clasper_core::SignedTelemetryEnvelope;
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

/// Response to a telemetry ingest call.
#[derive(Debug, Serialize)]
pub struct IngestReceipt {
    /// Whether the envelope was dispatched to its sink (always true unless
    /// `enforce` mode rejected it, or it was a seen-before duplicate).
    pub accepted: bool,
    /// Whether signature and skew verification passed. `None` under `off`,
    /// where verification does not run at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,
    /// The enforcement mode this ingest ran under.
    pub mode: &'static str,
}

// ============================================================================
// SECTION: Enforcement Mode Bridge
// ============================================================================

/// Converts the deployment-configured enforcement mode into the one
/// [`clasper_core::TelemetryIngestService::ingest`] takes. A 1:1 mapping;
/// the two types exist because `clasper-config` additionally derives
/// `FromStr`/`Default` for TOML/env parsing, which `clasper-core` has no
/// need of.
const fn to_core_mode(mode: clasper_config::EnforcementMode) -> clasper_core::EnforcementMode {
    match mode {
        clasper_config::EnforcementMode::Off => clasper_core::EnforcementMode::Off,
        clasper_config::EnforcementMode::Warn => clasper_core::EnforcementMode::Warn,
        clasper_config::EnforcementMode::Enforce => clasper_core::EnforcementMode::Enforce,
    }
}

const fn mode_label(mode: clasper_core::EnforcementMode) -> &'static str {
    match mode {
        clasper_core::EnforcementMode::Off => "off",
        clasper_core::EnforcementMode::Warn => "warn",
        clasper_core::EnforcementMode::Enforce => "enforce",
    }
}

// ============================================================================
// SECTION: Handler
// ============================================================================

/// `POST /v1/telemetry`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails, the adapter is unregistered
/// or has no active telemetry key, or (under `enforce`) verification itself
/// fails (payload hash mismatch, timestamp skew, revoked key, bad
/// signature).
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(envelope): Json<SignedTelemetryEnvelope>,
) -> Result<Json<IngestReceipt>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/telemetry", "POST", Some(&caller.tenant_id), || {
        let now = Timestamp::now();
        let mode = to_core_mode(state.config.telemetry_signature_mode);

        let verified = if matches!(mode, clasper_core::EnforcementMode::Off) {
            None
        } else {
            Some(state.telemetry.verify(&caller.tenant_id, &envelope, now).is_ok())
        };

        state.telemetry.ingest(&caller.tenant_id, &envelope, mode, now).map_err(ClasperError::from)?;

        Ok(IngestReceipt { accepted: true, verified, mode: mode_label(mode) })
    })
    .map(Json)
}
