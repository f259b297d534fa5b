// clasper-server/src/api/audit.rs
// ============================================================================
// Module: Audit API
// Description: Export a tenant's hash-chained audit log, with a verification
// verdict, paginated by sequence number (C8).
// Purpose: Let operators pull the append-only log and independently confirm
// the chain has not been tampered with, without re-implementing
// verify_chain client-side.
// Dependencies: clasper-core, axum
// ============================================================================

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use clasper_core::AuditEntry;
use clasper_core::ChainBreak;
use clasper_core::ClasperError;
use serde::Deserialize;
use serde::Serialize;

use crate::api::authenticate;
use crate::api::guard_concurrency;
use crate::api::with_diagnostics;
use crate::error::ApiError;
use crate::state::AppState;

/// Default page size for `GET /v1/audit` when `limit` is not given.
const DEFAULT_PAGE_LIMIT: usize = 100;

// ============================================================================
// SECTION: Request / Response
// ============================================================================

/// Query parameters for `GET /v1/audit`.
#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    /// Only entries with `seq > after` are returned.
    #[serde(default)]
    pub after: Option<u64>,
    /// Maximum number of entries to return. Defaults to
    /// [`DEFAULT_PAGE_LIMIT`].
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Response to `GET /v1/audit`.
#[derive(Debug, Serialize)]
pub struct AuditExportResponse {
    /// The page of entries, in ascending `seq` order.
    pub entries: Vec<AuditEntry>,
    /// `seq` of the last entry in `entries`, to pass as the next page's
    /// `after`. Absent when the page is empty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_after: Option<u64>,
    /// Whether more entries exist past this page.
    pub has_more: bool,
    /// Chain breaks found across the tenant's *entire* chain, not just this
    /// page — verification always runs over the full export so a break
    /// outside the current page is still surfaced.
    pub chain_breaks: Vec<ChainBreak>,
}

// ============================================================================
// SECTION: Handler
// ============================================================================

/// `GET /v1/audit`
///
/// # Errors
/// Returns [`ApiError`] if authentication fails or the backing store fails.
pub async fn export(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditExportResponse>, ApiError> {
    let caller = authenticate(&state, &headers)?;
    let _permit = guard_concurrency(&state, &caller.tenant_id)?;

    with_diagnostics(&state, "/v1/audit", "GET", Some(&caller.tenant_id), || {
        let chain_breaks = state.audit.verify(&caller.tenant_id).map_err(ClasperError::from)?;
        let all = state.audit.export(&caller.tenant_id).map_err(ClasperError::from)?;

        let after = query.after.unwrap_or(0);
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).max(1);
        let mut page: Vec<AuditEntry> = all.into_iter().filter(|entry| entry.seq > after).collect();
        let has_more = page.len() > limit;
        page.truncate(limit);
        let next_after = page.last().map(|entry| entry.seq);

        Ok(AuditExportResponse { entries: page, next_after, has_more, chain_breaks })
    })
    .map(Json)
}
