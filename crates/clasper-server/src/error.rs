// clasper-server/src/error.rs
// ============================================================================
// Module: API Error Mapping
// Description: Maps clasper_core::ClasperError onto HTTP status codes and a
// stable JSON error body.
// Purpose: Give every handler a single `?`-compatible error type and a
// single place that decides status codes, so adding a ClasperError variant
// without updating the map is a compile error.
// Dependencies: clasper-core, axum
// ============================================================================

//! ## Overview
//! [`ApiError`] wraps [`ClasperError`] and implements `IntoResponse`. The
//! status-code match in [`ApiError::status_code`] is exhaustive over
//! `ClasperError`'s variants, not a catch-all, so the compiler enforces that
//! every new error kind gets an explicit HTTP mapping.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use clasper_core::ClasperError;
use serde::Serialize;

// ============================================================================
// SECTION: Error Body
// ============================================================================

/// Stable JSON error body returned for every non-2xx response.
#[derive(Debug, Serialize)]
struct ErrorBody {
    /// Snake-case error kind, matching [`ClasperError::kind`].
    error: &'static str,
    /// Human-readable detail. Never includes secret material.
    message: String,
    /// Whether the caller may retry the request unmodified.
    retryable: bool,
}

// ============================================================================
// SECTION: API Error
// ============================================================================

/// Thin wrapper making [`ClasperError`] a valid axum handler return type.
#[derive(Debug)]
pub struct ApiError(pub ClasperError);

impl From<ClasperError> for ApiError {
    fn from(err: ClasperError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// Maps this error's inner [`ClasperError`] variant to its HTTP status
    /// code. Exhaustive over every variant; a new variant without a mapping
    /// here fails to compile.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match &self.0 {
            ClasperError::MissingToken
            | ClasperError::TokenExpired
            | ClasperError::InvalidSignature
            | ClasperError::MissingTenant => StatusCode::UNAUTHORIZED,
            ClasperError::PermissionDenied(_) | ClasperError::RoleInsufficient => StatusCode::FORBIDDEN,
            ClasperError::SchemaInvalid(_) | ClasperError::UnsupportedAlgorithm(_) | ClasperError::JustificationTooShort => {
                StatusCode::BAD_REQUEST
            }
            ClasperError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ClasperError::AdapterUnknown
            | ClasperError::DecisionNotFound
            | ClasperError::ResourceNotFound(_) => StatusCode::NOT_FOUND,
            ClasperError::AdapterDisabled
            | ClasperError::CapabilityNotDeclared(_)
            | ClasperError::BlockedByPolicy(_)
            | ClasperError::BudgetExceeded
            | ClasperError::AlreadyResolved
            | ClasperError::DecisionExpired
            | ClasperError::InvalidToolToken
            | ClasperError::ToolTokenExpired
            | ClasperError::ToolTokenUsed(_)
            | ClasperError::PayloadHashMismatch
            | ClasperError::TimestampSkew
            | ClasperError::MissingKey
            | ClasperError::KeyRevoked => StatusCode::CONFLICT,
            ClasperError::RequiresApproval(_) => StatusCode::ACCEPTED,
            ClasperError::StoreConflict => StatusCode::CONFLICT,
            ClasperError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ClasperError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ClasperError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.0.kind(),
            message: self.0.to_string(),
            retryable: self.0.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::ApiError;
    use axum::http::StatusCode;
    use clasper_core::ClasperError;

    #[test]
    fn missing_token_is_unauthorized() {
        let err = ApiError(ClasperError::MissingToken);
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn requires_approval_is_accepted() {
        let err = ApiError(ClasperError::RequiresApproval(clasper_core::DecisionId::new("d1")));
        assert_eq!(err.status_code(), StatusCode::ACCEPTED);
    }

    #[test]
    fn store_unavailable_is_service_unavailable() {
        let err = ApiError(ClasperError::StoreUnavailable("disk full".to_string()));
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn payload_too_large_maps_to_413() {
        let err = ApiError(ClasperError::PayloadTooLarge);
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
