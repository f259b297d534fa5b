// clasper-core/src/core/identity.rs
// ============================================================================
// Module: Clasper Identity & Tenant Context
// Description: Verified identity claims and permission predicates (C1).
// Purpose: Give every downstream component a single, already-verified context
// value instead of re-parsing or re-trusting a bearer token.
// Dependencies: crate::core::ids, serde
// ============================================================================

//! ## Overview
//! Token verification itself (JWT/JWKS parsing, HMAC/ES256 checks) lives in
//! the provider/server layer, which depends on this crate; this module only
//! defines the *result* of a successful verification — [`AuthContext`] — and
//! the pure predicates every component calls instead of re-deriving
//! permission logic. Fetching "the current tenant" from ambient state is
//! forbidden: every function that needs it takes an `&AuthContext` explicitly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::ids::TenantId;
use crate::core::ids::WorkspaceId;

// ============================================================================
// SECTION: Credential Kind
// ============================================================================

/// Which of the three credential kinds a request presented.
///
/// # Invariants
/// - Every inbound request carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// An execution adapter authenticating with `ADAPTER_JWT_SECRET`.
    Adapter,
    /// A human operator authenticated via the configured OIDC/JWKS provider.
    Operator,
    /// The tenant's own backend control plane, authenticating with `AGENT_JWT_SECRET`.
    Backend,
    /// A synthetic identity fabricated by the non-production development bypass.
    DevBypass,
}

// ============================================================================
// SECTION: Permissions
// ============================================================================

/// Permission claims carried on a verified credential.
///
/// # Invariants
/// - Missing fields (`None` / empty vectors) mean unrestricted, not "deny
///   all"; absence of a restriction is itself meaningful.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    /// Tool name patterns this identity may invoke; `*` or `ns:*` match as wildcards.
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Model name patterns this identity may request.
    #[serde(default)]
    pub allowed_models: Vec<String>,
    /// Skill name patterns this identity may invoke.
    #[serde(default)]
    pub allowed_skills: Vec<String>,
    /// Maximum tokens per request, if bounded.
    pub max_tokens: Option<u64>,
    /// Remaining budget in the tenant's cost unit, if tracked on the token.
    pub budget_remaining: Option<f64>,
    /// Roles granted to this identity, used by C7's `required_role` check.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Returns whether `pattern` matches `value`, honoring the `*` and
/// `namespace:*` wildcard forms. An empty pattern list (the caller's
/// responsibility to check) means unrestricted and is not handled here.
fn pattern_matches(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(namespace) = pattern.strip_suffix(":*") {
        return value
            .split_once(':')
            .is_some_and(|(value_namespace, _)| value_namespace == namespace);
    }
    pattern == value
}

fn any_pattern_matches(patterns: &[String], value: &str) -> bool {
    patterns.iter().any(|pattern| pattern_matches(pattern, value))
}

impl Permissions {
    /// Returns whether this identity may use `tool`. Unrestricted (empty
    /// list) when no `allowed_tools` claim was present.
    #[must_use]
    pub fn can_use_tool(&self, tool: &str) -> bool {
        self.allowed_tools.is_empty() || any_pattern_matches(&self.allowed_tools, tool)
    }

    /// Returns whether this identity may use `model`.
    #[must_use]
    pub fn can_use_model(&self, model: &str) -> bool {
        self.allowed_models.is_empty() || any_pattern_matches(&self.allowed_models, model)
    }

    /// Returns whether this identity may use `skill`.
    #[must_use]
    pub fn can_use_skill(&self, skill: &str) -> bool {
        self.allowed_skills.is_empty() || any_pattern_matches(&self.allowed_skills, skill)
    }

    /// Returns whether `cost` is covered by the remaining budget.
    /// Unrestricted (no budget claim) always has budget.
    #[must_use]
    pub fn has_budget(&self, cost: f64) -> bool {
        self.budget_remaining.is_none_or(|remaining| cost <= remaining)
    }

    /// Returns whether `requested_tokens` is within `max_tokens`.
    /// Unrestricted (no claim) is always within limit.
    #[must_use]
    pub fn within_token_limit(&self, requested_tokens: u64) -> bool {
        self.max_tokens.is_none_or(|max| requested_tokens <= max)
    }

    /// Returns whether `role` is among the granted roles.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|granted| granted == role)
    }
}

// ============================================================================
// SECTION: Auth Context
// ============================================================================

/// A verified identity, attached to the request scope.
///
/// # Invariants
/// - `tenant_id` is always present; verification fails with
///   `ClasperError::MissingTenant` before an `AuthContext` can be constructed
///   without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    /// Which credential kind this identity presented.
    pub kind: CredentialKind,
    /// Tenant this identity is scoped to.
    pub tenant_id: TenantId,
    /// Workspace this identity is scoped to, if the credential named one.
    pub workspace_id: Option<WorkspaceId>,
    /// Operator user id, present only for operator credentials.
    pub user_id: Option<String>,
    /// Agent role string, present only for adapter credentials.
    pub agent_role: Option<String>,
    /// Permission claims carried on the credential.
    pub permissions: Permissions,
}

impl AuthContext {
    /// Returns whether `budget_remaining` was present at all ("unknown" vs
    /// "known to be zero" distinction, since the spec treats missing
    /// declarations as a first-class condition rather than defaulting them).
    #[must_use]
    pub const fn has_declared_budget(&self) -> bool {
        self.permissions.budget_remaining.is_some()
    }
}
