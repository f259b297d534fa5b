// clasper-server/src/state.rs
// ============================================================================
// Module: Application State
// Description: Wires the SQLite store into every clasper-core runtime
// service, and composes the identity provider, token schemes, concurrency
// limiter, and diagnostics sink used by the HTTP handlers.
// Purpose: One place that owns construction order and error handling for
// everything a handler needs, so handlers themselves only ever borrow from
// `AppState` rather than building collaborators ad hoc.
// Dependencies: clasper-core, clasper-config, clasper-providers,
// clasper-store-sqlite
// ============================================================================

//! ## Overview
//! [`AppState`] is cloned into every axum handler (cheaply: every field is
//! an `Arc` or a `Clone`-cheap store handle). [`AppState::new`] is the only
//! place that turns a loaded [`ClasperConfig`] into a running set of
//! collaborators; it is also where the `decision_token_secret` and
//! `tool_token_secret` are reduced to their respective signing keys.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use clasper_config::ClasperConfig;
use clasper_core::ApprovalQueueService;
use clasper_core::AuditLogService;
use clasper_core::DecisionOrchestrator;
use clasper_core::DecisionOrchestratorConfig;
use clasper_core::ToolTokenService;
use clasper_core::TraceStoreService;
use clasper_providers::ClasperIdentityVerifier;
use clasper_providers::ClasperIdentityVerifierConfig;
use clasper_providers::DevBypassConfig;
use clasper_providers::JwksVerifier;
use clasper_providers::JwksVerifierConfig;
use clasper_providers::SymmetricVerifier;
use clasper_providers::SymmetricVerifierConfig;
use clasper_store_sqlite::ClasperSqliteStore;
use thiserror::Error;

use crate::concurrency::TenantConcurrencyLimiter;
use crate::diagnostics::DiagnosticSink;
use crate::diagnostics::NoopDiagnosticSink;
use crate::tokens::DecisionTokenSigner;
use crate::tokens::derive_tool_signing_key;

/// The one store backing every runtime service; every collaborator is
/// monomorphized over this single implementation.
type Store = ClasperSqliteStore;
/// [`DecisionOrchestrator`] monomorphized over [`Store`].
type Orchestrator = DecisionOrchestrator<Store, Store, Store, Store, Store>;
/// [`clasper_core::TelemetryIngestService`] monomorphized over [`Store`].
type TelemetryIngest = clasper_core::TelemetryIngestService<Store, Store, Store, Store>;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while assembling [`AppState`] from a loaded configuration.
#[derive(Debug, Error)]
pub enum AppStateError {
    /// The SQLite store failed to open or migrate.
    #[error("store initialization failed: {0}")]
    Store(#[from] clasper_store_sqlite::SqliteStoreError),
    /// The configured JWKS verifier could not be constructed.
    #[error("identity provider initialization failed: {0}")]
    Identity(#[from] clasper_core::IdentityError),
    /// A required secret was not configured.
    #[error("missing required secret: {0}")]
    MissingSecret(&'static str),
}

// ============================================================================
// SECTION: Application State
// ============================================================================

/// Shared, cloneable state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    /// Loaded, validated server configuration.
    pub config: Arc<ClasperConfig>,
    /// The decision orchestrator (C2 + C4 + C5 + C6 + C7 + C8 composed).
    pub orchestrator: Arc<Orchestrator>,
    /// Approval queue service (C7).
    pub approvals: Arc<ApprovalQueueService<Store>>,
    /// Audit log service (C8).
    pub audit: Arc<AuditLogService<Store>>,
    /// Execution trace service (C9).
    pub traces: Arc<TraceStoreService<Store>>,
    /// Tool token service (C10).
    pub tool_tokens: Arc<ToolTokenService<Store>>,
    /// Telemetry ingest service (C6).
    pub telemetry: Arc<TelemetryIngest>,
    /// Identity verifier (C1).
    pub identity: Arc<ClasperIdentityVerifier>,
    /// Decision-token HMAC signer.
    pub decision_tokens: Arc<DecisionTokenSigner>,
    /// Per-tenant inflight request limiter.
    pub concurrency: Arc<TenantConcurrencyLimiter>,
    /// Process diagnostics sink.
    pub diagnostics: Arc<dyn DiagnosticSink>,
    /// The raw store, for handlers that call `PolicyStore`/`AdapterRegistryStore`
    /// directly rather than through a runtime service (Policy API, Adapter
    /// Registry API).
    pub store: Store,
}

impl AppState {
    /// Builds the full application state from a loaded configuration.
    ///
    /// # Errors
    /// Returns [`AppStateError`] if the store cannot be opened, the JWKS
    /// client cannot be built, or a required secret is absent.
    pub fn new(config: ClasperConfig) -> Result<Self, AppStateError> {
        let store = ClasperSqliteStore::new(config.store_config())?;

        let decision_token_secret = config
            .decision_token_secret
            .as_deref()
            .ok_or(AppStateError::MissingSecret("decision_token_secret"))?;
        let tool_token_secret = config
            .tool_token_secret
            .as_deref()
            .ok_or(AppStateError::MissingSecret("tool_token_secret"))?;

        let orchestrator_config = DecisionOrchestratorConfig {
            grant_ttl_seconds: i64::try_from(config.grant_ttl_seconds).unwrap_or(i64::MAX),
            approval_ttl_seconds: i64::try_from(config.approval_ttl_seconds).unwrap_or(i64::MAX),
            ..DecisionOrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            orchestrator_config,
        );

        let approvals = ApprovalQueueService::new(store.clone());
        let audit = AuditLogService::new(store.clone());
        let traces = TraceStoreService::new(store.clone());
        let tool_tokens = ToolTokenService::new(store.clone(), derive_tool_signing_key(tool_token_secret));
        let telemetry = clasper_core::TelemetryIngestService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            i64::try_from(config.telemetry_max_skew_seconds).unwrap_or(i64::MAX),
        );

        let identity = build_identity_verifier(&config)?;
        let decision_tokens = DecisionTokenSigner::new(decision_token_secret);
        let concurrency = TenantConcurrencyLimiter::new(16, 4_096);

        Ok(Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            approvals: Arc::new(approvals),
            audit: Arc::new(audit),
            traces: Arc::new(traces),
            tool_tokens: Arc::new(tool_tokens),
            telemetry: Arc::new(telemetry),
            identity: Arc::new(identity),
            decision_tokens: Arc::new(decision_tokens),
            concurrency: Arc::new(concurrency),
            diagnostics: Arc::new(NoopDiagnosticSink),
            store,
        })
    }

    /// Replaces the diagnostics sink, e.g. with a file- or stderr-backed one.
    #[must_use]
    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = sink;
        self
    }
}

/// Builds the composed identity verifier from the configured secrets, JWKS
/// URL, and dev-bypass toggle.
fn build_identity_verifier(config: &ClasperConfig) -> Result<ClasperIdentityVerifier, AppStateError> {
    let symmetric = if config.identity.agent_jwt_secret.is_some() || config.identity.adapter_jwt_secret.is_some() {
        Some(SymmetricVerifier::new(SymmetricVerifierConfig {
            agent_secret: config.identity.agent_jwt_secret.clone(),
            adapter_secret: config.identity.adapter_jwt_secret.clone(),
        }))
    } else {
        None
    };

    let jwks = match &config.identity.ops_oidc_jwks_url {
        Some(url) => Some(JwksVerifier::new(JwksVerifierConfig {
            jwks_url: url.clone(),
            ..JwksVerifierConfig::default()
        })?),
        None => None,
    };

    let dev_bypass = config.dev.no_auth.then(|| DevBypassConfig {
        enabled: true,
        tenant_id: clasper_core::TenantId::new("dev-tenant"),
    });

    Ok(ClasperIdentityVerifier::new(
        symmetric,
        jwks,
        ClasperIdentityVerifierConfig {
            is_production: config.dev.is_production,
            dev_bypass,
        },
    ))
}
