// clasper-core/src/core/mod.rs
// ============================================================================
// Module: Clasper Core Types
// Description: Canonical Clasper data model — identity, policy, risk,
// execution, approval, audit, trace, tool tokens, telemetry, and the
// adapter registry.
// Purpose: Provide stable, serializable types that are the single source of
// truth for every derived surface (HTTP, CLI, storage).
// Dependencies: serde, serde_jcs, sha2, thiserror, time, uuid
// ============================================================================

//! ## Overview
//! Core types are pure data plus pure predicates; nothing here performs I/O.
//! Stateful orchestration over these types lives in `crate::runtime`, and
//! the storage contracts they're evaluated against live in
//! `crate::interfaces`.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod adapter;
pub mod approval;
pub mod audit;
pub mod errors;
pub mod execution;
pub mod hashing;
pub mod identity;
pub mod ids;
pub mod policy;
pub mod risk;
pub mod telemetry;
pub mod time;
pub mod tooltoken;
pub mod trace;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use adapter::AdapterRegistration;
pub use adapter::RiskClass;
pub use adapter::SignatureAlgorithm;
pub use adapter::TelemetryKey;
pub use approval::Decision;
pub use approval::DecisionState;
pub use approval::MIN_JUSTIFICATION_LEN;
pub use approval::ReasonCode;
pub use approval::ResolveAction;
pub use approval::justification_is_valid;
pub use audit::AuditEntry;
pub use audit::ChainBreak;
pub use audit::ChainBreakReason;
pub use audit::GENESIS_HASH;
pub use audit::verify_chain;
pub use errors::ClasperError;
pub use execution::BLOCKED_BY_POLICY_REASON;
pub use execution::DecisionSnapshot;
pub use execution::ExecutionDecision;
pub use execution::ExecutionRequest;
pub use execution::ExecutionScope;
pub use hashing::HashError;
pub use hashing::canonical_json;
pub use hashing::format_hash;
pub use hashing::formatted_sha256_json;
pub use hashing::sha256_hex;
pub use hashing::sha256_json;
pub use identity::AuthContext;
pub use identity::CredentialKind;
pub use identity::Permissions;
pub use ids::AdapterId;
pub use ids::CorrelationId;
pub use ids::DecisionId;
pub use ids::ExecutionId;
pub use ids::KeyId;
pub use ids::PolicyId;
pub use ids::SkillId;
pub use ids::StepId;
pub use ids::TenantId;
pub use ids::TokenId;
pub use ids::TraceId;
pub use ids::WorkspaceId;
pub use policy::ContextConditions;
pub use policy::Effect;
pub use policy::Policy;
pub use policy::PolicyConditions;
pub use policy::PolicyContext;
pub use policy::PolicyEvaluation;
pub use policy::PolicyScope;
pub use policy::PolicySubject;
pub use policy::ProvenanceConditions;
pub use policy::SubjectType;
pub use policy::evaluate;
pub use risk::RiskBucket;
pub use risk::RiskScore;
pub use risk::score;
pub use telemetry::DEFAULT_MAX_SKEW_SECONDS;
pub use telemetry::ENVELOPE_VERSION;
pub use telemetry::PayloadType;
pub use telemetry::SignedTelemetryEnvelope;
pub use telemetry::TelemetryError;
pub use telemetry::signing_input;
pub use telemetry::verify_envelope;
pub use time::Timestamp;
pub use tooltoken::ScopeParameters;
pub use tooltoken::ToolTokenClaims;
pub use tooltoken::ToolTokenIssued;
pub use tooltoken::ToolTokenRequest;
pub use tooltoken::ToolTokenRow;
pub use trace::TraceStep;
pub use trace::TraceStepKind;
pub use trace::verify_trace;
