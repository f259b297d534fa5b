// clasper-core/src/runtime/telemetry_ingest.rs
// ============================================================================
// Module: Telemetry Ingest Pipeline
// Description: Runs the ordered envelope verification pipeline and dispatches
// the verified payload by type (C10).
// Purpose: Compose core::telemetry's pure verification against the adapter
// registry (key lookup) and the downstream sinks (C8, C9, cost/metrics/
// violations), honoring the per-tenant enforcement mode and de-duplication.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! [`TelemetryIngestService::ingest`] runs the six-step pipeline from the
//! product specification: parse (the caller has already deserialized the
//! envelope), key lookup, payload hash recomputation, skew check, signature
//! verification, then dispatch by [`PayloadType`]. `enforcement` governs
//! whether a verification failure rejects the envelope (`Enforce`), is
//! recorded as a violation but still dispatched (`Warn`), or is skipped
//! entirely (`Off`, for migration). A duplicate
//! `(execution_id, payload_type, payload_hash)` is accepted idempotently —
//! [`TelemetrySinks::mark_ingested`] tells the caller whether this is the
//! first time, and dispatch is skipped on a repeat.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::core::AdapterId;
use crate::core::PayloadType;
use crate::core::SignedTelemetryEnvelope;
use crate::core::TelemetryError;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::TraceStepKind;
use crate::core::verify_envelope;
use crate::interfaces::AdapterRegistryError;
use crate::interfaces::AdapterRegistryStore;
use crate::interfaces::AuditLogError;
use crate::interfaces::AuditLogStore;
use crate::interfaces::TraceStore;
use crate::interfaces::TraceStoreError;

// ============================================================================
// SECTION: Enforcement Mode
// ============================================================================

/// Per-tenant telemetry verification posture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementMode {
    /// Skip verification entirely; accept and dispatch unconditionally.
    Off,
    /// Verify, but accept and dispatch even on failure, recording a
    /// violation.
    Warn,
    /// Verify and reject the envelope on any failure.
    Enforce,
}

// ============================================================================
// SECTION: Downstream Sinks
// ============================================================================

/// Errors raised by a [`TelemetrySinks`] implementation.
#[derive(Debug, Error)]
pub enum TelemetrySinkError {
    /// The sink's backing storage failed.
    #[error("telemetry sink io error: {0}")]
    Io(String),
}

/// The non-C8/C9 dispatch targets a verified envelope may route to, plus
/// the idempotency ledger guarding duplicate envelopes.
///
/// Grounded on the same small-trait-per-concern shape as
/// [`crate::interfaces::AuditLogStore`], scoped to the payload kinds the
/// audit and trace stores do not already own.
pub trait TelemetrySinks {
    /// Records a cost report payload.
    ///
    /// # Errors
    /// Returns [`TelemetrySinkError`] if the write fails.
    fn record_cost(&self, tenant_id: &TenantId, adapter_id: &AdapterId, payload: &serde_json::Value) -> Result<(), TelemetrySinkError>;

    /// Records a metrics report payload.
    ///
    /// # Errors
    /// Returns [`TelemetrySinkError`] if the write fails.
    fn record_metrics(&self, tenant_id: &TenantId, adapter_id: &AdapterId, payload: &serde_json::Value) -> Result<(), TelemetrySinkError>;

    /// Records a reported policy/safety violation payload, independent of
    /// any audit entry also written for it.
    ///
    /// # Errors
    /// Returns [`TelemetrySinkError`] if the write fails.
    fn record_violation(&self, tenant_id: &TenantId, adapter_id: &AdapterId, payload: &serde_json::Value) -> Result<(), TelemetrySinkError>;

    /// Atomically records that `(execution_id, payload_type, payload_hash)`
    /// has been ingested. Returns `true` iff this call performed the
    /// transition (i.e. this is the first time); `false` on a repeat.
    ///
    /// # Errors
    /// Returns [`TelemetrySinkError`] if the write fails.
    fn mark_ingested(&self, dedup_key: &str) -> Result<bool, TelemetrySinkError>;
}

// ============================================================================
// SECTION: Telemetry Ingest Service
// ============================================================================

/// Composes envelope verification with key lookup and sink dispatch.
pub struct TelemetryIngestService<R, L, T, K> {
    /// Adapter registry, consulted for the active telemetry key.
    adapters: R,
    /// Audit log, receiving `audit` and `violations` payloads.
    audit: L,
    /// Trace store, receiving `trace` payload steps.
    traces: T,
    /// Cost/metrics/violation sinks and the de-duplication ledger.
    sinks: K,
    /// Maximum allowed clock skew between `issued_at` and ingest time.
    max_skew_seconds: i64,
}

impl<R, L, T, K> TelemetryIngestService<R, L, T, K>
where
    R: AdapterRegistryStore,
    L: AuditLogStore,
    T: TraceStore,
    K: TelemetrySinks,
{
    /// Creates a new telemetry ingest service.
    #[must_use]
    pub const fn new(adapters: R, audit: L, traces: T, sinks: K, max_skew_seconds: i64) -> Self {
        Self { adapters, audit, traces, sinks, max_skew_seconds }
    }

    /// Runs the full verification and dispatch pipeline against `envelope`
    /// for `tenant_id`, under `mode`.
    ///
    /// # Errors
    /// Returns [`TelemetryIngestError::AdapterUnknown`] if no registration
    /// exists, [`TelemetryIngestError::MissingKey`] if it has no active
    /// telemetry key, propagates the underlying verification error under
    /// [`EnforcementMode::Enforce`], or propagates a sink/store error.
    pub fn ingest(
        &self,
        tenant_id: &TenantId,
        envelope: &SignedTelemetryEnvelope,
        mode: EnforcementMode,
        now: Timestamp,
    ) -> Result<(), TelemetryIngestError> {
        let dedup_key = format!("{}:{}:{}", envelope.execution_id, payload_type_tag(envelope.payload_type), envelope.payload_hash);
        if !self.sinks.mark_ingested(&dedup_key)? {
            return Ok(());
        }

        let verification = if matches!(mode, EnforcementMode::Off) {
            Ok(())
        } else {
            self.verify(tenant_id, envelope, now)
        };
        match mode {
            EnforcementMode::Enforce => verification?,
            EnforcementMode::Warn if verification.is_err() => {
                self.sinks.record_violation(tenant_id, &envelope.adapter_id, &envelope.payload)?;
            }
            EnforcementMode::Warn | EnforcementMode::Off => {}
        }

        self.dispatch(tenant_id, envelope, now)
    }

    /// Runs key lookup and the pure verification pipeline, without
    /// dispatching. Exposed so callers that need to report a `verified` flag
    /// (distinct from whether the envelope was ultimately accepted) can check
    /// it ahead of [`Self::ingest`].
    ///
    /// # Errors
    /// Returns [`TelemetryIngestError::AdapterUnknown`] or
    /// [`TelemetryIngestError::MissingKey`] if the adapter has no active
    /// telemetry key, or propagates the underlying verification error.
    pub fn verify(&self, tenant_id: &TenantId, envelope: &SignedTelemetryEnvelope, now: Timestamp) -> Result<(), TelemetryIngestError> {
        let registration = self
            .adapters
            .get(tenant_id, &envelope.adapter_id)?
            .ok_or_else(|| TelemetryIngestError::AdapterUnknown(envelope.adapter_id.clone()))?;
        let key = registration.active_key.ok_or_else(|| TelemetryIngestError::MissingKey(envelope.adapter_id.clone()))?;
        verify_envelope(envelope, &key, now, self.max_skew_seconds)?;
        Ok(())
    }

    /// Dispatches a payload to its sink by [`PayloadType`].
    fn dispatch(&self, tenant_id: &TenantId, envelope: &SignedTelemetryEnvelope, now: Timestamp) -> Result<(), TelemetryIngestError> {
        match envelope.payload_type {
            PayloadType::Trace => self.dispatch_trace(envelope, now)?,
            PayloadType::Audit => {
                let actor = format!("adapter:{}", envelope.adapter_id);
                self.audit.append(tenant_id, "adapter_audit", now, &actor, Some(envelope.execution_id.to_string()), envelope.payload.clone())?;
            }
            PayloadType::Cost => self.sinks.record_cost(tenant_id, &envelope.adapter_id, &envelope.payload)?,
            PayloadType::Metrics => self.sinks.record_metrics(tenant_id, &envelope.adapter_id, &envelope.payload)?,
            PayloadType::Violations => {
                self.sinks.record_violation(tenant_id, &envelope.adapter_id, &envelope.payload)?;
                let actor = format!("adapter:{}", envelope.adapter_id);
                self.audit.append(tenant_id, "adapter_violation", now, &actor, Some(envelope.execution_id.to_string()), envelope.payload.clone())?;
            }
        }
        Ok(())
    }

    /// Appends every step in a `trace` payload's `steps` array, in order.
    fn dispatch_trace(&self, envelope: &SignedTelemetryEnvelope, now: Timestamp) -> Result<(), TelemetryIngestError> {
        let steps: Vec<TraceStepKind> = envelope
            .payload
            .get("steps")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|err| TelemetryIngestError::MalformedPayload(err.to_string()))?
            .unwrap_or_default();
        for step in steps {
            self.traces.append_step(&envelope.execution_id, step, now)?;
        }
        Ok(())
    }
}

/// Returns the stable tag used to key the de-duplication ledger, mirroring
/// [`PayloadType`]'s own `snake_case` wire form.
const fn payload_type_tag(payload_type: PayloadType) -> &'static str {
    match payload_type {
        PayloadType::Trace => "trace",
        PayloadType::Audit => "audit",
        PayloadType::Cost => "cost",
        PayloadType::Metrics => "metrics",
        PayloadType::Violations => "violations",
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors the telemetry ingest pipeline can return.
#[derive(Debug, Error)]
pub enum TelemetryIngestError {
    /// No adapter registration exists for the envelope's `adapter_id`.
    #[error("adapter not registered: {0}")]
    AdapterUnknown(AdapterId),
    /// The adapter has no active telemetry key.
    #[error("adapter has no active telemetry key: {0}")]
    MissingKey(AdapterId),
    /// Envelope verification failed.
    #[error(transparent)]
    Verification(#[from] TelemetryError),
    /// A `trace` payload's `steps` field was not a valid step array.
    #[error("malformed trace payload: {0}")]
    MalformedPayload(String),
    /// The adapter registry failed.
    #[error(transparent)]
    AdapterRegistry(#[from] AdapterRegistryError),
    /// The audit log failed.
    #[error(transparent)]
    AuditLog(#[from] AuditLogError),
    /// The trace store failed.
    #[error(transparent)]
    TraceStore(#[from] TraceStoreError),
    /// A cost/metrics/violation sink failed.
    #[error(transparent)]
    Sink(#[from] TelemetrySinkError),
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashSet;

    use base64::Engine as _;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use ed25519_dalek::Signer as _;
    use ed25519_dalek::SigningKey;
    use serde_json::json;

    use super::*;
    use crate::core::AdapterRegistration;
    use crate::core::ENVELOPE_VERSION;
    use crate::core::ExecutionId;
    use crate::core::RiskClass;
    use crate::core::SignatureAlgorithm;
    use crate::core::TelemetryKey;
    use crate::core::TraceId;
    use crate::core::TraceStep;
    use crate::core::signing_input;

    #[derive(Default)]
    struct FakeAdapters(RefCell<Option<AdapterRegistration>>);

    impl AdapterRegistryStore for FakeAdapters {
        fn upsert(&self, registration: AdapterRegistration) -> Result<(), AdapterRegistryError> {
            *self.0.borrow_mut() = Some(registration);
            Ok(())
        }

        fn get(&self, _tenant_id: &TenantId, _adapter_id: &AdapterId) -> Result<Option<AdapterRegistration>, AdapterRegistryError> {
            Ok(self.0.borrow().clone())
        }

        fn list(&self, _tenant_id: &TenantId) -> Result<Vec<AdapterRegistration>, AdapterRegistryError> {
            Ok(self.0.borrow().iter().cloned().collect())
        }

        fn disable(&self, _tenant_id: &TenantId, _adapter_id: &AdapterId) -> Result<(), AdapterRegistryError> {
            Ok(())
        }

        fn set_key(
            &self,
            _tenant_id: &TenantId,
            _adapter_id: &AdapterId,
            _algorithm: SignatureAlgorithm,
            _public_jwk: serde_json::Value,
        ) -> Result<TelemetryKey, AdapterRegistryError> {
            Err(AdapterRegistryError::Io("not supported in fake".to_string()))
        }

        fn revoke_key(&self, _tenant_id: &TenantId, _adapter_id: &AdapterId) -> Result<(), AdapterRegistryError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeAudit(RefCell<Vec<(String, String)>>);

    impl AuditLogStore for FakeAudit {
        fn append(
            &self,
            _tenant_id: &TenantId,
            event_type: &str,
            _occurred_at: Timestamp,
            actor: &str,
            _target_id: Option<String>,
            _event_data: serde_json::Value,
        ) -> Result<crate::core::AuditEntry, AuditLogError> {
            self.0.borrow_mut().push((event_type.to_string(), actor.to_string()));
            crate::core::AuditEntry::build(
                TenantId::new("t1"),
                1,
                event_type,
                Timestamp::now(),
                actor,
                None,
                serde_json::json!({}),
                crate::core::GENESIS_HASH,
            )
            .map_err(|err| AuditLogError::Io(err.to_string()))
        }

        fn export(&self, _tenant_id: &TenantId) -> Result<Vec<crate::core::AuditEntry>, AuditLogError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FakeTraces(RefCell<Vec<TraceStepKind>>);

    impl TraceStore for FakeTraces {
        fn append_step(&self, execution_id: &ExecutionId, detail: TraceStepKind, occurred_at: Timestamp) -> Result<TraceStep, TraceStoreError> {
            self.0.borrow_mut().push(detail.clone());
            TraceStep::build(crate::core::StepId::new("s1"), execution_id.clone(), 1, detail, occurred_at, crate::core::GENESIS_HASH)
                .map_err(|err| TraceStoreError::Io(err.to_string()))
        }

        fn steps_for_execution(&self, _execution_id: &ExecutionId) -> Result<Vec<TraceStep>, TraceStoreError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FakeSinks {
        seen: RefCell<HashSet<String>>,
        violations: RefCell<Vec<serde_json::Value>>,
        costs: RefCell<Vec<serde_json::Value>>,
    }

    impl TelemetrySinks for FakeSinks {
        fn record_cost(&self, _tenant_id: &TenantId, _adapter_id: &AdapterId, payload: &serde_json::Value) -> Result<(), TelemetrySinkError> {
            self.costs.borrow_mut().push(payload.clone());
            Ok(())
        }

        fn record_metrics(&self, _tenant_id: &TenantId, _adapter_id: &AdapterId, _payload: &serde_json::Value) -> Result<(), TelemetrySinkError> {
            Ok(())
        }

        fn record_violation(&self, _tenant_id: &TenantId, _adapter_id: &AdapterId, payload: &serde_json::Value) -> Result<(), TelemetrySinkError> {
            self.violations.borrow_mut().push(payload.clone());
            Ok(())
        }

        fn mark_ingested(&self, dedup_key: &str) -> Result<bool, TelemetrySinkError> {
            Ok(self.seen.borrow_mut().insert(dedup_key.to_string()))
        }
    }

    fn signed_envelope(signing_key: &SigningKey, payload_type: PayloadType, payload: serde_json::Value, issued_at: Timestamp) -> SignedTelemetryEnvelope {
        let payload_hash = crate::core::formatted_sha256_json(&payload).expect("hash payload");
        let mut envelope = SignedTelemetryEnvelope {
            envelope_version: ENVELOPE_VERSION.to_string(),
            adapter_id: AdapterId::new("a1"),
            adapter_version: "1.0.0".to_string(),
            issued_at,
            execution_id: ExecutionId::new("e1"),
            trace_id: TraceId::new("tr1"),
            payload_type,
            payload,
            payload_hash,
            signature: String::new(),
        };
        let message = signing_input(&envelope).expect("signing input");
        let signature = signing_key.sign(&message);
        envelope.signature = URL_SAFE_NO_PAD.encode(signature.to_bytes());
        envelope
    }

    fn registration(signing_key: &SigningKey, now: Timestamp) -> AdapterRegistration {
        let verifying_key = signing_key.verifying_key();
        let x = URL_SAFE_NO_PAD.encode(verifying_key.to_bytes());
        AdapterRegistration {
            tenant_id: TenantId::new("t1"),
            adapter_id: AdapterId::new("a1"),
            version: "1.0.0".to_string(),
            display_name: "Adapter One".to_string(),
            risk_class: RiskClass::Low,
            capabilities: vec!["llm".to_string()],
            enabled: true,
            active_key: Some(TelemetryKey {
                algorithm: SignatureAlgorithm::Ed25519,
                public_jwk: json!({"kty": "OKP", "crv": "Ed25519", "x": x}),
                key_id: None,
                created_at: now,
                revoked_at: None,
            }),
        }
    }

    #[test]
    fn a_valid_audit_envelope_dispatches_to_the_audit_log() {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let now = Timestamp::now();
        let adapters = FakeAdapters::default();
        adapters.upsert(registration(&signing_key, now)).expect("upsert");
        let audit = FakeAudit::default();
        let service = TelemetryIngestService::new(adapters, audit, FakeTraces::default(), FakeSinks::default(), 300);

        let envelope = signed_envelope(&signing_key, PayloadType::Audit, json!({"detail": "ok"}), now);
        service.ingest(&TenantId::new("t1"), &envelope, EnforcementMode::Enforce, now).expect("ingest");

        assert_eq!(service.audit.0.borrow().len(), 1);
    }

    #[test]
    fn a_duplicate_envelope_is_ingested_idempotently() {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let now = Timestamp::now();
        let adapters = FakeAdapters::default();
        adapters.upsert(registration(&signing_key, now)).expect("upsert");
        let service = TelemetryIngestService::new(adapters, FakeAudit::default(), FakeTraces::default(), FakeSinks::default(), 300);

        let envelope = signed_envelope(&signing_key, PayloadType::Cost, json!({"usd": 1.5}), now);
        service.ingest(&TenantId::new("t1"), &envelope, EnforcementMode::Enforce, now).expect("first ingest");
        service.ingest(&TenantId::new("t1"), &envelope, EnforcementMode::Enforce, now).expect("second ingest");

        assert_eq!(service.sinks.costs.borrow().len(), 1);
    }

    #[test]
    fn enforce_mode_rejects_a_tampered_envelope() {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let now = Timestamp::now();
        let adapters = FakeAdapters::default();
        adapters.upsert(registration(&signing_key, now)).expect("upsert");
        let service = TelemetryIngestService::new(adapters, FakeAudit::default(), FakeTraces::default(), FakeSinks::default(), 300);

        let mut envelope = signed_envelope(&signing_key, PayloadType::Cost, json!({"usd": 1.5}), now);
        envelope.payload = json!({"usd": 999.0});
        let err = service.ingest(&TenantId::new("t1"), &envelope, EnforcementMode::Enforce, now).unwrap_err();
        assert!(matches!(err, TelemetryIngestError::Verification(TelemetryError::PayloadHashMismatch)));
    }

    #[test]
    fn warn_mode_records_a_violation_but_still_dispatches() {
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let now = Timestamp::now();
        let adapters = FakeAdapters::default();
        adapters.upsert(registration(&signing_key, now)).expect("upsert");
        let service = TelemetryIngestService::new(adapters, FakeAudit::default(), FakeTraces::default(), FakeSinks::default(), 300);

        let mut envelope = signed_envelope(&signing_key, PayloadType::Cost, json!({"usd": 1.5}), now);
        envelope.payload = json!({"usd": 999.0});
        service.ingest(&TenantId::new("t1"), &envelope, EnforcementMode::Warn, now).expect("warn mode accepts");

        assert_eq!(service.sinks.violations.borrow().len(), 1);
        assert_eq!(service.sinks.costs.borrow().len(), 1);
    }
}
