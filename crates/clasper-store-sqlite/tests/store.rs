// clasper-store-sqlite/tests/store.rs
// ============================================================================
// Module: Clasper SQLite Store Integration Tests
// Description: Cross-component scenarios against a tempdir-backed store.
// Purpose: Exercise every interfaces:: contract ClasperSqliteStore implements
// under realistic multi-call sequences, including tamper detection and
// persistence across reopen.
// Dependencies: clasper-core, clasper-store-sqlite, tempfile
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::use_debug,
    reason = "Test-only assertions and helpers are permitted."
)]

use clasper_core::AdapterId;
use clasper_core::AdapterRegistration;
use clasper_core::AdapterRegistryStore;
use clasper_core::ApprovalQueueStore;
use clasper_core::AuditLogStore;
use clasper_core::Decision;
use clasper_core::DecisionId;
use clasper_core::DecisionSnapshot;
use clasper_core::DecisionState;
use clasper_core::Effect;
use clasper_core::ExecutionDecision;
use clasper_core::ExecutionId;
use clasper_core::ExecutionRequest;
use clasper_core::ExecutionScope;
use clasper_core::Policy;
use clasper_core::PolicyConditions;
use clasper_core::PolicyId;
use clasper_core::PolicyScope;
use clasper_core::PolicyStore;
use clasper_core::PolicySubject;
use clasper_core::ReasonCode;
use clasper_core::RiskBucket;
use clasper_core::RiskClass;
use clasper_core::RiskScore;
use clasper_core::SignatureAlgorithm;
use clasper_core::SubjectType;
use clasper_core::TelemetrySinks;
use clasper_core::TenantBudgetStore;
use clasper_core::TenantId;
use clasper_core::Timestamp;
use clasper_core::TokenId;
use clasper_core::ToolTokenRow;
use clasper_core::ToolTokenStore;
use clasper_core::TraceStep;
use clasper_core::TraceStepKind;
use clasper_core::TraceStore;
use clasper_core::WorkspaceId;
use clasper_core::core::risk::RiskBreakdown;
use clasper_core::verify_chain;
use clasper_core::verify_trace;
use clasper_store_sqlite::ClasperSqliteStore;
use clasper_store_sqlite::SqliteStoreConfig;
use tempfile::TempDir;

fn open_store() -> (TempDir, ClasperSqliteStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = SqliteStoreConfig {
        path: dir.path().join("clasper.sqlite3"),
        busy_timeout_ms: 5_000,
        journal_mode: clasper_store_sqlite::SqliteStoreMode::Wal,
        sync_mode: clasper_store_sqlite::SqliteSyncMode::Full,
    };
    let store = ClasperSqliteStore::new(config).expect("open store");
    (dir, store)
}

fn reopen(dir: &TempDir) -> ClasperSqliteStore {
    let config = SqliteStoreConfig {
        path: dir.path().join("clasper.sqlite3"),
        busy_timeout_ms: 5_000,
        journal_mode: clasper_store_sqlite::SqliteStoreMode::Wal,
        sync_mode: clasper_store_sqlite::SqliteSyncMode::Full,
    };
    ClasperSqliteStore::new(config).expect("reopen store")
}

fn policy(tenant_id: &TenantId, policy_id: &str, effect: Effect, enabled: bool) -> Policy {
    Policy {
        policy_id: PolicyId::new(policy_id),
        scope: PolicyScope { tenant_id: tenant_id.clone(), workspace_id: None, environment: None },
        subject: PolicySubject { subject_type: SubjectType::Adapter, name: None },
        conditions: PolicyConditions { capability: Some("shell.exec".to_string()), ..PolicyConditions::default() },
        effect,
        required_role: None,
        enabled,
    }
}

fn risk_score() -> RiskScore {
    RiskScore { score: 10, bucket: RiskBucket::Low, breakdown: RiskBreakdown::default() }
}

fn request(tenant_id: &TenantId, adapter_id: &AdapterId, execution_id: &str) -> ExecutionRequest {
    ExecutionRequest {
        execution_id: ExecutionId::new(execution_id),
        adapter_id: adapter_id.clone(),
        tenant_id: tenant_id.clone(),
        workspace_id: WorkspaceId::new("w1"),
        skill_id: None,
        requested_capabilities: vec!["llm".to_string()],
        intent: None,
        context: None,
        provenance: None,
        estimated_cost: None,
        tool_count: None,
        environment: None,
    }
}

fn pending_decision(
    tenant_id: &TenantId,
    adapter_id: &AdapterId,
    decision_id: &str,
    execution_id: &str,
    expires_at: Timestamp,
) -> Decision {
    let snapshot = DecisionSnapshot {
        request: request(tenant_id, adapter_id, execution_id),
        risk: risk_score(),
        matched_policies: Vec::new(),
        decision: ExecutionDecision::PendingApproval {
            decision_id: DecisionId::new(decision_id),
            decision_token: "token-opaque".to_string(),
        },
    };
    Decision {
        decision_id: DecisionId::new(decision_id),
        tenant_id: tenant_id.clone(),
        execution_id: ExecutionId::new(execution_id),
        adapter_id: adapter_id.clone(),
        state: DecisionState::Pending,
        request_snapshot: snapshot,
        required_role: Some("security-lead".to_string()),
        created_at: Timestamp::now(),
        expires_at,
        resolved_at: None,
        resolved_by: None,
        reason_code: None,
        justification: None,
    }
}

#[test]
fn policy_load_filters_disabled_rules_and_is_tenant_scoped() {
    let (_dir, store) = open_store();
    let t1 = TenantId::new("t1");
    let t2 = TenantId::new("t2");

    store.upsert(policy(&t1, "p1", Effect::Deny, true)).expect("upsert p1");
    store.upsert(policy(&t1, "p2", Effect::Allow, false)).expect("upsert p2 disabled");
    store.upsert(policy(&t2, "p3", Effect::Deny, true)).expect("upsert p3");

    let loaded = store.load(&t1).expect("load t1");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].policy_id, PolicyId::new("p1"));
}

#[test]
fn policy_upsert_is_idempotent_on_policy_id() {
    let (_dir, store) = open_store();
    let t1 = TenantId::new("t1");

    store.upsert(policy(&t1, "p1", Effect::Allow, true)).expect("first upsert");
    store.upsert(policy(&t1, "p1", Effect::Deny, true)).expect("second upsert");

    let loaded = store.load(&t1).expect("load");
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].effect, Effect::Deny);
}

#[test]
fn adapter_registration_round_trips_and_set_key_does_not_revoke_the_prior_key() {
    let (_dir, store) = open_store();
    let t1 = TenantId::new("t1");
    let adapter_id = AdapterId::new("a1");

    let registration = AdapterRegistration {
        tenant_id: t1.clone(),
        adapter_id: adapter_id.clone(),
        version: "1.0.0".to_string(),
        display_name: "Marketplace Agent".to_string(),
        risk_class: RiskClass::High,
        capabilities: vec!["llm".to_string(), "shell.exec".to_string()],
        enabled: true,
        active_key: None,
    };
    store.upsert(registration).expect("upsert adapter");

    let first_key = store
        .set_key(&t1, &adapter_id, SignatureAlgorithm::Ed25519, serde_json::json!({"kty": "OKP"}))
        .expect("set first key");
    assert!(first_key.is_active());

    let second_key = store
        .set_key(&t1, &adapter_id, SignatureAlgorithm::Ed25519, serde_json::json!({"kty": "OKP", "x": "2"}))
        .expect("set second key");
    assert!(second_key.is_active());

    let fetched = store.get(&t1, &adapter_id).expect("get").expect("adapter present");
    let active = fetched.active_key.expect("active key present");
    assert_eq!(active.public_jwk, serde_json::json!({"kty": "OKP", "x": "2"}));

    store.revoke_key(&t1, &adapter_id).expect("revoke");
    let after_revoke = store.get(&t1, &adapter_id).expect("get").expect("adapter present");
    assert!(after_revoke.active_key.is_none());
}

#[test]
fn adapter_disable_unknown_adapter_is_not_found() {
    let (_dir, store) = open_store();
    let t1 = TenantId::new("t1");
    let result = store.disable(&t1, &AdapterId::new("ghost"));
    assert!(result.is_err());
}

#[test]
fn tool_token_consume_is_a_single_use_compare_and_swap() {
    let (_dir, store) = open_store();
    let jti = TokenId::new("01HTOKEN");
    let now = Timestamp::now();
    let row = ToolTokenRow {
        jti: jti.clone(),
        tenant_id: TenantId::new("t1"),
        adapter_id: AdapterId::new("a1"),
        execution_id: ExecutionId::new("e1"),
        tool: "shell.exec".to_string(),
        scope_hash: "sha256:deadbeef".to_string(),
        issued_at: now,
        expires_at: now.checked_add_seconds(900).expect("add seconds"),
        used_at: None,
    };
    store.insert(row).expect("insert token");

    let first = store.consume(&jti, now).expect("first consume");
    let second = store.consume(&jti, now).expect("second consume");
    assert!(first);
    assert!(!second);

    let claims = store.lookup(&jti).expect("lookup").expect("claims present");
    assert_eq!(claims.jti, jti);
}

#[test]
fn tool_token_consume_of_an_unknown_jti_is_not_found() {
    let (_dir, store) = open_store();
    let result = store.consume(&TokenId::new("ghost"), Timestamp::now());
    assert!(result.is_err());
}

#[test]
fn decision_resolve_then_consume_follows_the_terminal_state_machine() {
    let (_dir, store) = open_store();
    let t1 = TenantId::new("t1");
    let adapter_id = AdapterId::new("a1");
    let decision_id = DecisionId::new("d1");
    let now = Timestamp::now();
    let expires_at = now.checked_add_seconds(900).expect("add seconds");

    store.create(pending_decision(&t1, &adapter_id, "d1", "e1", expires_at)).expect("create decision");

    let resolved = store
        .resolve(&decision_id, true, "approver@example.com", ReasonCode::OpsOverride, "approved for incident remediation", now)
        .expect("resolve");
    assert_eq!(resolved.state, DecisionState::Approved);

    let again = store.resolve(&decision_id, true, "approver@example.com", ReasonCode::OpsOverride, "approved for incident remediation", now);
    assert!(again.is_err());

    let consumed = store.consume(&decision_id).expect("consume");
    assert_eq!(consumed.state, DecisionState::Consumed);

    let consume_again = store.consume(&decision_id);
    assert!(consume_again.is_err());
}

#[test]
fn sweep_expired_transitions_only_overdue_pending_decisions() {
    let (_dir, store) = open_store();
    let t1 = TenantId::new("t1");
    let adapter_id = AdapterId::new("a1");
    let now = Timestamp::now();
    let past = now.checked_add_seconds(-10).expect("add seconds");
    let future = now.checked_add_seconds(3_600).expect("add seconds");

    store.create(pending_decision(&t1, &adapter_id, "overdue", "e1", past)).expect("create overdue");
    store.create(pending_decision(&t1, &adapter_id, "fresh", "e2", future)).expect("create fresh");

    let swept = store.sweep_expired(&t1, now).expect("sweep");
    assert_eq!(swept, vec![DecisionId::new("overdue")]);

    let overdue = store.get(&DecisionId::new("overdue")).expect("get").expect("present");
    assert_eq!(overdue.state, DecisionState::Expired);
    let fresh = store.get(&DecisionId::new("fresh")).expect("get").expect("present");
    assert_eq!(fresh.state, DecisionState::Pending);
}

#[test]
fn audit_append_chains_entries_and_export_preserves_order() {
    let (_dir, store) = open_store();
    let t1 = TenantId::new("t1");
    let now = Timestamp::now();

    store.append(&t1, "execution_decision", now, "system", None, serde_json::json!({"risk": "low"})).expect("append 1");
    store.append(&t1, "execution_decision", now, "system", None, serde_json::json!({"risk": "high"})).expect("append 2");

    let exported = store.export(&t1).expect("export");
    assert_eq!(exported.len(), 2);
    assert_eq!(exported[0].seq, 1);
    assert_eq!(exported[1].seq, 2);
    assert_eq!(exported[1].prev_hash, exported[0].entry_hash);

    let breaks = verify_chain(&exported).expect("verify chain");
    assert!(breaks.is_empty());
}

#[test]
fn audit_chains_are_isolated_per_tenant() {
    let (_dir, store) = open_store();
    let t1 = TenantId::new("t1");
    let t2 = TenantId::new("t2");
    let now = Timestamp::now();

    store.append(&t1, "execution_decision", now, "system", None, serde_json::json!({})).expect("append t1");
    store.append(&t2, "execution_decision", now, "system", None, serde_json::json!({})).expect("append t2");

    let t1_entries = store.export(&t1).expect("export t1");
    let t2_entries = store.export(&t2).expect("export t2");
    assert_eq!(t1_entries.len(), 1);
    assert_eq!(t2_entries.len(), 1);
    assert_eq!(t1_entries[0].seq, 1);
    assert_eq!(t2_entries[0].seq, 1);
}

#[test]
fn trace_append_step_chains_within_an_execution() {
    let (_dir, store) = open_store();
    let execution_id = ExecutionId::new("e1");
    let now = Timestamp::now();

    store
        .append_step(&execution_id, TraceStepKind::Decision { outcome: "granted".to_string() }, now)
        .expect("append step 1");
    store
        .append_step(
            &execution_id,
            TraceStepKind::ToolCall { tool: "llm".to_string(), args_hash: "sha256:abc".to_string(), succeeded: true },
            now,
        )
        .expect("append step 2");

    let steps: Vec<TraceStep> = store.steps_for_execution(&execution_id).expect("steps");
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].seq, 1);
    assert_eq!(steps[1].seq, 2);

    let breaks = verify_trace(&steps).expect("verify trace");
    assert!(breaks.is_empty());
}

#[test]
fn telemetry_sinks_mark_ingested_is_idempotent() {
    let (_dir, store) = open_store();
    let first = store.mark_ingested("dedup-key-1").expect("mark first");
    let second = store.mark_ingested("dedup-key-1").expect("mark second");
    assert!(first);
    assert!(!second);
}

#[test]
fn telemetry_sinks_record_cost_metrics_and_violation_all_persist() {
    let (_dir, store) = open_store();
    let t1 = TenantId::new("t1");
    let adapter_id = AdapterId::new("a1");

    store.record_cost(&t1, &adapter_id, &serde_json::json!({"cost": 0.25})).expect("record cost");
    store.record_metrics(&t1, &adapter_id, &serde_json::json!({"latency_ms": 120})).expect("record metrics");
    store.record_violation(&t1, &adapter_id, &serde_json::json!({"reason": "payload_hash_mismatch"})).expect("record violation");
}

#[test]
fn tenant_budget_remaining_defaults_to_untracked() {
    let (_dir, store) = open_store();
    let remaining = store.remaining_budget(&TenantId::new("unknown-tenant")).expect("remaining budget");
    assert!(remaining.is_none());
}

#[test]
fn store_state_persists_across_reopen() {
    let (dir, store) = open_store();
    let t1 = TenantId::new("t1");
    let now = Timestamp::now();
    store.append(&t1, "execution_decision", now, "system", None, serde_json::json!({"risk": "low"})).expect("append");
    drop(store);

    let reopened = reopen(&dir);
    let exported = reopened.export(&t1).expect("export after reopen");
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].seq, 1);
}

#[test]
fn granted_scope_survives_a_decision_snapshot_round_trip() {
    let (_dir, store) = open_store();
    let t1 = TenantId::new("t1");
    let adapter_id = AdapterId::new("a1");
    let now = Timestamp::now();

    let snapshot = DecisionSnapshot {
        request: request(&t1, &adapter_id, "e1"),
        risk: risk_score(),
        matched_policies: vec![PolicyId::new("p1")],
        decision: ExecutionDecision::Granted {
            granted_scope: ExecutionScope {
                capabilities: vec!["llm".to_string()],
                max_steps: 16,
                max_cost: 1.0,
                expires_at: now.checked_add_seconds(900).expect("add seconds"),
            },
        },
    };
    let decision = Decision {
        decision_id: DecisionId::new("d-granted"),
        tenant_id: t1.clone(),
        execution_id: ExecutionId::new("e1"),
        adapter_id,
        state: DecisionState::Consumed,
        request_snapshot: snapshot,
        required_role: None,
        created_at: now,
        expires_at: now.checked_add_seconds(900).expect("add seconds"),
        resolved_at: Some(now),
        resolved_by: Some("system".to_string()),
        reason_code: Some(ReasonCode::TestApproval),
        justification: Some("recorded for audit replay in this test".to_string()),
    };
    store.create(decision).expect("create granted decision");

    let fetched = store.get(&DecisionId::new("d-granted")).expect("get").expect("present");
    match fetched.request_snapshot.decision {
        ExecutionDecision::Granted { granted_scope } => {
            assert_eq!(granted_scope.max_steps, 16);
        }
        other => panic!("expected granted decision, got {other:?}"),
    }
}
