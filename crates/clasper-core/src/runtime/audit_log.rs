// clasper-core/src/runtime/audit_log.rs
// ============================================================================
// Module: Audit Log Service
// Description: Thin orchestration over AuditLogStore adding chain-verify and
// typed-event convenience (C8).
// Purpose: Give callers (C6, C7, C10, C11) a single place to append typed
// events without re-deriving `event_type` strings, and a single place to run
// `verify_chain` against whatever a store actually persisted.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! [`interfaces::AuditLogStore`] owns sequencing and hashing; this module
//! owns nothing stateful of its own. It exists so every caller appends
//! through the same `event_type` vocabulary and so chain verification is not
//! reimplemented at each of the CLI's `verify-chain` command, the HTTP
//! server's audit export endpoint, and tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::AuditEntry;
use crate::core::ChainBreak;
use crate::core::TenantId;
use crate::core::Timestamp;
use crate::core::verify_chain;
use crate::interfaces::AuditLogError;
use crate::interfaces::AuditLogStore;

// ============================================================================
// SECTION: Audit Log Service
// ============================================================================

/// Orchestrates appends and chain verification over an [`AuditLogStore`].
pub struct AuditLogService<L> {
    /// Backing store.
    store: L,
}

impl<L> AuditLogService<L>
where
    L: AuditLogStore,
{
    /// Creates a new audit log service over `store`.
    #[must_use]
    pub const fn new(store: L) -> Self {
        Self { store }
    }

    /// Appends a typed audit event for `tenant_id`.
    ///
    /// # Errors
    /// Propagates the store error.
    pub fn record(
        &self,
        tenant_id: &TenantId,
        event_type: &str,
        occurred_at: Timestamp,
        actor: &str,
        target_id: Option<String>,
        event_data: serde_json::Value,
    ) -> Result<AuditEntry, AuditLogError> {
        self.store.append(tenant_id, event_type, occurred_at, actor, target_id, event_data)
    }

    /// Exports the full chain for `tenant_id` and runs integrity
    /// verification over it, returning every break found (empty when the
    /// chain is intact).
    ///
    /// # Errors
    /// Returns [`AuditServiceError::Store`] if the export fails, or
    /// [`AuditServiceError::Hash`] if hash recomputation itself fails (a
    /// malformed entry, never an expected outcome of normal operation).
    pub fn verify(&self, tenant_id: &TenantId) -> Result<Vec<ChainBreak>, AuditServiceError> {
        let entries = self.store.export(tenant_id)?;
        Ok(verify_chain(&entries)?)
    }

    /// Exports the full chain for `tenant_id` without verifying it.
    ///
    /// # Errors
    /// Propagates the store error.
    pub fn export(&self, tenant_id: &TenantId) -> Result<Vec<AuditEntry>, AuditLogError> {
        self.store.export(tenant_id)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors the audit log service can return.
#[derive(Debug, thiserror::Error)]
pub enum AuditServiceError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] AuditLogError),
    /// Hash recomputation during verification failed.
    #[error(transparent)]
    Hash(#[from] crate::core::HashError),
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct FakeStore(RefCell<HashMap<String, Vec<AuditEntry>>>);

    impl AuditLogStore for FakeStore {
        fn append(
            &self,
            tenant_id: &TenantId,
            event_type: &str,
            occurred_at: Timestamp,
            actor: &str,
            target_id: Option<String>,
            event_data: serde_json::Value,
        ) -> Result<AuditEntry, AuditLogError> {
            let mut entries = self.0.borrow_mut();
            let tenant_entries = entries.entry(tenant_id.to_string()).or_default();
            let seq = u64::try_from(tenant_entries.len()).unwrap_or(u64::MAX) + 1;
            let prev_hash = tenant_entries.last().map_or_else(|| crate::core::GENESIS_HASH.to_string(), |e| e.entry_hash.clone());
            let entry = AuditEntry::build(tenant_id.clone(), seq, event_type, occurred_at, actor, target_id, event_data, prev_hash)
                .map_err(|err| AuditLogError::Io(err.to_string()))?;
            tenant_entries.push(entry.clone());
            Ok(entry)
        }

        fn export(&self, tenant_id: &TenantId) -> Result<Vec<AuditEntry>, AuditLogError> {
            Ok(self.0.borrow().get(tenant_id.as_str()).cloned().unwrap_or_default())
        }
    }

    #[test]
    fn a_freshly_recorded_chain_verifies_clean() {
        let service = AuditLogService::new(FakeStore::default());
        let tenant_id = TenantId::new("t1");
        service
            .record(&tenant_id, "execution_decision", Timestamp::now(), "adapter-1", None, serde_json::json!({"a": 1}))
            .expect("record");
        service
            .record(&tenant_id, "execution_decision", Timestamp::now(), "adapter-1", None, serde_json::json!({"a": 2}))
            .expect("record");
        let breaks = service.verify(&tenant_id).expect("verify");
        assert!(breaks.is_empty());
    }

    #[test]
    fn verify_detects_a_tampered_entry() {
        let store = FakeStore::default();
        let tenant_id = TenantId::new("t1");
        store
            .append(&tenant_id, "execution_decision", Timestamp::now(), "adapter-1", None, serde_json::json!({"a": 1}))
            .expect("append");
        {
            let mut entries = store.0.borrow_mut();
            let tenant_entries = entries.get_mut(tenant_id.as_str()).expect("tenant entries");
            tenant_entries[0].entry_hash = "tampered".to_string();
        }
        let service = AuditLogService::new(store);
        let breaks = service.verify(&tenant_id).expect("verify");
        assert!(!breaks.is_empty());
    }
}
