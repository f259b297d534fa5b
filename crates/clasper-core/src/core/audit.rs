// clasper-core/src/core/audit.rs
// ============================================================================
// Module: Clasper Hash-Chained Audit Log Data Model
// Description: Per-tenant append-only audit entries linked by content hash
// (C8).
// Purpose: Define the canonical record, entry hash computation, and a pure
// chain-verification routine shared by the store and the `verify-chain` CLI
// subcommand.
// Dependencies: crate::core::{hashing, ids, time}, serde
// ============================================================================

//! ## Overview
//! Every security-relevant operation produces an [`AuditEntry`]. Entries form
//! one hash chain per tenant: `entry_hash` covers a canonical record that
//! includes `prev_hash`, so mutating any entry breaks every `entry_hash` from
//! that point forward. [`verify_chain`] recomputes the whole chain and
//! reports every mismatched sequence number without short-circuiting
//! (Testable Property 2, scenario S5).

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::hashing::HashError;
use crate::core::hashing::format_hash;
use crate::core::hashing::sha256_json;
use crate::core::ids::TenantId;
use crate::core::time::Timestamp;

/// The hash chain's root value: the `prev_hash` of an audit log's first entry.
pub const GENESIS_HASH: &str = "sha256:genesis";

// ============================================================================
// SECTION: Audit Entry
// ============================================================================

/// A single append-only audit log entry.
///
/// # Invariants
/// - `entry_hash` is `format_hash(sha256(canonical_json(record)))` where
///   `record` is this entry's fields excluding `entry_hash` itself.
/// - The first entry for a tenant has `prev_hash == GENESIS_HASH`; every
///   subsequent entry's `prev_hash` equals the previous entry's `entry_hash`.
/// - `seq` is contiguous and strictly increasing per tenant, starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Tenant this entry belongs to.
    pub tenant_id: TenantId,
    /// 1-based, contiguous sequence number within the tenant's chain.
    pub seq: u64,
    /// Stable event type, e.g. `"execution_decision"`.
    pub event_type: String,
    /// When this event occurred.
    pub occurred_at: Timestamp,
    /// Identity or subsystem that caused this event.
    pub actor: String,
    /// Identifier of the entity this event concerns, if any.
    pub target_id: Option<String>,
    /// Event-specific payload.
    pub event_data: serde_json::Value,
    /// Hash of the previous entry in this tenant's chain.
    pub prev_hash: String,
    /// This entry's own content hash.
    pub entry_hash: String,
}

/// The canonical, hashable projection of an [`AuditEntry`] — every field
/// except `entry_hash`.
#[derive(Debug, Clone, Serialize)]
struct CanonicalRecord<'a> {
    seq: u64,
    tenant_id: &'a TenantId,
    event_type: &'a str,
    occurred_at: Timestamp,
    actor: &'a str,
    target_id: &'a Option<String>,
    event_data: &'a serde_json::Value,
    prev_hash: &'a str,
}

impl AuditEntry {
    /// Builds and hashes a new entry following `prev_hash` at `seq`.
    ///
    /// # Errors
    /// Returns [`HashError`] if `event_data` fails canonicalization.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        tenant_id: TenantId,
        seq: u64,
        event_type: impl Into<String>,
        occurred_at: Timestamp,
        actor: impl Into<String>,
        target_id: Option<String>,
        event_data: serde_json::Value,
        prev_hash: impl Into<String>,
    ) -> Result<Self, HashError> {
        let event_type = event_type.into();
        let actor = actor.into();
        let prev_hash = prev_hash.into();

        let record = CanonicalRecord {
            seq,
            tenant_id: &tenant_id,
            event_type: &event_type,
            occurred_at,
            actor: &actor,
            target_id: &target_id,
            event_data: &event_data,
            prev_hash: &prev_hash,
        };
        let entry_hash = format_hash(&sha256_json(&record)?);

        Ok(Self {
            tenant_id,
            seq,
            event_type,
            occurred_at,
            actor,
            target_id,
            event_data,
            prev_hash,
            entry_hash,
        })
    }

    /// Recomputes this entry's hash from its own fields, independent of the
    /// stored `entry_hash`.
    ///
    /// # Errors
    /// Returns [`HashError`] if `event_data` fails canonicalization.
    pub fn recompute_hash(&self) -> Result<String, HashError> {
        let record = CanonicalRecord {
            seq: self.seq,
            tenant_id: &self.tenant_id,
            event_type: &self.event_type,
            occurred_at: self.occurred_at,
            actor: &self.actor,
            target_id: &self.target_id,
            event_data: &self.event_data,
            prev_hash: &self.prev_hash,
        };
        Ok(format_hash(&sha256_json(&record)?))
    }

    /// Returns whether `self` is a valid successor of `previous` in the chain
    /// (ignores sequence contiguity; see [`verify_chain`] for the full check).
    #[must_use]
    pub fn follows(&self, previous: &Self) -> bool {
        self.prev_hash == previous.entry_hash
    }
}

// ============================================================================
// SECTION: Chain Verification
// ============================================================================

/// One detected break in an audit chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    /// Sequence number of the offending entry.
    pub seq: u64,
    /// What was wrong with it.
    pub reason: ChainBreakReason,
}

/// Why a chain entry failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ChainBreakReason {
    /// `entry_hash` does not match the recomputed hash of this entry's fields.
    HashMismatch,
    /// `prev_hash` does not match the previous entry's `entry_hash`.
    PrevHashMismatch,
    /// `seq` is not exactly one greater than the previous entry's `seq`.
    SequenceGap,
}

/// Verifies an entire ordered audit chain for one tenant.
///
/// Recomputes every entry's hash and checks every link; does not
/// short-circuit on the first failure, so a caller can see every affected
/// `seq` in one pass (Testable Property 2).
///
/// `entries` must already be sorted ascending by `seq`; the first entry's
/// `prev_hash` is checked against [`GENESIS_HASH`].
///
/// # Errors
/// Returns [`HashError`] if any entry's `event_data` fails canonicalization
/// during recomputation.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<Vec<ChainBreak>, HashError> {
    let mut breaks = Vec::new();
    let mut expected_prev_hash = GENESIS_HASH.to_string();
    let mut expected_seq = 1u64;

    for entry in entries {
        if entry.seq != expected_seq {
            breaks.push(ChainBreak {
                seq: entry.seq,
                reason: ChainBreakReason::SequenceGap,
            });
        }
        if entry.prev_hash != expected_prev_hash {
            breaks.push(ChainBreak {
                seq: entry.seq,
                reason: ChainBreakReason::PrevHashMismatch,
            });
        }
        let recomputed = entry.recompute_hash()?;
        if recomputed != entry.entry_hash {
            breaks.push(ChainBreak {
                seq: entry.seq,
                reason: ChainBreakReason::HashMismatch,
            });
        }

        expected_prev_hash = entry.entry_hash.clone();
        expected_seq += 1;
    }

    Ok(breaks)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::AuditEntry;
    use super::ChainBreakReason;
    use super::GENESIS_HASH;
    use super::verify_chain;
    use crate::core::ids::TenantId;
    use crate::core::time::Timestamp;

    fn entry(tenant: &TenantId, seq: u64, prev_hash: &str) -> AuditEntry {
        AuditEntry::build(
            tenant.clone(),
            seq,
            "execution_decision",
            Timestamp::now(),
            "adapter:a1",
            Some("exec-1".to_string()),
            json!({"outcome": "granted"}),
            prev_hash,
        )
        .expect("build entry")
    }

    #[test]
    fn well_formed_chain_has_no_breaks() {
        let tenant = TenantId::new("t1");
        let e1 = entry(&tenant, 1, GENESIS_HASH);
        let e2 = entry(&tenant, 2, &e1.entry_hash);
        let e3 = entry(&tenant, 3, &e2.entry_hash);

        let breaks = verify_chain(&[e1, e2, e3]).expect("verify");
        assert!(breaks.is_empty());
    }

    #[test]
    fn tampering_with_event_data_breaks_downstream_hashes() {
        let tenant = TenantId::new("t1");
        let e1 = entry(&tenant, 1, GENESIS_HASH);
        let mut e2 = entry(&tenant, 2, &e1.entry_hash);
        let e3 = entry(&tenant, 3, &e2.entry_hash);

        e2.event_data = json!({"outcome": "tampered"});

        let breaks = verify_chain(&[e1, e2, e3]).expect("verify");
        assert_eq!(breaks.len(), 2);
        assert!(breaks.iter().any(|b| b.seq == 2 && b.reason == ChainBreakReason::HashMismatch));
        assert!(breaks.iter().any(|b| b.seq == 3 && b.reason == ChainBreakReason::PrevHashMismatch));
    }

    #[test]
    fn missing_sequence_number_is_detected() {
        let tenant = TenantId::new("t1");
        let e1 = entry(&tenant, 1, GENESIS_HASH);
        let e3 = entry(&tenant, 3, &e1.entry_hash);

        let breaks = verify_chain(&[e1, e3]).expect("verify");
        assert!(breaks.iter().any(|b| b.seq == 3 && b.reason == ChainBreakReason::SequenceGap));
    }

    #[test]
    fn follows_checks_hash_linkage_only() {
        let tenant = TenantId::new("t1");
        let e1 = entry(&tenant, 1, GENESIS_HASH);
        let e2 = entry(&tenant, 2, &e1.entry_hash);

        assert!(e2.follows(&e1));
        assert!(!e1.follows(&e2));
    }
}
