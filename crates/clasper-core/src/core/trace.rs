// clasper-core/src/core/trace.rs
// ============================================================================
// Module: Clasper Execution Trace Data Model
// Description: Per-execution step records forming a hash chain rooted at the
// execution's first decision (C9).
// Purpose: Define the trace step shape and chain verification, mirroring
// the audit log's chaining discipline at per-execution granularity.
// Dependencies: crate::core::{audit, hashing, ids, time}, serde
// ============================================================================

//! ## Overview
//! A [`TraceStep`] records one step of an execution's lifecycle: the initial
//! decision, each tool call the adapter reports, and the final outcome.
//! Steps chain the same way audit entries do, but the chain is scoped to a
//! single `execution_id` rather than a tenant, and verification logic is
//! intentionally parallel to [`crate::core::audit`] rather than shared,
//! since the two chains protect different operator guarantees (global
//! tamper-evidence vs. single-execution reconstructability).

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::audit::ChainBreak;
use crate::core::audit::ChainBreakReason;
use crate::core::audit::GENESIS_HASH;
use crate::core::hashing::HashError;
use crate::core::hashing::format_hash;
use crate::core::hashing::sha256_json;
use crate::core::ids::ExecutionId;
use crate::core::ids::StepId;
use crate::core::time::Timestamp;

// ============================================================================
// SECTION: Step Kind
// ============================================================================

/// The kind of event a [`TraceStep`] records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceStepKind {
    /// The execution's originating decision (granted, blocked, or deferred).
    Decision {
        /// Stable reason/outcome code.
        outcome: String,
    },
    /// A single tool invocation the adapter reported under this execution.
    ToolCall {
        /// Tool name invoked.
        tool: String,
        /// Canonical-JSON SHA-256 of the call arguments.
        args_hash: String,
        /// Whether the call succeeded.
        succeeded: bool,
    },
    /// The execution reached a terminal outcome.
    Completed {
        /// Stable terminal status code.
        status: String,
    },
}

// ============================================================================
// SECTION: Trace Step
// ============================================================================

/// A single step in an execution's trace, chained to the step before it.
///
/// # Invariants
/// - `step_hash` is `format_hash(sha256(canonical_json(record)))` over every
///   field except `step_hash` itself.
/// - The execution's first step has `prev_step_hash == GENESIS_HASH`.
/// - `seq` is contiguous and strictly increasing within `execution_id`,
///   starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    /// Identifier of this step.
    pub step_id: StepId,
    /// Execution this step belongs to.
    pub execution_id: ExecutionId,
    /// 1-based, contiguous sequence number within the execution.
    pub seq: u64,
    /// What happened at this step.
    pub detail: TraceStepKind,
    /// When this step occurred.
    pub occurred_at: Timestamp,
    /// Hash of the previous step in this execution's trace.
    pub prev_step_hash: String,
    /// This step's own content hash.
    pub step_hash: String,
}

#[derive(Debug, Clone, Serialize)]
struct CanonicalStep<'a> {
    step_id: &'a StepId,
    execution_id: &'a ExecutionId,
    seq: u64,
    detail: &'a TraceStepKind,
    occurred_at: Timestamp,
    prev_step_hash: &'a str,
}

impl TraceStep {
    /// Builds and hashes a new step following `prev_step_hash` at `seq`.
    ///
    /// # Errors
    /// Returns [`HashError`] if `detail` fails canonicalization.
    pub fn build(
        step_id: StepId,
        execution_id: ExecutionId,
        seq: u64,
        detail: TraceStepKind,
        occurred_at: Timestamp,
        prev_step_hash: impl Into<String>,
    ) -> Result<Self, HashError> {
        let prev_step_hash = prev_step_hash.into();
        let record = CanonicalStep {
            step_id: &step_id,
            execution_id: &execution_id,
            seq,
            detail: &detail,
            occurred_at,
            prev_step_hash: &prev_step_hash,
        };
        let step_hash = format_hash(&sha256_json(&record)?);

        Ok(Self {
            step_id,
            execution_id,
            seq,
            detail,
            occurred_at,
            prev_step_hash,
            step_hash,
        })
    }

    /// Recomputes this step's hash from its own fields.
    ///
    /// # Errors
    /// Returns [`HashError`] if `detail` fails canonicalization.
    pub fn recompute_hash(&self) -> Result<String, HashError> {
        let record = CanonicalStep {
            step_id: &self.step_id,
            execution_id: &self.execution_id,
            seq: self.seq,
            detail: &self.detail,
            occurred_at: self.occurred_at,
            prev_step_hash: &self.prev_step_hash,
        };
        Ok(format_hash(&sha256_json(&record)?))
    }
}

// ============================================================================
// SECTION: Chain Verification
// ============================================================================

/// Verifies one execution's full trace, in the same non-short-circuiting
/// style as [`crate::core::audit::verify_chain`].
///
/// `steps` must already be sorted ascending by `seq`.
///
/// # Errors
/// Returns [`HashError`] if any step's `detail` fails canonicalization
/// during recomputation.
pub fn verify_trace(steps: &[TraceStep]) -> Result<Vec<ChainBreak>, HashError> {
    let mut breaks = Vec::new();
    let mut expected_prev_hash = GENESIS_HASH.to_string();
    let mut expected_seq = 1u64;

    for step in steps {
        if step.seq != expected_seq {
            breaks.push(ChainBreak {
                seq: step.seq,
                reason: ChainBreakReason::SequenceGap,
            });
        }
        if step.prev_step_hash != expected_prev_hash {
            breaks.push(ChainBreak {
                seq: step.seq,
                reason: ChainBreakReason::PrevHashMismatch,
            });
        }
        let recomputed = step.recompute_hash()?;
        if recomputed != step.step_hash {
            breaks.push(ChainBreak {
                seq: step.seq,
                reason: ChainBreakReason::HashMismatch,
            });
        }

        expected_prev_hash = step.step_hash.clone();
        expected_seq += 1;
    }

    Ok(breaks)
}

#[cfg(test)]
mod tests {
    use super::GENESIS_HASH;
    use super::TraceStep;
    use super::TraceStepKind;
    use super::verify_trace;
    use crate::core::audit::ChainBreakReason;
    use crate::core::ids::ExecutionId;
    use crate::core::ids::StepId;
    use crate::core::time::Timestamp;

    fn step(execution_id: &ExecutionId, seq: u64, prev: &str) -> TraceStep {
        TraceStep::build(
            StepId::new(format!("step-{seq}")),
            execution_id.clone(),
            seq,
            TraceStepKind::ToolCall {
                tool: "shell.exec".to_string(),
                args_hash: "sha256:abc".to_string(),
                succeeded: true,
            },
            Timestamp::now(),
            prev,
        )
        .expect("build step")
    }

    #[test]
    fn well_formed_trace_has_no_breaks() {
        let exec = ExecutionId::new("e1");
        let s1 = step(&exec, 1, GENESIS_HASH);
        let s2 = step(&exec, 2, &s1.step_hash);

        let breaks = verify_trace(&[s1, s2]).expect("verify");
        assert!(breaks.is_empty());
    }

    #[test]
    fn reordered_steps_break_prev_hash_linkage() {
        let exec = ExecutionId::new("e1");
        let s1 = step(&exec, 1, GENESIS_HASH);
        let s2 = step(&exec, 2, &s1.step_hash);

        let breaks = verify_trace(&[s2, s1]).expect("verify");
        assert!(breaks.iter().any(|b| b.reason == ChainBreakReason::PrevHashMismatch));
    }
}
