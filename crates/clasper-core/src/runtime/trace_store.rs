// clasper-core/src/runtime/trace_store.rs
// ============================================================================
// Module: Execution Trace Service
// Description: Thin orchestration over TraceStore adding chain-verify (C9).
// Purpose: Parallel to runtime::audit_log, since the two chains protect
// different guarantees (tenant-wide decision history vs. per-execution step
// history) and are never merged.
// Dependencies: crate::{core, interfaces}
// ============================================================================

//! ## Overview
//! Every step an adapter reports for an execution (its originating decision,
//! each tool call, its terminal outcome) is appended here and chained the
//! same way [`crate::runtime::audit_log`] chains tenant events, but scoped to
//! one `execution_id` instead of one tenant.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::core::ChainBreak;
use crate::core::ExecutionId;
use crate::core::HashError;
use crate::core::StepId;
use crate::core::Timestamp;
use crate::core::TraceStep;
use crate::core::TraceStepKind;
use crate::core::verify_trace;
use crate::interfaces::TraceStore;
use crate::interfaces::TraceStoreError;

// ============================================================================
// SECTION: Trace Store Service
// ============================================================================

/// Orchestrates step appends and chain verification over a [`TraceStore`].
pub struct TraceStoreService<S> {
    /// Backing store.
    store: S,
}

impl<S> TraceStoreService<S>
where
    S: TraceStore,
{
    /// Creates a new trace store service over `store`.
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    /// Appends a step for `execution_id`.
    ///
    /// # Errors
    /// Propagates the store error.
    pub fn record(
        &self,
        execution_id: &ExecutionId,
        detail: TraceStepKind,
        occurred_at: Timestamp,
    ) -> Result<TraceStep, TraceStoreError> {
        self.store.append_step(execution_id, detail, occurred_at)
    }

    /// Returns every step recorded for `execution_id`, ordered ascending by
    /// `seq`.
    ///
    /// # Errors
    /// Propagates the store error.
    pub fn steps_for_execution(&self, execution_id: &ExecutionId) -> Result<Vec<TraceStep>, TraceStoreError> {
        self.store.steps_for_execution(execution_id)
    }

    /// Fetches and verifies the step chain for `execution_id`, returning
    /// every break found (empty when the chain is intact).
    ///
    /// # Errors
    /// Returns [`TraceServiceError::Store`] if the read fails, or
    /// [`TraceServiceError::Hash`] if hash recomputation itself fails.
    pub fn verify(&self, execution_id: &ExecutionId) -> Result<Vec<ChainBreak>, TraceServiceError> {
        let steps = self.store.steps_for_execution(execution_id)?;
        Ok(verify_trace(&steps)?)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors the trace store service can return.
#[derive(Debug, thiserror::Error)]
pub enum TraceServiceError {
    /// The backing store failed.
    #[error(transparent)]
    Store(#[from] TraceStoreError),
    /// Hash recomputation during verification failed.
    #[error(transparent)]
    Hash(#[from] HashError),
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    struct FakeStore(RefCell<HashMap<String, Vec<TraceStep>>>);

    impl TraceStore for FakeStore {
        fn append_step(
            &self,
            execution_id: &ExecutionId,
            detail: TraceStepKind,
            occurred_at: Timestamp,
        ) -> Result<TraceStep, TraceStoreError> {
            let mut steps = self.0.borrow_mut();
            let execution_steps = steps.entry(execution_id.to_string()).or_default();
            let seq = u64::try_from(execution_steps.len()).unwrap_or(u64::MAX) + 1;
            let prev_step_hash = execution_steps.last().map_or_else(|| crate::core::GENESIS_HASH.to_string(), |s| s.step_hash.clone());
            let step_id = StepId::new(format!("{execution_id}-{seq}"));
            let step = TraceStep::build(step_id, execution_id.clone(), seq, detail, occurred_at, prev_step_hash)
                .map_err(|err| TraceStoreError::Io(err.to_string()))?;
            execution_steps.push(step.clone());
            Ok(step)
        }

        fn steps_for_execution(&self, execution_id: &ExecutionId) -> Result<Vec<TraceStep>, TraceStoreError> {
            Ok(self.0.borrow().get(execution_id.as_str()).cloned().unwrap_or_default())
        }
    }

    #[test]
    fn a_freshly_recorded_step_chain_verifies_clean() {
        let service = TraceStoreService::new(FakeStore::default());
        let execution_id = ExecutionId::new("e1");
        service
            .record(&execution_id, TraceStepKind::Decision { outcome: "granted".to_string() }, Timestamp::now())
            .expect("record");
        service
            .record(
                &execution_id,
                TraceStepKind::ToolCall { tool: "shell.exec".to_string(), args_hash: "abc".to_string(), succeeded: true },
                Timestamp::now(),
            )
            .expect("record");
        let breaks = service.verify(&execution_id).expect("verify");
        assert!(breaks.is_empty());
    }

    #[test]
    fn verify_detects_a_tampered_step() {
        let store = FakeStore::default();
        let execution_id = ExecutionId::new("e1");
        store
            .append_step(&execution_id, TraceStepKind::Decision { outcome: "granted".to_string() }, Timestamp::now())
            .expect("append");
        {
            let mut steps = store.0.borrow_mut();
            let execution_steps = steps.get_mut(execution_id.as_str()).expect("execution steps");
            execution_steps[0].step_hash = "tampered".to_string();
        }
        let service = TraceStoreService::new(store);
        let breaks = service.verify(&execution_id).expect("verify");
        assert!(!breaks.is_empty());
    }
}
