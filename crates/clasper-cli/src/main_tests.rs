// clasper-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Unit tests for the `verify-chain` helpers in the CLI entry point.
// Purpose: Ensure chain export parsing and break formatting behave as expected.
// Dependencies: clasper-core
// ============================================================================

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use clasper_core::AuditEntry;
use clasper_core::ChainBreak;
use clasper_core::ChainBreakReason;
use clasper_core::Timestamp;

use super::format_break_reason;
use super::parse_json;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn sample_entry(seq: u64) -> AuditEntry {
    AuditEntry::build(
        "tenant-a".into(),
        seq,
        "execution_decision",
        Timestamp::now(),
        "test",
        None,
        serde_json::json!({}),
        "sha256:genesis",
    )
    .expect("build entry")
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn parse_json_accepts_well_formed_chain_export() {
    let entries = vec![sample_entry(1)];
    let bytes = serde_json::to_vec(&entries).expect("serialize");
    let parsed: Vec<AuditEntry> = parse_json(&bytes, Path::new("export.json")).expect("parse");
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].seq, 1);
}

#[test]
fn parse_json_rejects_malformed_input() {
    let err = parse_json::<Vec<AuditEntry>>(b"not json", Path::new("export.json")).unwrap_err();
    assert!(err.to_string().contains("export.json"));
}

#[test]
fn format_break_reason_covers_every_variant() {
    let hash = ChainBreak { seq: 1, reason: ChainBreakReason::HashMismatch };
    let prev = ChainBreak { seq: 2, reason: ChainBreakReason::PrevHashMismatch };
    let gap = ChainBreak { seq: 3, reason: ChainBreakReason::SequenceGap };

    assert_eq!(format_break_reason(&hash), "hash mismatch");
    assert_eq!(format_break_reason(&prev), "prev_hash mismatch");
    assert_eq!(format_break_reason(&gap), "sequence gap");
}
