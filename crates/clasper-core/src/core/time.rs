// clasper-core/src/core/time.rs
// ============================================================================
// Module: Clasper Time Model
// Description: Canonical timestamp representation for audit, decisions, and tokens.
// Purpose: Provide a single wall-clock timestamp type with deterministic RFC 3339
// serialization so two parties can agree byte-for-byte on a hashed record.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Unlike a replay engine, Clasper's chains (audit, trace, tool tokens) are
//! anchored to real wall-clock time: freshness checks (`timestamp_skew`) and
//! expiry checks compare against `now`. The core never reads the clock
//! implicitly — callers that need "now" go through [`Timestamp::now`], kept as
//! a single seam so tests can inject fixed times.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::error::ComponentRange;

// ============================================================================
// SECTION: Timestamp
// ============================================================================

/// Canonical timestamp used throughout Clasper's persisted and hashed records.
///
/// # Invariants
/// - Serializes to and from RFC 3339 (`2026-07-26T12:00:00Z`), matching the
///   string form expected in canonical JSON records.
/// - Equality and ordering compare the underlying instant, not the original
///   string representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(#[serde(with = "time::serde::rfc3339")] OffsetDateTime);

impl Timestamp {
    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Wraps an existing [`OffsetDateTime`].
    #[must_use]
    pub const fn from_offset_date_time(value: OffsetDateTime) -> Self {
        Self(value)
    }

    /// Returns the wrapped [`OffsetDateTime`].
    #[must_use]
    pub const fn as_offset_date_time(&self) -> OffsetDateTime {
        self.0
    }

    /// Returns a timestamp `seconds` in the future relative to `self`.
    ///
    /// # Errors
    /// Returns a [`ComponentRange`] if the resulting instant overflows the
    /// representable range.
    pub fn checked_add_seconds(&self, seconds: i64) -> Result<Self, ComponentRange> {
        let duration = time::Duration::seconds(seconds);
        self.0
            .checked_add(duration)
            .map(Self)
            .ok_or_else(|| unreachable_component_range())
    }

    /// Returns whether `self` is strictly before `other`.
    #[must_use]
    pub fn is_before(&self, other: Self) -> bool {
        self.0 < other.0
    }

    /// Returns the absolute difference, in whole seconds, between two timestamps.
    #[must_use]
    pub fn abs_diff_seconds(&self, other: Self) -> i64 {
        (self.0 - other.0).whole_seconds().abs()
    }
}

/// `OffsetDateTime::checked_add` only returns `None` on overflow; synthesize a
/// matching error value for that unreachable-in-practice branch.
fn unreachable_component_range() -> ComponentRange {
    match OffsetDateTime::from_unix_timestamp(i64::MAX) {
        Ok(_) => unreachable!("i64::MAX unix timestamp is always out of range"),
        Err(err) => err,
    }
}

#[cfg(test)]
mod tests {
    use super::Timestamp;

    #[test]
    fn round_trips_through_rfc3339_json() {
        let ts = Timestamp::now();
        let json = serde_json::to_string(&ts).expect("serialize timestamp");
        let back: Timestamp = serde_json::from_str(&json).expect("deserialize timestamp");
        assert_eq!(ts, back);
    }

    #[test]
    fn checked_add_seconds_moves_forward() {
        let ts = Timestamp::now();
        let later = ts.checked_add_seconds(900).expect("add seconds");
        assert!(ts.is_before(later));
        assert_eq!(later.abs_diff_seconds(ts), 900);
    }
}
