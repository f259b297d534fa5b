// clasper-core/src/core/risk.rs
// ============================================================================
// Module: Clasper Risk Scorer
// Description: Additive weighted risk scoring over request attributes (C5).
// Purpose: Map request attributes to a numeric score and bucket, with an
// auditable weighted breakdown shipped alongside every score.
// Dependencies: crate::core::adapter, serde
// ============================================================================

//! ## Overview
//! Scoring is a pure function: given a [`RiskInput`], it returns a
//! [`RiskScore`] containing the clipped `[0, 100]` total, the bucket, and the
//! weighted [`RiskBreakdown`] so operators can audit exactly how a score was
//! produced. Weights are fixed constants for a given deployment; they are
//! not tunable at runtime by this module.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::adapter::RiskClass;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Capability names considered high-impact regardless of count.
const HIGH_IMPACT_CAPABILITIES: &[&str] = &[
    "shell.exec",
    "filesystem.write",
    "network.egress",
    "credentials.read",
];

/// Capability count above which each additional capability adds weight.
const CAPABILITY_WEIGHT_THRESHOLD: usize = 3;

/// Weight added per capability above [`CAPABILITY_WEIGHT_THRESHOLD`].
const PER_CAPABILITY_WEIGHT: u32 = 2;

/// Weight added when any requested capability is high-impact.
const HIGH_IMPACT_WEIGHT: u32 = 10;

/// Weight added when the request declares outbound network access.
const EXTERNAL_NETWORK_WEIGHT: u32 = 10;

/// Weight added when the request declares elevated privileges.
const ELEVATED_PRIVILEGES_WEIGHT: u32 = 15;

/// Weight added when provenance source is `marketplace`.
const MARKETPLACE_PROVENANCE_WEIGHT: u32 = 10;

/// Weight added when provenance source is `unknown`.
const UNKNOWN_PROVENANCE_WEIGHT: u32 = 5;

/// Weight added when skill state is `untested`.
const UNTESTED_SKILL_WEIGHT: u32 = 10;

/// Weight subtracted when skill state is `pinned`.
const PINNED_SKILL_WEIGHT: i32 = -5;

/// Weight added when sampling temperature exceeds 1.0.
const HIGH_TEMPERATURE_WEIGHT: u32 = 5;

/// Weight added when data sensitivity is `pii`.
const PII_DATA_WEIGHT: u32 = 10;

/// Weight added when data sensitivity is `secrets`.
const SECRETS_DATA_WEIGHT: u32 = 20;

/// Score at or above which the bucket becomes `medium`.
const MEDIUM_CUTOFF: u32 = 25;

/// Score at or above which the bucket becomes `high`.
const HIGH_CUTOFF: u32 = 55;

/// Score at or above which the bucket becomes `critical`.
const CRITICAL_CUTOFF: u32 = 80;

/// Maximum total score.
const MAX_SCORE: u32 = 100;

// ============================================================================
// SECTION: Risk Bucket
// ============================================================================

/// The coarse risk bucket a numeric score falls into.
///
/// # Invariants
/// - Cutoffs are `25, 55, 80`: `[0,25)` low, `[25,55)` medium, `[55,80)`
///   high, `[80,100]` critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBucket {
    /// Score below 25.
    Low,
    /// Score in `[25, 55)`.
    Medium,
    /// Score in `[55, 80)`.
    High,
    /// Score in `[80, 100]`.
    Critical,
}

impl RiskBucket {
    /// Returns whether this bucket requires mandatory approval escalation at
    /// C6 when policy evaluation otherwise allows (high or critical).
    #[must_use]
    pub const fn forces_approval(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }

    const fn from_score(score: u32) -> Self {
        if score >= CRITICAL_CUTOFF {
            Self::Critical
        } else if score >= HIGH_CUTOFF {
            Self::High
        } else if score >= MEDIUM_CUTOFF {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

// ============================================================================
// SECTION: Risk Input
// ============================================================================

/// Skill maturity state, feeding the skill-state weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillState {
    /// Skill has not been exercised before.
    Untested,
    /// Skill has been exercised but is not pinned to a known-good version.
    Tested,
    /// Skill is pinned to a known-good, previously audited version.
    Pinned,
}

/// Data sensitivity classification, feeding the data-sensitivity weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSensitivity {
    /// No special sensitivity.
    None,
    /// Personally identifiable information.
    Pii,
    /// Credentials or other secrets.
    Secrets,
}

/// The inputs the risk scorer reads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskInput {
    /// Requested capability set.
    pub requested_capabilities: Vec<String>,
    /// Adapter's registered risk class.
    pub adapter_risk_class: RiskClassInput,
    /// Skill maturity state, if a skill is involved.
    pub skill_state: Option<SkillState>,
    /// Sampling temperature, if declared.
    pub temperature: Option<f64>,
    /// Data sensitivity classification.
    pub data_sensitivity: Option<DataSensitivity>,
    /// Whether the request declares outbound network access.
    pub external_network: Option<bool>,
    /// Whether the request declares elevated privileges.
    pub elevated_privileges: Option<bool>,
    /// Declared provenance source.
    pub provenance_source: Option<String>,
}

/// Wrapper so [`RiskClass`] can have a `Default` for [`RiskInput`] without
/// implying a default risk class exists in the product domain.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskClassInput(pub RiskClass);

impl Default for RiskClassInput {
    fn default() -> Self {
        Self(RiskClass::Low)
    }
}

// ============================================================================
// SECTION: Risk Breakdown & Score
// ============================================================================

/// The weighted contributions that produced a [`RiskScore`], for operator audit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskBreakdown {
    /// Contribution from the adapter's risk class.
    pub adapter_risk_class: i32,
    /// Contribution from capability count above the threshold.
    pub capability_count: i32,
    /// Contribution from any high-impact capability being requested.
    pub high_impact_capability: i32,
    /// Contribution from declared outbound network access.
    pub external_network: i32,
    /// Contribution from declared elevated privileges.
    pub elevated_privileges: i32,
    /// Contribution from provenance source.
    pub provenance_source: i32,
    /// Contribution from skill maturity state.
    pub skill_state: i32,
    /// Contribution from sampling temperature.
    pub temperature: i32,
    /// Contribution from data sensitivity classification.
    pub data_sensitivity: i32,
}

impl RiskBreakdown {
    fn total(&self) -> i32 {
        self.adapter_risk_class
            + self.capability_count
            + self.high_impact_capability
            + self.external_network
            + self.elevated_privileges
            + self.provenance_source
            + self.skill_state
            + self.temperature
            + self.data_sensitivity
    }
}

/// The scorer's output: a clipped numeric score, its bucket, and the
/// weighted breakdown that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    /// Final score, clipped to `[0, 100]`.
    pub score: u32,
    /// Bucket derived from `score` at cutoffs 25/55/80.
    pub bucket: RiskBucket,
    /// Weighted contributions that produced `score` before clipping.
    pub breakdown: RiskBreakdown,
}

/// Scores a request per the additive weighted model in the product
/// specification, clipping the total to `[0, 100]`.
#[must_use]
pub fn score(input: &RiskInput) -> RiskScore {
    let mut breakdown = RiskBreakdown {
        adapter_risk_class: i32::try_from(input.adapter_risk_class.0.base_score()).unwrap_or(0),
        ..RiskBreakdown::default()
    };

    let capability_count = input.requested_capabilities.len();
    if capability_count > CAPABILITY_WEIGHT_THRESHOLD {
        let extra = capability_count - CAPABILITY_WEIGHT_THRESHOLD;
        let extra_weight = u32::try_from(extra).unwrap_or(u32::MAX).saturating_mul(PER_CAPABILITY_WEIGHT);
        breakdown.capability_count = i32::try_from(extra_weight).unwrap_or(i32::MAX);
    }

    if input
        .requested_capabilities
        .iter()
        .any(|capability| HIGH_IMPACT_CAPABILITIES.contains(&capability.as_str()))
    {
        breakdown.high_impact_capability = i32::try_from(HIGH_IMPACT_WEIGHT).unwrap_or(0);
    }

    if input.external_network == Some(true) {
        breakdown.external_network = i32::try_from(EXTERNAL_NETWORK_WEIGHT).unwrap_or(0);
    }
    if input.elevated_privileges == Some(true) {
        breakdown.elevated_privileges = i32::try_from(ELEVATED_PRIVILEGES_WEIGHT).unwrap_or(0);
    }

    match input.provenance_source.as_deref() {
        Some("marketplace") => {
            breakdown.provenance_source = i32::try_from(MARKETPLACE_PROVENANCE_WEIGHT).unwrap_or(0);
        }
        Some("unknown") => {
            breakdown.provenance_source = i32::try_from(UNKNOWN_PROVENANCE_WEIGHT).unwrap_or(0);
        }
        _ => {}
    }

    match input.skill_state {
        Some(SkillState::Untested) => {
            breakdown.skill_state = i32::try_from(UNTESTED_SKILL_WEIGHT).unwrap_or(0);
        }
        Some(SkillState::Pinned) => breakdown.skill_state = PINNED_SKILL_WEIGHT,
        _ => {}
    }

    if input.temperature.is_some_and(|temperature| temperature > 1.0) {
        breakdown.temperature = i32::try_from(HIGH_TEMPERATURE_WEIGHT).unwrap_or(0);
    }

    match input.data_sensitivity {
        Some(DataSensitivity::Pii) => breakdown.data_sensitivity = i32::try_from(PII_DATA_WEIGHT).unwrap_or(0),
        Some(DataSensitivity::Secrets) => {
            breakdown.data_sensitivity = i32::try_from(SECRETS_DATA_WEIGHT).unwrap_or(0);
        }
        _ => {}
    }

    let total = breakdown.total().clamp(0, i32::try_from(MAX_SCORE).unwrap_or(i32::MAX));
    let clipped = u32::try_from(total).unwrap_or(0);

    RiskScore {
        score: clipped,
        bucket: RiskBucket::from_score(clipped),
        breakdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_risk_adapter_with_single_capability_is_low_bucket() {
        let input = RiskInput {
            requested_capabilities: vec!["llm".to_string()],
            adapter_risk_class: RiskClassInput(RiskClass::Low),
            ..RiskInput::default()
        };
        let result = score(&input);
        assert_eq!(result.score, 0);
        assert_eq!(result.bucket, RiskBucket::Low);
    }

    #[test]
    fn high_risk_class_with_no_other_factors_stays_high_not_critical() {
        let input = RiskInput {
            adapter_risk_class: RiskClassInput(RiskClass::High),
            ..RiskInput::default()
        };
        let result = score(&input);
        assert_eq!(result.score, 35);
        assert_eq!(result.bucket, RiskBucket::Medium);
    }

    #[test]
    fn high_impact_capability_and_marketplace_provenance_push_to_high() {
        let input = RiskInput {
            requested_capabilities: vec!["shell.exec".to_string()],
            adapter_risk_class: RiskClassInput(RiskClass::High),
            external_network: Some(true),
            provenance_source: Some("marketplace".to_string()),
            ..RiskInput::default()
        };
        let result = score(&input);
        // 35 (high) + 10 (high-impact) + 10 (external_network) + 10 (marketplace) = 65
        assert_eq!(result.score, 65);
        assert_eq!(result.bucket, RiskBucket::High);
        assert!(result.bucket.forces_approval());
    }

    #[test]
    fn score_clips_at_one_hundred() {
        let input = RiskInput {
            requested_capabilities: vec![
                "shell.exec".to_string(),
                "filesystem.write".to_string(),
                "network.egress".to_string(),
                "credentials.read".to_string(),
                "extra.one".to_string(),
                "extra.two".to_string(),
            ],
            adapter_risk_class: RiskClassInput(RiskClass::Critical),
            external_network: Some(true),
            elevated_privileges: Some(true),
            provenance_source: Some("marketplace".to_string()),
            skill_state: Some(SkillState::Untested),
            temperature: Some(1.5),
            data_sensitivity: Some(DataSensitivity::Secrets),
            ..RiskInput::default()
        };
        let result = score(&input);
        assert_eq!(result.score, 100);
        assert_eq!(result.bucket, RiskBucket::Critical);
    }
}
