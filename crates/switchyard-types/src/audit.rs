//! Audit records for assumption and decision logging.
//!
//! These types track assumptions made during flow execution, decisions
//! logged for audit trails, and observations destined for downstream
//! process analysis.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Confidence level for assumptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl Default for ConfidenceLevel {
    fn default() -> Self {
        ConfidenceLevel::Medium
    }
}

/// Status of an assumption through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssumptionStatus {
    /// Currently in effect.
    Active,
    /// Confirmed or clarified.
    Resolved,
    /// Proven wrong.
    Invalidated,
}

impl Default for AssumptionStatus {
    fn default() -> Self {
        AssumptionStatus::Active
    }
}

/// Types of observations for downstream learning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    /// Logged for the audit trail.
    ActionTaken,
    /// Noticed but not acted on (outside the step's charter).
    ActionDeferred,
    /// Suggestion for spec evolution.
    OptimizationOpportunity,
    /// Recurring behavior worth codifying.
    PatternDetected,
}

/// Priority levels for observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationPriority {
    Low,
    Medium,
    High,
}

impl Default for ObservationPriority {
    fn default() -> Self {
        ObservationPriority::Low
    }
}

/// Kind of non-binding opinion a station can express.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationOpinionKind {
    SuggestDetour,
    SuggestRepeat,
    SuggestSubflowInjection,
    SuggestDeferToWisdom,
    FlagConcern,
}

/// A non-binding witness statement from a station about what it thinks
/// should happen next.
///
/// This is signal for the orchestrator to corroborate via forensics and
/// charter alignment, not executable intent. Stations express opinions;
/// orchestrators decide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationOpinion {
    pub kind: StationOpinionKind,
    pub suggested_action: String,
    pub reason: String,
    #[serde(default)]
    pub evidence_paths: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Something a station noticed during execution.
///
/// Observations capture things that may not have been acted upon but
/// should be considered by later analysis for learning and spec evolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationEntry {
    #[serde(rename = "type")]
    pub observation_type: ObservationType,
    pub observation: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub suggested_action: Option<String>,
    #[serde(default)]
    pub target_flow: Option<String>,
    #[serde(default)]
    pub priority: ObservationPriority,
}

/// A structured record of an assumption made during flow execution.
///
/// Assumptions are made when agents face ambiguity and need to proceed with
/// their best interpretation; the record captures the statement, its
/// rationale, and the impact if it turns out wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssumptionEntry {
    pub assumption_id: String,
    pub flow_introduced: String,
    pub step_introduced: String,
    pub agent: String,
    pub statement: String,
    pub rationale: String,
    pub impact_if_wrong: String,
    #[serde(default)]
    pub confidence: ConfidenceLevel,
    #[serde(default)]
    pub status: AssumptionStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub resolution_note: Option<String>,
}

/// A structured record of a significant decision made during flow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub decision_id: String,
    pub flow: String,
    pub step: String,
    pub agent: String,
    /// Category of decision ("design", "implementation", "routing", ...).
    pub decision_type: String,
    pub subject: String,
    pub decision: String,
    pub rationale: String,
    #[serde(default)]
    pub supporting_evidence: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    /// IDs of assumptions that influenced this decision.
    #[serde(default)]
    pub assumptions_applied: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_station_opinion_round_trip() {
        let opinion = StationOpinion {
            kind: StationOpinionKind::SuggestDetour,
            suggested_action: "run test-triage before advancing".into(),
            reason: "two consecutive test failures with the same signature".into(),
            evidence_paths: vec!["build/test_summary.md".into()],
            confidence: Some(0.7),
        };
        let json = serde_json::to_string(&opinion).unwrap();
        assert!(json.contains("suggest_detour"));
        let back: StationOpinion = serde_json::from_str(&json).unwrap();
        assert_eq!(opinion, back);
    }

    #[test]
    fn test_observation_type_field_name() {
        let entry = ObservationEntry {
            observation_type: ObservationType::PatternDetected,
            observation: "critic loops settle on iteration 2".into(),
            reason: None,
            suggested_action: None,
            target_flow: Some("signal".into()),
            priority: ObservationPriority::Medium,
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["type"], "pattern_detected");
    }
}
