use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audit::{AssumptionEntry, DecisionLogEntry, ObservationEntry, StationOpinion};
use crate::routing::RoutingSignal;
use crate::RunId;

/// Maximum length of an envelope summary in characters.
pub const SUMMARY_MAX_CHARS: usize = 2_000;

/// Durable per-step handoff artifact for cross-step communication.
///
/// Serves as a compression layer carrying the routing signal, artifact
/// pointers, and a bounded summary for efficient context handoff between
/// steps. Envelope files are immutable once written; routing augmentation
/// goes to sibling artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffEnvelope {
    pub step_id: String,
    pub flow_key: String,
    pub run_id: RunId,
    pub routing_signal: RoutingSignal,
    /// Compressed summary of step output, at most [`SUMMARY_MAX_CHARS`].
    pub summary: String,
    /// Artifact names to their paths relative to RUN_BASE.
    #[serde(default)]
    pub artifacts: BTreeMap<String, String>,
    /// Forensic file-mutation scan results. Authoritative; never trust the
    /// agent's self-report over this.
    #[serde(default)]
    pub file_changes: BTreeMap<String, Value>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    // Spec traceability
    #[serde(default)]
    pub station_id: Option<String>,
    #[serde(default)]
    pub station_version: Option<u32>,
    #[serde(default)]
    pub prompt_hash: Option<String>,
    #[serde(default = "default_true")]
    pub verification_passed: bool,
    #[serde(default)]
    pub verification_details: BTreeMap<String, Value>,
    /// Routing audit trail, populated when routing produced an explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_audit: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assumptions_made: Vec<AssumptionEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub decisions_made: Vec<DecisionLogEntry>,
    /// Shadow telemetry for downstream analysis.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub observations: Vec<ObservationEntry>,
    /// Non-binding witness statements; the orchestrator corroborates these
    /// against forensics before acting on any of them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub station_opinions: Vec<StationOpinion>,
}

fn default_status() -> String {
    "succeeded".to_string()
}

fn default_true() -> bool {
    true
}

impl HandoffEnvelope {
    /// Build an envelope, truncating the summary to its cap.
    pub fn new(
        step_id: impl Into<String>,
        flow_key: impl Into<String>,
        run_id: impl Into<RunId>,
        routing_signal: RoutingSignal,
        summary: impl Into<String>,
    ) -> Self {
        let mut summary = summary.into();
        if summary.len() > SUMMARY_MAX_CHARS {
            summary = truncate_on_char_boundary(&summary, SUMMARY_MAX_CHARS);
        }
        Self {
            step_id: step_id.into(),
            flow_key: flow_key.into(),
            run_id: run_id.into(),
            routing_signal,
            summary,
            artifacts: BTreeMap::new(),
            file_changes: BTreeMap::new(),
            status: default_status(),
            error: None,
            duration_ms: 0,
            timestamp: Utc::now(),
            station_id: None,
            station_version: None,
            prompt_hash: None,
            verification_passed: true,
            verification_details: BTreeMap::new(),
            routing_audit: None,
            assumptions_made: Vec::new(),
            decisions_made: Vec::new(),
            observations: Vec::new(),
            station_opinions: Vec::new(),
        }
    }
}

fn truncate_on_char_boundary(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let mut envelope = HandoffEnvelope::new(
            "author_reqs",
            "signal",
            "run-20251208-143022-abc123",
            RoutingSignal::advance(Some("critique_reqs".into()), "linear edge"),
            "Requirements drafted across 4 sections.",
        );
        envelope
            .artifacts
            .insert("requirements.md".into(), "signal/requirements.md".into());
        envelope.duration_ms = 1200;

        let json = serde_json::to_string(&envelope).unwrap();
        let back: HandoffEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(envelope, back);
    }

    #[test]
    fn test_summary_is_capped() {
        let long = "x".repeat(SUMMARY_MAX_CHARS * 2);
        let envelope = HandoffEnvelope::new(
            "s",
            "f",
            "run-x",
            RoutingSignal::default(),
            long,
        );
        assert_eq!(envelope.summary.len(), SUMMARY_MAX_CHARS);
    }

    #[test]
    fn test_envelope_tolerates_unknown_fields() {
        let envelope = HandoffEnvelope::new(
            "s",
            "f",
            "run-x",
            RoutingSignal::default(),
            "done",
        );
        let mut value = serde_json::to_value(&envelope).unwrap();
        value["added_in_v9"] = serde_json::json!({"nested": true});
        let back: HandoffEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(envelope, back);
    }
}
