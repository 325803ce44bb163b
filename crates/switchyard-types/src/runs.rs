use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::generate_event_id;
use crate::{BackendId, RunId};

/// Status of a run's execution lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    /// Interrupted mid-run, resumable from the saved cursor.
    Partial,
    /// Graceful shutdown in progress.
    Stopping,
    /// Clean stop with savepoint (distinct from failed).
    Stopped,
    /// Waiting for the current step to complete before pause.
    Pausing,
    /// Paused at a clean boundary, resumable.
    Paused,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Canceled => "canceled",
            RunStatus::Partial => "partial",
            RunStatus::Stopping => "stopping",
            RunStatus::Stopped => "stopped",
            RunStatus::Pausing => "pausing",
            RunStatus::Paused => "paused",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded
                | RunStatus::Failed
                | RunStatus::Canceled
                | RunStatus::Stopped
                | RunStatus::Partial
        )
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        RunStatus::Pending
    }
}

/// Status reflecting SDLC health/quality outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SdlcStatus {
    Ok,
    Warning,
    Error,
    Unknown,
    /// Interrupted mid-run, work is incomplete.
    Partial,
}

impl SdlcStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SdlcStatus::Ok => "ok",
            SdlcStatus::Warning => "warning",
            SdlcStatus::Error => "error",
            SdlcStatus::Unknown => "unknown",
            SdlcStatus::Partial => "partial",
        }
    }
}

impl Default for SdlcStatus {
    fn default() -> Self {
        SdlcStatus::Unknown
    }
}

/// Specification for starting a new run.
///
/// Captures the intent of what should be executed: which flows to run,
/// which profile and backend to use, and any backend-specific parameters.
/// Immutable once the run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSpec {
    /// Ordered flow keys to execute (e.g. `["signal", "build"]`).
    pub flow_keys: Vec<String>,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default = "default_backend")]
    pub backend: BackendId,
    /// Source of the run ("cli", "api", "ci", ...).
    #[serde(default = "default_initiator")]
    pub initiator: String,
    /// Arbitrary per-backend extra parameters.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// Autopilot mode: PAUSE intents are rewritten to DETOUR so the run
    /// never blocks on a human mid-flow.
    #[serde(default)]
    pub no_human_mid_flow: bool,
}

fn default_backend() -> String {
    "stub-step".to_string()
}

fn default_initiator() -> String {
    "unknown".to_string()
}

impl RunSpec {
    pub fn new(flow_keys: Vec<String>) -> Self {
        Self {
            flow_keys,
            profile_id: None,
            backend: default_backend(),
            initiator: "cli".to_string(),
            params: BTreeMap::new(),
            no_human_mid_flow: false,
        }
    }
}

/// Summary of a run's current state; the single mutable meta artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: RunId,
    pub spec: RunSpec,
    pub status: RunStatus,
    pub sdlc_status: SdlcStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    /// Produced artifacts by flow/step.
    #[serde(default)]
    pub artifacts: BTreeMap<String, Value>,
    /// Whether this run is marked as a teaching example.
    #[serde(default)]
    pub is_exemplar: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RunSummary {
    /// Create a fresh summary for a newly started run.
    pub fn new(id: RunId, spec: RunSpec) -> Self {
        let now = Utc::now();
        Self {
            id,
            spec,
            status: RunStatus::Pending,
            sdlc_status: SdlcStatus::Unknown,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            error: None,
            artifacts: BTreeMap::new(),
            is_exemplar: false,
            tags: Vec::new(),
            title: None,
            path: None,
            description: None,
        }
    }
}

/// A single event in a run's timeline.
///
/// Events are append-only and totally ordered per run by `seq`, which the
/// storage layer assigns at write time. Timestamps are advisory.
///
/// Standard kinds include `run_started`, `run_completed`, `run_failed`,
/// `run_stopped`, `step_started`, `step_completed`, `step_routed`,
/// `tool_start`, `tool_end`, `assistant_message`, `user_message`,
/// `file_changes`, `lifecycle_phases_completed`, `step_timing`,
/// `graph_patch_suggested`, `detour_taken`, `sidequest_start`,
/// `sidequest_complete`, `loop_stall_detected`, `fork_started`,
/// `fork_completed`, `verification_*`, and `macro_route`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Globally unique identifier; regenerated on read when absent.
    #[serde(default = "generate_event_id")]
    pub event_id: String,
    /// Monotonic per-run sequence, assigned by the storage layer.
    #[serde(default)]
    pub seq: u64,
    pub run_id: RunId,
    pub ts: DateTime<Utc>,
    pub kind: String,
    #[serde(default)]
    pub flow_key: String,
    #[serde(default)]
    pub step_id: Option<String>,
    #[serde(default)]
    pub agent_key: Option<String>,
    #[serde(default)]
    pub payload: BTreeMap<String, Value>,
}

impl RunEvent {
    /// Construct an event with a fresh id and seq 0 (assigned at append).
    pub fn new(run_id: impl Into<RunId>, kind: impl Into<String>, flow_key: impl Into<String>) -> Self {
        Self {
            event_id: generate_event_id(),
            seq: 0,
            run_id: run_id.into(),
            ts: Utc::now(),
            kind: kind.into(),
            flow_key: flow_key.into(),
            step_id: None,
            agent_key: None,
            payload: BTreeMap::new(),
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn with_agent(mut self, agent_key: impl Into<String>) -> Self {
        self.agent_key = Some(agent_key.into());
        self
    }

    pub fn with_payload(mut self, payload: BTreeMap<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn payload_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_spec_round_trip() {
        let mut spec = RunSpec::new(vec!["signal".into(), "build".into()]);
        spec.no_human_mid_flow = true;
        spec.params
            .insert("target".into(), Value::String("main".into()));

        let json = serde_json::to_string(&spec).unwrap();
        let back: RunSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, back);
    }

    #[test]
    fn test_run_spec_tolerates_missing_fields() {
        let spec: RunSpec = serde_json::from_str(r#"{"flow_keys": ["signal"]}"#).unwrap();
        assert_eq!(spec.flow_keys, vec!["signal"]);
        assert_eq!(spec.backend, "stub-step");
        assert!(!spec.no_human_mid_flow);
    }

    #[test]
    fn test_run_event_regenerates_missing_id() {
        let raw = r#"{"run_id": "run-x", "ts": "2025-01-08T12:00:00Z", "kind": "log", "flow_key": "build"}"#;
        let event: RunEvent = serde_json::from_str(raw).unwrap();
        assert!(!event.event_id.is_empty());
        assert_eq!(event.seq, 0);
    }

    #[test]
    fn test_run_event_round_trip() {
        let event = RunEvent::new("run-1", "step_completed", "signal")
            .with_step("author_reqs")
            .payload_entry("status", Value::String("VERIFIED".into()));
        let json = serde_json::to_string(&event).unwrap();
        let back: RunEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn test_run_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::Stopping).unwrap(),
            "\"stopping\""
        );
        assert!(RunStatus::Stopped.is_terminal());
        assert!(!RunStatus::Pausing.is_terminal());
    }

    #[test]
    fn test_summary_tolerates_unknown_fields() {
        let summary = RunSummary::new("run-1".into(), RunSpec::new(vec!["signal".into()]));
        let mut value = serde_json::to_value(&summary).unwrap();
        value["future_field"] = Value::Bool(true);
        let back: RunSummary = serde_json::from_value(value).unwrap();
        assert_eq!(summary, back);
    }
}
