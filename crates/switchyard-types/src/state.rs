use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::handoff::HandoffEnvelope;
use crate::runs::RunStatus;
use crate::RunId;

/// Frame representing an interruption point in the execution stack.
///
/// When a run detours, a frame is pushed so the orchestrator can resume
/// where it left off. Multi-step sidequests advance `current_step_index`;
/// the frame pops only once `current_step_index` reaches `total_steps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptionFrame {
    pub reason: String,
    pub interrupted_at: DateTime<Utc>,
    /// Node to return to after the detour completes.
    pub return_node: String,
    #[serde(default)]
    pub context_snapshot: BTreeMap<String, Value>,
    /// 0-indexed cursor within a multi-step sidequest.
    #[serde(default)]
    pub current_step_index: usize,
    #[serde(default = "default_total_steps")]
    pub total_steps: usize,
    /// Sidequest being executed, for catalog lookup.
    #[serde(default)]
    pub sidequest_id: Option<String>,
}

fn default_total_steps() -> usize {
    1
}

/// A saved point to continue from after an interruption completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePoint {
    pub node_id: String,
    #[serde(default)]
    pub saved_context: BTreeMap<String, Value>,
}

/// Full execution specification for a dynamically injected node.
///
/// Injected nodes are run-local: they exist only in the run state, never in
/// the flow definition. Node ids follow `sq-<sidequest>-<index>` for
/// sidequest steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectedNodeSpec {
    pub node_id: String,
    /// Station to execute, resolved against the station library.
    pub station_id: String,
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub agent_key: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// Sidequest that injected this node, if any.
    #[serde(default)]
    pub sidequest_origin: Option<String>,
    /// Step index within a multi-step sequence (0-based).
    #[serde(default)]
    pub sequence_index: usize,
    #[serde(default = "default_total_steps")]
    pub total_in_sequence: usize,
}

/// Durable program counter for stepwise flow execution with detour support.
///
/// Tracks the cursor, microloop iteration counts, completed envelopes, and
/// the interruption/resume stacks that make nested detours possible. The
/// state is replaced atomically on disk after every step commit, and
/// `current_step_id` always names the *next* step to execute (or `None`
/// once the flow terminated).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: RunId,
    pub flow_key: String,
    #[serde(default)]
    pub current_step_id: Option<String>,
    #[serde(default)]
    pub step_index: usize,
    /// Iteration counts per microloop step.
    #[serde(default)]
    pub loop_state: BTreeMap<String, u32>,
    /// Envelopes for completed steps; reconstructible from disk.
    #[serde(default)]
    pub handoff_envelopes: BTreeMap<String, HandoffEnvelope>,
    #[serde(default)]
    pub status: RunStatus,
    pub timestamp: DateTime<Utc>,
    /// 1-based index of the current flow in a multi-flow run.
    #[serde(default = "default_flow_index")]
    pub current_flow_index: u32,
    #[serde(default)]
    pub flow_transition_history: Vec<BTreeMap<String, Value>>,
    /// Stack of interruption frames for nested detours.
    #[serde(default)]
    pub interruption_stack: Vec<InterruptionFrame>,
    /// Stack of resume points for continuation after interruption.
    #[serde(default)]
    pub resume_stack: Vec<ResumePoint>,
    #[serde(default)]
    pub injected_nodes: Vec<String>,
    #[serde(default)]
    pub injected_node_specs: BTreeMap<String, InjectedNodeSpec>,
    #[serde(default)]
    pub completed_nodes: Vec<String>,
}

fn default_flow_index() -> u32 {
    1
}

impl RunState {
    pub fn new(run_id: impl Into<RunId>, flow_key: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            flow_key: flow_key.into(),
            current_step_id: None,
            step_index: 0,
            loop_state: BTreeMap::new(),
            handoff_envelopes: BTreeMap::new(),
            status: RunStatus::Pending,
            timestamp: Utc::now(),
            current_flow_index: 1,
            flow_transition_history: Vec::new(),
            interruption_stack: Vec::new(),
            resume_stack: Vec::new(),
            injected_nodes: Vec::new(),
            injected_node_specs: BTreeMap::new(),
            completed_nodes: Vec::new(),
        }
    }

    // ---------------------------------------------------------------------
    // Detour stack operations
    // ---------------------------------------------------------------------

    /// Push an interruption frame for a detour.
    pub fn push_interruption(&mut self, frame: InterruptionFrame) {
        self.interruption_stack.push(frame);
        self.touch();
    }

    pub fn pop_interruption(&mut self) -> Option<InterruptionFrame> {
        let frame = self.interruption_stack.pop();
        if frame.is_some() {
            self.touch();
        }
        frame
    }

    pub fn peek_interruption(&self) -> Option<&InterruptionFrame> {
        self.interruption_stack.last()
    }

    pub fn peek_interruption_mut(&mut self) -> Option<&mut InterruptionFrame> {
        self.interruption_stack.last_mut()
    }

    pub fn push_resume(&mut self, node_id: impl Into<String>, saved_context: BTreeMap<String, Value>) {
        self.resume_stack.push(ResumePoint {
            node_id: node_id.into(),
            saved_context,
        });
        self.touch();
    }

    pub fn pop_resume(&mut self) -> Option<ResumePoint> {
        let point = self.resume_stack.pop();
        if point.is_some() {
            self.touch();
        }
        point
    }

    pub fn peek_resume(&self) -> Option<&ResumePoint> {
        self.resume_stack.last()
    }

    /// Register an injected node with its full execution spec.
    pub fn register_injected_node(&mut self, spec: InjectedNodeSpec) {
        if !self.injected_nodes.contains(&spec.node_id) {
            self.injected_nodes.push(spec.node_id.clone());
        }
        self.injected_node_specs.insert(spec.node_id.clone(), spec);
        self.touch();
    }

    pub fn get_injected_node_spec(&self, node_id: &str) -> Option<&InjectedNodeSpec> {
        self.injected_node_specs.get(node_id)
    }

    pub fn mark_node_completed(&mut self, node_id: &str) {
        if !self.completed_nodes.iter().any(|n| n == node_id) {
            self.completed_nodes.push(node_id.to_string());
            self.touch();
        }
    }

    pub fn is_node_completed(&self, node_id: &str) -> bool {
        self.completed_nodes.iter().any(|n| n == node_id)
    }

    /// Whether there are pending interruptions on the stack.
    pub fn is_interrupted(&self) -> bool {
        !self.interruption_stack.is_empty()
    }

    /// Current depth of nested interruptions.
    pub fn interruption_depth(&self) -> usize {
        self.interruption_stack.len()
    }

    fn touch(&mut self) {
        self.timestamp = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(reason: &str, return_node: &str) -> InterruptionFrame {
        InterruptionFrame {
            reason: reason.into(),
            interrupted_at: Utc::now(),
            return_node: return_node.into(),
            context_snapshot: BTreeMap::new(),
            current_step_index: 0,
            total_steps: 1,
            sidequest_id: None,
        }
    }

    #[test]
    fn test_stack_push_pop_order() {
        let mut state = RunState::new("run-1", "build");
        state.push_interruption(frame("first", "a"));
        state.push_interruption(frame("second", "b"));

        assert_eq!(state.interruption_depth(), 2);
        assert_eq!(state.peek_interruption().unwrap().reason, "second");
        assert_eq!(state.pop_interruption().unwrap().reason, "second");
        assert_eq!(state.pop_interruption().unwrap().reason, "first");
        assert!(state.pop_interruption().is_none());
        assert!(!state.is_interrupted());
    }

    #[test]
    fn test_register_injected_node_is_idempotent() {
        let mut state = RunState::new("run-1", "build");
        let spec = InjectedNodeSpec {
            node_id: "sq-clarifier-0".into(),
            station_id: "clarifier".into(),
            template_id: None,
            agent_key: None,
            role: "sidequest".into(),
            params: BTreeMap::new(),
            sidequest_origin: Some("clarifier".into()),
            sequence_index: 0,
            total_in_sequence: 1,
        };
        state.register_injected_node(spec.clone());
        state.register_injected_node(spec);

        assert_eq!(state.injected_nodes.len(), 1);
        assert!(state.get_injected_node_spec("sq-clarifier-0").is_some());
    }

    #[test]
    fn test_run_state_round_trip() {
        let mut state = RunState::new("run-1", "signal");
        state.current_step_id = Some("author_reqs".into());
        state.step_index = 1;
        state.loop_state.insert("author_reqs".into(), 2);
        state.push_resume("author_reqs", BTreeMap::new());
        state.mark_node_completed("normalize_signal");

        let json = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn test_state_tolerates_legacy_payload() {
        // A state written before detour support existed.
        let raw = r#"{
            "run_id": "run-legacy",
            "flow_key": "build",
            "current_step_id": "implement",
            "step_index": 3,
            "status": "running",
            "timestamp": "2025-01-08T12:00:00Z"
        }"#;
        let state: RunState = serde_json::from_str(raw).unwrap();
        assert_eq!(state.current_flow_index, 1);
        assert!(state.interruption_stack.is_empty());
        assert!(state.injected_node_specs.is_empty());
    }
}
