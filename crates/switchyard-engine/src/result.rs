use std::collections::BTreeMap;

use switchyard_types::{HandoffEnvelope, RunEvent};

/// Result of executing a single step.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StepResult {
    pub step_id: String,
    /// Execution/verification status. Engines surface the critic's verdict
    /// here for microloop steps ("VERIFIED", "UNVERIFIED", ...) and plain
    /// execution outcomes ("succeeded", "failed") otherwise.
    pub status: String,
    /// Summary text describing what happened.
    pub output: String,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Artifact names/paths produced by the step.
    pub artifacts: BTreeMap<String, String>,
    /// Explicit routing target, when the step itself knows where to go.
    /// Trusted by the routing fast path.
    pub next_step_id: Option<String>,
}

impl StepResult {
    pub fn succeeded(step_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status: "succeeded".into(),
            output: output.into(),
            ..Self::default()
        }
    }

    pub fn failed(step_id: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            step_id: step_id.into(),
            status: "failed".into(),
            output: String::new(),
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == "failed"
    }
}

/// Output of the JIT finalization phase: the handoff envelope and any
/// events emitted while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizationResult {
    pub envelope: HandoffEnvelope,
    pub events: Vec<RunEvent>,
}
