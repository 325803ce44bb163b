use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;

use switchyard_catalog::TeachingNotes;
use switchyard_context::{ContextPack, HistoryItem};
use switchyard_types::RunSpec;

/// Microloop state and routing metadata included in receipts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingContext {
    /// Current iteration count for the microloop (0-indexed).
    pub loop_iteration: u32,
    pub max_iterations: Option<u32>,
    /// "loop" | "advance" | "terminate" | "pending".
    pub decision: String,
    pub reason: String,
}

/// Input context for executing a single step.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub repo_root: PathBuf,
    /// Base directory containing run directories.
    pub runs_dir: PathBuf,
    pub run_id: String,
    pub flow_key: String,
    pub step_id: String,
    pub step_index: usize,
    pub total_steps: usize,
    pub spec: RunSpec,
    pub flow_title: String,
    pub step_role: String,
    pub step_agents: Vec<String>,
    /// Prior step outcomes in chronological order.
    pub history: Vec<HistoryItem>,
    pub extra: BTreeMap<String, Value>,
    pub teaching_notes: Option<TeachingNotes>,
    pub routing: Option<RoutingContext>,
    /// Hydrated context pack, attached by the orchestrator before
    /// invocation.
    pub context_pack: Option<ContextPack>,
}

impl StepContext {
    /// RUN_BASE for this step's artifacts: `<runs_dir>/<run_id>/<flow_key>`.
    pub fn run_base(&self) -> PathBuf {
        self.runs_dir.join(&self.run_id).join(&self.flow_key)
    }

    /// Primary agent for this step, used in artifact filenames.
    pub fn primary_agent(&self) -> &str {
        self.step_agents
            .first()
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    /// Repo root as a path, for engines that scan file changes.
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }
}
