use std::path::{Path, PathBuf};

pub const META_FILE: &str = "meta.json";
pub const SPEC_FILE: &str = "spec.json";
pub const EVENTS_FILE: &str = "events.jsonl";
pub const RUN_STATE_FILE: &str = "run_state.json";

pub const HANDOFF_DIR: &str = "handoff";
pub const LLM_DIR: &str = "llm";
pub const RECEIPTS_DIR: &str = "receipts";
pub const NAV_DIR: &str = "nav";
pub const ROUTING_DIR: &str = "routing";

/// Resolved filesystem locations for one run.
///
/// `flow_base(flow)` is the RUN_BASE for that flow: the directory all
/// per-flow artifacts (handoffs, transcripts, receipts, briefs, candidate
/// sets) live under.
#[derive(Debug, Clone)]
pub struct RunPaths {
    run_dir: PathBuf,
}

impl RunPaths {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        Self {
            run_dir: runs_dir.join(run_id),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn meta(&self) -> PathBuf {
        self.run_dir.join(META_FILE)
    }

    pub fn spec(&self) -> PathBuf {
        self.run_dir.join(SPEC_FILE)
    }

    pub fn events(&self) -> PathBuf {
        self.run_dir.join(EVENTS_FILE)
    }

    pub fn run_state(&self) -> PathBuf {
        self.run_dir.join(RUN_STATE_FILE)
    }

    /// RUN_BASE for a flow: `runs/<run_id>/<flow_key>/`.
    pub fn flow_base(&self, flow_key: &str) -> PathBuf {
        self.run_dir.join(flow_key)
    }

    pub fn handoff_dir(&self, flow_key: &str) -> PathBuf {
        self.flow_base(flow_key).join(HANDOFF_DIR)
    }

    pub fn envelope(&self, flow_key: &str, step_id: &str) -> PathBuf {
        self.handoff_dir(flow_key).join(format!("{step_id}.json"))
    }

    pub fn llm_dir(&self, flow_key: &str) -> PathBuf {
        self.flow_base(flow_key).join(LLM_DIR)
    }

    pub fn receipts_dir(&self, flow_key: &str) -> PathBuf {
        self.flow_base(flow_key).join(RECEIPTS_DIR)
    }

    pub fn nav_dir(&self, flow_key: &str) -> PathBuf {
        self.flow_base(flow_key).join(NAV_DIR)
    }

    pub fn routing_dir(&self, flow_key: &str) -> PathBuf {
        self.flow_base(flow_key).join(ROUTING_DIR)
    }

    /// Navigator brief for a step: `nav/<step_id>-brief.json`.
    pub fn nav_brief(&self, flow_key: &str, step_id: &str) -> PathBuf {
        self.nav_dir(flow_key).join(format!("{step_id}-brief.json"))
    }

    /// Candidate-set artifact: `routing/candidates_step_<step_id>.json`.
    pub fn candidate_set(&self, flow_key: &str, step_id: &str) -> PathBuf {
        self.routing_dir(flow_key)
            .join(format!("candidates_step_{step_id}.json"))
    }
}
