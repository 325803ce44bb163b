//! RunWorld pattern for declarative integration test setup.
//!
//! Provides an isolated runs directory backed by a temp dir, a store
//! handle scoped to it, and helpers for seeding run artifacts the way the
//! orchestrator would have written them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use switchyard_store::Store;
use switchyard_types::{
    generate_run_id, HandoffEnvelope, RunEvent, RunId, RunSpec, RunState, RunSummary,
};

/// Isolated test environment with its own runs directory and store.
pub struct RunWorld {
    temp_dir: TempDir,
    runs_dir: PathBuf,
    repo_root: PathBuf,
    store: Arc<Store>,
}

impl Default for RunWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl RunWorld {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let runs_dir = temp_dir.path().join("runs");
        let repo_root = temp_dir.path().join("repo");
        std::fs::create_dir_all(&repo_root).expect("Failed to create repo root");
        let store = Arc::new(Store::new(&runs_dir));
        Self {
            temp_dir,
            runs_dir,
            repo_root,
            store,
        }
    }

    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    /// A fresh store over the same runs directory, simulating a process
    /// restart (in-memory counters and locks are gone).
    pub fn reopened_store(&self) -> Store {
        Store::new(&self.runs_dir)
    }

    pub fn runs_dir(&self) -> &Path {
        &self.runs_dir
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn base_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Seed a complete run: spec.json, meta.json, and an initial
    /// run_state.json pointing at `first_step`.
    pub fn seed_run(&self, spec: &RunSpec, flow_key: &str, first_step: Option<&str>) -> RunId {
        let run_id = generate_run_id();
        self.store
            .write_spec(&run_id, spec)
            .expect("Failed to write spec");
        self.store
            .write_summary(&run_id, &RunSummary::new(run_id.clone(), spec.clone()))
            .expect("Failed to write summary");

        let mut state = RunState::new(run_id.clone(), flow_key);
        state.current_step_id = first_step.map(String::from);
        self.store
            .write_run_state(&run_id, &state)
            .expect("Failed to write run state");
        run_id
    }

    /// Append an event through the store (seq assigned normally).
    pub fn append_event(&self, run_id: &str, event: RunEvent) {
        self.store.append_event(run_id, event);
    }

    /// Write an envelope file the way a committed step would have.
    pub fn write_envelope(&self, run_id: &str, flow_key: &str, envelope: &HandoffEnvelope) {
        self.store
            .write_envelope(run_id, flow_key, envelope)
            .expect("Failed to write envelope");
    }

    /// Overwrite run_state.json directly (for pre-populating scenarios).
    pub fn write_run_state(&self, run_id: &str, state: &RunState) {
        self.store
            .write_run_state(run_id, state)
            .expect("Failed to write run state");
    }

    /// Raw contents of the run's events.jsonl, for corruption scenarios.
    pub fn events_path(&self, run_id: &str) -> PathBuf {
        self.store.paths(run_id).events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_seeds_readable_run() {
        let world = RunWorld::new();
        let spec = RunSpec::new(vec!["signal".into()]);
        let run_id = world.seed_run(&spec, "signal", Some("normalize_signal"));

        let store = world.store();
        assert!(store.run_exists(&run_id));
        assert_eq!(store.read_spec(&run_id), Some(spec));
        let state = store.read_run_state(&run_id).unwrap();
        assert_eq!(state.current_step_id.as_deref(), Some("normalize_signal"));
    }
}
