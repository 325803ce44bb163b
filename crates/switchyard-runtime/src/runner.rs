//! Step execution with engine abstraction.
//!
//! Runs one step through the appropriate engine interface (three-phase
//! for lifecycle-capable engines, single-phase otherwise), capturing
//! timing, file-change evidence between work and finalize, and the
//! orchestrator-side events (`file_changes`, `lifecycle_phases_completed`,
//! `step_timing`).

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use walkdir::WalkDir;

use switchyard_engine::{LifecycleCapableEngine, StepContext, StepEngine, StepResult};
use switchyard_types::{HandoffEnvelope, RoutingSignal, RunEvent};

use crate::stall::ProgressEvidence;

/// Cap on file entries carried into payloads and envelopes.
const MAX_EVIDENCE_FILES: usize = 20;
/// Cap on per-file path bytes carried into envelopes.
const MAX_EVIDENCE_PATH_BYTES: usize = 200;

/// Observes file mutations around an engine invocation.
///
/// The scan result is authoritative forensic evidence; agent self-reports
/// are never trusted over it.
pub trait ChangeScanner: Send + Sync {
    /// Snapshot current state before the step runs.
    fn begin(&mut self, repo_root: &Path);

    /// Diff against the snapshot after the step ran.
    fn scan(&mut self, repo_root: &Path) -> ProgressEvidence;
}

/// Scanner that never reports changes. For engines whose work happens
/// outside the observed tree.
#[derive(Debug, Default)]
pub struct NullScanner;

impl ChangeScanner for NullScanner {
    fn begin(&mut self, _repo_root: &Path) {}

    fn scan(&mut self, _repo_root: &Path) -> ProgressEvidence {
        ProgressEvidence::default()
    }
}

/// Filesystem snapshot differ: records (mtime, size) per file before the
/// step and reports created/modified/deleted paths afterwards.
#[derive(Debug, Default)]
pub struct FsSnapshotScanner {
    snapshot: HashMap<String, (Option<std::time::SystemTime>, u64)>,
}

impl FsSnapshotScanner {
    pub fn new() -> Self {
        Self::default()
    }

    fn walk(repo_root: &Path) -> HashMap<String, (Option<std::time::SystemTime>, u64)> {
        let mut files = HashMap::new();
        for entry in WalkDir::new(repo_root)
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                name != ".git" && name != "target"
            })
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            let path = entry
                .path()
                .strip_prefix(repo_root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            files.insert(path, (meta.modified().ok(), meta.len()));
        }
        files
    }
}

impl ChangeScanner for FsSnapshotScanner {
    fn begin(&mut self, repo_root: &Path) {
        self.snapshot = Self::walk(repo_root);
    }

    fn scan(&mut self, repo_root: &Path) -> ProgressEvidence {
        let after = Self::walk(repo_root);
        let mut files: Vec<(String, String)> = Vec::new();

        for (path, state) in &after {
            match self.snapshot.get(path) {
                None => files.push((path.clone(), "created".to_string())),
                Some(before) if before != state => {
                    files.push((path.clone(), "modified".to_string()));
                }
                Some(_) => {}
            }
        }
        for path in self.snapshot.keys() {
            if !after.contains_key(path) {
                files.push((path.clone(), "deleted".to_string()));
            }
        }
        files.sort();

        let file_count = files.len();
        let files_summary = if file_count == 0 {
            "no changes".to_string()
        } else {
            format!("{file_count} file(s) changed")
        };
        files.truncate(MAX_EVIDENCE_FILES);

        ProgressEvidence {
            file_count,
            line_count: 0,
            files_summary,
            has_changes: file_count > 0,
            files,
        }
    }
}

/// Everything one engine invocation produced.
#[derive(Debug)]
pub struct StepRunResult {
    pub step_result: StepResult,
    pub events: Vec<RunEvent>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub progress_evidence: Option<ProgressEvidence>,
    /// Envelope from the finalize phase (lifecycle engines only; the
    /// orchestrator synthesizes one otherwise).
    pub envelope: Option<HandoffEnvelope>,
    /// Signal from the engine's route phase (lifecycle engines only).
    pub routing_signal: Option<RoutingSignal>,
    pub is_lifecycle_execution: bool,
}

/// Execute a step through the engine's best interface.
///
/// An engine failure never panics the run: the error becomes a failed
/// [`StepResult`] with captured duration, and routing proceeds through the
/// normal pipeline (typically ending in escalate).
pub fn run_step_with_engine(
    ctx: &StepContext,
    engine: &dyn StepEngine,
    scanner: &mut dyn ChangeScanner,
) -> StepRunResult {
    let started_at = Utc::now();
    let timer = Instant::now();
    scanner.begin(&ctx.repo_root);

    let mut envelope = None;
    let mut routing_signal = None;
    let mut progress_evidence = None;
    let is_lifecycle;

    let (mut step_result, events) = match engine.as_lifecycle() {
        Some(lifecycle) => {
            is_lifecycle = true;
            match run_lifecycle(ctx, lifecycle, scanner) {
                Ok(run) => {
                    envelope = Some(run.0);
                    routing_signal = run.1;
                    progress_evidence = Some(run.2);
                    (run.3, run.4)
                }
                Err(err) => (engine_failure(ctx, &err), Vec::new()),
            }
        }
        None => {
            is_lifecycle = false;
            match engine.run_step(ctx) {
                Ok((result, events)) => {
                    progress_evidence = Some(scanner.scan(&ctx.repo_root));
                    (result, events)
                }
                Err(err) => (engine_failure(ctx, &err), Vec::new()),
            }
        }
    };

    let duration_ms = timer.elapsed().as_millis() as u64;
    step_result.duration_ms = duration_ms;

    StepRunResult {
        step_result,
        events,
        duration_ms,
        started_at,
        progress_evidence,
        envelope,
        routing_signal,
        is_lifecycle_execution: is_lifecycle,
    }
}

type LifecycleRun = (
    HandoffEnvelope,
    Option<RoutingSignal>,
    ProgressEvidence,
    StepResult,
    Vec<RunEvent>,
);

fn run_lifecycle(
    ctx: &StepContext,
    engine: &dyn LifecycleCapableEngine,
    scanner: &mut dyn ChangeScanner,
) -> switchyard_engine::Result<LifecycleRun> {
    // Phase 1: work (the grind).
    let (step_result, mut events, work_summary) = engine.run_worker(ctx)?;

    // Evidence is captured after work and before finalize, so the envelope
    // carries what the worker actually touched.
    let evidence = scanner.scan(&ctx.repo_root);

    // Phase 2: finalize while context is hot.
    let finalization = engine.finalize_step(ctx, &step_result, &work_summary)?;
    events.extend(finalization.events);
    let mut envelope = finalization.envelope;
    attach_file_changes(&mut envelope, &evidence);

    // Phase 3: route in a fresh session.
    let routing_signal = engine.route_step(ctx, &envelope)?;

    Ok((envelope, Some(routing_signal), evidence, step_result, events))
}

fn engine_failure(ctx: &StepContext, err: &switchyard_engine::Error) -> StepResult {
    log::warn!("Engine failed on step {}: {}", ctx.step_id, err);
    StepResult::failed(&ctx.step_id, err.to_string())
}

/// Embed the forensic scan into the envelope's `file_changes` map,
/// bounded for state size.
pub fn attach_file_changes(envelope: &mut HandoffEnvelope, evidence: &ProgressEvidence) {
    envelope
        .file_changes
        .insert("file_count".into(), json!(evidence.file_count));
    envelope
        .file_changes
        .insert("has_changes".into(), json!(evidence.has_changes));
    envelope
        .file_changes
        .insert("summary".into(), json!(evidence.files_summary));
    let files: Vec<Value> = evidence
        .files
        .iter()
        .take(MAX_EVIDENCE_FILES)
        .map(|(path, status)| {
            let mut path = path.clone();
            path.truncate(MAX_EVIDENCE_PATH_BYTES);
            json!({"path": path, "status": status})
        })
        .collect();
    envelope.file_changes.insert("files".into(), Value::Array(files));
}

/// Orchestrator-side events describing one step execution.
pub fn step_execution_events(
    run_id: &str,
    flow_key: &str,
    step_id: &str,
    step_index: usize,
    iteration: u32,
    run: &StepRunResult,
) -> Vec<RunEvent> {
    let mut events = Vec::new();

    if let Some(evidence) = &run.progress_evidence {
        events.push(
            RunEvent::new(run_id, "file_changes", flow_key)
                .with_step(step_id)
                .payload_entry("progress_evidence", evidence.to_payload())
                .payload_entry(
                    "files",
                    Value::Array(
                        evidence
                            .files
                            .iter()
                            .map(|(path, status)| json!({"path": path, "status": status}))
                            .collect(),
                    ),
                ),
        );
    }

    if run.is_lifecycle_execution {
        events.push(
            RunEvent::new(run_id, "lifecycle_phases_completed", flow_key)
                .with_step(step_id)
                .payload_entry("phases", json!(["work", "finalize", "route"]))
                .payload_entry("has_routing_signal", json!(run.routing_signal.is_some()))
                .payload_entry("has_handoff_data", json!(run.envelope.is_some())),
        );
    }

    events.push(
        RunEvent::new(run_id, "step_timing", flow_key)
            .with_step(step_id)
            .payload_entry("duration_ms", json!(run.duration_ms))
            .payload_entry("started_at", json!(run.started_at))
            .payload_entry("step_index", json!(step_index))
            .payload_entry("iteration", json!(iteration)),
    );

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use switchyard_engine::StubStepEngine;
    use switchyard_types::RunSpec;
    use tempfile::TempDir;

    fn ctx(dir: &Path) -> StepContext {
        StepContext {
            repo_root: dir.join("repo"),
            runs_dir: dir.join("runs"),
            run_id: "run-20251208-143022-abc123".into(),
            flow_key: "signal".into(),
            step_id: "author_reqs".into(),
            step_index: 1,
            total_steps: 4,
            spec: RunSpec::new(vec!["signal".into()]),
            flow_title: "Signal Shaping".into(),
            step_role: "Author requirements".into(),
            step_agents: vec!["req-author".into()],
            history: Vec::new(),
            extra: BTreeMap::new(),
            teaching_notes: None,
            routing: None,
            context_pack: None,
        }
    }

    #[test]
    fn test_lifecycle_execution_produces_envelope_and_signal() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("repo")).unwrap();
        let engine = StubStepEngine::new();
        let mut scanner = NullScanner;

        let run = run_step_with_engine(&ctx(dir.path()), &engine, &mut scanner);
        assert!(run.is_lifecycle_execution);
        assert!(run.envelope.is_some());
        assert!(run.routing_signal.is_some());
        assert_eq!(run.step_result.status, "VERIFIED");

        let envelope = run.envelope.unwrap();
        assert_eq!(envelope.file_changes["has_changes"], json!(false));
    }

    #[test]
    fn test_fs_scanner_detects_created_and_modified() {
        let dir = TempDir::new().unwrap();
        let repo = dir.path().join("repo");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(repo.join("existing.rs"), "fn main() {}").unwrap();

        let mut scanner = FsSnapshotScanner::new();
        scanner.begin(&repo);

        std::fs::write(repo.join("new_file.rs"), "pub fn added() {}").unwrap();
        std::fs::write(repo.join("existing.rs"), "fn main() { /* changed */ }").unwrap();

        let evidence = scanner.scan(&repo);
        assert!(evidence.has_changes);
        assert_eq!(evidence.file_count, 2);
        let statuses: BTreeMap<_, _> = evidence.files.iter().cloned().collect();
        assert_eq!(statuses["new_file.rs"], "created");
        assert_eq!(statuses["existing.rs"], "modified");
    }

    #[test]
    fn test_step_execution_events_shape() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("repo")).unwrap();
        let engine = StubStepEngine::new();
        let mut scanner = NullScanner;
        let run = run_step_with_engine(&ctx(dir.path()), &engine, &mut scanner);

        let events = step_execution_events("run-x", "signal", "author_reqs", 1, 0, &run);
        let kinds: Vec<&str> = events.iter().map(|e| e.kind.as_str()).collect();
        assert!(kinds.contains(&"file_changes"));
        assert!(kinds.contains(&"lifecycle_phases_completed"));
        assert!(kinds.contains(&"step_timing"));
    }
}
