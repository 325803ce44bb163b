//! ContextPack builder for step hydration.
//!
//! A ContextPack consolidates everything a step needs to execute: resolved
//! upstream artifact paths, previous handoff envelopes in chronological
//! order, teaching notes, and the Navigator brief written when routing to
//! this step.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use switchyard_catalog::TeachingNotes;
use switchyard_types::{HandoffEnvelope, NextStepBrief, RunState};

const HANDOFF_DIR: &str = "handoff";
const NAV_DIR: &str = "nav";

/// Common artifact names scanned per flow when no teaching notes scope the
/// inputs.
const COMMON_ARTIFACTS: &[(&str, &[&str])] = &[
    (
        "signal",
        &[
            "problem_statement.md",
            "requirements.md",
            "bdd_scenarios.md",
            "risk_assessment.md",
        ],
    ),
    (
        "plan",
        &[
            "adr.md",
            "api_contracts.yaml",
            "interface_spec.md",
            "test_plan.md",
            "work_plan.md",
        ],
    ),
    (
        "build",
        &[
            "impl_changes_summary.md",
            "test_summary.md",
            "code_critique.md",
            "build_receipt.json",
        ],
    ),
    ("gate", &["merge_decision.md", "audit_report.md", "policy_verdict.md"]),
];

/// Structured context for step execution (the "hydrate" phase).
#[derive(Debug, Clone, Default)]
pub struct ContextPack {
    pub run_id: String,
    pub flow_key: String,
    pub step_id: String,
    /// Artifact names to their resolved, existing file paths.
    pub upstream_artifacts: BTreeMap<String, PathBuf>,
    /// Envelopes from prior steps in this flow, chronologically ordered.
    pub previous_envelopes: Vec<HandoffEnvelope>,
    pub teaching_notes: Option<TeachingNotes>,
    pub flow_spec_prompt: Option<String>,
    pub agent_persona: Option<String>,
    /// Brief the Navigator left when routing to this step.
    pub navigator_brief: Option<NextStepBrief>,
}

impl ContextPack {
    pub fn has_artifacts(&self) -> bool {
        !self.upstream_artifacts.is_empty()
    }

    pub fn get_artifact_path(&self, name: &str) -> Option<&PathBuf> {
        self.upstream_artifacts.get(name)
    }

    pub fn get_latest_envelope(&self) -> Option<&HandoffEnvelope> {
        self.previous_envelopes.last()
    }

    pub fn get_envelope_for_step(&self, step_id: &str) -> Option<&HandoffEnvelope> {
        self.previous_envelopes.iter().find(|e| e.step_id == step_id)
    }

    pub fn has_brief(&self) -> bool {
        self.navigator_brief.is_some()
    }
}

/// Inputs for building a ContextPack.
#[derive(Debug, Clone, Copy)]
pub struct PackRequest<'a> {
    pub run_id: &'a str,
    pub flow_key: &'a str,
    pub step_id: &'a str,
    /// RUN_BASE for this flow: `runs/<run_id>/<flow_key>/`.
    pub run_base: &'a Path,
    pub repo_root: Option<&'a Path>,
    pub teaching_notes: Option<&'a TeachingNotes>,
    /// When provided and non-empty, envelopes come from the in-memory
    /// state instead of disk.
    pub run_state: Option<&'a RunState>,
    /// Flow step ordering for chronological envelope sorting.
    pub step_order: &'a BTreeMap<String, usize>,
}

/// Assemble the full ContextPack for a step.
pub fn build_context_pack(req: &PackRequest<'_>) -> ContextPack {
    log::debug!(
        "Building context pack for step {} in flow {} (run_id={})",
        req.step_id,
        req.flow_key,
        req.run_id
    );

    let upstream_artifacts = resolve_upstream_artifacts(
        req.run_base,
        req.teaching_notes,
        req.repo_root,
    );

    let previous_envelopes = match req.run_state {
        Some(state) if !state.handoff_envelopes.is_empty() => {
            let mut envelopes: Vec<HandoffEnvelope> = state
                .handoff_envelopes
                .iter()
                .filter(|(step_id, _)| step_id.as_str() != req.step_id)
                .map(|(_, env)| env.clone())
                .collect();
            envelopes.sort_by_key(|e| {
                req.step_order
                    .get(&e.step_id)
                    .copied()
                    .unwrap_or(usize::MAX)
            });
            envelopes
        }
        _ => load_previous_envelopes(req.run_base, req.step_order),
    };

    let navigator_brief = load_navigator_brief(req.run_base, req.step_id);
    if let Some(brief) = &navigator_brief {
        log::debug!(
            "Loaded navigator brief for step {}: {} focus areas, {} warnings",
            req.step_id,
            brief.focus_areas.len(),
            brief.warnings.len()
        );
    }

    ContextPack {
        run_id: req.run_id.to_string(),
        flow_key: req.flow_key.to_string(),
        step_id: req.step_id.to_string(),
        upstream_artifacts,
        previous_envelopes,
        teaching_notes: req.teaching_notes.cloned(),
        flow_spec_prompt: None,
        agent_persona: None,
        navigator_brief,
    }
}

/// Resolve upstream artifact paths for a step.
///
/// Input specs resolve as:
/// - `RUN_BASE/<flow>/<artifact>` → under the parent run directory
///   (cross-flow); `RUN_BASE/<artifact>` → under the current flow base.
/// - Absolute paths are used as-is.
/// - Anything else resolves under `repo_root` when given, else the flow
///   base.
///
/// Only paths that exist on disk are returned. Without teaching notes, a
/// fixed list of common artifacts is scanned across all flow directories
/// and exposed under qualified `<flow>/<file>` names.
pub fn resolve_upstream_artifacts(
    run_base: &Path,
    teaching_notes: Option<&TeachingNotes>,
    repo_root: Option<&Path>,
) -> BTreeMap<String, PathBuf> {
    let run_dir = run_base.parent().unwrap_or(run_base);

    let Some(notes) = teaching_notes.filter(|n| !n.inputs.is_empty()) else {
        return scan_common_artifacts(run_dir);
    };

    let mut artifacts = BTreeMap::new();
    for input_spec in &notes.inputs {
        let resolved = resolve_artifact_path(input_spec, run_base, run_dir, repo_root);
        if resolved.exists() {
            let name = resolved
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| input_spec.clone());
            log::debug!("Resolved artifact {} -> {}", input_spec, resolved.display());
            artifacts.insert(name, resolved);
        } else {
            log::debug!(
                "Artifact not found: {} (resolved to {})",
                input_spec,
                resolved.display()
            );
        }
    }
    artifacts
}

fn resolve_artifact_path(
    input_spec: &str,
    run_base: &Path,
    run_dir: &Path,
    repo_root: Option<&Path>,
) -> PathBuf {
    if let Some(relative) = input_spec.strip_prefix("RUN_BASE/") {
        // A slash means the spec names another flow's artifact.
        if relative.contains('/') {
            return run_dir.join(relative);
        }
        return run_base.join(relative);
    }

    if input_spec.starts_with('/') {
        return PathBuf::from(input_spec);
    }

    match repo_root {
        Some(root) => root.join(input_spec),
        None => run_base.join(input_spec),
    }
}

fn scan_common_artifacts(run_dir: &Path) -> BTreeMap<String, PathBuf> {
    let mut artifacts = BTreeMap::new();
    let Ok(entries) = fs::read_dir(run_dir) else {
        return artifacts;
    };

    for entry in entries.filter_map(|e| e.ok()) {
        let flow_dir = entry.path();
        if !flow_dir.is_dir() {
            continue;
        }
        let flow_key = entry.file_name().to_string_lossy().into_owned();
        let Some((_, names)) = COMMON_ARTIFACTS.iter().find(|(k, _)| *k == flow_key) else {
            continue;
        };
        for name in *names {
            let path = flow_dir.join(name);
            if path.exists() {
                artifacts.insert(format!("{flow_key}/{name}"), path);
            }
        }
    }
    artifacts
}

/// Load previous handoff envelopes from disk, ordered by flow step order.
pub fn load_previous_envelopes(
    run_base: &Path,
    step_order: &BTreeMap<String, usize>,
) -> Vec<HandoffEnvelope> {
    let handoff_dir = run_base.join(HANDOFF_DIR);
    let Ok(entries) = fs::read_dir(&handoff_dir) else {
        log::debug!("Handoff directory does not exist: {}", handoff_dir.display());
        return Vec::new();
    };

    let mut envelopes = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(content) = fs::read_to_string(&path) else {
            log::warn!("Failed to read envelope {}", path.display());
            continue;
        };
        match serde_json::from_str::<HandoffEnvelope>(&content) {
            Ok(envelope) => envelopes.push(envelope),
            Err(err) => {
                log::warn!("Failed to parse envelope JSON in {}: {}", path.display(), err);
            }
        }
    }

    envelopes.sort_by_key(|e| step_order.get(&e.step_id).copied().unwrap_or(usize::MAX));
    envelopes
}

/// Load the Navigator brief for a step from
/// `RUN_BASE/nav/<step_id>-brief.json`, if one was written.
pub fn load_navigator_brief(run_base: &Path, step_id: &str) -> Option<NextStepBrief> {
    let brief_path = run_base.join(NAV_DIR).join(format!("{step_id}-brief.json"));
    if !brief_path.exists() {
        return None;
    }

    let content = match fs::read_to_string(&brief_path) {
        Ok(content) => content,
        Err(err) => {
            log::warn!(
                "Failed to load navigator brief from {}: {}",
                brief_path.display(),
                err
            );
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(brief) => Some(brief),
        Err(err) => {
            log::warn!(
                "Failed to parse navigator brief JSON in {}: {}",
                brief_path.display(),
                err
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_types::RoutingSignal;
    use tempfile::TempDir;

    fn write_envelope(run_base: &Path, step_id: &str) {
        let envelope = HandoffEnvelope::new(
            step_id,
            "signal",
            "run-x",
            RoutingSignal::default(),
            format!("{step_id} done"),
        );
        let handoff = run_base.join(HANDOFF_DIR);
        fs::create_dir_all(&handoff).unwrap();
        fs::write(
            handoff.join(format!("{step_id}.json")),
            serde_json::to_string_pretty(&envelope).unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn test_run_base_prefix_resolution() {
        let dir = TempDir::new().unwrap();
        let run_dir = dir.path().join("run-x");
        let run_base = run_dir.join("build");
        fs::create_dir_all(run_dir.join("plan")).unwrap();
        fs::create_dir_all(&run_base).unwrap();
        fs::write(run_dir.join("plan").join("adr.md"), "# ADR").unwrap();
        fs::write(run_base.join("notes.md"), "notes").unwrap();

        let notes = TeachingNotes {
            inputs: vec![
                "RUN_BASE/plan/adr.md".into(),
                "RUN_BASE/notes.md".into(),
                "RUN_BASE/plan/missing.md".into(),
            ],
            ..TeachingNotes::default()
        };

        let artifacts = resolve_upstream_artifacts(&run_base, Some(&notes), None);
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts["adr.md"], run_dir.join("plan").join("adr.md"));
        assert_eq!(artifacts["notes.md"], run_base.join("notes.md"));
    }

    #[test]
    fn test_fallback_scan_uses_qualified_names() {
        let dir = TempDir::new().unwrap();
        let run_dir = dir.path().join("run-x");
        let signal_dir = run_dir.join("signal");
        fs::create_dir_all(&signal_dir).unwrap();
        fs::write(signal_dir.join("requirements.md"), "reqs").unwrap();

        let artifacts = resolve_upstream_artifacts(&run_dir.join("build"), None, None);
        assert!(artifacts.contains_key("signal/requirements.md"));
    }

    #[test]
    fn test_envelopes_sorted_by_step_order() {
        let dir = TempDir::new().unwrap();
        let run_base = dir.path().join("run-x").join("signal");
        write_envelope(&run_base, "critique_reqs");
        write_envelope(&run_base, "normalize_signal");
        write_envelope(&run_base, "author_reqs");

        let order = BTreeMap::from([
            ("normalize_signal".to_string(), 0usize),
            ("author_reqs".to_string(), 1),
            ("critique_reqs".to_string(), 2),
        ]);
        let envelopes = load_previous_envelopes(&run_base, &order);
        let ids: Vec<&str> = envelopes.iter().map(|e| e.step_id.as_str()).collect();
        assert_eq!(ids, vec!["normalize_signal", "author_reqs", "critique_reqs"]);
    }

    #[test]
    fn test_navigator_brief_round_trip() {
        let dir = TempDir::new().unwrap();
        let run_base = dir.path().join("run-x").join("build");
        let nav_dir = run_base.join(NAV_DIR);
        fs::create_dir_all(&nav_dir).unwrap();

        let brief = NextStepBrief {
            objective: "Implement the storage commit protocol".into(),
            focus_areas: vec!["atomicity".into()],
            warnings: vec!["envelope files are immutable".into()],
            ..NextStepBrief::default()
        };
        fs::write(
            nav_dir.join("implement-brief.json"),
            serde_json::to_string_pretty(&brief).unwrap(),
        )
        .unwrap();

        let loaded = load_navigator_brief(&run_base, "implement").unwrap();
        assert_eq!(loaded, brief);
        assert!(load_navigator_brief(&run_base, "other-step").is_none());
    }

    #[test]
    fn test_build_pack_prefers_in_memory_envelopes() {
        let dir = TempDir::new().unwrap();
        let run_base = dir.path().join("run-x").join("signal");
        fs::create_dir_all(&run_base).unwrap();

        let mut state = RunState::new("run-x", "signal");
        let envelope = HandoffEnvelope::new(
            "normalize_signal",
            "signal",
            "run-x",
            RoutingSignal::default(),
            "done",
        );
        state
            .handoff_envelopes
            .insert("normalize_signal".into(), envelope);

        let order = BTreeMap::from([
            ("normalize_signal".to_string(), 0usize),
            ("author_reqs".to_string(), 1),
        ]);
        let pack = build_context_pack(&PackRequest {
            run_id: "run-x",
            flow_key: "signal",
            step_id: "author_reqs",
            run_base: &run_base,
            repo_root: None,
            teaching_notes: None,
            run_state: Some(&state),
            step_order: &order,
        });

        assert_eq!(pack.previous_envelopes.len(), 1);
        assert_eq!(pack.get_latest_envelope().unwrap().step_id, "normalize_signal");
        assert!(pack.get_envelope_for_step("author_reqs").is_none());
    }
}
